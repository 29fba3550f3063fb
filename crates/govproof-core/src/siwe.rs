//! Sign-In-With-Ethereum (EIP-4361) challenge text and RFC 3339 timestamps.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Address, ParseError};

const HEADER_SUFFIX: &str = " wants you to sign in with your Ethereum account:";
const MIN_NONCE_LEN: usize = 8;

/// The fields of a sign-in challenge. The signature covers the rendered
/// text from [`SiweChallenge::to_message`], not the fields themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiweChallenge {
    pub domain: String,
    pub address: String,
    pub statement: String,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: String,
    pub expiration_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
}

impl SiweChallenge {
    /// Render the canonical message text.
    pub fn to_message(&self) -> String {
        let mut out = format!(
            "{domain}{HEADER_SUFFIX}\n{address}\n\n{statement}\n\nURI: {uri}\nVersion: {version}\nChain ID: {chain_id}\nNonce: {nonce}\nIssued At: {issued_at}\nExpiration Time: {expiration}",
            domain = self.domain,
            address = self.address,
            statement = self.statement,
            uri = self.uri,
            version = self.version,
            chain_id = self.chain_id,
            nonce = self.nonce,
            issued_at = self.issued_at,
            expiration = self.expiration_time,
        );
        if let Some(not_before) = &self.not_before {
            out.push_str("\nNot Before: ");
            out.push_str(not_before);
        }
        if let Some(request_id) = &self.request_id {
            out.push_str("\nRequest ID: ");
            out.push_str(request_id);
        }
        if !self.resources.is_empty() {
            out.push_str("\nResources:");
            for resource in &self.resources {
                out.push_str("\n- ");
                out.push_str(resource);
            }
        }
        out
    }

    /// Parse canonical message text. Fails unless rendering the parsed
    /// fields reproduces `text` exactly.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut lines = text.split('\n');
        let mut next = |what: &str| {
            lines
                .next()
                .ok_or_else(|| ParseError::Message(format!("missing {what}")))
        };

        let domain = next("header")?
            .strip_suffix(HEADER_SUFFIX)
            .ok_or_else(|| ParseError::Message("bad header line".into()))?
            .to_string();
        let address = next("address")?.to_string();
        expect_blank(next("blank line")?)?;
        let statement = next("statement")?.to_string();
        expect_blank(next("blank line")?)?;
        let uri = field(next("URI")?, "URI")?;
        let version = field(next("Version")?, "Version")?;
        let chain_id = field(next("Chain ID")?, "Chain ID")?
            .parse::<u64>()
            .map_err(|e| ParseError::Message(format!("chain id: {e}")))?;
        let nonce = field(next("Nonce")?, "Nonce")?;
        let issued_at = field(next("Issued At")?, "Issued At")?;
        let expiration_time = field(next("Expiration Time")?, "Expiration Time")?;

        let mut challenge = Self {
            domain,
            address,
            statement,
            uri,
            version,
            chain_id,
            nonce,
            issued_at,
            expiration_time,
            not_before: None,
            request_id: None,
            resources: Vec::new(),
        };

        let mut in_resources = false;
        for line in lines {
            if in_resources {
                let resource = line
                    .strip_prefix("- ")
                    .ok_or_else(|| ParseError::Message(format!("bad resource line: {line}")))?;
                challenge.resources.push(resource.to_string());
            } else if let Some(value) = line.strip_prefix("Not Before: ") {
                challenge.not_before = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("Request ID: ") {
                challenge.request_id = Some(value.to_string());
            } else if line == "Resources:" {
                in_resources = true;
            } else {
                return Err(ParseError::Message(format!("unexpected line: {line}")));
            }
        }

        if challenge.to_message() != text {
            return Err(ParseError::Message("message is not in canonical form".into()));
        }
        Ok(challenge)
    }

    /// Check field shapes: address, version, nonce alphabet and length,
    /// RFC 3339 timestamps, and no embedded line breaks.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.domain.is_empty() || self.domain.contains(char::is_whitespace) {
            return Err(ParseError::Message(format!("invalid domain {:?}", self.domain)));
        }
        self.signer_address()?;
        for (name, value) in [
            ("statement", self.statement.as_str()),
            ("uri", self.uri.as_str()),
            ("requestId", self.request_id.as_deref().unwrap_or("")),
        ] {
            if value.contains(['\n', '\r']) {
                return Err(ParseError::Message(format!("{name} contains a line break")));
            }
        }
        if self.uri.is_empty() {
            return Err(ParseError::Message("uri is empty".into()));
        }
        if self.resources.iter().any(|r| r.is_empty() || r.contains(['\n', '\r'])) {
            return Err(ParseError::Message("invalid resource entry".into()));
        }
        if self.version != "1" {
            return Err(ParseError::Message(format!(
                "unsupported version {:?}",
                self.version
            )));
        }
        if self.nonce.len() < MIN_NONCE_LEN || !self.nonce.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ParseError::Message(format!(
                "nonce must be at least {} alphanumeric characters",
                MIN_NONCE_LEN
            )));
        }
        self.issued_at_time()?;
        self.expiration()?;
        self.not_before_time()?;
        Ok(())
    }

    pub fn signer_address(&self) -> Result<Address, ParseError> {
        self.address.parse()
    }

    pub fn issued_at_time(&self) -> Result<Timestamp, ParseError> {
        Timestamp::parse_rfc3339(&self.issued_at)
    }

    pub fn expiration(&self) -> Result<Timestamp, ParseError> {
        Timestamp::parse_rfc3339(&self.expiration_time)
    }

    pub fn not_before_time(&self) -> Result<Option<Timestamp>, ParseError> {
        self.not_before
            .as_deref()
            .map(Timestamp::parse_rfc3339)
            .transpose()
    }
}

fn expect_blank(line: &str) -> Result<(), ParseError> {
    if line.is_empty() {
        Ok(())
    } else {
        Err(ParseError::Message(format!("expected blank line, got {line:?}")))
    }
}

fn field(line: &str, name: &str) -> Result<String, ParseError> {
    line.strip_prefix(name)
        .and_then(|rest| rest.strip_prefix(": "))
        .map(str::to_string)
        .ok_or_else(|| ParseError::Message(format!("expected `{name}: ...`, got {line:?}")))
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Seconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn plus_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// Parse `YYYY-MM-DDTHH:MM:SS[.frac](Z|±HH:MM)`. Fractional seconds are
    /// truncated; instants before the epoch are rejected.
    pub fn parse_rfc3339(s: &str) -> Result<Self, ParseError> {
        let bad = || ParseError::Timestamp(s.to_string());
        let b = s.as_bytes();
        if b.len() < 20
            || b[4] != b'-'
            || b[7] != b'-'
            || !matches!(b[10], b'T' | b't')
            || b[13] != b':'
            || b[16] != b':'
        {
            return Err(bad());
        }

        let year = digits(&b[0..4]).ok_or_else(bad)?;
        let month = digits(&b[5..7]).ok_or_else(bad)?;
        let day = digits(&b[8..10]).ok_or_else(bad)?;
        let hour = digits(&b[11..13]).ok_or_else(bad)?;
        let minute = digits(&b[14..16]).ok_or_else(bad)?;
        let second = digits(&b[17..19]).ok_or_else(bad)?;
        if !(1..=12).contains(&month)
            || day == 0
            || day > days_in_month(year, month)
            || hour > 23
            || minute > 59
            || second > 59
        {
            return Err(bad());
        }

        let mut rest = &b[19..];
        if let Some(frac) = rest.strip_prefix(b".") {
            let len = frac.iter().take_while(|c| c.is_ascii_digit()).count();
            if len == 0 {
                return Err(bad());
            }
            rest = &frac[len..];
        }

        let offset: i64 = match rest {
            [b'Z' | b'z'] => 0,
            [sign @ (b'+' | b'-'), h1, h2, b':', m1, m2] => {
                let oh = digits(&[*h1, *h2]).ok_or_else(bad)?;
                let om = digits(&[*m1, *m2]).ok_or_else(bad)?;
                if oh > 23 || om > 59 {
                    return Err(bad());
                }
                let secs = i64::from(oh * 3600 + om * 60);
                if *sign == b'+' {
                    secs
                } else {
                    -secs
                }
            }
            _ => return Err(bad()),
        };

        let days = days_from_civil(i64::from(year), month, day);
        let local = days * 86_400 + i64::from(hour * 3600 + minute * 60 + second);
        u64::try_from(local - offset).map(Self).map_err(|_| bad())
    }

    /// Render as `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn to_rfc3339(&self) -> String {
        let days = self.0 / 86_400;
        let time_of_day = self.0 % 86_400;
        let (year, month, day) = civil_from_days(days as i64);
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            year,
            month,
            day,
            time_of_day / 3600,
            (time_of_day % 3600) / 60,
            time_of_day % 60
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

fn digits(bytes: &[u8]) -> Option<u32> {
    bytes.iter().try_fold(0u32, |acc, c| {
        c.is_ascii_digit().then(|| acc * 10 + u32::from(c - b'0'))
    })
}

fn is_leap_year(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Days since the Unix epoch of a Gregorian civil date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = i64::from((month + 9) % 12);
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Gregorian civil date from day count since Unix epoch.
fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y as i32, m, d)
}

//! Decoded access tokens
//!
//! A [`Token`] is the read-only view of a compact JWS: the header and payload
//! decoded to JSON objects, plus the encoded form for signature checks.
//! Decoding does not verify anything; that is the validator chain's job.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// base64url that accepts both padded and unpadded segments
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Well-known header and claim names
pub mod claims {
    /// Header: signature algorithm
    pub const ALG: &str = "alg";
    /// Header: key id
    pub const KID: &str = "kid";
    /// Header: JWKS URL (XSUAA)
    pub const JKU: &str = "jku";
    /// Issuer
    pub const ISS: &str = "iss";
    /// Issuer of IAS tokens issued for custom domains
    pub const IAS_ISS: &str = "ias_iss";
    /// Audience, string or array
    pub const AUD: &str = "aud";
    /// Authorized party
    pub const AZP: &str = "azp";
    /// XSUAA client id
    pub const CID: &str = "cid";
    /// Expiration time, seconds since the epoch
    pub const EXP: &str = "exp";
    /// Not-before time
    pub const NBF: &str = "nbf";
    /// Issued-at time
    pub const IAT: &str = "iat";
    /// XSUAA zone id
    pub const ZID: &str = "zid";
    /// IAS application tenant id
    pub const APP_TID: &str = "app_tid";
    /// Legacy IAS zone id
    pub const ZONE_UUID: &str = "zone_uuid";
    /// XSUAA scopes
    pub const SCOPE: &str = "scope";
    /// User name
    pub const USER_NAME: &str = "user_name";
    /// Subject
    pub const SUB: &str = "sub";
    /// Confirmation claim (RFC 8705)
    pub const CNF: &str = "cnf";
    /// SHA-256 certificate thumbprint inside `cnf`
    pub const CNF_X5T: &str = "x5t#S256";
}

/// A decoded, not yet validated JSON Web Token
#[derive(Clone, PartialEq)]
pub struct Token {
    encoded: String,
    header: Map<String, Value>,
    payload: Map<String, Value>,
}

impl Token {
    /// Decode a compact JWS (`header.payload.signature`).
    ///
    /// Duplicate JSON members keep their last occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedToken`] when the token does not
    /// have three non-empty segments, a segment is not base64url, or the
    /// header or payload is not a JSON object.
    pub fn decode(encoded: &str) -> Result<Self, ValidationError> {
        let encoded = encoded.trim();
        let segments: Vec<&str> = encoded.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(ValidationError::MalformedToken(
                "expected three non-empty dot-separated segments".into(),
            ));
        }

        let header = decode_object(segments[0], "header")?;
        let payload = decode_object(segments[1], "payload")?;
        Ok(Self {
            encoded: encoded.to_string(),
            header,
            payload,
        })
    }

    /// Encoded form; keep it out of logs
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// `header.payload`, the bytes the signature covers
    pub fn signing_input(&self) -> &str {
        match self.encoded.rfind('.') {
            Some(pos) => &self.encoded[..pos],
            None => &self.encoded,
        }
    }

    /// base64url signature segment
    pub fn signature(&self) -> &str {
        match self.encoded.rfind('.') {
            Some(pos) => &self.encoded[pos + 1..],
            None => "",
        }
    }

    /// Decoded header object
    pub fn header(&self) -> &Map<String, Value> {
        &self.header
    }

    /// Decoded payload object
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// String header parameter
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header.get(name).and_then(Value::as_str)
    }

    /// Whether the payload contains `name`
    pub fn has_claim(&self, name: &str) -> bool {
        self.payload.contains_key(name)
    }

    /// Raw claim value
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// String claim; `None` when absent or not a string
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    /// Claim that may be a single string or an array of strings.
    ///
    /// Non-string array elements are skipped.
    pub fn claim_strings(&self, name: &str) -> Vec<String> {
        match self.payload.get(name) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// NumericDate claim; fractional seconds are truncated
    pub fn timestamp_claim(&self, name: &str) -> Option<DateTime<Utc>> {
        let value = self.payload.get(name)?;
        let seconds = value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))?;
        DateTime::from_timestamp(seconds, 0)
    }

    /// `iss`
    pub fn issuer(&self) -> Option<&str> {
        self.claim_str(claims::ISS)
    }

    /// `exp`
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.timestamp_claim(claims::EXP)
    }

    /// `nbf`
    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.timestamp_claim(claims::NBF)
    }

    /// `iat`
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_claim(claims::IAT)
    }

    /// `aud` as a list
    pub fn audiences(&self) -> Vec<String> {
        self.claim_strings(claims::AUD)
    }

    /// Requesting client: `azp`, then `cid`
    pub fn client_id(&self) -> Option<&str> {
        self.claim_str(claims::AZP)
            .or_else(|| self.claim_str(claims::CID))
    }

    /// Zone or tenant: `zid`, then `app_tid`, then `zone_uuid`
    pub fn zone_id(&self) -> Option<&str> {
        self.claim_str(claims::ZID)
            .or_else(|| self.claim_str(claims::APP_TID))
            .or_else(|| self.claim_str(claims::ZONE_UUID))
    }

    /// XSUAA scopes
    pub fn scopes(&self) -> Vec<String> {
        self.claim_strings(claims::SCOPE)
    }
}

impl FromStr for Token {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("header", &self.header)
            .field("payload", &self.payload)
            .field("encoded", &"<redacted>")
            .finish()
    }
}

fn decode_object(segment: &str, part: &str) -> Result<Map<String, Value>, ValidationError> {
    let bytes = SEGMENT_ENGINE
        .decode(segment)
        .map_err(|_| ValidationError::MalformedToken(format!("{part} is not valid base64url")))?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ValidationError::MalformedToken(format!(
            "{part} is not a JSON object"
        ))),
        Err(_) => Err(ValidationError::MalformedToken(format!(
            "{part} is not valid JSON"
        ))),
    }
}

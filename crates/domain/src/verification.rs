//! Inbound webhook authenticity schemes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{
    CREDENTIAL_WEBHOOK_PASSWORD, CREDENTIAL_WEBHOOK_SECRET, CREDENTIAL_WEBHOOK_USERNAME,
    CredentialSet,
};

type HmacSha256 = Hmac<Sha256>;

/// Default replay window for timestamped signatures.
pub const DEFAULT_SIGNATURE_TOLERANCE_SECONDS: i64 = 300;

/// Text encoding of a header-carried signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// Lowercase or uppercase hexadecimal.
    Hex,
    /// Standard base64 with padding.
    Base64,
}

/// Verification scheme declared by a webhook descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationScheme {
    /// HMAC-SHA256 over the raw body.
    BodyHmac {
        /// Header carrying the signature.
        header: String,
        /// Signature encoding.
        encoding: SignatureEncoding,
        /// Optional prefix such as `sha256=` stripped before decoding.
        prefix: Option<String>,
    },
    /// HMAC-SHA256 over `timestamp + "." + body` carried as `t=..,v1=..`.
    TimestampedHmac {
        /// Header carrying timestamp and signatures.
        header: String,
        /// Maximum clock distance accepted for the timestamp.
        tolerance_seconds: i64,
    },
    /// HTTP Basic credentials matched against the credential set.
    BasicAuth,
    /// Accept every request. For vendors without webhook signing.
    Unverified,
}

/// Why a webhook failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    /// No signature or credentials were presented.
    MissingSignature,
    /// The presented signature or credentials did not match.
    InvalidSignature,
}

impl VerificationFailure {
    /// Returns the short diagnostic used as the `401` body.
    #[must_use]
    pub fn diagnostic(self) -> &'static str {
        match self {
            Self::MissingSignature => "missing hmac",
            Self::InvalidSignature => "invalid hmac",
        }
    }
}

impl VerificationScheme {
    /// Verifies an inbound request against the integration's credentials.
    ///
    /// A scheme that needs a secret the integration does not have rejects the
    /// request as invalid.
    pub fn verify(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        credentials: &CredentialSet,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationFailure> {
        match self {
            Self::BodyHmac {
                header,
                encoding,
                prefix,
            } => {
                let presented = header_text(headers, header)?;
                let presented = match prefix {
                    Some(prefix) => presented.strip_prefix(prefix.as_str()).unwrap_or(presented),
                    None => presented,
                };
                let signature = decode_signature(presented, *encoding)?;
                let secret = webhook_secret(credentials)?;
                verify_hmac(secret, &[body], &signature)
            }
            Self::TimestampedHmac {
                header,
                tolerance_seconds,
            } => {
                let presented = header_text(headers, header)?;
                let (timestamp, signatures) = parse_timestamped_header(presented)?;
                let signed_at: i64 = timestamp
                    .parse()
                    .map_err(|_| VerificationFailure::InvalidSignature)?;
                if now.timestamp().abs_diff(signed_at) > tolerance_seconds.unsigned_abs() {
                    return Err(VerificationFailure::InvalidSignature);
                }

                let secret = webhook_secret(credentials)?;
                let matched = signatures.iter().any(|candidate| {
                    decode_signature(candidate, SignatureEncoding::Hex).is_ok_and(|signature| {
                        verify_hmac(secret, &[timestamp.as_bytes(), b".", body], &signature)
                            .is_ok()
                    })
                });

                if matched {
                    Ok(())
                } else {
                    Err(VerificationFailure::InvalidSignature)
                }
            }
            Self::BasicAuth => verify_basic_auth(headers, credentials),
            Self::Unverified => Ok(()),
        }
    }
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, VerificationFailure> {
    let value = headers
        .get(name)
        .ok_or(VerificationFailure::MissingSignature)?
        .to_str()
        .map_err(|_| VerificationFailure::InvalidSignature)?
        .trim();

    if value.is_empty() {
        return Err(VerificationFailure::MissingSignature);
    }

    Ok(value)
}

fn webhook_secret(credentials: &CredentialSet) -> Result<&str, VerificationFailure> {
    credentials
        .get(CREDENTIAL_WEBHOOK_SECRET)
        .ok_or(VerificationFailure::InvalidSignature)
}

fn decode_signature(
    presented: &str,
    encoding: SignatureEncoding,
) -> Result<Vec<u8>, VerificationFailure> {
    let decoded = match encoding {
        SignatureEncoding::Hex => hex::decode(presented.trim()).ok(),
        SignatureEncoding::Base64 => STANDARD.decode(presented.trim()).ok(),
    };

    decoded.ok_or(VerificationFailure::InvalidSignature)
}

fn verify_hmac(secret: &str, parts: &[&[u8]], signature: &[u8]) -> Result<(), VerificationFailure> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationFailure::InvalidSignature)?;
    for part in parts {
        mac.update(part);
    }

    mac.verify_slice(signature)
        .map_err(|_| VerificationFailure::InvalidSignature)
}

fn parse_timestamped_header(value: &str) -> Result<(String, Vec<String>), VerificationFailure> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for element in value.split(',') {
        let Some((key, item)) = element.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = Some(item.to_owned()),
            "v1" => signatures.push(item.to_owned()),
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok((timestamp, signatures)),
        _ => Err(VerificationFailure::InvalidSignature),
    }
}

fn verify_basic_auth(
    headers: &HeaderMap,
    credentials: &CredentialSet,
) -> Result<(), VerificationFailure> {
    let authorization = header_text(headers, http::header::AUTHORIZATION.as_str())?;
    let encoded = authorization
        .strip_prefix("Basic ")
        .ok_or(VerificationFailure::InvalidSignature)?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| VerificationFailure::InvalidSignature)?;

    let (Some(username), Some(password)) = (
        credentials.get(CREDENTIAL_WEBHOOK_USERNAME),
        credentials.get(CREDENTIAL_WEBHOOK_PASSWORD),
    ) else {
        return Err(VerificationFailure::InvalidSignature);
    };

    let expected = format!("{username}:{password}");
    if bool::from(expected.as_bytes().ct_eq(decoded.as_slice())) {
        Ok(())
    } else {
        Err(VerificationFailure::InvalidSignature)
    }
}

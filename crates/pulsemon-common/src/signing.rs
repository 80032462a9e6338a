//! HMAC-SHA256 body signatures carried in the `HashSHA256` header.
//!
//! Agent and server share one secret. The signature always covers the body
//! bytes as they travel on the wire, i.e. after gzip compression.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded signature.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing {SIGNATURE_HEADER} header")]
    Missing,

    #[error("{SIGNATURE_HEADER} header is not valid hex")]
    Malformed,

    #[error("signature does not match data")]
    Mismatch,
}

fn mac(secret: &str) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

/// Returns the lowercase hex HMAC-SHA256 of `data`.
///
/// # Examples
///
/// ```
/// use pulsemon_common::signing::sign;
///
/// let sig = sign("s3cret", b"payload");
/// assert_eq!(sig.len(), 64);
/// assert_eq!(sig, sign("s3cret", b"payload"));
/// assert_ne!(sig, sign("other", b"payload"));
/// ```
pub fn sign(secret: &str, data: &[u8]) -> String {
    let mut mac = mac(secret);
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a received signature in constant time.
pub fn verify(secret: &str, data: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
    let signature = signature.ok_or(SignatureError::Missing)?;
    let expected = hex::decode(signature.trim()).map_err(|_| SignatureError::Malformed)?;
    let mut mac = mac(secret);
    mac.update(data);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

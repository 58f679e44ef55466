//! RPC request signing.
//!
//! String to sign: `POST&%2F&` + percent-encoded canonical query, where the
//! canonical query is every parameter (sorted by name) encoded as
//! `name=value` and joined with `&`. The key is the access secret followed by
//! `&`. The signature is the base64 HMAC-SHA256 digest.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub(crate) const SIGNATURE_METHOD: &str = "HMAC-SHA256";
pub(crate) const SIGNATURE_VERSION: &str = "1.0";

/// RFC 3986 encoding: unreserved characters pass through, every other byte
/// becomes `%XX` with uppercase hex.
pub(crate) fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

pub(crate) fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub(crate) fn sign(
    secret: &str,
    params: &BTreeMap<String, String>,
) -> Result<String, InvalidLength> {
    let string_to_sign = format!("POST&%2F&{}", percent_encode(&canonical_query(params)));
    let key = format!("{}&", secret);

    let mut mac = HmacSha256::new_from_slice(key.as_bytes())?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

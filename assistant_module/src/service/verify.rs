use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const LINE_SIGNATURE_HEADER: &str = "x-line-signature";

/// base64(HMAC-SHA256(channel secret, raw body)), as LINE signs webhooks.
pub fn compute_line_signature(channel_secret: &str, body: &[u8]) -> Result<String, &'static str> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(channel_secret.as_bytes()).map_err(|_| "bad_secret")?;
    mac.update(body);
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

pub(super) fn verify_line(
    channel_secret: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), &'static str> {
    let signature = headers
        .get(LINE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or("missing_signature")?;
    let provided = BASE64_STANDARD
        .decode(signature)
        .map_err(|_| "invalid_signature")?;
    let mut mac =
        Hmac::<Sha256>::new_from_slice(channel_secret.as_bytes()).map_err(|_| "bad_secret")?;
    mac.update(body);
    mac.verify_slice(&provided).map_err(|_| "invalid_signature")
}

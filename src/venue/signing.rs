//! HMAC-SHA256 request signing shared by venue adapters (spec §4.1 "Subscription
//! contracts"), grounded in `src/vault/execution.rs::sign_request`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign `timestamp + method + path + body` with `secret`, base64-encoded. Must be
/// called immediately before the login/request frame is sent (spec §4.1: "Signatures
/// must be computed immediately before the login frame is sent").
pub fn sign(secret: &str, timestamp_ms: i64, method: &str, path: &str, body: &str) -> String {
    hmac_base64(secret, &format!("{timestamp_ms}{method}{path}{body}"))
}

/// Raw HMAC-SHA256 over an already-assembled message, base64-encoded. Venues whose
/// signing recipe doesn't match `timestamp + method + path + body` (e.g. Bybit's
/// `timestamp + api_key + recv_window + body`) assemble their own message and sign it
/// with this directly.
pub fn hmac_base64(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

//! HMAC-SHA256 signing of UDP datagrams
//!
//! The key is the session token handed out over TCP. The signed payload is
//! `type|peer_id|seq`, extended with `|dx_i|dy_i` when the sender includes
//! quantized direction components.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Scale used when quantizing a direction component for signing
pub const QUANTIZE_SCALE: f32 = 1000.0;

pub fn quantize(value: f32) -> i32 {
    (value * QUANTIZE_SCALE).round() as i32
}

pub fn dequantize(value: i32) -> f32 {
    value as f32 / QUANTIZE_SCALE
}

pub fn payload(kind: &str, peer_id: u32, seq: u64, quantized: Option<(i32, i32)>) -> String {
    match quantized {
        Some((dx, dy)) => format!("{}|{}|{}|{}|{}", kind, peer_id, seq, dx, dy),
        None => format!("{}|{}|{}", kind, peer_id, seq),
    }
}

/// Lowercase hex HMAC of `payload` keyed by `token`
pub fn sign(token: &str, payload: &str) -> String {
    // HMAC accepts keys of any length, so construction cannot fail
    match HmacSha256::new_from_slice(token.as_bytes()) {
        Ok(mut mac) => {
            mac.update(payload.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Verifies a hex HMAC in constant time. Hex case is ignored.
pub fn verify(token: &str, payload: &str, provided_hex: &str) -> bool {
    let provided = match hex::decode(provided_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    match HmacSha256::new_from_slice(token.as_bytes()) {
        Ok(mut mac) => {
            mac.update(payload.as_bytes());
            mac.verify_slice(&provided).is_ok()
        }
        Err(_) => false,
    }
}

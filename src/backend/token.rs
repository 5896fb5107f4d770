use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The JWT claims the dashboard cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Reads the payload of a JWT without verifying it. Only use on tokens the
/// backend has already accepted.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let payload = general_purpose::URL_SAFE_NO_PAD.decode(parts[1]).ok()?;
    serde_json::from_slice::<TokenClaims>(&payload).ok()
}

/// Builds an unsigned JWT-shaped token. The signature segment is random, so
/// tokens are unique but carry no cryptographic weight.
pub fn mint_unsigned(claims: &TokenClaims) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = serde_json::to_vec(claims).unwrap_or_default();
    let payload = general_purpose::URL_SAFE_NO_PAD.encode(payload);
    let signature = uuid::Uuid::new_v4().simple().to_string();
    format!("{}.{}.{}", header, payload, signature)
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::StrmProxyAuth;

type HmacSha256 = Hmac<Sha256>;

/// Canonicalizes params by sorting keys, then signs with HMAC-SHA256. Used
/// both to build an outgoing signed URL and to recompute the expected
/// signature when verifying one.
fn sign_params(params: &BTreeMap<String, String>, secret: &str) -> String {
    let canonical = canonical_query(params);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(canonical.as_bytes());
    format!("{:x}", mac.finalize().into_bytes())
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("STRM proxy auth misconfigured")]
    Misconfigured,
    #[error("invalid apikey")]
    InvalidApiKey,
    #[error("missing signature")]
    MissingSignature,
    #[error("invalid token expiry")]
    InvalidExpiry,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid signature")]
    InvalidSignature,
}

/// Validates a request's auth params against the configured mode. `none`
/// never fails; `apikey`/`token` without a configured secret is a server
/// misconfiguration (500), never a client-facing 401.
pub fn require_auth(
    mode: StrmProxyAuth,
    secret: Option<&str>,
    params: &BTreeMap<String, String>,
) -> Result<(), AuthError> {
    match mode {
        StrmProxyAuth::None => Ok(()),
        StrmProxyAuth::Apikey => {
            let secret = secret.ok_or(AuthError::Misconfigured)?;
            if params.get("apikey").map(String::as_str) != Some(secret) {
                return Err(AuthError::InvalidApiKey);
            }
            Ok(())
        }
        StrmProxyAuth::Token => {
            let secret = secret.ok_or(AuthError::Misconfigured)?;
            let sig = params.get("sig").ok_or(AuthError::MissingSignature)?;
            let mut payload = params.clone();
            payload.remove("sig");

            if let Some(exp_raw) = payload.get("exp") {
                let exp: i64 = exp_raw.parse().map_err(|_| AuthError::InvalidExpiry)?;
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as i64;
                if now > exp {
                    return Err(AuthError::TokenExpired);
                }
            }

            let mut expected_mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("valid key");
            expected_mac.update(canonical_query(&payload).as_bytes());
            let sig_bytes = decode_hex(sig).ok_or(AuthError::InvalidSignature)?;
            expected_mac
                .verify_slice(&sig_bytes)
                .map_err(|_| AuthError::InvalidSignature)?;
            Ok(())
        }
    }
}

/// Builds the extra query params an outgoing proxy URL needs for the
/// configured auth mode (empty for `none`, `{apikey}` for apikey mode,
/// `{sig, exp}` for token mode).
pub fn build_auth_params(
    mode: StrmProxyAuth,
    secret: Option<&str>,
    token_ttl_seconds: i64,
    params: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, AuthError> {
    match mode {
        StrmProxyAuth::None => Ok(BTreeMap::new()),
        StrmProxyAuth::Apikey => {
            let secret = secret.ok_or(AuthError::Misconfigured)?;
            let mut out = BTreeMap::new();
            out.insert("apikey".to_string(), secret.to_string());
            Ok(out)
        }
        StrmProxyAuth::Token => {
            let secret = secret.ok_or(AuthError::Misconfigured)?;
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;
            let exp = now + token_ttl_seconds;
            let mut payload = params.clone();
            payload.insert("exp".to_string(), exp.to_string());
            let sig = sign_params(&payload, secret);
            let mut out = BTreeMap::new();
            out.insert("sig".to_string(), sig);
            out.insert("exp".to_string(), exp.to_string());
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apikey_mode_accepts_matching_key() {
        let mut params = BTreeMap::new();
        params.insert("apikey".to_string(), "secret".to_string());
        require_auth(StrmProxyAuth::Apikey, Some("secret"), &params).unwrap();
    }

    #[test]
    fn apikey_mode_rejects_mismatch() {
        let mut params = BTreeMap::new();
        params.insert("apikey".to_string(), "wrong".to_string());
        let err = require_auth(StrmProxyAuth::Apikey, Some("secret"), &params).unwrap_err();
        assert!(matches!(err, AuthError::InvalidApiKey));
    }

    #[test]
    fn token_mode_round_trips_and_rejects_tamper() {
        let mut params = BTreeMap::new();
        params.insert("site".to_string(), "aniworld".to_string());
        params.insert("slug".to_string(), "my-show".to_string());

        let signed = build_auth_params(StrmProxyAuth::Token, Some("s3cr3t"), 300, &params).unwrap();
        let mut full = params.clone();
        full.extend(signed);

        require_auth(StrmProxyAuth::Token, Some("s3cr3t"), &full).unwrap();

        let mut tampered = full.clone();
        tampered.insert("slug".to_string(), "different-show".to_string());
        let err = require_auth(StrmProxyAuth::Token, Some("s3cr3t"), &tampered).unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[test]
    fn token_mode_without_secret_is_misconfigured() {
        let params = BTreeMap::new();
        let err = require_auth(StrmProxyAuth::Token, None, &params).unwrap_err();
        assert!(matches!(err, AuthError::Misconfigured));
    }
}

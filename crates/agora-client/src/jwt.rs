//! Unverified JWT payload inspection.
//!
//! Only the `exp` claim is read, and only to schedule refreshes. The
//! signature is never checked here: the server authorizes every request on
//! its own, so nothing decoded by this module may be used as an access
//! decision (role claims included).

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use thiserror::Error;

/// Why a token could not be inspected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JwtError {
    #[error("token does not have three dot-separated segments")]
    Segments,
    #[error("token segment is not valid base64url")]
    Encoding,
    #[error("token payload is not a JSON object")]
    Payload,
    #[error("token has no numeric exp claim")]
    MissingExp,
}

/// Decode the payload segment into a JSON object.
pub fn decode_payload(token: &str) -> Result<serde_json::Map<String, serde_json::Value>, JwtError> {
    let segments: Vec<&str> = token.split('.').collect();
    let [header, payload, signature] = segments.as_slice() else {
        return Err(JwtError::Segments);
    };
    if header.is_empty() || payload.is_empty() {
        return Err(JwtError::Segments);
    }
    if !signature
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'=')
    {
        return Err(JwtError::Encoding);
    }

    decode_segment(header)?;
    let bytes = decode_segment(payload)?;

    match serde_json::from_slice(&bytes) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        _ => Err(JwtError::Payload),
    }
}

/// Read the `exp` claim (seconds since the epoch).
///
/// Fractional values are truncated; strings, nulls and anything else
/// non-numeric are rejected.
pub fn expiry(token: &str) -> Result<i64, JwtError> {
    let claims = decode_payload(token)?;
    let exp = claims.get("exp").ok_or(JwtError::MissingExp)?;
    match exp {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .ok_or(JwtError::MissingExp),
        _ => Err(JwtError::MissingExp),
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, JwtError> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|_| JwtError::Encoding)
}

/// Build an unsigned token around the given claims. Test helper.
#[cfg(test)]
pub(crate) fn encode_unsigned(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.c2ln", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expiry_reads_numeric_exp() {
        let token = encode_unsigned(&json!({"sub": "42", "exp": 1_700_000_000}));
        assert_eq!(expiry(&token), Ok(1_700_000_000));

        let token = encode_unsigned(&json!({"exp": 1_700_000_000.75}));
        assert_eq!(expiry(&token), Ok(1_700_000_000));
    }

    #[test]
    fn test_missing_separator_is_rejected() {
        assert_eq!(expiry("no-dots-here"), Err(JwtError::Segments));
        assert_eq!(expiry("only.two"), Err(JwtError::Segments));
        assert_eq!(expiry("a.b.c.d"), Err(JwtError::Segments));
    }

    #[test]
    fn test_non_numeric_exp_is_rejected() {
        let token = encode_unsigned(&json!({"exp": "tomorrow"}));
        assert_eq!(expiry(&token), Err(JwtError::MissingExp));

        let token = encode_unsigned(&json!({"sub": "42"}));
        assert_eq!(expiry(&token), Err(JwtError::MissingExp));
    }

    #[test]
    fn test_garbage_segments_are_rejected() {
        assert_eq!(expiry("!!!.???.sig"), Err(JwtError::Encoding));

        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let payload = URL_SAFE_NO_PAD.encode(b"[1,2,3]");
        assert_eq!(
            expiry(&format!("{}.{}.sig", header, payload)),
            Err(JwtError::Payload)
        );
    }

    #[test]
    fn test_padded_segments_are_accepted() {
        let header = base64::engine::general_purpose::URL_SAFE.encode(b"{\"a\":1}");
        let payload = base64::engine::general_purpose::URL_SAFE.encode(b"{\"exp\":12}");
        assert_eq!(expiry(&format!("{}.{}.sig", header, payload)), Ok(12));
    }
}

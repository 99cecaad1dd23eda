//! Request signing for the authenticated-provider adapter (§4.1).
//!
//! The canonical pre-hash string is a pure function of
//! `{timestamp, method, path_with_prefix, query_or_body}` — HMAC-SHA256 over
//! it with the secret key, base64-encoded. Clients that build the canonical
//! string differently from the server cannot authenticate, so every piece of
//! this module is deliberately boring and literal.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// ISO-8601 timestamp truncated to milliseconds, trailing `Z`, e.g.
/// `2026-07-28T10:00:00.123Z`.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `timestamp + METHOD + pathWithPrefix + (queryStringOrJsonBody)`.
/// `method` is upper-cased by the caller's convention (`"GET"`, `"POST"`).
pub fn canonical_prehash(timestamp: &str, method: &str, path_with_prefix: &str, body_or_query: &str) -> String {
    format!("{timestamp}{method}{path_with_prefix}{body_or_query}")
}

/// HMAC-SHA256(secret, prehash), base64-encoded.
pub fn sign(secret: &str, prehash: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(prehash.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Deterministically serializes `params` as `key=value&key=value...`,
/// sorted by key, with `None`/absent values omitted before signing — the
/// query-string half of the pre-hash contract.
pub fn canonical_query_string(params: &[(&str, Option<&str>)]) -> String {
    let mut present: Vec<(&str, &str)> = params
        .iter()
        .filter_map(|(k, v)| v.map(|v| (*k, v)))
        .collect();
    present.sort_by_key(|(k, _)| *k);
    present
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_prehash_concatenates_in_documented_order() {
        let prehash = canonical_prehash("2026-07-28T10:00:00.000Z", "GET", "/api/v5/swap/quote", "?amount=1");
        assert_eq!(prehash, "2026-07-28T10:00:00.000ZGET/api/v5/swap/quote?amount=1");
    }

    #[test]
    fn signing_is_a_pure_function_of_its_inputs() {
        let prehash = canonical_prehash("t", "GET", "/p", "");
        let a = sign("secret", &prehash);
        let b = sign("secret", &prehash);
        assert_eq!(a, b, "same inputs must reproduce the same signature byte-for-byte");
    }

    #[test]
    fn signing_differs_when_secret_differs() {
        let prehash = canonical_prehash("t", "GET", "/p", "");
        assert_ne!(sign("secret-a", &prehash), sign("secret-b", &prehash));
    }

    #[test]
    fn signing_differs_when_prehash_differs() {
        let a = canonical_prehash("t1", "GET", "/p", "");
        let b = canonical_prehash("t2", "GET", "/p", "");
        assert_ne!(sign("secret", &a), sign("secret", &b));
    }

    #[test]
    fn query_string_is_sorted_and_omits_absent_values() {
        let qs = canonical_query_string(&[
            ("slippageBps", Some("50")),
            ("amount", Some("1000")),
            ("userPublicKey", None),
            ("outputMint", Some("USDC")),
        ]);
        assert_eq!(qs, "amount=1000&outputMint=USDC&slippageBps=50");
    }

    #[test]
    fn timestamp_has_millisecond_precision_and_trailing_z() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('.'), "must be millisecond-truncated, not second-only");
    }
}

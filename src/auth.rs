//! HTTP-style Basic and Digest authentication for RTSP (RFC 2617 / RFC 7616,
//! referenced by RFC 2326 §11.3.6 via the `WWW-Authenticate`/`Authorization`
//! headers).
//!
//! The teacher crate had no auth at all. Digest math is grounded on the
//! construction in `binbat-live777`'s RTSP client (challenge parsing,
//! response-hash composition) but implemented here with the real `md-5`
//! and `sha2` crates from crates.io rather than the pack's git-pinned
//! `digest_auth` fork, per the dependency-reproducibility rule.

use base64::Engine;
use md5::{Digest, Md5};
use sha2::Sha256;

use crate::error::{Result, RtspError};

/// Credentials supplied by the caller (client side) or configured for a
/// realm (server side).
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Hash algorithm negotiated via the `algorithm` challenge parameter
/// (RFC 7616 §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl Algorithm {
    fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "MD5-SESS" => Algorithm::Md5Sess,
            "SHA-256" => Algorithm::Sha256,
            "SHA-256-SESS" => Algorithm::Sha256Sess,
            _ => Algorithm::Md5,
        }
    }

    fn is_sess(self) -> bool {
        matches!(self, Algorithm::Md5Sess | Algorithm::Sha256Sess)
    }

    fn hash(self, input: &str) -> String {
        match self {
            Algorithm::Md5 | Algorithm::Md5Sess => {
                let mut hasher = Md5::new();
                hasher.update(input.as_bytes());
                hex::encode(hasher.finalize())
            }
            Algorithm::Sha256 | Algorithm::Sha256Sess => {
                let mut hasher = Sha256::new();
                hasher.update(input.as_bytes());
                hex::encode(hasher.finalize())
            }
        }
    }
}

/// A parsed `WWW-Authenticate` challenge (one of possibly several on the
/// same 401 response — spec §4.9 requires picking the strongest).
#[derive(Debug, Clone)]
pub enum Challenge {
    Basic {
        realm: String,
    },
    Digest {
        realm: String,
        nonce: String,
        opaque: Option<String>,
        qop: Option<String>,
        algorithm: Algorithm,
        stale: bool,
    },
}

impl Challenge {
    /// Strength ordering for picking among multiple challenges on one 401:
    /// SHA-256 > MD5 > Basic.
    fn strength(&self) -> u8 {
        match self {
            Challenge::Basic { .. } => 0,
            Challenge::Digest { algorithm, .. } => match algorithm {
                Algorithm::Md5 | Algorithm::Md5Sess => 1,
                Algorithm::Sha256 | Algorithm::Sha256Sess => 2,
            },
        }
    }

    pub fn parse(header_value: &str) -> Option<Self> {
        let (scheme, rest) = header_value.split_once(' ')?;
        let params = parse_params(rest);
        match scheme {
            "Basic" => Some(Challenge::Basic {
                realm: params.get("realm").cloned().unwrap_or_default(),
            }),
            "Digest" => Some(Challenge::Digest {
                realm: params.get("realm").cloned().unwrap_or_default(),
                nonce: params.get("nonce").cloned().unwrap_or_default(),
                opaque: params.get("opaque").cloned(),
                qop: params.get("qop").cloned(),
                algorithm: params
                    .get("algorithm")
                    .map(|a| Algorithm::parse(a))
                    .unwrap_or(Algorithm::Md5),
                stale: params
                    .get("stale")
                    .map(|s| s.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            }),
            _ => None,
        }
    }

    /// Parse all `WWW-Authenticate` challenges on a response and return the
    /// strongest, per spec §4.9.
    pub fn strongest(values: impl Iterator<Item = impl AsRef<str>>) -> Option<Self> {
        values
            .filter_map(|v| Challenge::parse(v.as_ref()))
            .max_by_key(|c| c.strength())
    }
}

fn parse_params(s: &str) -> std::collections::HashMap<String, String> {
    let mut out = std::collections::HashMap::new();
    for part in s.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"');
            out.insert(key.trim().to_string(), value.to_string());
        }
    }
    out
}

/// Build the `Authorization` header value for a request, given the
/// challenge the server issued and a fresh client nonce count.
///
/// `nc` is the hex nonce-count required by `qop=auth` (RFC 2617 §3.2.2);
/// callers must increment it per request reusing the same challenge.
pub fn authorize(
    challenge: &Challenge,
    creds: &Credentials,
    method: &str,
    uri: &str,
    nc: u32,
    cnonce: &str,
) -> String {
    match challenge {
        Challenge::Basic { .. } => {
            let raw = format!("{}:{}", creds.username, creds.password);
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(raw)
            )
        }
        Challenge::Digest {
            realm,
            nonce,
            opaque,
            qop,
            algorithm,
            ..
        } => {
            let ha1_base = format!("{}:{}:{}", creds.username, realm, creds.password);
            let ha1 = if algorithm.is_sess() {
                let base_hash = algorithm.hash(&ha1_base);
                algorithm.hash(&format!("{base_hash}:{nonce}:{cnonce}"))
            } else {
                algorithm.hash(&ha1_base)
            };
            let ha2 = algorithm.hash(&format!("{method}:{uri}"));

            let nc_str = format!("{nc:08x}");
            let response = if qop.is_some() {
                algorithm.hash(&format!(
                    "{ha1}:{nonce}:{nc_str}:{cnonce}:auth:{ha2}"
                ))
            } else {
                algorithm.hash(&format!("{ha1}:{nonce}:{ha2}"))
            };

            let mut out = format!(
                "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
                creds.username, realm, nonce, uri, response
            );
            if let Some(opaque) = opaque {
                out.push_str(&format!(", opaque=\"{opaque}\""));
            }
            if qop.is_some() {
                out.push_str(&format!(", qop=auth, nc={nc_str}, cnonce=\"{cnonce}\""));
            }
            out
        }
    }
}

/// Client-side retry policy (spec §8: retry once against a fresh nonce on
/// `stale=true`, otherwise surface [`RtspError::AuthFailed`]).
pub fn should_retry_stale(challenge: &Challenge) -> bool {
    matches!(challenge, Challenge::Digest { stale: true, .. })
}

/// A parsed client `Authorization: Digest ...` request header (RFC 2617
/// §3.2.2), as opposed to [`Challenge`] which models the server's
/// `WWW-Authenticate`.
#[derive(Debug, Clone)]
pub struct DigestAuthorization {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub nc: u32,
    pub cnonce: String,
}

impl DigestAuthorization {
    pub fn parse(header_value: &str) -> Option<Self> {
        let rest = header_value.strip_prefix("Digest ")?;
        let params = parse_params(rest);
        Some(DigestAuthorization {
            username: params.get("username")?.clone(),
            realm: params.get("realm")?.clone(),
            nonce: params.get("nonce")?.clone(),
            uri: params.get("uri")?.clone(),
            response: params.get("response")?.clone(),
            nc: params
                .get("nc")
                .and_then(|v| u32::from_str_radix(v, 16).ok())
                .unwrap_or(1),
            cnonce: params.get("cnonce").cloned().unwrap_or_default(),
        })
    }
}

/// Server-side credential check against a plain Basic/Digest verifier.
/// Only used by embedders that want this core to own auth rather than
/// verifying externally (spec §6 `AuthVerifier` hook).
pub fn verify_digest_response(
    challenge: &Challenge,
    creds: &Credentials,
    method: &str,
    uri: &str,
    nc: u32,
    cnonce: &str,
    provided_response: &str,
) -> Result<()> {
    let expected = authorize(challenge, creds, method, uri, nc, cnonce);
    let expected_response = expected
        .split("response=\"")
        .nth(1)
        .and_then(|s| s.split('"').next())
        .unwrap_or_default();
    if expected_response == provided_response {
        Ok(())
    } else {
        Err(RtspError::AuthFailed("digest response mismatch".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_digest_challenge() {
        let header = r#"Digest realm="cam", nonce="abc123", qop="auth", algorithm=MD5"#;
        let challenge = Challenge::parse(header).unwrap();
        match challenge {
            Challenge::Digest { realm, nonce, qop, .. } => {
                assert_eq!(realm, "cam");
                assert_eq!(nonce, "abc123");
                assert_eq!(qop.as_deref(), Some("auth"));
            }
            _ => panic!("expected digest"),
        }
    }

    #[test]
    fn picks_strongest_of_multiple_challenges() {
        let values = vec![
            r#"Basic realm="cam""#.to_string(),
            r#"Digest realm="cam", nonce="n", algorithm=SHA-256"#.to_string(),
        ];
        let chosen = Challenge::strongest(values.iter()).unwrap();
        matches!(chosen, Challenge::Digest { algorithm: Algorithm::Sha256, .. });
    }

    #[test]
    fn digest_response_round_trips_through_verify() {
        let challenge = Challenge::Digest {
            realm: "cam".to_string(),
            nonce: "n123".to_string(),
            opaque: None,
            qop: Some("auth".to_string()),
            algorithm: Algorithm::Md5,
            stale: false,
        };
        let creds = Credentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let header = authorize(&challenge, &creds, "DESCRIBE", "rtsp://cam/stream", 1, "cn1");
        let response = header
            .split("response=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .unwrap();
        assert!(verify_digest_response(
            &challenge,
            &creds,
            "DESCRIBE",
            "rtsp://cam/stream",
            1,
            "cn1",
            response
        )
        .is_ok());
    }

    #[test]
    fn stale_challenge_triggers_retry() {
        let challenge = Challenge::Digest {
            realm: "cam".to_string(),
            nonce: "n".to_string(),
            opaque: None,
            qop: None,
            algorithm: Algorithm::Md5,
            stale: true,
        };
        assert!(should_retry_stale(&challenge));
    }

    #[test]
    fn authorization_header_round_trips() {
        let challenge = Challenge::Digest {
            realm: "cam".to_string(),
            nonce: "n123".to_string(),
            opaque: None,
            qop: Some("auth".to_string()),
            algorithm: Algorithm::Md5,
            stale: false,
        };
        let creds = Credentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let header = authorize(&challenge, &creds, "DESCRIBE", "rtsp://cam/stream", 1, "cn1");
        let parsed = DigestAuthorization::parse(&header).unwrap();
        assert_eq!(parsed.username, "admin");
        assert_eq!(parsed.nonce, "n123");
    }

    #[test]
    fn basic_header_is_base64_of_user_colon_pass() {
        let challenge = Challenge::Basic {
            realm: "cam".to_string(),
        };
        let creds = Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
        };
        let header = authorize(&challenge, &creds, "DESCRIBE", "rtsp://cam/stream", 0, "");
        assert_eq!(header, "Basic dTpw");
    }
}

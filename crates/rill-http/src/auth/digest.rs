//! HTTP digest access authentication.

use std::collections::HashMap;

use md5::Md5;
use rill_core::{Error, Result};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Hash algorithm named by a digest challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString)]
pub enum DigestAlgorithm {
    #[strum(serialize = "MD5")]
    Md5,
    #[strum(serialize = "MD5-sess")]
    Md5Sess,
    #[strum(serialize = "SHA-256")]
    Sha256,
    #[strum(serialize = "SHA-256-sess")]
    Sha256Sess,
}

impl DigestAlgorithm {
    fn hash(self, input: &str) -> String {
        match self {
            Self::Md5 | Self::Md5Sess => hex::encode(Md5::digest(input.as_bytes())),
            Self::Sha256 | Self::Sha256Sess => hex::encode(Sha256::digest(input.as_bytes())),
        }
    }

    fn is_session(self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// Whether the server offered `qop=auth`.
    pub qop_auth: bool,
}

impl DigestChallenge {
    /// Parses a challenge header value.
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let params = header
            .get(..6)
            .filter(|scheme| scheme.eq_ignore_ascii_case("digest"))
            .map(|_| parse_params(&header[6..]))
            .ok_or_else(|| {
                Error::authentication().with_message(format!("Expected a Digest challenge, got: {header}"))
            })?;

        let field = |name: &str| params.get(name).cloned();
        let algorithm = match field("algorithm") {
            None => DigestAlgorithm::Md5,
            Some(name) => name.parse().map_err(|_| {
                Error::unsupported_auth().with_message(format!("Unsupported digest algorithm: {name}"))
            })?,
        };
        let qop_auth = match field("qop") {
            None => false,
            Some(qop) if qop.split(',').any(|option| option.trim() == "auth") => true,
            Some(qop) => {
                return Err(Error::unsupported_auth().with_message(format!("Unsupported digest qop: {qop}")));
            }
        };

        Ok(Self {
            realm: field("realm").unwrap_or_default(),
            nonce: field("nonce")
                .ok_or_else(|| Error::authentication().with_message("Digest challenge is missing a nonce"))?,
            opaque: field("opaque"),
            algorithm,
            qop_auth,
        })
    }
}

/// Splits `key=value, key="quoted, value"` pairs.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remaining) = match after.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            },
            None => match after.find(',') {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            },
        };
        params.insert(key, value.trim().to_owned());
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    params
}

/// Digest credentials plus the last challenge seen.
#[derive(Debug, Clone)]
pub struct DigestAuth {
    username: String,
    password: String,
    challenge: Option<DigestChallenge>,
    nonce_count: u32,
}

impl DigestAuth {
    pub fn new(username: String, password: String) -> Self {
        Self {
            username,
            password,
            challenge: None,
            nonce_count: 0,
        }
    }

    pub fn has_challenge(&self) -> bool {
        self.challenge.is_some()
    }

    /// Stores a new challenge, resetting the nonce count.
    pub fn accept(&mut self, challenge: DigestChallenge) {
        self.challenge = Some(challenge);
        self.nonce_count = 0;
    }

    /// Computes the `Authorization` header for the next request.
    pub fn authorization(&mut self, method: &str, uri: &str) -> Option<String> {
        let cnonce = Uuid::new_v4().simple().to_string()[..16].to_owned();
        self.nonce_count += 1;
        let nonce_count = self.nonce_count;
        let challenge = self.challenge.as_ref()?;
        Some(self.header(challenge, method, uri, nonce_count, &cnonce))
    }

    fn header(&self, challenge: &DigestChallenge, method: &str, uri: &str, nc: u32, cnonce: &str) -> String {
        let algorithm = challenge.algorithm;
        let nc = format!("{nc:08x}");

        let mut ha1 = algorithm.hash(&format!("{}:{}:{}", self.username, challenge.realm, self.password));
        if algorithm.is_session() {
            ha1 = algorithm.hash(&format!("{ha1}:{}:{cnonce}", challenge.nonce));
        }
        let ha2 = algorithm.hash(&format!("{method}:{uri}"));
        let response = if challenge.qop_auth {
            algorithm.hash(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", challenge.nonce))
        } else {
            algorithm.hash(&format!("{ha1}:{}:{ha2}", challenge.nonce))
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", algorithm={algorithm}, response=\"{response}\"",
            self.username, challenge.realm, challenge.nonce
        );
        if challenge.qop_auth {
            header.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{cnonce}\""));
        }
        if let Some(opaque) = &challenge.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        header
    }
}

#[cfg(test)]
mod tests {
    use rill_core::ErrorKind;

    use super::*;

    const CHALLENGE: &str = r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#;

    #[test]
    fn test_parse_challenge() {
        let challenge = DigestChallenge::parse(CHALLENGE).unwrap();
        assert_eq!(challenge.realm, "testrealm@host.com");
        assert_eq!(challenge.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(challenge.opaque.as_deref(), Some("5ccc069c403ebaf9f0171e9517f40e41"));
        assert_eq!(challenge.algorithm, DigestAlgorithm::Md5);
        assert!(challenge.qop_auth);
    }

    #[test]
    fn test_known_response() {
        let auth = DigestAuth::new("Mufasa".into(), "Circle Of Life".into());
        let challenge = DigestChallenge::parse(CHALLENGE).unwrap();
        let header = auth.header(&challenge, "GET", "/dir/index.html", 1, "0a4f113b");
        assert!(header.contains("response=\"6629fae49393a05397450978507c4ef1\""), "{header}");
        assert!(header.contains("nc=00000001"));
        assert!(header.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
    }

    #[test]
    fn test_nonce_count_increments() {
        let mut auth = DigestAuth::new("u".into(), "p".into());
        assert!(auth.authorization("GET", "/").is_none());
        auth.accept(DigestChallenge::parse(CHALLENGE).unwrap());
        assert!(auth.authorization("GET", "/").unwrap().contains("nc=00000001"));
        assert!(auth.authorization("GET", "/").unwrap().contains("nc=00000002"));
    }

    #[test]
    fn test_unsupported_challenges() {
        let err = DigestChallenge::parse(r#"Digest realm="r", nonce="n", algorithm=SHA-512"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAuth);
        let err = DigestChallenge::parse(r#"Digest realm="r", nonce="n", qop="auth-int""#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAuth);
        let err = DigestChallenge::parse(r#"Basic realm="r""#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn test_sha256() {
        let challenge = DigestChallenge::parse(r#"Digest realm="r", nonce="n", algorithm=SHA-256, qop=auth"#).unwrap();
        assert_eq!(challenge.algorithm, DigestAlgorithm::Sha256);
        let header = DigestAuth::new("u".into(), "p".into()).header(&challenge, "GET", "/", 1, "c");
        assert!(header.contains("algorithm=SHA-256"));
        let response = header.split("response=\"").nth(1).unwrap();
        assert_eq!(response.find('"'), Some(64));
    }
}

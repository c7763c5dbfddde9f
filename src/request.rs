//! HTTP request helper shared by the http plugin
//!
//! Wraps a `reqwest::Client` with per-helper authentication. Non-success
//! responses become errors; bodies carrying a well-known device token are
//! mapped to the matching sentinel error.

use crate::error::{HestiaError, Result};
use crate::logging::StructuredLogger;
use md5::Md5;
use rand::Rng;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Authentication settings as configured
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: String,
    pub password: String,
    pub token: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Auth {
    #[default]
    None,
    Basic {
        user: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    Digest {
        user: String,
        password: String,
    },
}

impl AuthSettings {
    pub fn auth(&self) -> Result<Auth> {
        let auth = match self.kind.to_lowercase().as_str() {
            "" => Auth::None,
            "basic" => Auth::Basic {
                user: self.user.clone(),
                password: self.password.clone(),
            },
            "bearer" => {
                let token = if self.token.is_empty() {
                    &self.password
                } else {
                    &self.token
                };
                if token.is_empty() {
                    return Err(HestiaError::config("bearer auth requires token"));
                }
                Auth::Bearer {
                    token: token.clone(),
                }
            }
            "digest" => Auth::Digest {
                user: self.user.clone(),
                password: self.password.clone(),
            },
            other => {
                return Err(HestiaError::config(format!("unknown auth type: {}", other)));
            }
        };
        Ok(auth)
    }
}

/// Digest challenge parsed from `WWW-Authenticate`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub qop: Option<String>,
    pub algorithm: String,
}

impl Challenge {
    pub fn parse(header: &str) -> Option<Self> {
        let rest = header.trim();
        let rest = rest
            .get(..6)
            .filter(|p| p.eq_ignore_ascii_case("digest"))
            .map(|_| &rest[6..])?;

        let mut params = BTreeMap::new();
        let mut chars = rest.trim().chars().peekable();
        loop {
            while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
                chars.next();
            }
            let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
            if key.is_empty() {
                break;
            }
            let value = if chars.peek() == Some(&'"') {
                chars.next();
                let mut v = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => v.extend(chars.next()),
                        '"' => break,
                        c => v.push(c),
                    }
                }
                v
            } else {
                chars.by_ref().take_while(|c| *c != ',').collect()
            };
            params.insert(key.trim().to_lowercase(), value.trim().to_string());
        }

        // prefer plain auth when several qop options are offered
        let qop = params.get("qop").map(|q| {
            q.split(',')
                .map(str::trim)
                .find(|q| *q == "auth")
                .unwrap_or_else(|| q.split(',').next().unwrap_or("auth").trim())
                .to_string()
        });

        Some(Challenge {
            realm: params.get("realm").cloned().unwrap_or_default(),
            nonce: params.get("nonce").cloned()?,
            opaque: params.get("opaque").cloned(),
            qop,
            algorithm: params
                .get("algorithm")
                .cloned()
                .unwrap_or_else(|| "MD5".to_string()),
        })
    }

    fn hash(&self, data: &str) -> Result<String> {
        match self.algorithm.to_uppercase().as_str() {
            "MD5" => Ok(hex::encode(Md5::digest(data.as_bytes()))),
            "SHA-256" => Ok(hex::encode(Sha256::digest(data.as_bytes()))),
            other => Err(HestiaError::config(format!(
                "unsupported digest algorithm: {}",
                other
            ))),
        }
    }

    /// Authorization header value for one request
    pub fn authorization(
        &self,
        user: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
    ) -> Result<String> {
        let ha1 = self.hash(&format!("{}:{}:{}", user, self.realm, password))?;
        let ha2 = self.hash(&format!("{}:{}", method, uri))?;
        let nc = "00000001";

        let response = match &self.qop {
            Some(qop) => self.hash(&format!(
                "{}:{}:{}:{}:{}:{}",
                ha1, self.nonce, nc, cnonce, qop, ha2
            ))?,
            None => self.hash(&format!("{}:{}:{}", ha1, self.nonce, ha2))?,
        };

        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", algorithm={}, response="{}""#,
            user, self.realm, self.nonce, uri, self.algorithm, response
        );
        if let Some(qop) = &self.qop {
            header.push_str(&format!(r#", qop={}, nc={}, cnonce="{}""#, qop, nc, cnonce));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{}""#, opaque));
        }
        Ok(header)
    }
}

/// HTTP client with authentication and error mapping
#[derive(Debug, Clone)]
pub struct Helper {
    client: reqwest::Client,
    auth: Auth,
    logger: StructuredLogger,
}

impl Helper {
    pub fn new(
        timeout: Duration,
        insecure: bool,
        auth: Auth,
        logger: StructuredLogger,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .user_agent(concat!("hestia/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            auth,
            logger,
        })
    }

    fn build(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method.clone(), url)
            .headers(headers.clone());
        if let Some(body) = body {
            req = req.body(body.to_string());
        }
        match &self.auth {
            Auth::Basic { user, password } => req.basic_auth(user, Some(password)),
            Auth::Bearer { token } => req.bearer_auth(token),
            Auth::None | Auth::Digest { .. } => req,
        }
    }

    /// Execute a request and return the response body
    pub async fn do_body(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&str>,
    ) -> Result<Vec<u8>> {
        self.logger.trace(&format!("{} {}", method, url));
        let mut resp = self.build(method, url, headers, body).send().await?;

        if let Auth::Digest { user, password } = &self.auth
            && resp.status() == StatusCode::UNAUTHORIZED
        {
            let challenge = resp
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|h| h.to_str().ok())
                .and_then(Challenge::parse);
            if let Some(challenge) = challenge {
                let uri = reqwest::Url::parse(url)
                    .map(|u| match u.query() {
                        Some(q) => format!("{}?{}", u.path(), q),
                        None => u.path().to_string(),
                    })
                    .map_err(|e| HestiaError::config(format!("invalid uri: {}", e)))?;
                let cnonce = format!("{:016x}", rand::thread_rng().r#gen::<u64>());
                let header =
                    challenge.authorization(user, password, method.as_str(), &uri, &cnonce)?;
                resp = self
                    .build(method, url, headers, body)
                    .header(AUTHORIZATION, header)
                    .send()
                    .await?;
            }
        }

        let status = resp.status();
        let bytes = resp.bytes().await?.to_vec();

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            if let Some(err) = HestiaError::from_known(&text) {
                return Err(err);
            }
            let message = if text.is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                text
            };
            return Err(HestiaError::http(status.as_u16(), message));
        }

        Ok(bytes)
    }

    pub async fn get_body(&self, url: &str) -> Result<Vec<u8>> {
        self.do_body(&Method::GET, url, &HeaderMap::new(), None)
            .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_body(url).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Convert configured headers into a header map
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|_| HestiaError::config(format!("invalid header name: {}", k)))?;
        let value = HeaderValue::from_str(v)
            .map_err(|_| HestiaError::config(format!("invalid header value: {}", k)))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_settings() {
        let s = AuthSettings {
            kind: "Basic".into(),
            user: "u".into(),
            password: "p".into(),
            ..Default::default()
        };
        assert!(matches!(s.auth().unwrap(), Auth::Basic { .. }));

        let s = AuthSettings {
            kind: "bearer".into(),
            ..Default::default()
        };
        assert!(s.auth().is_err());

        let s = AuthSettings {
            kind: "oauth".into(),
            ..Default::default()
        };
        assert!(s.auth().is_err());
        assert_eq!(AuthSettings::default().auth().unwrap(), Auth::None);
    }

    #[test]
    fn test_parse_challenge() {
        let c = Challenge::parse(
            r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap();
        assert_eq!(c.realm, "testrealm@host.com");
        assert_eq!(c.qop.as_deref(), Some("auth"));
        assert_eq!(c.algorithm, "MD5");
        assert_eq!(c.opaque.as_deref(), Some("5ccc069c403ebaf9f0171e9517f40e41"));

        assert!(Challenge::parse("Basic realm=\"x\"").is_none());
    }

    #[test]
    fn test_digest_response_rfc2617() {
        let c = Challenge::parse(
            r#"Digest realm="testrealm@host.com", qop="auth", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap();
        let header = c
            .authorization("Mufasa", "Circle Of Life", "GET", "/dir/index.html", "0a4f113b")
            .unwrap();
        assert!(header.contains(r#"response="6629fae49393a05397450978507c4ef1""#));
        assert!(header.contains("nc=00000001"));
    }

    #[test]
    fn test_header_map() {
        let mut h = BTreeMap::new();
        h.insert("content-type".to_string(), "application/json".to_string());
        assert_eq!(header_map(&h).unwrap().len(), 1);

        h.insert("bad header".to_string(), "x".to_string());
        assert!(header_map(&h).is_err());
    }
}

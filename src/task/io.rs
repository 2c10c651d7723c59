//! Request and response payload buffers handed to handler stages.

use std::collections::HashMap;

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// A payload could not be (de)serialized.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error("output serialization failed: {0}")]
    Serialize(String),
}

/// What a stage reads: the original request or the previous stage's output.
#[derive(Debug, Clone, Default)]
pub struct Input {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Input {
    pub fn from_body(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Decode the body as JSON into `T`.
    pub fn get<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        serde_json::from_slice(&self.body).map_err(|e| PayloadError::Malformed(e.to_string()))
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Addressing used when the upstream call must go out as a multicast
/// envelope instead of a raw body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multicast {
    pub sender_address: String,
    pub receiver_addresses: Vec<String>,
    pub callback_uri: String,
}

/// What a stage writes: the response body, plus the upstream addressing that
/// applies when the worker returns `Forward`.
#[derive(Debug, Clone, Default)]
pub struct Output {
    pub body: Vec<u8>,
    pub headers: HeaderMap,
    /// Overrides the status code derived from the pipeline result.
    pub status: Option<StatusCode>,

    pub proto: String,
    pub host: String,
    pub port: String,
    pub path: String,
    /// Base URI, or `$name` to look up in the substitution table.
    pub uri: String,

    pub multicast: Option<Multicast>,
}

impl Output {
    /// Serialize `value` as the JSON body.
    pub fn load<T: Serialize>(&mut self, value: &T) -> Result<(), PayloadError> {
        self.body = serde_json::to_vec(value).map_err(|e| PayloadError::Serialize(e.to_string()))?;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(())
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Route the next upstream call through the multicast envelope.
    pub fn set_multicast(
        &mut self,
        sender_address: impl Into<String>,
        receiver_addresses: Vec<String>,
        callback_uri: impl Into<String>,
    ) {
        self.multicast = Some(Multicast {
            sender_address: sender_address.into(),
            receiver_addresses,
            callback_uri: callback_uri.into(),
        });
    }

    /// Build the upstream URI.
    ///
    /// The base is `uri` (after `$name` substitution) or `default_uri`. Any of
    /// `proto`, `host`, `port` and `path` set on this output replaces the
    /// matching part of the base.
    pub fn make_uri(&self, default_uri: &str, substitutions: &HashMap<String, String>) -> String {
        let base_src = match self.uri.strip_prefix('$') {
            Some(name) => match substitutions.get(name) {
                Some(s) => s.as_str(),
                None => {
                    tracing::warn!(name, "unknown uri substitution, using default");
                    default_uri
                }
            },
            None if self.uri.is_empty() => default_uri,
            None => self.uri.as_str(),
        };
        let base = UriParts::split(base_src);

        let scheme = pick(&self.proto, &base.scheme);
        let host = pick(&self.host, &base.host);
        let port = pick(&self.port, &base.port);
        let path = if self.path.is_empty() {
            base.path
        } else if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        let mut out = String::new();
        if !scheme.is_empty() {
            out.push_str(scheme);
            out.push_str("://");
        }
        out.push_str(host);
        if !port.is_empty() {
            out.push(':');
            out.push_str(port);
        }
        out.push_str(&path);
        out
    }
}

fn pick<'a>(own: &'a str, base: &'a str) -> &'a str {
    if own.is_empty() {
        base
    } else {
        own
    }
}

#[derive(Debug, Default)]
struct UriParts {
    scheme: String,
    host: String,
    port: String,
    path: String,
}

impl UriParts {
    /// Split `[scheme://]host[:port][/path][?query]`. Without a scheme the
    /// leading segment counts as a host only if it contains '.' or ':' or is
    /// "localhost"; otherwise the whole string is a path.
    fn split(s: &str) -> Self {
        let (scheme, rest) = match s.find("://") {
            Some(i) => (&s[..i], &s[i + 3..]),
            None => ("", s),
        };
        let auth_end = rest.find(['/', '?']).unwrap_or(rest.len());
        let authority = &rest[..auth_end];
        let tail = &rest[auth_end..];

        let is_host = !scheme.is_empty()
            || authority.contains('.')
            || authority.contains(':')
            || authority == "localhost";

        if authority.is_empty() || !is_host {
            let path = if rest.is_empty() || rest.starts_with('/') {
                rest.to_string()
            } else {
                format!("/{}", rest)
            };
            return Self {
                scheme: scheme.to_string(),
                path,
                ..Self::default()
            };
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => (h, p),
            None => (authority, ""),
        };
        Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port: port.to_string(),
            path: tail.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, serde::Deserialize, Debug, PartialEq)]
    struct Sstr {
        s: String,
    }

    #[test]
    fn input_decodes_and_output_encodes_json() {
        let input = Input::from_body(r#"{"s":"0"}"#);
        let mut v: Sstr = input.get().unwrap();
        v.s.push('1');

        let mut out = Output::default();
        out.load(&v).unwrap();
        assert_eq!(out.body, br#"{"s":"01"}"#.to_vec());
        assert_eq!(out.headers[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn malformed_input_is_reported() {
        let input = Input::from_body("{not json");
        assert!(matches!(input.get::<Sstr>(), Err(PayloadError::Malformed(_))));
    }

    #[test]
    fn default_uri_is_used_unchanged() {
        let out = Output::default();
        let subs = HashMap::new();
        assert_eq!(
            out.make_uri("http://123.123.123.123:1234", &subs),
            "http://123.123.123.123:1234"
        );
    }

    #[test]
    fn substituted_host_takes_proto_and_port() {
        let mut subs = HashMap::new();
        subs.insert("my_ip".to_string(), "1.2.3.4".to_string());
        let out = Output {
            proto: "https".into(),
            port: "4321".into(),
            uri: "$my_ip".into(),
            ..Output::default()
        };
        assert_eq!(out.make_uri("", &subs), "https://1.2.3.4:4321");
    }

    #[test]
    fn substituted_full_uri_keeps_path_and_query() {
        let mut subs = HashMap::new();
        subs.insert(
            "my_path".to_string(),
            "http://site.com:1234/endpoint?q=1&n=2".to_string(),
        );
        let out = Output {
            proto: "https".into(),
            port: "4321".into(),
            uri: "$my_path".into(),
            ..Output::default()
        };
        assert_eq!(out.make_uri("", &subs), "https://site.com:4321/endpoint?q=1&n=2");
    }

    #[test]
    fn substituted_bare_path_gets_output_host() {
        let mut subs = HashMap::new();
        subs.insert("my_path".to_string(), "endpoint?q=1&n=2".to_string());
        let out = Output {
            proto: "https".into(),
            host: "mysite.com".into(),
            port: "4321".into(),
            uri: "$my_path".into(),
            ..Output::default()
        };
        assert_eq!(out.make_uri("", &subs), "https://mysite.com:4321/endpoint?q=1&n=2");
    }

    #[test]
    fn path_overrides_default_and_explicit_uri() {
        let subs = HashMap::new();
        let mut out = Output {
            path: "json_rpc".into(),
            ..Output::default()
        };
        assert_eq!(out.make_uri("localhost:28881", &subs), "localhost:28881/json_rpc");

        out.path = "/json_rpc".into();
        out.proto = "https".into();
        assert_eq!(out.make_uri("localhost:28881", &subs), "https://localhost:28881/json_rpc");

        out.uri = "http://aaa.bbb:12345/something".into();
        assert_eq!(out.make_uri("localhost:28881", &subs), "https://aaa.bbb:12345/json_rpc");
    }
}

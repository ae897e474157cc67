use crate::error::AttackError;
use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// A single request to issue. Validated on construction and never mutated
/// afterwards, so it can be shared across dispatch tasks behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    method: Method,
    url: Url,
    headers: BTreeMap<String, String>,
    body: Bytes,
}

impl Target {
    pub fn new(method: &str, url: &str) -> Result<Self, AttackError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            AttackError::InvalidMethod {
                method: method.to_string(),
            }
        })?;
        let parsed = Url::parse(url).map_err(|source| AttackError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(AttackError::UnsupportedScheme {
                scheme: parsed.scheme().to_string(),
            });
        }

        Ok(Self {
            method,
            url: parsed,
            headers: BTreeMap::new(),
            body: Bytes::new(),
        })
    }

    /// Shorthand for a `GET` target.
    pub fn get(url: &str) -> Result<Self, AttackError> {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, AttackError> {
        if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err()
        {
            return Err(AttackError::InvalidHeader {
                name: name.to_string(),
            });
        }
        self.headers.insert(name.to_string(), value.to_string());
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Source of targets for an attack. Called once per tick, possibly from
/// several tasks at the same time.
pub trait Targeter: Send + Sync {
    fn next(&self) -> Arc<Target>;
}

/// Returns the same target on every call.
#[derive(Debug, Clone)]
pub struct StaticTargeter {
    target: Arc<Target>,
}

impl StaticTargeter {
    pub fn new(target: Target) -> Self {
        Self {
            target: Arc::new(target),
        }
    }
}

impl Targeter for StaticTargeter {
    fn next(&self) -> Arc<Target> {
        Arc::clone(&self.target)
    }
}

/// Cycles through a fixed list of targets.
#[derive(Debug)]
pub struct RoundRobinTargeter {
    targets: Vec<Arc<Target>>,
    cursor: AtomicUsize,
}

impl RoundRobinTargeter {
    pub fn new(targets: Vec<Target>) -> Result<Self, AttackError> {
        if targets.is_empty() {
            return Err(AttackError::ConfigValidation {
                message: "round-robin targeter needs at least one target".to_string(),
            });
        }
        Ok(Self {
            targets: targets.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
        })
    }
}

impl Targeter for RoundRobinTargeter {
    fn next(&self) -> Arc<Target> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        Arc::clone(&self.targets[idx % self.targets.len()])
    }
}

/// Any closure producing targets is a targeter.
impl<F> Targeter for F
where
    F: Fn() -> Arc<Target> + Send + Sync,
{
    fn next(&self) -> Arc<Target> {
        self()
    }
}

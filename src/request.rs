//! # Request Module
//!
//! The unit of work flowing through queues and workers.
//!
//! A `Request` names a target (usually a URL) and, optionally, the spider
//! callback that should handle it instead of the default one. Every request gets
//! a [`RequestId`] when it is constructed; equality and hashing look at that id
//! only, so two requests for the same target are still two different requests.
//! Deduplication is the spider's business, never the queue's.
//!
//! The id is serialized with the request, which keeps identity stable across a
//! stash/recover cycle.

use crate::error::SpiderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use ulid::Ulid;
use url::Url;

/// Identity of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(Ulid);

impl RequestId {
    fn generate() -> Self {
        RequestId(Ulid::new())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    id: RequestId,
    target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    handler: Option<String>,
}

impl Request {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            id: RequestId::generate(),
            target: target.into(),
            handler: None,
        }
    }

    /// Routes this request to the named spider callback.
    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn handler(&self) -> Option<&str> {
        self.handler.as_deref()
    }

    /// Parses the target as a URL.
    pub fn url(&self) -> Result<Url, SpiderError> {
        Ok(Url::parse(&self.target)?)
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.handler {
            Some(handler) => write!(f, "{} ({})", self.target, handler),
            None => f.write_str(&self.target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_identity() {
        let a = Request::new("https://example.com");
        let b = Request::new("https://example.com");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn identity_survives_serialization() {
        let original = Request::new("https://example.com/page").with_handler("parse_page");
        let bytes = rmp_serde::to_vec_named(&original).unwrap();
        let decoded: Request = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.handler(), Some("parse_page"));
        assert_eq!(decoded.target(), "https://example.com/page");
    }

    #[test]
    fn url_parses_target() {
        let ok = Request::new("https://example.com/a?b=c");
        assert_eq!(ok.url().unwrap().path(), "/a");

        let bad = Request::new("not a url");
        assert!(matches!(bad.url(), Err(SpiderError::UrlParse(_))));
    }
}

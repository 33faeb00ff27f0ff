//! Canonical data model shared by the scenario front end and the runtime.
//!
//! The request record ([`Ir`]) is the language-agnostic form of one HTTP
//! request. Its JSON rendering is a stable wire format: evaluator programs
//! receive it embedded in an [`EvaluationContext`], and `loadx run` /
//! `loadx validate` consume it from files.

mod context;
mod plan;

pub use context::{
    Actions, Decision, EvaluationContext, ExecutedRequest, ExtractSpec, Mutations, ResponseData,
    Verdict,
};
pub use plan::{
    AssertOp, AssertValue, Assertion, CondOp, Condition, Extraction, ExtractSource, LoadProfile,
    RequestNode, ScenarioPlan,
};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// IR schema version emitted into every document.
pub const VERSION: &str = "1.0";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported IR version `{0}` (expected {VERSION})")]
    Version(String),

    #[error("request method must not be empty")]
    EmptyMethod,

    #[error("request url must not be empty")]
    EmptyUrl,

    #[error("invalid request url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("binary body is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("evaluation timeout_ms must be positive")]
    ZeroEvaluationTimeout,
}

/// The complete request record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ir {
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    pub request: Request,

    #[serde(default)]
    pub transport: Transport,

    #[serde(default)]
    pub evaluation: Evaluation,
}

impl Ir {
    /// A record with defaults everywhere except the request itself.
    pub fn new(request: Request, source: &str) -> Self {
        Self {
            version: VERSION.to_string(),
            metadata: Some(Metadata {
                id: uuid::Uuid::new_v4().to_string(),
                source: source.to_string(),
                created_at: Some(Utc::now()),
                tags: BTreeMap::new(),
            }),
            request,
            transport: Transport::default(),
            evaluation: Evaluation::default(),
        }
    }

    /// Structural validation used by `loadx validate` and before execution.
    pub fn validate(&self) -> Result<()> {
        if self.version != VERSION {
            return Err(Error::Version(self.version.clone()));
        }
        if self.request.method.is_empty() {
            return Err(Error::EmptyMethod);
        }
        if self.request.url.is_empty() {
            return Err(Error::EmptyUrl);
        }
        // Runtime variable references are substituted before the URL is
        // parsed for real, so only reject URLs that cannot possibly become
        // valid. A `${...}` placeholder is allowed through.
        if !self.request.url.contains("${") {
            url::Url::parse(&self.request.url).map_err(|source| Error::InvalidUrl {
                url: self.request.url.clone(),
                source,
            })?;
        }
        if let Some(Body::Binary { content_base64 }) = &self.request.body {
            use base64_check::is_base64;
            if !is_base64(content_base64) {
                return Err(Error::InvalidBase64(content_base64.clone()));
            }
        }
        if self.evaluation.timeout_ms == 0 {
            return Err(Error::ZeroEvaluationTimeout);
        }
        Ok(())
    }
}

// Kept private so the crate does not grow a base64 dependency for one
// membership test; decoding proper happens in the executor.
mod base64_check {
    pub fn is_base64(s: &str) -> bool {
        !s.is_empty()
            && s.len() % 4 == 0
            && s.bytes().all(|b| {
                b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub id: String,

    /// Where the record came from: `curl`, `scenario`, `file`.
    #[serde(default)]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// One query value: single or repeated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
}

impl QueryValue {
    pub fn push(&mut self, value: String) {
        match self {
            QueryValue::One(existing) => {
                *self = QueryValue::Many(vec![std::mem::take(existing), value]);
            }
            QueryValue::Many(values) => values.push(value),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            QueryValue::One(v) => vec![v.as_str()],
            QueryValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub url: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, QueryValue>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            body: None,
            auth: None,
        }
    }

    pub fn add_query(&mut self, key: &str, value: String) {
        match self.query.get_mut(key) {
            Some(existing) => existing.push(value),
            None => {
                self.query.insert(key.to_string(), QueryValue::One(value));
            }
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Typed request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Body {
    Json { content: serde_json::Value },
    Form { content: BTreeMap<String, String> },
    Text { content: String },
    Binary { content_base64: String },
}

impl Body {
    /// Default Content-Type applied when the user did not set one.
    pub fn content_type(&self) -> &'static str {
        match self {
            Body::Json { .. } => "application/json",
            Body::Form { .. } => "application/x-www-form-urlencoded",
            Body::Text { .. } => "text/plain",
            Body::Binary { .. } => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer { token: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transport {
    pub tls_verify: bool,
    pub follow_redirects: bool,
    pub max_redirects: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    pub timeout_ms: u64,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            tls_verify: true,
            follow_redirects: true,
            max_redirects: 10,
            proxy: None,
            timeout_ms: 30_000,
        }
    }
}

/// Which out-of-process evaluator judges the response. `Builtin` skips the
/// subprocess entirely and applies the default status-based rule.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EvaluatorKind {
    Builtin,
    Bun,
    Python,
    Go,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub evaluator: EvaluatorKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator_path: Option<String>,

    pub timeout_ms: u64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, serde_json::Value>,
}

impl Default for Evaluation {
    fn default() -> Self {
        Self {
            evaluator: EvaluatorKind::Builtin,
            evaluator_path: None,
            timeout_ms: 5_000,
            vars: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_ir() -> Ir {
        Ir::new(Request::get("https://example.invalid/ok"), "curl")
    }

    #[test]
    fn validate_accepts_minimal_record() {
        minimal_ir().validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_version() {
        let mut ir = minimal_ir();
        ir.version = "2.0".to_string();
        assert!(matches!(ir.validate(), Err(Error::Version(_))));
    }

    #[test]
    fn validate_rejects_unparseable_url() {
        let mut ir = minimal_ir();
        ir.request.url = "not a url".to_string();
        assert!(matches!(ir.validate(), Err(Error::InvalidUrl { .. })));
    }

    #[test]
    fn validate_allows_url_with_runtime_placeholder() {
        let mut ir = minimal_ir();
        ir.request.url = "https://example.invalid/users/${user_id}".to_string();
        ir.validate().unwrap();
    }

    #[test]
    fn query_value_push_promotes_to_many() {
        let mut req = Request::get("https://example.invalid/");
        req.add_query("tag", "a".to_string());
        req.add_query("tag", "b".to_string());
        assert_eq!(
            req.query.get("tag"),
            Some(&QueryValue::Many(vec!["a".to_string(), "b".to_string()]))
        );
    }

    #[test]
    fn body_round_trips_through_json() {
        let body = Body::Json {
            content: serde_json::json!({"user": "test"}),
        };
        let encoded = serde_json::to_string(&body).unwrap();
        assert!(encoded.contains(r#""type":"json""#));
        let decoded: Body = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn auth_wire_shape_matches_contract() {
        let auth = Auth::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        let encoded = serde_json::to_value(&auth).unwrap();
        assert_eq!(encoded["type"], "basic");
        assert_eq!(encoded["username"], "user");
    }

    #[test]
    fn transport_defaults_match_contract() {
        let t = Transport::default();
        assert!(t.tls_verify);
        assert!(t.follow_redirects);
        assert_eq!(t.max_redirects, 10);
        assert_eq!(t.timeout_ms, 30_000);
    }

    #[test]
    fn ir_document_round_trips() {
        let ir = minimal_ir();
        let text = serde_json::to_string_pretty(&ir).unwrap();
        let back: Ir = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ir);
    }
}

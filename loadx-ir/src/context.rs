//! Evaluator protocol types: the context document written to an evaluator's
//! stdin and the verdict document read back from its stdout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Ir;

/// Everything an evaluator sees for one completed exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationContext {
    pub ir: Ir,
    pub request: ExecutedRequest,
    pub response: ResponseData,

    #[serde(default)]
    pub vars: BTreeMap<String, serde_json::Value>,
}

/// The request as actually sent, after substitution, auth, and cookies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedRequest {
    pub method: String,
    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// The response, or the transport failure that stood in for one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseData {
    /// HTTP status, or 0 when the transport failed before any response.
    pub status: u16,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Every `Set-Cookie` header, verbatim. Kept separate from `headers`
    /// because that map holds one value per name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_cookie: Vec<String>,

    /// Parsed JSON when the payload was valid JSON, otherwise the raw text
    /// as a JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    pub latency_ms: f64,

    #[serde(default)]
    pub size_bytes: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseData {
    pub fn transport_failure(error: String, latency_ms: f64) -> Self {
        Self {
            status: 0,
            headers: BTreeMap::new(),
            set_cookie: Vec::new(),
            body: None,
            latency_ms,
            size_bytes: 0,
            error: Some(error),
        }
    }

    /// The response body as text, regardless of whether it parsed as JSON.
    pub fn body_text(&self) -> String {
        match &self.body {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

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
pub enum Decision {
    Pass,
    Retry,
    Fail,
    Branch,
}

/// One verdict from an evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,

    #[serde(default)]
    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutations: Option<Mutations>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Actions>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Verdict {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self::with_decision(Decision::Pass, reason)
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::with_decision(Decision::Fail, reason)
    }

    fn with_decision(decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
            mutations: None,
            actions: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Schema validation beyond what serde enforces. A verdict failing this
    /// is treated the same as malformed JSON: the gateway falls back to the
    /// default evaluator.
    pub fn validate(&self) -> Result<(), String> {
        if self.decision == Decision::Branch {
            let has_goto = self
                .actions
                .as_ref()
                .and_then(|a| a.goto.as_deref())
                .is_some_and(|g| !g.is_empty());
            if !has_goto {
                return Err("branch decision requires actions.goto".to_string());
            }
        }

        if let Some(actions) = &self.actions {
            if let Some(delay) = actions.retry_after_ms {
                if delay < 0 {
                    return Err("retry_after_ms cannot be negative".to_string());
                }
            }
        }

        Ok(())
    }
}

/// Changes applied to the next attempt of a retried request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mutations {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, serde_json::Value>,
}

/// Flow-control directives attached to a verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Actions {
    /// Signed so that a negative value from a buggy evaluator is caught by
    /// `Verdict::validate` instead of failing deserialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extract: BTreeMap<String, ExtractSpec>,
}

/// An extraction rule carried inside a verdict's actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonpath: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_tags_round_trip() {
        for (tag, decision) in [
            ("pass", Decision::Pass),
            ("retry", Decision::Retry),
            ("fail", Decision::Fail),
            ("branch", Decision::Branch),
        ] {
            let json = format!(r#"{{"decision":"{tag}"}}"#);
            let verdict: Verdict = serde_json::from_str(&json).unwrap();
            assert_eq!(verdict.decision, decision);
        }
    }

    #[test]
    fn unknown_decision_fails_deserialization() {
        let result = serde_json::from_str::<Verdict>(r#"{"decision":"maybe"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn branch_without_goto_is_invalid() {
        let verdict: Verdict =
            serde_json::from_str(r#"{"decision":"branch","reason":"go elsewhere"}"#).unwrap();
        assert!(verdict.validate().is_err());
    }

    #[test]
    fn branch_with_goto_is_valid() {
        let verdict: Verdict = serde_json::from_str(
            r#"{"decision":"branch","actions":{"goto":"fallback_login"}}"#,
        )
        .unwrap();
        verdict.validate().unwrap();
    }

    #[test]
    fn negative_retry_delay_is_invalid() {
        let verdict: Verdict = serde_json::from_str(
            r#"{"decision":"retry","actions":{"retry_after_ms":-100}}"#,
        )
        .unwrap();
        assert!(verdict.validate().is_err());
    }

    #[test]
    fn transport_failure_context_has_status_zero() {
        let resp = ResponseData::transport_failure("connection refused".to_string(), 12.5);
        assert_eq!(resp.status, 0);
        assert_eq!(resp.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn body_text_stringifies_json_bodies() {
        let mut resp = ResponseData::transport_failure(String::new(), 0.0);
        resp.body = Some(serde_json::json!({"ok": true}));
        assert_eq!(resp.body_text(), r#"{"ok":true}"#);
        resp.body = Some(serde_json::Value::String("plain".to_string()));
        assert_eq!(resp.body_text(), "plain");
    }
}

//! Runtime variable flow: `${name}` substitution into outgoing requests
//! and value extraction out of responses.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use loadx_ir::{Auth, Body, EvaluationContext, ExtractSource, Extraction, Ir};
use regex::Regex;

/// The per-iteration variable map. Values keep their JSON type so that
/// evaluators and conditions see numbers as numbers.
pub type VarMap = BTreeMap<String, serde_json::Value>;

/// Process-wide counter backing the `COUNTER` built-in.
static COUNTER: AtomicU64 = AtomicU64::new(0);

fn var_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{(\w+)\}").expect("static pattern"))
}

/// Render a variable value the way it substitutes into request text:
/// strings bare, everything else in its JSON form.
pub fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every `${name}` with its binding. Built-ins resolve per call;
/// unbound names stay untouched.
pub fn substitute(template: &str, vu: u64, iter: u64, vars: &VarMap) -> String {
    var_ref_pattern()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match name {
                "VU" => vu.to_string(),
                "ITER" => iter.to_string(),
                "TIME" => SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default()
                    .to_string(),
                "UUID" => uuid::Uuid::new_v4().to_string(),
                "COUNTER" => COUNTER.fetch_add(1, Ordering::Relaxed).to_string(),
                _ => match vars.get(name) {
                    Some(value) => value_to_string(value),
                    None => caps[0].to_string(),
                },
            }
        })
        .into_owned()
}

/// Substitute into the parts of a request the language exposes: the URL,
/// header values, a text body, and the textual rendering of a JSON body
/// (re-parsed afterwards).
pub fn apply_to_ir(ir: &mut Ir, vu: u64, iter: u64, vars: &VarMap) {
    ir.request.url = substitute(&ir.request.url, vu, iter, vars);

    for value in ir.request.headers.values_mut() {
        *value = substitute(value, vu, iter, vars);
    }

    // Auth materialises as an Authorization header at send time, so its
    // fields take the header-value substitution pass too.
    match &mut ir.request.auth {
        Some(Auth::Bearer { token }) => {
            *token = substitute(token, vu, iter, vars);
        }
        Some(Auth::Basic { username, password }) => {
            *username = substitute(username, vu, iter, vars);
            *password = substitute(password, vu, iter, vars);
        }
        None => {}
    }

    match &mut ir.request.body {
        Some(Body::Text { content }) => {
            *content = substitute(content, vu, iter, vars);
        }
        Some(Body::Json { content }) => {
            let rendered = content.to_string();
            let substituted = substitute(&rendered, vu, iter, vars);
            if let Ok(reparsed) = serde_json::from_str(&substituted) {
                *content = reparsed;
            }
        }
        _ => {}
    }
}

/// Apply one extraction rule set against a completed exchange. Extracted
/// values overwrite prior bindings of the same name.
pub fn extract(rules: &[Extraction], ctx: &EvaluationContext) -> VarMap {
    let mut out = VarMap::new();

    for rule in rules {
        if let Some(value) = extract_one(&rule.source, ctx) {
            out.insert(rule.name.clone(), value);
        }
    }

    out
}

fn extract_one(source: &ExtractSource, ctx: &EvaluationContext) -> Option<serde_json::Value> {
    match source {
        ExtractSource::JsonPath(path) => {
            json_path(ctx.response.body.as_ref()?, path).cloned()
        }
        ExtractSource::Regex(pattern) => {
            let body = ctx.response.body_text();
            let re = Regex::new(pattern).ok()?;
            let captures = re.captures(&body)?;
            let group = captures.get(1).or_else(|| captures.get(0))?;
            Some(serde_json::Value::String(group.as_str().to_string()))
        }
        ExtractSource::Header(name) => ctx
            .response
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| serde_json::Value::String(v.clone())),
        ExtractSource::Cookie(name) => ctx.response.set_cookie.iter().find_map(|header| {
            let (pair, _) = header.split_once(';').unwrap_or((header.as_str(), ""));
            let (cookie_name, value) = pair.split_once('=')?;
            if cookie_name.trim() == name {
                Some(serde_json::Value::String(value.trim().to_string()))
            } else {
                None
            }
        }),
    }
}

/// Walk a dotted path (`data.user.id`, `items[0].id`) through a JSON value.
/// A leading `$.` is tolerated.
pub fn json_path<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let mut current = root;

    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }

        let (key, indexes) = split_indexes(segment)?;
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index in indexes {
            current = current.get(index)?;
        }
    }

    Some(current)
}

/// `items[0][2]` -> ("items", [0, 2]).
fn split_indexes(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(bracket) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };

    let key = &segment[..bracket];
    let mut indexes = Vec::new();
    let mut rest = &segment[bracket..];

    while let Some(stripped) = rest.strip_prefix('[') {
        let end = stripped.find(']')?;
        indexes.push(stripped[..end].parse().ok()?);
        rest = &stripped[end + 1..];
    }

    if rest.is_empty() {
        Some((key, indexes))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadx_ir::{ExecutedRequest, Request, ResponseData};

    fn ctx_with_body(body: serde_json::Value) -> EvaluationContext {
        let ir = Ir::new(Request::get("http://example.invalid/"), "test");
        EvaluationContext {
            ir,
            request: ExecutedRequest {
                method: "GET".to_string(),
                url: "http://example.invalid/".to_string(),
                headers: BTreeMap::new(),
                body: None,
            },
            response: ResponseData {
                status: 200,
                headers: BTreeMap::new(),
                set_cookie: Vec::new(),
                body: Some(body),
                latency_ms: 1.0,
                size_bytes: 0,
                error: None,
            },
            vars: VarMap::new(),
        }
    }

    #[test]
    fn substitutes_bound_variables() {
        let mut vars = VarMap::new();
        vars.insert("token".to_string(), "abc".into());
        vars.insert("user_id".to_string(), 42.into());

        let out = substitute("Bearer ${token} for user ${user_id}", 1, 1, &vars);
        assert_eq!(out, "Bearer abc for user 42");
    }

    #[test]
    fn unbound_references_stay_untouched() {
        let out = substitute("/users/${missing}", 1, 1, &VarMap::new());
        assert_eq!(out, "/users/${missing}");
    }

    #[test]
    fn builtins_resolve() {
        let vars = VarMap::new();
        assert_eq!(substitute("vu=${VU}", 7, 3, &vars), "vu=7");
        assert_eq!(substitute("iter=${ITER}", 7, 3, &vars), "iter=3");

        let uuid = substitute("${UUID}", 1, 1, &vars);
        assert_eq!(uuid.len(), 36);

        let first: u64 = substitute("${COUNTER}", 1, 1, &vars).parse().unwrap();
        let second: u64 = substitute("${COUNTER}", 1, 1, &vars).parse().unwrap();
        assert!(second > first);

        let time: u64 = substitute("${TIME}", 1, 1, &vars).parse().unwrap();
        assert!(time > 1_600_000_000);
    }

    #[test]
    fn applies_to_url_headers_and_json_body() {
        let mut ir = Ir::new(Request::get("http://example.invalid/users/${user_id}"), "test");
        ir.request
            .headers
            .insert("Authorization".to_string(), "Bearer ${token}".to_string());
        ir.request.body = Some(Body::Json {
            content: serde_json::json!({"requested_by": "${token}", "vu": "${VU}"}),
        });

        let mut vars = VarMap::new();
        vars.insert("user_id".to_string(), 9.into());
        vars.insert("token".to_string(), "t0k".into());

        apply_to_ir(&mut ir, 5, 1, &vars);

        assert_eq!(ir.request.url, "http://example.invalid/users/9");
        assert_eq!(
            ir.request.headers.get("Authorization").map(String::as_str),
            Some("Bearer t0k")
        );
        match ir.request.body.unwrap() {
            Body::Json { content } => {
                assert_eq!(content["requested_by"], "t0k");
                assert_eq!(content["vu"], "5");
            }
            other => panic!("expected json body, got {other:?}"),
        }
    }

    #[test]
    fn applies_to_auth_fields() {
        let mut ir = Ir::new(Request::get("http://example.invalid/"), "test");
        ir.request.auth = Some(Auth::Bearer {
            token: "${token}".to_string(),
        });

        let mut vars = VarMap::new();
        vars.insert("token".to_string(), "t0k".into());
        apply_to_ir(&mut ir, 1, 1, &vars);

        assert_eq!(
            ir.request.auth,
            Some(Auth::Bearer {
                token: "t0k".to_string()
            })
        );
    }

    #[test]
    fn json_path_walks_objects_and_arrays() {
        let body = serde_json::json!({
            "data": {"user": {"id": 42}},
            "items": [{"id": "first"}, {"id": "second"}]
        });
        assert_eq!(json_path(&body, "data.user.id").unwrap(), 42);
        assert_eq!(json_path(&body, "$.items[1].id").unwrap(), "second");
        assert!(json_path(&body, "data.missing").is_none());
    }

    #[test]
    fn extract_json_path_binds_value() {
        let ctx = ctx_with_body(serde_json::json!({"access_token": "tok", "user": {"id": 7}}));
        let rules = vec![
            Extraction {
                name: "token".to_string(),
                source: ExtractSource::JsonPath("access_token".to_string()),
            },
            Extraction {
                name: "user_id".to_string(),
                source: ExtractSource::JsonPath("user.id".to_string()),
            },
        ];

        let out = extract(&rules, &ctx);
        assert_eq!(out.get("token").unwrap(), "tok");
        assert_eq!(out.get("user_id").unwrap(), 7);
    }

    #[test]
    fn extract_regex_takes_first_capture_group() {
        let ctx = ctx_with_body(serde_json::Value::String(
            "token=\"abc123\" trailing".to_string(),
        ));
        let rules = vec![Extraction {
            name: "token".to_string(),
            source: ExtractSource::Regex("token=\"(\\w+)\"".to_string()),
        }];

        let out = extract(&rules, &ctx);
        assert_eq!(out.get("token").unwrap(), "abc123");
    }

    #[test]
    fn extract_header_is_case_insensitive() {
        let mut ctx = ctx_with_body(serde_json::Value::Null);
        ctx.response
            .headers
            .insert("x-request-id".to_string(), "rid-1".to_string());

        let rules = vec![Extraction {
            name: "rid".to_string(),
            source: ExtractSource::Header("X-Request-Id".to_string()),
        }];
        let out = extract(&rules, &ctx);
        assert_eq!(out.get("rid").unwrap(), "rid-1");
    }

    #[test]
    fn extract_cookie_from_set_cookie_headers() {
        let mut ctx = ctx_with_body(serde_json::Value::Null);
        ctx.response
            .set_cookie
            .push("feature=true; Path=/; HttpOnly".to_string());

        let rules = vec![Extraction {
            name: "enabled".to_string(),
            source: ExtractSource::Cookie("feature".to_string()),
        }];
        let out = extract(&rules, &ctx);
        assert_eq!(out.get("enabled").unwrap(), "true");
    }

    #[test]
    fn missing_extraction_binds_nothing() {
        let ctx = ctx_with_body(serde_json::json!({"a": 1}));
        let rules = vec![Extraction {
            name: "x".to_string(),
            source: ExtractSource::JsonPath("nope".to_string()),
        }];
        assert!(extract(&rules, &ctx).is_empty());
    }
}

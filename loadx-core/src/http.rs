//! HTTP executor: one request record in, one evaluation context out.
//!
//! Redirects are followed manually so the per-VU cookie jar observes every
//! hop's `Set-Cookie` headers and so the redirect bound comes from the
//! record rather than client construction. Transport failures do not error
//! out: they return a context with status 0 and an error string, because
//! retry decisions may depend on them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine as _;
use loadx_ir::{Auth, Body, EvaluationContext, ExecutedRequest, Ir, ResponseData};

use crate::cookies::CookieJar;
use crate::error::{Error, Result};

/// Clients are cached per transport variant: reqwest fixes TLS
/// verification and proxy at build time, while timeouts and redirects are
/// handled per request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    tls_verify: bool,
    proxy: Option<String>,
}

#[derive(Debug, Default)]
pub struct HttpExecutor {
    clients: Mutex<HashMap<ClientKey, reqwest::Client>>,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, ir: &Ir) -> Result<reqwest::Client> {
        let key = ClientKey {
            tls_verify: ir.transport.tls_verify,
            proxy: ir.transport.proxy.clone(),
        };

        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!key.tls_verify);

        if let Some(proxy) = &key.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|err| Error::InvalidProxy(proxy.clone(), err))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(Error::ClientBuild)?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Execute one exchange (following redirects when enabled) and capture
    /// the result. The jar is read before the request and updated from
    /// every hop's `Set-Cookie` headers.
    pub async fn execute(&self, ir: &Ir, jar: &CookieJar) -> Result<EvaluationContext> {
        let client = self.client_for(ir)?;

        let mut url = parse_url(&ir.request.url)?;
        apply_query(&mut url, ir);

        let method: reqwest::Method = ir
            .request
            .method
            .as_bytes()
            .try_into()
            .map_err(|_| Error::InvalidMethod(ir.request.method.clone()))?;

        let (body_bytes, body_content_type) = build_body(ir.request.body.as_ref())?;

        let mut headers = ir.request.headers.clone();
        if body_bytes.is_some() && ir.request.header("Content-Type").is_none() {
            if let Some(content_type) = body_content_type {
                headers.insert("Content-Type".to_string(), content_type.to_string());
            }
        }

        match &ir.request.auth {
            Some(Auth::Basic { username, password }) => {
                let token = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                headers.insert("Authorization".to_string(), format!("Basic {token}"));
            }
            Some(Auth::Bearer { token }) => {
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
            None => {}
        }

        let deadline = Instant::now() + Duration::from_millis(ir.transport.timeout_ms.max(1));

        let mut hop_method = method;
        let mut hop_url = url;
        let mut hop_body = body_bytes;
        let mut hops: u32 = 0;

        let started = Instant::now();
        let mut sent = ExecutedRequest {
            method: hop_method.to_string(),
            url: hop_url.to_string(),
            headers: BTreeMap::new(),
            body: ir.request.body.as_ref().map(body_as_json),
        };

        loop {
            let mut request = client
                .request(hop_method.clone(), hop_url.clone())
                .timeout(remaining(deadline));

            let mut sent_headers = headers.clone();
            if let Some(cookie) = jar.cookie_header(
                &hop_url,
                ir.request
                    .cookies
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            ) {
                sent_headers.insert("Cookie".to_string(), cookie);
            }

            for (name, value) in &sent_headers {
                request = request.header(name.as_str(), value.as_str());
            }

            if let Some(bytes) = &hop_body {
                request = request.body(bytes.clone());
            }

            sent.method = hop_method.to_string();
            sent.url = hop_url.to_string();
            sent.headers = sent_headers;

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    return Ok(context(
                        ir,
                        sent,
                        ResponseData::transport_failure(describe_error(&err), latency_ms),
                    ));
                }
            };

            let status = response.status().as_u16();

            let set_cookie: Vec<String> = response
                .headers()
                .get_all(reqwest::header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok().map(str::to_string))
                .collect();
            for cookie in &set_cookie {
                jar.store(&hop_url, cookie);
            }

            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let is_redirect = matches!(status, 301 | 302 | 303 | 307 | 308);
            if is_redirect
                && ir.transport.follow_redirects
                && hops < ir.transport.max_redirects
            {
                if let Some(location) = location {
                    if let Ok(next) = hop_url.join(&location) {
                        hops += 1;
                        hop_url = next;
                        // 303 always demotes to GET; 301/302 demote
                        // non-HEAD methods, like curl -L.
                        if status == 303
                            || (matches!(status, 301 | 302)
                                && hop_method != reqwest::Method::HEAD)
                        {
                            hop_method = reqwest::Method::GET;
                            hop_body = None;
                        }
                        continue;
                    }
                }
            }

            // Final hop: capture headers and read the body.
            let mut response_headers = BTreeMap::new();
            for (name, value) in response.headers() {
                if let Ok(text) = value.to_str() {
                    response_headers
                        .entry(name.to_string())
                        .or_insert_with(|| text.to_string());
                }
            }

            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(err) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    return Ok(context(
                        ir,
                        sent,
                        ResponseData::transport_failure(
                            format!("failed to read response body: {err}"),
                            latency_ms,
                        ),
                    ));
                }
            };

            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            let body = if bytes.is_empty() {
                None
            } else {
                match serde_json::from_slice::<serde_json::Value>(&bytes) {
                    Ok(json) => Some(json),
                    Err(_) => Some(serde_json::Value::String(
                        String::from_utf8_lossy(&bytes).into_owned(),
                    )),
                }
            };

            return Ok(context(
                ir,
                sent,
                ResponseData {
                    status,
                    headers: response_headers,
                    set_cookie,
                    body,
                    latency_ms,
                    size_bytes: bytes.len() as u64,
                    error: None,
                },
            ));
        }
    }
}

fn context(ir: &Ir, sent: ExecutedRequest, response: ResponseData) -> EvaluationContext {
    EvaluationContext {
        vars: ir.evaluation.vars.clone(),
        ir: ir.clone(),
        request: sent,
        response,
    }
}

fn parse_url(raw: &str) -> Result<url::Url> {
    url::Url::parse(raw).map_err(|err| Error::InvalidUrl(raw.to_string(), err))
}

fn apply_query(url: &mut url::Url, ir: &Ir) {
    if ir.request.query.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in &ir.request.query {
        for v in value.values() {
            pairs.append_pair(key, v);
        }
    }
}

fn build_body(body: Option<&Body>) -> Result<(Option<Vec<u8>>, Option<&'static str>)> {
    let Some(body) = body else {
        return Ok((None, None));
    };

    let bytes = match body {
        Body::Json { content } => serde_json::to_vec(content).map_err(Error::Json)?,
        Body::Form { content } => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in content {
                serializer.append_pair(key, value);
            }
            serializer.finish().into_bytes()
        }
        Body::Text { content } => content.clone().into_bytes(),
        Body::Binary { content_base64 } => {
            base64::engine::general_purpose::STANDARD.decode(content_base64)?
        }
    };

    Ok((Some(bytes), Some(body.content_type())))
}

/// The request body as the evaluator sees it in the context document.
fn body_as_json(body: &Body) -> serde_json::Value {
    match body {
        Body::Json { content } => content.clone(),
        Body::Form { content } => serde_json::to_value(content).unwrap_or_default(),
        Body::Text { content } => serde_json::Value::String(content.clone()),
        Body::Binary { content_base64 } => serde_json::Value::String(content_base64.clone()),
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now()).max(Duration::from_millis(1))
}

fn describe_error(err: &reqwest::Error) -> String {
    let mut message = if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "connection failed".to_string()
    } else {
        "request failed".to_string()
    };

    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }

    message
}

//! Curl command translation: one curl command line in, one canonical
//! request record out.
//!
//! Two entry points: [`parse_command_line`] tokenises a raw shell string
//! (the `loadx convert` path) and [`from_args`] consumes an already-split
//! argument list (the compiler path, where variable substitution has run
//! per argument and quoting is already resolved).

use std::collections::BTreeMap;

use loadx_ir::{Auth, Body, Ir, QueryValue, Request};

use crate::error::{Error, Result};

/// Split a shell command line into arguments, respecting single and double
/// quotes, backslash escapes, and quoted whitespace.
pub fn tokenize(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = input.trim().chars().peekable();

    while let Some(ch) = chars.next() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }

        if ch == '\\' && in_quote.is_none() {
            match chars.peek() {
                Some('"') | Some('\'') | Some('\\') | Some(' ') => {
                    escaped = true;
                    continue;
                }
                _ => {
                    current.push(ch);
                    continue;
                }
            }
        }

        if let Some(quote) = in_quote {
            if ch == quote {
                in_quote = None;
            } else {
                current.push(ch);
            }
            continue;
        }

        match ch {
            '"' | '\'' => in_quote = Some(ch),
            ' ' | '\t' | '\n' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if let Some(quote) = in_quote {
        return Err(Error::Curl(format!("unclosed quote: {quote}")));
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    Ok(tokens)
}

/// Translate a raw curl command line into an IR.
pub fn parse_command_line(line: &str) -> Result<Ir> {
    from_args(&tokenize(line)?)
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| Error::Curl(format!("missing value for {flag}")))
}

/// Translate a split curl argument list into an IR. A leading `curl` word
/// is tolerated and skipped.
pub fn from_args(args: &[String]) -> Result<Ir> {
    let mut ir = Ir::new(Request::get(""), "curl");

    let mut explicit_method = false;
    let mut has_body = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();

        if arg == "curl" && i == 0 {
            i += 1;
            continue;
        }

        if !arg.starts_with('-') {
            if ir.request.url.is_empty() {
                ir.request.url = arg.to_string();
            }
            i += 1;
            continue;
        }

        match arg {
            "-X" | "--request" => {
                ir.request.method = take_value(args, &mut i, arg)?.to_uppercase();
                explicit_method = true;
            }
            "-H" | "--header" => {
                let header = take_value(args, &mut i, arg)?;
                apply_header(&header, &mut ir.request)?;
            }
            "-d" | "--data" | "--data-raw" | "--data-binary" | "--data-urlencode" => {
                let data = take_value(args, &mut i, arg)?;
                has_body = true;
                ir.request.body = Some(type_body(&data, arg));
            }
            "-b" | "--cookie" => {
                let cookies = take_value(args, &mut i, arg)?;
                apply_cookies(&cookies, &mut ir.request);
            }
            "-u" | "--user" => {
                let userpass = take_value(args, &mut i, arg)?;
                let (username, password) = match userpass.split_once(':') {
                    Some((u, p)) => (u.to_string(), p.to_string()),
                    None => (userpass, String::new()),
                };
                ir.request.auth = Some(Auth::Basic { username, password });
            }
            "-A" | "--user-agent" => {
                let agent = take_value(args, &mut i, arg)?;
                ir.request.headers.insert("User-Agent".to_string(), agent);
            }
            "-e" | "--referer" => {
                let referer = take_value(args, &mut i, arg)?;
                ir.request.headers.insert("Referer".to_string(), referer);
            }
            "-k" | "--insecure" => ir.transport.tls_verify = false,
            "-L" | "--location" => ir.transport.follow_redirects = true,
            "--max-redirs" => {
                let n = take_value(args, &mut i, arg)?;
                ir.transport.max_redirects = n
                    .parse()
                    .map_err(|_| Error::Curl(format!("invalid --max-redirs value `{n}`")))?;
            }
            "-x" | "--proxy" => ir.transport.proxy = Some(take_value(args, &mut i, arg)?),
            "-m" | "--max-time" => {
                let seconds = parse_seconds(&take_value(args, &mut i, arg)?, arg)?;
                ir.transport.timeout_ms = (seconds * 1000.0) as u64;
            }
            "--connect-timeout" => {
                // No separate connect deadline; fold into the overall
                // timeout when the overall one is still the default.
                let seconds = parse_seconds(&take_value(args, &mut i, arg)?, arg)?;
                if ir.transport.timeout_ms == 30_000 {
                    ir.transport.timeout_ms = (seconds * 1000.0) as u64;
                }
            }
            "-G" | "--get" => {
                ir.request.method = "GET".to_string();
                explicit_method = true;
            }
            "-I" | "--head" => {
                ir.request.method = "HEAD".to_string();
                explicit_method = true;
            }
            "--compressed" => {
                ir.request
                    .headers
                    .insert("Accept-Encoding".to_string(), "gzip, deflate, br".to_string());
            }
            _ => {
                // Unknown flag: skip its argument unless that argument is
                // itself a flag.
                if args.get(i + 1).is_some_and(|next| !next.starts_with('-')) {
                    i += 1;
                }
            }
        }

        i += 1;
    }

    if ir.request.url.is_empty() {
        return Err(Error::Curl("no URL found in curl command".to_string()));
    }

    if !explicit_method && has_body {
        ir.request.method = "POST".to_string();
    }

    lift_query_params(&mut ir.request)?;

    Ok(ir)
}

/// Body typing: JSON if it parses as JSON, urlencoded form if it looks like
/// `k=v` pairs, binary for `--data-binary`, text otherwise. Sets the
/// matching Content-Type unless the user supplied one.
fn type_body(data: &str, flag: &str) -> Body {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(data) {
        return Body::Json { content: json };
    }

    if data.contains('=') && !data.contains('{') {
        let mut form = BTreeMap::new();
        for pair in data.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                form.insert(url_decode(key), url_decode(value));
            }
        }
        return Body::Form { content: form };
    }

    if flag == "--data-binary" {
        use base64::Engine as _;
        return Body::Binary {
            content_base64: base64::engine::general_purpose::STANDARD.encode(data.as_bytes()),
        };
    }

    Body::Text {
        content: data.to_string(),
    }
}

fn url_decode(s: &str) -> String {
    // Form values arrive percent-encoded; anything malformed passes
    // through untouched.
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let decoded = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Headers get special routing: `Cookie` fills the cookie map and
/// `Authorization: Bearer` becomes an auth record.
fn apply_header(header: &str, request: &mut Request) -> Result<()> {
    let (key, value) = header
        .split_once(':')
        .ok_or_else(|| Error::Curl(format!("invalid header format: {header}")))?;

    let key = key.trim();
    let value = value.trim();

    if key.eq_ignore_ascii_case("cookie") {
        apply_cookies(value, request);
    } else if key.eq_ignore_ascii_case("authorization") {
        if let Some(token) = value.strip_prefix("Bearer ") {
            request.auth = Some(Auth::Bearer {
                token: token.to_string(),
            });
        } else {
            request.headers.insert(key.to_string(), value.to_string());
        }
    } else {
        request.headers.insert(key.to_string(), value.to_string());
    }

    Ok(())
}

fn apply_cookies(raw: &str, request: &mut Request) {
    for pair in raw.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=') {
            request
                .cookies
                .insert(name.to_string(), value.to_string());
        }
    }
}

fn parse_seconds(value: &str, flag: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| Error::Curl(format!("invalid value for {flag}: `{value}`")))
}

/// Move query parameters out of the URL into the structured query map and
/// rewrite the URL without its query string. URLs still carrying `${...}`
/// placeholders are left alone; they are re-lifted after substitution.
fn lift_query_params(request: &mut Request) -> Result<()> {
    if request.url.contains("${") {
        return Ok(());
    }

    let mut parsed = url::Url::parse(&request.url)
        .map_err(|err| Error::Curl(format!("invalid URL `{}`: {err}", request.url)))?;

    if parsed.query().is_none() {
        return Ok(());
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    for (key, value) in pairs {
        request.add_query(&key, value);
    }

    parsed.set_query(None);
    request.url = parsed.to_string();
    Ok(())
}

//! Per-VU cookie jar.
//!
//! One jar exists per virtual user and lives for one iteration lineage; it
//! is never shared across VUs. Parallel children of one VU may touch the
//! jar concurrently, so the store sits behind a mutex.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredCookie {
    name: String,
    value: String,
    path: String,
}

/// Host-keyed cookie store with path matching.
#[derive(Debug, Default)]
pub struct CookieJar {
    by_host: Mutex<HashMap<String, Vec<StoredCookie>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one `Set-Cookie` header value for the given request URL.
    /// Unparseable headers are ignored.
    pub fn store(&self, url: &url::Url, set_cookie: &str) {
        let Some(host) = url.host_str() else {
            return;
        };

        let Some((name, value, path)) = parse_set_cookie(set_cookie) else {
            return;
        };

        let mut by_host = self.by_host.lock().unwrap_or_else(|e| e.into_inner());
        let cookies = by_host.entry(host.to_string()).or_default();

        // Same (name, path) replaces.
        if let Some(existing) = cookies
            .iter_mut()
            .find(|c| c.name == name && c.path == path)
        {
            existing.value = value;
        } else {
            cookies.push(StoredCookie { name, value, path });
        }
    }

    /// Cookies applicable to the URL, as (name, value) pairs. Longest-path
    /// entries win on name collisions.
    pub fn cookies_for(&self, url: &url::Url) -> Vec<(String, String)> {
        let Some(host) = url.host_str() else {
            return Vec::new();
        };

        let request_path = url.path();
        let by_host = self.by_host.lock().unwrap_or_else(|e| e.into_inner());

        let mut matching: Vec<&StoredCookie> = by_host
            .get(host)
            .map(|cookies| {
                cookies
                    .iter()
                    .filter(|c| path_matches(request_path, &c.path))
                    .collect()
            })
            .unwrap_or_default();

        matching.sort_by_key(|c| std::cmp::Reverse(c.path.len()));

        let mut seen = std::collections::HashSet::new();
        matching
            .into_iter()
            .filter(|c| seen.insert(c.name.clone()))
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect()
    }

    /// Render the `Cookie` header value for a URL, with explicit request
    /// cookies appended after (and overriding) jar entries.
    pub fn cookie_header(
        &self,
        url: &url::Url,
        explicit: impl Iterator<Item = (String, String)>,
    ) -> Option<String> {
        let mut pairs = self.cookies_for(url);
        for (name, value) in explicit {
            if let Some(existing) = pairs.iter_mut().find(|(n, _)| *n == name) {
                existing.1 = value;
            } else {
                pairs.push((name, value));
            }
        }

        if pairs.is_empty() {
            return None;
        }

        Some(
            pairs
                .into_iter()
                .map(|(n, v)| format!("{n}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.by_host
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .all(Vec::is_empty)
    }
}

/// RFC 6265 in miniature: `name=value` then `; `-separated attributes. Only
/// `Path` matters here; expiry-based eviction is pointless inside a single
/// iteration lineage.
fn parse_set_cookie(header: &str) -> Option<(String, String, String)> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut path = "/".to_string();
    for attr in parts {
        if let Some((key, val)) = attr.split_once('=') {
            if key.trim().eq_ignore_ascii_case("path") && val.starts_with('/') {
                path = val.trim().to_string();
            }
        }
    }

    Some((name.to_string(), value.trim().to_string(), path))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if cookie_path == "/" || request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

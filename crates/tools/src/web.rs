//! Network tools: web_search and http_request.
//!
//! `web_search` scrapes the DuckDuckGo HTML front-end; the markup is not
//! a contract, so parse failures degrade to "no results" instead of
//! erroring. `http_request` carries the SSRF guard: only http/https, and
//! never a localhost, loopback, RFC1918, link-local, or unique-local
//! target.

use async_trait::async_trait;
use regex::Regex;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

use relayclaw_core::error::ToolError;
use relayclaw_core::tool::Tool;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; relayclaw/0.3)";
const HTTP_BODY_CAP: usize = 5000;
const MAX_SEARCH_RESULTS: usize = 10;

pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client"),
        }
    }

    /// Pull `result__a` anchors out of the DuckDuckGo HTML page.
    fn parse_results(html: &str, limit: usize) -> Vec<(String, String)> {
        let re = Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)
            .expect("static regex");

        re.captures_iter(html)
            .take(limit)
            .map(|cap| {
                let mut link = cap[1].to_string();
                if link.starts_with("//") {
                    link = format!("https:{link}");
                }
                (strip_html_tags(&cap[2]).trim().to_string(), link)
            })
            .collect()
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web via DuckDuckGo. Returns result titles and links."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Number of results (default 5, max 10)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let query = args["query"]
            .as_str()
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("query is required".into()))?;

        let num_results = match args["num_results"].as_u64() {
            Some(n) if n >= 1 => (n as usize).min(MAX_SEARCH_RESULTS),
            _ => 5,
        };

        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            query.replace(' ', "+")
        );
        debug!(query, num_results, "web search");

        let response = self.client.get(&url).send().await.map_err(|e| {
            ToolError::ExecutionFailed {
                tool: "web_search".into(),
                reason: format!("search request failed: {e}"),
            }
        })?;
        if !response.status().is_success() {
            return Err(ToolError::ExecutionFailed {
                tool: "web_search".into(),
                reason: format!("search returned status {}", response.status().as_u16()),
            });
        }

        let html = response.text().await.map_err(|e| ToolError::ExecutionFailed {
            tool: "web_search".into(),
            reason: e.to_string(),
        })?;

        let results = Self::parse_results(&html, num_results);
        if results.is_empty() {
            return Ok("No search results found".into());
        }

        let mut out = format!("Search results for: {query}\n\n");
        for (i, (title, link)) in results.iter().enumerate() {
            out.push_str(&format!("{}. {}\n   {}\n\n", i + 1, title, link));
        }
        Ok(out)
    }
}

pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .user_agent(USER_AGENT)
                .build()
                .expect("reqwest client"),
        }
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Fetch a web page over HTTP. Returns the text content with HTML tags stripped."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to request"
                },
                "method": {
                    "type": "string",
                    "description": "HTTP method (GET or POST, default GET)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let url_str = args["url"]
            .as_str()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("url is required".into()))?;

        let url = reqwest::Url::parse(url_str)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid url: {e}")))?;

        check_url_allowed(&url)?;

        let method = args["method"]
            .as_str()
            .map(|m| m.to_uppercase())
            .unwrap_or_else(|| "GET".into());

        debug!(url = %url, method, "http request");

        let request = match method.as_str() {
            "POST" => self.client.post(url),
            "GET" => self.client.get(url),
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "unsupported method: {other}"
                )));
            }
        };

        let response = request.send().await.map_err(|e| ToolError::ExecutionFailed {
            tool: "http_request".into(),
            reason: format!("request failed: {e}"),
        })?;

        let body = response.text().await.map_err(|e| ToolError::ExecutionFailed {
            tool: "http_request".into(),
            reason: e.to_string(),
        })?;

        let mut content = strip_html_tags(&body).trim().to_string();
        if content.len() > HTTP_BODY_CAP {
            let mut end = HTTP_BODY_CAP;
            while end > 0 && !content.is_char_boundary(end) {
                end -= 1;
            }
            content.truncate(end);
            content.push_str("\n... (truncated)");
        }

        if content.is_empty() {
            Ok("Empty response".into())
        } else {
            Ok(content)
        }
    }
}

/// SSRF guard: http/https only, and the host must not be localhost or a
/// private/link-local/loopback address (v4 or v6). The literal host is
/// checked, as supplied.
fn check_url_allowed(url: &reqwest::Url) -> Result<(), ToolError> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ToolError::Sandbox(format!(
                "only http/https protocols are allowed, got {other}"
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| ToolError::InvalidArguments("url has no host".into()))?;

    if host.eq_ignore_ascii_case("localhost") {
        return Err(ToolError::Sandbox("access to localhost is not allowed".into()));
    }

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(ToolError::Sandbox(
                "access to private IP addresses is not allowed".into(),
            ));
        }
    }

    Ok(())
}

/// Loopback, RFC1918, link-local, and IPv6 unique-local ranges.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, _, _] = v4.octets();
            v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || a == 10
                || (a == 172 && (16..=31).contains(&b))
                || (a == 192 && b == 168)
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // fe80::/10 link-local
                || (segments[0] & 0xffc0) == 0xfe80
                // fc00::/7 unique-local
                || (segments[0] & 0xfe00) == 0xfc00
        }
    }
}

/// Drop every `<...>` tag, leaving the text between them.
fn strip_html_tags(html: &str) -> String {
    let re = Regex::new(r"<[^>]*>").expect("static regex");
    re.replace_all(html, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(url: &str) -> Result<(), ToolError> {
        check_url_allowed(&reqwest::Url::parse(url).unwrap())
    }

    #[test]
    fn public_urls_allowed() {
        assert!(allowed("https://example.com/page").is_ok());
        assert!(allowed("http://93.184.216.34/").is_ok());
    }

    #[test]
    fn non_http_schemes_rejected() {
        let err = allowed("ftp://example.com/file").unwrap_err();
        assert!(matches!(err, ToolError::Sandbox(_)));
        assert!(allowed("file:///etc/passwd").is_err());
    }

    #[test]
    fn localhost_rejected() {
        assert!(allowed("http://localhost:8080/admin").is_err());
        assert!(allowed("http://LOCALHOST/").is_err());
    }

    #[test]
    fn loopback_and_private_v4_rejected() {
        for url in [
            "http://127.0.0.1/",
            "http://10.1.2.3/",
            "http://172.16.0.1/",
            "http://172.31.255.255/",
            "http://192.168.1.1/admin",
            "http://169.254.169.254/latest/meta-data/",
            "http://0.0.0.0/",
        ] {
            assert!(allowed(url).is_err(), "{url} should be rejected");
        }
    }

    #[test]
    fn adjacent_public_ranges_allowed() {
        assert!(allowed("http://172.15.0.1/").is_ok());
        assert!(allowed("http://172.32.0.1/").is_ok());
        assert!(allowed("http://11.0.0.1/").is_ok());
    }

    #[test]
    fn private_v6_rejected() {
        assert!(allowed("http://[::1]/").is_err());
        assert!(allowed("http://[fe80::1]/").is_err());
        assert!(allowed("http://[fc00::1]/").is_err());
        assert!(allowed("http://[fd12:3456::1]/").is_err());
        assert!(allowed("http://[2001:db8::1]/").is_ok());
    }

    #[test]
    fn strip_tags_leaves_text() {
        assert_eq!(
            strip_html_tags("<p>Hello <b>world</b></p>"),
            "Hello world"
        );
        assert_eq!(strip_html_tags("no tags"), "no tags");
    }

    #[test]
    fn parse_search_results() {
        let html = r#"
            <div><a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com">Example <b>Site</b></a></div>
            <div><a rel="nofollow" class="result__a" href="https://rust-lang.org">Rust Language</a></div>
        "#;
        let results = WebSearchTool::parse_results(html, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "Example Site");
        assert!(results[0].1.starts_with("https://duckduckgo.com/l/"));
        assert_eq!(results[1].1, "https://rust-lang.org");
    }

    #[test]
    fn parse_respects_limit() {
        let html = r#"
            <a class="result__a" href="https://a.com">A</a>
            <a class="result__a" href="https://b.com">B</a>
            <a class="result__a" href="https://c.com">C</a>
        "#;
        assert_eq!(WebSearchTool::parse_results(html, 2).len(), 2);
    }

    #[test]
    fn parse_empty_page_yields_nothing() {
        assert!(WebSearchTool::parse_results("<html></html>", 5).is_empty());
    }
}

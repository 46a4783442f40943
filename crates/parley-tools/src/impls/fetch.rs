use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};

use async_trait::async_trait;
use parley_core::config::FetchConfig;
use parley_core::UserId;
use parley_llm::ToolDefinition;
use regex::Regex;
use reqwest::redirect::Policy;
use serde::Deserialize;

use crate::error::{Result, ToolError};
use crate::registry::{Tool, ToolOutcome};

const MAX_REDIRECTS: u8 = 5;
const MAX_OUTPUT_CHARS: usize = 5000;
const METADATA_ADDR: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

#[derive(Deserialize)]
struct FetchArgs {
    url: String,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    method: Option<String>,
}

/// Rejects everything that isn't a garden-variety public http(s) URL:
/// non-http(s) schemes, IP literals and hostnames that resolve to
/// loopback/private/link-local/multicast ranges, the cloud metadata
/// address, and `.local`/`localhost` names. Redirects are followed
/// manually (the underlying client never auto-follows) so every hop is
/// re-validated the same way the initial URL was.
fn validate_url_is_safe(url: &url::Url, extra_blocked_hosts: &[String]) -> Result<()> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ToolError::UrlRejected(format!("scheme not permitted: {}", url.scheme())));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ToolError::UrlRejected("url has no host".to_string()))?;

    let host_lower = host.to_ascii_lowercase();
    if host_lower == "localhost" || host_lower.ends_with(".local") {
        return Err(ToolError::UrlRejected(format!("host not permitted: {host}")));
    }
    if extra_blocked_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host_lower)) {
        return Err(ToolError::UrlRejected(format!("host is blocklisted: {host}")));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        validate_ip_is_safe(ip)?;
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| ToolError::UrlRejected(format!("could not resolve host: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(ToolError::UrlRejected("host did not resolve to any address".to_string()));
    }
    for addr in addrs {
        validate_ip_is_safe(addr.ip())?;
    }
    Ok(())
}

fn validate_ip_is_safe(ip: IpAddr) -> Result<()> {
    let blocked = match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4 == METADATA_ADDR
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_multicast() || v6.is_unspecified() || is_unique_local_v6(&v6)
        }
    };
    if blocked {
        Err(ToolError::UrlRejected(format!("address not permitted: {ip}")))
    } else {
        Ok(())
    }
}

fn is_unique_local_v6(v6: &std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

fn strip_html(body: &str) -> String {
    let without_scripts = Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</\1>")
        .unwrap()
        .replace_all(body, " ");
    let without_tags = Regex::new(r"(?s)<[^>]+>").unwrap().replace_all(&without_scripts, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let collapsed: Vec<&str> = decoded.split_whitespace().collect();
    collapsed.join(" ")
}

fn truncate(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_length).collect();
    format!("{truncated}…")
}

pub struct FetchTool {
    client: reqwest::Client,
    config: FetchConfig,
}

impl FetchTool {
    pub fn new(config: FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .expect("reqwest client with no automatic redirects always builds");
        Self { client, config }
    }

    async fn fetch_validated(&self, start_url: &str) -> Result<String> {
        let mut current = url::Url::parse(start_url).map_err(|e| ToolError::UrlRejected(e.to_string()))?;
        for _ in 0..=MAX_REDIRECTS {
            validate_url_is_safe(&current, &self.config.extra_blocked_hosts)?;
            let resp = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| ToolError::Request(e.to_string()))?;

            if resp.status().is_redirection() {
                let location = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| ToolError::Request("redirect with no location header".to_string()))?;
                current = current
                    .join(location)
                    .map_err(|e| ToolError::UrlRejected(e.to_string()))?;
                continue;
            }
            if !resp.status().is_success() {
                return Err(ToolError::Request(format!("unexpected status: {}", resp.status())));
            }
            return resp.text().await.map_err(|e| ToolError::Request(e.to_string()));
        }
        Err(ToolError::UrlRejected("too many redirects".to_string()))
    }

    /// `method: "jina"` routes the fetch through a configured Jina Reader
    /// proxy (`https://r.jina.ai/{url}`-shaped), which renders the target
    /// page to clean markdown server-side. The proxy endpoint itself still
    /// goes through the same SSRF validation as any other fetch target;
    /// the page the proxy fetches on our behalf is outside our network
    /// boundary so is not re-validated.
    async fn fetch_via_jina(&self, start_url: &str) -> Result<String> {
        let base = self
            .config
            .jina_reader_base_url
            .as_ref()
            .ok_or_else(|| ToolError::UrlRejected("jina reader not configured".to_string()))?;
        let proxied = format!("{}/{}", base.trim_end_matches('/'), start_url);
        let url = url::Url::parse(&proxied).map_err(|e| ToolError::UrlRejected(e.to_string()))?;
        validate_url_is_safe(&url, &self.config.extra_blocked_hosts)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ToolError::Request(format!("unexpected status: {}", resp.status())));
        }
        resp.text().await.map_err(|e| ToolError::Request(e.to_string()))
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "url_fetch"
    }

    fn definitions(&self, enabled: &HashSet<String>) -> Vec<ToolDefinition> {
        if !enabled.contains(self.name()) {
            return vec![];
        }
        vec![ToolDefinition {
            name: "url_fetch".to_string(),
            description: "Fetch a public web page and extract its readable article text.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "The URL to fetch." },
                    "max_length": { "type": "integer", "description": "Maximum characters of extracted text to return." },
                    "method": {
                        "type": "string",
                        "enum": ["default", "jina"],
                        "description": "\"jina\" routes the fetch through a reader proxy that renders the page to clean markdown, when one is configured."
                    }
                },
                "required": ["url"],
            }),
        }]
    }

    fn function_names(&self) -> Vec<&str> {
        vec!["url_fetch"]
    }

    async fn execute(&self, _user_id: UserId, _function_name: &str, arguments_json: &str) -> ToolOutcome {
        let args: FetchArgs = match serde_json::from_str(arguments_json) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::Text(format!("invalid arguments: {e}")),
        };
        let use_jina = args.method.as_deref() == Some("jina");
        let result = if use_jina {
            self.fetch_via_jina(&args.url).await
        } else {
            self.fetch_validated(&args.url).await
        };
        match result {
            Ok(body) => {
                let text = if use_jina { body } else { strip_html(&body) };
                let max_length = args.max_length.unwrap_or(MAX_OUTPUT_CHARS);
                ToolOutcome::Text(truncate(&text, max_length))
            }
            Err(e) => ToolOutcome::Text(format!("fetch failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        let url = url::Url::parse("file:///etc/passwd").unwrap();
        assert!(validate_url_is_safe(&url, &[]).is_err());
    }

    #[test]
    fn rejects_loopback_ip_literal() {
        let url = url::Url::parse("http://127.0.0.1/secret").unwrap();
        assert!(validate_url_is_safe(&url, &[]).is_err());
    }

    #[test]
    fn rejects_cloud_metadata_address() {
        let url = url::Url::parse("http://169.254.169.254/latest/meta-data/").unwrap();
        assert!(validate_url_is_safe(&url, &[]).is_err());
    }

    #[test]
    fn rejects_private_range_and_localhost_names() {
        assert!(validate_url_is_safe(&url::Url::parse("http://10.0.0.5/").unwrap(), &[]).is_err());
        assert!(validate_url_is_safe(&url::Url::parse("http://localhost:8080/").unwrap(), &[]).is_err());
        assert!(validate_url_is_safe(&url::Url::parse("http://printer.local/").unwrap(), &[]).is_err());
    }

    #[test]
    fn rejects_extra_blocked_hosts() {
        let url = url::Url::parse("http://internal.example.com/").unwrap();
        assert!(validate_url_is_safe(&url, &["internal.example.com".to_string()]).is_err());
    }

    #[test]
    fn strip_html_drops_tags_and_scripts() {
        let html = "<html><head><script>evil()</script></head><body><p>Hello <b>world</b></p></body></html>";
        assert_eq!(strip_html(html), "Hello world");
    }

    #[test]
    fn truncate_appends_ellipsis_when_over_limit() {
        assert_eq!(truncate("hello world", 5), "hello…");
        assert_eq!(truncate("hi", 5), "hi");
    }

    #[tokio::test]
    async fn jina_method_without_configured_reader_fails_cleanly() {
        let tool = FetchTool::new(FetchConfig::default());
        let outcome = tool
            .execute(UserId(1), "url_fetch", r#"{"url":"https://example.com","method":"jina"}"#)
            .await;
        assert!(outcome.into_text().contains("jina reader not configured"));
    }

    #[test]
    fn default_max_output_is_five_thousand_chars() {
        assert_eq!(MAX_OUTPUT_CHARS, 5000);
    }
}

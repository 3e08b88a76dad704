//! 搜索工具：域名白名单、超时、结果大小限制
//!
//! 接受 query（拼接到配置的搜索端点）或直接的 url；仅允许白名单域名；
//! HTML 响应做轻量标签剥离，超过 max_result_chars 时截断并追加 ...[truncated]。

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::tools::Tool;

/// 搜索工具：抓取 URL 内容，仅允许白名单域名
pub struct SearchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    search_endpoint: String,
    max_result_chars: usize,
}

/// 简易去除 HTML 标签
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut prev_whitespace = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => {
                let is_whitespace = c.is_whitespace();
                if is_whitespace && prev_whitespace {
                    continue;
                }
                prev_whitespace = is_whitespace;
                out.push(if is_whitespace { ' ' } else { c });
            }
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// 判断内容是否像 HTML
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.starts_with("<html")
        || s.starts_with("<HTML")
        || (s.len() > 20 && s.contains('<') && (s.contains("</") || s.contains("<meta") || s.contains("<head")))
}

/// 从 URL 中提取 host
fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let url = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let host = url.split('/').next()?;
    let host = host.split(':').next()?;
    Some(host.to_lowercase())
}

impl SearchTool {
    pub fn new(
        allowed_domains: Vec<String>,
        search_endpoint: impl Into<String>,
        timeout_secs: u64,
        max_result_chars: usize,
    ) -> Self {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36")
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains,
            search_endpoint: search_endpoint.into(),
            max_result_chars,
        }
    }

    fn is_allowed(&self, url: &str) -> Result<(), String> {
        let domain = extract_domain(url).ok_or_else(|| "Invalid or missing URL".to_string())?;
        if self.allowed_domains.contains(&domain) {
            return Ok(());
        }
        Err(format!("Domain not in allowlist: {}", domain))
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        self.is_allowed(url)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {}", e))?;
        let body = body.strip_prefix('\u{FEFF}').unwrap_or(&body);

        let body = if looks_like_html(body) {
            strip_html_tags(body)
        } else {
            body.to_string()
        };

        let len = body.chars().count();
        if len > self.max_result_chars {
            Ok(body.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]")
        } else {
            Ok(body)
        }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the web or fetch a URL (domain allowlist). Args: {\"query\": \"keywords\"} or {\"url\": \"https://...\"}."
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let url = match args.get("url").and_then(|v| v.as_str()).map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if query.is_empty() {
                    return Err("Missing query or url".to_string());
                }
                format!("{}{}", self.search_endpoint, urlencode(&query))
            }
        };

        tracing::info!(url = %url, "search tool fetch");
        self.fetch(&url).await
    }
}

/// 最小化的查询串转义（空格与保留字符）
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(c),
            ' ' => out.push('+'),
            _ => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).as_bytes() {
                    out.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> SearchTool {
        SearchTool::new(
            vec!["en.wikipedia.org".into()],
            "https://en.wikipedia.org/w/index.php?search=",
            5,
            1000,
        )
    }

    #[tokio::test]
    async fn test_disallowed_domain_rejected() {
        let t = tool();
        let result = t
            .execute(serde_json::json!({"url": "https://evil.example.com/x"}))
            .await;
        assert!(result.unwrap_err().contains("not in allowlist"));
    }

    #[tokio::test]
    async fn test_missing_query_and_url_rejected() {
        let t = tool();
        let result = t.execute(serde_json::json!({})).await;
        assert!(result.unwrap_err().contains("Missing"));
    }

    #[test]
    fn test_strip_html_tags() {
        let text = strip_html_tags("<html><body><p>Seoul  is</p> <b>sunny</b></body></html>");
        assert_eq!(text, "Seoul is sunny");
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://en.wikipedia.org/wiki/Seoul").as_deref(),
            Some("en.wikipedia.org")
        );
        assert_eq!(extract_domain("ftp://x"), None);
    }

    #[test]
    fn test_urlencode_spaces_and_unicode() {
        assert_eq!(urlencode("rust lang"), "rust+lang");
        assert_eq!(urlencode("서울"), "%EC%84%9C%EC%9A%B8");
    }
}

//! Web tools: fetch a page, search the web.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Tool;
use crate::core::types::ToolOutput;
use crate::io::prompt::clip;

const AGENT: &str = concat!("taskloop/", env!("CARGO_PKG_VERSION"));
const MAX_SEARCH_RESULTS: usize = 10;

static RESULT_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.result__a").expect("result link selector"));
static RESULT_SNIPPET: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".result__snippet").expect("result snippet selector"));

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("build web tool http client")
}

#[derive(Debug, Deserialize)]
pub struct VisitWebPageArgs {
    pub url: String,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub cookies: Option<BTreeMap<String, String>>,
}

pub struct VisitWebPage {
    client: Client,
    output_limit_bytes: usize,
}

impl VisitWebPage {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            output_limit_bytes,
        })
    }
}

fn request_headers(args: &VisitWebPageArgs) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(AGENT));
    for (name, value) in args.headers.iter().flatten() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name `{name}`"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header `{name}`"))?;
        headers.insert(name, value);
    }
    if let Some(cookies) = args.cookies.as_ref().filter(|c| !c.is_empty()) {
        let joined = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&joined).context("invalid cookie value")?,
        );
    }
    Ok(headers)
}

impl Tool for VisitWebPage {
    type Args = VisitWebPageArgs;

    fn name(&self) -> &'static str {
        "visit_web_page"
    }

    fn description(&self) -> &'static str {
        "Fetch a web page and return its source HTML."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "http or https URL of the page"
                },
                "headers": {
                    "type": "object",
                    "additionalProperties": {"type": "string"},
                    "description": "Extra request headers (optional)"
                },
                "cookies": {
                    "type": "object",
                    "additionalProperties": {"type": "string"},
                    "description": "Cookies to send, name to value (optional)"
                }
            },
            "required": ["url"]
        })
    }

    fn run(&self, args: VisitWebPageArgs) -> Result<ToolOutput> {
        let url = args.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("only http and https URLs are supported, got `{url}`");
        }
        let response = self
            .client
            .get(url)
            .headers(request_headers(&args)?)
            .send()
            .with_context(|| format!("fetch {url}"))?;
        let status = response.status();
        let body = response.text().with_context(|| format!("read body of {url}"))?;
        let content = clip(&body, self.output_limit_bytes);

        let output = if status.is_success() {
            ToolOutput::ok(content)
        } else {
            ToolOutput {
                content,
                ..ToolOutput::failure(format!("HTTP {status}"))
            }
        };
        Ok(output.with_metadata("status", status.as_u16()))
    }
}

#[derive(Debug, Deserialize)]
pub struct WebPageSearchArgs {
    pub query: String,
}

/// One parsed search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub position: usize,
    pub title: String,
    pub link: String,
    pub snippet: String,
}

pub struct WebPageSearch {
    client: Client,
    search_url: String,
}

impl WebPageSearch {
    pub fn new(search_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            search_url: search_url.to_string(),
        })
    }
}

impl Tool for WebPageSearch {
    type Args = WebPageSearchArgs;

    fn name(&self) -> &'static str {
        "web_page_search"
    }

    fn description(&self) -> &'static str {
        "Search the web and return the top results (title, link, snippet)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"}
            },
            "required": ["query"]
        })
    }

    fn run(&self, args: WebPageSearchArgs) -> Result<ToolOutput> {
        let query = args.query.trim();
        if query.is_empty() {
            return Ok(ToolOutput::failure("query must not be empty"));
        }
        let html = self
            .client
            .get(&self.search_url)
            .query(&[("q", query)])
            .header(USER_AGENT, AGENT)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .with_context(|| format!("search `{query}`"))?;

        let results = parse_search_results(&html);
        let content = if results.is_empty() {
            format!("No results for `{query}`")
        } else {
            serde_json::to_string_pretty(&results).context("encode search results")?
        };
        Ok(ToolOutput::ok(content).with_metadata("results", results.len()))
    }
}

/// Parse an HTML results page: each `a.result__a` anchor is a hit, and the
/// `.result__snippet` inside its enclosing `.result` block is its snippet.
pub fn parse_search_results(html: &str) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT_LINK)
        .take(MAX_SEARCH_RESULTS)
        .enumerate()
        .map(|(index, anchor)| {
            let snippet = result_block(anchor)
                .and_then(|block| block.select(&RESULT_SNIPPET).next())
                .map(element_text)
                .unwrap_or_default();
            SearchResult {
                position: index + 1,
                title: element_text(anchor),
                link: anchor
                    .value()
                    .attr("href")
                    .map(normalize_link)
                    .unwrap_or_default(),
                snippet,
            }
        })
        .collect()
}

fn result_block<'a>(anchor: ElementRef<'a>) -> Option<ElementRef<'a>> {
    anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|element| element.value().classes().any(|class| class == "result"))
}

fn normalize_link(link: &str) -> String {
    if link.starts_with("//") {
        format!("https:{link}")
    } else {
        link.to_string()
    }
}

/// Text content with runs of whitespace collapsed.
fn element_text(element: ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"
<div class="result results_links web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fdocs.rs&amp;rut=1">Docs.rs &amp; <b>crates</b></a>
  </h2>
  <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">Documentation for <b>Rust</b> crates</a>
</div>
<div class="result results_links web-result">
  <h2 class="result__title">
    <a class="result__a" href="https://crates.io/">crates.io</a>
  </h2>
</div>
"#;

    #[test]
    fn parses_titles_links_and_snippets() {
        let results = parse_search_results(RESULTS_PAGE);
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0],
            SearchResult {
                position: 1,
                title: "Docs.rs & crates".to_string(),
                link: "https://duckduckgo.com/l/?uddg=https%3A%2F%2Fdocs.rs&rut=1".to_string(),
                snippet: "Documentation for Rust crates".to_string(),
            }
        );
        assert_eq!(results[1].link, "https://crates.io/");
        assert_eq!(results[1].snippet, "");
    }

    #[test]
    fn decodes_named_and_numeric_entities_once() {
        let page = r#"<a class="result__a" href="https://doc.rust-lang.org/book/">Rust&#8217;s &mdash; book &#x2F; guide &amp;lt;3</a>"#;
        let results = parse_search_results(page);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Rust\u{2019}s \u{2014} book / guide &lt;3");
        assert_eq!(results[0].link, "https://doc.rust-lang.org/book/");
        assert_eq!(results[0].snippet, "");
    }

    #[test]
    fn caps_results_at_ten() {
        let page: String = (0..15)
            .map(|i| format!(r#"<div class="result"><a class="result__a" href="https://e.com/{i}">hit {i}</a></div>"#))
            .collect();
        let results = parse_search_results(&page);
        assert_eq!(results.len(), MAX_SEARCH_RESULTS);
        assert_eq!(results[9].title, "hit 9");
        assert_eq!(results[9].position, 10);
    }

    #[test]
    fn page_without_results_parses_empty() {
        assert!(parse_search_results("<html><body>No results.</body></html>").is_empty());
    }

    #[test]
    fn cookies_become_one_header() {
        let args = VisitWebPageArgs {
            url: "https://example.com".to_string(),
            headers: Some(BTreeMap::from([("X-Trace".to_string(), "1".to_string())])),
            cookies: Some(BTreeMap::from([
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ])),
        };
        let headers = request_headers(&args).expect("headers");
        assert_eq!(headers[COOKIE], "a=1; b=2");
        assert_eq!(headers["x-trace"], "1");
        assert_eq!(headers[USER_AGENT], AGENT);
    }

    #[test]
    fn non_http_urls_are_rejected() {
        let tool = VisitWebPage::new(Duration::from_secs(1), 1024).expect("tool");
        let err = tool
            .run(VisitWebPageArgs {
                url: "file:///etc/passwd".to_string(),
                headers: None,
                cookies: None,
            })
            .expect_err("rejected");
        assert!(err.to_string().contains("only http and https"));
    }
}

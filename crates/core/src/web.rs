use crate::extractor::html_to_text;
use crate::normalizer::clean_text;
use crate::traits::WebSearch;
use crate::{EvidenceSourceError, WebHit};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use url::Url;

pub const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
pub const DUCKDUCKGO_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
pub const SCRAPED_CONTENT_CHARS: usize = 3000;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const PAGE_TIMEOUT: Duration = Duration::from_secs(5);
const TIME_BUDGET: Duration = Duration::from_secs(15);
// Scraping stops this long before the budget runs out so the hits still get returned.
const BUDGET_MARGIN: Duration = Duration::from_millis(500);
// Hits with less content than this get their page fetched.
const THIN_CONTENT_CHARS: usize = 200;
const SUBSTANTIAL_SECTION_CHARS: usize = 100;

/// Host part of a URL. Bare hosts without a scheme are accepted; anything
/// unparseable is returned unchanged.
pub fn extract_domain(raw: &str) -> String {
    let parsed = Url::parse(raw).or_else(|_| Url::parse(&format!("https://{raw}")));
    parsed
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| raw.to_string())
}

pub fn parse_tavily_results(body: &Value) -> Vec<WebHit> {
    body.pointer("/results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .map(|item| {
                    let text = |key: &str| {
                        item.get(key)
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string()
                    };
                    let url = text("url");
                    let snippet = text("content");
                    let raw_content = text("raw_content");
                    WebHit {
                        title: text("title"),
                        domain: extract_domain(&url),
                        content: Some(if raw_content.is_empty() {
                            snippet.clone()
                        } else {
                            raw_content
                        }),
                        url,
                        snippet,
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn inline_text(fragment: &str) -> Result<String, regex::Error> {
    Ok(html_to_text(fragment)?.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Result links on the HTML endpoint go through a redirect carrying the
/// target in `uddg`.
fn resolve_result_link(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };

    Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, target)| target.into_owned())
        })
        .unwrap_or(absolute)
}

pub fn parse_duckduckgo_results(
    html: &str,
    max_results: usize,
) -> Result<Vec<WebHit>, regex::Error> {
    let title = Regex::new(r#"(?is)<a\s+([^>]*class="result__a"[^>]*)>(.*?)</a>"#)?;
    let snippet = Regex::new(r#"(?is)<a\s+[^>]*class="result__snippet"[^>]*>(.*?)</a>"#)?;
    let href = Regex::new(r#"href="([^"]*)""#)?;

    let mut hits = Vec::new();
    for block in html.split("result__body").skip(1) {
        if hits.len() >= max_results {
            break;
        }
        let Some(title_match) = title.captures(block) else {
            continue;
        };
        let Some(link) = href.captures(&title_match[1]) else {
            continue;
        };

        let url = resolve_result_link(&link[1].replace("&amp;", "&"));
        let snippet_text = match snippet.captures(block) {
            Some(found) => inline_text(&found[1])?,
            None => String::new(),
        };

        hits.push(WebHit {
            title: inline_text(&title_match[2])?,
            domain: extract_domain(&url),
            url,
            snippet: snippet_text,
            content: None,
        });
    }

    Ok(hits)
}

/// Readable text of a page: the first substantial `article` or `main`
/// section, otherwise the body, cleaned and capped.
pub fn page_text(html: &str) -> Result<String, regex::Error> {
    let chrome = Regex::new(
        r"(?is)<nav\b.*?</nav\s*>|<footer\b.*?</footer\s*>|<header\b.*?</header\s*>",
    )?;
    let html = chrome.replace_all(html, " ");

    let mut content = String::new();
    for pattern in [
        r"(?is)<article\b[^>]*>(.*?)</article\s*>",
        r"(?is)<main\b[^>]*>(.*?)</main\s*>",
        r"(?is)<body\b[^>]*>(.*)</body\s*>",
    ] {
        if let Some(section) = Regex::new(pattern)?.captures(&html) {
            content = clean_text(&html_to_text(&section[1])?);
            if content.chars().count() > SUBSTANTIAL_SECTION_CHARS {
                break;
            }
        }
    }

    if content.is_empty() {
        content = clean_text(&html_to_text(&html)?);
    }

    Ok(content.chars().take(SCRAPED_CONTENT_CHARS).collect())
}

async fn scrape_page(
    client: Client,
    url: String,
    timeout: Duration,
) -> Result<String, EvidenceSourceError> {
    let response = client.get(&url).timeout(timeout).send().await?;
    if !response.status().is_success() {
        return Err(EvidenceSourceError::BackendResponse {
            backend: url,
            details: response.status().to_string(),
        });
    }
    let html = response.text().await?;
    page_text(&html).map_err(|error| EvidenceSourceError::Request(error.to_string()))
}

/// Live web search: Tavily when a key is configured, the DuckDuckGo HTML
/// endpoint otherwise or when Tavily fails. Thin hits are enriched by
/// fetching their pages in parallel.
#[derive(Debug, Clone)]
pub struct WebSearchClient {
    client: Client,
    tavily_api_key: Option<String>,
    tavily_endpoint: String,
    duckduckgo_endpoint: String,
    scrape: bool,
    page_timeout: Duration,
    time_budget: Duration,
}

impl WebSearchClient {
    pub fn new(tavily_api_key: Option<String>) -> Result<Self, EvidenceSourceError> {
        Ok(Self {
            client: Client::builder().user_agent(USER_AGENT).build()?,
            tavily_api_key,
            tavily_endpoint: TAVILY_ENDPOINT.to_string(),
            duckduckgo_endpoint: DUCKDUCKGO_ENDPOINT.to_string(),
            scrape: true,
            page_timeout: PAGE_TIMEOUT,
            time_budget: TIME_BUDGET,
        })
    }

    pub fn with_endpoints(
        mut self,
        tavily: impl Into<String>,
        duckduckgo: impl Into<String>,
    ) -> Self {
        self.tavily_endpoint = tavily.into();
        self.duckduckgo_endpoint = duckduckgo.into();
        self
    }

    pub fn with_scraping(mut self, scrape: bool) -> Self {
        self.scrape = scrape;
        self
    }

    /// Total time one search may take, scraping included.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    async fn search_tavily(
        &self,
        api_key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebHit>, EvidenceSourceError> {
        let response = self
            .client
            .post(&self.tavily_endpoint)
            .timeout(SEARCH_TIMEOUT)
            .json(&json!({
                "api_key": api_key,
                "query": query,
                "search_depth": "advanced",
                "max_results": max_results,
                "include_raw_content": true,
                "include_answer": false,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EvidenceSourceError::BackendResponse {
                backend: "tavily".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        Ok(parse_tavily_results(&body))
    }

    async fn search_duckduckgo(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebHit>, EvidenceSourceError> {
        let url = Url::parse_with_params(&self.duckduckgo_endpoint, &[("q", query)])?;
        let response = self.client.get(url).timeout(SEARCH_TIMEOUT).send().await?;

        if !response.status().is_success() {
            return Err(EvidenceSourceError::BackendResponse {
                backend: "duckduckgo".to_string(),
                details: response.status().to_string(),
            });
        }

        let html = response.text().await?;
        parse_duckduckgo_results(&html, max_results)
            .map_err(|error| EvidenceSourceError::Request(error.to_string()))
    }

    /// Fetches thin hits until the deadline. Pages still loading at the
    /// deadline are abandoned and their hits keep the snippet as content.
    async fn enrich(&self, hits: &mut [WebHit], deadline: Instant) {
        let mut tasks = JoinSet::new();
        for (position, hit) in hits.iter().enumerate() {
            let thin = hit
                .content
                .as_ref()
                .map_or(true, |content| content.chars().count() < THIN_CONTENT_CHARS);
            if thin && !hit.url.is_empty() {
                let client = self.client.clone();
                let url = hit.url.clone();
                let timeout = self.page_timeout;
                tasks.spawn(async move { (position, scrape_page(client, url, timeout).await) });
            }
        }

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((position, Ok(content))))) if !content.is_empty() => {
                    hits[position].content = Some(content);
                }
                Ok(Some(Ok((position, Err(error))))) => {
                    tracing::debug!(
                        url = %hits[position].url,
                        error = %error,
                        "page scrape failed"
                    );
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        pending = tasks.len(),
                        "page scraping hit the deadline, using snippets"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        for hit in hits.iter_mut() {
            if hit.content.as_ref().map_or(true, String::is_empty) {
                hit.content = Some(hit.snippet.clone());
            }
        }
    }
}

#[async_trait]
impl WebSearch for WebSearchClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebHit>, EvidenceSourceError> {
        let started = Instant::now();
        let mut hits = match &self.tavily_api_key {
            Some(api_key) => match self.search_tavily(api_key, query, max_results).await {
                Ok(hits) => hits,
                Err(error) => {
                    tracing::warn!(
                        query,
                        error = %error,
                        "tavily search failed, falling back to duckduckgo"
                    );
                    self.search_duckduckgo(query, max_results).await?
                }
            },
            None => self.search_duckduckgo(query, max_results).await?,
        };
        hits.truncate(max_results);

        if self.scrape && !hits.is_empty() {
            let deadline = started + self.time_budget.saturating_sub(BUDGET_MARGIN);
            self.enrich(&mut hits, deadline).await;
        }

        tracing::debug!(query, hits = hits.len(), "web search");
        Ok(hits)
    }
}

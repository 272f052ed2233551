use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};
use tracing::{debug, info, warn};

use plumewatch_common::{EventGroup, EvidenceBundle, SearchSnippet, TtlCache};

/// Extracted article text shorter than this is treated as an extraction
/// failure; the feed summary is used instead.
pub const MIN_ARTICLE_CHARS: usize = 200;

/// Corroboration snippets requested per group.
const MAX_SNIPPETS: usize = 5;

/// Keywords derived for the narrower corroboration search.
const MAX_DERIVED_KEYWORDS: usize = 5;

// --- PageScraper ---

#[async_trait]
pub trait PageScraper: Send + Sync {
    /// Main textual content of a page, or empty string when nothing usable
    /// could be extracted. Errors mean the fetch itself failed.
    async fn scrape(&self, url: &str) -> Result<String>;
    fn name(&self) -> &str;
}

/// Plain HTTP fetch with layered extraction: Readability main-content pass,
/// then a raw paragraph concatenation fallback.
pub struct HttpScraper {
    http: reqwest::Client,
    cache: TtlCache<String, String>,
}

impl HttpScraper {
    pub fn new(cache: TtlCache<String, String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .user_agent("plumewatch/0.1 (industrial incident monitor)")
                .build()
                .expect("Failed to build HTTP client"),
            cache,
        }
    }
}

#[async_trait]
impl PageScraper for HttpScraper {
    async fn scrape(&self, url: &str) -> Result<String> {
        if let Some(cached) = self.cache.get(&url.to_string()) {
            return Ok(cached);
        }

        let parsed = url::Url::parse(url).context("Invalid URL")?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("Only http/https URLs are allowed, got: {}", parsed.scheme());
        }

        debug!(url, scraper = "http", "Scraping URL");

        let html = self
            .http
            .get(url)
            .send()
            .await
            .context("Article request failed")?
            .text()
            .await
            .context("Article body read failed")?;

        if html.is_empty() {
            warn!(url, scraper = "http", "Empty HTML response");
            return Ok(String::new());
        }

        let config = TransformConfig {
            readability: true,
            main_content: true,
            return_format: ReturnFormat::Markdown,
            filter_images: true,
            filter_svg: true,
            clean_html: true,
        };
        let input = TransformInput {
            url: Some(&parsed),
            content: html.as_bytes(),
            screenshot_bytes: None,
            encoding: None,
            selector_config: None,
            ignore_tags: None,
        };

        let mut text = transform_content_input(input, &config);

        if text.trim().len() < MIN_ARTICLE_CHARS {
            // Readability rejected the page; fall back to bare paragraphs.
            text = concat_paragraphs(&html);
        }

        let text = text.trim().to_string();
        self.cache.insert(url.to_string(), text.clone());
        Ok(text)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Fallback extraction: concatenate `<p>` contents, tags stripped.
pub(crate) fn concat_paragraphs(html: &str) -> String {
    let para_re = regex::Regex::new(r"(?is)<p[^>]*>(.*?)</p>").expect("valid regex");
    let tag_re = regex::Regex::new(r"<[^>]+>").expect("valid regex");

    let mut out = String::new();
    for cap in para_re.captures_iter(html) {
        let text = tag_re.replace_all(&cap[1], " ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&text);
        }
    }
    out
}

// --- WebSearcher ---

#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchSnippet>>;
}

/// Serper (Google Search) backend for the corroboration pass.
pub struct SerperSearcher {
    api_key: String,
    http: reqwest::Client,
}

#[derive(Debug, serde::Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
}

#[derive(Debug, serde::Deserialize)]
struct SerperResult {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl SerperSearcher {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

#[async_trait]
impl WebSearcher for SerperSearcher {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchSnippet>> {
        debug!(query, max_results, "Serper search");

        let body = serde_json::json!({
            "q": query,
            "num": max_results,
        });

        let resp = self
            .http
            .post("https://google.serper.dev/search")
            .header("X-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Serper API request failed")?;

        let data: SerperResponse = resp
            .json()
            .await
            .context("Failed to parse Serper response")?;

        Ok(data
            .organic
            .into_iter()
            .take(max_results)
            .map(|r| SearchSnippet {
                title: r.title,
                url: r.link,
                excerpt: r.snippet,
            })
            .collect())
    }
}

/// No-op searcher for when no search API key is configured. Resolutions then
/// cap at single-source confidence.
pub struct NoopSearcher;

#[async_trait]
impl WebSearcher for NoopSearcher {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchSnippet>> {
        Ok(Vec::new())
    }
}

// --- EvidenceGatherer ---

/// Collects supporting text for one EventGroup: the representative article's
/// body plus one narrower corroboration search. Every failure degrades to a
/// summary-only bundle; this stage never errors.
pub struct EvidenceGatherer {
    scraper: Box<dyn PageScraper>,
    searcher: Box<dyn WebSearcher>,
}

impl EvidenceGatherer {
    pub fn new(scraper: Box<dyn PageScraper>, searcher: Box<dyn WebSearcher>) -> Self {
        Self { scraper, searcher }
    }

    pub async fn gather(&self, group: &EventGroup) -> EvidenceBundle {
        let rep = group.representative();

        // Step A: article body, falling back to the feed summary.
        let article_text = match self.scraper.scrape(&rep.url).await {
            Ok(text) if text.len() >= MIN_ARTICLE_CHARS => text,
            Ok(_) => {
                debug!(url = rep.url, "Extraction below threshold, using feed summary");
                rep.summary.clone()
            }
            Err(e) => {
                warn!(url = rep.url, scraper = self.scraper.name(), error = %e, "Scrape failed, using feed summary");
                rep.summary.clone()
            }
        };

        // Step B: one narrower search keyed on entity/location clues.
        let keywords = derive_keywords(&rep.headline, &article_text);
        let snippets = if keywords.is_empty() {
            Vec::new()
        } else {
            let query = keywords.join(" ");
            match self.searcher.search(&query, MAX_SNIPPETS).await {
                Ok(snippets) => {
                    // The representative article corroborating itself is not
                    // independent evidence.
                    snippets
                        .into_iter()
                        .filter(|s| s.url != rep.url)
                        .collect()
                }
                Err(e) => {
                    warn!(query, error = %e, "Corroboration search failed");
                    Vec::new()
                }
            }
        };

        info!(
            group_key = group.group_key,
            article_chars = article_text.len(),
            snippets = snippets.len(),
            "Evidence gathered"
        );

        EvidenceBundle {
            event_group_key: group.group_key.clone(),
            article_text,
            snippets,
        }
    }
}

/// Tokens that never identify a facility or place: connectives plus the
/// incident vocabulary the feed keywords already cover.
const KEYWORD_STOPLIST: &[&str] = &[
    "the", "and", "after", "with", "this", "that", "bir", "fire", "blaze", "explosion", "smoke",
    "huge", "massive", "large", "yangın", "patlama", "duman", "büyük",
];

/// Derive 3–5 search keywords from the headline and article text: proper-noun
/// tokens first (facility and place names), keeping headline order.
pub(crate) fn derive_keywords(headline: &str, article_text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();

    let source = format!(
        "{headline}\n{}",
        ai_client::util::truncate_to_char_boundary(article_text, 500)
    );

    for token in source.split(|c: char| !c.is_alphanumeric()) {
        if keywords.len() >= MAX_DERIVED_KEYWORDS {
            break;
        }
        if token.chars().count() < 3 {
            continue;
        }
        let starts_upper = token.chars().next().is_some_and(|c| c.is_uppercase());
        if !starts_upper {
            continue;
        }
        let lowered = token.to_lowercase();
        // Sentence-initial connectives and generic incident words look like
        // proper nouns to this check; the feed query already carries the
        // incident terms, so slots go to entity and place tokens.
        if KEYWORD_STOPLIST.contains(&lowered.as_str()) {
            continue;
        }
        if keywords.iter().any(|k| k.to_lowercase() == lowered) {
            continue;
        }
        keywords.push(token.to_string());
    }

    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scraper_and_searcher_construct_with_bounded_timeouts() {
        let _ = HttpScraper::new(TtlCache::disabled());
        let _ = SerperSearcher::new("test-key");
    }

    #[test]
    fn concat_paragraphs_strips_tags() {
        let html = "<html><p>Fire crews <b>responded</b> quickly.</p><div>nav</div><p>The plant was evacuated.</p></html>";
        assert_eq!(
            concat_paragraphs(html),
            "Fire crews responded quickly.\nThe plant was evacuated."
        );
    }

    #[test]
    fn concat_paragraphs_skips_empty() {
        assert_eq!(concat_paragraphs("<p>  </p><p>text</p>"), "text");
    }

    #[test]
    fn concat_paragraphs_no_paragraphs() {
        assert_eq!(concat_paragraphs("<div>only divs</div>"), "");
    }

    #[test]
    fn derive_keywords_picks_proper_nouns() {
        let keywords = derive_keywords(
            "Fire at XYZ Textile plant in Kayseri",
            "The blaze started in the Kayseri OSB zone near the XYZ Textile warehouse.",
        );
        assert!(keywords.contains(&"XYZ".to_string()));
        assert!(keywords.contains(&"Textile".to_string()));
        assert!(keywords.contains(&"Kayseri".to_string()));
        assert!(keywords.len() <= 5);
    }

    #[test]
    fn derive_keywords_deduplicates_case_insensitively() {
        let keywords = derive_keywords("Kayseri fire", "KAYSERI blaze Kayseri");
        let kayseri = keywords
            .iter()
            .filter(|k| k.to_lowercase() == "kayseri")
            .count();
        assert_eq!(kayseri, 1);
    }

    #[test]
    fn derive_keywords_skips_generic_incident_words() {
        let keywords = derive_keywords("Fire at XYZ Textile plant", "");
        assert_eq!(keywords.first().map(String::as_str), Some("XYZ"));
        assert!(!keywords.iter().any(|k| k.eq_ignore_ascii_case("fire")));
    }

    #[test]
    fn derive_keywords_skips_short_tokens() {
        let keywords = derive_keywords("AB CD Fire", "");
        assert!(!keywords.contains(&"AB".to_string()));
        assert!(!keywords.contains(&"CD".to_string()));
    }

    #[test]
    fn derive_keywords_empty_input() {
        assert!(derive_keywords("", "").is_empty());
    }
}

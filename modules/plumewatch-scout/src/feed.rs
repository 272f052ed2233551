use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use plumewatch_common::{Candidate, TtlCache};

/// Candidate discovery collaborator. One query per keyword over a recency
/// window; failures degrade, never propagate.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(
        &self,
        keywords: &[String],
        window_days: u32,
        max_per_keyword: usize,
    ) -> Vec<Candidate>;
}

/// Google News RSS search backend.
///
/// Queries are memoized by full query string; news discovery churns on the
/// scale of minutes, so the injected cache should carry a minutes-scale TTL.
pub struct GoogleNewsFeed {
    http: reqwest::Client,
    cache: TtlCache<String, Vec<Candidate>>,
    lang: String,
    country: String,
}

impl GoogleNewsFeed {
    pub fn new(lang: &str, country: &str, cache: TtlCache<String, Vec<Candidate>>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("Failed to build HTTP client"),
            cache,
            lang: lang.to_string(),
            country: country.to_string(),
        }
    }

    fn query_url(&self, keyword: &str, window_days: u32) -> String {
        let query = format!("{keyword} when:{window_days}d");
        let ceid = format!("{}:{}", self.country, self.lang);
        let params = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("q", &query)
            .append_pair("hl", &self.lang)
            .append_pair("gl", &self.country)
            .append_pair("ceid", &ceid)
            .finish();
        format!("https://news.google.com/rss/search?{params}")
    }

    async fn fetch_one(&self, keyword: &str, window_days: u32) -> Result<Vec<Candidate>> {
        let url = self.query_url(keyword, window_days);

        if let Some(cached) = self.cache.get(&url) {
            return Ok(cached);
        }

        let body = self
            .http
            .get(&url)
            .send()
            .await
            .context("Feed request failed")?
            .bytes()
            .await
            .context("Feed body read failed")?;

        let feed = feed_rs::parser::parse(&body[..]).context("Feed parse failed")?;

        let candidates: Vec<Candidate> = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let headline = entry.title.map(|t| t.content)?;
                let url = entry.links.first().map(|l| l.href.clone())?;
                let summary = entry
                    .summary
                    .map(|s| strip_html(&s.content))
                    .unwrap_or_default();
                Some(Candidate {
                    headline,
                    url,
                    summary,
                    published_at: entry.published.map(|dt| dt.with_timezone(&Utc)),
                })
            })
            .collect();

        self.cache.insert(url, candidates.clone());
        Ok(candidates)
    }
}

#[async_trait]
impl FeedSource for GoogleNewsFeed {
    async fn fetch(
        &self,
        keywords: &[String],
        window_days: u32,
        max_per_keyword: usize,
    ) -> Vec<Candidate> {
        let window_days = window_days.max(1);
        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut all = Vec::new();

        for keyword in keywords {
            match self.fetch_one(keyword, window_days).await {
                Ok(candidates) => {
                    let mut kept = 0;
                    for candidate in candidates {
                        if kept >= max_per_keyword {
                            break;
                        }
                        if seen_urls.insert(candidate.url.clone()) {
                            all.push(candidate);
                            kept += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(keyword, error = %e, "Keyword fetch failed, skipping");
                }
            }
        }

        info!(
            keywords = keywords.len(),
            candidates = all.len(),
            "Feed fetch complete"
        );
        all
    }
}

/// Strip HTML tags, decode entities, collapse whitespace. Feed summaries
/// arrive as markup, and entity residue would pollute evidence text and
/// citation matching downstream.
pub(crate) fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(&out)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode the entities that actually show up in feed summaries. `&amp;`
/// goes last so its output is never re-decoded.
fn decode_entities(text: &str) -> String {
    let numeric = regex::Regex::new(r"&#(x?[0-9a-fA-F]+);").expect("valid regex");
    let text = numeric.replace_all(text, |caps: &regex::Captures| {
        let body = &caps[1];
        let code = match body.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => body.parse(),
        };
        code.ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

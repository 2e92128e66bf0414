use super::AdvisoryScraper;
use crate::error::{AppError, Result};
use crate::models::Advisory;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use tracing::{debug, info};

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));
static SPACE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("space pattern is valid"));

const NCIIPC_URL: &str = "https://nciipc.gov.in/alerts_advisories_more_2023.html";
const CYWARE_URL: &str = "https://cyware.com/search?search=india";

/// Regexes locating advisories on a listing page.
///
/// `item` marks the start of each advisory block; `cwe_name` and `summary` are
/// searched inside the block and read from their first capture group.
#[derive(Debug, Clone, Copy)]
pub struct ListingPatterns<'a> {
    pub item: &'a str,
    pub cwe_name: &'a str,
    pub summary: &'a str,
}

const NCIIPC_PATTERNS: ListingPatterns<'static> = ListingPatterns {
    item: r#"<li[^>]*class="[^"]*\bliList\b"#,
    cwe_name: r"(?s)<b(?:\s[^>]*)?>(.*?)</b>",
    summary: r#"(?s)class="[^"]*\badvisoryFont\b[^"]*"[^>]*>(.*?)</(?:span|p|div|font)>"#,
};

const CYWARE_PATTERNS: ListingPatterns<'static> = ListingPatterns {
    item: r#"class="[^"]*\bcy-panel\b[^"]*\bcy-card\b"#,
    cwe_name: r#"(?s)class="[^"]*\bcy-card__title\b[^"]*"[^>]*>(.*?)</[a-z0-9]+>"#,
    summary: r#"(?s)class="[^"]*\bcy-card__summary\b[^"]*"[^>]*>(.*?)</[a-z0-9]+>"#,
};

/// Scraper that fetches one listing page and extracts advisories with regexes.
///
/// Captured HTML is reduced to plain text before it becomes an [`Advisory`].
/// A block where neither field is found is skipped.
pub struct PatternScraper {
    name: String,
    listing_url: String,
    host: String,
    item: Regex,
    cwe_name: Regex,
    summary: Regex,
    client: Client,
}

impl PatternScraper {
    pub fn new(
        name: impl Into<String>,
        listing_url: impl Into<String>,
        host: impl Into<String>,
        patterns: ListingPatterns<'_>,
        client: Client,
    ) -> Result<Self> {
        let name = name.into();
        let compile = |field: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                AppError::Configuration(format!(
                    "invalid {} pattern for scraper '{}': {}",
                    field, name, e
                ))
            })
        };

        let item = compile("item", patterns.item)?;
        let cwe_name = compile("cwe_name", patterns.cwe_name)?;
        let summary = compile("summary", patterns.summary)?;
        for (field, regex) in [("cwe_name", &cwe_name), ("summary", &summary)] {
            if regex.captures_len() < 2 {
                return Err(AppError::Configuration(format!(
                    "{} pattern for scraper '{}' has no capture group",
                    field, name
                )));
            }
        }

        Ok(Self {
            name,
            listing_url: listing_url.into(),
            host: host.into(),
            item,
            cwe_name,
            summary,
            client,
        })
    }

    /// NCIIPC alerts and advisories list
    pub fn nciipc(client: Client) -> Result<Self> {
        Self::new("nciipc", NCIIPC_URL, "nciipc.gov.in", NCIIPC_PATTERNS, client)
    }

    /// Cyware news search results
    pub fn cyware(client: Client) -> Result<Self> {
        Self::new("cyware", CYWARE_URL, "cyware.com", CYWARE_PATTERNS, client)
    }

    /// Extract advisories from a listing page, in page order
    pub fn parse(&self, html: &str) -> Vec<Advisory> {
        let starts: Vec<usize> = self.item.find_iter(html).map(|m| m.start()).collect();

        starts
            .iter()
            .enumerate()
            .filter_map(|(i, &start)| {
                let end = starts.get(i + 1).copied().unwrap_or(html.len());
                let block = &html[start..end];
                let cwe = first_group(&self.cwe_name, block);
                let summary = first_group(&self.summary, block);
                Advisory::from_fields(cwe.as_deref(), summary.as_deref())
            })
            .collect()
    }

    fn scrape_error(&self, message: String) -> AppError {
        AppError::Scrape {
            source_name: self.name.clone(),
            message,
        }
    }
}

#[async_trait]
impl AdvisoryScraper for PatternScraper {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, url: &Url) -> bool {
        url.host_str()
            .map(|host| host == self.host || host.ends_with(&format!(".{}", self.host)))
            .unwrap_or(false)
    }

    async fn scrape(&self) -> Result<Vec<Advisory>> {
        debug!(scraper = %self.name, url = %self.listing_url, "Fetching advisory listing");

        let response = self
            .client
            .get(&self.listing_url)
            .send()
            .await
            .map_err(|e| self.scrape_error(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.scrape_error(format!("listing returned HTTP {}", status)));
        }

        let html = response
            .text()
            .await
            .map_err(|e| self.scrape_error(format!("failed to read body: {}", e)))?;

        let advisories = self.parse(&html);
        info!(
            scraper = %self.name,
            advisories = advisories.len(),
            "Scraped advisory listing"
        );
        Ok(advisories)
    }
}

fn first_group(pattern: &Regex, block: &str) -> Option<String> {
    pattern
        .captures(block)
        .and_then(|caps| caps.get(1))
        .map(|m| html_to_text(m.as_str()))
}

fn html_to_text(fragment: &str) -> String {
    let stripped = TAG_PATTERN.replace_all(fragment, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    SPACE_PATTERN.replace_all(decoded.trim(), " ").into_owned()
}

/// Advisory scraping
///
/// Scrapers turn an advisory website into `(cwe_name, summary)` records.
/// The registry picks the scraper for a requested URL.

pub mod pattern;

pub use pattern::{ListingPatterns, PatternScraper};

use crate::config::ScraperConfig;
use crate::error::{AppError, Result};
use crate::metrics::SCRAPE_RUNS_TOTAL;
use crate::models::Advisory;
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Source of advisory records
#[async_trait]
pub trait AdvisoryScraper: Send + Sync {
    /// Short source name used in logs and metrics
    fn name(&self) -> &str;

    /// Whether this scraper handles the given URL
    fn supports(&self, url: &Url) -> bool;

    /// Fetch and extract the current advisories
    async fn scrape(&self) -> Result<Vec<Advisory>>;
}

/// Ordered set of scrapers; the first one supporting a URL wins
pub struct ScraperRegistry {
    scrapers: Vec<Arc<dyn AdvisoryScraper>>,
    require_https: bool,
}

impl ScraperRegistry {
    pub fn new(require_https: bool) -> Self {
        Self {
            scrapers: Vec::new(),
            require_https,
        }
    }

    /// Registry with the NCIIPC and Cyware scrapers sharing one HTTP client.
    /// Certificates are verified by the client on every request.
    pub fn from_config(config: &ScraperConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        let mut registry = Self::new(config.require_https);
        registry.register(Arc::new(PatternScraper::nciipc(client.clone())?));
        registry.register(Arc::new(PatternScraper::cyware(client)?));
        Ok(registry)
    }

    pub fn register(&mut self, scraper: Arc<dyn AdvisoryScraper>) {
        self.scrapers.push(scraper);
    }

    pub fn names(&self) -> Vec<&str> {
        self.scrapers.iter().map(|s| s.name()).collect()
    }

    /// Scraper responsible for `url`
    pub fn resolve(&self, url: &str) -> Result<Arc<dyn AdvisoryScraper>> {
        let url = url.trim();
        if url.is_empty() {
            return Err(AppError::Validation("No URL provided".to_string()));
        }
        if self.require_https && !url.starts_with("https://") {
            return Err(AppError::Validation("URL does not use HTTPS".to_string()));
        }

        let parsed = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL '{}': {}", url, e)))?;

        self.scrapers
            .iter()
            .find(|s| s.supports(&parsed))
            .cloned()
            .ok_or_else(|| AppError::Validation("Unsupported URL".to_string()))
    }

    /// Resolve and run the scraper for `url`
    pub async fn scrape(&self, url: &str) -> Result<Vec<Advisory>> {
        let scraper = self.resolve(url)?;
        let source = scraper.name().to_string();

        match scraper.scrape().await {
            Ok(advisories) => {
                SCRAPE_RUNS_TOTAL.with_label_values(&[&source, "success"]).inc();
                info!(source = %source, advisories = advisories.len(), "Scraping completed");
                Ok(advisories)
            }
            Err(e) => {
                SCRAPE_RUNS_TOTAL.with_label_values(&[&source, "error"]).inc();
                error!(source = %source, error = %e, "Scraping failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScraper {
        host: &'static str,
        result: fn() -> Result<Vec<Advisory>>,
    }

    #[async_trait]
    impl AdvisoryScraper for FixedScraper {
        fn name(&self) -> &str {
            self.host
        }

        fn supports(&self, url: &Url) -> bool {
            url.host_str() == Some(self.host)
        }

        async fn scrape(&self) -> Result<Vec<Advisory>> {
            (self.result)()
        }
    }

    fn registry() -> ScraperRegistry {
        let mut registry = ScraperRegistry::new(true);
        registry.register(Arc::new(FixedScraper {
            host: "advisories.test",
            result: || Ok(vec![Advisory::new("CWE-79", "XSS vuln")]),
        }));
        registry.register(Arc::new(FixedScraper {
            host: "broken.test",
            result: || {
                Err(AppError::Scrape {
                    source_name: "broken.test".to_string(),
                    message: "timed out".to_string(),
                })
            },
        }));
        registry
    }

    #[test]
    fn test_resolve_rejects_bad_urls() {
        let registry = registry();

        for url in ["", "   ", "http://advisories.test/", "https://elsewhere.test/", "https://"] {
            assert!(
                matches!(registry.resolve(url), Err(AppError::Validation(_))),
                "url {:?} should be rejected",
                url
            );
        }
        assert_eq!(
            registry.resolve("https://advisories.test/list").unwrap().name(),
            "advisories.test"
        );
    }

    #[test]
    fn test_plain_http_allowed_when_not_required() {
        let mut registry = ScraperRegistry::new(false);
        registry.register(Arc::new(FixedScraper {
            host: "advisories.test",
            result: || Ok(Vec::new()),
        }));
        assert!(registry.resolve("http://advisories.test/").is_ok());
    }

    #[tokio::test]
    async fn test_scrape_runs_matching_scraper() {
        let registry = registry();

        let advisories = registry.scrape("https://advisories.test/").await.unwrap();
        assert_eq!(advisories, vec![Advisory::new("CWE-79", "XSS vuln")]);

        let err = registry.scrape("https://broken.test/").await.unwrap_err();
        assert!(matches!(err, AppError::Scrape { .. }));
    }

    #[test]
    fn test_default_registry_knows_both_sites() {
        let registry = ScraperRegistry::from_config(&ScraperConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["nciipc", "cyware"]);
        assert_eq!(
            registry
                .resolve("https://nciipc.gov.in/alerts_advisories_more_2023.html")
                .unwrap()
                .name(),
            "nciipc"
        );
        assert_eq!(
            registry.resolve("https://cyware.com/search?search=india").unwrap().name(),
            "cyware"
        );
    }
}

use crate::core::config::SearchConfig;
use crate::core::error::AppError;
use crate::core::model::{Resource, Task};
use crate::services::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use futures_util::future::join_all;
use log::{debug, info, warn};
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Social media hosts never worth linking as learning material.
const DENIED_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "pinterest.com",
    "linkedin.com",
    "snapchat.com",
];

/// Extra results requested so that filtering still leaves enough links.
const OVERFETCH: usize = 3;

const FALLBACK_TITLE: &str = "Search the web for tutorials";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

#[async_trait]
pub trait SearchClient: Send + Sync + Debug {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, AppError>;
}

/// `None` when no Brave key is configured; the augmenter then only hands out fallback links.
pub fn create_search(
    config: &SearchConfig,
) -> Result<Option<Arc<dyn SearchClient>>, AppError> {
    if config.brave.api_key.trim().is_empty() {
        info!("No search API key configured, tasks will get fallback search links only");
        return Ok(None);
    }
    let client = BraveSearchClient::new(
        &config.brave.api_key,
        &config.brave.endpoint,
        RetryPolicy::new(config.retry_count, config.retry_delay_ms),
        Duration::from_secs(config.timeout_seconds),
    )?;
    Ok(Some(Arc::new(client)))
}

// --- Brave ---

#[derive(Debug)]
struct BraveSearchClient {
    api_key: String,
    endpoint: Url,
    retry: RetryPolicy,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct BraveResponse {
    web: Option<BraveWebResults>,
}

#[derive(Deserialize)]
struct BraveWebResults {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    url: String,
}

impl BraveSearchClient {
    fn new(
        api_key: &str,
        endpoint: &str,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            AppError::configuration(format!("Invalid search endpoint {}: {}", endpoint, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key: api_key.to_string(),
            endpoint,
            retry,
            client,
        })
    }

    async fn send(&self, url: &Url) -> Result<Vec<SearchHit>, AppError> {
        let resp = self
            .client
            .get(url.clone())
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await
            .map_err(|e| AppError::from_reqwest("Brave Search", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::upstream_status("Brave Search", status.as_u16(), body));
        }

        let result: BraveResponse = resp
            .json()
            .await
            .map_err(|e| AppError::from_reqwest("Brave Search", e))?;
        Ok(result
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
            })
            .collect())
    }
}

#[async_trait]
impl SearchClient for BraveSearchClient {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, AppError> {
        let mut url = self.endpoint.clone();
        // Brave caps `count` at 20.
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("count", &count.clamp(1, 20).to_string());

        with_retry("Brave search", &self.retry, || self.send(&url)).await
    }
}

// --- Augmenter ---

pub fn search_query(skill: &str, step_title: &str, task: &str) -> String {
    format!("{} {} {} tutorial", skill, step_title, task)
}

pub fn fallback_resource(query: &str) -> Resource {
    Resource::new(
        format!("https://www.google.com/search?q={}", urlencoding::encode(query)),
        FALLBACK_TITLE,
    )
}

fn is_denied(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return true;
    };
    let Some(host) = parsed.host_str() else {
        return true;
    };
    let host = host.trim_start_matches("www.");
    DENIED_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

/// Attaches web links to generated tasks. Every task comes out with at least one resource.
#[derive(Debug, Clone)]
pub struct ResourceAugmenter {
    search: Option<Arc<dyn SearchClient>>,
    max_links: usize,
    enabled: bool,
}

impl ResourceAugmenter {
    pub fn new(search: Option<Arc<dyn SearchClient>>, config: &SearchConfig) -> Self {
        Self {
            search,
            max_links: config.max_links.max(1),
            enabled: config.enabled,
        }
    }

    pub async fn augment(&self, mut task: Task, skill: &str, step_title: &str) -> Task {
        let query = search_query(skill, step_title, &task.task);

        if !self.enabled {
            if task.resources.is_empty() {
                task.resources.push(fallback_resource(&query));
            }
            return task;
        }

        let links = match &self.search {
            Some(search) => match search.search(&query, self.max_links + OVERFETCH).await {
                Ok(hits) => hits
                    .into_iter()
                    .filter(|h| !is_denied(&h.url))
                    .take(self.max_links)
                    .map(|h| Resource {
                        url: h.url,
                        title: Some(h.title).filter(|t| !t.trim().is_empty()),
                    })
                    .collect(),
                Err(e) => {
                    warn!("Search for \"{}\" failed, using fallback link: {}", query, e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        task.resources = if links.is_empty() {
            debug!("No usable search results for \"{}\"", query);
            vec![fallback_resource(&query)]
        } else {
            links
        };
        task
    }

    /// Augments every task concurrently; one task's failure only affects that task.
    pub async fn augment_all(&self, tasks: Vec<Task>, skill: &str, step_title: &str) -> Vec<Task> {
        join_all(
            tasks
                .into_iter()
                .map(|task| self.augment(task, skill, step_title)),
        )
        .await
    }
}

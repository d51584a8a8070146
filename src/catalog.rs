//! Paginated catalog ingestion.
//!
//! The catalog API caps the request rate, so pages are fetched strictly one
//! after another with a fixed pause after each page. A rebuild therefore
//! takes at least `page_count × delay`. Any failed page aborts the whole
//! fetch; a partial catalog is never returned.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::CatalogConfig;
use crate::error::{PipelineError, Result};
use crate::models::{CatalogPage, CatalogRecord};

/// A source of catalog pages.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch one page (1-based) holding at most `limit` records.
    async fn fetch_page(&self, page: u32, limit: u32) -> Result<CatalogPage>;
}

/// Client for the Jikan `top/anime` endpoint (or any API with the same shape).
pub struct JikanCatalog {
    endpoint: String,
    client: reqwest::Client,
}

impl JikanCatalog {
    pub fn new(config: &CatalogConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }
}

#[async_trait]
impl CatalogSource for JikanCatalog {
    async fn fetch_page(&self, page: u32, limit: u32) -> Result<CatalogPage> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await
            .map_err(|e| PipelineError::Upstream {
                page,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::UpstreamStatus {
                page,
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<CatalogPage>()
            .await
            .map_err(|e| PipelineError::Upstream {
                page,
                message: format!("invalid page body: {}", e),
            })
    }
}

/// Fetch `page_count` pages of `page_size` records, pausing `delay` after each.
///
/// Records are returned in page order, then in within-page order.
pub async fn fetch_catalog(
    source: &dyn CatalogSource,
    page_count: u32,
    page_size: u32,
    delay: Duration,
) -> Result<Vec<CatalogRecord>> {
    let mut records = Vec::with_capacity(page_count as usize * page_size as usize);

    for page in 1..=page_count {
        info!("fetching page {} of {}", page, page_count);
        let fetched = source.fetch_page(page, page_size).await?;

        if !fetched.pagination.has_next_page && page < page_count {
            warn!(
                page,
                page_count, "catalog reports no further pages; requesting the remaining pages anyway"
            );
        }
        records.extend(fetched.data);

        tokio::time::sleep(delay).await;
    }

    info!(records = records.len(), "catalog fetched");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Pagination;
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct ScriptedSource {
        per_page: u32,
        fail_on: Option<u32>,
        calls: Mutex<Vec<(u32, u32, Instant)>>,
    }

    impl ScriptedSource {
        fn new(per_page: u32, fail_on: Option<u32>) -> Self {
            Self {
                per_page,
                fail_on,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CatalogSource for ScriptedSource {
        async fn fetch_page(&self, page: u32, limit: u32) -> Result<CatalogPage> {
            self.calls
                .lock()
                .unwrap()
                .push((page, limit, Instant::now()));
            if self.fail_on == Some(page) {
                return Err(PipelineError::UpstreamStatus {
                    page,
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let data = (0..self.per_page)
                .map(|i| {
                    serde_json::from_value(serde_json::json!({
                        "mal_id": page * 100 + i,
                        "title": format!("p{}-{}", page, i),
                    }))
                    .unwrap()
                })
                .collect();
            Ok(CatalogPage {
                pagination: Pagination {
                    has_next_page: true,
                    ..Pagination::default()
                },
                data,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn requests_each_page_in_order() {
        let source = ScriptedSource::new(3, None);
        let records = fetch_catalog(&source, 4, 25, Duration::from_secs(1))
            .await
            .unwrap();

        let calls = source.calls.lock().unwrap();
        let pages: Vec<u32> = calls.iter().map(|(p, _, _)| *p).collect();
        assert_eq!(pages, vec![1, 2, 3, 4]);
        assert!(calls.iter().all(|(_, limit, _)| *limit == 25));

        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles.len(), 12);
        assert_eq!(titles[0], "p1-0");
        assert_eq!(titles[3], "p2-0");
        assert_eq!(titles[11], "p4-2");
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_consecutive_pages() {
        let source = ScriptedSource::new(1, None);
        let delay = Duration::from_millis(1000);
        let started = Instant::now();
        fetch_catalog(&source, 3, 10, delay).await.unwrap();

        let calls = source.calls.lock().unwrap();
        for pair in calls.windows(2) {
            assert!(pair[1].2 - pair[0].2 >= delay);
        }
        assert!(started.elapsed() >= delay * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_page_aborts_fetch() {
        let source = ScriptedSource::new(2, Some(2));
        let err = fetch_catalog(&source, 4, 25, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_upstream());
        assert_eq!(source.calls.lock().unwrap().len(), 2);
    }
}

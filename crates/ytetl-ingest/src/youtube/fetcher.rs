//! Paginated extraction for one query

use tracing::{debug, info, instrument, warn};
use ytetl_common::RawItem;

use super::{FetchError, SearchApi, SearchPage, SearchRequest};
use crate::config::FetchConfig;

/// Collects up to `max_total` items for a query, one page at a time.
///
/// Pages are requested strictly in order since each needs the previous
/// page's continuation token. Every `Fetcher` keeps its own delay and backoff
/// clock, so separate queries never share a sleep.
pub struct Fetcher<A> {
    api: A,
    config: FetchConfig,
}

impl<A: SearchApi> Fetcher<A> {
    pub fn new(api: A, config: FetchConfig) -> Self {
        Self { api, config }
    }

    /// Fetch `min(max_total, available)` items in API order.
    ///
    /// Stops on a full budget, an empty page, or a missing continuation
    /// token. Transient failures retry the same page; anything else, or a
    /// transient failure past the retry ceiling, ends the fetch with an error.
    #[instrument(skip(self))]
    pub async fn fetch(&self, query: &str, max_total: usize) -> Result<Vec<RawItem>, FetchError> {
        let mut collected: Vec<RawItem> = Vec::with_capacity(max_total.min(1_000));
        let mut page_token: Option<String> = None;
        let mut pages = 0u32;

        while collected.len() < max_total {
            let remaining = max_total - collected.len();
            let page_size = u32::try_from(remaining)
                .unwrap_or(u32::MAX)
                .min(self.config.per_page);

            let request = SearchRequest {
                query,
                page_size,
                page_token: page_token.as_deref(),
            };
            let page = self.fetch_page(&request).await?;
            pages += 1;

            if page.items.is_empty() {
                warn!(
                    collected = collected.len(),
                    max_total, "No more items returned before reaching max_total"
                );
                break;
            }

            collected.extend(page.items);
            info!(
                page = pages,
                collected = collected.len(),
                max_total,
                "Fetched {}/{} items for query '{}'",
                collected.len().min(max_total),
                max_total,
                query
            );

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => {
                    debug!("No continuation token, end of result set");
                    break;
                },
            }

            if collected.len() < max_total && !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        collected.truncate(max_total);
        Ok(collected)
    }

    /// One page with bounded exponential backoff on transient errors.
    async fn fetch_page(&self, request: &SearchRequest<'_>) -> Result<SearchPage, FetchError> {
        let policy = &self.config.retry;
        let mut attempt = 1u32;

        loop {
            match self.api.search_page(request).await {
                Ok(page) => return Ok(page),
                Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                    let backoff = policy.backoff_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "Search request failed, retrying in {:.1}s",
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                },
                Err(err) if err.is_transient() => {
                    return Err(FetchError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                },
                Err(err) => return Err(err),
            }
        }
    }
}

//! Cursor pagination
//!
//! Pages are requested strictly one after another so items keep their source
//! order. Following stops when the server stops returning a cursor, returns
//! an empty page, repeats a cursor it already handed out, or the page cap is
//! reached. The last two are reported as a [`Truncation`].

use super::{FetcherResult, RawPage, RequestStats};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};
use url::Url;

/// Why pagination stopped before the server said it was done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Truncation {
    /// `max_pages` pages fetched and a cursor was still pending
    PageLimit {
        /// The configured cap
        max_pages: usize,
    },
    /// The server returned a cursor it had already returned
    RepeatedCursor {
        /// The repeated cursor
        cursor: String,
    },
}

impl fmt::Display for Truncation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Truncation::PageLimit { max_pages } => {
                write!(f, "stopped after {max_pages} pages with more pending")
            }
            Truncation::RepeatedCursor { cursor } => {
                write!(f, "server repeated cursor {cursor}")
            }
        }
    }
}

/// Items of one logical list fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaginatedItems {
    /// Items across all pages, in cursor order
    pub items: Vec<Value>,
    /// Pages fetched
    pub pages: usize,
    /// Attempts and retries across all pages
    pub stats: RequestStats,
    /// Set when following stopped early
    pub truncation: Option<Truncation>,
}

/// Follow cursors from the first page until exhausted or `max_pages`
///
/// # Arguments
/// * `endpoint` - Endpoint name for logging
/// * `max_pages` - Maximum pages to request
/// * `fetch_page` - Fetches the page at a cursor (`None` for the first page)
pub async fn paginate<F, Fut>(
    endpoint: &str,
    max_pages: usize,
    mut fetch_page: F,
) -> FetcherResult<PaginatedItems>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = FetcherResult<(RawPage, RequestStats)>>,
{
    let mut result = PaginatedItems::default();
    let mut cursor: Option<String> = None;
    let mut seen = HashSet::new();

    loop {
        if result.pages >= max_pages {
            warn!(endpoint, max_pages, "Page limit reached - remaining pages not fetched");
            result.truncation = Some(Truncation::PageLimit { max_pages });
            break;
        }

        let (page, stats) = fetch_page(cursor.take()).await?;
        result.pages += 1;
        result.stats.add(stats);

        if page.items.is_empty() {
            debug!(endpoint, page = result.pages, "Empty page received");
            break;
        }

        debug!(endpoint, page = result.pages, items = page.items.len(), "Received page");
        result.items.extend(page.items);

        match page.cursor {
            None => break,
            Some(next) if !seen.insert(next.clone()) => {
                warn!(endpoint, cursor = %next, "Server repeated a pagination cursor - stopping");
                result.truncation = Some(Truncation::RepeatedCursor { cursor: next });
                break;
            }
            Some(next) => cursor = Some(next),
        }
    }

    debug!(
        endpoint,
        pages = result.pages,
        items = result.items.len(),
        "Pagination completed"
    );
    Ok(result)
}

/// Extract the `after` cursor from a `Link` header's `rel="next"` entry
pub fn next_cursor_from_link(header: &str) -> Option<String> {
    let base = Url::parse("http://localhost/").ok()?;
    header
        .split(',')
        .filter(|part| {
            part.split(';')
                .skip(1)
                .any(|param| matches!(param.trim(), "rel=\"next\"" | "rel=next"))
        })
        .find_map(|part| {
            let target = part.split(';').next()?.trim();
            let target = target.strip_prefix('<')?.strip_suffix('>')?;
            let url = base.join(target).ok()?;
            url.query_pairs()
                .find(|(key, _)| key == super::CURSOR_PARAM)
                .map(|(_, value)| value.into_owned())
                .filter(|value| !value.is_empty())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetcherError;
    use serde_json::json;
    use std::collections::HashMap;

    fn page(ids: &[u32], cursor: Option<&str>) -> RawPage {
        RawPage {
            items: ids.iter().map(|i| json!({"id": i})).collect(),
            cursor: cursor.map(str::to_string),
        }
    }

    fn one_request() -> RequestStats {
        RequestStats {
            requests: 1,
            retries: 0,
        }
    }

    #[tokio::test]
    async fn test_pages_followed_in_order() {
        let pages: HashMap<Option<String>, RawPage> = [
            (None, page(&[1, 2], Some("b"))),
            (Some("b".to_string()), page(&[3, 4], Some("c"))),
            (Some("c".to_string()), page(&[5], None)),
        ]
        .into_iter()
        .collect();

        let result = paginate("campaigns", 100, |cursor| {
            let page = pages.get(&cursor).cloned().unwrap_or_default();
            async move { Ok((page, one_request())) }
        })
        .await
        .unwrap();

        let ids: Vec<u64> = result.items.iter().map(|v| v["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(result.pages, 3);
        assert_eq!(result.stats.requests, 3);
        assert_eq!(result.truncation, None);
    }

    #[tokio::test]
    async fn test_page_limit_truncates() {
        let mut calls = 0;
        let result = paginate("reviews", 2, |_cursor| {
            calls += 1;
            let next = format!("p{calls}");
            async move { Ok((page(&[1], Some(&next)), one_request())) }
        })
        .await
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.truncation, Some(Truncation::PageLimit { max_pages: 2 }));
    }

    #[tokio::test]
    async fn test_repeated_cursor_stops() {
        let result = paginate("reviews", 50, |_cursor| async {
            Ok((page(&[7], Some("same")), one_request()))
        })
        .await
        .unwrap();

        assert_eq!(result.pages, 2);
        assert_eq!(
            result.truncation,
            Some(Truncation::RepeatedCursor {
                cursor: "same".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_error_propagates() {
        let result = paginate("reviews", 50, |cursor| async move {
            match cursor {
                None => Ok((page(&[1], Some("next")), one_request())),
                Some(_) => Err(FetcherError::InvalidResponse("bad page".to_string())),
            }
        })
        .await;
        assert!(matches!(result, Err(FetcherError::InvalidResponse(_))));
    }

    #[test]
    fn test_next_cursor_from_link() {
        let header = "<https://t.okta.com/governance/api/v1/campaigns?limit=200>; rel=\"self\", \
                      <https://t.okta.com/governance/api/v1/campaigns?after=00u1%3D&limit=200>; rel=\"next\"";
        assert_eq!(next_cursor_from_link(header).as_deref(), Some("00u1="));

        let relative = "</api/v1/things?after=xyz>; rel=\"next\"";
        assert_eq!(next_cursor_from_link(relative).as_deref(), Some("xyz"));

        assert_eq!(next_cursor_from_link("<https://t/x?after=a>; rel=\"self\""), None);
        assert_eq!(next_cursor_from_link("<https://t/x?limit=2>; rel=\"next\""), None);
    }
}

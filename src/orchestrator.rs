use std::sync::Arc;

use crate::fetch::{FetchRequest, JobFetcher};
use crate::models::SearchInformation;
use crate::parser::parse_response;
use crate::writer::StorageWriter;

/// One (title, location) search intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub title: String,
    pub location: Option<String>,
    pub geotarget: Option<String>,
}

impl SearchQuery {
    pub fn new(title: impl Into<String>, location: Option<String>) -> Self {
        Self {
            title: title.into(),
            location,
            geotarget: None,
        }
    }
}

/// What a single page tells the pagination loop to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Continue(String),
    Done,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSummary {
    pub query: SearchQuery,
    pub search_id: Option<String>,
    /// Jobs returned by the API across all pages.
    pub total_jobs: usize,
    pub pages_processed: usize,
    /// True only if at least one page was stored and every stored page succeeded.
    pub storage_ok: bool,
    pub outcome: QueryOutcome,
}

impl SearchSummary {
    pub fn is_success(&self) -> bool {
        self.outcome == QueryOutcome::Completed
    }
}

#[derive(Default)]
struct QueryState {
    search_id: Option<String>,
    search_information: Option<SearchInformation>,
    total_jobs: usize,
    pages_processed: usize,
    failed_pages: usize,
}

/// Drives fetch → parse → store for one query, page by page.
pub struct SearchOrchestrator {
    fetcher: Arc<dyn JobFetcher>,
    writer: StorageWriter,
    max_page_depth: usize,
}

impl SearchOrchestrator {
    pub fn new(fetcher: Arc<dyn JobFetcher>, writer: StorageWriter, max_page_depth: usize) -> Self {
        Self {
            fetcher,
            writer,
            max_page_depth,
        }
    }

    pub async fn run(&self, query: &SearchQuery) -> SearchSummary {
        let location = query.location.as_deref().unwrap_or("");
        tracing::info!(title = %query.title, location, max_pages = self.max_page_depth, "Starting search");

        let mut state = QueryState::default();
        let mut token: Option<String> = None;
        let mut outcome = QueryOutcome::Completed;

        for page in 0..self.max_page_depth {
            match self.process_page(query, page, token.take(), &mut state).await {
                PageOutcome::Continue(next) => token = Some(next),
                PageOutcome::Done => break,
                PageOutcome::Failed(reason) => {
                    tracing::error!(title = %query.title, location, page = page + 1, %reason, "Search failed");
                    outcome = QueryOutcome::Failed(reason);
                    break;
                }
            }
        }

        if token.is_some() {
            tracing::debug!(title = %query.title, location, "Stopped at max page depth");
        }

        let summary = SearchSummary {
            query: query.clone(),
            search_id: state.search_id,
            total_jobs: state.total_jobs,
            pages_processed: state.pages_processed,
            storage_ok: state.pages_processed > 0 && state.failed_pages == 0,
            outcome,
        };

        tracing::info!(
            title = %query.title,
            location,
            search_id = summary.search_id.as_deref().unwrap_or(""),
            total_jobs = summary.total_jobs,
            pages = summary.pages_processed,
            storage_ok = summary.storage_ok,
            "Search finished"
        );
        summary
    }

    async fn process_page(
        &self,
        query: &SearchQuery,
        page: usize,
        page_token: Option<String>,
        state: &mut QueryState,
    ) -> PageOutcome {
        let request = FetchRequest {
            title: query.title.clone(),
            location: query.location.clone(),
            geotarget: query.geotarget.clone(),
            page_token,
        };

        let raw = match self.fetcher.fetch(&request).await {
            Ok(raw) => raw,
            Err(e) => return PageOutcome::Failed(format!("fetch failed: {}", e)),
        };

        let (mut response, next_token) = match parse_response(raw) {
            Ok(parsed) => parsed,
            Err(e) => return PageOutcome::Failed(format!("parse failed: {}", e)),
        };

        if page == 0 {
            let Some(info) = response.search_information.clone() else {
                return PageOutcome::Failed("first page has no search_information".to_string());
            };
            state.search_id = Some(response.search_metadata.id.clone());
            state.search_information = Some(info);
            response.is_subsequent_page = false;
        } else {
            // The API only sends search_information on the first page.
            response.search_information = state.search_information.clone();
            response.is_subsequent_page = true;
        }

        let found = response.jobs.len();
        let writer = self.writer.clone();
        let search_id = state.search_id.clone();
        let stored =
            tokio::task::spawn_blocking(move || writer.store(&response, search_id.as_deref())).await;

        let outcome = match stored {
            Ok(outcome) => outcome,
            Err(e) => return PageOutcome::Failed(format!("storage task failed: {}", e)),
        };

        state.total_jobs += found;
        state.pages_processed += 1;
        if !outcome.succeeded() {
            state.failed_pages += 1;
        }

        match next_token {
            Some(token) => PageOutcome::Continue(token),
            None => PageOutcome::Done,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedFetcher;
    use super::*;
    use crate::error::FetchError;
    use crate::models::fixtures::page_json;
    use crate::writer::testing::ScriptedStore;

    const TITLE: &str = "AI Engineer";

    fn orchestrator(
        fetcher: Arc<ScriptedFetcher>,
        store: Arc<ScriptedStore>,
        depth: usize,
    ) -> SearchOrchestrator {
        SearchOrchestrator::new(fetcher, StorageWriter::new(store), depth)
    }

    fn query() -> SearchQuery {
        SearchQuery::new(TITLE, Some("Palo Alto CA".to_string()))
    }

    #[tokio::test]
    async fn test_pages_accumulate_into_one_document() {
        let fetcher = Arc::new(ScriptedFetcher::with_pages(
            TITLE,
            vec![
                Ok(page_json("s1", 10, Some("t1"))),
                Ok(page_json("s1-p2", 8, Some("t2"))),
                Ok(page_json("s1-p3", 5, Some("t3"))),
            ],
        ));
        let store = Arc::new(ScriptedStore::new());

        let summary = orchestrator(fetcher.clone(), store.clone(), 3).run(&query()).await;
        assert!(summary.is_success());
        assert_eq!(summary.total_jobs, 23);
        assert_eq!(summary.pages_processed, 3);
        assert!(summary.storage_ok);
        assert_eq!(summary.search_id.as_deref(), Some("s1"));

        let doc = store.db.get_search("s1").unwrap().unwrap();
        assert_eq!(doc.total_jobs, 23);
        assert_eq!(doc.pages_processed, 3);
        assert_eq!(doc.jobs.len(), 23);

        let tokens: Vec<Option<String>> = fetcher
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.page_token.clone())
            .collect();
        assert_eq!(
            tokens,
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_token_stops_early() {
        let fetcher = Arc::new(ScriptedFetcher::with_pages(
            TITLE,
            vec![
                Ok(page_json("s1", 3, Some("t1"))),
                Ok(page_json("s1-p2", 2, None)),
                Ok(page_json("s1-p3", 2, None)),
            ],
        ));
        let store = Arc::new(ScriptedStore::new());

        let summary = orchestrator(fetcher.clone(), store.clone(), 5).run(&query()).await;
        assert!(summary.is_success());
        assert_eq!(summary.pages_processed, 2);
        assert_eq!(summary.total_jobs, 5);
        assert_eq!(fetcher.request_count(), 2);
        assert_eq!(store.db.get_search("s1").unwrap().unwrap().pages_processed, 2);
    }

    #[tokio::test]
    async fn test_depth_limit_bounds_fetches() {
        let fetcher = Arc::new(ScriptedFetcher::with_pages(
            TITLE,
            vec![
                Ok(page_json("s1", 1, Some("t1"))),
                Ok(page_json("s1-p2", 1, Some("t2"))),
                Ok(page_json("s1-p3", 1, Some("t3"))),
            ],
        ));
        let store = Arc::new(ScriptedStore::new());

        let summary = orchestrator(fetcher.clone(), store, 2).run(&query()).await;
        assert!(summary.is_success());
        assert_eq!(summary.pages_processed, 2);
        assert_eq!(fetcher.request_count(), 2);
    }

    #[tokio::test]
    async fn test_first_page_without_metadata_stores_nothing() {
        let mut raw = page_json("s1", 4, Some("t1"));
        raw.as_object_mut().unwrap().remove("search_metadata");
        let fetcher = Arc::new(ScriptedFetcher::with_pages(TITLE, vec![Ok(raw)]));
        let store = Arc::new(ScriptedStore::new());

        let summary = orchestrator(fetcher.clone(), store.clone(), 3).run(&query()).await;
        assert_eq!(
            (summary.total_jobs, summary.pages_processed, summary.storage_ok),
            (0, 0, false)
        );
        assert!(matches!(summary.outcome, QueryOutcome::Failed(_)));
        assert_eq!(store.call_count(), 0);
        assert_eq!(fetcher.request_count(), 1);
    }

    #[tokio::test]
    async fn test_first_page_claiming_continuation_still_creates_document() {
        let mut raw = page_json("s1", 2, None);
        raw["is_subsequent_page"] = serde_json::json!(true);
        let fetcher = Arc::new(ScriptedFetcher::with_pages(TITLE, vec![Ok(raw)]));
        let store = Arc::new(ScriptedStore::new());

        let summary = orchestrator(fetcher, store.clone(), 3).run(&query()).await;
        assert!(summary.storage_ok);
        let doc = store.db.get_search("s1").unwrap().unwrap();
        assert_eq!(doc.pages_processed, 1);
        assert_eq!(doc.jobs.len(), 2);
    }

    #[tokio::test]
    async fn test_first_page_without_search_information_fails() {
        let mut raw = page_json("s1", 2, None);
        raw.as_object_mut().unwrap().remove("search_information");
        let fetcher = Arc::new(ScriptedFetcher::with_pages(TITLE, vec![Ok(raw)]));
        let store = Arc::new(ScriptedStore::new());

        let summary = orchestrator(fetcher, store.clone(), 3).run(&query()).await;
        assert!(!summary.is_success());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_mid_query_stops_without_retry() {
        let fetcher = Arc::new(ScriptedFetcher::with_pages(
            TITLE,
            vec![
                Ok(page_json("s1", 3, Some("t1"))),
                Err(FetchError::Status {
                    status: 502,
                    body: "bad gateway".to_string(),
                }),
                Ok(page_json("s1-p3", 3, None)),
            ],
        ));
        let store = Arc::new(ScriptedStore::new());

        let summary = orchestrator(fetcher.clone(), store, 3).run(&query()).await;
        match &summary.outcome {
            QueryOutcome::Failed(reason) => assert!(reason.contains("502")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(summary.pages_processed, 1);
        assert_eq!(summary.total_jobs, 3);
        assert!(summary.storage_ok);
        assert_eq!(fetcher.request_count(), 2);
    }

    #[tokio::test]
    async fn test_continuation_pages_inherit_search_information() {
        let mut second = page_json("s1-p2", 1, None);
        second.as_object_mut().unwrap().remove("search_information");
        let fetcher = Arc::new(ScriptedFetcher::with_pages(
            TITLE,
            vec![Ok(page_json("s1", 1, Some("t1"))), Ok(second)],
        ));
        let store = Arc::new(ScriptedStore::new());

        let summary = orchestrator(fetcher, store.clone(), 3).run(&query()).await;
        assert!(summary.is_success());
        assert!(summary.storage_ok);

        let jobs = store.db.jobs_for_search("s1").unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|(_, job)| job.search_location == "Palo Alto, CA"));
    }

    #[tokio::test]
    async fn test_failed_page_storage_continues_to_next_page() {
        let first = page_json("s1", 2, Some("t1"));
        let second = page_json("s1-p2", 1, Some("t2"));
        let lone_title = second["jobs"][0]["title"].as_str().unwrap().to_string();
        let fetcher = Arc::new(ScriptedFetcher::with_pages(
            TITLE,
            vec![Ok(first), Ok(second), Ok(page_json("s1-p3", 2, None))],
        ));
        let store = Arc::new(ScriptedStore::failing_on(&[lone_title.as_str()]));

        let summary = orchestrator(fetcher.clone(), store.clone(), 3).run(&query()).await;
        assert!(summary.is_success());
        assert!(!summary.storage_ok);
        assert_eq!(summary.pages_processed, 3);
        assert_eq!(summary.total_jobs, 5);
        assert_eq!(fetcher.request_count(), 3);

        let doc = store.db.get_search("s1").unwrap().unwrap();
        assert_eq!(doc.total_jobs, 4);
        assert_eq!(doc.pages_processed, 3);
    }
}

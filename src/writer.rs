use std::sync::Arc;

use chrono::Utc;

use crate::db::JobStore;
use crate::models::{SearchDocument, SearchResponse, StoredJob};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOutcome {
    pub jobs_stored: usize,
    pub jobs_failed: usize,
    pub job_ids: Vec<i64>,
    /// Whether the parent search document was created or updated.
    pub search_recorded: bool,
}

impl StorageOutcome {
    /// A page counts only if something landed and the search document tracks it.
    pub fn succeeded(&self) -> bool {
        self.jobs_stored > 0 && self.search_recorded
    }
}

/// Persists one parsed page: every job, then the parent search document.
#[derive(Clone)]
pub struct StorageWriter {
    store: Arc<dyn JobStore>,
}

impl StorageWriter {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// `known_search_id` is the id of the query's first page; it is required
    /// for continuation pages and ignored otherwise.
    pub fn store(&self, response: &SearchResponse, known_search_id: Option<&str>) -> StorageOutcome {
        let now = Utc::now();
        let search_id = known_search_id.unwrap_or(&response.search_metadata.id);
        let search_location = response
            .search_information
            .as_ref()
            .map(|info| info.detected_location.clone())
            .unwrap_or_default();

        let mut outcome = StorageOutcome::default();

        // A failed job is logged and counted; the rest of the page still goes in.
        for job in &response.jobs {
            let mut listing = job.clone();
            listing.normalize_urls();
            let record = StoredJob {
                listing,
                search_id: search_id.to_string(),
                search_query: response.search_parameters.q.clone(),
                search_location: search_location.clone(),
                fetched_at: now,
                created_at: now,
            };

            match self.store.upsert_job(&record) {
                Ok(id) => {
                    outcome.jobs_stored += 1;
                    outcome.job_ids.push(id);
                }
                Err(e) => {
                    outcome.jobs_failed += 1;
                    tracing::error!(
                        search_id,
                        title = %record.listing.title,
                        company = %record.listing.company_name,
                        error = %e,
                        "Failed to store job"
                    );
                }
            }
        }

        let recorded = if response.is_subsequent_page {
            self.store.record_page(
                search_id,
                outcome.jobs_stored as i64,
                &outcome.job_ids,
                now,
            )
        } else {
            let info = response.search_information.clone().unwrap_or_default();
            let doc = SearchDocument::first_page(response, info, outcome.job_ids.clone(), now);
            self.store.insert_search(&doc)
        };

        match recorded {
            Ok(()) => outcome.search_recorded = true,
            Err(e) => {
                tracing::error!(search_id, error = %e, "Failed to record search document");
            }
        }

        if outcome.succeeded() {
            tracing::info!(
                search_id,
                stored = outcome.jobs_stored,
                failed = outcome.jobs_failed,
                continuation = response.is_subsequent_page,
                "Stored page"
            );
        } else {
            tracing::warn!(
                search_id,
                stored = outcome.jobs_stored,
                failed = outcome.jobs_failed,
                search_recorded = outcome.search_recorded,
                "Page storage failed"
            );
        }

        outcome
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::orchestrator::{SearchOrchestrator, SearchQuery};

pub const DEFAULT_JOB_TITLES: &[&str] = &[
    "AI Engineer",
    "Applied Data Scientist",
    "Machine Learning Engineer",
    "Technical Program Manager",
    "Solutions Engineer",
];

// Bay Area
pub const DEFAULT_LOCATIONS: &[&str] = &[
    "Palo Alto CA",
    "Mountain View CA",
    "Sunnyvale CA",
    "San Jose CA",
    "San Francisco CA",
    "Fremont CA",
    "Redwood City CA",
    "Remote",
];

pub const DEFAULT_TECH_HUBS: &[&str] = &[
    "Seattle WA",
    "Austin TX",
    "Dallas TX",
    "Miami FL",
    "New York NY",
    "Denver CO",
    "Charlotte NC",
    "Northern Virginia",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub job_titles: Vec<String>,
    pub locations: Vec<String>,
    pub tech_hubs: Vec<String>,
    pub include_tech_hubs: bool,
    pub max_concurrent: usize,
    /// 0 disables the submission delay.
    pub calls_per_minute: u32,
    pub max_retries: u32,
    pub max_pages: usize,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            job_titles: owned(DEFAULT_JOB_TITLES),
            locations: owned(DEFAULT_LOCATIONS),
            tech_hubs: owned(DEFAULT_TECH_HUBS),
            include_tech_hubs: true,
            max_concurrent: 3,
            calls_per_minute: 30,
            max_retries: 3,
            max_pages: 2,
        }
    }
}

fn dedup(items: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

impl BatchOptions {
    /// Every (title, location) combination, titles outermost.
    pub fn pairs(&self) -> Vec<SearchQuery> {
        let mut locations = self.locations.clone();
        if self.include_tech_hubs {
            locations.extend(self.tech_hubs.iter().cloned());
        }
        let locations = dedup(&locations);

        dedup(&self.job_titles)
            .into_iter()
            .flat_map(|title| {
                locations
                    .iter()
                    .map(move |location| SearchQuery::new(title.clone(), Some(location.clone())))
            })
            .collect()
    }

    pub fn submission_delay(&self) -> Duration {
        if self.calls_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / self.calls_per_minute as f64)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl BatchReport {
    /// Searches per second over the whole run.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 { self.total as f64 / secs } else { 0.0 }
    }
}

pub struct BatchScheduler {
    orchestrator: Arc<SearchOrchestrator>,
    options: BatchOptions,
}

impl BatchScheduler {
    pub fn new(orchestrator: Arc<SearchOrchestrator>, options: BatchOptions) -> Self {
        Self {
            orchestrator,
            options,
        }
    }

    /// Run every pair to completion. Individual failures are counted, never raised.
    pub async fn run(&self) -> BatchReport {
        let pairs = self.options.pairs();
        let total = pairs.len();
        let delay = self.options.submission_delay();
        let started = Instant::now();

        tracing::info!(
            total_searches = total,
            job_titles = self.options.job_titles.len(),
            max_concurrent = self.options.max_concurrent,
            delay_ms = delay.as_millis() as u64,
            "Starting batch search"
        );

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        for (i, query) in pairs.into_iter().enumerate() {
            // Rate limit on submission, not completion.
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let orchestrator = self.orchestrator.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let unit = query.clone();
                // Run in its own task so a panic is reported against its query.
                let result = tokio::spawn(async move { orchestrator.run(&unit).await }).await;
                (query, result)
            });
        }

        let mut successful = 0;
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(summary))) if summary.is_success() => {
                    successful += 1;
                    tracing::info!(
                        title = %summary.query.title,
                        location = summary.query.location.as_deref().unwrap_or(""),
                        jobs_found = summary.total_jobs,
                        pages = summary.pages_processed,
                        "Search completed successfully"
                    );
                }
                Ok((_, Ok(summary))) => {
                    failed += 1;
                    tracing::warn!(
                        title = %summary.query.title,
                        location = summary.query.location.as_deref().unwrap_or(""),
                        outcome = ?summary.outcome,
                        "Search completed with no results"
                    );
                }
                Ok((query, Err(e))) => {
                    failed += 1;
                    tracing::error!(
                        title = %query.title,
                        location = query.location.as_deref().unwrap_or(""),
                        error = %e,
                        "Search failed unexpectedly"
                    );
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(error = %e, "Search task failed unexpectedly");
                }
            }
        }

        let report = BatchReport {
            total,
            successful,
            failed,
            duration: started.elapsed(),
        };

        tracing::info!(
            total_searches = report.total,
            successful_searches = report.successful,
            failed_searches = report.failed,
            total_duration_seconds = report.duration.as_secs_f64(),
            searches_per_second = report.throughput(),
            "Batch search completed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetch::{FetchRequest, JobFetcher};
    use crate::models::fixtures::page_json;
    use crate::orchestrator::testing::ScriptedFetcher;
    use crate::writer::StorageWriter;
    use crate::writer::testing::ScriptedStore;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options(titles: &[&str], locations: &[&str]) -> BatchOptions {
        BatchOptions {
            job_titles: owned(titles),
            locations: owned(locations),
            tech_hubs: owned(&["Austin TX"]),
            include_tech_hubs: false,
            max_concurrent: 2,
            calls_per_minute: 0,
            max_retries: 1,
            max_pages: 2,
        }
    }

    fn scheduler(fetcher: Arc<dyn JobFetcher>, options: BatchOptions) -> BatchScheduler {
        let store = Arc::new(ScriptedStore::new());
        let orchestrator = SearchOrchestrator::new(fetcher, StorageWriter::new(store), options.max_pages);
        BatchScheduler::new(Arc::new(orchestrator), options)
    }

    #[test]
    fn test_pairs_are_cartesian_product() {
        let opts = options(&["AI Engineer", "NLP Engineer", "AI Engineer"], &["Remote", "Palo Alto CA"]);
        let pairs = opts.pairs();
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0], SearchQuery::new("AI Engineer", Some("Remote".to_string())));
        assert_eq!(pairs[3], SearchQuery::new("NLP Engineer", Some("Palo Alto CA".to_string())));

        let with_hubs = BatchOptions {
            include_tech_hubs: true,
            ..opts
        };
        assert_eq!(with_hubs.pairs().len(), 6);
    }

    #[test]
    fn test_default_options_cover_hubs() {
        let opts = BatchOptions::default();
        assert_eq!(
            opts.pairs().len(),
            DEFAULT_JOB_TITLES.len() * (DEFAULT_LOCATIONS.len() + DEFAULT_TECH_HUBS.len())
        );
    }

    #[test]
    fn test_submission_delay_from_calls_per_minute() {
        let mut opts = BatchOptions::default();
        assert_eq!(opts.submission_delay(), Duration::from_secs(2));
        opts.calls_per_minute = 120;
        assert_eq!(opts.submission_delay(), Duration::from_millis(500));
        opts.calls_per_minute = 0;
        assert_eq!(opts.submission_delay(), Duration::ZERO);
    }

    #[test]
    fn test_throughput() {
        let report = BatchReport {
            total: 10,
            successful: 7,
            failed: 3,
            duration: Duration::from_secs(4),
        };
        assert_eq!(report.throughput(), 2.5);
    }

    #[tokio::test]
    async fn test_counts_sum_to_total() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push("AI Engineer", vec![Ok(page_json("ai-1", 2, None)), Ok(page_json("ai-2", 1, None))]);
        fetcher.push("NLP Engineer", vec![Ok(page_json("nlp-1", 3, None)), Ok(page_json("nlp-2", 1, None))]);
        // "Prompt Engineer" has nothing scripted and fails on every fetch.

        let opts = options(&["AI Engineer", "NLP Engineer", "Prompt Engineer"], &["Remote", "Austin TX"]);
        let report = scheduler(fetcher.clone(), opts).run().await;

        assert_eq!(report.total, 6);
        assert_eq!(report.successful, 4);
        assert_eq!(report.failed, 2);
        assert_eq!(report.successful + report.failed, report.total);
        assert_eq!(fetcher.request_count(), 6);
    }

    /// Tracks how many fetches are in flight at once.
    #[derive(Default)]
    struct ProbeFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobFetcher for ProbeFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
            if request.title == "Panic Engineer" {
                panic!("scripted panic");
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Err(FetchError::Empty)
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let fetcher = Arc::new(ProbeFetcher::default());
        let opts = options(&["A", "B", "C", "D"], &["Remote", "Austin TX"]);
        let report = scheduler(fetcher.clone(), opts).run().await;

        assert_eq!(report.total, 8);
        assert_eq!(report.failed, 8);
        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak concurrency was {}", peak);
    }

    #[tokio::test]
    async fn test_panicking_search_is_counted_not_raised() {
        let fetcher = Arc::new(ProbeFetcher::default());
        let opts = options(&["Panic Engineer", "Data Engineer"], &["Remote"]);
        let report = scheduler(fetcher, opts).run().await;

        assert_eq!(report.total, 2);
        assert_eq!(report.successful, 0);
        assert_eq!(report.failed, 2);
    }

    /// Records when each search reached the API and fails it immediately.
    #[derive(Default)]
    struct ClockFetcher {
        seen: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait]
    impl JobFetcher for ClockFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Value, FetchError> {
            self.seen.lock().unwrap().push(tokio::time::Instant::now());
            Err(FetchError::Empty)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submissions_are_spaced_even_when_searches_finish_fast() {
        let fetcher = Arc::new(ClockFetcher::default());
        let opts = BatchOptions {
            calls_per_minute: 60,
            max_concurrent: 4,
            ..options(&["A", "B"], &["Remote", "Austin TX"])
        };
        let delay = opts.submission_delay();
        assert_eq!(delay, Duration::from_secs(1));

        let started = tokio::time::Instant::now();
        let report = scheduler(fetcher.clone(), opts).run().await;
        assert_eq!(report.total, 4);
        assert_eq!(report.failed, 4);

        let mut seen = fetcher.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen.len(), 4);
        for pair in seen.windows(2) {
            assert!(pair[1] - pair[0] >= delay, "submissions {:?} apart", pair[1] - pair[0]);
        }
        assert!(seen[3] - started >= delay * 3);
    }
}

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use crate::error::StorageError;
use crate::models::{JobKey, JobListing, SearchDocument, StoredJob};

// --- Store trait ---

/// Persistence primitives the ingestion pipeline depends on.
///
/// Every method is a single atomic operation; callers never hold a lock
/// across calls.
pub trait JobStore: Send + Sync {
    /// Insert or overwrite the job identified by its (title, company, location,
    /// apply link) key. Returns the stable row id.
    fn upsert_job(&self, job: &StoredJob) -> Result<i64, StorageError>;

    fn insert_search(&self, doc: &SearchDocument) -> Result<(), StorageError>;

    /// Fold one continuation page into an existing search document.
    fn record_page(
        &self,
        search_id: &str,
        jobs_added: i64,
        job_ids: &[i64],
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| StorageError::Timestamp(raw.to_string()))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

struct JobRow {
    id: i64,
    search_id: String,
    search_query: String,
    search_location: String,
    listing: String,
    fetched_at: String,
    created_at: String,
}

impl JobRow {
    fn into_stored(self) -> Result<(i64, StoredJob), StorageError> {
        let listing: JobListing = serde_json::from_str(&self.listing)?;
        Ok((
            self.id,
            StoredJob {
                listing,
                search_id: self.search_id,
                search_query: self.search_query,
                search_location: self.search_location,
                fetched_at: parse_timestamp(&self.fetched_at)?,
                created_at: parse_timestamp(&self.created_at)?,
            },
        ))
    }
}

const JOB_COLUMNS: &str =
    "id, search_id, search_query, search_location, listing, fetched_at, created_at";

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn init(&self) -> Result<(), StorageError> {
        self.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS job_listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                company_name TEXT NOT NULL,
                location TEXT NOT NULL,
                apply_link TEXT NOT NULL,
                search_id TEXT NOT NULL,
                search_query TEXT NOT NULL,
                search_location TEXT NOT NULL,
                listing TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_searches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                search_id TEXT NOT NULL,
                search_metadata TEXT NOT NULL,
                search_parameters TEXT NOT NULL,
                search_information TEXT NOT NULL,
                total_jobs INTEGER NOT NULL DEFAULT 0 CHECK (total_jobs >= 0),
                pages_processed INTEGER NOT NULL DEFAULT 0 CHECK (pages_processed >= 0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_search_refs (
                search_id TEXT NOT NULL REFERENCES job_searches(search_id),
                seq INTEGER NOT NULL,
                job_id INTEGER NOT NULL REFERENCES job_listings(id),
                PRIMARY KEY (search_id, seq)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_identity
                ON job_listings(title, company_name, location, apply_link);
            CREATE INDEX IF NOT EXISTS idx_jobs_search ON job_listings(search_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_fetched ON job_listings(fetched_at DESC);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_searches_id ON job_searches(search_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='job_listings'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'jobsweep init' first."));
        }
        Ok(())
    }

    // --- Job reads ---

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRow> {
        Ok(JobRow {
            id: row.get(0)?,
            search_id: row.get(1)?,
            search_query: row.get(2)?,
            search_location: row.get(3)?,
            listing: row.get(4)?,
            fetched_at: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    pub fn get_job(&self, id: i64) -> Result<Option<StoredJob>, StorageError> {
        let row = self
            .lock()
            .query_row(
                &format!("SELECT {} FROM job_listings WHERE id = ?1", JOB_COLUMNS),
                [id],
                Self::row_to_job,
            )
            .optional()?;
        row.map(|r| r.into_stored().map(|(_, job)| job)).transpose()
    }

    #[allow(dead_code)]
    pub fn find_job(&self, key: &JobKey) -> Result<Option<(i64, StoredJob)>, StorageError> {
        let row = self
            .lock()
            .query_row(
                &format!(
                    "SELECT {} FROM job_listings
                     WHERE title = ?1 AND company_name = ?2 AND location = ?3 AND apply_link = ?4",
                    JOB_COLUMNS
                ),
                params![key.title, key.company_name, key.location, key.apply_link],
                Self::row_to_job,
            )
            .optional()?;
        row.map(JobRow::into_stored).transpose()
    }

    /// Jobs whose most recent sighting came from `search_id`, newest first.
    pub fn jobs_for_search(&self, search_id: &str) -> Result<Vec<(i64, StoredJob)>, StorageError> {
        let rows = {
            let conn = self.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM job_listings WHERE search_id = ?1 ORDER BY fetched_at DESC, id",
                JOB_COLUMNS
            ))?;
            let rows = stmt
                .query_map([search_id], Self::row_to_job)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(JobRow::into_stored).collect()
    }

    pub fn count_jobs(&self) -> Result<i64, StorageError> {
        Ok(self
            .lock()
            .query_row("SELECT COUNT(*) FROM job_listings", [], |row| row.get(0))?)
    }

    // --- Search reads ---

    pub fn get_search(&self, search_id: &str) -> Result<Option<SearchDocument>, StorageError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT search_metadata, search_parameters, search_information,
                        total_jobs, pages_processed, created_at, updated_at
                 FROM job_searches WHERE search_id = ?1",
                [search_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((metadata, parameters, information, total_jobs, pages, created, updated)) = row
        else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT job_id FROM job_search_refs WHERE search_id = ?1 ORDER BY seq")?;
        let jobs = stmt
            .query_map([search_id], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(SearchDocument {
            search_metadata: serde_json::from_str(&metadata)?,
            search_parameters: serde_json::from_str(&parameters)?,
            search_information: serde_json::from_str(&information)?,
            total_jobs,
            pages_processed: pages,
            jobs,
            created_at: parse_timestamp(&created)?,
            updated_at: parse_timestamp(&updated)?,
        }))
    }
}

fn append_refs(
    tx: &rusqlite::Transaction<'_>,
    search_id: &str,
    job_ids: &[i64],
) -> Result<(), StorageError> {
    let next_seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq) + 1, 0) FROM job_search_refs WHERE search_id = ?1",
        [search_id],
        |row| row.get(0),
    )?;
    let mut stmt =
        tx.prepare("INSERT INTO job_search_refs (search_id, seq, job_id) VALUES (?1, ?2, ?3)")?;
    for (i, job_id) in job_ids.iter().enumerate() {
        stmt.execute(params![search_id, next_seq + i as i64, job_id])?;
    }
    Ok(())
}

impl JobStore for Database {
    fn upsert_job(&self, job: &StoredJob) -> Result<i64, StorageError> {
        let listing = serde_json::to_string(&job.listing)?;
        let id = self.lock().query_row(
            "INSERT INTO job_listings
                (title, company_name, location, apply_link, search_id, search_query,
                 search_location, listing, fetched_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(title, company_name, location, apply_link) DO UPDATE SET
                search_id = excluded.search_id,
                search_query = excluded.search_query,
                search_location = excluded.search_location,
                listing = excluded.listing,
                fetched_at = excluded.fetched_at
             RETURNING id",
            params![
                job.listing.title,
                job.listing.company_name,
                job.listing.location,
                job.listing.apply_link,
                job.search_id,
                job.search_query,
                job.search_location,
                listing,
                timestamp(&job.fetched_at),
                timestamp(&job.created_at),
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn insert_search(&self, doc: &SearchDocument) -> Result<(), StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO job_searches
                (search_id, search_metadata, search_parameters, search_information,
                 total_jobs, pages_processed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                doc.id(),
                serde_json::to_string(&doc.search_metadata)?,
                serde_json::to_string(&doc.search_parameters)?,
                serde_json::to_string(&doc.search_information)?,
                doc.total_jobs,
                doc.pages_processed,
                timestamp(&doc.created_at),
                timestamp(&doc.updated_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StorageError::DuplicateSearch(doc.id().to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        append_refs(&tx, doc.id(), &doc.jobs)?;
        tx.commit()?;
        Ok(())
    }

    fn record_page(
        &self,
        search_id: &str,
        jobs_added: i64,
        job_ids: &[i64],
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE job_searches
             SET total_jobs = total_jobs + ?1,
                 pages_processed = pages_processed + 1,
                 updated_at = ?2
             WHERE search_id = ?3",
            params![jobs_added, timestamp(&updated_at), search_id],
        )?;
        if updated == 0 {
            return Err(StorageError::SearchNotFound(search_id.to_string()));
        }
        append_refs(&tx, search_id, job_ids)?;
        tx.commit()?;
        Ok(())
    }
}

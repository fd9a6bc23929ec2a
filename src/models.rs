use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FieldIssue, ValidationError};

// --- Validation plumbing ---

#[derive(Debug, Default)]
pub struct Validator {
    issues: Vec<FieldIssue>,
}

fn at(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

impl Validator {
    pub fn issue(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    fn non_empty(&mut self, field: String, value: &str) {
        if value.trim().is_empty() {
            self.issue(field, "must not be empty");
        }
    }

    fn url(&mut self, field: String, value: &str) {
        if value.trim().is_empty() {
            self.issue(field, "must not be empty");
            return;
        }
        match Url::parse(value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => self.issue(field, format!("unsupported URL scheme '{}'", url.scheme())),
            Err(e) => self.issue(field, format!("is not a valid URL: {}", e)),
        }
    }

    fn non_negative(&mut self, field: String, value: Option<f64>) {
        match value {
            None => self.issue(field, "is required"),
            Some(v) if v.is_nan() || v < 0.0 => self.issue(field, "must be non-negative"),
            Some(_) => {}
        }
    }

    pub fn finish(self) -> Result<(), ValidationError> {
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues: self.issues })
        }
    }
}

pub trait Validate {
    /// Record every violation under `path` without stopping at the first.
    fn check(&self, path: &str, v: &mut Validator);

    fn validate(&self) -> Result<(), ValidationError> {
        let mut v = Validator::default();
        self.check("", &mut v);
        v.finish()
    }
}

/// Parse a URL into its canonical string form; unparseable input is returned as-is.
pub fn normalize_url(raw: &str) -> String {
    Url::parse(raw.trim())
        .map(|url| url.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

// --- Search metadata ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStatus {
    Success,
    Error,
    Pending,
}

impl SearchStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String, // "success", "error", "pending" in any case
    pub created_at: Option<DateTime<Utc>>,
    pub request_time_taken: Option<f64>,
    pub parsing_time_taken: Option<f64>,
    pub total_time_taken: Option<f64>,
    #[serde(default)]
    pub request_url: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub json_url: String,
}

impl SearchMetadata {
    pub fn status(&self) -> Option<SearchStatus> {
        SearchStatus::parse(&self.status)
    }
}

impl Validate for SearchMetadata {
    fn check(&self, path: &str, v: &mut Validator) {
        v.non_empty(at(path, "id"), &self.id);
        if self.status().is_none() {
            v.issue(
                at(path, "status"),
                format!("'{}' is not one of success, error, pending", self.status),
            );
        }
        if self.created_at.is_none() {
            v.issue(at(path, "created_at"), "is required");
        }
        v.non_negative(at(path, "request_time_taken"), self.request_time_taken);
        v.non_negative(at(path, "parsing_time_taken"), self.parsing_time_taken);
        v.non_negative(at(path, "total_time_taken"), self.total_time_taken);
        v.url(at(path, "request_url"), &self.request_url);
        v.url(at(path, "html_url"), &self.html_url);
        v.url(at(path, "json_url"), &self.json_url);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParameters {
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub google_domain: String,
    #[serde(default)]
    pub hl: String, // language
    #[serde(default)]
    pub gl: String, // geography
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Validate for SearchParameters {
    fn check(&self, path: &str, v: &mut Validator) {
        v.non_empty(at(path, "engine"), &self.engine);
        v.non_empty(at(path, "q"), &self.q);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchInformation {
    #[serde(default)]
    pub query_displayed: String,
    #[serde(default)]
    pub detected_location: String,
}

// --- Job listings ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHighlight {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedExtensions {
    pub posted_at: Option<String>,
    pub schedule: Option<String>,
    pub salary: Option<String>,
    pub health_insurance: Option<bool>,
    pub dental_insurance: Option<bool>,
    pub paid_time_off: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyLink {
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub via: String,
    #[serde(default)]
    pub description: String,
    pub job_highlights: Option<Vec<JobHighlight>>,
    pub extensions: Option<Vec<String>>,
    pub detected_extensions: Option<DetectedExtensions>,
    #[serde(default)]
    pub apply_link: String,
    #[serde(default)]
    pub apply_links: Vec<ApplyLink>,
    #[serde(default)]
    pub sharing_link: String,
    pub thumbnail: Option<String>,
}

impl JobListing {
    /// Rewrite every embedded URL into canonical form.
    pub fn normalize_urls(&mut self) {
        self.apply_link = normalize_url(&self.apply_link);
        self.sharing_link = normalize_url(&self.sharing_link);
        for link in &mut self.apply_links {
            link.link = normalize_url(&link.link);
        }
    }
}

impl Validate for JobListing {
    fn check(&self, path: &str, v: &mut Validator) {
        if self.position < 1 {
            v.issue(at(path, "position"), "must be at least 1");
        }
        v.non_empty(at(path, "title"), &self.title);
        v.non_empty(at(path, "company_name"), &self.company_name);
        v.non_empty(at(path, "location"), &self.location);
        v.non_empty(at(path, "via"), &self.via);
        v.non_empty(at(path, "description"), &self.description);
        v.url(at(path, "apply_link"), &self.apply_link);
        for (i, link) in self.apply_links.iter().enumerate() {
            v.url(at(path, &format!("apply_links[{}].link", i)), &link.link);
        }
        v.url(at(path, "sharing_link"), &self.sharing_link);
    }
}

// --- API response (transient) ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub search_metadata: SearchMetadata,
    pub search_parameters: SearchParameters,
    /// Only the first page of a query carries this.
    pub search_information: Option<SearchInformation>,
    #[serde(default)]
    pub jobs: Vec<JobListing>,
    /// Set by the orchestrator, never read from the payload.
    #[serde(skip_deserializing)]
    pub is_subsequent_page: bool,
}

// --- Persisted records ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub search_metadata: SearchMetadata,
    pub search_parameters: SearchParameters,
    pub search_information: SearchInformation,
    pub total_jobs: i64,
    pub pages_processed: i64,
    pub jobs: Vec<i64>, // row ids in job_listings, in discovery order
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchDocument {
    pub fn first_page(
        response: &SearchResponse,
        search_information: SearchInformation,
        job_ids: Vec<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            search_metadata: response.search_metadata.clone(),
            search_parameters: response.search_parameters.clone(),
            search_information,
            total_jobs: job_ids.len() as i64,
            pages_processed: 1,
            jobs: job_ids,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.search_metadata.id
    }
}

/// The identity of a job across all fetches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub apply_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    #[serde(flatten)]
    pub listing: JobListing,
    pub search_id: String,
    pub search_query: String,
    pub search_location: String,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>, // kept from the first sighting
}

impl StoredJob {
    #[allow(dead_code)]
    pub fn key(&self) -> JobKey {
        JobKey {
            title: self.listing.title.clone(),
            company_name: self.listing.company_name.clone(),
            location: self.listing.location.clone(),
            apply_link: self.listing.apply_link.clone(),
        }
    }
}

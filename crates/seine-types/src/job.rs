//! The crawl job record and its lifecycle.

use crate::auth::AuthSnapshot;
use crate::config::CrawlConfig;
use crate::errors::CrawlError;
use crate::progress::Progress;
use crate::request::SourceKind;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

/// Job lifecycle states. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A durable, self-contained crawl job. Config and credentials are
/// snapshotted at creation and never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: Uuid,
    pub source_type: SourceKind,
    pub entity_type: String,
    pub config: CrawlConfig,
    /// Opaque source configuration captured at submission.
    pub source_config: Option<serde_json::Value>,
    /// Credentials captured at submission; redacted on external exposure.
    pub auth: Option<AuthSnapshot>,
    pub refresh_source: bool,
    pub status: JobStatus,
    pub progress: Progress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result_count: u64,
    pub failed_count: u64,
    pub documents_saved: u64,
    pub seed_urls: Vec<String>,
}

impl CrawlJob {
    pub fn new(
        source_type: SourceKind,
        entity_type: impl Into<String>,
        seed_urls: Vec<String>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_type,
            entity_type: entity_type.into(),
            config,
            source_config: None,
            auth: None,
            refresh_source: false,
            status: JobStatus::Pending,
            progress: Progress::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_heartbeat: None,
            error: None,
            result_count: 0,
            failed_count: 0,
            documents_saved: 0,
            seed_urls,
        }
    }

    /// Move to `next`, enforcing the lifecycle: pending starts exactly once,
    /// running ends in exactly one terminal state, terminal states never
    /// change again.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), CrawlError> {
        let allowed = match (self.status, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Running, s) if s.is_terminal() => true,
            _ => false,
        };
        if !allowed {
            return Err(CrawlError::invalid_state(
                self.id,
                format!("cannot transition from {:?} to {:?}", self.status, next),
            ));
        }
        match next {
            JobStatus::Running => {
                self.started_at = Some(Utc::now());
                self.last_heartbeat = self.started_at;
            }
            s if s.is_terminal() => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// A copy of this job's immutable fields as a fresh pending job with a
    /// new id and zeroed progress.
    pub fn rerun(&self, config_override: Option<CrawlConfig>) -> Self {
        let mut job = Self::new(
            self.source_type,
            self.entity_type.clone(),
            self.seed_urls.clone(),
            config_override.unwrap_or_else(|| self.config.clone()),
        );
        job.source_config = self.source_config.clone();
        job.auth = self.auth.clone();
        job.refresh_source = self.refresh_source;
        job
    }

    /// Externally safe serialization: the auth blob is masked wholesale and
    /// credential-looking material inside the source-config blob is masked
    /// key-by-key.
    pub fn redacted_view(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            if self.auth.is_some() {
                obj.insert("auth".into(), serde_json::Value::String("***".into()));
            }
            if let Some(source_config) = obj.get_mut("source_config") {
                redact_value(source_config);
            }
        }
        value
    }
}

fn sensitive_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(api_key|token|secret|password|credential|auth|bearer|key|private|public)")
            .expect("sensitive-key pattern is valid")
    })
}

fn inline_secret_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(api_key|token|secret|password|credential|auth|bearer|key|private|public)(\s*[=:]\s*)\S+",
        )
        .expect("inline-secret pattern is valid")
    })
}

/// Recursively mask credential material in an opaque JSON blob: values under
/// sensitive keys are replaced outright, and `key=value`-shaped fragments in
/// free-form strings are masked in place.
fn redact_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if sensitive_key_pattern().is_match(key) {
                    *entry = serde_json::Value::String("***".into());
                } else {
                    redact_value(entry);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                redact_value(item);
            }
        }
        serde_json::Value::String(text) => {
            if inline_secret_pattern().is_match(text) {
                *text = inline_secret_pattern()
                    .replace_all(text, "$1$2***")
                    .into_owned();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> CrawlJob {
        CrawlJob::new(
            SourceKind::Web,
            "page",
            vec!["https://example.com".into()],
            CrawlConfig::default(),
        )
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Pending);
        job.transition(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mut job = job();
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Cancelled).unwrap();
        assert!(job.transition(JobStatus::Running).is_err());
        assert!(job.transition(JobStatus::Completed).is_err());
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn pending_cannot_jump_to_terminal() {
        let mut job = job();
        assert!(job.transition(JobStatus::Completed).is_err());
    }

    #[test]
    fn rerun_copies_immutables_and_resets_progress() {
        let mut original = job();
        original.source_config = Some(json!({"base_url": "https://example.com"}));
        original.transition(JobStatus::Running).unwrap();
        original.progress.add_discovered(4);
        original.progress.record_success();
        original.transition(JobStatus::Completed).unwrap();

        let copy = original.rerun(None);
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.status, JobStatus::Pending);
        assert_eq!(copy.progress, Progress::default());
        assert_eq!(copy.seed_urls, original.seed_urls);
        assert_eq!(copy.config, original.config);
        assert_eq!(copy.source_config, original.source_config);
        assert!(copy.started_at.is_none());
    }

    #[test]
    fn rerun_applies_config_override() {
        let original = job();
        let override_config = CrawlConfig {
            max_depth: 9,
            ..Default::default()
        };
        let copy = original.rerun(Some(override_config.clone()));
        assert_eq!(copy.config, override_config);
    }

    #[test]
    fn redaction_masks_auth_and_sensitive_keys() {
        let mut job = job();
        job.auth = Some(AuthSnapshot::default());
        job.source_config = Some(json!({
            "base_url": "https://jira.example.com",
            "api_token": "s3cr3t",
            "nested": {"client_secret": "hidden", "note": "password: hunter2"},
        }));

        let view = job.redacted_view();
        assert_eq!(view["auth"], "***");
        assert_eq!(view["source_config"]["api_token"], "***");
        assert_eq!(view["source_config"]["nested"]["client_secret"], "***");
        let note = view["source_config"]["nested"]["note"].as_str().unwrap();
        assert!(!note.contains("hunter2"), "inline secret leaked: {note}");
        assert_eq!(
            view["source_config"]["base_url"],
            "https://jira.example.com"
        );
    }

    #[test]
    fn job_record_serde_roundtrip() {
        let job = job();
        let json = serde_json::to_string(&job).unwrap();
        let back: CrawlJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.status, job.status);
        assert_eq!(back.seed_urls, job.seed_urls);
    }
}

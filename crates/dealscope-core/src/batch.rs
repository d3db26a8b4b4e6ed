//! Runs many transcripts through the pipeline on a bounded worker pool.
//!
//! Each transcript succeeds or fails on its own. Once the backend rejects our
//! credentials or quota, transcripts that have not been sent yet are skipped
//! with the same failure kind instead of hammering the backend.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use serde::Serialize;
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinSet,
};
use tracing::{error, info, warn};

use crate::{
    error::{DealscopeError, FailureKind},
    pipeline::{Pipeline, load_transcript},
    types::ClientId,
};

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded {
        record_dir: PathBuf,
        temperature: String,
        priority: f64,
        diagnostics: usize,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

/// Result of processing one transcript file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub source: PathBuf,
    /// `None` when the file name is not a usable client id.
    pub client_id: Option<ClientId>,
    pub status: ItemStatus,
    /// Whether the inference backend was called for this item.
    pub reached_backend: bool,
}

impl ItemOutcome {
    /// Client id, or the file name when no id could be derived.
    pub fn label(&self) -> String {
        match &self.client_id {
            Some(id) => id.to_string(),
            None => self
                .source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.source.display().to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ItemStatus::Succeeded { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.status {
            ItemStatus::Failed { kind, .. } => Some(kind),
            ItemStatus::Succeeded { .. } => None,
        }
    }

    fn failed(source: &Path, client_id: Option<ClientId>, err: &DealscopeError, reached_backend: bool) -> Self {
        Self {
            source: source.to_path_buf(),
            client_id,
            status: ItemStatus::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
            reached_backend,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Sorted by client id.
    pub outcomes: Vec<ItemOutcome>,
    pub overview_entries: usize,
    pub overview_error: Option<String>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn failures_by_kind(&self) -> Vec<(FailureKind, usize)> {
        let mut counts: HashMap<FailureKind, usize> = HashMap::new();
        for kind in self.outcomes.iter().filter_map(ItemOutcome::failure_kind) {
            *counts.entry(kind).or_default() += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        counts
    }

    /// True when every transcript that reached the backend failed for infrastructure reasons.
    pub fn backend_unreachable(&self) -> bool {
        let mut reached = self.outcomes.iter().filter(|o| o.reached_backend).peekable();
        reached.peek().is_some()
            && reached.all(|o| o.failure_kind().is_some_and(FailureKind::is_infrastructure))
    }
}

pub struct BatchOrchestrator {
    pipeline: Pipeline,
    concurrency: usize,
    progress: Option<mpsc::UnboundedSender<ItemOutcome>>,
}

impl BatchOrchestrator {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            concurrency: DEFAULT_CONCURRENCY,
            progress: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Receive each outcome as soon as its transcript finishes.
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<ItemOutcome>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn run(&self, paths: Vec<PathBuf>) -> BatchReport {
        info!(transcripts = paths.len(), concurrency = self.concurrency, "Starting batch");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let halted: Arc<OnceLock<FailureKind>> = Arc::new(OnceLock::new());
        let mut tasks = JoinSet::new();
        let mut sources = HashMap::new();

        for path in paths {
            let pipeline = self.pipeline.clone();
            let semaphore = semaphore.clone();
            let halted = halted.clone();
            let source = path.clone();
            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                process_one(&pipeline, &source, &halted).await
            });
            sources.insert(handle.id(), path);
        }

        let mut outcomes = Vec::with_capacity(sources.len());
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let source = sources.get(&e.id()).cloned().unwrap_or_default();
                    error!(source = %source.display(), error = %e, "Worker task failed");
                    ItemOutcome {
                        client_id: ClientId::from_path(&source).ok(),
                        source,
                        status: ItemStatus::Failed {
                            kind: FailureKind::Internal,
                            message: e.to_string(),
                        },
                        reached_backend: false,
                    }
                }
            };
            if let Some(progress) = &self.progress {
                let _ = progress.send(outcome.clone());
            }
            outcomes.push(outcome);
        }
        outcomes.sort_by(|a, b| a.label().cmp(&b.label()).then_with(|| a.source.cmp(&b.source)));

        let mut report = BatchReport {
            outcomes,
            ..Default::default()
        };
        match self.pipeline.store().rebuild_overview().await {
            Ok(entries) => report.overview_entries = entries.len(),
            Err(e) => {
                error!(error = %e, "Failed to rebuild overview");
                report.overview_error = Some(e.to_string());
            }
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Batch finished"
        );
        report
    }
}

async fn process_one(pipeline: &Pipeline, source: &Path, halted: &OnceLock<FailureKind>) -> ItemOutcome {
    let transcript = match load_transcript(source).await {
        Ok(transcript) => transcript,
        Err(e) => {
            let err = DealscopeError::from(e);
            warn!(source = %source.display(), kind = %err.kind(), error = %err, "Transcript rejected");
            return ItemOutcome::failed(source, ClientId::from_path(source).ok(), &err, false);
        }
    };
    let client_id = transcript.client_id.clone();

    if let Some(kind) = halted.get() {
        warn!(client_id = %client_id, %kind, "Skipped: backend refused an earlier request");
        return ItemOutcome {
            source: source.to_path_buf(),
            client_id: Some(client_id),
            status: ItemStatus::Failed {
                kind: *kind,
                message: format!("not sent: backend reported {} for an earlier transcript", kind),
            },
            reached_backend: false,
        };
    }

    match pipeline.process(&transcript).await {
        Ok(record) => ItemOutcome {
            source: source.to_path_buf(),
            status: ItemStatus::Succeeded {
                record_dir: pipeline.store().client_dir(&client_id),
                temperature: record.temperature.to_string(),
                priority: record.scores.priority(),
                diagnostics: record.diagnostics.len(),
            },
            client_id: Some(client_id),
            reached_backend: true,
        },
        Err(err) => {
            let kind = err.kind();
            if kind.is_credential_failure() && halted.set(kind).is_ok() {
                error!(client_id = %client_id, %kind, "Backend refused credentials, skipping remaining transcripts");
            }
            warn!(client_id = %client_id, %kind, error = %err, "Analysis failed");
            ItemOutcome::failed(source, Some(client_id), &err, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, kind: Option<FailureKind>, reached_backend: bool) -> ItemOutcome {
        let status = match kind {
            Some(kind) => ItemStatus::Failed {
                kind,
                message: kind.to_string(),
            },
            None => ItemStatus::Succeeded {
                record_dir: PathBuf::from(id),
                temperature: "Warm".into(),
                priority: 0.5,
                diagnostics: 0,
            },
        };
        ItemOutcome {
            source: PathBuf::from(format!("{id}.txt")),
            client_id: ClientId::new(id).ok(),
            status,
            reached_backend,
        }
    }

    fn report(outcomes: Vec<ItemOutcome>) -> BatchReport {
        BatchReport {
            outcomes,
            ..Default::default()
        }
    }

    #[test]
    fn test_backend_unreachable_requires_all_reached_items_to_fail_on_infrastructure() {
        let down = report(vec![
            outcome("a", Some(FailureKind::Timeout), true),
            outcome("b", Some(FailureKind::Transport), true),
            outcome("c", Some(FailureKind::Input), false),
        ]);
        assert!(down.backend_unreachable());

        let partly_up = report(vec![
            outcome("a", Some(FailureKind::Timeout), true),
            outcome("b", Some(FailureKind::Parse), true),
        ]);
        assert!(!partly_up.backend_unreachable());

        let never_called = report(vec![outcome("c", Some(FailureKind::Input), false)]);
        assert!(!never_called.backend_unreachable());
    }

    #[test]
    fn test_counts_and_failure_breakdown() {
        let r = report(vec![
            outcome("a", None, true),
            outcome("b", Some(FailureKind::Parse), true),
            outcome("c", Some(FailureKind::Parse), true),
            outcome("d", Some(FailureKind::Schema), true),
        ]);
        assert_eq!(r.succeeded(), 1);
        assert_eq!(r.failed(), 3);
        assert_eq!(
            r.failures_by_kind(),
            vec![(FailureKind::Parse, 2), (FailureKind::Schema, 1)]
        );
    }

    #[test]
    fn test_label_falls_back_to_file_name() {
        let o = ItemOutcome {
            source: PathBuf::from("/in/.hidden.txt"),
            client_id: None,
            status: ItemStatus::Failed {
                kind: FailureKind::Input,
                message: "bad id".into(),
            },
            reached_backend: false,
        };
        assert_eq!(o.label(), ".hidden.txt");
    }
}

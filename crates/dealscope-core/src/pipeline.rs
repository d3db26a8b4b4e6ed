use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::fs;
use tracing::{debug, info};

use crate::{
    error::{InputError, Result},
    inference::InferenceAdapter,
    normalize::{RecordContext, normalize},
    prompt::compile_prompt,
    rubric::Rubric,
    store::RecordStore,
    types::{AnalysisRecord, ClientId, Transcript},
};

/// List the `.txt` transcripts in a directory, sorted by path
pub async fn discover_transcripts(dir: &Path) -> std::result::Result<Vec<PathBuf>, InputError> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| read_dir_error(dir, e))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|source| InputError::Read {
        path: dir.to_path_buf(),
        source,
    })? {
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        let is_txt = path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("txt"))
            .unwrap_or(false);
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_txt && is_file && !hidden {
            paths.push(path);
        }
    }

    paths.sort();
    debug!(dir = %dir.display(), count = paths.len(), "Discovered transcripts");
    Ok(paths)
}

fn read_dir_error(dir: &Path, source: io::Error) -> InputError {
    match source.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => InputError::MissingDirectory {
            path: dir.to_path_buf(),
        },
        _ => InputError::Read {
            path: dir.to_path_buf(),
            source,
        },
    }
}

/// Load a transcript file; the client id is the file's base name
pub async fn load_transcript(path: &Path) -> std::result::Result<Transcript, InputError> {
    let client_id = ClientId::from_path(path)?;
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| InputError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if text.trim().is_empty() {
        return Err(InputError::EmptyTranscript {
            path: path.to_path_buf(),
        });
    }

    let mut transcript = Transcript::new(client_id, text);
    transcript.source = Some(path.to_path_buf());
    Ok(transcript)
}

/// Compile, infer, normalize and store, strictly in that order, for one transcript.
#[derive(Clone)]
pub struct Pipeline {
    rubric: Arc<Rubric>,
    adapter: InferenceAdapter,
    store: Arc<RecordStore>,
    instructions: Option<String>,
}

impl Pipeline {
    pub fn new(rubric: Arc<Rubric>, adapter: InferenceAdapter, store: Arc<RecordStore>) -> Self {
        Self {
            rubric,
            adapter,
            store,
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Produce a validated record without persisting it.
    pub async fn analyze(&self, transcript: &Transcript) -> Result<AnalysisRecord> {
        let prompt = compile_prompt(&self.rubric, transcript, self.instructions.as_deref());
        debug!(
            client_id = %transcript.client_id,
            words = transcript.word_count(),
            prompt_bytes = prompt.len(),
            "Prompt compiled"
        );

        let raw = self.adapter.analyze(&prompt).await?;
        let ctx = RecordContext::for_transcript(transcript);
        let record = normalize(&raw, &self.rubric, &ctx)?;

        for diagnostic in &record.diagnostics {
            debug!(client_id = %transcript.client_id, %diagnostic, "Normalization diagnostic");
        }
        Ok(record)
    }

    /// Analyze and persist; returns the stored record.
    pub async fn process(&self, transcript: &Transcript) -> Result<AnalysisRecord> {
        let record = self.analyze(transcript).await?;
        self.store.save(&record).await?;
        info!(
            client_id = %record.client_id,
            temperature = %record.temperature,
            priority = record.scores.priority(),
            "Analysis stored"
        );
        Ok(record)
    }
}

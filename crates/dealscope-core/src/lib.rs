//! Dealscope Core Library
//!
//! Turns sales-meeting transcripts into validated, scored analysis records:
//! rubric-driven prompts, a retrying inference adapter, response
//! normalization, seller coaching, and a per-client record store with an
//! aggregate overview.

pub mod batch;
pub mod coaching;
pub mod error;
pub mod format;
pub mod inference;
pub mod normalize;
pub mod overview;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod rubric;
pub mod store;
pub mod types;

// Re-export commonly used items at crate root
pub use batch::{BatchOrchestrator, BatchReport, DEFAULT_CONCURRENCY, ItemOutcome, ItemStatus};
pub use coaching::{ObjectionCategory, SellerPerformance, respond_to_objections};
pub use error::{
    DealscopeError, FailureKind, InferenceError, InputError, Result, RubricError, StoreError,
    ValidationError, ValidationErrorKind,
};
pub use format::{
    format_coaching, format_executive_report, format_follow_up, format_next_steps,
    format_scorecard, format_summary,
};
pub use inference::{ChatCompletionsBackend, InferenceAdapter, InferenceBackend, RetryPolicy};
pub use normalize::{RecordContext, normalize};
pub use overview::{ActionPlan, ExecutiveReport, OverviewEntry, PriorityClass};
pub use pipeline::{Pipeline, discover_transcripts, load_transcript};
pub use prompt::{CompiledPrompt, compile_prompt};
pub use provider::{BackendSettings, Provider, ProviderConfig, ProviderError};
pub use rubric::Rubric;
pub use store::RecordStore;
pub use types::{AnalysisRecord, ClientId, Diagnostic, Narrative, Temperature, Transcript};

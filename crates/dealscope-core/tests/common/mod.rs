#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dealscope_core::{
    CompiledPrompt, InferenceAdapter, InferenceBackend, InferenceError, Pipeline, RecordStore,
    RetryPolicy, Rubric,
};

/// Backend that answers per client, keyed by the client id named in the prompt.
pub struct ScriptedBackend {
    replies: Mutex<HashMap<String, Result<String, InferenceError>>>,
    fallback: Option<InferenceError>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every client without a scripted reply gets this error.
    pub fn failing_with(error: InferenceError) -> Self {
        Self {
            fallback: Some(error),
            ..Self::new()
        }
    }

    pub fn reply(self, client: &str, text: impl Into<String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(client.to_string(), Ok(text.into()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn client_in(prompt: &CompiledPrompt) -> String {
    let marker = "with client \"";
    let start = prompt.user.find(marker).unwrap() + marker.len();
    let end = prompt.user[start..].find('"').unwrap();
    prompt.user[start..start + end].to_string()
}

fn clone_error(error: &InferenceError) -> InferenceError {
    match error {
        InferenceError::Authentication { provider, reason } => InferenceError::Authentication {
            provider: provider.clone(),
            reason: reason.clone(),
        },
        InferenceError::Quota { provider, reason } => InferenceError::Quota {
            provider: provider.clone(),
            reason: reason.clone(),
        },
        other => InferenceError::Transport {
            provider: "scripted".into(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn complete(&self, prompt: &CompiledPrompt) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let client = client_in(prompt);

        if let Some(reply) = self.replies.lock().unwrap().get(&client) {
            return match reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(clone_error(e)),
            };
        }
        match &self.fallback {
            Some(error) => Err(clone_error(error)),
            None => Ok(valid_response(0.8, 0.8, 0.6)),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn valid_response(urgency: f64, need: f64, fit: f64) -> String {
    serde_json::json!({
        "executive_summary": "Mid-size logistics firm evaluating a routing tool.",
        "highlights": ["Peak season starts in October"],
        "scores": {"urgency": urgency, "need": need, "fit": fit, "confidence": 0.6},
        "temperature": "Hot",
        "frameworks": {
            "bant": {"budget": "Budget set aside", "authority": "COO", "need": "Late deliveries", "timeline": "Before October"},
            "meddic": {"metrics": "On-time rate", "economic_buyer": "COO", "decision_criteria": "Integration", "decision_process": "Pilot then contract", "identify_pain": "Late deliveries", "champion": "Ops manager"},
            "spin": {"situation": "Manual routing", "problem": "Late trucks", "implication": "Lost contracts", "need_payoff": "Fewer penalties"}
        },
        "stakeholders": [{"name": "Sam", "role": "COO", "influence": "High", "stance": "Favorable"}],
        "objections": ["Integration effort"],
        "next_steps": [{"action": "Schedule pilot kickoff", "deadline": "Next week", "owner": "Rep", "priority": "High"}],
        "strategic_recommendations": ["Lead with the pilot"],
        "follow_up_email": "Subject: Pilot\n\nHi Sam, ...",
        "call_script": "1. Confirm pilot scope"
    })
    .to_string()
}

pub fn write_transcripts(dir: &Path, clients: &[&str]) {
    for client in clients {
        std::fs::write(
            dir.join(format!("{client}.txt")),
            format!("Rep: Thanks for joining, {client}.\nClient: Our deliveries keep slipping."),
        )
        .unwrap();
    }
}

pub fn pipeline(backend: Arc<ScriptedBackend>, output: &Path) -> Pipeline {
    let rubric = Arc::new(Rubric::standard());
    let policy = RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    let adapter = InferenceAdapter::new(backend, policy, Duration::from_secs(5));
    let store = Arc::new(RecordStore::new(output, rubric.clone()));
    Pipeline::new(rubric, adapter, store)
}

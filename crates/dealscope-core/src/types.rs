use std::{fmt, path::Path, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{coaching::SellerPerformance, error::InputError};

/// Identifier of one client, used verbatim as its directory name in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    pub fn new(raw: impl Into<String>) -> Result<Self, InputError> {
        let raw = raw.into();
        let id = raw.trim();
        let reason = if id.is_empty() {
            Some("must not be empty")
        } else if id.starts_with('.') {
            Some("must not start with '.'")
        } else if id.contains(['/', '\\']) {
            Some("must not contain path separators")
        } else if id.chars().any(char::is_control) {
            Some("must not contain control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(InputError::InvalidClientId { id: raw, reason }),
            None => Ok(Self(id.to_string())),
        }
    }

    /// Derive the client id from a transcript file's base name.
    pub fn from_path(path: &Path) -> Result<Self, InputError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::new(stem)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ClientId {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One meeting transcript, read-only once loaded.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub client_id: ClientId,
    pub text: String,
    pub source: Option<PathBuf>,
    pub ingested_at: DateTime<Utc>,
}

impl Transcript {
    pub fn new(client_id: ClientId, text: impl Into<String>) -> Self {
        Self {
            client_id,
            text: text.into(),
            source: None,
            ingested_at: Utc::now(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// On-disk form of `Narrative::NotIdentified`.
pub const NOT_IDENTIFIED: &str = "[not identified]";

/// Answers a model gives when it has no evidence for a field.
const PLACEHOLDER_ANSWERS: &[&str] = &[
    NOT_IDENTIFIED,
    "not identified",
    "not identified.",
    "n/a",
    "na",
    "none",
    "unknown",
    "not mentioned",
    "not specified",
    "-",
];

/// Free text taken from transcript evidence, or the explicit absence of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Narrative {
    Identified(String),
    NotIdentified,
}

impl Narrative {
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        let lowered = trimmed.to_lowercase();
        if trimmed.is_empty() || PLACEHOLDER_ANSWERS.contains(&lowered.as_str()) {
            Narrative::NotIdentified
        } else {
            Narrative::Identified(trimmed.to_string())
        }
    }

    pub fn is_identified(&self) -> bool {
        matches!(self, Narrative::Identified(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Narrative::Identified(text) => text,
            Narrative::NotIdentified => NOT_IDENTIFIED,
        }
    }
}

impl fmt::Display for Narrative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Narrative {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Narrative {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        Ok(text
            .map(|t| Narrative::from_text(&t))
            .unwrap_or(Narrative::NotIdentified))
    }
}

/// Error returned when a label does not name a variant of a categorical enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLabel(pub String);

impl fmt::Display for UnknownLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown label {:?}", self.0)
    }
}

impl std::error::Error for UnknownLabel {}

macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownLabel;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(UnknownLabel(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }
    };
}

labelled_enum!(
    /// Categorical lead readiness.
    Temperature { Cold => "Cold", Warm => "Warm", Hot => "Hot" }
);

labelled_enum!(
    Influence { High => "High", Medium => "Medium", Low => "Low" }
);

labelled_enum!(
    /// A stakeholder's position towards the deal.
    Stance { Favorable => "Favorable", Neutral => "Neutral", Opposed => "Opposed" }
);

labelled_enum!(
    Priority { High => "High", Medium => "Medium", Low => "Low" }
);

/// Bounded lead scores, each in the rubric's score range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub urgency: f64,
    pub need: f64,
    pub fit: f64,
    pub confidence: f64,
}

impl Scores {
    /// Mean of urgency, need and fit, rounded to two decimals.
    pub fn priority(&self) -> f64 {
        let mean = (self.urgency + self.need + self.fit) / 3.0;
        (mean * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkSlot {
    pub name: String,
    pub evidence: Narrative,
}

/// One qualification framework (BANT, MEDDIC, SPIN) filled from transcript evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkAssessment {
    pub name: String,
    pub slots: Vec<FrameworkSlot>,
}

impl FrameworkAssessment {
    pub fn slot(&self, name: &str) -> Option<&Narrative> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .map(|s| &s.evidence)
    }

    pub fn identified_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.evidence.is_identified())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stakeholder {
    pub name: Narrative,
    pub role: Narrative,
    pub influence: Influence,
    pub stance: Stance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextStep {
    pub action: Narrative,
    pub deadline: Narrative,
    pub owner: Narrative,
    pub priority: Priority,
}

/// Corrections and gaps recorded while normalizing a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// The structured block had to be extracted from surrounding text.
    Repaired,
    Clamped {
        field: String,
        raw: f64,
        value: f64,
    },
    TemperatureDowngraded {
        from: Temperature,
        to: Temperature,
    },
    MissingNarrative {
        field: String,
    },
    /// A free-text field arrived as structured data and was flattened to text.
    Flattened {
        field: String,
    },
    /// A free-text field held a value with no usable text; the sentinel was used instead.
    Discarded {
        field: String,
        found: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Repaired => {
                write!(f, "structured block extracted from surrounding text")
            }
            Diagnostic::Clamped { field, raw, value } => {
                write!(f, "`{}` clamped from {} to {}", field, raw, value)
            }
            Diagnostic::TemperatureDowngraded { from, to } => write!(
                f,
                "temperature downgraded from {} to {}: scores do not support it",
                from, to
            ),
            Diagnostic::MissingNarrative { field } => {
                write!(f, "`{}` missing from response", field)
            }
            Diagnostic::Flattened { field } => {
                write!(f, "`{}` was structured data, flattened to text", field)
            }
            Diagnostic::Discarded { field, found } => {
                write!(f, "`{}` held {}, not usable as text", field, found)
            }
        }
    }
}

/// Validated, scored analysis of one client meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub client_id: ClientId,
    pub rubric_version: String,
    pub analysis_date: DateTime<Utc>,
    pub executive_summary: Narrative,
    pub highlights: Vec<String>,
    pub scores: Scores,
    pub temperature: Temperature,
    pub frameworks: Vec<FrameworkAssessment>,
    pub stakeholders: Vec<Stakeholder>,
    pub objections: Vec<String>,
    pub next_steps: Vec<NextStep>,
    pub strategic_recommendations: Vec<String>,
    pub follow_up_email: Narrative,
    pub call_script: Narrative,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    /// Measured on the transcript, not produced by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_performance: Option<SellerPerformance>,
}

impl AnalysisRecord {
    pub fn framework(&self, name: &str) -> Option<&FrameworkAssessment> {
        self.frameworks
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn was_clamped(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::Clamped { .. }))
    }

    pub fn was_downgraded(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::TemperatureDowngraded { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_from_path_uses_stem() {
        let id = ClientId::from_path(Path::new("/meetings/Acme Corp.txt")).unwrap();
        assert_eq!(id.as_str(), "Acme Corp");
    }

    #[test]
    fn test_client_id_rejects_unsafe_names() {
        assert!(ClientId::new("").is_err());
        assert!(ClientId::new("   ").is_err());
        assert!(ClientId::new(".staging").is_err());
        assert!(ClientId::new("..").is_err());
        assert!(ClientId::new("a/b").is_err());
        assert!(ClientId::new("a\\b").is_err());
        assert!(ClientId::new("bad\nname").is_err());
        assert!(ClientId::new("Globex").is_ok());
    }

    #[test]
    fn test_client_id_deserialization_validates() {
        let ok: ClientId = serde_json::from_str("\"Initech\"").unwrap();
        assert_eq!(ok.as_str(), "Initech");
        assert!(serde_json::from_str::<ClientId>("\"../etc\"").is_err());
    }

    #[test]
    fn test_narrative_placeholders_become_sentinel() {
        assert_eq!(Narrative::from_text(""), Narrative::NotIdentified);
        assert_eq!(Narrative::from_text("  N/A "), Narrative::NotIdentified);
        assert_eq!(Narrative::from_text("Not identified"), Narrative::NotIdentified);
        assert_eq!(
            Narrative::from_text(" Budget approved for Q3 "),
            Narrative::Identified("Budget approved for Q3".into())
        );
    }

    #[test]
    fn test_narrative_sentinel_is_distinct_from_empty_string() {
        let json = serde_json::to_string(&Narrative::NotIdentified).unwrap();
        assert_eq!(json, format!("\"{}\"", NOT_IDENTIFIED));
        assert_ne!(Narrative::NotIdentified.as_str(), "");

        let back: Narrative = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Narrative::NotIdentified);
        let null: Narrative = serde_json::from_str("null").unwrap();
        assert_eq!(null, Narrative::NotIdentified);
    }

    #[test]
    fn test_labels_parse_exactly() {
        assert_eq!("Hot".parse::<Temperature>().unwrap(), Temperature::Hot);
        assert!("hot".parse::<Temperature>().is_err());
        assert_eq!("Opposed".parse::<Stance>().unwrap(), Stance::Opposed);
        assert!("Unsure".parse::<Stance>().is_err());
        assert_eq!(Priority::ALL.len(), 3);
    }

    #[test]
    fn test_priority_is_rounded_mean_of_three_scores() {
        let scores = Scores {
            urgency: 0.9,
            need: 0.4,
            fit: 0.8,
            confidence: 0.1,
        };
        assert_eq!(scores.priority(), 0.7);
    }
}

//! The analytical rubric: which fields an analysis must contain, how each is
//! typed, which categorical values are allowed, and how scores are banded.
//!
//! Every other component takes the rubric by reference. Swapping the rubric
//! (for example with `Rubric::from_json_file`) changes prompts and validation
//! together without touching code.

use std::{collections::HashSet, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::RubricError,
    types::{Influence, Priority, Stance, Temperature},
};

/// Slot of the `AnalysisRecord` a rubric field fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    ExecutiveSummary,
    Highlights,
    Scores,
    Temperature,
    Frameworks,
    Stakeholders,
    Objections,
    NextSteps,
    StrategicRecommendations,
    FollowUpEmail,
    CallScript,
}

impl RecordField {
    pub const ALL: &'static [RecordField] = &[
        RecordField::ExecutiveSummary,
        RecordField::Highlights,
        RecordField::Scores,
        RecordField::Temperature,
        RecordField::Frameworks,
        RecordField::Stakeholders,
        RecordField::Objections,
        RecordField::NextSteps,
        RecordField::StrategicRecommendations,
        RecordField::FollowUpEmail,
        RecordField::CallScript,
    ];

    /// JSON key used by the built-in rubric.
    pub fn default_key(self) -> &'static str {
        match self {
            RecordField::ExecutiveSummary => "executive_summary",
            RecordField::Highlights => "highlights",
            RecordField::Scores => "scores",
            RecordField::Temperature => "temperature",
            RecordField::Frameworks => "frameworks",
            RecordField::Stakeholders => "stakeholders",
            RecordField::Objections => "objections",
            RecordField::NextSteps => "next_steps",
            RecordField::StrategicRecommendations => "strategic_recommendations",
            RecordField::FollowUpEmail => "follow_up_email",
            RecordField::CallScript => "call_script",
        }
    }

    /// Scores and temperature carry the classification; a record without them is meaningless.
    pub fn must_be_mandatory(self) -> bool {
        matches!(self, RecordField::Scores | RecordField::Temperature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// Absence rejects the response.
    Mandatory,
    /// Absence is recorded with the not-identified sentinel.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field: RecordField,
    /// JSON key the model must use.
    pub key: String,
    pub requirement: Requirement,
    /// What the model should put there; rendered into the prompt.
    pub guidance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSpec {
    pub name: String,
    pub guidance: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBounds {
    pub min: f64,
    pub max: f64,
}

impl ScoreBounds {
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Score range and its meaning, e.g. `0.7-0.8` = significant / good.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBand {
    pub min: f64,
    pub range: String,
    pub meaning: String,
}

/// Minimum scores a lead needs before it may be labelled Hot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HotGate {
    pub urgency: f64,
    pub need: f64,
    pub fit: f64,
}

/// Allowed labels for one categorical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDomain {
    pub values: Vec<String>,
}

impl EnumDomain {
    fn of(values: &[&str]) -> Self {
        Self {
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Canonical label matching `raw` (trimmed, case-insensitive).
    pub fn resolve(&self, raw: &str) -> Option<&str> {
        let raw = raw.trim();
        self.values
            .iter()
            .find(|v| v.eq_ignore_ascii_case(raw))
            .map(String::as_str)
    }

    pub fn allowed(&self) -> String {
        self.values.join(", ")
    }

    fn check<T: FromStr>(&self, name: &str) -> Result<(), RubricError> {
        if self.values.is_empty() {
            return Err(RubricError::invalid(format!("enum `{}` has no values", name)));
        }
        let mut seen = HashSet::new();
        for value in &self.values {
            if value.parse::<T>().is_err() {
                return Err(RubricError::invalid(format!(
                    "enum `{}` lists unsupported value {:?}",
                    name, value
                )));
            }
            if !seen.insert(value.to_lowercase()) {
                return Err(RubricError::invalid(format!(
                    "enum `{}` lists {:?} twice",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDomains {
    pub temperature: EnumDomain,
    pub influence: EnumDomain,
    pub stance: EnumDomain,
    pub priority: EnumDomain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkSpec {
    /// Display name, e.g. `BANT`.
    pub name: String,
    /// JSON key under `frameworks`, e.g. `bant`.
    pub key: String,
    pub slots: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub version: String,
    pub fields: Vec<FieldSpec>,
    pub scores: Vec<ScoreSpec>,
    pub score_bounds: ScoreBounds,
    pub bands: Vec<ScoreBand>,
    pub hot_gate: HotGate,
    pub enums: EnumDomains,
    pub frameworks: Vec<FrameworkSpec>,
}

const SCORE_NAMES: [&str; 4] = ["urgency", "need", "fit", "confidence"];

impl Rubric {
    /// Built-in BANT / MEDDIC / SPIN rubric.
    pub fn standard() -> Self {
        let field = |field, key: &str, requirement, guidance: &str| FieldSpec {
            field,
            key: key.to_string(),
            requirement,
            guidance: guidance.to_string(),
        };
        let score = |name: &str, guidance: &str| ScoreSpec {
            name: name.to_string(),
            guidance: guidance.to_string(),
        };
        let band = |min, range: &str, meaning: &str| ScoreBand {
            min,
            range: range.to_string(),
            meaning: meaning.to_string(),
        };
        let framework = |name: &str, key: &str, slots: &[&str]| FrameworkSpec {
            name: name.to_string(),
            key: key.to_string(),
            slots: slots.iter().map(|s| s.to_string()).collect(),
        };

        use Requirement::{BestEffort, Mandatory};

        Self {
            version: "2025.1".to_string(),
            fields: vec![
                field(
                    RecordField::ExecutiveSummary,
                    "executive_summary",
                    BestEffort,
                    "2-3 sentences: who the client is, what they need, and how ready they are to buy",
                ),
                field(
                    RecordField::Highlights,
                    "highlights",
                    BestEffort,
                    "3-5 short quotes or facts from the meeting that drive the scores",
                ),
                field(
                    RecordField::Scores,
                    "scores",
                    Mandatory,
                    "numeric scores, see SCORING",
                ),
                field(
                    RecordField::Temperature,
                    "temperature",
                    Mandatory,
                    "lead temperature, see TEMPERATURE",
                ),
                field(
                    RecordField::Frameworks,
                    "frameworks",
                    BestEffort,
                    "qualification frameworks; one sentence of evidence per slot",
                ),
                field(
                    RecordField::Stakeholders,
                    "stakeholders",
                    BestEffort,
                    "every person involved in the buying decision",
                ),
                field(
                    RecordField::Objections,
                    "objections",
                    BestEffort,
                    "concerns or resistance the client voiced, in their own terms",
                ),
                field(
                    RecordField::NextSteps,
                    "next_steps",
                    BestEffort,
                    "concrete follow-up actions agreed or implied in the meeting",
                ),
                field(
                    RecordField::StrategicRecommendations,
                    "strategic_recommendations",
                    BestEffort,
                    "3-5 recommendations for the salesperson to advance this deal",
                ),
                field(
                    RecordField::FollowUpEmail,
                    "follow_up_email",
                    BestEffort,
                    "ready-to-send follow-up email with subject line, referencing the meeting",
                ),
                field(
                    RecordField::CallScript,
                    "call_script",
                    BestEffort,
                    "numbered outline for the next call, addressing open objections",
                ),
            ],
            scores: vec![
                score("urgency", "how pressing the problem is and how soon they must act"),
                score("need", "how severe and explicit the pain is"),
                score("fit", "how well our solution matches what they described"),
                score(
                    "confidence",
                    "how complete the evidence is (budget, authority, need, timeline all discussed)",
                ),
            ],
            score_bounds: ScoreBounds { min: 0.0, max: 1.0 },
            bands: vec![
                band(0.9, "0.9-1.0", "critical / perfect"),
                band(0.7, "0.7-0.8", "significant / good"),
                band(0.5, "0.5-0.6", "moderate"),
                band(0.3, "0.3-0.4", "low"),
                band(0.0, "0.0-0.2", "none / absent"),
            ],
            hot_gate: HotGate {
                urgency: 0.7,
                need: 0.7,
                fit: 0.5,
            },
            enums: EnumDomains {
                temperature: EnumDomain::of(&["Cold", "Warm", "Hot"]),
                influence: EnumDomain::of(&["High", "Medium", "Low"]),
                stance: EnumDomain::of(&["Favorable", "Neutral", "Opposed"]),
                priority: EnumDomain::of(&["High", "Medium", "Low"]),
            },
            frameworks: vec![
                framework("BANT", "bant", &["budget", "authority", "need", "timeline"]),
                framework(
                    "MEDDIC",
                    "meddic",
                    &[
                        "metrics",
                        "economic_buyer",
                        "decision_criteria",
                        "decision_process",
                        "identify_pain",
                        "champion",
                    ],
                ),
                framework(
                    "SPIN",
                    "spin",
                    &["situation", "problem", "implication", "need_payoff"],
                ),
            ],
        }
    }

    /// Load a rubric from a JSON file and validate it.
    pub fn from_json_file(path: &Path) -> Result<Self, RubricError> {
        let content = std::fs::read_to_string(path).map_err(|source| RubricError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let rubric: Rubric =
            serde_json::from_str(&content).map_err(|source| RubricError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        rubric.validate()?;
        Ok(rubric)
    }

    pub fn field(&self, field: RecordField) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.field == field)
    }

    /// Band for a score; bands are ordered from highest `min` down.
    pub fn band_for(&self, score: f64) -> Option<&ScoreBand> {
        self.bands.iter().find(|b| score >= b.min)
    }

    /// Check internal consistency. An invalid rubric must stop the process before any work.
    pub fn validate(&self) -> Result<(), RubricError> {
        if self.version.trim().is_empty() {
            return Err(RubricError::invalid("version must not be empty"));
        }

        let bounds = self.score_bounds;
        if !(bounds.min.is_finite() && bounds.max.is_finite() && bounds.min < bounds.max) {
            return Err(RubricError::invalid(format!(
                "score bounds [{}, {}] are not a valid range",
                bounds.min, bounds.max
            )));
        }

        let mut keys = HashSet::new();
        for record_field in RecordField::ALL {
            let matching: Vec<_> = self
                .fields
                .iter()
                .filter(|f| f.field == *record_field)
                .collect();
            let spec = match matching.as_slice() {
                [spec] => spec,
                [] => {
                    return Err(RubricError::invalid(format!(
                        "field {:?} is not defined",
                        record_field
                    )));
                }
                _ => {
                    return Err(RubricError::invalid(format!(
                        "field {:?} is defined more than once",
                        record_field
                    )));
                }
            };
            if spec.key.trim().is_empty() || !keys.insert(spec.key.as_str()) {
                return Err(RubricError::invalid(format!(
                    "field {:?} has an empty or duplicate key {:?}",
                    record_field, spec.key
                )));
            }
            if record_field.must_be_mandatory() && spec.requirement != Requirement::Mandatory {
                return Err(RubricError::invalid(format!(
                    "field {:?} must be mandatory",
                    record_field
                )));
            }
        }

        let names: Vec<&str> = self.scores.iter().map(|s| s.name.as_str()).collect();
        if names.len() != SCORE_NAMES.len() || SCORE_NAMES.iter().any(|n| !names.contains(n)) {
            return Err(RubricError::invalid(format!(
                "scores must be exactly {:?}, got {:?}",
                SCORE_NAMES, names
            )));
        }

        if self.bands.is_empty() {
            return Err(RubricError::invalid("at least one score band is required"));
        }
        if self
            .bands
            .windows(2)
            .any(|pair| pair[0].min <= pair[1].min)
        {
            return Err(RubricError::invalid(
                "score bands must be ordered from highest to lowest",
            ));
        }
        if self.bands.iter().any(|b| !bounds.contains(b.min)) {
            return Err(RubricError::invalid("score band starts outside the score bounds"));
        }

        let gate = self.hot_gate;
        if ![gate.urgency, gate.need, gate.fit]
            .iter()
            .all(|t| bounds.contains(*t))
        {
            return Err(RubricError::invalid("hot gate thresholds must lie within the score bounds"));
        }

        self.enums.temperature.check::<Temperature>("temperature")?;
        self.enums.influence.check::<Influence>("influence")?;
        self.enums.stance.check::<Stance>("stance")?;
        self.enums.priority.check::<Priority>("priority")?;
        if self.enums.temperature.resolve(Temperature::Hot.as_str()).is_some()
            && self.enums.temperature.resolve(Temperature::Warm.as_str()).is_none()
        {
            return Err(RubricError::invalid(
                "temperature domain with Hot must also allow Warm (downgrade target)",
            ));
        }

        if self.frameworks.is_empty() {
            return Err(RubricError::invalid("at least one framework is required"));
        }
        let mut framework_keys = HashSet::new();
        for framework in &self.frameworks {
            if framework.slots.is_empty() {
                return Err(RubricError::invalid(format!(
                    "framework {} has no slots",
                    framework.name
                )));
            }
            if !framework_keys.insert(framework.key.to_lowercase()) {
                return Err(RubricError::invalid(format!(
                    "framework key {:?} is used twice",
                    framework.key
                )));
            }
        }

        Ok(())
    }
}

impl Default for Rubric {
    fn default() -> Self {
        Self::standard()
    }
}

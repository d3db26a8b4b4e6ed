//! Turns raw model output into a validated `AnalysisRecord`, or rejects it.
//!
//! The rubric decides which fields are mandatory, which enum labels are
//! allowed and where scores are clamped. Only scores and enum labels can
//! reject a record: free text in an unexpected shape is flattened or replaced
//! by the sentinel. Corrections are kept on the record as diagnostics so
//! nothing is silently rewritten.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{
    coaching::SellerPerformance,
    error::ValidationError,
    rubric::{EnumDomain, RecordField, Requirement, Rubric},
    types::{
        AnalysisRecord, ClientId, Diagnostic, FrameworkAssessment, FrameworkSlot, Narrative,
        NextStep, Scores, Stakeholder, Temperature, Transcript,
    },
};

/// Facts about the record that do not come from the model.
#[derive(Debug, Clone)]
pub struct RecordContext {
    pub client_id: ClientId,
    pub analysis_date: DateTime<Utc>,
    pub seller_performance: Option<SellerPerformance>,
}

impl RecordContext {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            analysis_date: Utc::now(),
            seller_performance: None,
        }
    }

    /// Context for a transcript, including the seller metrics measured on its text.
    pub fn for_transcript(transcript: &Transcript) -> Self {
        Self {
            seller_performance: Some(SellerPerformance::assess(&transcript.text)),
            ..Self::new(transcript.client_id.clone())
        }
    }
}

pub fn normalize(
    raw: &str,
    rubric: &Rubric,
    ctx: &RecordContext,
) -> Result<AnalysisRecord, ValidationError> {
    let (object, repaired) = parse_object(raw)?;
    let mut normalizer = Normalizer {
        rubric,
        object: &object,
        diagnostics: Vec::new(),
    };
    if repaired {
        normalizer.diagnostics.push(Diagnostic::Repaired);
    }

    let executive_summary = normalizer.narrative_field(RecordField::ExecutiveSummary)?;
    let highlights = normalizer.list_field(RecordField::Highlights)?;
    let scores = normalizer.scores()?;
    let temperature = normalizer.temperature(&scores)?;
    let frameworks = normalizer.frameworks()?;
    let stakeholders = normalizer.stakeholders()?;
    let objections = normalizer.list_field(RecordField::Objections)?;
    let next_steps = normalizer.next_steps()?;
    let strategic_recommendations = normalizer.list_field(RecordField::StrategicRecommendations)?;
    let follow_up_email = normalizer.narrative_field(RecordField::FollowUpEmail)?;
    let call_script = normalizer.narrative_field(RecordField::CallScript)?;

    Ok(AnalysisRecord {
        client_id: ctx.client_id.clone(),
        rubric_version: rubric.version.clone(),
        analysis_date: ctx.analysis_date,
        executive_summary,
        highlights,
        scores,
        temperature,
        frameworks,
        stakeholders,
        objections,
        next_steps,
        strategic_recommendations,
        follow_up_email,
        call_script,
        diagnostics: normalizer.diagnostics,
        seller_performance: ctx.seller_performance.clone(),
    })
}

/// Strict parse, then one repair pass over the text.
fn parse_object(raw: &str) -> Result<(Map<String, Value>, bool), ValidationError> {
    let (value, repaired) = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => (value, false),
        Err(strict) => (repair(raw, &strict)?, true),
    };

    match value {
        Value::Object(map) => Ok((map, repaired)),
        other => Err(ValidationError::Unparseable {
            reason: format!("expected a JSON object, got {}", json_type(&other)),
        }),
    }
}

/// First balanced `{...}` block that parses as JSON. A block that does not
/// parse is skipped whole, so a fragment nested inside it is never picked.
fn repair(raw: &str, strict: &serde_json::Error) -> Result<Value, ValidationError> {
    let mut first_error = None;
    let mut from = 0;

    while let Some(found) = raw[from..].find('{') {
        let start = from + found;
        match extract_object(&raw[start..]) {
            Some(block) => match serde_json::from_str::<Value>(block) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    first_error.get_or_insert(e);
                    from = start + block.len();
                }
            },
            None => from = start + 1,
        }
    }

    let reason = match first_error {
        Some(e) => format!("no balanced block is valid JSON: {}", e),
        None => format!("no JSON object found ({})", strict),
    };
    Err(ValidationError::Unparseable { reason })
}

fn extract_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// Text carried by a value, or `None` when its shape holds no text at all.
///
/// An email-like object becomes `subject` and `body` separated by a blank
/// line; other objects join their members in key order.
fn flatten(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null | Value::Bool(_) => None,
        Value::Array(items) => Some(join_texts(items.iter(), "\n")),
        Value::Object(map) => {
            if let (Some(Value::String(subject)), Some(Value::String(body))) =
                (map.get("subject"), map.get("body"))
            {
                return Some(format!("{}\n\n{}", subject.trim(), body.trim()));
            }
            Some(join_texts(map.values(), "; "))
        }
    }
}

fn join_texts<'v>(values: impl Iterator<Item = &'v Value>, separator: &str) -> String {
    values
        .filter_map(flatten)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

fn is_structured(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().any(|v| v.is_object() || v.is_array()),
        _ => false,
    }
}

struct Normalizer<'a> {
    rubric: &'a Rubric,
    object: &'a Map<String, Value>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Normalizer<'a> {
    fn lookup(&self, field: RecordField) -> (&'a str, Requirement) {
        match self.rubric.field(field) {
            Some(spec) => (spec.key.as_str(), spec.requirement),
            None if field.must_be_mandatory() => (field.default_key(), Requirement::Mandatory),
            None => (field.default_key(), Requirement::BestEffort),
        }
    }

    /// Value of a top-level field. Absent best-effort fields are noted and yield `None`.
    fn take(&mut self, field: RecordField) -> Result<(&'a str, Option<&'a Value>), ValidationError> {
        let (key, requirement) = self.lookup(field);
        match present(self.object.get(key)) {
            Some(value) => Ok((key, Some(value))),
            None if requirement == Requirement::Mandatory => Err(ValidationError::MissingField {
                field: key.to_string(),
            }),
            None => {
                self.diagnostics.push(Diagnostic::MissingNarrative {
                    field: key.to_string(),
                });
                Ok((key, None))
            }
        }
    }

    fn discard(&mut self, value: &Value, path: &str) {
        self.diagnostics.push(Diagnostic::Discarded {
            field: path.to_string(),
            found: json_type(value).to_string(),
        });
    }

    /// Best-effort text: structured values are flattened, anything else becomes the sentinel.
    fn text(&mut self, value: &Value, path: &str) -> Narrative {
        match flatten(value) {
            Some(text) => {
                if is_structured(value) {
                    self.diagnostics.push(Diagnostic::Flattened {
                        field: path.to_string(),
                    });
                }
                Narrative::from_text(&text)
            }
            None => {
                self.discard(value, path);
                Narrative::NotIdentified
            }
        }
    }

    fn text_list(&mut self, value: &Value, path: &str) -> Vec<String> {
        let Value::Array(items) = value else {
            return match self.text(value, path) {
                Narrative::Identified(text) => vec![text],
                Narrative::NotIdentified => Vec::new(),
            };
        };

        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if item.is_null() {
                continue;
            }
            if let Narrative::Identified(text) = self.text(item, &format!("{}[{}]", path, i)) {
                out.push(text);
            }
        }
        out
    }

    fn narrative_field(&mut self, field: RecordField) -> Result<Narrative, ValidationError> {
        Ok(match self.take(field)? {
            (key, Some(value)) => self.text(value, key),
            (_, None) => Narrative::NotIdentified,
        })
    }

    fn list_field(&mut self, field: RecordField) -> Result<Vec<String>, ValidationError> {
        Ok(match self.take(field)? {
            (key, Some(value)) => self.text_list(value, key),
            (_, None) => Vec::new(),
        })
    }

    fn optional_text(&mut self, record: &Map<String, Value>, name: &str, path: &str) -> Narrative {
        match present(record.get(name)) {
            Some(value) => self.text(value, &format!("{}.{}", path, name)),
            None => Narrative::NotIdentified,
        }
    }

    fn scores(&mut self) -> Result<Scores, ValidationError> {
        let (key, value) = self.take(RecordField::Scores)?;
        let Some(value) = value else {
            return Err(ValidationError::MissingField {
                field: key.to_string(),
            });
        };
        let map = value.as_object().ok_or_else(|| ValidationError::InvalidType {
            field: key.to_string(),
            expected: "object",
        })?;

        Ok(Scores {
            urgency: self.score(map, key, "urgency")?,
            need: self.score(map, key, "need")?,
            fit: self.score(map, key, "fit")?,
            confidence: self.score(map, key, "confidence")?,
        })
    }

    fn score(&mut self, map: &Map<String, Value>, key: &str, name: &str) -> Result<f64, ValidationError> {
        let path = format!("{}.{}", key, name);
        let value = present(map.get(name)).ok_or_else(|| ValidationError::MissingField {
            field: path.clone(),
        })?;

        let raw = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::InvalidType {
            field: path.clone(),
            expected: "number",
        })?;

        let bounds = self.rubric.score_bounds;
        if bounds.contains(raw) {
            return Ok(raw);
        }
        let value = bounds.clamp(raw);
        self.diagnostics.push(Diagnostic::Clamped {
            field: path,
            raw,
            value,
        });
        Ok(value)
    }

    fn temperature(&mut self, scores: &Scores) -> Result<Temperature, ValidationError> {
        let (key, value) = self.take(RecordField::Temperature)?;
        let Some(value) = value else {
            return Err(ValidationError::MissingField {
                field: key.to_string(),
            });
        };
        let labelled: Temperature = label(value, &self.rubric.enums.temperature, key)?;

        let gate = self.rubric.hot_gate;
        let supported =
            scores.urgency >= gate.urgency && scores.need >= gate.need && scores.fit >= gate.fit;
        if labelled == Temperature::Hot && !supported {
            self.diagnostics.push(Diagnostic::TemperatureDowngraded {
                from: Temperature::Hot,
                to: Temperature::Warm,
            });
            return Ok(Temperature::Warm);
        }
        Ok(labelled)
    }

    fn frameworks(&mut self) -> Result<Vec<FrameworkAssessment>, ValidationError> {
        let rubric = self.rubric;
        let (key, value) = self.take(RecordField::Frameworks)?;
        let map = match value {
            Some(Value::Object(map)) => Some(map),
            Some(other) => {
                self.discard(other, key);
                None
            }
            None => None,
        };

        let mut assessments = Vec::with_capacity(rubric.frameworks.len());
        for spec in &rubric.frameworks {
            let path = format!("{}.{}", key, spec.key);
            let entry = map.and_then(|m| {
                present(m.get(&spec.key))
                    .or_else(|| present(m.get(&spec.name)))
                    .or_else(|| {
                        m.iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(&spec.key))
                            .map(|(_, v)| v)
                            .filter(|v| !v.is_null())
                    })
            });

            let slots_map = match entry {
                Some(Value::Object(slots)) => Some(slots),
                Some(other) => {
                    self.discard(other, &path);
                    None
                }
                None => {
                    if map.is_some() {
                        self.diagnostics.push(Diagnostic::MissingNarrative { field: path.clone() });
                    }
                    None
                }
            };

            let mut slots = Vec::with_capacity(spec.slots.len());
            for slot in &spec.slots {
                let evidence = match slots_map {
                    Some(m) => self.optional_text(m, slot, &path),
                    None => Narrative::NotIdentified,
                };
                slots.push(FrameworkSlot {
                    name: slot.clone(),
                    evidence,
                });
            }
            assessments.push(FrameworkAssessment {
                name: spec.name.clone(),
                slots,
            });
        }
        Ok(assessments)
    }

    /// Elements of a list of records, each with its field path. A lone object
    /// counts as a list of one; elements that are not objects are dropped.
    fn records(&mut self, value: &'a Value, key: &str) -> Vec<(String, &'a Map<String, Value>)> {
        let items: Vec<&'a Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![value],
            other => {
                self.discard(other, key);
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let path = format!("{}[{}]", key, i);
            match item {
                Value::Object(map) => out.push((path, map)),
                Value::Null => {}
                other => self.discard(other, &path),
            }
        }
        out
    }

    fn stakeholders(&mut self) -> Result<Vec<Stakeholder>, ValidationError> {
        let rubric = self.rubric;
        let (key, value) = self.take(RecordField::Stakeholders)?;
        let Some(value) = value else {
            return Ok(Vec::new());
        };

        let mut stakeholders = Vec::new();
        for (path, record) in self.records(value, key) {
            stakeholders.push(Stakeholder {
                influence: required_label(record, "influence", &rubric.enums.influence, &path)?,
                stance: required_label(record, "stance", &rubric.enums.stance, &path)?,
                name: self.optional_text(record, "name", &path),
                role: self.optional_text(record, "role", &path),
            });
        }
        Ok(stakeholders)
    }

    fn next_steps(&mut self) -> Result<Vec<NextStep>, ValidationError> {
        let rubric = self.rubric;
        let (key, value) = self.take(RecordField::NextSteps)?;
        let Some(value) = value else {
            return Ok(Vec::new());
        };

        let mut steps = Vec::new();
        for (path, record) in self.records(value, key) {
            steps.push(NextStep {
                priority: required_label(record, "priority", &rubric.enums.priority, &path)?,
                action: self.optional_text(record, "action", &path),
                deadline: self.optional_text(record, "deadline", &path),
                owner: self.optional_text(record, "owner", &path),
            });
        }
        Ok(steps)
    }
}

fn required_label<T: FromStr>(
    record: &Map<String, Value>,
    name: &str,
    domain: &EnumDomain,
    path: &str,
) -> Result<T, ValidationError> {
    let path = format!("{}.{}", path, name);
    match present(record.get(name)) {
        Some(value) => label(value, domain, &path),
        None => Err(ValidationError::MissingField { field: path }),
    }
}

fn label<T: FromStr>(value: &Value, domain: &EnumDomain, path: &str) -> Result<T, ValidationError> {
    let raw = value.as_str().ok_or_else(|| ValidationError::InvalidType {
        field: path.to_string(),
        expected: "string",
    })?;
    domain
        .resolve(raw)
        .and_then(|canonical| canonical.parse::<T>().ok())
        .ok_or_else(|| ValidationError::InvalidEnum {
            field: path.to_string(),
            value: raw.to_string(),
            allowed: domain.allowed(),
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        error::ValidationErrorKind,
        types::{Influence, Priority, Stance},
    };

    fn ctx() -> RecordContext {
        RecordContext::new(ClientId::new("Acme").unwrap())
    }

    fn response() -> Value {
        json!({
            "executive_summary": "Acme needs a compliance tool before the March audit.",
            "highlights": ["Audit in March", "Budget approved"],
            "scores": {"urgency": 0.8, "need": 0.9, "fit": 0.7, "confidence": 0.6},
            "temperature": "Hot",
            "frameworks": {
                "bant": {"budget": "Approved for Q1", "authority": "CFO signs", "need": "Audit readiness", "timeline": "Before March"},
                "meddic": {"metrics": "Cut audit prep by half", "economic_buyer": "CFO", "decision_criteria": "n/a", "decision_process": "", "identify_pain": "Manual evidence", "champion": "IT lead"},
                "spin": {"situation": "Spreadsheets", "problem": "Errors", "implication": "Failed audit", "need_payoff": "Pass audit"}
            },
            "stakeholders": [
                {"name": "Dana", "role": "CFO", "influence": "High", "stance": "Favorable"},
                {"name": "Lee", "role": "IT lead", "influence": "medium", "stance": "neutral"}
            ],
            "objections": ["Price"],
            "next_steps": [
                {"action": "Send proposal", "deadline": "Friday", "owner": "Rep", "priority": "High"}
            ],
            "strategic_recommendations": ["Anchor on audit date"],
            "follow_up_email": "Subject: Next steps\n\nHi Dana, ...",
            "call_script": ["1. Recap", "2. Pricing"]
        })
    }

    fn run(value: &Value) -> Result<AnalysisRecord, ValidationError> {
        normalize(&value.to_string(), &Rubric::standard(), &ctx())
    }

    #[test]
    fn test_valid_response_normalizes() {
        let record = run(&response()).unwrap();
        assert_eq!(record.client_id.as_str(), "Acme");
        assert_eq!(record.rubric_version, "2025.1");
        assert_eq!(record.temperature, Temperature::Hot);
        assert!(record.diagnostics.is_empty());
        assert_eq!(record.stakeholders[1].influence, Influence::Medium);
        assert_eq!(record.stakeholders[1].stance, Stance::Neutral);
        assert_eq!(record.next_steps[0].priority, Priority::High);
        assert_eq!(record.call_script.as_str(), "1. Recap\n2. Pricing");

        let meddic = record.framework("MEDDIC").unwrap();
        assert_eq!(meddic.slot("economic_buyer").unwrap().as_str(), "CFO");
        assert_eq!(meddic.slot("decision_criteria"), Some(&Narrative::NotIdentified));
        assert_eq!(meddic.slot("decision_process"), Some(&Narrative::NotIdentified));
        assert_eq!(meddic.identified_count(), 4);
    }

    #[test]
    fn test_out_of_range_scores_are_clamped_and_flagged() {
        let mut value = response();
        value["scores"]["urgency"] = json!(1.4);
        value["scores"]["confidence"] = json!(-0.3);

        let record = run(&value).unwrap();
        assert_eq!(record.scores.urgency, 1.0);
        assert_eq!(record.scores.confidence, 0.0);
        assert!(record.diagnostics.contains(&Diagnostic::Clamped {
            field: "scores.urgency".into(),
            raw: 1.4,
            value: 1.0,
        }));
        assert!(record.diagnostics.contains(&Diagnostic::Clamped {
            field: "scores.confidence".into(),
            raw: -0.3,
            value: 0.0,
        }));
    }

    #[test]
    fn test_hot_without_supporting_scores_is_downgraded() {
        let mut value = response();
        value["scores"] = json!({"urgency": 0.9, "need": 0.4, "fit": 0.8, "confidence": 0.5});

        let record = run(&value).unwrap();
        assert_eq!(record.temperature, Temperature::Warm);
        assert!(record.was_downgraded());
    }

    #[test]
    fn test_missing_score_is_a_schema_error() {
        let mut value = response();
        value["scores"].as_object_mut().unwrap().remove("urgency");

        let err = run(&value).unwrap_err();
        assert_eq!(err.kind(), ValidationErrorKind::Schema);
        assert_eq!(
            err,
            ValidationError::MissingField {
                field: "scores.urgency".into()
            }
        );
    }

    #[test]
    fn test_missing_temperature_is_a_schema_error() {
        let mut value = response();
        value.as_object_mut().unwrap().remove("temperature");
        assert!(matches!(
            run(&value),
            Err(ValidationError::MissingField { field }) if field == "temperature"
        ));
    }

    #[test]
    fn test_unknown_stance_names_its_path() {
        let mut value = response();
        value["stakeholders"][1]["stance"] = json!("Unsure");

        let err = run(&value).unwrap_err();
        assert_eq!(err.kind(), ValidationErrorKind::Schema);
        match err {
            ValidationError::InvalidEnum { field, value, .. } => {
                assert_eq!(field, "stakeholders[1].stance");
                assert_eq!(value, "Unsure");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_score_is_invalid_type() {
        let mut value = response();
        value["scores"]["fit"] = json!("high");
        assert!(matches!(
            run(&value),
            Err(ValidationError::InvalidType { field, .. }) if field == "scores.fit"
        ));

        let mut value = response();
        value["scores"]["fit"] = json!(" 0.55 ");
        assert_eq!(run(&value).unwrap().scores.fit, 0.55);
    }

    #[test]
    fn test_prose_wrapped_response_is_repaired_once() {
        let raw = format!(
            "Sure! Here is the analysis:\n```json\n{}\n```\nLet me know if {{you}} need more.",
            serde_json::to_string_pretty(&response()).unwrap()
        );
        let record = normalize(&raw, &Rubric::standard(), &ctx()).unwrap();
        assert_eq!(record.diagnostics.first(), Some(&Diagnostic::Repaired));
        assert_eq!(record.scores.need, 0.9);
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_extraction() {
        let raw = r#"Result: {"a": "closing } brace and \" quote", "b": {"c": 1}} trailing"#;
        assert_eq!(
            extract_object(raw),
            Some(r#"{"a": "closing } brace and \" quote", "b": {"c": 1}}"#)
        );
    }

    #[test]
    fn test_repair_skips_prose_braces_before_the_record() {
        let raw = format!("Hi {{name}}, here it is: {}", response());
        let record = normalize(&raw, &Rubric::standard(), &ctx()).unwrap();
        assert_eq!(record.diagnostics.first(), Some(&Diagnostic::Repaired));
        assert_eq!(record.scores.urgency, 0.8);
        assert_eq!(record.stakeholders.len(), 2);
    }

    #[test]
    fn test_repair_does_not_pick_a_fragment_of_a_broken_block() {
        let raw = r#"Draft: {"scores": {"urgency": 0.8}, oops} and nothing else"#;
        let err = normalize(raw, &Rubric::standard(), &ctx()).unwrap_err();
        assert_eq!(err.kind(), ValidationErrorKind::Parse);
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let err = normalize("I could not analyze this meeting.", &Rubric::standard(), &ctx())
            .unwrap_err();
        assert_eq!(err.kind(), ValidationErrorKind::Parse);

        let err = normalize("[1, 2, 3]", &Rubric::standard(), &ctx()).unwrap_err();
        assert_eq!(err.kind(), ValidationErrorKind::Parse);

        let err = normalize("prefix { broken", &Rubric::standard(), &ctx()).unwrap_err();
        assert_eq!(err.kind(), ValidationErrorKind::Parse);
    }

    #[test]
    fn test_missing_best_effort_fields_use_the_sentinel() {
        let mut value = response();
        let object = value.as_object_mut().unwrap();
        object.remove("executive_summary");
        object.remove("objections");
        object.insert("follow_up_email".into(), Value::Null);
        object["frameworks"].as_object_mut().unwrap().remove("spin");

        let record = run(&value).unwrap();
        assert_eq!(record.executive_summary, Narrative::NotIdentified);
        assert!(record.objections.is_empty());
        assert_eq!(record.follow_up_email, Narrative::NotIdentified);
        let spin = record.framework("SPIN").unwrap();
        assert_eq!(spin.slots.len(), 4);
        assert_eq!(spin.identified_count(), 0);

        for field in ["executive_summary", "objections", "follow_up_email", "frameworks.spin"] {
            assert!(
                record
                    .diagnostics
                    .contains(&Diagnostic::MissingNarrative { field: field.into() }),
                "{field}"
            );
        }
    }

    #[test]
    fn test_email_object_is_flattened_not_rejected() {
        let mut value = response();
        value["follow_up_email"] = json!({
            "subject": "Next steps",
            "body": "Hi Dana, thanks for your time."
        });

        let record = run(&value).unwrap();
        assert_eq!(
            record.follow_up_email.as_str(),
            "Next steps\n\nHi Dana, thanks for your time."
        );
        assert!(record.diagnostics.contains(&Diagnostic::Flattened {
            field: "follow_up_email".into()
        }));
    }

    #[test]
    fn test_recommendation_objects_become_text() {
        let mut value = response();
        value["strategic_recommendations"] = json!([
            {"recommendation": "Anchor on audit date"},
            {"recommendation": "Bring a reference customer"}
        ]);

        let record = run(&value).unwrap();
        assert_eq!(
            record.strategic_recommendations,
            ["Anchor on audit date", "Bring a reference customer"]
        );
        assert!(record.diagnostics.contains(&Diagnostic::Flattened {
            field: "strategic_recommendations[0]".into()
        }));
    }

    #[test]
    fn test_unusable_text_becomes_the_sentinel() {
        let mut value = response();
        value["executive_summary"] = json!(true);
        value["highlights"] = json!(["Audit in March", false]);
        value["frameworks"]["bant"] = json!("budget is fine");
        value["stakeholders"][0]["role"] = json!({});
        value["objections"] = json!(42);

        let record = run(&value).unwrap();
        assert_eq!(record.executive_summary, Narrative::NotIdentified);
        assert_eq!(record.highlights, ["Audit in March"]);
        assert_eq!(record.framework("BANT").unwrap().identified_count(), 0);
        assert_eq!(record.stakeholders[0].role, Narrative::NotIdentified);
        assert_eq!(record.objections, ["42"]);

        for field in ["executive_summary", "highlights[1]", "frameworks.bant"] {
            assert!(
                record
                    .diagnostics
                    .iter()
                    .any(|d| matches!(d, Diagnostic::Discarded { field: f, .. } if f == field)),
                "{field}"
            );
        }
    }

    #[test]
    fn test_non_object_stakeholder_is_dropped() {
        let mut value = response();
        value["stakeholders"][0] = json!("Dana, the CFO");

        let record = run(&value).unwrap();
        assert_eq!(record.stakeholders.len(), 1);
        assert!(record.diagnostics.contains(&Diagnostic::Discarded {
            field: "stakeholders[0]".into(),
            found: "a string".into(),
        }));
    }

    #[test]
    fn test_context_for_transcript_carries_seller_metrics() {
        let transcript = Transcript::new(
            ClientId::new("Acme").unwrap(),
            "Rep: How is the audit going?\nClient: Badly.",
        );
        let record = normalize(
            &response().to_string(),
            &Rubric::standard(),
            &RecordContext::for_transcript(&transcript),
        )
        .unwrap();
        let perf = record.seller_performance.unwrap();
        assert_eq!(perf.questions, 1);
        assert_eq!(perf.open_questions, 1);
    }

    #[test]
    fn test_stakeholder_without_influence_is_rejected() {
        let mut value = response();
        value["stakeholders"][0]
            .as_object_mut()
            .unwrap()
            .remove("influence");
        assert!(matches!(
            run(&value),
            Err(ValidationError::MissingField { field }) if field == "stakeholders[0].influence"
        ));
    }

    #[test]
    fn test_custom_rubric_keys_drive_validation() {
        let mut rubric = Rubric::standard();
        for spec in rubric.fields.iter_mut() {
            if spec.field == RecordField::Temperature {
                spec.key = "lead_temperature".into();
            }
        }
        let mut value = response();
        let object = value.as_object_mut().unwrap();
        let temperature = object.remove("temperature").unwrap();
        object.insert("lead_temperature".into(), temperature);

        let record = normalize(&value.to_string(), &rubric, &ctx()).unwrap();
        assert_eq!(record.temperature, Temperature::Hot);
    }
}

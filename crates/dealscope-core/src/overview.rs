//! Cross-client projections: the overview table, the action plan and the
//! executive report.
//!
//! Both are rebuilt from stored records on every run, so their content never
//! depends on the order in which clients were processed.

use std::fmt;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AnalysisRecord, ClientId, Narrative, Priority, Temperature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityClass {
    pub fn from_priority(priority: f64) -> Self {
        if priority >= 0.8 {
            PriorityClass::Critical
        } else if priority >= 0.6 {
            PriorityClass::High
        } else if priority >= 0.4 {
            PriorityClass::Medium
        } else {
            PriorityClass::Low
        }
    }

    /// Days until the first follow-up is due.
    pub fn response_days(self) -> u64 {
        match self {
            PriorityClass::Critical => 1,
            PriorityClass::High => 3,
            PriorityClass::Medium => 7,
            PriorityClass::Low => 14,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityClass::Critical => "critical",
            PriorityClass::High => "high",
            PriorityClass::Medium => "medium",
            PriorityClass::Low => "low",
        }
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the overview: a read-only projection of a stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewEntry {
    pub client_id: ClientId,
    pub urgency: f64,
    pub need: f64,
    pub fit: f64,
    pub confidence: f64,
    pub temperature: Temperature,
    pub priority: f64,
    pub priority_class: PriorityClass,
    pub analysis_date: DateTime<Utc>,
    /// Action of the most urgent next step the meeting produced.
    pub next_action: Narrative,
}

impl OverviewEntry {
    pub fn from_record(record: &AnalysisRecord) -> Self {
        let priority = record.scores.priority();
        let next_action = [Priority::High, Priority::Medium, Priority::Low]
            .iter()
            .find_map(|p| {
                record
                    .next_steps
                    .iter()
                    .find(|s| s.priority == *p && s.action.is_identified())
            })
            .map(|s| s.action.clone())
            .unwrap_or(Narrative::NotIdentified);

        Self {
            client_id: record.client_id.clone(),
            urgency: record.scores.urgency,
            need: record.scores.need,
            fit: record.scores.fit,
            confidence: record.scores.confidence,
            temperature: record.temperature,
            priority,
            priority_class: PriorityClass::from_priority(priority),
            analysis_date: record.analysis_date,
            next_action,
        }
    }
}

/// Priority descending, then client id, so the result is order-independent.
pub fn sort_entries(entries: &mut [OverviewEntry]) {
    entries.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then_with(|| a.client_id.cmp(&b.client_id))
    });
}

const CSV_HEADER: &str =
    "client_id,urgency,need,fit,confidence,temperature,priority,priority_class,analysis_date,next_action";

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn render_csv(entries: &[OverviewEntry]) -> String {
    let mut output = String::from(CSV_HEADER);
    output.push('\n');
    for entry in entries {
        output.push_str(&format!(
            "{},{:.2},{:.2},{:.2},{:.2},{},{:.2},{},{},{}\n",
            csv_field(entry.client_id.as_str()),
            entry.urgency,
            entry.need,
            entry.fit,
            entry.confidence,
            entry.temperature,
            entry.priority,
            entry.priority_class,
            entry.analysis_date.to_rfc3339(),
            csv_field(entry.next_action.as_str()),
        ));
    }
    output
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub client_id: ClientId,
    pub action: String,
    pub due: NaiveDate,
    pub priority: Priority,
}

/// Follow-up work across all clients, bucketed by how soon it is due.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub generated_at: DateTime<Utc>,
    pub leads: usize,
    pub immediate: Vec<PlannedAction>,
    pub this_week: Vec<PlannedAction>,
    pub this_month: Vec<PlannedAction>,
}

impl ActionPlan {
    pub fn build(entries: &[OverviewEntry], now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let mut plan = ActionPlan {
            generated_at: now,
            leads: entries.len(),
            immediate: Vec::new(),
            this_week: Vec::new(),
            this_month: Vec::new(),
        };

        for entry in entries {
            let suggestions = suggest_actions(entry, today);
            match entry.priority_class {
                PriorityClass::Critical => plan.immediate.extend(suggestions.into_iter().take(2)),
                PriorityClass::High => plan.this_week.extend(suggestions.into_iter().take(2)),
                PriorityClass::Medium | PriorityClass::Low => {
                    plan.this_month.extend(suggestions.into_iter().take(1))
                }
            }
        }

        for bucket in [&mut plan.immediate, &mut plan.this_week, &mut plan.this_month] {
            bucket.sort_by(|a, b| a.due.cmp(&b.due).then_with(|| a.client_id.cmp(&b.client_id)));
        }
        plan
    }
}

/// Number of clients named in the executive report.
const TOP_CLIENTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedClient {
    pub client_id: ClientId,
    pub priority: f64,
    pub priority_class: PriorityClass,
    pub temperature: Temperature,
}

/// Headline numbers across every stored analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveReport {
    pub generated_at: DateTime<Utc>,
    pub clients: usize,
    /// Mean priority, rounded to 2 places; 0 with no clients.
    pub mean_priority: f64,
    /// Clients classed High or Critical.
    pub high_priority: usize,
    /// Share of clients classed High or Critical, 0 to 1, rounded to 2 places.
    pub high_priority_rate: f64,
    pub top_clients: Vec<RankedClient>,
}

impl ExecutiveReport {
    pub fn build(entries: &[OverviewEntry], now: DateTime<Utc>) -> Self {
        let clients = entries.len();
        let high_priority = entries
            .iter()
            .filter(|e| e.priority_class >= PriorityClass::High)
            .count();
        let (mean_priority, high_priority_rate) = if clients == 0 {
            (0.0, 0.0)
        } else {
            let total: f64 = entries.iter().map(|e| e.priority).sum();
            (
                round2(total / clients as f64),
                round2(high_priority as f64 / clients as f64),
            )
        };

        let mut ranked = entries.to_vec();
        sort_entries(&mut ranked);
        let top_clients = ranked
            .into_iter()
            .take(TOP_CLIENTS)
            .map(|e| RankedClient {
                client_id: e.client_id,
                priority: e.priority,
                priority_class: e.priority_class,
                temperature: e.temperature,
            })
            .collect();

        Self {
            generated_at: now,
            clients,
            mean_priority,
            high_priority,
            high_priority_rate,
            top_clients,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Follow-ups for one client, most important first. The meeting's own next step leads.
fn suggest_actions(entry: &OverviewEntry, today: NaiveDate) -> Vec<PlannedAction> {
    let base = entry.priority_class.response_days();
    let client = entry.client_id.as_str();
    let planned = |action: String, extra_days: u64, priority: Priority| PlannedAction {
        client_id: entry.client_id.clone(),
        action,
        due: today
            .checked_add_days(Days::new(base + extra_days))
            .unwrap_or(today),
        priority,
    };

    let mut actions = Vec::new();
    if let Narrative::Identified(action) = &entry.next_action {
        actions.push(planned(action.clone(), 0, Priority::High));
    }

    match entry.temperature {
        Temperature::Hot => actions.push(planned(
            format!("Prepare the contract and close with {}", client),
            0,
            Priority::High,
        )),
        Temperature::Warm if entry.urgency >= 0.7 => actions.push(planned(
            format!("Call {} and send a commercial proposal", client),
            0,
            Priority::High,
        )),
        Temperature::Warm => actions.push(planned(
            format!("Send a follow-up email to {}", client),
            0,
            Priority::Medium,
        )),
        Temperature::Cold => actions.push(planned(
            format!("Add {} to an educational nurture sequence", client),
            14,
            Priority::Low,
        )),
    }

    if entry.need >= 0.7 {
        actions.push(planned(
            format!("Send {} a relevant customer success story", client),
            1,
            Priority::Medium,
        ));
    }
    if entry.fit >= 0.7 {
        actions.push(planned(
            format!("Prepare a tailored demo for {}", client),
            3,
            Priority::High,
        ));
    } else if entry.fit >= 0.4 {
        actions.push(planned(
            format!("Book a technical qualification call with {}", client),
            5,
            Priority::Medium,
        ));
    }

    actions
}

use crate::{
    coaching::respond_to_objections,
    overview::{ExecutiveReport, PriorityClass},
    rubric::Rubric,
    types::{AnalysisRecord, Diagnostic, Narrative},
};

/// Format a score with its band label, e.g. `0.80 (significant / good)`
pub fn format_score(rubric: &Rubric, score: f64) -> String {
    match rubric.band_for(score) {
        Some(band) => format!("{:.2} ({})", score, band.meaning),
        None => format!("{:.2}", score),
    }
}

fn push_list(output: &mut String, items: &[String]) {
    if items.is_empty() {
        output.push_str(&format!("{}\n", Narrative::NotIdentified));
    }
    for item in items {
        output.push_str(&format!("• {}\n", item));
    }
    output.push('\n');
}

/// Diagnostic summary of one meeting as markdown
pub fn format_summary(record: &AnalysisRecord) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {}\n\n", record.client_id));
    output.push_str(&format!(
        "**Temperature:** {} | **Priority:** {:.2} | **Analyzed:** {} | **Rubric:** {}\n\n",
        record.temperature,
        record.scores.priority(),
        record.analysis_date.format("%Y-%m-%d %H:%M UTC"),
        record.rubric_version
    ));

    output.push_str("## Executive Summary\n\n");
    output.push_str(record.executive_summary.as_str());
    output.push_str("\n\n");

    output.push_str("## Highlights\n\n");
    push_list(&mut output, &record.highlights);

    // Frameworks
    for framework in &record.frameworks {
        output.push_str(&format!(
            "## {} ({}/{} identified)\n\n",
            framework.name,
            framework.identified_count(),
            framework.slots.len()
        ));
        for slot in &framework.slots {
            output.push_str(&format!("- **{}:** {}\n", slot.name.replace('_', " "), slot.evidence));
        }
        output.push('\n');
    }

    output.push_str("## Stakeholders\n\n");
    if record.stakeholders.is_empty() {
        output.push_str(&format!("{}\n", Narrative::NotIdentified));
    }
    for person in &record.stakeholders {
        output.push_str(&format!(
            "• {} ({}): influence {}, {}\n",
            person.name, person.role, person.influence, person.stance
        ));
    }
    output.push('\n');

    output.push_str("## Objections\n\n");
    push_list(&mut output, &record.objections);

    output.push_str("## Strategic Recommendations\n\n");
    for (i, rec) in record.strategic_recommendations.iter().enumerate() {
        output.push_str(&format!("{}. {}\n", i + 1, rec));
    }
    if record.strategic_recommendations.is_empty() {
        output.push_str(&format!("{}\n", Narrative::NotIdentified));
    }
    output.push('\n');

    if !record.diagnostics.is_empty() {
        output.push_str("## Diagnostics\n\n");
        for diagnostic in &record.diagnostics {
            output.push_str(&format!("• {}\n", diagnostic));
        }
        output.push('\n');
    }

    output
}

/// Scoring sheet: every score with its band, temperature and priority
pub fn format_scorecard(record: &AnalysisRecord, rubric: &Rubric) -> String {
    let mut output = String::new();
    let scores = record.scores;

    output.push_str(&format!("# Scorecard: {}\n\n", record.client_id));
    output.push_str("| Score | Value |\n|---|---|\n");
    for (name, value) in [
        ("Urgency", scores.urgency),
        ("Need", scores.need),
        ("Fit", scores.fit),
        ("Confidence", scores.confidence),
    ] {
        output.push_str(&format!("| {} | {} |\n", name, format_score(rubric, value)));
    }
    output.push('\n');

    let priority = scores.priority();
    output.push_str(&format!("**Temperature:** {}\n\n", record.temperature));
    output.push_str(&format!(
        "**Priority:** {:.2} ({})\n\n",
        priority,
        PriorityClass::from_priority(priority)
    ));

    let adjusted: Vec<String> = record
        .diagnostics
        .iter()
        .filter(|d| {
            !matches!(
                d,
                Diagnostic::MissingNarrative { .. }
                    | Diagnostic::Flattened { .. }
                    | Diagnostic::Discarded { .. }
            )
        })
        .map(|d| format!("• {}\n", d))
        .collect();
    if !adjusted.is_empty() {
        output.push_str("## Adjustments\n\n");
        output.push_str(&adjusted.concat());
        output.push('\n');
    }

    output
}

/// Follow-up email and call script, ready to copy
pub fn format_follow_up(record: &AnalysisRecord) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Follow-up: {}\n\n", record.client_id));
    output.push_str("## Email\n\n");
    output.push_str(record.follow_up_email.as_str());
    output.push_str("\n\n");

    output.push_str("## Call Script\n\n");
    output.push_str(record.call_script.as_str());
    output.push_str("\n\n");

    output.push_str("## Objection Responses\n\n");
    let responses = respond_to_objections(&record.objections);
    if responses.is_empty() {
        output.push_str(&format!("{}\n", Narrative::NotIdentified));
    }
    for r in &responses {
        output.push_str(&format!("• **{}**\n  {}\n", r.objection, r.response));
    }

    output
}

/// Seller feedback: question technique, tone and what to work on
pub fn format_coaching(record: &AnalysisRecord) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Coaching: {}\n\n", record.client_id));
    let Some(perf) = &record.seller_performance else {
        output.push_str(&format!("{}\n", Narrative::NotIdentified));
        return output;
    };

    output.push_str(&format!("**Questions asked:** {}\n", perf.questions));
    output.push_str(&format!("**Open questions:** {}\n", perf.open_questions));
    output.push_str(&format!("**Closed questions:** {}\n", perf.closed_questions));
    output.push_str(&format!("**Open/closed ratio:** {:.2}\n", perf.open_closed_ratio));
    output.push_str(&format!(
        "**Confidence:** {}/10 ({} confident, {} hesitant phrases)\n\n",
        perf.confidence_score, perf.confidence_markers, perf.hesitation_markers
    ));

    output.push_str("## Suggested Improvements\n\n");
    push_list(&mut output, &perf.improvements);

    output
}

/// Cross-client headline report as markdown
pub fn format_executive_report(report: &ExecutiveReport) -> String {
    let mut output = String::new();

    output.push_str("# Executive Report\n\n");
    output.push_str(&format!(
        "Generated {}\n\n",
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    output.push_str(&format!("• Clients analyzed: {}\n", report.clients));
    output.push_str(&format!("• Mean priority: {:.2}\n", report.mean_priority));
    output.push_str(&format!("• High priority clients: {}\n", report.high_priority));
    output.push_str(&format!(
        "• High priority rate: {:.1}%\n\n",
        report.high_priority_rate * 100.0
    ));

    output.push_str("## Top Clients\n\n");
    if report.top_clients.is_empty() {
        output.push_str(&format!("{}\n", Narrative::NotIdentified));
    }
    for (i, client) in report.top_clients.iter().enumerate() {
        output.push_str(&format!(
            "{}. {}: {:.2} ({}, {})\n",
            i + 1,
            client.client_id,
            client.priority,
            client.priority_class,
            client.temperature
        ));
    }

    output
}

pub fn format_next_steps(record: &AnalysisRecord) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Next Steps: {}\n\n", record.client_id));
    if record.next_steps.is_empty() {
        output.push_str(&format!("{}\n", Narrative::NotIdentified));
        return output;
    }

    for (i, step) in record.next_steps.iter().enumerate() {
        output.push_str(&format!("{}. **[{}]** {}\n", i + 1, step.priority, step.action));
        output.push_str(&format!("   Owner: {} | Deadline: {}\n", step.owner, step.deadline));
    }

    output
}

//! Feedback for the seller: question technique and tone measured on the
//! transcript, plus stock responses to the objections the client raised.
//!
//! Nothing here calls the model. Markers are matched on whole words, so
//! "show" never counts as "how".

use serde::{Deserialize, Serialize};

const OPEN_QUESTION_WORDS: &[&str] = &["how", "why", "what", "when", "where", "which", "who"];

const HESITATION_MARKERS: &[&str] = &[
    "i think",
    "maybe",
    "perhaps",
    "i guess",
    "not sure",
    "i don't know",
    "kind of",
    "sort of",
];

const CONFIDENCE_MARKERS: &[&str] = &[
    "i'm certain",
    "i am certain",
    "we know",
    "we guarantee",
    "proven",
    "definitely",
];

/// Fewer questions than this in a whole meeting is worth pointing out.
const MIN_QUESTIONS: usize = 5;

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Occurrences of a (possibly multi-word) phrase in a token stream.
fn count_phrase(tokens: &[String], phrase: &str) -> usize {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.is_empty() || words.len() > tokens.len() {
        return 0;
    }
    tokens
        .windows(words.len())
        .filter(|window| window.iter().zip(&words).all(|(t, w)| t == w))
        .count()
}

fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    count_phrase(tokens, phrase) > 0
}

/// Question and tone metrics for one meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerPerformance {
    /// Lines containing a question mark.
    pub questions: usize,
    pub open_questions: usize,
    pub closed_questions: usize,
    /// Open questions per closed one, rounded to 2 places.
    pub open_closed_ratio: f64,
    pub hesitation_markers: usize,
    pub confidence_markers: usize,
    /// 0 to 10, starting at 5: each confidence marker adds one, each hesitation marker takes one.
    pub confidence_score: u8,
    pub improvements: Vec<String>,
}

impl SellerPerformance {
    pub fn assess(text: &str) -> Self {
        let mut questions = 0;
        let mut open_questions = 0;
        let mut hesitation_markers = 0;
        let mut confidence_markers = 0;

        for line in text.lines() {
            let words = tokens(line);
            if line.contains('?') {
                questions += 1;
                if OPEN_QUESTION_WORDS.iter().any(|w| contains_phrase(&words, w)) {
                    open_questions += 1;
                }
            }
            hesitation_markers += HESITATION_MARKERS
                .iter()
                .map(|m| count_phrase(&words, m))
                .sum::<usize>();
            confidence_markers += CONFIDENCE_MARKERS
                .iter()
                .map(|m| count_phrase(&words, m))
                .sum::<usize>();
        }

        let closed_questions = questions - open_questions;
        let ratio = open_questions as f64 / closed_questions.max(1) as f64;
        let confidence_score =
            (5 + confidence_markers as i64 - hesitation_markers as i64).clamp(0, 10) as u8;

        Self {
            questions,
            open_questions,
            closed_questions,
            open_closed_ratio: (ratio * 100.0).round() / 100.0,
            hesitation_markers,
            confidence_markers,
            confidence_score,
            improvements: improvements(
                questions,
                open_questions,
                closed_questions,
                hesitation_markers,
                confidence_markers,
            ),
        }
    }
}

fn improvements(
    questions: usize,
    open: usize,
    closed: usize,
    hesitation: usize,
    confidence: usize,
) -> Vec<String> {
    let mut out = Vec::new();
    if open < closed {
        out.push("Ask more open questions (how, why, what) than yes/no ones".to_string());
    }
    if hesitation > confidence {
        out.push("Drop hedging words such as \"maybe\" and \"I think\"".to_string());
        out.push("Back claims with facts and customer results".to_string());
    }
    if questions < MIN_QUESTIONS {
        out.push("Ask more questions to understand the client's needs".to_string());
    }
    out.extend(
        [
            "Prepare specific questions about pains and goals before the call",
            "Bring customer success stories to build credibility",
            "Tie every feature you mention to a benefit for this client",
        ]
        .map(str::to_string),
    );
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectionCategory {
    Price,
    Resources,
    Deliberation,
    Trust,
    Competitor,
}

impl ObjectionCategory {
    /// Checked in this order; the first category with a matching keyword wins.
    const ALL: [ObjectionCategory; 5] = [
        ObjectionCategory::Price,
        ObjectionCategory::Resources,
        ObjectionCategory::Deliberation,
        ObjectionCategory::Trust,
        ObjectionCategory::Competitor,
    ];

    fn keywords(self) -> &'static [&'static str] {
        match self {
            ObjectionCategory::Price => &[
                "price", "pricing", "expensive", "cost", "costs", "costly", "budget", "afford",
            ],
            ObjectionCategory::Resources => {
                &["time", "bandwidth", "resources", "staff", "capacity", "busy"]
            }
            ObjectionCategory::Deliberation => {
                &["think", "evaluate", "consult", "review", "discuss", "decide"]
            }
            ObjectionCategory::Trust => {
                &["convinced", "sure", "risk", "risky", "trust", "proof", "guarantee"]
            }
            ObjectionCategory::Competitor => &[
                "competitor",
                "competitors",
                "already",
                "another",
                "vendor",
                "alternative",
                "current provider",
            ],
        }
    }

    pub fn classify(objection: &str) -> Option<Self> {
        let words = tokens(objection);
        Self::ALL
            .into_iter()
            .find(|category| category.keywords().iter().any(|k| contains_phrase(&words, k)))
    }

    pub fn response(self) -> &'static str {
        match self {
            ObjectionCategory::Price => {
                "Lead with ROI and long-term savings. Share customer cases with a proven return."
            }
            ObjectionCategory::Resources => {
                "Stress how light the rollout is and the support included. Offer a low-risk pilot."
            }
            ObjectionCategory::Deliberation => {
                "Send supporting material and book a short clarification call. Give a reason to decide now."
            }
            ObjectionCategory::Trust => "Show social proof and guarantees. Offer a trial period.",
            ObjectionCategory::Competitor => {
                "Focus on what sets us apart for this client. Offer a side-by-side comparison."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectionResponse {
    pub objection: String,
    pub category: ObjectionCategory,
    pub response: &'static str,
}

/// Suggested answer for each objection that falls into a known category.
pub fn respond_to_objections(objections: &[String]) -> Vec<ObjectionResponse> {
    objections
        .iter()
        .filter_map(|objection| {
            ObjectionCategory::classify(objection).map(|category| ObjectionResponse {
                objection: objection.clone(),
                category,
                response: category.response(),
            })
        })
        .collect()
}

//! Execution plan types
//!
//! The planner model emits a JSON object with a `questions` array. Each
//! question is routed by its type tag; the variant carries exactly the
//! fields that branch needs, so a wolfram question without a tool input
//! cannot be constructed.

use serde::Serialize;
use serde_json::Value;

/// How a single sub-question gets solved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionKind {
    /// Answer comes straight from the planner (or one solver call when the
    /// planner omitted it).
    Direct { answer: Option<String> },
    /// Symbolic computation via the external API.
    Wolfram { tool_input: String },
    /// Generate-and-run code.
    Code { tool_input: String },
    /// Type tag the planner invented. Routed to an explicit error instead
    /// of silently falling through to the direct branch.
    Unknown { tag: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: i64,
    pub content: String,
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub questions: Vec<Question>,
}

impl Plan {
    /// Build a plan from parsed planner JSON. Returns `None` when there is
    /// no non-empty `questions` array; field-level sloppiness (missing id,
    /// null tool_input) is tolerated and defaulted.
    pub fn from_value(value: &Value) -> Option<Plan> {
        let raw_questions = value.get("questions")?.as_array()?;
        if raw_questions.is_empty() {
            return None;
        }

        let questions = raw_questions
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let id = q
                    .get("id")
                    .and_then(Value::as_i64)
                    .unwrap_or(i as i64 + 1);
                let content = q
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let tool_input = q
                    .get("tool_input")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .unwrap_or_else(|| content.clone());
                let kind = match q.get("type").and_then(Value::as_str).unwrap_or("direct") {
                    "direct" => QuestionKind::Direct {
                        answer: q
                            .get("answer")
                            .and_then(Value::as_str)
                            .filter(|s| !s.is_empty())
                            .map(String::from),
                    },
                    "wolfram" => QuestionKind::Wolfram { tool_input },
                    "code" => QuestionKind::Code { tool_input },
                    other => QuestionKind::Unknown { tag: other.to_string() },
                };
                Question { id, content, kind }
            })
            .collect();

        Some(Plan { questions })
    }

    pub fn all_direct(&self) -> bool {
        self.questions
            .iter()
            .all(|q| matches!(q.kind, QuestionKind::Direct { .. }))
    }
}

/// Final routing of a question after execution, including the promoted
/// hybrid tag when the code fallback rescued a failed wolfram call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultKind {
    Direct,
    Wolfram,
    Code,
    WolframCode,
    Unknown(String),
}

impl ResultKind {
    pub fn wire(&self) -> String {
        match self {
            ResultKind::Direct => "direct".to_string(),
            ResultKind::Wolfram => "wolfram".to_string(),
            ResultKind::Code => "code".to_string(),
            ResultKind::WolframCode => "wolfram+code".to_string(),
            ResultKind::Unknown(tag) => tag.clone(),
        }
    }

    pub fn from_kind(kind: &QuestionKind) -> Self {
        match kind {
            QuestionKind::Direct { .. } => ResultKind::Direct,
            QuestionKind::Wolfram { .. } => ResultKind::Wolfram,
            QuestionKind::Code { .. } => ResultKind::Code,
            QuestionKind::Unknown { tag } => ResultKind::Unknown(tag.clone()),
        }
    }
}

impl Serialize for ResultKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.wire())
    }
}

/// Outcome of one question branch. Exactly one of `result`/`error` is
/// populated on a settled branch.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    pub id: i64,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: ResultKind,
    pub result: Option<String>,
    pub error: Option<String>,
}

//! Turn state
//!
//! One [`Turn`] per user request. Stage functions receive it mutably and
//! return the next [`Stage`] as a value; nothing routes by mutating a shared
//! flag. The turn is single-owner for its whole lifetime and dropped once
//! the final response is persisted.

use serde::Serialize;

use crate::llm::Message;
use crate::memory::MemoryLevel;

use super::plan::{Plan, QuestionResult};

/// Pipeline stages. `ToolCompute`/`ToolCode` are the single-tool entry
/// points used when a caller pins a tool up front; the normal path goes
/// through the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    IngestImages,
    Plan,
    Execute,
    Synthesize,
    ToolCompute,
    ToolCode,
    Done,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::IngestImages => "ocr",
            Stage::Plan => "planner",
            Stage::Execute => "executor",
            Stage::Synthesize => "synthetic",
            Stage::ToolCompute => "wolfram",
            Stage::ToolCode => "code",
            Stage::Done => "done",
        }
    }
}

/// Trace record for one model or tool invocation. Observability only,
/// never read back by the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ModelCall {
    pub model: String,
    pub agent: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub duration_ms: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrResult {
    pub image_index: usize,
    pub text: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub session_id: String,
    /// Prior conversation, oldest first, not including the current request.
    pub history: Vec<Message>,
    pub user_text: String,
    /// Base64 image payloads attached to the request.
    pub images: Vec<String>,

    pub ocr_results: Vec<OcrResult>,
    pub ocr_text: Option<String>,
    pub plan: Option<Plan>,
    pub question_results: Vec<QuestionResult>,
    pub final_response: Option<String>,
    pub error_message: Option<String>,

    // Single-tool flow
    pub selected_tool: Option<String>,
    pub tool_query: Option<String>,
    pub tool_result: Option<String>,
    pub tool_success: bool,
    pub tools_called: Vec<ToolCallRecord>,
    pub compute_attempts: u32,
    pub codefix_attempts: u32,

    // Observability
    pub model_calls: Vec<ModelCall>,
    pub session_token_count: i64,
    pub memory_level: MemoryLevel,
    pub memory_message: Option<String>,
}

impl Turn {
    pub fn new(
        session_id: impl Into<String>,
        history: Vec<Message>,
        user_text: impl Into<String>,
        images: Vec<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            history,
            user_text: user_text.into(),
            images,
            ocr_results: Vec::new(),
            ocr_text: None,
            plan: None,
            question_results: Vec::new(),
            final_response: None,
            error_message: None,
            selected_tool: None,
            tool_query: None,
            tool_result: None,
            tool_success: false,
            tools_called: Vec::new(),
            compute_attempts: 0,
            codefix_attempts: 0,
            model_calls: Vec::new(),
            session_token_count: 0,
            memory_level: MemoryLevel::Ok,
            memory_message: None,
        }
    }

    /// Pin a specific tool, bypassing the planner.
    pub fn with_tool(mut self, tool: &str, query: impl Into<String>) -> Self {
        self.selected_tool = Some(tool.to_string());
        self.tool_query = Some(query.into());
        self
    }

    pub fn initial_stage(&self) -> Stage {
        match self.selected_tool.as_deref() {
            Some("wolfram") => Stage::ToolCompute,
            Some("code") => Stage::ToolCode,
            _ if !self.images.is_empty() => Stage::IngestImages,
            _ => Stage::Plan,
        }
    }

    pub fn record_call(&mut self, call: ModelCall) {
        self.model_calls.push(call);
    }
}

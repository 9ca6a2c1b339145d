//! Synthesizer stage
//!
//! Turns per-question outcomes into one pedagogical reply. Partial failures
//! are part of the input: the synthesis model sees each question's status
//! and the fallback path guarantees every individual result still reaches
//! the user when the model itself is down.

use std::time::Instant;

use tracing::warn;

use crate::config::CONFIG;
use crate::llm::Message;
use crate::memory::estimate_tokens;

use super::AgentContext;
use super::errors::friendly_synth_error;
use super::format::format_latex_for_markdown;
use super::prompts::{SYNTH_SYSTEM_PROMPT, synthesis_prompt};
use super::turn::{ModelCall, Stage, Turn};

const SYNTH_MODEL: &str = "kimi-k2";

pub async fn synthesize(ctx: &AgentContext, turn: &mut Turn) -> Stage {
    let status = ctx.memory.status(&turn.session_id, 0).await;
    turn.memory_level = status.level;
    turn.memory_message = status.message.clone();
    if status.is_blocked() {
        turn.final_response = status.message;
        return Stage::Done;
    }

    // Single-tool mode bills its prompt too; the multi-question path only
    // bills output since the executor results already sit in the counter
    // via the planner charge.
    let (final_response, prompt_tokens) = if turn.question_results.is_empty() {
        synthesize_single_tool(ctx, turn).await
    } else {
        (synthesize_question_results(ctx, turn).await, 0)
    };

    let tokens = prompt_tokens + estimate_tokens(&final_response);
    turn.session_token_count = ctx.memory.add(&turn.session_id, tokens).await;
    let status = ctx.memory.status(&turn.session_id, 0).await;
    turn.memory_level = status.level;
    turn.memory_message = status.message;

    turn.final_response = Some(final_response);
    Stage::Done
}

async fn synthesize_question_results(ctx: &AgentContext, turn: &mut Turn) -> String {
    let mut blocks = String::new();
    for r in &turn.question_results {
        let status = match &r.error {
            None => "Thành công".to_string(),
            Some(e) => format!("Lỗi: {e}"),
        };
        let result = r.result.as_deref().unwrap_or("Không có kết quả");
        blocks.push_str(&format!(
            "--- BÀI TOÁN {} ---\nNội dung: {}\nTrạng thái: {}\nKết quả gốc:\n{}\n\n",
            r.id, r.content, status, result
        ));
    }

    let original_question = if let Some(ocr) = &turn.ocr_text {
        format!("[OCR]: {ocr}")
    } else if !turn.user_text.is_empty() {
        turn.user_text.clone()
    } else {
        "Nhiều câu hỏi (xem chi tiết bên trên)".to_string()
    };

    let prompt = synthesis_prompt(&original_question, &blocks);
    let mut messages = Vec::with_capacity(CONFIG.synth_history_messages + 2);
    messages.push(Message::system(SYNTH_SYSTEM_PROMPT));
    let recent = turn
        .history
        .iter()
        .rev()
        .take(CONFIG.synth_history_messages)
        .rev()
        .cloned();
    messages.extend(recent);
    messages.push(Message::user(prompt));

    let start = Instant::now();
    match ctx.provider.complete(&messages, SYNTH_MODEL).await {
        Ok(text) => {
            turn.record_call(ModelCall {
                model: SYNTH_MODEL.to_string(),
                agent: "synthetic_agent".to_string(),
                tokens_in: crate::memory::estimate_message_tokens(&messages),
                tokens_out: estimate_tokens(&text),
                duration_ms: start.elapsed().as_millis() as i64,
                success: true,
                error: None,
                tool_calls: Vec::new(),
            });
            format_latex_for_markdown(&text)
        }
        Err(e) => {
            warn!("synthesis model failed, emitting raw results: {}", e);
            format!(
                "**Kết quả (Tổng hợp tự động thất bại do {}):**\n\n{}",
                friendly_synth_error(&e),
                blocks
            )
        }
    }
}

/// Single-tool flow: one tool result and one original question, no plan.
/// Returns the response plus the prompt token estimate to bill (zero when
/// the model call never went through).
async fn synthesize_single_tool(ctx: &AgentContext, turn: &mut Turn) -> (String, i64) {
    let mut original_question = turn.user_text.clone();
    if let Some(ocr) = &turn.ocr_text {
        original_question = format!("[Từ ảnh]: {ocr}\n\n{original_question}");
    }

    let tool_result = if turn.tool_success {
        turn.tool_result
            .clone()
            .unwrap_or_else(|| "Không có kết quả".to_string())
    } else {
        format!(
            "[Công cụ thất bại]: {}\n\nHãy cố gắng trả lời dựa trên kiến thức của bạn.",
            turn.error_message.as_deref().unwrap_or("Unknown error")
        )
    };

    let prompt = synthesis_prompt(&original_question, &tool_result);
    let messages = vec![Message::user(prompt)];
    let tokens_in = crate::memory::estimate_message_tokens(&messages);

    let start = Instant::now();
    match ctx.provider.complete(&messages, SYNTH_MODEL).await {
        Ok(text) => {
            turn.record_call(ModelCall {
                model: SYNTH_MODEL.to_string(),
                agent: "synthetic_agent".to_string(),
                tokens_in,
                tokens_out: estimate_tokens(&text),
                duration_ms: start.elapsed().as_millis() as i64,
                success: true,
                error: None,
                tool_calls: Vec::new(),
            });
            (format_latex_for_markdown(&text), tokens_in)
        }
        Err(e) => {
            warn!("single-tool synthesis failed: {}", e);
            let fallback = format!(
                "**Kết quả tính toán:**\n{}",
                turn.tool_result.as_deref().unwrap_or("Không có kết quả")
            );
            (fallback, 0)
        }
    }
}

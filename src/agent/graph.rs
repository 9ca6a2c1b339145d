//! Pipeline driver
//!
//! Each stage function returns the next [`Stage`] as a value and this loop
//! walks them until `Done`. A turn always ends with a non-null final
//! response; if every stage fell through without producing one, a generic
//! apology is substituted.

use std::time::Instant;

use tracing::{debug, info};

use crate::llm::Message;

use super::AgentContext;
use super::executor::extract_code;
use super::prompts::{codegen_fix_prompt, codegen_prompt};
use super::turn::{Stage, ToolCallRecord, Turn};
use super::{executor, ocr, planner, synthesizer};

const CODEGEN_MODEL: &str = "qwen3-32b";
const CODEFIX_MODEL: &str = "gpt-oss-120b";
const MAX_CODE_FIXES: u32 = 2;

pub const GENERIC_APOLOGY: &str = "Xin lỗi, đã có lỗi xảy ra. Vui lòng thử lại.";

pub async fn run_turn(ctx: &AgentContext, turn: &mut Turn) {
    let start = Instant::now();
    let mut stage = turn.initial_stage();
    info!(session = %turn.session_id, stage = stage.name(), "turn started");

    while stage != Stage::Done {
        debug!(stage = stage.name(), "entering stage");
        stage = match stage {
            Stage::IngestImages => ocr::ingest_images(ctx, turn).await,
            Stage::Plan => planner::plan_turn(ctx, turn).await,
            Stage::Execute => executor::execute_plan(ctx, turn).await,
            Stage::Synthesize => synthesizer::synthesize(ctx, turn).await,
            Stage::ToolCompute => compute_tool_stage(ctx, turn).await,
            Stage::ToolCode => code_tool_stage(ctx, turn).await,
            Stage::Done => Stage::Done,
        };
    }

    if turn.final_response.is_none() {
        turn.final_response = Some(GENERIC_APOLOGY.to_string());
    }
    info!(
        session = %turn.session_id,
        duration_ms = start.elapsed().as_millis() as i64,
        model_calls = turn.model_calls.len(),
        "turn finished"
    );
}

/// Single-tool flow, compute branch. One attempt; failure falls back to
/// the code stage with the same query.
async fn compute_tool_stage(ctx: &AgentContext, turn: &mut Turn) -> Stage {
    let query = turn.tool_query.clone().unwrap_or_default();
    turn.compute_attempts += 1;

    match ctx.compute.query(&query).await {
        Ok(result) => {
            turn.tools_called.push(ToolCallRecord {
                tool: "wolfram".to_string(),
                input: query,
                output: result.clone(),
            });
            turn.tool_result = Some(result);
            turn.tool_success = true;
            Stage::Synthesize
        }
        Err(e) => {
            turn.tools_called.push(ToolCallRecord {
                tool: "wolfram".to_string(),
                input: query,
                output: e.to_string(),
            });
            turn.selected_tool = Some("code".to_string());
            Stage::ToolCode
        }
    }
}

/// Single-tool flow, code branch: generate once, then at most
/// `MAX_CODE_FIXES` corrections with a dedicated fixer model.
async fn code_tool_stage(ctx: &AgentContext, turn: &mut Turn) -> Stage {
    let task = turn.tool_query.clone().unwrap_or_default();

    let response = match ctx
        .provider
        .complete(&[Message::user(codegen_prompt(&task))], CODEGEN_MODEL)
        .await
    {
        Ok(text) => text,
        Err(e) => {
            turn.error_message = Some(format!("Code generation failed: {e}"));
            turn.tool_success = false;
            return Stage::Synthesize;
        }
    };

    let mut code = extract_code(&response);
    let mut outcome = ctx.sandbox.run(&code).await;

    while !outcome.success && turn.codefix_attempts < MAX_CODE_FIXES {
        turn.codefix_attempts += 1;
        let error = outcome.error.clone().unwrap_or_else(|| "Unknown error".to_string());
        match ctx
            .provider
            .complete(&[Message::user(codegen_fix_prompt(&code, &error))], CODEFIX_MODEL)
            .await
        {
            Ok(text) => {
                code = extract_code(&text);
                outcome = ctx.sandbox.run(&code).await;
            }
            Err(_) => break,
        }
    }

    turn.tools_called.push(ToolCallRecord {
        tool: "code".to_string(),
        input: task,
        output: if outcome.success {
            outcome.output.clone()
        } else {
            outcome.error.clone().unwrap_or_default()
        },
    });

    if outcome.success {
        turn.tool_result = Some(outcome.output);
        turn.tool_success = true;
    } else {
        let error = outcome.error.unwrap_or_else(|| "Unknown error".to_string());
        turn.tool_result = Some(format!(
            "Code execution failed after {} fixes: {}",
            turn.codefix_attempts, error
        ));
        turn.tool_success = false;
        turn.error_message = Some(error);
    }
    Stage::Synthesize
}

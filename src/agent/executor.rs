//! Parallel executor
//!
//! Fans every question of the plan out as an independent task and joins
//! them all before moving on. A branch can fail without touching its
//! siblings; errors become data on the question result, never panics or
//! early returns.

use std::time::Instant;

use futures::future::join_all;
use tracing::{info, warn};

use crate::llm::Message;
use crate::memory::estimate_tokens;

use super::AgentContext;
use super::errors::friendly_tool_error;
use super::format::format_latex_for_markdown;
use super::plan::{Question, QuestionKind, QuestionResult, ResultKind};
use super::prompts::{DIRECT_SOLVE_SYSTEM, codegen_fix_prompt, codegen_prompt, direct_solve_prompt};
use super::turn::{ModelCall, Stage, ToolCallRecord, Turn};

const SOLVER_MODEL: &str = "kimi-k2";
const CODEGEN_MODEL: &str = "qwen3-32b";
const CODE_ATTEMPTS: u32 = 3;

pub async fn execute_plan(ctx: &AgentContext, turn: &mut Turn) -> Stage {
    let Some(plan) = turn.plan.take() else {
        return Stage::Done;
    };
    if plan.questions.is_empty() {
        return Stage::Done;
    }

    let start = Instant::now();
    info!(questions = plan.questions.len(), "executing plan");

    let branches = plan.questions.iter().map(|q| execute_question(ctx, q));
    let mut results = join_all(branches).await;

    let mut total_in = 0i64;
    let mut total_out = 0i64;
    for (q, result) in plan.questions.iter().zip(results.iter_mut()) {
        if let Some(err) = result.error.take() {
            result.error = Some(friendly_tool_error(&err));
        }

        let shown = result
            .result
            .clone()
            .or_else(|| result.error.clone())
            .unwrap_or_default();
        let tokens_in = estimate_tokens(&q.content);
        let tokens_out = estimate_tokens(&shown);
        total_in += tokens_in;
        total_out += tokens_out;

        let trace_model = match &q.kind {
            QuestionKind::Wolfram { .. } => "wolfram-alpha",
            QuestionKind::Code { .. } => "python-code-executor",
            _ => SOLVER_MODEL,
        };
        let input = match &q.kind {
            QuestionKind::Wolfram { tool_input } | QuestionKind::Code { tool_input } => {
                tool_input.clone()
            }
            _ => q.content.clone(),
        };
        let mut output = shown.clone();
        if output.chars().count() > 200 {
            output = format!("{}...", output.chars().take(200).collect::<String>());
        }
        turn.record_call(ModelCall {
            model: trace_model.to_string(),
            agent: format!("parallel_executor_q{}", result.id),
            tokens_in,
            tokens_out,
            duration_ms: start.elapsed().as_millis() as i64,
            success: result.error.is_none(),
            error: result.error.clone(),
            tool_calls: vec![ToolCallRecord {
                tool: result.kind.wire(),
                input: input.clone(),
                output,
            }],
        });
        turn.tools_called.push(ToolCallRecord {
            tool: result.kind.wire(),
            input,
            output: result
                .result
                .clone()
                .or_else(|| result.error.clone())
                .unwrap_or_default(),
        });
    }

    turn.tool_success = results.iter().any(|r| r.error.is_none());
    let mut kinds: Vec<String> = results.iter().map(|r| r.kind.wire()).collect();
    kinds.dedup();
    turn.selected_tool = Some(format!("parallel({})", kinds.join(",")));
    turn.tool_result = Some(
        results
            .iter()
            .map(|r| {
                let mark = if r.error.is_none() { "✅" } else { "❌" };
                let value = r.result.as_deref().or(r.error.as_deref()).unwrap_or("");
                let short: String = value.chars().take(100).collect();
                format!("[{} {}]: {}...", mark, r.kind.wire().to_uppercase(), short)
            })
            .collect::<Vec<_>>()
            .join("\n"),
    );

    turn.record_call(ModelCall {
        model: "parallel_orchestrator".to_string(),
        agent: "parallel_executor".to_string(),
        tokens_in: total_in,
        tokens_out: total_out,
        duration_ms: start.elapsed().as_millis() as i64,
        success: turn.tool_success,
        error: None,
        tool_calls: Vec::new(),
    });

    turn.question_results = results;
    Stage::Synthesize
}

async fn execute_question(ctx: &AgentContext, q: &Question) -> QuestionResult {
    let mut result = QuestionResult {
        id: q.id,
        content: q.content.clone(),
        kind: ResultKind::from_kind(&q.kind),
        result: None,
        error: None,
    };

    match &q.kind {
        QuestionKind::Direct { answer: Some(answer) } => {
            // Planner already solved it; zero model calls
            result.result = Some(answer.clone());
        }
        QuestionKind::Direct { answer: None } => {
            let messages = vec![
                Message::system(DIRECT_SOLVE_SYSTEM),
                Message::user(direct_solve_prompt(&q.content)),
            ];
            match ctx.provider.complete(&messages, SOLVER_MODEL).await {
                Ok(text) => result.result = Some(format_latex_for_markdown(&text)),
                Err(e) => result.error = Some(e.to_string()),
            }
        }
        QuestionKind::Wolfram { tool_input } => {
            let mut solved = false;
            let (rate_ok, rate_reason) = ctx.limiter.check("wolfram", 0);
            if rate_ok && ctx.compute.quota_ok().await {
                ctx.limiter.record("wolfram", estimate_tokens(tool_input) as u64);
                match ctx.compute.query(tool_input).await {
                    Ok(text) => {
                        result.result = Some(text);
                        solved = true;
                    }
                    Err(e) => result.error = Some(format!("Wolfram failed: {e}")),
                }
            } else {
                let reason = if rate_ok { "monthly quota exhausted".to_string() } else { rate_reason };
                result.error = Some(format!("Wolfram failed: {reason}"));
            }

            if !solved {
                warn!(question = q.id, "wolfram branch failed, trying code fallback");
                let (code_result, code_error) =
                    solve_with_code(ctx, tool_input, CODE_ATTEMPTS).await;
                match code_result {
                    Some(output) => {
                        result.result =
                            Some(format!("{output}\n(Wolfram failed, tried Code fallback)"));
                        result.error = None;
                        result.kind = ResultKind::WolframCode;
                    }
                    None => {
                        let prev = result.error.take().unwrap_or_default();
                        result.error = Some(format!(
                            "{prev} | Code Fallback also failed: {}",
                            code_error.unwrap_or_else(|| "Unknown error".to_string())
                        ));
                    }
                }
            }
        }
        QuestionKind::Code { tool_input } => {
            let (code_result, code_error) = solve_with_code(ctx, tool_input, CODE_ATTEMPTS).await;
            result.result = code_result;
            result.error = code_error;
        }
        QuestionKind::Unknown { tag } => {
            result.error = Some(format!("Loại câu hỏi không xác định: {tag}"));
        }
    }

    result
}

/// Generate-execute-fix loop. The first attempt generates from the task
/// description; later attempts feed the previous code and its error back
/// for a rewrite. Stops on first success.
pub(crate) async fn solve_with_code(
    ctx: &AgentContext,
    task: &str,
    attempts: u32,
) -> (Option<String>, Option<String>) {
    let mut last_code = String::new();
    let mut last_error = String::new();

    for attempt in 0..attempts {
        let prompt = if attempt > 0 && !last_error.is_empty() {
            codegen_fix_prompt(&last_code, &last_error)
        } else {
            codegen_prompt(task)
        };

        let response = match ctx
            .provider
            .complete(&[Message::user(prompt)], CODEGEN_MODEL)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                last_error = e.to_string();
                continue;
            }
        };

        let code = extract_code(&response);
        last_code = code.clone();

        let outcome = ctx.sandbox.run(&code).await;
        if outcome.success {
            return (Some(outcome.output), None);
        }
        last_error = outcome.error.unwrap_or_else(|| "Unknown error".to_string());
    }

    (None, Some(last_error))
}

pub(crate) fn extract_code(response: &str) -> String {
    if let Some(rest) = response.split_once("```python") {
        if let Some((code, _)) = rest.1.split_once("```") {
            return code.trim().to_string();
        }
    }
    if response.contains("```") {
        let mut parts = response.split("```");
        parts.next();
        if let Some(code) = parts.next() {
            return code.trim().to_string();
        }
    }
    response.trim().to_string()
}

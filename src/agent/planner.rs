//! Planner stage
//!
//! One model call that either answers the turn outright or splits it into
//! typed sub-questions for the executor. The budget gate runs first: a
//! blocked session never reaches the model.

use std::time::Instant;

use tracing::{info, warn};

use crate::config::CONFIG;
use crate::memory::{estimate_message_tokens, estimate_tokens, truncate_history_to_fit};
use crate::llm::Message;

use super::AgentContext;
use super::errors::{PARSE_APOLOGY, friendly_planner_error};
use super::format::format_latex_for_markdown;
use super::plan::{Plan, QuestionKind};
use super::prompts::{PLANNER_SYSTEM_PROMPT, planner_user_prompt};
use super::repair::{RepairedOutcome, repair};
use super::turn::{ModelCall, Stage, Turn};

const PLANNER_MODEL: &str = "kimi-k2";

pub async fn plan_turn(ctx: &AgentContext, turn: &mut Turn) -> Stage {
    let status = ctx.memory.status(&turn.session_id, 0).await;
    turn.session_token_count = status.used_tokens;
    turn.memory_level = status.level;
    turn.memory_message = status.message.clone();
    if status.is_blocked() {
        info!(session = %turn.session_id, "session blocked, skipping planner call");
        turn.final_response = status.message;
        return Stage::Done;
    }

    let user_text = if turn.user_text.is_empty() {
        "(Không có text)"
    } else {
        turn.user_text.as_str()
    };
    let ocr_text = turn.ocr_text.as_deref().unwrap_or("(Không có ảnh)");
    let current_prompt = planner_user_prompt(user_text, ocr_text);

    let system_tokens = estimate_tokens(&PLANNER_SYSTEM_PROMPT);
    let current_tokens = estimate_tokens(&current_prompt);
    let history = truncate_history_to_fit(
        &turn.history,
        system_tokens,
        current_tokens,
        CONFIG.planner_context_tokens,
        CONFIG.response_reserve_tokens,
    );
    let input_tokens = system_tokens + estimate_message_tokens(&history) + current_tokens;

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(PLANNER_SYSTEM_PROMPT.as_str()));
    messages.extend(history);
    messages.push(Message::user(current_prompt));

    let start = Instant::now();
    let content = match ctx.provider.complete(&messages, PLANNER_MODEL).await {
        Ok(content) => content,
        Err(e) => {
            warn!("planner model call failed: {}", e);
            turn.record_call(ModelCall {
                model: PLANNER_MODEL.to_string(),
                agent: "planner".to_string(),
                tokens_in: 0,
                tokens_out: 0,
                duration_ms: start.elapsed().as_millis() as i64,
                success: false,
                error: Some(e.to_string()),
                tool_calls: Vec::new(),
            });
            turn.final_response = Some(friendly_planner_error(&e));
            return Stage::Done;
        }
    };

    let output_tokens = estimate_tokens(&content);
    ctx.limiter.record(PLANNER_MODEL, (input_tokens + output_tokens) as u64);
    turn.record_call(ModelCall {
        model: PLANNER_MODEL.to_string(),
        agent: "planner".to_string(),
        tokens_in: input_tokens,
        tokens_out: output_tokens,
        duration_ms: start.elapsed().as_millis() as i64,
        success: true,
        error: None,
        tool_calls: Vec::new(),
    });

    let outcome = repair(&content);

    // The call happened, so it gets billed before routing. A session that
    // crosses the block threshold right here terminates with the blocked
    // message no matter what the model produced.
    turn.session_token_count = ctx
        .memory
        .add(&turn.session_id, input_tokens + output_tokens)
        .await;
    let status = ctx.memory.status(&turn.session_id, 0).await;
    turn.memory_level = status.level;
    turn.memory_message = status.message.clone();
    if status.is_blocked() {
        turn.final_response = status.message;
        return Stage::Done;
    }

    match outcome {
        RepairedOutcome::Unrecoverable => {
            warn!("planner output unrecoverable, sending apology");
            turn.final_response = Some(PARSE_APOLOGY.to_string());
            Stage::Done
        }
        RepairedOutcome::FinalText(text) => {
            turn.final_response = Some(text);
            Stage::Done
        }
        RepairedOutcome::Plan(plan) if plan.all_direct() => route_all_direct(turn, plan),
        RepairedOutcome::Plan(plan) => {
            info!(questions = plan.questions.len(), "planner produced execution plan");
            turn.plan = Some(plan);
            Stage::Execute
        }
    }
}

/// The prompt tells the model to answer all-direct turns as prose, so an
/// all-direct plan means it broke its own contract. With answers present
/// they are concatenated locally; answerless direct questions are rerouted
/// through the compute tool instead of erroring.
fn route_all_direct(turn: &mut Turn, mut plan: Plan) -> Stage {
    let all_answered = plan.questions.iter().all(
        |q| matches!(&q.kind, QuestionKind::Direct { answer: Some(_) }),
    );

    if all_answered {
        let parts: Vec<String> = plan
            .questions
            .iter()
            .map(|q| {
                let answer = match &q.kind {
                    QuestionKind::Direct { answer: Some(a) } => a.as_str(),
                    _ => "",
                };
                format!("## Bài {}:\n{}\n", q.id, format_latex_for_markdown(answer))
            })
            .collect();
        turn.final_response = Some(parts.join("\n"));
        return Stage::Done;
    }

    for q in &mut plan.questions {
        if matches!(q.kind, QuestionKind::Direct { answer: None }) {
            q.kind = QuestionKind::Wolfram { tool_input: q.content.clone() };
        }
    }
    turn.plan = Some(plan);
    Stage::Execute
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testutil::{FixedCompute, FixedSandbox, ScriptedProvider, context};
    use crate::memory::BLOCK_TOKENS;
    use std::sync::Arc;

    async fn ctx_with(provider: ScriptedProvider) -> (AgentContext, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let ctx = context(
            provider.clone(),
            Arc::new(FixedCompute::ok("unused")),
            Arc::new(FixedSandbox::ok("unused")),
        )
        .await;
        (ctx, provider)
    }

    #[tokio::test]
    async fn test_blocked_session_skips_model_entirely() {
        let (ctx, provider) = ctx_with(ScriptedProvider::always("should not be called")).await;
        ctx.memory.add("s", BLOCK_TOKENS).await;

        let mut turn = Turn::new("s", vec![], "giải x^2=4", vec![]);
        let next = plan_turn(&ctx, &mut turn).await;

        assert_eq!(next, Stage::Done);
        assert_eq!(provider.call_count(), 0);
        assert!(turn.final_response.unwrap().contains("hết dung lượng"));
    }

    #[tokio::test]
    async fn test_prose_answer_responds_now() {
        let (ctx, provider) = ctx_with(ScriptedProvider::always("Đạo hàm của $x^2$ là $2x$.")).await;
        let mut turn = Turn::new("s", vec![], "đạo hàm x^2?", vec![]);
        let next = plan_turn(&ctx, &mut turn).await;

        assert_eq!(next, Stage::Done);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(turn.final_response.as_deref(), Some("Đạo hàm của $x^2$ là $2x$."));
        // Budget was charged for the call
        assert!(ctx.memory.usage("s").await > 0);
    }

    #[tokio::test]
    async fn test_tool_plan_routes_to_executor() {
        let raw = r#"{"questions": [{"id": 1, "content": "tích phân", "type": "wolfram", "tool_input": "integrate x^2"}]}"#;
        let (ctx, _) = ctx_with(ScriptedProvider::always(raw)).await;
        let mut turn = Turn::new("s", vec![], "tính tích phân", vec![]);
        let next = plan_turn(&ctx, &mut turn).await;

        assert_eq!(next, Stage::Execute);
        assert_eq!(turn.plan.as_ref().unwrap().questions.len(), 1);
    }

    #[tokio::test]
    async fn test_all_direct_with_answers_concatenates() {
        let raw = r#"{"questions": [
            {"id": 1, "content": "a", "type": "direct", "answer": "một"},
            {"id": 3, "content": "b", "type": "direct", "answer": "hai"}
        ]}"#;
        let (ctx, _) = ctx_with(ScriptedProvider::always(raw)).await;
        let mut turn = Turn::new("s", vec![], "hai câu", vec![]);
        let next = plan_turn(&ctx, &mut turn).await;

        assert_eq!(next, Stage::Done);
        let text = turn.final_response.unwrap();
        assert!(text.contains("## Bài 1:\nmột"));
        // Ids are preserved even when not contiguous
        assert!(text.contains("## Bài 3:\nhai"));
    }

    #[tokio::test]
    async fn test_answerless_direct_self_heals_to_compute() {
        let raw = r#"{"questions": [{"id": 1, "content": "giải pt", "type": "direct", "answer": null}]}"#;
        let (ctx, _) = ctx_with(ScriptedProvider::always(raw)).await;
        let mut turn = Turn::new("s", vec![], "giải pt", vec![]);
        let next = plan_turn(&ctx, &mut turn).await;

        assert_eq!(next, Stage::Execute);
        let plan = turn.plan.unwrap();
        assert_eq!(
            plan.questions[0].kind,
            QuestionKind::Wolfram { tool_input: "giải pt".to_string() }
        );
    }

    #[tokio::test]
    async fn test_model_failure_maps_to_friendly_message() {
        let (ctx, _) = ctx_with(ScriptedProvider::failing("context_length_exceeded")).await;
        let mut turn = Turn::new("s", vec![], "dài quá", vec![]);
        let next = plan_turn(&ctx, &mut turn).await;

        assert_eq!(next, Stage::Done);
        let text = turn.final_response.unwrap();
        assert!(text.contains("lỗi kỹ thuật") || text.contains("quá dài"));
        assert!(!turn.model_calls.is_empty());
        assert!(!turn.model_calls[0].success);
    }

    #[tokio::test]
    async fn test_unrecoverable_output_sends_apology() {
        let (ctx, _) = ctx_with(ScriptedProvider::always(r#"{"questions": ###"#)).await;
        let mut turn = Turn::new("s", vec![], "hỏi", vec![]);
        let next = plan_turn(&ctx, &mut turn).await;

        assert_eq!(next, Stage::Done);
        assert_eq!(turn.final_response.as_deref(), Some(PARSE_APOLOGY));
    }
}

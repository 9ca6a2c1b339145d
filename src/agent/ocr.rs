//! Image ingestion
//!
//! One vision call per attached image, all dispatched concurrently and
//! joined. Recognition failures are reported but never stop the turn; the
//! planner sees whatever text was recovered.

use std::time::Instant;

use futures::future::join_all;
use tracing::warn;

use crate::llm::Message;
use crate::memory::estimate_tokens;

use super::AgentContext;
use super::prompts::OCR_PROMPT;
use super::turn::{ModelCall, OcrResult, Stage, Turn};

const PRIMARY_MODEL: &str = "llama-4-maverick";
const FALLBACK_MODEL: &str = "llama-4-scout";

/// Tokens charged per image on the input side of the trace.
const IMAGE_INPUT_ESTIMATE: i64 = 500;

pub async fn ingest_images(ctx: &AgentContext, turn: &mut Turn) -> Stage {
    if turn.images.is_empty() {
        return Stage::Plan;
    }

    let start = Instant::now();
    let tasks = turn
        .images
        .iter()
        .enumerate()
        .map(|(i, image)| recognize_one(ctx, image, i + 1));
    let results = join_all(tasks).await;

    let multiple = turn.images.len() > 1;
    let texts: Vec<String> = results
        .iter()
        .filter_map(|r| {
            r.text.as_ref().map(|text| {
                if multiple {
                    format!("[Ảnh {}]:\n{}", r.image_index, text)
                } else {
                    text.clone()
                }
            })
        })
        .collect();

    let tokens_out: i64 = results
        .iter()
        .map(|r| estimate_tokens(r.text.as_deref().unwrap_or_default()))
        .sum();
    turn.record_call(ModelCall {
        model: PRIMARY_MODEL.to_string(),
        agent: "ocr_agent".to_string(),
        tokens_in: IMAGE_INPUT_ESTIMATE * turn.images.len() as i64,
        tokens_out,
        duration_ms: start.elapsed().as_millis() as i64,
        success: results.iter().any(|r| r.text.is_some()),
        error: None,
        tool_calls: Vec::new(),
    });

    let errors: Vec<String> = results
        .iter()
        .filter_map(|r| {
            r.error
                .as_ref()
                .map(|e| format!("Ảnh {}: {}", r.image_index, e))
        })
        .collect();
    if !errors.is_empty() && texts.is_empty() {
        warn!("all image recognition failed");
        turn.error_message = Some(format!("OCR failed: {}", errors.join("; ")));
    }

    turn.ocr_text = if texts.is_empty() { None } else { Some(texts.join("\n\n")) };
    turn.ocr_results = results;
    Stage::Plan
}

async fn recognize_one(ctx: &AgentContext, image: &str, index: usize) -> OcrResult {
    // Prefer the stronger vision model, fall back when its window is spent
    let (mut ok, mut reason) = ctx.limiter.check(PRIMARY_MODEL, IMAGE_INPUT_ESTIMATE as u64);
    let model = if ok {
        PRIMARY_MODEL
    } else {
        (ok, reason) = ctx.limiter.check(FALLBACK_MODEL, IMAGE_INPUT_ESTIMATE as u64);
        FALLBACK_MODEL
    };
    if !ok {
        return OcrResult { image_index: index, text: None, error: Some(reason) };
    }

    let messages = vec![Message::user_with_image(OCR_PROMPT, image)];
    match ctx.provider.complete(&messages, model).await {
        Ok(text) => {
            ctx.limiter.record(
                model,
                (IMAGE_INPUT_ESTIMATE + estimate_tokens(&text)) as u64,
            );
            OcrResult { image_index: index, text: Some(text), error: None }
        }
        Err(e) => OcrResult { image_index: index, text: None, error: Some(e.to_string()) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testutil::{FixedCompute, FixedSandbox, ScriptedProvider, context};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_no_images_passes_through() {
        let provider = Arc::new(ScriptedProvider::always("x"));
        let ctx = context(
            provider.clone(),
            Arc::new(FixedCompute::ok("x")),
            Arc::new(FixedSandbox::ok("x")),
        )
        .await;
        let mut turn = Turn::new("s", vec![], "text only", vec![]);

        assert_eq!(ingest_images(&ctx, &mut turn).await, Stage::Plan);
        assert_eq!(provider.call_count(), 0);
        assert!(turn.ocr_text.is_none());
    }

    #[tokio::test]
    async fn test_single_image_unlabeled() {
        let provider = Arc::new(ScriptedProvider::always("x^2 + 1 = 0"));
        let ctx = context(
            provider,
            Arc::new(FixedCompute::ok("x")),
            Arc::new(FixedSandbox::ok("x")),
        )
        .await;
        let mut turn = Turn::new("s", vec![], "", vec!["QUJD".into()]);

        ingest_images(&ctx, &mut turn).await;
        assert_eq!(turn.ocr_text.as_deref(), Some("x^2 + 1 = 0"));
        assert_eq!(turn.ocr_results.len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_images_labeled_and_joined() {
        let provider = Arc::new(ScriptedProvider::always("bài toán"));
        let ctx = context(
            provider.clone(),
            Arc::new(FixedCompute::ok("x")),
            Arc::new(FixedSandbox::ok("x")),
        )
        .await;
        let mut turn = Turn::new("s", vec![], "", vec!["QQ==".into(), "Qg==".into()]);

        ingest_images(&ctx, &mut turn).await;
        assert_eq!(provider.call_count(), 2);
        let text = turn.ocr_text.unwrap();
        assert!(text.contains("[Ảnh 1]:\nbài toán"));
        assert!(text.contains("[Ảnh 2]:\nbài toán"));
    }

    #[tokio::test]
    async fn test_total_failure_sets_error_but_continues() {
        let provider = Arc::new(ScriptedProvider::failing("vision down"));
        let ctx = context(
            provider,
            Arc::new(FixedCompute::ok("x")),
            Arc::new(FixedSandbox::ok("x")),
        )
        .await;
        let mut turn = Turn::new("s", vec![], "", vec!["QQ==".into()]);

        assert_eq!(ingest_images(&ctx, &mut turn).await, Stage::Plan);
        assert!(turn.ocr_text.is_none());
        assert!(turn.error_message.as_deref().unwrap().starts_with("OCR failed: Ảnh 1:"));
    }
}

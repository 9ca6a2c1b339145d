//! End-to-end pipeline tests with scripted collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sqlx::SqlitePool;

use pochi::agent::AgentContext;
use pochi::agent::graph::run_turn;
use pochi::agent::plan::ResultKind;
use pochi::agent::turn::Turn;
use pochi::db::init_db;
use pochi::llm::{LlmError, Message, ModelRateLimiter, Provider};
use pochi::memory::{BLOCK_TOKENS, SessionMemory};
use pochi::tools::{ComputeTool, ExecOutcome, Sandbox, ToolError};

/// Pops scripted responses per model, in order.
struct SeqProvider {
    responses: Mutex<HashMap<&'static str, Vec<Result<String, String>>>>,
    calls: AtomicUsize,
}

impl SeqProvider {
    fn new(scripted: Vec<(&'static str, Result<&str, &str>)>) -> Self {
        let mut responses: HashMap<&'static str, Vec<Result<String, String>>> = HashMap::new();
        for (model, response) in scripted {
            responses.entry(model).or_default().push(
                response.map(String::from).map_err(String::from),
            );
        }
        Self { responses: Mutex::new(responses), calls: AtomicUsize::new(0) }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for SeqProvider {
    async fn complete(&self, _messages: &[Message], model: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        let queue = responses
            .get_mut(model)
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| panic!("unexpected call to model {model}"));
        match queue.remove(0) {
            Ok(text) => Ok(text),
            Err(msg) => Err(LlmError::Api(msg)),
        }
    }

    fn name(&self) -> &'static str {
        "seq"
    }
}

struct StubCompute {
    response: Result<String, String>,
    calls: AtomicUsize,
}

#[async_trait]
impl ComputeTool for StubCompute {
    async fn query(&self, _input: &str) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Ok(text) => Ok(text.clone()),
            Err(reason) => Err(ToolError::NoResult(reason.clone())),
        }
    }

    async fn quota_ok(&self) -> bool {
        true
    }

    async fn quota_usage(&self) -> (i64, i64) {
        (0, 2000)
    }
}

struct StubSandbox {
    outcome: ExecOutcome,
}

#[async_trait]
impl Sandbox for StubSandbox {
    async fn run(&self, _code: &str) -> ExecOutcome {
        self.outcome.clone()
    }
}

async fn build_context(
    provider: Arc<SeqProvider>,
    compute: Arc<StubCompute>,
    sandbox: Arc<StubSandbox>,
) -> AgentContext {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    init_db(&pool).await.unwrap();
    AgentContext::new(
        provider,
        compute,
        sandbox,
        Arc::new(ModelRateLimiter::new()),
        SessionMemory::new(pool),
    )
}

#[tokio::test]
async fn mixed_plan_with_compute_fallback_promotion() {
    let plan = r#"{"questions": [
        {"id": 1, "content": "2+2", "type": "direct", "answer": "4"},
        {"id": 2, "content": "nguyên hàm của x^2", "type": "wolfram", "tool_input": "integrate x^2"}
    ]}"#;
    let provider = Arc::new(SeqProvider::new(vec![
        ("kimi-k2", Ok(plan)),
        ("qwen3-32b", Ok("```python\nimport sympy\nprint('x^3/3')\n```")),
        ("kimi-k2", Ok("Bài 1 là 4, bài 2 là x^3/3.")),
    ]));
    let compute = Arc::new(StubCompute {
        response: Err("no short answer available".to_string()),
        calls: AtomicUsize::new(0),
    });
    let sandbox = Arc::new(StubSandbox {
        outcome: ExecOutcome { success: true, output: "x^3/3".to_string(), error: None },
    });
    let ctx = build_context(provider.clone(), compute.clone(), sandbox).await;

    let mut turn = Turn::new("s1", vec![], "hai câu hỏi", vec![]);
    run_turn(&ctx, &mut turn).await;

    assert_eq!(turn.question_results.len(), 2);

    let first = &turn.question_results[0];
    assert_eq!(first.result.as_deref(), Some("4"));
    assert!(first.error.is_none());

    let second = &turn.question_results[1];
    assert_eq!(second.kind, ResultKind::WolframCode);
    assert!(second.error.is_none());
    let text = second.result.as_deref().unwrap();
    assert!(text.contains("x^3/3"));
    assert!(text.contains("(Wolfram failed, tried Code fallback)"));

    // planner + one codegen + synthesis; the precomputed direct answer
    // never touched a model
    assert_eq!(provider.call_count(), 3);
    assert_eq!(compute.calls.load(Ordering::SeqCst), 1);
    assert_eq!(turn.final_response.as_deref(), Some("Bài 1 là 4, bài 2 là x^3/3."));
}

#[tokio::test]
async fn blocked_session_never_calls_a_model() {
    let provider = Arc::new(SeqProvider::new(vec![]));
    let compute = Arc::new(StubCompute {
        response: Ok("unused".to_string()),
        calls: AtomicUsize::new(0),
    });
    let sandbox = Arc::new(StubSandbox {
        outcome: ExecOutcome { success: true, output: String::new(), error: None },
    });
    let ctx = build_context(provider.clone(), compute, sandbox).await;

    // 96% of the window is past the 95% block threshold
    ctx.memory.add("full", BLOCK_TOKENS + 1000).await;

    let mut turn = Turn::new("full", vec![], "giải giúp mình", vec![]);
    run_turn(&ctx, &mut turn).await;

    assert_eq!(provider.call_count(), 0);
    assert!(
        turn.final_response
            .as_deref()
            .unwrap()
            .contains("hết dung lượng bộ nhớ")
    );
}

#[tokio::test]
async fn failing_branch_does_not_poison_siblings() {
    let plan = r#"{"questions": [
        {"id": 1, "content": "a", "type": "direct", "answer": "một"},
        {"id": 2, "content": "b", "type": "code", "tool_input": "compute b"},
        {"id": 3, "content": "c", "type": "direct", "answer": "ba"}
    ]}"#;
    // Codegen model is down for all 3 attempts of question 2
    let provider = Arc::new(SeqProvider::new(vec![
        ("kimi-k2", Ok(plan)),
        ("qwen3-32b", Err("rate_limit exceeded: TPM")),
        ("qwen3-32b", Err("rate_limit exceeded: TPM")),
        ("qwen3-32b", Err("rate_limit exceeded: TPM")),
        ("kimi-k2", Ok("tổng hợp")),
    ]));
    let compute = Arc::new(StubCompute {
        response: Ok("unused".to_string()),
        calls: AtomicUsize::new(0),
    });
    let sandbox = Arc::new(StubSandbox {
        outcome: ExecOutcome { success: true, output: String::new(), error: None },
    });
    let ctx = build_context(provider, compute, sandbox).await;

    let mut turn = Turn::new("s2", vec![], "ba câu", vec![]);
    run_turn(&ctx, &mut turn).await;

    assert_eq!(turn.question_results.len(), 3);
    assert_eq!(turn.question_results[0].result.as_deref(), Some("một"));
    assert_eq!(turn.question_results[2].result.as_deref(), Some("ba"));
    let failed = &turn.question_results[1];
    assert!(failed.result.is_none());
    assert_eq!(
        failed.error.as_deref(),
        Some("Rate Limit (Quá tải), vui lòng đợi giây lát.")
    );
    assert!(turn.final_response.is_some());
}

#[tokio::test]
async fn latex_heavy_plan_survives_repair_end_to_end() {
    // Fenced, with an unescaped LaTeX backslash that breaks strict JSON
    let plan = "```json\n{\"questions\": [{\"id\": 1, \"content\": \"tích phân\", \"type\": \"code\", \"tool_input\": \"\\int x dx\"}]}\n```";
    let provider = Arc::new(SeqProvider::new(vec![
        ("kimi-k2", Ok(plan)),
        ("qwen3-32b", Ok("```python\nprint('x^2/2')\n```")),
        ("kimi-k2", Ok("Nguyên hàm là x^2/2 + C.")),
    ]));
    let compute = Arc::new(StubCompute {
        response: Ok("unused".to_string()),
        calls: AtomicUsize::new(0),
    });
    let sandbox = Arc::new(StubSandbox {
        outcome: ExecOutcome { success: true, output: "x^2/2".to_string(), error: None },
    });
    let ctx = build_context(provider, compute.clone(), sandbox).await;

    let mut turn = Turn::new("s3", vec![], "tính nguyên hàm", vec![]);
    run_turn(&ctx, &mut turn).await;

    assert_eq!(compute.calls.load(Ordering::SeqCst), 0);
    let result = &turn.question_results[0];
    assert_eq!(result.kind, ResultKind::Code);
    assert_eq!(result.result.as_deref(), Some("x^2/2"));
    assert_eq!(turn.final_response.as_deref(), Some("Nguyên hàm là x^2/2 + C."));
}

#[tokio::test]
async fn planner_outage_yields_friendly_terminal_message() {
    let provider = Arc::new(SeqProvider::new(vec![("kimi-k2", Err("connection reset"))]));
    let compute = Arc::new(StubCompute {
        response: Ok("unused".to_string()),
        calls: AtomicUsize::new(0),
    });
    let sandbox = Arc::new(StubSandbox {
        outcome: ExecOutcome { success: true, output: String::new(), error: None },
    });
    let ctx = build_context(provider, compute, sandbox).await;

    let mut turn = Turn::new("s4", vec![], "câu hỏi", vec![]);
    run_turn(&ctx, &mut turn).await;

    let text = turn.final_response.unwrap();
    assert!(text.starts_with("Xin lỗi, đã có lỗi kỹ thuật:"));
    // Raw transport details stay out of the user-facing message shape
    assert!(!text.contains("stack"));
}

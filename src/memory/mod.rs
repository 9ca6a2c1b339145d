//! Session memory accounting
//!
//! Tracks cumulative token usage per session and gates execution when a
//! session approaches the planner model's context window. Counters live in
//! sqlite so they survive restarts and can be incremented concurrently from
//! simultaneous turns.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::warn;

use crate::llm::{Content, Message, Part};

/// Context window of the planner/synthesis model (kimi-k2-instruct, 256K).
pub const CONTEXT_LENGTH: i64 = 262_144;

const WARNING_THRESHOLD: f64 = 0.80;
const BLOCK_THRESHOLD: f64 = 0.95;

/// Token count at which a session gets a non-fatal advisory.
pub const WARNING_TOKENS: i64 = (CONTEXT_LENGTH as f64 * WARNING_THRESHOLD) as i64;
/// Token count at which further model calls for the session are refused.
pub const BLOCK_TOKENS: i64 = (CONTEXT_LENGTH as f64 * BLOCK_THRESHOLD) as i64;

pub const WARNING_MESSAGE: &str =
    "Session sắp đầy bộ nhớ. Bạn nên tạo session mới sớm để tránh bị gián đoạn.";
pub const BLOCKED_MESSAGE: &str =
    "Session đã hết dung lượng bộ nhớ. Vui lòng tạo session mới để tiếp tục.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLevel {
    Ok,
    Warning,
    Blocked,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryStatus {
    pub session_id: String,
    pub used_tokens: i64,
    pub max_tokens: i64,
    pub percentage: f64,
    pub level: MemoryLevel,
    pub message: Option<String>,
}

impl MemoryStatus {
    pub fn is_blocked(&self) -> bool {
        self.level == MemoryLevel::Blocked
    }
}

/// Estimate token count from text. ~4 characters per token for mixed
/// Vietnamese/English; intentionally a heuristic, not real tokenization.
/// Every component in the pipeline accounts through this one function.
pub fn estimate_tokens(text: &str) -> i64 {
    (text.chars().count() / 4) as i64
}

/// Tokens charged for an image attachment when estimating message cost.
const IMAGE_TOKEN_ESTIMATE: i64 = 500;

/// Estimate total tokens for a list of chat messages (text + images).
pub fn estimate_message_tokens(messages: &[Message]) -> i64 {
    messages
        .iter()
        .map(|msg| match &msg.content {
            Content::Text(text) => estimate_tokens(text),
            Content::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    Part::Text { text } => estimate_tokens(text),
                    Part::ImageUrl { .. } => IMAGE_TOKEN_ESTIMATE,
                })
                .sum(),
        })
        .sum()
}

/// Truncate conversation history to fit within token limits.
/// Keeps most recent messages, drops oldest first.
pub fn truncate_history_to_fit(
    messages: &[Message],
    system_tokens: i64,
    current_tokens: i64,
    max_context_tokens: i64,
    reserve_for_response: i64,
) -> Vec<Message> {
    let available = max_context_tokens - system_tokens - current_tokens - reserve_for_response;
    if available <= 0 || messages.is_empty() {
        return Vec::new();
    }

    let mut kept: Vec<Message> = Vec::new();
    let mut total = 0i64;
    for msg in messages.iter().rev() {
        let msg_tokens = estimate_message_tokens(std::slice::from_ref(msg));
        if total + msg_tokens <= available {
            kept.push(msg.clone());
            total += msg_tokens;
        } else {
            break;
        }
    }
    kept.reverse();
    kept
}

/// Per-session token counter backed by sqlite.
///
/// Reads degrade to zero on database errors (the tracker reports, it never
/// fails a turn).
#[derive(Clone)]
pub struct SessionMemory {
    db: SqlitePool,
}

impl SessionMemory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Current token usage for a session.
    pub async fn usage(&self, session_id: &str) -> i64 {
        let row: Result<Option<(i64,)>, sqlx::Error> =
            sqlx::query_as("SELECT used_tokens FROM session_memory WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.db)
                .await;
        match row {
            Ok(Some((tokens,))) => tokens,
            Ok(None) => 0,
            Err(e) => {
                warn!("session memory read failed: {} - treating as 0", e);
                0
            }
        }
    }

    /// Add tokens to a session's usage. Atomic upsert so concurrent turns
    /// can increment safely. Returns the new total.
    pub async fn add(&self, session_id: &str, tokens: i64) -> i64 {
        let result: Result<(i64,), sqlx::Error> = sqlx::query_as(
            "INSERT INTO session_memory (session_id, used_tokens)
             VALUES ($1, $2)
             ON CONFLICT(session_id) DO UPDATE SET
                 used_tokens = used_tokens + excluded.used_tokens
             RETURNING used_tokens",
        )
        .bind(session_id)
        .bind(tokens)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok((total,)) => total,
            Err(e) => {
                warn!("session memory update failed: {}", e);
                tokens
            }
        }
    }

    /// Reset usage for a session (when the session is deleted).
    pub async fn reset(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_memory WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Check memory status for a session, optionally projecting an upcoming
    /// request's estimated tokens on top of current usage.
    pub async fn status(&self, session_id: &str, additional_tokens: i64) -> MemoryStatus {
        let current = self.usage(session_id).await;
        let projected = current + additional_tokens;
        let percentage = (projected as f64 / CONTEXT_LENGTH as f64) * 100.0;

        let (level, message) = if projected >= BLOCK_TOKENS {
            (MemoryLevel::Blocked, Some(BLOCKED_MESSAGE.to_string()))
        } else if projected >= WARNING_TOKENS {
            (MemoryLevel::Warning, Some(WARNING_MESSAGE.to_string()))
        } else {
            (MemoryLevel::Ok, None)
        };

        MemoryStatus {
            session_id: session_id.to_string(),
            used_tokens: current,
            max_tokens: CONTEXT_LENGTH,
            percentage,
            level,
            message,
        }
    }

    /// Tokens remaining before the session hits the block threshold.
    pub async fn remaining(&self, session_id: &str) -> i64 {
        (BLOCK_TOKENS - self.usage(session_id).await).max(0)
    }
}

//! Turn pipeline
//!
//! OCR -> planner -> parallel executor -> synthesizer, driven as an
//! explicit state machine by [`graph::run_turn`]. All external
//! collaborators are behind traits collected in [`AgentContext`].

pub mod errors;
pub mod executor;
pub mod format;
pub mod graph;
pub mod ocr;
pub mod plan;
pub mod planner;
pub mod prompts;
pub mod repair;
pub mod synthesizer;
pub mod turn;

use std::sync::Arc;

use crate::llm::{ModelRateLimiter, Provider};
use crate::memory::SessionMemory;
use crate::tools::{ComputeTool, Sandbox};

/// Everything a turn needs to talk to the outside world.
#[derive(Clone)]
pub struct AgentContext {
    pub provider: Arc<dyn Provider>,
    pub compute: Arc<dyn ComputeTool>,
    pub sandbox: Arc<dyn Sandbox>,
    pub limiter: Arc<ModelRateLimiter>,
    pub memory: SessionMemory,
}

impl AgentContext {
    pub fn new(
        provider: Arc<dyn Provider>,
        compute: Arc<dyn ComputeTool>,
        sandbox: Arc<dyn Sandbox>,
        limiter: Arc<ModelRateLimiter>,
        memory: SessionMemory,
    ) -> Self {
        Self { provider, compute, sandbox, limiter, memory }
    }
}

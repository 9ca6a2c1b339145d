// src/state.rs
// Shared application state handed to every request handler.

use std::sync::Arc;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::agent::AgentContext;
use crate::config::CONFIG;
use crate::db::{ChatStore, init_db};
use crate::llm::{GroqProvider, ModelRateLimiter};
use crate::memory::SessionMemory;
use crate::tools::{PythonSandbox, WolframTool};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub store: ChatStore,
    pub agent: AgentContext,
}

impl AppState {
    pub async fn create() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(CONFIG.sqlite_max_connections)
            .connect(&CONFIG.database_url)
            .await?;
        init_db(&db).await?;

        let agent = AgentContext::new(
            Arc::new(GroqProvider::new()?),
            Arc::new(WolframTool::new(db.clone())?),
            Arc::new(PythonSandbox::new()),
            Arc::new(ModelRateLimiter::new()),
            SessionMemory::new(db.clone()),
        );

        info!("Application state initialized");
        Ok(Self { db: db.clone(), store: ChatStore::new(db), agent })
    }
}

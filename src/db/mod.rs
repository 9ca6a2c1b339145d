//! Sqlite persistence
//!
//! Schema creation plus [`ChatStore`], the conversation/message CRUD layer.
//! Session token counters and tool quota/cache tables are created here too
//! but owned by their own modules.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

/// Create all tables if they don't exist.
pub async fn init_db(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            image_data TEXT,
            created_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation
         ON messages(conversation_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS session_memory (
            session_id TEXT PRIMARY KEY,
            used_tokens INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tool_quota (
            month_key TEXT PRIMARY KEY,
            used INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS query_cache (
            cache_key TEXT PRIMARY KEY,
            response TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    info!("Database schema ready");
    Ok(())
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub image_data: Option<String>,
    pub created_at: i64,
}

/// Conversation and message persistence.
#[derive(Clone)]
pub struct ChatStore {
    db: SqlitePool,
}

impl ChatStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO conversations (id, title, created_at, updated_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&id)
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(Conversation { id, title: title.to_string(), created_at: now, updated_at: now })
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, Conversation>(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    /// Newest-updated first.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, Conversation>(
            "SELECT id, title, created_at, updated_at
             FROM conversations ORDER BY updated_at DESC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn rename_conversation(&self, id: &str, title: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET title = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(title)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes the conversation and its messages. Session token counters are
    /// reset separately by the caller.
    pub async fn delete_conversation(&self, id: &str) -> Result<bool> {
        sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
        image_data: Option<&str>,
    ) -> Result<StoredMessage> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, image_data, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role)
        .bind(content)
        .bind(image_data)
        .bind(now)
        .execute(&self.db)
        .await?;
        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
            .bind(now)
            .bind(conversation_id)
            .execute(&self.db)
            .await?;
        Ok(StoredMessage {
            id,
            conversation_id: conversation_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            image_data: image_data.map(String::from),
            created_at: now,
        })
    }

    /// Fill in a placeholder row once the pipeline produces the final text.
    pub async fn update_message_content(&self, id: &str, content: &str) -> Result<()> {
        sqlx::query("UPDATE messages SET content = $1 WHERE id = $2")
            .bind(content)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Oldest first, the order a model consumes them in.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query_as::<_, StoredMessage>(
            "SELECT id, conversation_id, role, content, image_data, created_at
             FROM messages WHERE conversation_id = $1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Case-insensitive substring search across message contents.
    pub async fn search_messages(&self, query: &str, limit: i64) -> Result<Vec<StoredMessage>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query_as::<_, StoredMessage>(
            "SELECT id, conversation_id, role, content, image_data, created_at
             FROM messages WHERE content LIKE $1 ESCAPE '\\'
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> ChatStore {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        init_db(&pool).await.unwrap();
        ChatStore::new(pool)
    }

    #[tokio::test]
    async fn test_conversation_lifecycle() {
        let store = store().await;
        let conv = store.create_conversation("Bài tập đại số").await.unwrap();
        assert_eq!(store.list_conversations().await.unwrap().len(), 1);

        assert!(store.rename_conversation(&conv.id, "Đã đổi tên").await.unwrap());
        let fetched = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Đã đổi tên");

        assert!(store.delete_conversation(&conv.id).await.unwrap());
        assert!(store.get_conversation(&conv.id).await.unwrap().is_none());
        assert!(!store.delete_conversation(&conv.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_messages_ordered_and_deleted_with_conversation() {
        let store = store().await;
        let conv = store.create_conversation("test").await.unwrap();
        store.insert_message(&conv.id, "user", "giải x^2 = 4", None).await.unwrap();
        store.insert_message(&conv.id, "assistant", "x = ±2", None).await.unwrap();

        let msgs = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "user");
        assert_eq!(msgs[1].role, "assistant");

        store.delete_conversation(&conv.id).await.unwrap();
        assert!(store.list_messages(&conv.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_placeholder_update() {
        let store = store().await;
        let conv = store.create_conversation("test").await.unwrap();
        let msg = store.insert_message(&conv.id, "assistant", "", None).await.unwrap();
        store.update_message_content(&msg.id, "## Bài 1: xong").await.unwrap();
        let msgs = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(msgs[0].content, "## Bài 1: xong");
    }

    #[tokio::test]
    async fn test_search() {
        let store = store().await;
        let conv = store.create_conversation("test").await.unwrap();
        store.insert_message(&conv.id, "user", "tính đạo hàm của x^3", None).await.unwrap();
        store.insert_message(&conv.id, "user", "phương trình bậc hai", None).await.unwrap();

        let hits = store.search_messages("đạo hàm", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("x^3"));
        assert!(store.search_messages("không có", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_image_data_round_trip() {
        let store = store().await;
        let conv = store.create_conversation("test").await.unwrap();
        store
            .insert_message(&conv.id, "user", "đọc ảnh", Some("QUJDRA=="))
            .await
            .unwrap();
        let msgs = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(msgs[0].image_data.as_deref(), Some("QUJDRA=="));
    }
}

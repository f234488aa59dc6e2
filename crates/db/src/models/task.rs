use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Tag applied when the creator supplies none.
pub const DEFAULT_TAG: &str = "general";

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Open,
    Assigned,
    Completed,
    Cancelled,
    Paid,
}

impl TaskStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Paid | TaskStatus::Cancelled)
    }
}

/// A posted unit of work. `credits_reward` is escrowed from `created_by` for
/// the whole time the task is open/assigned/completed and is released exactly
/// once: to `assigned_to` on approval, or back to the creator on cancellation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub tags: String, // comma separated
    pub credits_reward: i64,
    pub status: TaskStatus,
    pub created_by: String,
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for posting a task.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    pub credits_reward: i64,
    pub tags: Option<Vec<String>>,
}

impl CreateTask {
    pub fn tags_column(&self) -> String {
        match self.tags.as_deref() {
            Some(tags) if !tags.is_empty() => tags.join(","),
            _ => DEFAULT_TAG.to_string(),
        }
    }
}

const TASK_COLUMNS: &str =
    "id, title, description, tags, credits_reward, status, created_by, assigned_to, created_at, updated_at";

impl Task {
    pub async fn create<'e, E>(
        executor: E,
        data: &CreateTask,
        task_id: Uuid,
        created_by: &str,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(
            r#"INSERT INTO tasks (id, title, description, tags, credits_reward, status, created_by)
               VALUES ($1, $2, $3, $4, $5, 'open', $6)
               RETURNING id, title, description, tags, credits_reward, status, created_by, assigned_to, created_at, updated_at"#,
        )
        .bind(task_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.tags_column())
        .bind(data.credits_reward)
        .bind(created_by)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC"
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_status(
        pool: &SqlitePool,
        status: TaskStatus,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = $1 ORDER BY created_at DESC"
        ))
        .bind(status)
        .fetch_all(pool)
        .await
    }

    /// Guarded status transition. The expected-status predicate makes a
    /// concurrent loser observe zero affected rows instead of clobbering the
    /// winner's write.
    pub async fn transition<'e, E>(
        executor: E,
        id: Uuid,
        expected: TaskStatus,
        next: TaskStatus,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE tasks
               SET status = $3, updated_at = datetime('now', 'subsec')
               WHERE id = $1 AND status = $2"#,
        )
        .bind(id)
        .bind(expected)
        .bind(next)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Claim an open task for a worker. Same guarded form as `transition`:
    /// only one of two racing workers can move the row out of `open`.
    pub async fn assign<'e, E>(
        executor: E,
        id: Uuid,
        assigned_to: &str,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE tasks
               SET status = 'assigned', assigned_to = $2, updated_at = datetime('now', 'subsec')
               WHERE id = $1 AND status = 'open'"#,
        )
        .bind(id)
        .bind(assigned_to)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Kind of ledger mutation a record documents.
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display,
)]
#[sqlx(type_name = "tx_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransactionType {
    /// Fixed signup grant on first authentication.
    Grant,
    /// Spendable balance decremented (AI action fee or direct deduction).
    Spend,
    /// Balance moved into escrow when a task is posted.
    Reserve,
    /// Escrow transferred to the assignee on approval.
    Release,
    /// Escrow returned to the creator on cancellation, or a fee re-credited
    /// after a failed generation.
    Refund,
}

/// Append-only audit entry; one per credit ledger mutation, never updated.
/// `balance_after` is the post-mutation spendable balance of the account the
/// credits landed on (or left, for spend/reserve).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: String,
    pub to_user_id: Option<String>,
    pub task_id: Option<Uuid>,
    pub amount: i64,
    pub tx_type: TransactionType,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    #[allow(clippy::too_many_arguments)]
    pub async fn create<'e, E>(
        executor: E,
        user_id: &str,
        to_user_id: Option<&str>,
        task_id: Option<Uuid>,
        amount: i64,
        tx_type: TransactionType,
        balance_after: i64,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, CreditTransaction>(
            r#"INSERT INTO credit_transactions (id, user_id, to_user_id, task_id, amount, tx_type, balance_after)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id, user_id, to_user_id, task_id, amount, tx_type, balance_after, created_at"#,
        )
        .bind(id)
        .bind(user_id)
        .bind(to_user_id)
        .bind(task_id)
        .bind(amount)
        .bind(tx_type)
        .bind(balance_after)
        .fetch_one(executor)
        .await
    }

    /// History for one user, most recent first. Matches rows where the user
    /// is either side of a transfer.
    pub async fn find_by_user_id(
        pool: &SqlitePool,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CreditTransaction>(
            r#"SELECT id, user_id, to_user_id, task_id, amount, tx_type, balance_after, created_at
               FROM credit_transactions
               WHERE user_id = $1 OR to_user_id = $1
               ORDER BY created_at DESC, rowid DESC
               LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_task_id(
        pool: &SqlitePool,
        task_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CreditTransaction>(
            r#"SELECT id, user_id, to_user_id, task_id, amount, tx_type, balance_after, created_at
               FROM credit_transactions
               WHERE task_id = $1
               ORDER BY created_at ASC, rowid ASC"#,
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }
}

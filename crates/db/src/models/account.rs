use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite};
use ts_rs::TS;

/// Spendable and escrowed credit balances for one user. `user_id` is the
/// opaque subject identifier issued by the upstream identity provider.
///
/// Rows are only ever mutated through the credit ledger, which validates
/// `balance >= 0 && escrow_balance >= 0` before every write; the schema
/// CHECK constraints back that up.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Account {
    pub user_id: String,
    pub balance: i64,
    pub escrow_balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub async fn find_by_user_id<'e, E>(
        executor: E,
        user_id: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Account>(
            r#"SELECT user_id, balance, escrow_balance, created_at, updated_at
               FROM accounts
               WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(executor)
        .await
    }

    /// Insert a new account unless one already exists. Returns true when the
    /// row was created, so the caller knows whether to record the signup
    /// grant.
    pub async fn insert_if_absent<'e, E>(
        executor: E,
        user_id: &str,
        balance: i64,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "INSERT INTO accounts (user_id, balance) VALUES ($1, $2) ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(balance)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite both balances for one account. Ledger code validates the
    /// invariants first and always calls this inside a transaction.
    pub async fn update_balances<'e, E>(
        executor: E,
        user_id: &str,
        balance: i64,
        escrow_balance: i64,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"UPDATE accounts
               SET balance = $2, escrow_balance = $3, updated_at = datetime('now', 'subsec')
               WHERE user_id = $1"#,
        )
        .bind(user_id)
        .bind(balance)
        .bind(escrow_balance)
        .execute(executor)
        .await?;

        Ok(())
    }
}

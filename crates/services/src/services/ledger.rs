//! Credit ledger: balance and escrow mutations as atomic transactions.
//!
//! Every public operation runs as a single sqlx transaction spanning the
//! balance read, the guard check, the balance write, and the audit record.
//! The `*_tx` variants take an open connection so the task lifecycle can fold
//! them into a larger atomic unit together with the task row itself.

use db::{
    begin_write,
    models::{
        account::Account,
        credit_transaction::{CreditTransaction, TransactionType},
    },
};
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

/// Fixed grant applied when an account is created on first authentication.
pub const SIGNUP_GRANT: i64 = 100;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("insufficient balance: have {available}, need {requested}")]
    InsufficientBalance { available: i64, requested: i64 },
    #[error("amount must be a positive integer, got {0}")]
    InvalidAmount(i64),
    #[error("escrow integrity fault for {user_id}: escrow {escrow} cannot cover {requested}")]
    EscrowIntegrity {
        user_id: String,
        escrow: i64,
        requested: i64,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    /// Stable machine-readable code, surfaced next to the human message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountNotFound(_) => "account_not_found",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::EscrowIntegrity { .. } => "escrow_integrity",
            Self::Database(_) => "database_error",
        }
    }
}

pub struct CreditLedger;

impl CreditLedger {
    /// Reject non-positive amounts before any store access.
    pub fn validate_amount(amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        Ok(())
    }

    /// Fetch the account, creating it with the signup grant on first touch.
    /// Safe to call on every authenticated request.
    pub async fn ensure_account(pool: &SqlitePool, user_id: &str) -> Result<Account, LedgerError> {
        let mut tx = begin_write(pool).await?;

        let created = Account::insert_if_absent(&mut *tx, user_id, SIGNUP_GRANT).await?;
        if created {
            CreditTransaction::create(
                &mut *tx,
                user_id,
                None,
                None,
                SIGNUP_GRANT,
                TransactionType::Grant,
                SIGNUP_GRANT,
            )
            .await?;
            info!(user_id, grant = SIGNUP_GRANT, "account created with signup grant");
        }

        let account = Self::require_account(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(account)
    }

    pub async fn get_account(pool: &SqlitePool, user_id: &str) -> Result<Account, LedgerError> {
        Account::find_by_user_id(pool, user_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))
    }

    /// Spend credits from the user's balance. On failure nothing is written:
    /// the balance is untouched and no audit record exists.
    pub async fn deduct(
        pool: &SqlitePool,
        user_id: &str,
        amount: i64,
    ) -> Result<Account, LedgerError> {
        Self::validate_amount(amount)?;

        let mut tx = begin_write(pool).await?;
        Self::deduct_tx(&mut tx, user_id, amount).await?;
        let account = Self::require_account(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(account)
    }

    /// Re-credit a previously deducted fee (compensation for a downstream
    /// failure). The original `spend` record stays; this appends a `refund`.
    pub async fn credit_fee_refund(
        pool: &SqlitePool,
        user_id: &str,
        amount: i64,
    ) -> Result<(), LedgerError> {
        Self::validate_amount(amount)?;

        let mut tx = begin_write(pool).await?;
        let account = Self::require_account(&mut tx, user_id).await?;
        let balance_after = account.balance + amount;

        Account::update_balances(&mut *tx, user_id, balance_after, account.escrow_balance).await?;
        CreditTransaction::create(
            &mut *tx,
            user_id,
            None,
            None,
            amount,
            TransactionType::Refund,
            balance_after,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    // ---- composable operations, called inside an open transaction ----

    pub async fn deduct_tx(
        conn: &mut SqliteConnection,
        user_id: &str,
        amount: i64,
    ) -> Result<i64, LedgerError> {
        Self::validate_amount(amount)?;

        let account = Self::require_account(conn, user_id).await?;
        if account.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                available: account.balance,
                requested: amount,
            });
        }

        let balance_after = account.balance - amount;
        Account::update_balances(&mut *conn, user_id, balance_after, account.escrow_balance)
            .await?;
        CreditTransaction::create(
            &mut *conn,
            user_id,
            None,
            None,
            amount,
            TransactionType::Spend,
            balance_after,
        )
        .await?;

        Ok(balance_after)
    }

    /// Move `amount` from the creator's balance into escrow. Runs in the same
    /// transaction as the task insertion so neither half applies alone.
    pub async fn reserve_tx(
        conn: &mut SqliteConnection,
        user_id: &str,
        amount: i64,
        task_id: Uuid,
    ) -> Result<i64, LedgerError> {
        Self::validate_amount(amount)?;

        let account = Self::require_account(conn, user_id).await?;
        if account.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                available: account.balance,
                requested: amount,
            });
        }

        let balance_after = account.balance - amount;
        Account::update_balances(
            &mut *conn,
            user_id,
            balance_after,
            account.escrow_balance + amount,
        )
        .await?;
        CreditTransaction::create(
            &mut *conn,
            user_id,
            None,
            Some(task_id),
            amount,
            TransactionType::Reserve,
            balance_after,
        )
        .await?;

        Ok(balance_after)
    }

    /// Transfer escrowed credits from the task creator to the assignee.
    /// Accounts are always touched creator-then-assignee; the fixed order
    /// keeps concurrent releases deadlock-free on multi-writer backends.
    pub async fn release_tx(
        conn: &mut SqliteConnection,
        from_user_id: &str,
        to_user_id: &str,
        amount: i64,
        task_id: Uuid,
    ) -> Result<i64, LedgerError> {
        Self::validate_amount(amount)?;

        let from = Self::require_account(conn, from_user_id).await?;
        if from.escrow_balance < amount {
            // Consistency bug somewhere upstream, not a user error.
            error!(
                user_id = from_user_id,
                escrow = from.escrow_balance,
                requested = amount,
                "escrow integrity fault during release"
            );
            return Err(LedgerError::EscrowIntegrity {
                user_id: from_user_id.to_string(),
                escrow: from.escrow_balance,
                requested: amount,
            });
        }

        Account::update_balances(
            &mut *conn,
            from_user_id,
            from.balance,
            from.escrow_balance - amount,
        )
        .await?;

        let to = Self::require_account(conn, to_user_id).await?;
        let balance_after = to.balance + amount;
        Account::update_balances(&mut *conn, to_user_id, balance_after, to.escrow_balance).await?;

        CreditTransaction::create(
            &mut *conn,
            from_user_id,
            Some(to_user_id),
            Some(task_id),
            amount,
            TransactionType::Release,
            balance_after,
        )
        .await?;

        Ok(balance_after)
    }

    /// Return escrowed credits to the creator's spendable balance.
    pub async fn refund_tx(
        conn: &mut SqliteConnection,
        user_id: &str,
        amount: i64,
        task_id: Uuid,
    ) -> Result<i64, LedgerError> {
        Self::validate_amount(amount)?;

        let account = Self::require_account(conn, user_id).await?;
        if account.escrow_balance < amount {
            error!(
                user_id,
                escrow = account.escrow_balance,
                requested = amount,
                "escrow integrity fault during refund"
            );
            return Err(LedgerError::EscrowIntegrity {
                user_id: user_id.to_string(),
                escrow: account.escrow_balance,
                requested: amount,
            });
        }

        let balance_after = account.balance + amount;
        Account::update_balances(
            &mut *conn,
            user_id,
            balance_after,
            account.escrow_balance - amount,
        )
        .await?;
        CreditTransaction::create(
            &mut *conn,
            user_id,
            None,
            Some(task_id),
            amount,
            TransactionType::Refund,
            balance_after,
        )
        .await?;

        Ok(balance_after)
    }

    async fn require_account(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<Account, LedgerError> {
        Account::find_by_user_id(&mut *conn, user_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))
    }
}

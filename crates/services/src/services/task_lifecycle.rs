//! Task state machine: open -> assigned -> completed -> paid, with
//! cancellation from open/assigned. Guards and the status write share one
//! transaction with the corresponding ledger movement, so a transition and
//! its credits apply together or not at all.

use db::{
    begin_write,
    models::task::{CreateTask, Task, TaskStatus},
};
use sqlx::SqlitePool;
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::ledger::{CreditLedger, LedgerError};

#[derive(Debug, Error)]
pub enum TaskLifecycleError {
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("invalid task state: {reason}")]
    InvalidTaskState { reason: String },
    #[error("not authorized to {action} this task")]
    NotAuthorized { action: &'static str },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl TaskLifecycleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TaskNotFound(_) => "task_not_found",
            Self::InvalidTaskState { .. } => "invalid_task_state",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::Ledger(e) => e.code(),
            Self::Database(_) => "database_error",
        }
    }

    fn wrong_status(actual: TaskStatus, required: TaskStatus) -> Self {
        Self::InvalidTaskState {
            reason: format!("task is {actual}, operation requires {required}"),
        }
    }
}

/// Who may cancel a task that is still open or assigned. The refund is always
/// the full reward, back to the creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CancellationPolicy {
    #[default]
    CreatorOnly,
    AssigneeOnly,
    CreatorOrAssignee,
}

impl CancellationPolicy {
    fn permits(&self, task: &Task, user_id: &str) -> bool {
        let is_creator = task.created_by == user_id;
        let is_assignee = task.assigned_to.as_deref() == Some(user_id);
        match self {
            Self::CreatorOnly => is_creator,
            Self::AssigneeOnly => is_assignee,
            Self::CreatorOrAssignee => is_creator || is_assignee,
        }
    }
}

pub struct TaskLifecycleService;

impl TaskLifecycleService {
    /// Post a task. Escrow reservation and task insertion are one atomic
    /// unit: if the creator cannot cover the reward, no task row exists.
    pub async fn create_task(
        pool: &SqlitePool,
        user_id: &str,
        data: &CreateTask,
    ) -> Result<Task, TaskLifecycleError> {
        CreditLedger::validate_amount(data.credits_reward)?;
        CreditLedger::ensure_account(pool, user_id).await?;

        let task_id = Uuid::new_v4();
        let mut tx = begin_write(pool).await?;

        let task = Task::create(&mut *tx, data, task_id, user_id).await?;
        CreditLedger::reserve_tx(&mut tx, user_id, data.credits_reward, task_id).await?;

        tx.commit().await?;

        info!(
            task_id = %task.id,
            created_by = user_id,
            credits_reward = task.credits_reward,
            "task posted, reward escrowed"
        );
        Ok(task)
    }

    /// Claim an open task. Re-accepting a task already assigned to the same
    /// caller is a no-op success so a timed-out client can retry safely.
    pub async fn accept_task(
        pool: &SqlitePool,
        user_id: &str,
        task_id: Uuid,
    ) -> Result<Task, TaskLifecycleError> {
        CreditLedger::ensure_account(pool, user_id).await?;

        let mut tx = begin_write(pool).await?;
        let task = Self::require_task(&mut tx, task_id).await?;

        if task.status == TaskStatus::Assigned && task.assigned_to.as_deref() == Some(user_id) {
            return Ok(task);
        }
        if task.created_by == user_id {
            return Err(TaskLifecycleError::InvalidTaskState {
                reason: "cannot accept a task you posted".to_string(),
            });
        }
        if task.status != TaskStatus::Open {
            return Err(TaskLifecycleError::wrong_status(task.status, TaskStatus::Open));
        }

        if !Task::assign(&mut *tx, task_id, user_id).await? {
            // a concurrent accept won between our read and the write
            return Err(TaskLifecycleError::wrong_status(
                TaskStatus::Assigned,
                TaskStatus::Open,
            ));
        }

        let task = Self::require_task(&mut tx, task_id).await?;
        tx.commit().await?;

        info!(task_id = %task_id, assigned_to = user_id, "task accepted");
        Ok(task)
    }

    /// Mark an assigned task as completed. Assignee only.
    pub async fn complete_task(
        pool: &SqlitePool,
        user_id: &str,
        task_id: Uuid,
    ) -> Result<Task, TaskLifecycleError> {
        let mut tx = begin_write(pool).await?;
        let task = Self::require_task(&mut tx, task_id).await?;

        if task.status == TaskStatus::Completed && task.assigned_to.as_deref() == Some(user_id) {
            return Ok(task);
        }
        if task.status != TaskStatus::Assigned {
            return Err(TaskLifecycleError::wrong_status(
                task.status,
                TaskStatus::Assigned,
            ));
        }
        if task.assigned_to.as_deref() != Some(user_id) {
            return Err(TaskLifecycleError::NotAuthorized { action: "complete" });
        }

        if !Task::transition(&mut *tx, task_id, TaskStatus::Assigned, TaskStatus::Completed).await? {
            return Err(TaskLifecycleError::wrong_status(
                TaskStatus::Completed,
                TaskStatus::Assigned,
            ));
        }

        let task = Self::require_task(&mut tx, task_id).await?;
        tx.commit().await?;

        info!(task_id = %task_id, "task completed, awaiting approval");
        Ok(task)
    }

    /// Approve a completed task: moves the task to paid and releases the
    /// escrowed reward to the assignee in the same transaction.
    pub async fn approve_task(
        pool: &SqlitePool,
        user_id: &str,
        task_id: Uuid,
    ) -> Result<Task, TaskLifecycleError> {
        let mut tx = begin_write(pool).await?;
        let task = Self::require_task(&mut tx, task_id).await?;

        if task.status == TaskStatus::Paid && task.created_by == user_id {
            return Ok(task);
        }
        if task.created_by != user_id {
            return Err(TaskLifecycleError::NotAuthorized { action: "approve" });
        }
        if task.status != TaskStatus::Completed {
            return Err(TaskLifecycleError::wrong_status(
                task.status,
                TaskStatus::Completed,
            ));
        }
        let assignee = task.assigned_to.clone().ok_or_else(|| {
            TaskLifecycleError::InvalidTaskState {
                reason: "completed task has no assignee".to_string(),
            }
        })?;

        if !Task::transition(&mut *tx, task_id, TaskStatus::Completed, TaskStatus::Paid).await? {
            return Err(TaskLifecycleError::wrong_status(
                TaskStatus::Paid,
                TaskStatus::Completed,
            ));
        }
        CreditLedger::release_tx(&mut tx, &task.created_by, &assignee, task.credits_reward, task_id)
            .await?;

        let task = Self::require_task(&mut tx, task_id).await?;
        tx.commit().await?;

        info!(
            task_id = %task_id,
            assignee = %assignee,
            amount = task.credits_reward,
            "task approved, escrow released"
        );
        Ok(task)
    }

    /// Cancel an open or assigned task, refunding the full escrowed reward to
    /// the creator. Which actor may cancel is a deployment policy.
    pub async fn cancel_task(
        pool: &SqlitePool,
        user_id: &str,
        task_id: Uuid,
        policy: CancellationPolicy,
    ) -> Result<Task, TaskLifecycleError> {
        let mut tx = begin_write(pool).await?;
        let task = Self::require_task(&mut tx, task_id).await?;

        if task.status == TaskStatus::Cancelled && policy.permits(&task, user_id) {
            return Ok(task);
        }
        if !policy.permits(&task, user_id) {
            return Err(TaskLifecycleError::NotAuthorized { action: "cancel" });
        }
        if task.status.is_terminal() || task.status == TaskStatus::Completed {
            return Err(TaskLifecycleError::InvalidTaskState {
                reason: format!("task is {}, only open or assigned tasks can be cancelled", task.status),
            });
        }

        if !Task::transition(&mut *tx, task_id, task.status, TaskStatus::Cancelled).await? {
            return Err(TaskLifecycleError::InvalidTaskState {
                reason: "task changed state concurrently".to_string(),
            });
        }
        CreditLedger::refund_tx(&mut tx, &task.created_by, task.credits_reward, task_id).await?;

        let task = Self::require_task(&mut tx, task_id).await?;
        tx.commit().await?;

        info!(
            task_id = %task_id,
            cancelled_by = user_id,
            refunded = task.credits_reward,
            "task cancelled, escrow refunded"
        );
        Ok(task)
    }

    async fn require_task(
        conn: &mut sqlx::SqliteConnection,
        task_id: Uuid,
    ) -> Result<Task, TaskLifecycleError> {
        Task::find_by_id(&mut *conn, task_id)
            .await?
            .ok_or(TaskLifecycleError::TaskNotFound(task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::{
        DBService,
        models::{
            account::Account,
            credit_transaction::{CreditTransaction, TransactionType},
        },
    };

    use crate::services::ledger::SIGNUP_GRANT;

    const CREATOR: &str = "creator";
    const WORKER: &str = "worker";
    const BYSTANDER: &str = "bystander";

    async fn setup() -> DBService {
        let db = DBService::new_in_memory().await.unwrap();
        for user in [CREATOR, WORKER, BYSTANDER] {
            CreditLedger::ensure_account(&db.pool, user).await.unwrap();
        }
        db
    }

    fn reward_task(reward: i64) -> CreateTask {
        CreateTask {
            title: "Write integration tests".to_string(),
            description: Some("Cover the checkout flow".to_string()),
            credits_reward: reward,
            tags: Some(vec!["testing".to_string(), "rust".to_string()]),
        }
    }

    async fn balances(pool: &SqlitePool, user: &str) -> (i64, i64) {
        let account = Account::find_by_user_id(pool, user).await.unwrap().unwrap();
        (account.balance, account.escrow_balance)
    }

    async fn total_credits(pool: &SqlitePool) -> i64 {
        let mut total = 0;
        for user in [CREATOR, WORKER, BYSTANDER] {
            let (balance, escrow) = balances(pool, user).await;
            total += balance + escrow;
        }
        total
    }

    #[tokio::test]
    async fn test_create_task_reserves_escrow() {
        let db = setup().await;

        let task = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(80))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Open);
        assert_eq!(balances(&db.pool, CREATOR).await, (20, 80));

        let records = CreditTransaction::find_by_task_id(&db.pool, task.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tx_type, TransactionType::Reserve);
    }

    #[tokio::test]
    async fn test_create_task_insufficient_balance_inserts_nothing() {
        let db = setup().await;

        let err = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(150))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TaskLifecycleError::Ledger(LedgerError::InsufficientBalance { .. })
        ));

        assert_eq!(balances(&db.pool, CREATOR).await, (SIGNUP_GRANT, 0));
        assert!(Task::find_all(&db.pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_task_rejects_non_positive_reward() {
        let db = setup().await;
        let err = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_amount");
    }

    #[tokio::test]
    async fn test_accept_exactly_once() {
        let db = setup().await;
        let task = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(80))
            .await
            .unwrap();

        let task = TaskLifecycleService::accept_task(&db.pool, WORKER, task.id)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_to.as_deref(), Some(WORKER));

        // a third user loses the race
        let err = TaskLifecycleService::accept_task(&db.pool, BYSTANDER, task.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_task_state");
    }

    #[tokio::test]
    async fn test_racing_accepts_one_winner_one_clean_guard_failure() {
        // multi-connection pool so the two accepts really contend
        let path =
            std::env::temp_dir().join(format!("codehive-lifecycle-{}.db", uuid::Uuid::new_v4()));
        let db = DBService::new(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        for user in [CREATOR, WORKER, BYSTANDER] {
            CreditLedger::ensure_account(&db.pool, user).await.unwrap();
        }
        let task = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(80))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            TaskLifecycleService::accept_task(&db.pool, WORKER, task.id),
            TaskLifecycleService::accept_task(&db.pool, BYSTANDER, task.id),
        );
        let results = vec![a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        // the loser waited on the write lock, re-read the assigned row, and
        // failed its guard; no database error leaks out
        let err = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(err.code(), "invalid_task_state");

        let task = Task::find_by_id(&db.pool, task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);

        drop(db);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[tokio::test]
    async fn test_accept_retry_by_assignee_is_noop() {
        let db = setup().await;
        let task = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(80))
            .await
            .unwrap();

        TaskLifecycleService::accept_task(&db.pool, WORKER, task.id).await.unwrap();
        let task = TaskLifecycleService::accept_task(&db.pool, WORKER, task.id)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_to.as_deref(), Some(WORKER));
    }

    #[tokio::test]
    async fn test_self_accept_rejected() {
        let db = setup().await;
        let task = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(80))
            .await
            .unwrap();

        let err = TaskLifecycleService::accept_task(&db.pool, CREATOR, task.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_task_state");
    }

    #[tokio::test]
    async fn test_happy_path_to_paid() {
        let db = setup().await;
        let before = total_credits(&db.pool).await;

        let task = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(80))
            .await
            .unwrap();
        TaskLifecycleService::accept_task(&db.pool, WORKER, task.id).await.unwrap();
        TaskLifecycleService::complete_task(&db.pool, WORKER, task.id).await.unwrap();
        let task = TaskLifecycleService::approve_task(&db.pool, CREATOR, task.id)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Paid);
        assert_eq!(balances(&db.pool, CREATOR).await, (20, 0));
        assert_eq!(balances(&db.pool, WORKER).await, (SIGNUP_GRANT + 80, 0));
        assert_eq!(before, total_credits(&db.pool).await);

        let releases: Vec<_> = CreditTransaction::find_by_task_id(&db.pool, task.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.tx_type == TransactionType::Release)
            .collect();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].amount, 80);
        assert_eq!(releases[0].to_user_id.as_deref(), Some(WORKER));
    }

    #[tokio::test]
    async fn test_out_of_order_transitions_fail() {
        let db = setup().await;
        let task = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(80))
            .await
            .unwrap();

        // approve an open task
        let err = TaskLifecycleService::approve_task(&db.pool, CREATOR, task.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_task_state");

        // complete an open task
        let err = TaskLifecycleService::complete_task(&db.pool, WORKER, task.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_task_state");

        TaskLifecycleService::accept_task(&db.pool, WORKER, task.id).await.unwrap();

        // complete by the wrong actor
        let err = TaskLifecycleService::complete_task(&db.pool, BYSTANDER, task.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_authorized");

        TaskLifecycleService::complete_task(&db.pool, WORKER, task.id).await.unwrap();

        // approve by the wrong actor
        let err = TaskLifecycleService::approve_task(&db.pool, WORKER, task.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_authorized");
    }

    #[tokio::test]
    async fn test_approve_retry_after_paid_is_noop() {
        let db = setup().await;
        let task = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(80))
            .await
            .unwrap();
        TaskLifecycleService::accept_task(&db.pool, WORKER, task.id).await.unwrap();
        TaskLifecycleService::complete_task(&db.pool, WORKER, task.id).await.unwrap();
        TaskLifecycleService::approve_task(&db.pool, CREATOR, task.id).await.unwrap();

        // the retry must not release a second time
        let task = TaskLifecycleService::approve_task(&db.pool, CREATOR, task.id)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Paid);
        assert_eq!(balances(&db.pool, WORKER).await, (SIGNUP_GRANT + 80, 0));

        let releases = CreditTransaction::find_by_task_id(&db.pool, task.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.tx_type == TransactionType::Release)
            .count();
        assert_eq!(releases, 1);
    }

    #[tokio::test]
    async fn test_cancel_creator_only_policy() {
        let db = setup().await;
        let task = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(80))
            .await
            .unwrap();
        TaskLifecycleService::accept_task(&db.pool, WORKER, task.id).await.unwrap();

        let err = TaskLifecycleService::cancel_task(
            &db.pool,
            WORKER,
            task.id,
            CancellationPolicy::CreatorOnly,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "not_authorized");

        let task = TaskLifecycleService::cancel_task(
            &db.pool,
            CREATOR,
            task.id,
            CancellationPolicy::CreatorOnly,
        )
        .await
        .unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(balances(&db.pool, CREATOR).await, (SIGNUP_GRANT, 0));
    }

    #[tokio::test]
    async fn test_cancel_assignee_only_policy() {
        let db = setup().await;
        let task = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(80))
            .await
            .unwrap();
        TaskLifecycleService::accept_task(&db.pool, WORKER, task.id).await.unwrap();

        let err = TaskLifecycleService::cancel_task(
            &db.pool,
            CREATOR,
            task.id,
            CancellationPolicy::AssigneeOnly,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "not_authorized");

        let task = TaskLifecycleService::cancel_task(
            &db.pool,
            WORKER,
            task.id,
            CancellationPolicy::AssigneeOnly,
        )
        .await
        .unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);

        // refund goes to the creator regardless of who cancelled
        assert_eq!(balances(&db.pool, CREATOR).await, (SIGNUP_GRANT, 0));
        assert_eq!(balances(&db.pool, WORKER).await, (SIGNUP_GRANT, 0));
    }

    #[tokio::test]
    async fn test_cancel_paid_task_rejected() {
        let db = setup().await;
        let task = TaskLifecycleService::create_task(&db.pool, CREATOR, &reward_task(80))
            .await
            .unwrap();
        TaskLifecycleService::accept_task(&db.pool, WORKER, task.id).await.unwrap();
        TaskLifecycleService::complete_task(&db.pool, WORKER, task.id).await.unwrap();
        TaskLifecycleService::approve_task(&db.pool, CREATOR, task.id).await.unwrap();

        let err = TaskLifecycleService::cancel_task(
            &db.pool,
            CREATOR,
            task.id,
            CancellationPolicy::CreatorOnly,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "invalid_task_state");
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let db = setup().await;
        let err = TaskLifecycleService::accept_task(&db.pool, WORKER, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "task_not_found");
    }
}

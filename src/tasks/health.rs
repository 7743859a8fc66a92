//! Account health check.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::batch::{BatchRun, BatchRunner, WorkItem};
use crate::error::{ItemError, StoreResult, TaskError};
use crate::pipeline::{Criticality, Task, TaskOutput};
use crate::store::{put_as, DocumentStore, WorkSource};
use crate::tasks::load_items;
use crate::tasks::model::{Account, AccountHealth, AccountStatus, TokenHealth, ACCOUNTS, ACCOUNT_HEALTH};

/// Label used for reports and status records.
pub const HEALTH_LABEL: &str = "account_health";

/// Every account that has not been disconnected.
pub struct ConnectedAccounts {
    store: Arc<dyn DocumentStore>,
}

impl ConnectedAccounts {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WorkSource<Account> for ConnectedAccounts {
    async fn fetch(&self) -> StoreResult<Vec<WorkItem<Account>>> {
        let mut items: Vec<WorkItem<Account>> = load_items(self.store.as_ref(), ACCOUNTS).await?;
        items.retain(|item| item.payload.status != AccountStatus::Disconnected);
        Ok(items)
    }
}

/// Classifies each connected account's token and records the result.
pub struct AccountHealthTask {
    store: Arc<dyn DocumentStore>,
    runner: BatchRunner,
    threshold: chrono::Duration,
}

impl AccountHealthTask {
    pub const NAME: &'static str = "account_health";

    pub fn new(store: Arc<dyn DocumentStore>, runner: BatchRunner, threshold: chrono::Duration) -> Self {
        Self {
            store,
            runner,
            threshold,
        }
    }

    pub async fn run(&self) -> Result<BatchRun<Account, AccountHealth>, TaskError> {
        let items = ConnectedAccounts::new(Arc::clone(&self.store)).fetch().await?;
        let run = self
            .runner
            .run_validated(
                HEALTH_LABEL,
                items,
                |item| item.payload.validate().map(|_| ()),
                |item| self.check_account(item),
            )
            .await?;

        let count = |health: TokenHealth| {
            run.outcomes
                .iter()
                .filter_map(|o| o.value())
                .filter(|h| h.token == health)
                .count()
        };
        info!(
            healthy = count(TokenHealth::Healthy),
            expiring = count(TokenHealth::Expiring),
            expired = count(TokenHealth::Expired),
            unknown = count(TokenHealth::Unknown),
            "account health summary"
        );
        Ok(run)
    }

    async fn check_account(&self, item: Arc<WorkItem<Account>>) -> Result<AccountHealth, ItemError> {
        let account = &item.payload;
        let now = Utc::now();
        let health = AccountHealth {
            account_id: item.id.clone(),
            user_id: account.user_id.clone(),
            platform: account.platform.clone(),
            token: TokenHealth::classify(account.token_expires_at, now, self.threshold),
            token_expires_at: account.token_expires_at,
            days_until_expiry: account
                .token_expires_at
                .map(|at| (at - now).num_days()),
            checked_at: now,
        };

        put_as(self.store.as_ref(), ACCOUNT_HEALTH, &item.id, &health)
            .await
            .map_err(|err| ItemError::new(format!("failed to save health record: {}", err)))?;
        Ok(health)
    }
}

#[async_trait]
impl Task for AccountHealthTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn criticality(&self) -> Criticality {
        Criticality::NonCritical
    }

    async fn execute(&self) -> Result<TaskOutput, TaskError> {
        let run = self.run().await?;
        Ok(TaskOutput::with_report(run.report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchRunnerConfig;
    use crate::store::{get_as, MemoryStore};
    use std::time::Duration;

    fn account(user: &str, expires_in_days: Option<i64>, status: AccountStatus) -> Account {
        Account {
            user_id: user.to_string(),
            platform: "facebook".to_string(),
            access_token: "tok".to_string(),
            page_id: None,
            token_expires_at: expires_in_days.map(|d| Utc::now() + chrono::Duration::days(d)),
            status,
            last_refreshed_at: None,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_health_task_classifies_and_writes_records() {
        let store = Arc::new(MemoryStore::new());
        let accounts = [
            ("a_facebook", account("a", Some(60), AccountStatus::Connected)),
            ("b_facebook", account("b", Some(3), AccountStatus::Connected)),
            ("c_facebook", account("c", Some(-1), AccountStatus::RefreshFailed)),
            ("d_facebook", account("d", None, AccountStatus::Connected)),
            ("e_facebook", account("e", Some(60), AccountStatus::Disconnected)),
        ];
        for (id, acct) in &accounts {
            put_as(store.as_ref(), ACCOUNTS, id, acct).await.unwrap();
        }

        let runner = BatchRunner::new(
            BatchRunnerConfig::new()
                .with_batch_size(2)
                .with_inter_batch_delay(Duration::ZERO),
            "run-test",
        );
        let task = AccountHealthTask::new(store.clone(), runner, chrono::Duration::days(7));
        let run = task.run().await.expect("run");

        assert_eq!(run.report.total, 4);
        assert_eq!(run.report.succeeded, 4);
        assert_eq!(run.report.batches, 2);
        assert_eq!(store.count(ACCOUNT_HEALTH).await, 4);

        let expected = [
            ("a_facebook", TokenHealth::Healthy),
            ("b_facebook", TokenHealth::Expiring),
            ("c_facebook", TokenHealth::Expired),
            ("d_facebook", TokenHealth::Unknown),
        ];
        for (id, token) in expected {
            let record: AccountHealth = get_as(store.as_ref(), ACCOUNT_HEALTH, id)
                .await
                .unwrap()
                .expect("health record");
            assert_eq!(record.token, token, "account {}", id);
        }
    }
}

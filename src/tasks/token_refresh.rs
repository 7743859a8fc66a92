//! OAuth token refresh.
//!
//! Connected accounts whose token is about to expire are exchanged for a
//! fresh long-lived token. Facebook and Instagram tokens are both issued by
//! the Facebook app, so they share one exchange endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::batch::{BatchRun, BatchRunner, Outcome, WorkItem};
use crate::config::FacebookCredentials;
use crate::error::{ExternalError, ItemError, StoreResult, TaskError};
use crate::pipeline::{Criticality, Task, TaskOutput};
use crate::retry::RetryPolicy;
use crate::store::{DocumentStore, WorkSource};
use crate::tasks::model::{user_accounts, Account, AccountStatus, Platform, ACCOUNTS};
use crate::tasks::{load_items, write_with_copy};

/// Label used for reports and status records.
pub const TOKEN_REFRESH_LABEL: &str = "token_refresh";

/// A token handed back by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangedToken {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Exchanges a short- or long-lived token for a fresh long-lived one.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(
        &self,
        platform: Platform,
        access_token: &str,
    ) -> Result<ExchangedToken, ExternalError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    message: String,
}

/// Read a Graph API error response into an [`ExternalError::Api`].
pub(crate) async fn graph_error(response: reqwest::Response) -> ExternalError {
    let status = response.status().as_u16();
    let message = match response.json::<GraphErrorBody>().await {
        Ok(body) => body.error.message,
        Err(_) => format!("HTTP {}", status),
    };
    ExternalError::Api { status, message }
}

/// Token exchange against the Graph API `oauth/access_token` endpoint.
#[derive(Debug, Clone)]
pub struct GraphTokenExchange {
    client: reqwest::Client,
    base_url: String,
    credentials: FacebookCredentials,
}

impl GraphTokenExchange {
    pub fn new(
        base_url: impl Into<String>,
        credentials: FacebookCredentials,
        request_timeout: Duration,
    ) -> Result<Self, ExternalError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }
}

#[async_trait]
impl TokenExchange for GraphTokenExchange {
    async fn exchange(
        &self,
        platform: Platform,
        access_token: &str,
    ) -> Result<ExchangedToken, ExternalError> {
        if !platform.uses_facebook_tokens() {
            return Err(ExternalError::Unsupported(platform.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/oauth/access_token", self.base_url))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.credentials.app_id.as_str()),
                ("client_secret", self.credentials.app_secret.as_str()),
                ("fb_exchange_token", access_token),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(graph_error(response).await);
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| ExternalError::InvalidResponse(err.to_string()))?;
        if body.access_token.is_empty() {
            return Err(ExternalError::InvalidResponse(
                "empty access_token".to_string(),
            ));
        }

        Ok(ExchangedToken {
            access_token: body.access_token,
            expires_at: body
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }
}

/// Connected accounts whose token expires within the threshold.
pub struct ExpiringAccounts {
    store: Arc<dyn DocumentStore>,
    threshold: chrono::Duration,
}

impl ExpiringAccounts {
    pub fn new(store: Arc<dyn DocumentStore>, threshold: chrono::Duration) -> Self {
        Self { store, threshold }
    }
}

#[async_trait]
impl WorkSource<Account> for ExpiringAccounts {
    async fn fetch(&self) -> StoreResult<Vec<WorkItem<Account>>> {
        let now = Utc::now();
        let mut items: Vec<WorkItem<Account>> = load_items(self.store.as_ref(), ACCOUNTS).await?;
        items.retain(|item| {
            item.payload.status != AccountStatus::Disconnected
                && item.payload.needs_refresh(now, self.threshold)
        });
        Ok(items)
    }
}

/// Refreshes every expiring account token.
pub struct RefreshTokensTask {
    store: Arc<dyn DocumentStore>,
    exchange: Arc<dyn TokenExchange>,
    runner: BatchRunner,
    retry: RetryPolicy,
    threshold: chrono::Duration,
    criticality: Criticality,
}

impl RefreshTokensTask {
    pub const NAME: &'static str = "refresh_tokens";

    pub fn new(
        store: Arc<dyn DocumentStore>,
        exchange: Arc<dyn TokenExchange>,
        runner: BatchRunner,
        retry: RetryPolicy,
        threshold: chrono::Duration,
    ) -> Self {
        Self {
            store,
            exchange,
            runner,
            retry,
            threshold,
            criticality: Criticality::NonCritical,
        }
    }

    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    /// Fetch expiring accounts and refresh them in batches.
    pub async fn run(&self) -> Result<BatchRun<Account, Account>, TaskError> {
        let source = ExpiringAccounts::new(Arc::clone(&self.store), self.threshold);
        let items = source.fetch().await?;
        info!(accounts = items.len(), "accounts due for token refresh");

        let run = self
            .runner
            .run_validated(
                TOKEN_REFRESH_LABEL,
                items,
                |item| item.payload.validate().map(|_| ()),
                |item| self.refresh_account(item),
            )
            .await?;

        // A deadline cancels the handler before it can flag the account.
        for outcome in &run.outcomes {
            if let Outcome::Failure { item, error, .. } = outcome {
                if error.timed_out {
                    self.mark_failed(&item.id, &item.payload, &error.message).await;
                }
            }
        }
        Ok(run)
    }

    async fn refresh_account(&self, item: Arc<WorkItem<Account>>) -> Result<Account, ItemError> {
        let account = &item.payload;
        let platform: Platform = account
            .platform
            .parse()
            .map_err(|err: crate::error::ValidationError| ItemError::new(err.to_string()))?;

        if !platform.uses_facebook_tokens() {
            let err = ExternalError::Unsupported(platform.to_string());
            self.mark_failed(&item.id, account, &err.to_string()).await;
            return Err(ItemError::new(format!("token refresh failed: {}", err)));
        }

        let exchange = self.exchange.as_ref();
        let token = account.access_token.as_str();
        let label = format!("token refresh {}", item.id);
        let result = self
            .retry
            .execute_when(&label, ExternalError::is_retryable, |_ctx| {
                exchange.exchange(platform, token)
            })
            .await;

        let exchanged = match result {
            Ok(exchanged) => exchanged,
            Err(err) => {
                self.mark_failed(&item.id, account, &err.source.to_string())
                    .await;
                return Err(err.into());
            }
        };

        let updated = Account {
            access_token: exchanged.access_token,
            token_expires_at: exchanged.expires_at,
            status: AccountStatus::Connected,
            last_refreshed_at: Some(Utc::now()),
            last_error: None,
            ..account.clone()
        };
        write_with_copy(
            self.store.as_ref(),
            ACCOUNTS,
            &user_accounts(&updated.user_id),
            &item.id,
            &updated,
        )
        .await
        .map_err(|err| ItemError::new(format!("failed to save refreshed token: {}", err)))?;

        Ok(updated)
    }

    /// Flag the account so the dashboard can ask the user to reconnect.
    async fn mark_failed(&self, id: &str, account: &Account, message: &str) {
        let flagged = Account {
            status: AccountStatus::RefreshFailed,
            last_error: Some(message.to_string()),
            ..account.clone()
        };
        if let Err(err) = write_with_copy(
            self.store.as_ref(),
            ACCOUNTS,
            &user_accounts(&account.user_id),
            id,
            &flagged,
        )
        .await
        {
            warn!(account_id = id, error = %err, "failed to flag account after refresh failure");
        }
    }
}

#[async_trait]
impl Task for RefreshTokensTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn criticality(&self) -> Criticality {
        self.criticality
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
    use crate::store::{get_as, put_as, MemoryStore};
    use crate::timeout::TimeoutConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> FacebookCredentials {
        FacebookCredentials {
            app_id: "app-1".to_string(),
            app_secret: "shh".to_string(),
        }
    }

    fn account(user: &str, platform: &str, expires_in_days: Option<i64>) -> Account {
        Account {
            user_id: user.to_string(),
            platform: platform.to_string(),
            access_token: format!("old-{}", user),
            page_id: None,
            token_expires_at: expires_in_days.map(|d| Utc::now() + chrono::Duration::days(d)),
            status: AccountStatus::Connected,
            last_refreshed_at: None,
            last_error: None,
        }
    }

    fn fast_runner() -> BatchRunner {
        let config = BatchRunnerConfig::new()
            .with_batch_size(2)
            .with_max_concurrency(2)
            .with_inter_batch_delay(Duration::ZERO);
        BatchRunner::new(config, "run-test")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
    }

    /// Fails for tokens containing "bad", succeeds otherwise.
    struct FakeExchange {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TokenExchange for FakeExchange {
        async fn exchange(
            &self,
            _platform: Platform,
            access_token: &str,
        ) -> Result<ExchangedToken, ExternalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if access_token.contains("bad") {
                return Err(ExternalError::Api {
                    status: 400,
                    message: "Error validating access token".to_string(),
                });
            }
            Ok(ExchangedToken {
                access_token: format!("new-{}", access_token),
                expires_at: Some(Utc::now() + chrono::Duration::days(60)),
            })
        }
    }

    #[tokio::test]
    async fn test_graph_exchange_sends_expected_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access_token"))
            .and(query_param("grant_type", "fb_exchange_token"))
            .and(query_param("client_id", "app-1"))
            .and(query_param("client_secret", "shh"))
            .and(query_param("fb_exchange_token", "short"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "long",
                "token_type": "bearer",
                "expires_in": 5184000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange =
            GraphTokenExchange::new(server.uri(), credentials(), Duration::from_secs(5))
                .expect("client");
        let token = exchange
            .exchange(Platform::Facebook, "short")
            .await
            .expect("exchange");

        assert_eq!(token.access_token, "long");
        let expires_at = token.expires_at.expect("expiry");
        assert!(expires_at > Utc::now() + chrono::Duration::days(59));
    }

    #[tokio::test]
    async fn test_graph_exchange_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "Invalid OAuth access token.", "type": "OAuthException", "code": 190}
            })))
            .mount(&server)
            .await;

        let exchange =
            GraphTokenExchange::new(server.uri(), credentials(), Duration::from_secs(5))
                .expect("client");
        let err = exchange
            .exchange(Platform::Instagram, "stale")
            .await
            .expect_err("should fail");

        match err {
            ExternalError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid OAuth access token.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_graph_exchange_rejects_other_platforms_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let exchange =
            GraphTokenExchange::new(server.uri(), credentials(), Duration::from_secs(5))
                .expect("client");
        let err = exchange
            .exchange(Platform::Twitter, "tok")
            .await
            .expect_err("should fail");
        assert!(matches!(err, ExternalError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_expiring_accounts_filters_by_threshold_and_status() {
        let store = Arc::new(MemoryStore::new());
        put_as(store.as_ref(), ACCOUNTS, "u-1_facebook", &account("u-1", "facebook", Some(2)))
            .await
            .unwrap();
        put_as(store.as_ref(), ACCOUNTS, "u-2_facebook", &account("u-2", "facebook", Some(45)))
            .await
            .unwrap();
        put_as(store.as_ref(), ACCOUNTS, "u-3_instagram", &account("u-3", "instagram", None))
            .await
            .unwrap();
        let mut gone = account("u-4", "facebook", Some(1));
        gone.status = AccountStatus::Disconnected;
        put_as(store.as_ref(), ACCOUNTS, "u-4_facebook", &gone).await.unwrap();

        let source = ExpiringAccounts::new(store, chrono::Duration::days(7));
        let ids: Vec<_> = source
            .fetch()
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(ids, vec!["u-1_facebook", "u-3_instagram"]);
    }

    #[tokio::test]
    async fn test_refresh_task_updates_and_flags_accounts() {
        let store = Arc::new(MemoryStore::new());
        put_as(store.as_ref(), ACCOUNTS, "u-1_facebook", &account("u-1", "facebook", Some(1)))
            .await
            .unwrap();
        let mut bad = account("u-2", "instagram", Some(1));
        bad.access_token = "bad-token".to_string();
        put_as(store.as_ref(), ACCOUNTS, "u-2_instagram", &bad).await.unwrap();
        put_as(store.as_ref(), ACCOUNTS, "u-3_twitter", &account("u-3", "twitter", Some(1)))
            .await
            .unwrap();
        let mut empty = account("u-4", "facebook", Some(1));
        empty.access_token = String::new();
        put_as(store.as_ref(), ACCOUNTS, "u-4_facebook", &empty).await.unwrap();

        let exchange = Arc::new(FakeExchange {
            calls: AtomicU32::new(0),
        });
        let task = RefreshTokensTask::new(
            store.clone(),
            exchange.clone(),
            fast_runner(),
            fast_retry(),
            chrono::Duration::days(7),
        );

        let run = task.run().await.expect("run");
        let report = &run.report;
        assert_eq!(report.total, 4);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.skipped, 1);
        assert!(report.is_consistent());

        // A 400 is permanent: one call for the bad token, none for twitter.
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);

        let refreshed: Account = get_as(store.as_ref(), ACCOUNTS, "u-1_facebook")
            .await
            .unwrap()
            .expect("account");
        assert_eq!(refreshed.access_token, "new-old-u-1");
        assert!(refreshed.last_refreshed_at.is_some());
        let copy: Option<Account> = get_as(store.as_ref(), "users/u-1/accounts", "u-1_facebook")
            .await
            .unwrap();
        assert_eq!(copy, Some(refreshed));

        let flagged: Account = get_as(store.as_ref(), ACCOUNTS, "u-2_instagram")
            .await
            .unwrap()
            .expect("account");
        assert_eq!(flagged.status, AccountStatus::RefreshFailed);
        assert!(flagged
            .last_error
            .as_deref()
            .unwrap_or_default()
            .contains("Error validating access token"));

        let twitter: Account = get_as(store.as_ref(), ACCOUNTS, "u-3_twitter")
            .await
            .unwrap()
            .expect("account");
        assert_eq!(twitter.status, AccountStatus::RefreshFailed);
    }

    /// Never answers within the item deadline.
    struct StalledExchange;

    #[async_trait]
    impl TokenExchange for StalledExchange {
        async fn exchange(
            &self,
            _platform: Platform,
            _access_token: &str,
        ) -> Result<ExchangedToken, ExternalError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Err(ExternalError::InvalidResponse("unreachable".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_refresh_flags_account() {
        let store = Arc::new(MemoryStore::new());
        put_as(store.as_ref(), ACCOUNTS, "u-1_facebook", &account("u-1", "facebook", Some(1)))
            .await
            .unwrap();

        let config = BatchRunnerConfig::new()
            .with_inter_batch_delay(Duration::ZERO)
            .with_timeout_config(TimeoutConfig::new().with_call_timeout(Duration::from_secs(5)));
        let task = RefreshTokensTask::new(
            store.clone(),
            Arc::new(StalledExchange),
            BatchRunner::new(config, "run-test"),
            fast_retry(),
            chrono::Duration::days(7),
        );

        let run = task.run().await.expect("run");
        assert_eq!(run.report.failed, 1);

        let flagged: Account = get_as(store.as_ref(), ACCOUNTS, "u-1_facebook")
            .await
            .unwrap()
            .expect("account");
        assert_eq!(flagged.status, AccountStatus::RefreshFailed);
        assert_eq!(flagged.last_error.as_deref(), Some("timed out after 5s"));
        let copy: Option<Account> = get_as(store.as_ref(), "users/u-1/accounts", "u-1_facebook")
            .await
            .unwrap();
        assert_eq!(copy, Some(flagged));
    }

    #[tokio::test]
    async fn test_task_output_carries_report() {
        let store = Arc::new(MemoryStore::new());
        let task = RefreshTokensTask::new(
            store,
            Arc::new(FakeExchange {
                calls: AtomicU32::new(0),
            }),
            fast_runner(),
            fast_retry(),
            chrono::Duration::days(7),
        );

        assert_eq!(task.name(), "refresh_tokens");
        assert_eq!(task.criticality(), Criticality::NonCritical);
        let output = task.execute().await.expect("execute");
        let report = output.report.expect("report");
        assert_eq!(report.label, TOKEN_REFRESH_LABEL);
        assert_eq!(report.total, 0);
    }
}

//! Scheduled post publishing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::batch::{BatchRun, BatchRunner, WorkItem};
use crate::error::{ExternalError, ItemError, StoreResult, TaskError};
use crate::pipeline::{Criticality, Task, TaskOutput};
use crate::retry::RetryPolicy;
use crate::store::{get_as, DocumentStore, WorkSource};
use crate::tasks::model::{user_posts, Account, AccountStatus, Platform, Post, PostStatus, ACCOUNTS, POSTS};
use crate::tasks::token_refresh::graph_error;
use crate::tasks::{load_items, write_with_copy};

/// Label used for reports and status records.
pub const PUBLISH_LABEL: &str = "publish_posts";

/// Publishes one post to one platform and returns the platform's post id.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, account: &Account, post: &Post) -> Result<String, ExternalError>;
}

/// Stand-in for platforms without an API integration: waits briefly and
/// makes up an id.
#[derive(Debug, Clone)]
pub struct SimulatedPublisher {
    platform: Platform,
    latency: Duration,
}

impl SimulatedPublisher {
    pub fn new(platform: Platform, latency: Duration) -> Self {
        Self { platform, latency }
    }
}

#[async_trait]
impl Publisher for SimulatedPublisher {
    async fn publish(&self, account: &Account, _post: &Post) -> Result<String, ExternalError> {
        tokio::time::sleep(self.latency).await;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        debug!(platform = %self.platform, user_id = %account.user_id, "simulated publish");
        Ok(format!("{}_{}", self.platform, millis))
    }
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    id: String,
}

/// Posts to a Facebook page feed through the Graph API.
#[derive(Debug, Clone)]
pub struct GraphPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl GraphPublisher {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ExternalError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Publisher for GraphPublisher {
    async fn publish(&self, account: &Account, post: &Post) -> Result<String, ExternalError> {
        let target = account.page_id.as_deref().unwrap_or("me");
        let response = self
            .client
            .post(format!("{}/{}/feed", self.base_url, target))
            .form(&[
                ("message", post.content.as_str()),
                ("access_token", account.access_token.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(graph_error(response).await);
        }

        let body: FeedResponse = response
            .json()
            .await
            .map_err(|err| ExternalError::InvalidResponse(err.to_string()))?;
        Ok(body.id)
    }
}

/// Maps each platform to the publisher that handles it.
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, platform: Platform, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.insert(platform, publisher);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn Publisher>> {
        self.publishers.get(&platform)
    }

    /// Facebook through the Graph API; Instagram, Twitter and LinkedIn
    /// simulated. TikTok has no publisher.
    pub fn standard(graph_api_base: &str, request_timeout: Duration) -> Result<Self, ExternalError> {
        let latency = Duration::from_millis(500);
        Ok(Self::new()
            .register(
                Platform::Facebook,
                Arc::new(GraphPublisher::new(graph_api_base, request_timeout)?),
            )
            .register(
                Platform::Instagram,
                Arc::new(SimulatedPublisher::new(Platform::Instagram, latency)),
            )
            .register(
                Platform::Twitter,
                Arc::new(SimulatedPublisher::new(Platform::Twitter, latency)),
            )
            .register(
                Platform::Linkedin,
                Arc::new(SimulatedPublisher::new(Platform::Linkedin, latency)),
            ))
    }
}

/// Scheduled posts whose time has come.
pub struct DuePosts {
    store: Arc<dyn DocumentStore>,
}

impl DuePosts {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WorkSource<Post> for DuePosts {
    async fn fetch(&self) -> StoreResult<Vec<WorkItem<Post>>> {
        let now = Utc::now();
        let mut items: Vec<WorkItem<Post>> = load_items(self.store.as_ref(), POSTS).await?;
        items.retain(|item| item.payload.is_due(now));
        Ok(items)
    }
}

/// Result of publishing one post everywhere it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub post_id: String,
    pub platform_post_ids: BTreeMap<String, String>,
}

/// Publishes every due post to all of its platforms.
pub struct PublishDuePostsTask {
    store: Arc<dyn DocumentStore>,
    registry: PublisherRegistry,
    runner: BatchRunner,
    retry: RetryPolicy,
    criticality: Criticality,
}

impl PublishDuePostsTask {
    pub const NAME: &'static str = "publish_due_posts";

    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: PublisherRegistry,
        runner: BatchRunner,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            runner,
            retry,
            criticality: Criticality::Critical,
        }
    }

    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    pub async fn run(&self) -> Result<BatchRun<Post, PublishedPost>, TaskError> {
        let items = DuePosts::new(Arc::clone(&self.store)).fetch().await?;
        info!(posts = items.len(), "posts due for publishing");

        let run = self
            .runner
            .run_validated(
                PUBLISH_LABEL,
                items,
                |item| item.payload.validate().map(|_| ()),
                |item| self.publish_post(item),
            )
            .await?;
        Ok(run)
    }

    async fn publish_post(&self, item: Arc<WorkItem<Post>>) -> Result<PublishedPost, ItemError> {
        let post = &item.payload;
        let platforms = post
            .validate()
            .map_err(|err| ItemError::new(err.to_string()))?;

        let mut platform_post_ids = post.platform_post_ids.clone();
        let mut errors = Vec::new();
        let mut attempts = 1;

        for platform in platforms {
            if platform_post_ids.contains_key(platform.as_str()) {
                debug!(post_id = %item.id, platform = %platform, "already published, skipping");
                continue;
            }
            match self.publish_to(platform, &item.id, post).await {
                Ok(id) => {
                    platform_post_ids.insert(platform.to_string(), id);
                }
                Err(err) => {
                    attempts = attempts.max(err.attempts);
                    errors.push(format!("{}: {}", platform, err.message));
                }
            }
        }

        let collection = user_posts(&post.user_id);
        if errors.is_empty() {
            let published = Post {
                status: PostStatus::Published,
                published_at: Some(Utc::now()),
                platform_post_ids: platform_post_ids.clone(),
                last_error: None,
                ..post.clone()
            };
            write_with_copy(self.store.as_ref(), POSTS, &collection, &item.id, &published)
                .await
                .map_err(|err| {
                    ItemError::new(format!("published but failed to save post: {}", err))
                        .with_attempts(attempts)
                })?;
            return Ok(PublishedPost {
                post_id: item.id.clone(),
                platform_post_ids,
            });
        }

        let message = errors.join("; ");
        let failed = Post {
            status: PostStatus::Failed,
            platform_post_ids,
            last_error: Some(message.clone()),
            ..post.clone()
        };
        if let Err(err) =
            write_with_copy(self.store.as_ref(), POSTS, &collection, &item.id, &failed).await
        {
            warn!(post_id = %item.id, error = %err, "failed to mark post as failed");
        }
        Err(ItemError::new(message).with_attempts(attempts))
    }

    async fn publish_to(
        &self,
        platform: Platform,
        post_id: &str,
        post: &Post,
    ) -> Result<String, ItemError> {
        let publisher = self
            .registry
            .get(platform)
            .ok_or_else(|| ItemError::new(ExternalError::Unsupported(platform.to_string()).to_string()))?;

        let account_id = Account::document_id(&post.user_id, platform);
        let account: Account = get_as(self.store.as_ref(), ACCOUNTS, &account_id)
            .await
            .map_err(|err| ItemError::new(format!("failed to load account: {}", err)))?
            .ok_or_else(|| ItemError::new(format!("no connected {} account", platform)))?;
        if account.status == AccountStatus::Disconnected {
            return Err(ItemError::new(format!("{} account is disconnected", platform)));
        }

        let publisher = publisher.as_ref();
        let account = &account;
        let label = format!("publish {} to {}", post_id, platform);
        let id = self
            .retry
            .execute_when(&label, ExternalError::is_retryable, |_ctx| {
                publisher.publish(account, post)
            })
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl Task for PublishDuePostsTask {
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

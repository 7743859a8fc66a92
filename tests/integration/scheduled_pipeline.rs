//! End-to-end run of the scheduled pipeline against a file store and a
//! mocked Graph API.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use postcron::tasks::{Account, AccountStatus, Post, PostStatus, TokenHealth};
use postcron::store::{get_as, put_as};
use postcron::tasks::model::AccountHealth;
use postcron::{app, AppConfig, DocumentStore, FileStore, PipelineStatus, StatusKind, TaskState};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(data_dir: &Path, graph_api_base: String) -> AppConfig {
    AppConfig {
        data_dir: data_dir.to_path_buf(),
        facebook_app_id: Some("app-1".to_string()),
        facebook_app_secret: Some("secret".to_string()),
        graph_api_base,
        inter_batch_delay_ms: 0,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 10,
        ..AppConfig::default()
    }
}

fn facebook_account(expires_in_days: i64) -> Account {
    Account {
        user_id: "u-1".to_string(),
        platform: "facebook".to_string(),
        access_token: "short-lived".to_string(),
        page_id: Some("page-1".to_string()),
        token_expires_at: Some(Utc::now() + Duration::days(expires_in_days)),
        status: AccountStatus::Connected,
        last_refreshed_at: None,
        last_error: None,
    }
}

fn due_post() -> Post {
    Post {
        user_id: "u-1".to_string(),
        content: "Launch day".to_string(),
        platforms: vec!["facebook".to_string()],
        status: PostStatus::Scheduled,
        scheduled_at: Some(Utc::now() - Duration::minutes(2)),
        published_at: None,
        platform_post_ids: Default::default(),
        last_error: None,
    }
}

#[tokio::test]
async fn test_scheduled_pipeline_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/page-1/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "page-1_42"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/oauth/access_token"))
        .and(query_param("fb_exchange_token", "short-lived"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "long-lived",
            "token_type": "bearer",
            "expires_in": 5184000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("temp dir");
    let store: Arc<dyn DocumentStore> =
        Arc::new(FileStore::open(temp_dir.path()).await.expect("store"));
    put_as(store.as_ref(), "accounts", "u-1_facebook", &facebook_account(2))
        .await
        .expect("seed account");
    put_as(store.as_ref(), "posts", "p-1", &due_post())
        .await
        .expect("seed post");

    let config = config(temp_dir.path(), server.uri());
    let pipeline =
        app::scheduled_pipeline(&config, Arc::clone(&store), "run-e2e").expect("pipeline");
    let report = pipeline.run().await;

    assert_eq!(report.status, PipelineStatus::Completed);
    assert!(report.failed_tasks().is_empty());
    assert!(report
        .tasks
        .iter()
        .all(|t| t.state == TaskState::Completed));

    let publish = report.task("publish_due_posts").expect("publish record");
    let publish_report = publish.report.as_ref().expect("publish report");
    assert_eq!(publish_report.succeeded, 1);

    let post: Post = get_as(store.as_ref(), "posts", "p-1")
        .await
        .expect("read")
        .expect("post");
    assert_eq!(post.status, PostStatus::Published);
    assert_eq!(post.platform_post_ids["facebook"], "page-1_42");

    let account: Account = get_as(store.as_ref(), "accounts", "u-1_facebook")
        .await
        .expect("read")
        .expect("account");
    assert_eq!(account.access_token, "long-lived");
    let copy: Option<Account> = get_as(store.as_ref(), "users/u-1/accounts", "u-1_facebook")
        .await
        .expect("read");
    assert_eq!(copy.as_ref(), Some(&account));

    // Health runs after the refresh, so it sees the new expiry.
    let health: AccountHealth = get_as(store.as_ref(), "account_health", "u-1_facebook")
        .await
        .expect("read")
        .expect("health");
    assert_eq!(health.token, TokenHealth::Healthy);

    let status = store.load_status().await.expect("status");
    assert_eq!(status.len(), 5);
    assert!(status[..4].iter().all(|r| r.kind == StatusKind::Task));
    assert_eq!(status[4].kind, StatusKind::RunComplete);
    assert_eq!(status[4].status, "success");
    assert!(status.iter().all(|r| r.run_id == "run-e2e"));
}

#[tokio::test]
async fn test_publish_store_failure_aborts_pipeline() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store: Arc<dyn DocumentStore> =
        Arc::new(FileStore::open(temp_dir.path()).await.expect("store"));
    // A file where the posts collection directory should be makes listing fail.
    std::fs::write(temp_dir.path().join("posts"), "not a directory").expect("blocker");

    let config = config(temp_dir.path(), "http://127.0.0.1:9".to_string());
    let report = app::scheduled_pipeline(&config, Arc::clone(&store), "run-abort")
        .expect("pipeline")
        .run()
        .await;

    assert!(report.is_aborted());
    assert_eq!(report.tasks[0].state, TaskState::Failed);
    assert!(report.tasks[1..]
        .iter()
        .all(|t| t.state == TaskState::Pending));

    let err = report.into_result().expect_err("aborted");
    assert!(err.to_string().contains("publish_due_posts"));

    let status = store.load_status().await.expect("status");
    assert_eq!(status.last().map(|r| r.status.as_str()), Some("aborted"));
}

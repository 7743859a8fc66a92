//! Concrete maintenance tasks run by the binaries.
//!
//! Each task fetches its work items from the store, runs them through the
//! [`BatchRunner`](crate::batch::BatchRunner) and persists the results. They
//! all implement [`Task`](crate::pipeline::Task) so they can be composed into
//! a pipeline.

pub mod health;
pub mod model;
pub mod prune;
pub mod publish;
pub mod token_refresh;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::batch::WorkItem;
use crate::error::StoreResult;
use crate::store::{put_as, DocumentStore};

pub use health::{AccountHealthTask, ConnectedAccounts};
pub use model::{Account, AccountStatus, Platform, Post, PostStatus, TokenHealth};
pub use prune::PruneStatusTask;
pub use publish::{
    DuePosts, GraphPublisher, PublishDuePostsTask, PublishedPost, Publisher, PublisherRegistry,
    SimulatedPublisher,
};
pub use token_refresh::{ExchangedToken, ExpiringAccounts, GraphTokenExchange, RefreshTokensTask, TokenExchange};

/// Load every document of `collection` as a work item.
///
/// Documents that do not deserialize into `T` are logged and left out.
pub(crate) async fn load_items<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
) -> StoreResult<Vec<WorkItem<T>>> {
    let mut items = Vec::new();
    for document in store.list(collection).await? {
        match serde_json::from_value::<T>(document.data) {
            Ok(payload) => items.push(WorkItem::new(document.id, payload)),
            Err(err) => {
                warn!(collection, id = %document.id, error = %err, "ignoring malformed document");
            }
        }
    }
    Ok(items)
}

/// Write the primary record, then its per-user copy.
///
/// The two writes are not atomic. A failed primary write is returned; a
/// failed copy is only logged, and the next run rewrites it.
pub(crate) async fn write_with_copy<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    collection: &str,
    copy_collection: &str,
    id: &str,
    document: &T,
) -> StoreResult<()> {
    put_as(store, collection, id, document).await?;
    if let Err(err) = put_as(store, copy_collection, id, document).await {
        warn!(
            collection = copy_collection,
            id,
            error = %err,
            "failed to write per-user copy"
        );
    }
    Ok(())
}

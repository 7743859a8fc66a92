use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::status::StatusRecord;
use crate::store::{validate_key, Document, DocumentStore};

const STATUS_DIR_NAME: &str = "_status";
const STATUS_FILE_NAME: &str = "status.jsonl";
const DOCUMENT_EXTENSION: &str = "json";

/// Document store backed by the local filesystem.
///
/// Documents live at `<root>/<collection>/<id>.json` and are replaced
/// atomically (temp file + rename). The status log is a JSON-lines file
/// under `<root>/_status/`.
#[derive(Debug)]
pub struct FileStore {
    root_dir: PathBuf,
    status_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root_dir`.
    pub async fn open(root_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let root_dir = root_dir.into();
        fs::create_dir_all(root_dir.join(STATUS_DIR_NAME)).await?;
        Ok(Self {
            root_dir,
            status_lock: Mutex::new(()),
        })
    }

    /// Get the store root directory path.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        collection
            .split('/')
            .fold(self.root_dir.clone(), |path, segment| path.join(segment))
    }

    fn document_path(&self, collection: &str, id: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(format!("{}.{}", id, DOCUMENT_EXTENSION))
    }

    fn status_path(&self) -> PathBuf {
        self.root_dir.join(STATUS_DIR_NAME).join(STATUS_FILE_NAME)
    }

    async fn read_status(&self) -> StoreResult<Vec<StatusRecord>> {
        let content = match fs::read_to_string(self.status_path()).await {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::Io(err)),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::InvalidPath(path.display().to_string()))?;
    let temp_path = path.with_file_name(format!("{}.tmp", file_name));

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    fs::rename(&temp_path, path).await?;

    Ok(())
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        validate_key(collection, Some(id))?;
        match fs::read_to_string(self.document_path(collection, id)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn put(&self, collection: &str, id: &str, document: &Value) -> StoreResult<()> {
        validate_key(collection, Some(id))?;
        fs::create_dir_all(self.collection_dir(collection)).await?;
        let json = serde_json::to_string_pretty(document)?;
        write_atomic(&self.document_path(collection, id), json.as_bytes()).await
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>> {
        validate_key(collection, None)?;
        let dir = self.collection_dir(collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::Io(err)),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str(&content) {
                Ok(data) => documents.push(Document {
                    id: id.to_string(),
                    data,
                }),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable document");
                }
            }
        }

        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    async fn append_status(&self, record: &StatusRecord) -> StoreResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.status_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.status_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await?;

        Ok(())
    }

    async fn load_status(&self) -> StoreResult<Vec<StatusRecord>> {
        let _guard = self.status_lock.lock().await;
        self.read_status().await
    }

    async fn prune_status(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let _guard = self.status_lock.lock().await;
        let records = self.read_status().await?;
        let before = records.len();
        let kept: Vec<_> = records
            .into_iter()
            .filter(|r| r.recorded_at >= cutoff)
            .collect();
        let pruned = before - kept.len();
        if pruned == 0 {
            return Ok(0);
        }

        let mut content = String::new();
        for record in &kept {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }
        write_atomic(&self.status_path(), content.as_bytes()).await?;

        Ok(pruned)
    }
}

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::{dual_debug, dual_error, dual_info, dual_warn, memory::types::*};

/// Backing storage for the session memory.
///
/// Implementations persist the whole [`Snapshot`] at once. There is no
/// incremental write path: every save replaces what was stored before.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Read the last saved snapshot.
    async fn load(&self) -> MemoryResult<Snapshot>;

    /// Replace the stored snapshot with `snapshot`.
    async fn save(&self, snapshot: &Snapshot) -> MemoryResult<()>;
}

/// Stores conversations and user facts as two pretty-printed JSON files.
pub struct JsonFileStore {
    conversations_path: PathBuf,
    user_data_path: PathBuf,
}

impl JsonFileStore {
    /// Create a store over the two given files
    ///
    /// # Parameters
    /// * `conversations_path` - File holding the conversation-by-user mapping
    /// * `user_data_path` - File holding the facts-by-user mapping
    ///
    /// # Description
    /// Nothing is touched on disk until [`SnapshotStore::load`] or
    /// [`SnapshotStore::save`] is called.
    pub fn new(conversations_path: impl Into<PathBuf>, user_data_path: impl Into<PathBuf>) -> Self {
        Self {
            conversations_path: conversations_path.into(),
            user_data_path: user_data_path.into(),
        }
    }

    /// Create a store with both files placed in `data_dir`
    pub fn in_dir(
        data_dir: impl AsRef<Path>,
        conversations_file: impl AsRef<Path>,
        user_data_file: impl AsRef<Path>,
    ) -> Self {
        let data_dir = data_dir.as_ref();
        Self::new(
            data_dir.join(conversations_file),
            data_dir.join(user_data_file),
        )
    }

    pub fn conversations_path(&self) -> &Path {
        &self.conversations_path
    }

    pub fn user_data_path(&self) -> &Path {
        &self.user_data_path
    }

    /// Make sure the parent directories of both files exist
    ///
    /// # Returns
    /// * `MemoryResult<()>` - `Ok(())` once the directories exist, `MemoryError::Io` otherwise
    pub async fn ensure_dirs(&self) -> MemoryResult<()> {
        for path in [&self.conversations_path, &self.user_data_path] {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| MemoryError::Io {
                        path: parent.display().to_string(),
                        source,
                    })?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    /// Read both files
    ///
    /// # Returns
    /// * `MemoryResult<Snapshot>` - Always `Ok`; see the description
    ///
    /// # Description
    /// Each file is read independently. A missing file yields an empty mapping.
    /// A file that cannot be read or parsed is logged and also yields an empty
    /// mapping, so a corrupt facts file does not discard valid conversations.
    /// Inside a readable conversations file only the malformed turns are
    /// dropped; every other user and turn is kept.
    async fn load(&self) -> MemoryResult<Snapshot> {
        let raw: serde_json::Map<String, serde_json::Value> =
            read_or_default(&self.conversations_path).await;
        let conversations = conversations_from_json(raw);
        let facts: UserFacts = read_or_default(&self.user_data_path).await;

        dual_info!(
            "Data loaded: {} conversation(s), {} user fact set(s)",
            conversations.len(),
            facts.len()
        );

        Ok(Snapshot {
            conversations,
            facts,
        })
    }

    /// Overwrite both files with the given snapshot
    ///
    /// # Parameters
    /// * `snapshot` - The full in-memory state
    ///
    /// # Returns
    /// * `MemoryResult<()>` - `Ok(())` when both files were written, the first failure otherwise
    ///
    /// # Description
    /// Files are truncated and rewritten in place, without a temporary file
    /// and rename. A crash in the middle of a write can leave a file truncated.
    async fn save(&self, snapshot: &Snapshot) -> MemoryResult<()> {
        self.ensure_dirs().await?;

        write_pretty(&self.conversations_path, &snapshot.conversations).await?;
        write_pretty(&self.user_data_path, &snapshot.facts).await?;

        dual_debug!(
            "Data saved to {} and {}",
            self.conversations_path.display(),
            self.user_data_path.display()
        );

        Ok(())
    }
}

async fn read_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            dual_debug!("{} does not exist yet, starting empty", path.display());
            return T::default();
        }
        Err(e) => {
            dual_error!("Error loading data from {}: {}", path.display(), e);
            return T::default();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            dual_error!("Error parsing data from {}: {}", path.display(), e);
            T::default()
        }
    }
}

fn conversations_from_json(raw: serde_json::Map<String, serde_json::Value>) -> ConversationStore {
    let mut conversations = ConversationStore::with_capacity(raw.len());

    for (user_id, value) in raw {
        let serde_json::Value::Array(items) = value else {
            dual_warn!("Skipping conversation of user {}: not a list of turns", user_id);
            continue;
        };

        let mut turns = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<ConversationTurn>(item) {
                Ok(turn) => turns.push(turn),
                Err(e) => dual_warn!("Skipping turn {} of user {}: {}", index, user_id, e),
            }
        }
        conversations.insert(user_id, turns);
    }

    conversations
}

async fn write_pretty<T>(path: &Path, value: &T) -> MemoryResult<()>
where
    T: Serialize,
{
    let json = serde_json::to_vec_pretty(value).map_err(|source| MemoryError::Serialization {
        path: path.display().to_string(),
        source,
    })?;

    tokio::fs::write(path, json)
        .await
        .map_err(|source| MemoryError::Io {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_load_missing_files_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path(), "conversations.json", "userData.json");

        let snapshot = store.load().await.unwrap();
        assert!(snapshot.conversations.is_empty());
        assert!(snapshot.facts.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path().join("data"), "conversations.json", "userData.json");

        let mut snapshot = Snapshot::default();
        snapshot.conversations.insert(
            "alice".to_string(),
            vec![
                ConversationTurn::user("What is a cell?"),
                ConversationTurn::assistant("The basic unit of life."),
            ],
        );
        let mut facts = FactMap::new();
        facts.insert("grade".to_string(), json!(9));
        snapshot.facts.insert("alice".to_string(), facts);

        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.conversations["alice"].len(), 2);
        assert_eq!(loaded.conversations["alice"][1].content, "The basic unit of life.");
        assert_eq!(loaded.facts["alice"]["grade"], json!(9));
    }

    #[tokio::test]
    async fn test_saved_files_are_pretty_printed() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path(), "conversations.json", "userData.json");

        let mut snapshot = Snapshot::default();
        snapshot
            .facts
            .insert("bob".to_string(), json!({"name": "Bob"}).as_object().unwrap().clone());
        store.save(&snapshot).await.unwrap();

        let raw = std::fs::read_to_string(store.user_data_path()).unwrap();
        assert!(raw.contains('\n'));
        assert!(raw.contains("  \"bob\""));

        let raw = std::fs::read_to_string(store.conversations_path()).unwrap();
        assert_eq!(raw.trim(), "{}");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_treated_as_no_data() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path(), "conversations.json", "userData.json");

        std::fs::write(store.conversations_path(), "{ not json").unwrap();
        std::fs::write(store.user_data_path(), r#"{"carol": {"likes": "biology"}}"#).unwrap();

        let snapshot = store.load().await.unwrap();
        assert!(snapshot.conversations.is_empty());
        assert_eq!(snapshot.facts["carol"]["likes"], "biology");
    }

    #[tokio::test]
    async fn test_malformed_turn_does_not_discard_other_users() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path(), "conversations.json", "userData.json");

        let raw = json!({
            "alice": [
                {"role": "user", "content": "What is DNA?", "timestamp": "2024-05-01T10:00:00.000Z"}
            ],
            "bob": [
                {"role": "user", "content": "Define entropy", "timestamp": "2024-05-01"},
                {"role": "system", "content": "unexpected role", "timestamp": "2024-05-01T10:00:00.000Z"},
                {"role": "assistant", "content": "A measure of disorder."}
            ],
            "dave": "not a list"
        });
        std::fs::write(store.conversations_path(), raw.to_string()).unwrap();

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.conversations["alice"].len(), 1);
        assert_eq!(snapshot.conversations["alice"][0].content, "What is DNA?");

        let bob = &snapshot.conversations["bob"];
        assert_eq!(bob.len(), 2);
        assert_eq!(bob[0].timestamp, "2024-05-01");
        assert_eq!(bob[1].role, TurnRole::Assistant);
        assert!(!snapshot.conversations.contains_key("dave"));

        // The next save keeps what was loaded.
        store.save(&snapshot).await.unwrap();
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.conversations_path()).unwrap()).unwrap();
        assert_eq!(saved["alice"][0]["content"], "What is DNA?");
        assert_eq!(saved["bob"][0]["timestamp"], "2024-05-01");
    }
}

use tokio::sync::RwLock;

use crate::{
    dual_debug, dual_error, dual_info,
    memory::{SnapshotStore, types::*},
};

/// Per-user conversation history and facts
///
/// Holds both mappings in memory and writes the full snapshot through the
/// injected [`SnapshotStore`] after every mutation. The in-memory copy is
/// authoritative: a failed save is logged and the process carries on with
/// the updated state.
///
/// Every mutation runs under the write lock, including the save, so two
/// requests for the same user never overwrite each other's appends.
pub struct SessionMemory {
    /// Where snapshots are read from at start and written to after each mutation
    store: Box<dyn SnapshotStore>,

    /// Live state shared by all requests
    state: RwLock<Snapshot>,
}

impl SessionMemory {
    /// Load the last snapshot from `store` and wrap it
    ///
    /// # Parameters
    /// * `store` - Backing storage
    ///
    /// # Description
    /// A failing load is logged and the memory starts empty; the process never
    /// refuses to start because of unreadable data.
    pub async fn open(store: impl SnapshotStore + 'static) -> Self {
        let snapshot = match store.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                dual_error!("Error loading data: {}", e);
                Snapshot::default()
            }
        };

        Self {
            store: Box::new(store),
            state: RwLock::new(snapshot),
        }
    }

    /// Full turn sequence for `user_id`, empty when the user is unknown
    pub async fn conversation(&self, user_id: &str) -> Vec<ConversationTurn> {
        self.state
            .read()
            .await
            .conversations
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// At most `limit` most recent turns for `user_id`, oldest first
    pub async fn recent_turns(&self, user_id: &str, limit: usize) -> Vec<ConversationTurn> {
        let state = self.state.read().await;
        match state.conversations.get(user_id) {
            Some(turns) => turns[turns.len().saturating_sub(limit)..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Fact map for `user_id`, empty when nothing was stored yet
    pub async fn facts(&self, user_id: &str) -> FactMap {
        self.state
            .read()
            .await
            .facts
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Append `turns` to the user's conversation and persist
    ///
    /// # Returns
    /// * `usize` - Number of turns the user has after the append
    pub async fn append_turns(
        &self,
        user_id: &str,
        turns: impl IntoIterator<Item = ConversationTurn>,
    ) -> usize {
        let count = self
            .mutate(|snapshot| {
                let conversation = snapshot
                    .conversations
                    .entry(user_id.to_string())
                    .or_default();
                conversation.extend(turns);
                conversation.len()
            })
            .await;

        dual_info!(
            "Conversation history for user {}: {} messages",
            user_id,
            count
        );

        count
    }

    /// Replace the user's conversation with an empty one and persist
    pub async fn clear_conversation(&self, user_id: &str) {
        self.mutate(|snapshot| {
            snapshot
                .conversations
                .insert(user_id.to_string(), Vec::new());
        })
        .await;

        dual_info!("Conversation history cleared for user {}", user_id);
    }

    /// Shallow-merge `data` into the user's facts and persist
    ///
    /// # Returns
    /// * `FactMap` - The user's facts after the merge
    ///
    /// # Description
    /// Top-level keys in `data` replace existing keys wholesale; nested
    /// objects are not merged.
    pub async fn merge_facts(&self, user_id: &str, data: FactMap) -> FactMap {
        let merged = self
            .mutate(|snapshot| {
                let facts = snapshot.facts.entry(user_id.to_string()).or_default();
                for (key, value) in data {
                    facts.insert(key, value);
                }
                facts.clone()
            })
            .await;

        dual_info!("User data stored for user: {}", user_id);

        merged
    }

    /// Apply `f` to the live snapshot, then write the whole snapshot out
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> R {
        let mut state = self.state.write().await;
        let result = f(&mut state);

        match self.store.save(&state).await {
            Ok(()) => dual_debug!("Data saved successfully"),
            Err(e) => dual_error!("Error saving data: {}", e),
        }

        result
    }
}

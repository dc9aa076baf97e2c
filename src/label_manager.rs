//! Label resolution and message labeling
use crate::client::GmailClient;
use crate::error::{BatchError, Result};
use crate::fetcher::MessageFetcher;
use crate::models::LabelInfo;
use crate::query::Query;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

/// System label removed when a message is archived
pub const INBOX_LABEL: &str = "INBOX";

/// Resolves label names to ids and applies labels to messages
///
/// One instance lives for one run. The account's label list is fetched at
/// most once, and each name is resolved at most once: concurrent callers
/// asking for the same name share a single lookup, so a missing label is
/// created exactly once. A failed resolution leaves nothing cached.
pub struct LabelManager {
    client: Arc<dyn GmailClient>,
    labels: OnceCell<Vec<LabelInfo>>,
    resolved: Mutex<HashMap<String, Arc<OnceCell<String>>>>, // lowercase name -> id
}

impl LabelManager {
    /// Creates a new LabelManager with an empty cache
    pub fn new(client: Arc<dyn GmailClient>) -> Self {
        Self {
            client,
            labels: OnceCell::new(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a label name to its id, creating the label if it does not exist
    ///
    /// Names compare case-insensitively, as Gmail does.
    pub async fn resolve_label_id(&self, name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(BatchError::LabelError("Label name cannot be empty".to_string()));
        }

        let cell = {
            let mut resolved = self.resolved.lock().await;
            Arc::clone(resolved.entry(name.to_lowercase()).or_default())
        };

        cell.get_or_try_init(|| self.lookup_or_create(name))
            .await
            .cloned()
    }

    async fn existing_labels(&self) -> Result<&Vec<LabelInfo>> {
        self.labels
            .get_or_try_init(|| async {
                let labels = self.client.list_labels().await?;
                info!("Loaded {} existing labels", labels.len());
                Ok::<_, BatchError>(labels)
            })
            .await
    }

    async fn lookup_or_create(&self, name: &str) -> Result<String> {
        let labels = self.existing_labels().await?;

        if let Some(label) = labels.iter().find(|l| l.name.eq_ignore_ascii_case(name)) {
            debug!("Label '{}' resolved to {}", name, label.id);
            return Ok(label.id.clone());
        }

        info!("Creating label '{}'", name);
        let id = self.client.create_label(name).await?;
        debug!("Created label '{}' with id {}", name, id);
        Ok(id)
    }

    /// Add (or with `remove`, take off) a label on one message
    pub async fn set_label(&self, message_id: &str, label_id: &str, remove: bool) -> Result<()> {
        let label = vec![label_id.to_string()];
        let (add, take) = if remove {
            (Vec::new(), label)
        } else {
            (label, Vec::new())
        };

        self.client
            .modify_message_labels(message_id, &add, &take)
            .await?;

        debug!(
            "{} label {} on message {}",
            if remove { "Removed" } else { "Added" },
            label_id,
            message_id
        );
        Ok(())
    }

    /// Archive a message by removing it from the inbox
    pub async fn archive(&self, message_id: &str) -> Result<()> {
        self.set_label(message_id, INBOX_LABEL, true).await
    }

    /// Add or remove `label_name` on every message matching `query`
    ///
    /// Returns the number of messages modified. Stops at the first failure.
    pub async fn label_matching(
        &self,
        fetcher: &MessageFetcher,
        query: &Query,
        label_name: &str,
        remove: bool,
        max_results: Option<u32>,
    ) -> Result<usize> {
        let label_id = self.resolve_label_id(label_name).await?;
        let ids = fetcher.list_ids(query, max_results).await?;

        if ids.is_empty() {
            info!("No messages match '{}'", query);
            return Ok(0);
        }

        let label_id = label_id.as_str();
        let modified: Vec<()> = stream::iter(ids)
            .map(|id| async move { self.set_label(&id, label_id, remove).await })
            .buffered(fetcher.concurrency())
            .try_collect()
            .await?;

        info!(
            "{} label '{}' on {} messages",
            if remove { "Removed" } else { "Applied" },
            label_name,
            modified.len()
        );
        Ok(modified.len())
    }
}

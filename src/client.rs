//! Gmail API client: the message store consumed by fetcher, labeler and engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_gmail1::api::{Label, Message, MessagePart, ModifyMessageRequest};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::error::{BatchError, Result};
use crate::models::{ContentPart, LabelInfo, RawMessage};

const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
const LABELS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.labels";

/// Largest page the Gmail list endpoint will return
const MAX_PAGE_SIZE: u32 = 500;

/// Trait defining the message store operations, so tests can swap the backend
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// List ids of messages matching a search query, newest first
    async fn list_message_ids(&self, query: &str, max_results: Option<u32>) -> Result<Vec<String>>;

    /// Get the full content of one message
    async fn get_message(&self, id: &str) -> Result<RawMessage>;

    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a new label, returning its id
    async fn create_label(&self, name: &str) -> Result<String>;

    /// Add and/or remove labels on a single message
    async fn modify_message_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()>;
}

/// Production Gmail client over `google-gmail1`
///
/// Every API call waits for a semaphore permit and is bounded by the
/// configured request timeout. There are no retries: a failed call fails
/// the owning operation.
pub struct ProductionGmailClient {
    hub: GmailHub,
    rate_limiter: Arc<Semaphore>,
    request_timeout: Duration,
}

impl ProductionGmailClient {
    /// Create a new production Gmail client
    ///
    /// # Arguments
    /// * `hub` - Gmail API hub instance
    /// * `max_concurrent` - Maximum concurrent requests
    /// * `request_timeout` - Upper bound on a single API call
    pub fn new(hub: GmailHub, max_concurrent: usize, request_timeout: Duration) -> Self {
        Self {
            hub,
            rate_limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            request_timeout,
        }
    }

    /// Run one API call under the rate limiter and the request timeout
    async fn call<R, T, F>(&self, operation: &str, api_call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<(R, T), google_gmail1::Error>>,
    {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            BatchError::ApiError(format!("Failed to acquire rate limit permit: {}", e))
        })?;

        match tokio::time::timeout(self.request_timeout, api_call).await {
            Ok(result) => result.map(|(_, body)| body).map_err(BatchError::from),
            Err(_) => {
                warn!(
                    "Gmail API {} call timed out after {:?}",
                    operation, self.request_timeout
                );
                Err(BatchError::Timeout {
                    operation: operation.to_string(),
                    seconds: self.request_timeout.as_secs(),
                })
            }
        }
    }
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_message_ids(&self, query: &str, max_results: Option<u32>) -> Result<Vec<String>> {
        let mut all_ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = match max_results {
                Some(max) => max.saturating_sub(all_ids.len() as u32),
                None => MAX_PAGE_SIZE,
            };
            if remaining == 0 {
                break;
            }

            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .q(query)
                .max_results(remaining.min(MAX_PAGE_SIZE));

            if let Some(token) = page_token.as_ref() {
                call = call.page_token(token);
            }

            let response = self
                .call("messages.list", call.add_scope(MODIFY_SCOPE).doit())
                .await?;

            all_ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|msg_ref| msg_ref.id),
            );

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        if let Some(max) = max_results {
            all_ids.truncate(max as usize);
        }

        debug!("Query '{}' matched {} messages", query, all_ids.len());
        Ok(all_ids)
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        let call = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .add_scope(MODIFY_SCOPE);

        let message = self.call("messages.get", call.doit()).await?;
        parse_raw_message(message)
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        debug!("Calling Gmail API to list labels...");
        let call = self.hub.users().labels_list("me").add_scope(LABELS_SCOPE);
        let response = self.call("labels.list", call.doit()).await?;

        let labels: Vec<LabelInfo> = response
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|label| match (label.id, label.name) {
                (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                _ => None,
            })
            .collect();

        debug!("Successfully parsed {} labels", labels.len());
        Ok(labels)
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        let label = Label {
            name: Some(name.to_string()),
            message_list_visibility: Some("show".to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            ..Default::default()
        };

        let call = self
            .hub
            .users()
            .labels_create(label, "me")
            .add_scope(LABELS_SCOPE);
        let created = self.call("labels.create", call.doit()).await?;

        created
            .id
            .ok_or_else(|| BatchError::LabelError(format!("Created label '{}' has no ID", name)))
    }

    async fn modify_message_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        let request = ModifyMessageRequest {
            add_label_ids: (!add_label_ids.is_empty()).then(|| add_label_ids.to_vec()),
            remove_label_ids: (!remove_label_ids.is_empty()).then(|| remove_label_ids.to_vec()),
        };

        let call = self
            .hub
            .users()
            .messages_modify(request, "me", message_id)
            .add_scope(MODIFY_SCOPE);
        self.call("messages.modify", call.doit()).await?;

        Ok(())
    }
}

// Shared ownership: an `Arc<dyn GmailClient>` is itself a client
#[async_trait]
impl<T: GmailClient + ?Sized> GmailClient for Arc<T> {
    async fn list_message_ids(&self, query: &str, max_results: Option<u32>) -> Result<Vec<String>> {
        self.as_ref().list_message_ids(query, max_results).await
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        self.as_ref().get_message(id).await
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.as_ref().list_labels().await
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        self.as_ref().create_label(name).await
    }

    async fn modify_message_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        self.as_ref()
            .modify_message_labels(message_id, add_label_ids, remove_label_ids)
            .await
    }
}

/// Parse a full-format Gmail API message into a [`RawMessage`]
pub(crate) fn parse_raw_message(msg: Message) -> Result<RawMessage> {
    let id = msg
        .id
        .ok_or_else(|| BatchError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let internal_date = msg.internal_date.ok_or_else(|| {
        BatchError::InvalidMessageFormat(format!("Message {} has no internal date", id))
    })?;
    let timestamp: DateTime<Utc> = DateTime::from_timestamp_millis(internal_date).ok_or_else(|| {
        BatchError::InvalidMessageFormat(format!(
            "Message {} has out-of-range internal date {}",
            id, internal_date
        ))
    })?;

    let payload = msg
        .payload
        .ok_or_else(|| BatchError::InvalidMessageFormat(format!("Message {} has no payload", id)))?;

    let subject = payload
        .headers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|h| h.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case("subject")))
        .and_then(|h| h.value.clone());

    let mut parts = Vec::new();
    for part in payload.parts.as_deref().unwrap_or_default() {
        collect_parts(part, &mut parts);
    }

    let payload_body = payload
        .body
        .and_then(|b| b.data)
        .map(|data| String::from_utf8_lossy(&data).into_owned());

    Ok(RawMessage {
        id,
        timestamp,
        subject,
        snippet: msg.snippet,
        parts,
        payload_body,
    })
}

/// Flatten nested multipart containers into their leaf parts, in order
fn collect_parts(part: &MessagePart, out: &mut Vec<ContentPart>) {
    if let Some(children) = part.parts.as_deref().filter(|c| !c.is_empty()) {
        for child in children {
            collect_parts(child, out);
        }
        return;
    }

    let data = part.body.as_ref().and_then(|b| b.data.as_deref());
    if let (Some(mime_type), Some(data)) = (part.mime_type.as_ref(), data) {
        out.push(ContentPart {
            mime_type: mime_type.clone(),
            data: String::from_utf8_lossy(data).into_owned(),
        });
    }
}

//! Message fetching: list matching ids, fetch each message, select its body

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::GmailClient;
use crate::error::Result;
use crate::models::{Message, RawMessage};
use crate::query::Query;

/// Fetches messages matching a query from the store
///
/// Messages are fetched concurrently, at most `concurrency` at a time, and
/// always come back in the order the store listed them.
pub struct MessageFetcher {
    client: Arc<dyn GmailClient>,
    concurrency: usize,
    emails_after: Option<String>,
}

impl MessageFetcher {
    pub fn new(client: Arc<dyn GmailClient>, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            emails_after: None,
        }
    }

    /// Default `after:` bound for structured filters that set neither bound
    pub fn with_emails_after(mut self, date: Option<String>) -> Self {
        self.emails_after = date.filter(|d| !d.is_empty());
        self
    }

    pub fn client(&self) -> &Arc<dyn GmailClient> {
        &self.client
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// List ids matching `query` without fetching message content
    pub async fn list_ids(&self, query: &Query, max_results: Option<u32>) -> Result<Vec<String>> {
        let (query_string, _) = self.resolve_query(query);
        self.client.list_message_ids(&query_string, max_results).await
    }

    /// Translate a query into its search string and snippet mode
    pub fn resolve_query(&self, query: &Query) -> (String, bool) {
        match query {
            Query::Raw(raw) => (raw.clone(), false),
            Query::Filter(filter) => {
                let filter = match &self.emails_after {
                    Some(date) => filter.with_default_after(date),
                    None => filter.clone(),
                };
                (filter.to_query(), filter.snippet)
            }
        }
    }

    /// Fetch every message matching `query`
    ///
    /// Zero matches yields an empty list. The first failing fetch fails the
    /// whole call.
    pub async fn fetch(&self, query: &Query, max_results: Option<u32>) -> Result<Vec<Message>> {
        self.for_each_message(query, max_results, |message| async move { Ok(message) })
            .await
    }

    /// Fetch every message matching `query` and hand each one to `handler`
    ///
    /// A message is handed over as soon as its own fetch completes. Every
    /// message is fetched and handled even after one fails; once all have
    /// settled, the first error in list order is returned. Otherwise results
    /// come back in list order.
    pub async fn for_each_message<F, Fut, T>(
        &self,
        query: &Query,
        max_results: Option<u32>,
        handler: F,
    ) -> Result<Vec<T>>
    where
        F: Fn(Message) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (query_string, snippet_mode) = self.resolve_query(query);
        debug!("Listing messages for query '{}'", query_string);

        let ids = self
            .client
            .list_message_ids(&query_string, max_results)
            .await?;

        if ids.is_empty() {
            debug!("No messages match '{}'", query_string);
            return Ok(Vec::new());
        }

        let handler = &handler;
        let settled: Vec<Result<T>> = stream::iter(ids)
            .map(|id| async move {
                let raw = self.client.get_message(&id).await?;
                let message = select_body(raw, snippet_mode);
                debug!("Fetched message {}", message.id);
                handler(message).await
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        settled.into_iter().collect()
    }
}

/// Build a [`Message`], choosing the body by precedence
///
/// Snippet mode uses the store snippet. Otherwise: first `text/plain` part,
/// first `text/html` part (markup kept), the payload's own body, and
/// finally an empty string.
pub fn select_body(raw: RawMessage, snippet_mode: bool) -> Message {
    let body = if snippet_mode {
        raw.snippet.clone()
    } else {
        raw.part("text/plain")
            .or_else(|| raw.part("text/html"))
            .map(|part| part.data.clone())
            .or_else(|| raw.payload_body.clone())
    };

    let body = body.unwrap_or_else(|| {
        warn!("Message {} has no readable body", raw.id);
        String::new()
    });

    Message {
        id: raw.id,
        timestamp: raw.timestamp,
        subject: raw.subject,
        body,
    }
}

//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use gmail_batch::auth::Session;
use gmail_batch::client::GmailClient;
use gmail_batch::error::{BatchError, Result};
use gmail_batch::models::{ContentPart, LabelInfo, RawMessage};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Create a single-part plain-text message
pub fn create_test_message(id: &str, subject: &str, body: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
        subject: Some(subject.to_string()),
        snippet: Some(format!("snippet of {}", id)),
        parts: vec![ContentPart {
            mime_type: "text/plain".to_string(),
            data: body.to_string(),
        }],
        payload_body: None,
    }
}

/// Create an html-only message
pub fn create_html_message(id: &str, html: &str) -> RawMessage {
    let mut message = create_test_message(id, "Newsletter", "");
    message.parts = vec![ContentPart {
        mime_type: "text/html".to_string(),
        data: html.to_string(),
    }];
    message
}

pub fn create_test_label_info(id: &str, name: &str) -> LabelInfo {
    LabelInfo {
        id: id.to_string(),
        name: name.to_string(),
    }
}

/// Wrap a store in a session for a fixed test principal
pub fn test_session(store: Arc<FakeGmail>) -> Session {
    Session::new("tester@example.com", store)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub message_id: String,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Default)]
struct StoreState {
    messages: BTreeMap<String, (RawMessage, BTreeSet<String>)>,
    labels: Vec<LabelInfo>,
    queries: Vec<String>,
    modifications: Vec<Modification>,
    created_labels: usize,
    failing_fetches: HashSet<String>,
    failing_modifications: bool,
}

/// In-memory message store
///
/// Understands `label:NAME` and `-label:NAME` search terms (names compare
/// case-insensitively); every other term matches all messages. Records
/// every query and label modification it receives.
#[derive(Default)]
pub struct FakeGmail {
    state: Mutex<StoreState>,
    create_delay: Option<Duration>,
}

impl FakeGmail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slow down label creation to widen concurrent-resolution windows
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn with_label(self, id: &str, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .labels
            .push(create_test_label_info(id, name));
        self
    }

    /// Add a message carrying the given label ids
    pub fn with_message(self, message: RawMessage, label_ids: &[&str]) -> Self {
        let labels = label_ids.iter().map(|l| l.to_string()).collect();
        self.state
            .lock()
            .unwrap()
            .messages
            .insert(message.id.clone(), (message, labels));
        self
    }

    pub fn fail_fetch(&self, message_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_fetches
            .insert(message_id.to_string());
    }

    pub fn fail_modifications(&self) {
        self.state.lock().unwrap().failing_modifications = true;
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn modifications(&self) -> Vec<Modification> {
        self.state.lock().unwrap().modifications.clone()
    }

    pub fn created_labels(&self) -> usize {
        self.state.lock().unwrap().created_labels
    }

    pub fn label_id(&self, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        find_label(&state.labels, name).map(|l| l.id.clone())
    }

    /// Names of the labels a message currently carries, sorted
    pub fn labels_of(&self, message_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let Some((_, ids)) = state.messages.get(message_id) else {
            return Vec::new();
        };
        let mut names: Vec<String> = ids
            .iter()
            .map(|id| {
                state
                    .labels
                    .iter()
                    .find(|l| &l.id == id)
                    .map(|l| l.name.clone())
                    .unwrap_or_else(|| id.clone())
            })
            .collect();
        names.sort();
        names
    }
}

fn find_label<'a>(labels: &'a [LabelInfo], name: &str) -> Option<&'a LabelInfo> {
    labels.iter().find(|l| l.name.eq_ignore_ascii_case(name))
}

fn matches(state: &StoreState, labels: &BTreeSet<String>, query: &str) -> bool {
    query.split_whitespace().all(|token| {
        let (negated, term) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        let Some(name) = term.strip_prefix("label:") else {
            return true;
        };
        let name = name.trim_matches('"');
        let has = find_label(&state.labels, name).is_some_and(|l| labels.contains(&l.id));
        has != negated
    })
}

#[async_trait]
impl GmailClient for FakeGmail {
    async fn list_message_ids(&self, query: &str, max_results: Option<u32>) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(query.to_string());

        let limit = max_results.map(|m| m as usize).unwrap_or(usize::MAX);
        Ok(state
            .messages
            .iter()
            .filter(|(_, (_, labels))| matches(&state, labels, query))
            .map(|(id, _)| id.clone())
            .take(limit)
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        let state = self.state.lock().unwrap();
        if state.failing_fetches.contains(id) {
            return Err(BatchError::NetworkError(format!("fetch of {} failed", id)));
        }
        state
            .messages
            .get(id)
            .map(|(message, _)| message.clone())
            .ok_or_else(|| BatchError::MessageNotFound(id.to_string()))
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Ok(self.state.lock().unwrap().labels.clone())
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if find_label(&state.labels, name).is_some() {
            return Err(BatchError::LabelError(format!(
                "Label '{}' already exists",
                name
            )));
        }
        state.created_labels += 1;
        let id = format!("Label_{}", state.created_labels);
        state.labels.push(create_test_label_info(&id, name));
        Ok(id)
    }

    async fn modify_message_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_modifications {
            return Err(BatchError::ServerError {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }

        state.modifications.push(Modification {
            message_id: message_id.to_string(),
            add: add_label_ids.to_vec(),
            remove: remove_label_ids.to_vec(),
        });

        let (_, labels) = state
            .messages
            .get_mut(message_id)
            .ok_or_else(|| BatchError::MessageNotFound(message_id.to_string()))?;
        labels.extend(add_label_ids.iter().cloned());
        for id in remove_label_ids {
            labels.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_store_label_terms() {
        let store = FakeGmail::new()
            .with_label("L1", "Receipts")
            .with_message(create_test_message("m1", "A", "a"), &["L1"])
            .with_message(create_test_message("m2", "B", "b"), &[]);

        assert_eq!(
            store.list_message_ids("label:receipts", None).await.unwrap(),
            vec!["m1"]
        );
        assert_eq!(
            store.list_message_ids("-label:Receipts", None).await.unwrap(),
            vec!["m2"]
        );
        assert_eq!(
            store.list_message_ids("from:x -label:Missing", Some(1)).await.unwrap(),
            vec!["m1"]
        );
    }
}

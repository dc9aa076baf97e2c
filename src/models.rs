use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message handed to a processing function
///
/// Built fresh for every fetch and dropped once its process completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub subject: Option<String>,
    pub body: String,
}

/// One decoded content part of a stored message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPart {
    pub mime_type: String,
    pub data: String,
}

/// A message as returned by the store, before body selection
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    /// Leaf parts in document order, multipart containers flattened
    pub parts: Vec<ContentPart>,
    /// Body attached directly to the payload (single-part messages)
    pub payload_body: Option<String>,
}

impl RawMessage {
    /// First part with the given MIME type, compared case-insensitively
    pub fn part(&self, mime_type: &str) -> Option<&ContentPart> {
        self.parts
            .iter()
            .find(|p| p.mime_type.eq_ignore_ascii_case(mime_type))
    }
}

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_lookup_is_case_insensitive() {
        let raw = RawMessage {
            id: "1".to_string(),
            timestamp: Utc::now(),
            subject: None,
            snippet: None,
            parts: vec![
                ContentPart {
                    mime_type: "Text/HTML".to_string(),
                    data: "<p>hi</p>".to_string(),
                },
                ContentPart {
                    mime_type: "text/plain".to_string(),
                    data: "hi".to_string(),
                },
            ],
            payload_body: None,
        };

        assert_eq!(raw.part("text/html").map(|p| p.data.as_str()), Some("<p>hi</p>"));
        assert_eq!(raw.part("TEXT/PLAIN").map(|p| p.data.as_str()), Some("hi"));
        assert!(raw.part("image/png").is_none());
    }

    #[test]
    fn test_message_serialization() {
        let message = Message {
            id: "123".to_string(),
            timestamp: Utc::now(),
            subject: Some("Your receipt".to_string()),
            body: "Total $9.99".to_string(),
        };

        let json = serde_json::to_string(&message).unwrap();
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(message, deserialized);
    }
}

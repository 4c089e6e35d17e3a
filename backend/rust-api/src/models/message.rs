use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::user::bson_datetime_as_chrono;

/// Chat log entry stored in MongoDB "messages" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub article_id: ObjectId,
    pub user_id: ObjectId,
    pub role: MessageRole,
    pub content: String,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(article_id: ObjectId, user_id: ObjectId, role: MessageRole, content: String) -> Self {
        Self {
            id: None,
            article_id,
            user_id,
            role,
            content,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageResponse {
    pub id: String,
    pub article_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<ChatMessage> for ChatMessageResponse {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.id.map(|id| id.to_hex()).unwrap_or_default(),
            article_id: message.article_id.to_hex(),
            role: message.role,
            content: message.content,
            created_at: message.created_at,
        }
    }
}

/// One prior turn sent by the client with a chat request
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub article_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub chat_history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetadata {
    pub tokens_used: u32,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub message: String,
    pub metadata: ChatMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_accepts_missing_history() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"articleId": "abc", "message": "What is the method?"}"#).unwrap();
        assert_eq!(request.article_id.as_deref(), Some("abc"));
        assert!(request.chat_history.is_empty());

        let with_history: ChatRequest = serde_json::from_str(
            r#"{"articleId": "abc", "message": "and?", "chatHistory": [{"role": "assistant", "content": "Hi"}]}"#,
        )
        .unwrap();
        assert_eq!(with_history.chat_history[0].role, MessageRole::Assistant);
    }
}

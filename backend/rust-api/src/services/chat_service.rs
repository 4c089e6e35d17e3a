use std::sync::Arc;

use crate::metrics::CHAT_MESSAGES_TOTAL;
use crate::models::article::Article;
use crate::models::message::{
    ChatMessage, ChatMetadata, ChatRequest, ChatResponse, HistoryEntry, MessageRole,
};
use crate::services::collections::{ARTICLES, MESSAGES};
use crate::services::errors::{parse_object_id, ServiceError};
use crate::services::llm::{
    generate_with_retry, GenerationConfig, LlmClient, LlmRequest, LlmTurn,
};
use crate::utils::text::truncate_chars;
use anyhow::{Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::Database;

pub const CHAT_TEXT_LIMIT: usize = 50_000;
pub const HISTORY_TURNS: usize = 10;
const LLM_RETRIES: usize = 1;

pub struct ChatService {
    mongo: Database,
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl ChatService {
    pub fn new(mongo: Database, llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            mongo,
            llm,
            model: model.into(),
        }
    }

    /// Answers a question about one article, grounded in its text.
    pub async fn chat(&self, user_id: ObjectId, req: ChatRequest) -> Result<ChatResponse> {
        let (Some(raw_article_id), Some(message)) = (
            req.article_id.as_deref().filter(|id| !id.trim().is_empty()),
            req.message.as_deref().filter(|m| !m.trim().is_empty()),
        ) else {
            return Err(ServiceError::BadRequest("Missing articleId or message".to_string()).into());
        };

        let article_id = parse_object_id(raw_article_id, "Article")?;
        let article = self
            .mongo
            .collection::<Article>(ARTICLES)
            .find_one(doc! { "_id": article_id })
            .await
            .context("Failed to query article")?
            .ok_or_else(|| ServiceError::NotFound("Article not found".to_string()))?;

        let request = build_chat_request(&self.model, &article, &req.chat_history, message);
        let response = match generate_with_retry(self.llm.as_ref(), request, LLM_RETRIES, "chat").await {
            Ok(response) => response,
            Err(e) => {
                CHAT_MESSAGES_TOTAL.with_label_values(&["error"]).inc();
                return Err(e.into());
            }
        };
        CHAT_MESSAGES_TOTAL.with_label_values(&["success"]).inc();

        let turns = [
            ChatMessage::new(article_id, user_id, MessageRole::User, message.to_string()),
            ChatMessage::new(article_id, user_id, MessageRole::Assistant, response.text.clone()),
        ];
        if let Err(e) = self
            .mongo
            .collection::<ChatMessage>(MESSAGES)
            .insert_many(turns)
            .await
        {
            tracing::warn!(article_id = %article_id.to_hex(), "Failed to persist chat turn: {}", e);
        }

        tracing::info!(
            article_id = %article_id.to_hex(),
            user_id = %user_id.to_hex(),
            question_chars = message.chars().count(),
            reply_chars = response.text.chars().count(),
            "Chat reply generated"
        );

        Ok(ChatResponse {
            success: true,
            message: response.text,
            metadata: ChatMetadata {
                tokens_used: response.total_tokens,
                model: response.model,
                timestamp: Utc::now(),
            },
        })
    }

    /// Caller's chat log for an article, oldest first
    pub async fn history(&self, user_id: &ObjectId, article_id: &ObjectId) -> Result<Vec<ChatMessage>> {
        self.mongo
            .collection::<ChatMessage>(MESSAGES)
            .find(doc! { "user_id": user_id, "article_id": article_id })
            .sort(doc! { "created_at": 1 })
            .await
            .context("Failed to query chat history")?
            .try_collect()
            .await
            .context("Failed to read chat history")
    }

    pub async fn clear_history(&self, user_id: &ObjectId, article_id: &ObjectId) -> Result<u64> {
        let result = self
            .mongo
            .collection::<ChatMessage>(MESSAGES)
            .delete_many(doc! { "user_id": user_id, "article_id": article_id })
            .await
            .context("Failed to clear chat history")?;
        Ok(result.deleted_count)
    }
}

pub(crate) fn system_instruction(article: &Article) -> String {
    let joined = |list: &[String], fallback: &str| {
        if list.is_empty() {
            fallback.to_string()
        } else {
            list.join(", ")
        }
    };
    let full_text = article
        .full_text
        .as_deref()
        .filter(|text| !text.is_empty())
        .map(|text| truncate_chars(text, CHAT_TEXT_LIMIT))
        .unwrap_or("No full text available");

    format!(
        r#"You are an expert academic reading assistant helping university students deeply understand research articles.

## STRICT CONSTRAINTS
- Answer ONLY from the provided article text.
- Do not supplement with knowledge from outside the article.
- If information isn't in the article, say: "This specific information is not covered in the article".
- Never invent data, citations or details.
- Explain concepts; don't quiz the student.
- Questions unrelated to the article get: "This question is outside the scope of this article".

## ARTICLE CONTEXT
Title: {title}
Authors: {authors}
Abstract: {abstract_text}
Keywords: {keywords}
Main Topics: {topics}

## FULL ARTICLE TEXT (YOUR ONLY SOURCE)
{full_text}

## RESPONSE FRAMEWORK
1. Start with a clear, direct answer.
2. Support it with evidence: quote relevant passages and reference specific sections.
3. Explain technical terms in simpler language and use **bold** for key concepts.
4. Connect the answer to the article's main argument.

Keep answers between 150 and 400 words, use bullet points or numbered steps where they help, and stay professional yet friendly."#,
        title = article.title,
        authors = joined(&article.authors, "Unknown"),
        abstract_text = article.abstract_or("No abstract available"),
        keywords = joined(&article.keywords, "Not specified"),
        topics = joined(&article.main_topics, "Not analyzed"),
    )
}

pub(crate) fn build_chat_request(
    model: &str,
    article: &Article,
    history: &[HistoryEntry],
    message: &str,
) -> LlmRequest {
    let recent = &history[history.len().saturating_sub(HISTORY_TURNS)..];
    let mut contents: Vec<LlmTurn> = recent
        .iter()
        .map(|entry| match entry.role {
            MessageRole::Assistant => LlmTurn::model(entry.content.clone()),
            MessageRole::User => LlmTurn::user(entry.content.clone()),
        })
        .collect();

    let prompt = if contents.is_empty() {
        format!(
            "First Question from Student: {message}\n\n(Remember: Base your answer solely on the article.)"
        )
    } else {
        message.to_string()
    };
    contents.push(LlmTurn::user(prompt));

    LlmRequest {
        model: model.to_string(),
        system_instruction: Some(system_instruction(article)),
        contents,
        generation_config: Some(GenerationConfig {
            temperature: Some(0.4),
            top_p: Some(0.9),
            top_k: Some(40),
            max_output_tokens: Some(2048),
            candidate_count: Some(1),
        }),
        block_harmful_content: true,
    }
}

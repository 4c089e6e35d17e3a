use std::sync::Arc;

use crate::metrics::ARTICLE_ANALYSES_TOTAL;
use crate::models::article::{Article, ArticleAnalysis};
use crate::services::collections::ARTICLES;
use crate::services::errors::ServiceError;
use crate::services::llm::{generate_with_retry, LlmClient, LlmRequest};
use crate::utils::text::{extract_json_object, strip_code_fences, truncate_chars};
use anyhow::{Context, Result};
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::Database;

pub const ANALYSIS_TEXT_LIMIT: usize = 50_000;
const LLM_RETRIES: usize = 1;

pub struct AnalysisService {
    mongo: Database,
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl AnalysisService {
    pub fn new(mongo: Database, llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            mongo,
            llm,
            model: model.into(),
        }
    }

    /// Extracts bibliographic metadata with the LLM and marks the article analysed.
    pub async fn analyze(&self, article_id: &ObjectId) -> Result<ArticleAnalysis> {
        let articles = self.mongo.collection::<Article>(ARTICLES);
        let article = articles
            .find_one(doc! { "_id": article_id })
            .await
            .context("Failed to query article")?
            .ok_or_else(|| ServiceError::NotFound("Article not found".to_string()))?;

        let full_text = article
            .full_text
            .as_deref()
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ServiceError::BadRequest("No text to analyze".to_string()))?;

        let request = LlmRequest::prompt(&self.model, analysis_prompt(full_text));
        let response = match generate_with_retry(self.llm.as_ref(), request, LLM_RETRIES, "analyze").await {
            Ok(response) => response,
            Err(e) => {
                ARTICLE_ANALYSES_TOTAL.with_label_values(&["error"]).inc();
                return Err(e.into());
            }
        };

        let analysis = parse_analysis(&response.text, &article.title);

        articles
            .update_one(
                doc! { "_id": article_id },
                doc! { "$set": {
                    "title": analysis.title.as_deref().unwrap_or(&article.title),
                    "authors": analysis.authors.clone(),
                    "abstract": analysis.abstract_text.as_deref(),
                    "keywords": analysis.keywords.clone(),
                    "publication_year": analysis.publication_year,
                    "main_topics": analysis.main_topics.clone(),
                    "analysis_completed": true,
                }},
            )
            .await
            .context("Failed to save analysis")?;

        ARTICLE_ANALYSES_TOTAL.with_label_values(&["success"]).inc();
        tracing::info!(
            article_id = %article_id.to_hex(),
            keywords = analysis.keywords.len(),
            topics = analysis.main_topics.len(),
            "Article analysis completed"
        );

        Ok(analysis)
    }
}

pub(crate) fn analysis_prompt(full_text: &str) -> String {
    format!(
        r#"Analyze the following academic article and extract key information in JSON format.

Article Text:
{text}

Please provide a JSON response with the following structure (ONLY JSON, no markdown):
{{
  "title": "Extracted or corrected article title",
  "authors": ["Author 1", "Author 2"],
  "abstract": "Article abstract or summary",
  "keywords": ["keyword1", "keyword2", "keyword3"],
  "publication_year": 2024,
  "main_topics": ["topic1", "topic2", "topic3"]
}}

If you cannot extract certain information, use null for that field.
"#,
        text = truncate_chars(full_text, ANALYSIS_TEXT_LIMIT)
    )
}

/// Unparseable replies keep the current title and leave everything else empty.
pub(crate) fn parse_analysis(reply: &str, current_title: &str) -> ArticleAnalysis {
    let cleaned = strip_code_fences(reply);
    let parsed = serde_json::from_str::<ArticleAnalysis>(&cleaned).or_else(|e| {
        extract_json_object(&cleaned)
            .ok_or(e)
            .and_then(|json| serde_json::from_str::<ArticleAnalysis>(json))
    });

    let mut analysis = match parsed {
        Ok(analysis) => analysis,
        Err(e) => {
            tracing::warn!("Failed to parse analysis reply: {}", e);
            ArticleAnalysis::default()
        }
    };

    if !analysis.title.as_deref().is_some_and(|t| !t.trim().is_empty()) {
        analysis.title = Some(current_title.to_string());
    }
    analysis
}

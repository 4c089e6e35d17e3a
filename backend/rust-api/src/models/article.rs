use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::user::bson_datetime_as_chrono;

/// Uploaded article stored in MongoDB "articles" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub main_topics: Vec<String>,
    #[serde(default)]
    pub pages: i32,
    #[serde(default)]
    pub publication_year: Option<i32>,
    #[serde(default)]
    pub analysis_completed: bool,
    /// Object key of the original PDF
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub uploaded_at: DateTime<Utc>,
}

impl Article {
    pub fn id_hex(&self) -> String {
        self.id.map(|id| id.to_hex()).unwrap_or_default()
    }

    pub fn authors_line(&self) -> String {
        if self.authors.is_empty() {
            "Unknown".to_string()
        } else {
            self.authors.join(", ")
        }
    }

    pub fn topics_line(&self) -> String {
        if self.main_topics.is_empty() {
            "Not available".to_string()
        } else {
            self.main_topics.join(", ")
        }
    }

    pub fn abstract_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.abstract_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(fallback)
    }
}

/// Article as returned by the API. Full text is only included on the detail view.
#[derive(Debug, Clone, Serialize)]
pub struct ArticleResponse {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    pub keywords: Vec<String>,
    pub main_topics: Vec<String>,
    pub pages: i32,
    pub publication_year: Option<i32>,
    pub analysis_completed: bool,
    pub created_at: DateTime<Utc>,
    pub uploaded_at: DateTime<Utc>,
}

impl ArticleResponse {
    pub fn summary(article: Article) -> Self {
        let mut response = Self::from(article);
        response.full_text = None;
        response
    }
}

impl From<Article> for ArticleResponse {
    fn from(article: Article) -> Self {
        ArticleResponse {
            id: article.id_hex(),
            user_id: article.user_id.to_hex(),
            title: article.title,
            authors: article.authors,
            abstract_text: article.abstract_text,
            full_text: article.full_text,
            keywords: article.keywords,
            main_topics: article.main_topics,
            pages: article.pages,
            publication_year: article.publication_year,
            analysis_completed: article.analysis_completed,
            created_at: article.created_at,
            uploaded_at: article.uploaded_at,
        }
    }
}

/// Article row with uploader details for the instructor view
#[derive(Debug, Serialize)]
pub struct ArticleWithUploader {
    #[serde(flatten)]
    pub article: ArticleResponse,
    pub uploader_name: Option<String>,
    pub uploader_email: Option<String>,
}

/// Structured metadata extracted by the analysis prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArticleAnalysis {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub authors: Vec<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub keywords: Vec<String>,
    #[serde(default, deserialize_with = "lenient_year")]
    pub publication_year: Option<i32>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub main_topics: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<Vec<String>> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

// Models sometimes quote the year
fn lenient_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub article_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListArticlesQuery {
    pub limit: Option<i64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub first: String,
    pub second: String,
}

/// Topic and keyword overlap between two articles
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArticleComparison {
    pub similarity_score: u32,
    pub similarity_label: &'static str,
    pub shared_topics: Vec<String>,
    pub unique_topics1: Vec<String>,
    pub unique_topics2: Vec<String>,
    pub shared_keywords: Vec<String>,
    pub unique_keywords1: Vec<String>,
    pub unique_keywords2: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ComparisonResponse {
    pub first: ArticleResponse,
    pub second: ArticleResponse,
    pub comparison: ArticleComparison,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_tolerates_nulls_and_missing_fields() {
        let raw = r#"{"title": "Deep Nets", "authors": null, "abstract": null,
                      "publication_year": 2021, "main_topics": ["vision"]}"#;
        let analysis: ArticleAnalysis = serde_json::from_str(raw).unwrap();
        assert_eq!(analysis.title.as_deref(), Some("Deep Nets"));
        assert!(analysis.authors.is_empty());
        assert!(analysis.keywords.is_empty());
        assert_eq!(analysis.publication_year, Some(2021));
        assert_eq!(analysis.main_topics, vec!["vision".to_string()]);

        let quoted: ArticleAnalysis = serde_json::from_str(r#"{"publication_year": "2019"}"#).unwrap();
        assert_eq!(quoted.publication_year, Some(2019));
    }
}

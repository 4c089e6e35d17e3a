use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::socratic::FinalFeedback;
use super::user::bson_datetime_as_chrono;

/// One completed Socratic session, stored in MongoDB "student_progress" collection.
/// List fields hold JSON text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProgressRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub article_id: ObjectId,
    pub session_id: ObjectId,
    #[serde(default)]
    pub final_average_score: Option<f64>,
    #[serde(default)]
    pub question_scores: String,
    #[serde(default)]
    pub difficulty_path: String,
    #[serde(default)]
    pub comprehension_score: Option<i32>,
    #[serde(default)]
    pub critical_thinking_score: Option<i32>,
    #[serde(default)]
    pub quality_score: Option<i32>,
    #[serde(default)]
    pub strengths: String,
    #[serde(default)]
    pub weaknesses: String,
    #[serde(default)]
    pub recommendations: String,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

fn to_json_text<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

/// Malformed or missing JSON text reads as an empty list.
pub fn parse_json_list<T: DeserializeOwned>(raw: &str) -> Vec<T> {
    serde_json::from_str(raw).unwrap_or_default()
}

impl StudentProgressRecord {
    pub fn from_feedback(
        user_id: ObjectId,
        article_id: ObjectId,
        session_id: ObjectId,
        feedback: &FinalFeedback,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            user_id,
            article_id,
            session_id,
            final_average_score: Some(feedback.average_score),
            question_scores: to_json_text(&feedback.scores),
            difficulty_path: to_json_text(&feedback.difficulty_path),
            comprehension_score: Some(feedback.comprehension_score),
            critical_thinking_score: Some(feedback.critical_thinking_score),
            quality_score: Some(feedback.quality_score),
            strengths: to_json_text(&feedback.strengths),
            weaknesses: to_json_text(&feedback.weaknesses),
            recommendations: to_json_text(&feedback.recommendations),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Progress row with its JSON lists parsed
#[derive(Debug, Clone, Serialize)]
pub struct StudentProgress {
    pub id: String,
    pub user_id: String,
    pub article_id: String,
    pub session_id: String,
    pub final_average_score: Option<f64>,
    pub question_scores: Vec<f64>,
    pub difficulty_path: Vec<i32>,
    pub comprehension_score: Option<i32>,
    pub critical_thinking_score: Option<i32>,
    pub quality_score: Option<i32>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<StudentProgressRecord> for StudentProgress {
    fn from(record: StudentProgressRecord) -> Self {
        Self {
            id: record.id.map(|id| id.to_hex()).unwrap_or_default(),
            user_id: record.user_id.to_hex(),
            article_id: record.article_id.to_hex(),
            session_id: record.session_id.to_hex(),
            final_average_score: record.final_average_score,
            question_scores: parse_json_list(&record.question_scores),
            difficulty_path: parse_json_list(&record.difficulty_path),
            comprehension_score: record.comprehension_score,
            critical_thinking_score: record.critical_thinking_score,
            quality_score: record.quality_score,
            strengths: parse_json_list(&record.strengths),
            weaknesses: parse_json_list(&record.weaknesses),
            recommendations: parse_json_list(&record.recommendations),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Progress row joined with the article it was taken on
#[derive(Debug, Clone, Serialize)]
pub struct ProgressWithArticle {
    #[serde(flatten)]
    pub progress: StudentProgress,
    pub article_title: Option<String>,
    pub article_authors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::socratic::{FinalEvaluation, ScoreSummary};

    #[test]
    fn malformed_json_reads_as_empty() {
        assert!(parse_json_list::<f64>("not json").is_empty());
        assert!(parse_json_list::<String>("").is_empty());
        assert!(parse_json_list::<String>("{\"a\":1}").is_empty());
        assert_eq!(parse_json_list::<i32>("[1,2,3]"), vec![1, 2, 3]);
    }

    #[test]
    fn record_round_trips_lists_through_json_text() {
        let feedback = FinalFeedback::new(ScoreSummary::from_records(&[]), FinalEvaluation::fallback());
        let record = StudentProgressRecord::from_feedback(
            ObjectId::new(),
            ObjectId::new(),
            ObjectId::new(),
            &feedback,
        );
        assert_eq!(record.question_scores, "[0.0,0.0,0.0,0.0,0.0]");

        let parsed = StudentProgress::from(record);
        assert_eq!(parsed.difficulty_path, vec![0; 5]);
        assert_eq!(parsed.strengths, vec!["Completed the Socratic flow".to_string()]);
        assert_eq!(parsed.comprehension_score, Some(70));
    }
}

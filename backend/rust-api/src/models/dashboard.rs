use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::article::ArticleResponse;
use super::progress::StudentProgress;
use super::user::UserProfile;

const BUCKET_WIDTH: f64 = 20.0;
const BUCKET_COUNT: usize = 5;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructorStats {
    pub total_students: u64,
    pub total_articles: u64,
    pub completed_sessions: u64,
    pub average_score: i64,
}

#[derive(Debug, Serialize)]
pub struct StudentSummary {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "totalSessions")]
    pub total_sessions: u64,
    #[serde(rename = "averageScore")]
    pub average_score: i64,
}

#[derive(Debug, Serialize)]
pub struct ScorePoint {
    pub date: DateTime<Utc>,
    pub score: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ScoreBucket {
    pub range: String,
    pub count: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct ScoreDistribution {
    pub scores: Vec<f64>,
    pub buckets: Vec<ScoreBucket>,
}

impl ScoreDistribution {
    /// Groups final averages into 20-point buckets; 100 lands in the top one.
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let mut counts = [0u64; BUCKET_COUNT];
        for score in scores.iter().filter(|s| s.is_finite()) {
            let index = (score.clamp(0.0, 100.0) / BUCKET_WIDTH) as usize;
            counts[index.min(BUCKET_COUNT - 1)] += 1;
        }
        let buckets = counts
            .iter()
            .enumerate()
            .map(|(i, count)| {
                let low = i as u32 * BUCKET_WIDTH as u32;
                ScoreBucket {
                    range: format!("{}-{}", low, low + BUCKET_WIDTH as u32),
                    count: *count,
                }
            })
            .collect();
        Self { scores, buckets }
    }
}

#[derive(Debug, Serialize)]
pub struct TopStudent {
    pub user_id: String,
    pub full_name: Option<String>,
    pub final_average_score: f64,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsData {
    pub progress_over_time: Vec<ScorePoint>,
    pub score_distribution: ScoreDistribution,
    pub top_students: Vec<TopStudent>,
}

/// Everything the student profile page shows
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub user: UserProfile,
    pub articles: Vec<ArticleResponse>,
    pub progress_records: Vec<StudentProgress>,
    pub total_messages: u64,
    pub total_socratic_questions: i64,
    pub messages_per_article: BTreeMap<String, u64>,
    pub socratic_questions_per_article: BTreeMap<String, i64>,
}

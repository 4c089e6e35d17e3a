use std::collections::HashMap;

use crate::models::article::{Article, ArticleResponse, ArticleWithUploader};
use crate::models::dashboard::{
    AnalyticsData, InstructorStats, ScoreDistribution, ScorePoint, StudentSummary, TopStudent,
};
use crate::models::progress::StudentProgressRecord;
use crate::models::socratic::SocraticSession;
use crate::models::user::{User, UserRole};
use crate::services::collections::{ARTICLES, SOCRATIC_SESSIONS, STUDENT_PROGRESS, USERS};
use crate::services::errors::ServiceError;
use anyhow::{Context, Result};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::Database;

const TOP_STUDENTS: i64 = 5;

/// Per-student session count and mean final score
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct SessionTotals {
    sessions: u64,
    average: f64,
}

fn bson_number(value: Option<&Bson>) -> f64 {
    match value {
        Some(Bson::Double(v)) => *v,
        Some(Bson::Int32(v)) => f64::from(*v),
        Some(Bson::Int64(v)) => *v as f64,
        _ => 0.0,
    }
}

fn session_totals(row: &Document) -> Option<(ObjectId, SessionTotals)> {
    let user_id = row.get_object_id("_id").ok()?;
    let sessions = bson_number(row.get("sessions")).max(0.0) as u64;
    let average = bson_number(row.get("average"));
    Some((user_id, SessionTotals { sessions, average }))
}

/// Mean of the positive scores, rounded; 0 when there are none.
pub(crate) fn mean_of_positive(scores: &[f64]) -> i64 {
    let positive: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite() && *s > 0.0).collect();
    if positive.is_empty() {
        0
    } else {
        (positive.iter().sum::<f64>() / positive.len() as f64).round() as i64
    }
}

pub struct InstructorService {
    mongo: Database,
}

impl InstructorService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    async fn progress_scores(&self) -> Result<Vec<StudentProgressRecord>> {
        self.mongo
            .collection::<StudentProgressRecord>(STUDENT_PROGRESS)
            .find(doc! {})
            .sort(doc! { "created_at": 1 })
            .await
            .context("Failed to query student progress")?
            .try_collect()
            .await
            .context("Failed to read student progress")
    }

    pub async fn stats(&self) -> Result<InstructorStats> {
        let total_students = self
            .mongo
            .collection::<User>(USERS)
            .count_documents(doc! { "role": UserRole::Student.as_str() })
            .await
            .context("Failed to count students")?;
        let total_articles = self
            .mongo
            .collection::<Article>(ARTICLES)
            .count_documents(doc! {})
            .await
            .context("Failed to count articles")?;
        let completed_sessions = self
            .mongo
            .collection::<SocraticSession>(SOCRATIC_SESSIONS)
            .count_documents(doc! { "is_completed": true })
            .await
            .context("Failed to count completed sessions")?;

        let scores: Vec<f64> = self
            .progress_scores()
            .await?
            .into_iter()
            .filter_map(|p| p.final_average_score)
            .collect();

        Ok(InstructorStats {
            total_students,
            total_articles,
            completed_sessions,
            average_score: mean_of_positive(&scores),
        })
    }

    /// Students newest first, with session totals from their progress rows
    pub async fn students(&self) -> Result<Vec<StudentSummary>> {
        let pipeline = vec![doc! {
            "$group": {
                "_id": "$user_id",
                "sessions": { "$sum": 1 },
                "average": { "$avg": { "$ifNull": ["$final_average_score", 0] } },
            }
        }];
        let totals: HashMap<ObjectId, SessionTotals> = self
            .mongo
            .collection::<StudentProgressRecord>(STUDENT_PROGRESS)
            .aggregate(pipeline)
            .await
            .context("Failed to aggregate student progress")?
            .try_collect::<Vec<Document>>()
            .await
            .context("Failed to read progress totals")?
            .iter()
            .filter_map(session_totals)
            .collect();

        let students: Vec<User> = self
            .mongo
            .collection::<User>(USERS)
            .find(doc! { "role": UserRole::Student.as_str() })
            .sort(doc! { "createdAt": -1 })
            .await
            .context("Failed to query students")?
            .try_collect()
            .await
            .context("Failed to read students")?;

        Ok(students
            .into_iter()
            .filter_map(|user| {
                let id = user.id?;
                let totals = totals.get(&id).copied().unwrap_or_default();
                Some(StudentSummary {
                    id: id.to_hex(),
                    email: user.email,
                    full_name: user.full_name,
                    created_at: user.created_at,
                    total_sessions: totals.sessions,
                    average_score: if totals.sessions > 0 {
                        totals.average.round() as i64
                    } else {
                        0
                    },
                })
            })
            .collect())
    }

    pub async fn student(&self, student_id: &ObjectId) -> Result<User> {
        self.mongo
            .collection::<User>(USERS)
            .find_one(doc! { "_id": student_id, "role": UserRole::Student.as_str() })
            .await
            .context("Failed to query student")?
            .ok_or_else(|| ServiceError::NotFound("Student not found".to_string()).into())
    }

    /// Every article with the uploader's name and email, newest upload first
    pub async fn articles(&self) -> Result<Vec<ArticleWithUploader>> {
        let articles: Vec<Article> = self
            .mongo
            .collection::<Article>(ARTICLES)
            .find(doc! {})
            .sort(doc! { "uploaded_at": -1 })
            .await
            .context("Failed to query articles")?
            .try_collect()
            .await
            .context("Failed to read articles")?;

        let users = self.users_by_id(articles.iter().map(|a| a.user_id).collect()).await?;

        Ok(articles
            .into_iter()
            .map(|article| {
                let uploader = users.get(&article.user_id);
                ArticleWithUploader {
                    uploader_name: uploader.map(|u| u.full_name.clone()),
                    uploader_email: uploader.map(|u| u.email.clone()),
                    article: ArticleResponse::summary(article),
                }
            })
            .collect())
    }

    pub async fn analytics(&self) -> Result<AnalyticsData> {
        let progress = self.progress_scores().await?;

        let progress_over_time = progress
            .iter()
            .filter_map(|p| {
                p.final_average_score
                    .filter(|s| s.is_finite())
                    .map(|score| ScorePoint {
                        date: p.created_at,
                        score,
                    })
            })
            .collect();

        let score_distribution = ScoreDistribution::from_scores(
            progress
                .iter()
                .filter_map(|p| p.final_average_score)
                .filter(|s| s.is_finite())
                .collect(),
        );

        let top: Vec<StudentProgressRecord> = self
            .mongo
            .collection::<StudentProgressRecord>(STUDENT_PROGRESS)
            .find(doc! { "final_average_score": { "$ne": Bson::Null } })
            .sort(doc! { "final_average_score": -1 })
            .limit(TOP_STUDENTS)
            .await
            .context("Failed to query top students")?
            .try_collect()
            .await
            .context("Failed to read top students")?;
        let users = self.users_by_id(top.iter().map(|p| p.user_id).collect()).await?;

        let top_students = top
            .into_iter()
            .map(|p| TopStudent {
                user_id: p.user_id.to_hex(),
                full_name: users.get(&p.user_id).map(|u| u.full_name.clone()),
                final_average_score: p.final_average_score.unwrap_or_default(),
            })
            .collect();

        Ok(AnalyticsData {
            progress_over_time,
            score_distribution,
            top_students,
        })
    }

    async fn users_by_id(&self, ids: Vec<ObjectId>) -> Result<HashMap<ObjectId, User>> {
        let users: Vec<User> = self
            .mongo
            .collection::<User>(USERS)
            .find(doc! { "_id": { "$in": ids } })
            .await
            .context("Failed to query users")?
            .try_collect()
            .await
            .context("Failed to read users")?;

        Ok(users
            .into_iter()
            .filter_map(|user| user.id.map(|id| (id, user)))
            .collect())
    }
}

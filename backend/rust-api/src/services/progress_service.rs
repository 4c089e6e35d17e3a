use std::collections::HashMap;

use crate::models::article::Article;
use crate::models::progress::{ProgressWithArticle, StudentProgress, StudentProgressRecord};
use crate::services::collections::{ARTICLES, STUDENT_PROGRESS};
use anyhow::{Context, Result};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::Database;

pub struct ProgressService {
    mongo: Database,
}

impl ProgressService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    async fn find(&self, filter: Document) -> Result<Vec<StudentProgress>> {
        let records: Vec<StudentProgressRecord> = self
            .mongo
            .collection::<StudentProgressRecord>(STUDENT_PROGRESS)
            .find(filter)
            .sort(doc! { "created_at": -1 })
            .await
            .context("Failed to query student progress")?
            .try_collect()
            .await
            .context("Failed to read student progress")?;

        Ok(records.into_iter().map(StudentProgress::from).collect())
    }

    /// Caller's completed sessions on one article, newest first
    pub async fn for_article(&self, user_id: &ObjectId, article_id: &ObjectId) -> Result<Vec<StudentProgress>> {
        self.find(doc! { "user_id": user_id, "article_id": article_id }).await
    }

    pub async fn for_user(&self, user_id: &ObjectId) -> Result<Vec<StudentProgress>> {
        self.find(doc! { "user_id": user_id }).await
    }

    /// Progress rows joined with article title and authors
    pub async fn for_user_with_articles(&self, user_id: &ObjectId) -> Result<Vec<ProgressWithArticle>> {
        let progress = self.for_user(user_id).await?;

        let article_ids: Vec<ObjectId> = progress
            .iter()
            .filter_map(|p| ObjectId::parse_str(&p.article_id).ok())
            .collect();
        let articles: HashMap<String, Article> = self
            .mongo
            .collection::<Article>(ARTICLES)
            .find(doc! { "_id": { "$in": article_ids } })
            .await
            .context("Failed to query progress articles")?
            .try_collect::<Vec<Article>>()
            .await
            .context("Failed to read progress articles")?
            .into_iter()
            .map(|article| (article.id_hex(), article))
            .collect();

        Ok(progress
            .into_iter()
            .map(|progress| {
                let article = articles.get(&progress.article_id);
                ProgressWithArticle {
                    article_title: article.map(|a| a.title.clone()),
                    article_authors: article.map(|a| a.authors.clone()).unwrap_or_default(),
                    progress,
                }
            })
            .collect())
    }
}

use crate::metrics::{self, ARTICLES_UPLOADED_TOTAL};
use crate::models::article::Article;
use crate::models::message::ChatMessage;
use crate::models::progress::StudentProgressRecord;
use crate::models::socratic::SocraticSession;
use crate::services::collections::{ARTICLES, MESSAGES, SOCRATIC_SESSIONS, STUDENT_PROGRESS};
use crate::services::errors::ServiceError;
use crate::services::object_storage::ObjectStorageClient;
use crate::services::pdf_text::ExtractedPdf;
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::{Collection, Database};

pub const DEFAULT_PAGE_SIZE: i64 = 6;
const MAX_PAGE_SIZE: i64 = 100;

/// Who is asking for a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteScope {
    OwnerOnly,
    Any,
}

pub struct ArticleService {
    mongo: Database,
}

impl ArticleService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn articles(&self) -> Collection<Article> {
        self.mongo.collection::<Article>(ARTICLES)
    }

    /// Stores the PDF blob (when storage is configured) and inserts the article row.
    pub async fn create_from_upload(
        &self,
        user_id: ObjectId,
        title: &str,
        filename: &str,
        bytes: Vec<u8>,
        extracted: ExtractedPdf,
        storage: Option<&ObjectStorageClient>,
    ) -> Result<Article> {
        let now = Utc::now();

        let storage_path = match storage {
            Some(storage) => {
                let key = ObjectStorageClient::build_article_key(&user_id.to_hex(), filename, now);
                retry_async_with_config(RetryConfig::default(), || {
                    storage.upload_bytes(&key, bytes.clone(), "application/pdf")
                })
                .await
                .context("Failed to upload PDF to object storage")?;
                Some(key)
            }
            None => None,
        };

        let mut article = Article {
            id: None,
            user_id,
            title: title.trim().to_string(),
            authors: Vec::new(),
            abstract_text: None,
            full_text: Some(extracted.text),
            keywords: Vec::new(),
            main_topics: Vec::new(),
            pages: extracted.pages,
            publication_year: None,
            analysis_completed: false,
            storage_path,
            created_at: now,
            uploaded_at: now,
        };

        let inserted = metrics::track_db_operation("insert_one", ARTICLES, async {
            self.articles()
                .insert_one(&article)
                .await
                .context("Failed to insert article")
        })
        .await?;

        article.id = Some(
            inserted
                .inserted_id
                .as_object_id()
                .ok_or_else(|| anyhow!("Failed to get inserted article ID"))?,
        );
        ARTICLES_UPLOADED_TOTAL.inc();

        tracing::info!(
            article_id = %article.id_hex(),
            user_id = %user_id.to_hex(),
            pages = article.pages,
            "Article uploaded"
        );

        Ok(article)
    }

    /// Library page, newest upload first
    pub async fn list(&self, limit: Option<i64>, offset: Option<u64>) -> Result<Vec<Article>> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        self.articles()
            .find(doc! {})
            .sort(doc! { "uploaded_at": -1 })
            .skip(offset.unwrap_or(0))
            .limit(limit)
            .await
            .context("Failed to query articles")?
            .try_collect()
            .await
            .context("Failed to read articles")
    }

    pub async fn count(&self) -> Result<u64> {
        self.articles()
            .count_documents(doc! {})
            .await
            .context("Failed to count articles")
    }

    pub async fn list_for_user(&self, user_id: &ObjectId) -> Result<Vec<Article>> {
        self.articles()
            .find(doc! { "user_id": user_id })
            .sort(doc! { "uploaded_at": -1 })
            .await
            .context("Failed to query user articles")?
            .try_collect()
            .await
            .context("Failed to read user articles")
    }

    pub async fn get(&self, article_id: &ObjectId) -> Result<Article> {
        self.articles()
            .find_one(doc! { "_id": article_id })
            .await
            .context("Failed to query article")?
            .ok_or_else(|| ServiceError::NotFound("Article not found".to_string()).into())
    }

    /// Deletes the article with its chat log, sessions, progress rows and PDF blob.
    pub async fn delete(
        &self,
        article_id: &ObjectId,
        requester: &ObjectId,
        scope: DeleteScope,
        storage: Option<&ObjectStorageClient>,
    ) -> Result<()> {
        let article = self.get(article_id).await?;
        if scope == DeleteScope::OwnerOnly && article.user_id != *requester {
            return Err(ServiceError::Forbidden("You can only delete your own articles".to_string()).into());
        }

        let by_article = doc! { "article_id": article_id };
        self.mongo
            .collection::<ChatMessage>(MESSAGES)
            .delete_many(by_article.clone())
            .await
            .context("Failed to delete article messages")?;
        self.mongo
            .collection::<SocraticSession>(SOCRATIC_SESSIONS)
            .delete_many(by_article.clone())
            .await
            .context("Failed to delete article sessions")?;
        self.mongo
            .collection::<StudentProgressRecord>(STUDENT_PROGRESS)
            .delete_many(by_article)
            .await
            .context("Failed to delete article progress")?;

        metrics::track_db_operation("delete_one", ARTICLES, async {
            self.articles()
                .delete_one(doc! { "_id": article_id })
                .await
                .context("Failed to delete article")
        })
        .await?;

        if let (Some(storage), Some(key)) = (storage, article.storage_path.as_deref()) {
            if let Err(e) = storage.delete_object(key).await {
                tracing::warn!(article_id = %article_id.to_hex(), "Failed to delete PDF blob: {:#}", e);
            }
        }

        tracing::info!(
            article_id = %article_id.to_hex(),
            requester = %requester.to_hex(),
            ?scope,
            "Article deleted"
        );
        Ok(())
    }
}

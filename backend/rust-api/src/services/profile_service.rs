use std::collections::BTreeMap;

use crate::models::article::ArticleResponse;
use crate::models::dashboard::ProfileData;
use crate::models::message::ChatMessage;
use crate::models::refresh_token::RefreshToken;
use crate::models::socratic::SocraticSession;
use crate::models::user::{User, UserProfile};
use crate::services::article_service::ArticleService;
use crate::services::collections::{MESSAGES, REFRESH_TOKENS, SOCRATIC_SESSIONS, USERS};
use crate::services::errors::ServiceError;
use crate::services::progress_service::ProgressService;
use crate::utils::time::now_bson;
use anyhow::{Context, Result};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::Database;

/// Folds `{_id: article_id, total: n}` group rows into a map keyed by hex id.
fn per_article_totals(rows: &[Document]) -> BTreeMap<String, i64> {
    rows.iter()
        .filter_map(|row| {
            let article_id = row.get_object_id("_id").ok()?;
            let total = match row.get("total") {
                Some(Bson::Int32(v)) => i64::from(*v),
                Some(Bson::Int64(v)) => *v,
                Some(Bson::Double(v)) => *v as i64,
                _ => 0,
            };
            Some((article_id.to_hex(), total))
        })
        .collect()
}

pub struct ProfileService {
    mongo: Database,
}

impl ProfileService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    async fn user(&self, user_id: &ObjectId) -> Result<User> {
        self.mongo
            .collection::<User>(USERS)
            .find_one(doc! { "_id": user_id })
            .await
            .context("Failed to query user")?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()).into())
    }

    async fn group_by_article<T: Send + Sync>(
        &self,
        collection: &str,
        user_id: &ObjectId,
        total: Bson,
    ) -> Result<BTreeMap<String, i64>> {
        let pipeline = vec![
            doc! { "$match": { "user_id": user_id } },
            doc! { "$group": { "_id": "$article_id", "total": { "$sum": total } } },
        ];
        let rows: Vec<Document> = self
            .mongo
            .collection::<T>(collection)
            .aggregate(pipeline)
            .await
            .with_context(|| format!("Failed to aggregate {}", collection))?
            .try_collect()
            .await
            .with_context(|| format!("Failed to read {} totals", collection))?;
        Ok(per_article_totals(&rows))
    }

    /// Everything the profile page shows for the caller
    pub async fn profile(&self, user_id: &ObjectId) -> Result<ProfileData> {
        let user = self.user(user_id).await?;

        let articles = ArticleService::new(self.mongo.clone())
            .list_for_user(user_id)
            .await?
            .into_iter()
            .map(ArticleResponse::summary)
            .collect();
        let progress_records = ProgressService::new(self.mongo.clone())
            .for_user(user_id)
            .await?;

        let messages_per_article: BTreeMap<String, u64> = self
            .group_by_article::<ChatMessage>(MESSAGES, user_id, Bson::Int32(1))
            .await?
            .into_iter()
            .map(|(article, total)| (article, total.max(0) as u64))
            .collect();
        let socratic_questions_per_article = self
            .group_by_article::<SocraticSession>(
                SOCRATIC_SESSIONS,
                user_id,
                Bson::String("$questions_asked_count".to_string()),
            )
            .await?;

        Ok(ProfileData {
            user: UserProfile::from(user),
            articles,
            progress_records,
            total_messages: messages_per_article.values().sum(),
            total_socratic_questions: socratic_questions_per_article.values().sum(),
            messages_per_article,
            socratic_questions_per_article,
        })
    }

    pub async fn update_full_name(&self, user_id: &ObjectId, full_name: &str) -> Result<UserProfile> {
        let result = self
            .mongo
            .collection::<User>(USERS)
            .update_one(
                doc! { "_id": user_id },
                doc! { "$set": { "full_name": full_name.trim(), "updatedAt": now_bson() } },
            )
            .await
            .context("Failed to update profile")?;
        if result.matched_count == 0 {
            return Err(ServiceError::NotFound("User not found".to_string()).into());
        }

        tracing::info!(user_id = %user_id.to_hex(), "Profile updated");
        Ok(UserProfile::from(self.user(user_id).await?))
    }

    /// Removes the account and every refresh token issued to it.
    pub async fn delete_account(&self, user_id: &ObjectId) -> Result<()> {
        let deleted = self
            .mongo
            .collection::<User>(USERS)
            .delete_one(doc! { "_id": user_id })
            .await
            .context("Failed to delete user")?;
        if deleted.deleted_count == 0 {
            return Err(ServiceError::NotFound("User not found".to_string()).into());
        }

        let tokens = self
            .mongo
            .collection::<RefreshToken>(REFRESH_TOKENS)
            .delete_many(doc! { "userId": user_id })
            .await
            .context("Failed to delete refresh tokens")?;

        tracing::info!(
            user_id = %user_id.to_hex(),
            revoked_tokens = tokens.deleted_count,
            "Account deleted"
        );
        Ok(())
    }
}

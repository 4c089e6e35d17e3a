use axum::{
    extract::{FromRequest, Request},
    Json,
};

use crate::handlers::error::ApiError;

/// JSON body extractor whose rejections use the API error envelope
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                tracing::warn!("Rejected JSON body: {}", rejection);
                Err(ApiError::new(rejection.status(), "Invalid JSON body")
                    .with_field("details", rejection.body_text()))
            }
        }
    }
}

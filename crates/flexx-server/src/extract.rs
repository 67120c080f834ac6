use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use flexx::{errors::FieldError, models::chat::ChatRequest};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Bodies that carry constraints beyond what deserialization checks
pub trait Validate {
    fn validate(&self) -> Result<(), Vec<FieldError>>;
}

impl Validate for ChatRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        ChatRequest::validate(self)
    }
}

/// JSON extractor that rejects schema and constraint violations with a 422
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate().map_err(ApiError::Validation)?;
        Ok(ValidatedJson(value))
    }
}

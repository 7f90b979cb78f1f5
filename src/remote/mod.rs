// src/remote/mod.rs

pub mod http;

use async_trait::async_trait;

use crate::{
    error::AppError,
    models::{
        attempt::{SubmitAnswersRequest, SubmitReceipt, TimerStatus},
        question::Question,
    },
};

pub use http::HttpAttemptApi;

/// The remote attempt system the engine loads from and submits to.
///
/// Every call carries the candidate's bearer token. `submit` is not
/// idempotent on the server side; callers must guard against duplicates.
#[async_trait]
pub trait AttemptApi: Send + Sync {
    async fn fetch_timer(&self, token: &str, attempt_id: &str) -> Result<TimerStatus, AppError>;

    async fn fetch_questions(&self, token: &str) -> Result<Vec<Question>, AppError>;

    async fn submit(
        &self,
        token: &str,
        attempt_id: &str,
        request: &SubmitAnswersRequest,
    ) -> Result<SubmitReceipt, AppError>;
}

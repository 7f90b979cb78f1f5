// src/remote/http.rs

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    error::AppError,
    models::{
        attempt::{AttemptStatus, SubmitAnswersRequest, SubmitReceipt, TimerStatus},
        question::Question,
    },
    remote::AttemptApi,
};

/// Envelope used by the portal API for read endpoints.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteTimer {
    /// Older portal builds omit the status; such attempts are still running.
    #[serde(default)]
    status: Option<AttemptStatus>,
    remaining_time: i64,
}

/// Question as the portal serializes it.
#[derive(Debug, Deserialize)]
struct RemoteQuestion {
    #[serde(rename = "_id")]
    id: String,
    question: String,
    options: Vec<String>,
}

impl From<RemoteQuestion> for Question {
    fn from(q: RemoteQuestion) -> Self {
        Question {
            id: q.id,
            prompt: q.question,
            options: q.options,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RemoteMessage {
    message: Option<String>,
}

/// `AttemptApi` over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpAttemptApi {
    client: Client,
    base_url: Url,
}

impl HttpAttemptApi {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Appends path segments to the base URL, tolerating a trailing slash.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AppError::InternalServerError(format!(
                    "Remote base URL cannot carry a path: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Decodes a successful body, or turns a non-2xx status into `AppError::Upstream`
/// carrying the server's message when it sent one.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let message = response
        .json::<RemoteMessage>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| format!("Remote attempt system responded with {}", status));

    tracing::warn!("Remote call failed with {}: {}", status, message);
    Err(AppError::Upstream(message))
}

#[async_trait]
impl AttemptApi for HttpAttemptApi {
    async fn fetch_timer(&self, token: &str, attempt_id: &str) -> Result<TimerStatus, AppError> {
        let url = self.endpoint(&[
            "v1", "website", "attempt", "candidate", attempt_id, "timer",
        ])?;

        let response = self.client.get(url).bearer_auth(token).send().await?;
        let envelope: DataEnvelope<RemoteTimer> = decode(response).await?;

        Ok(TimerStatus {
            status: envelope.data.status.unwrap_or(AttemptStatus::Active),
            remaining_seconds: envelope.data.remaining_time,
        })
    }

    async fn fetch_questions(&self, token: &str) -> Result<Vec<Question>, AppError> {
        let url = self.endpoint(&[
            "v1",
            "website",
            "question",
            "candidate",
            "getCandidateQuestions",
        ])?;

        let response = self.client.get(url).bearer_auth(token).send().await?;
        let envelope: DataEnvelope<Vec<RemoteQuestion>> = decode(response).await?;

        Ok(envelope.data.into_iter().map(Question::from).collect())
    }

    async fn submit(
        &self,
        token: &str,
        attempt_id: &str,
        request: &SubmitAnswersRequest,
    ) -> Result<SubmitReceipt, AppError> {
        let url = self.endpoint(&[
            "v1", "website", "attempt", "candidate", attempt_id, "submit",
        ])?;

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let body: RemoteMessage = decode(response).await?;
        let message = body
            .message
            .ok_or_else(|| AppError::Upstream("Submission was not confirmed".to_string()))?;

        Ok(SubmitReceipt { message })
    }
}

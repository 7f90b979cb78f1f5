// src/handlers/session.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    engine::{
        SessionRegistry,
        registry::{StartOutcome, StartRequest},
    },
    error::AppError,
    models::{
        question::SelectAnswerRequest,
        session::{
            Destination, EntryState, ExitRequest, FinalizeReason, FinalizeResponse, SignalRequest,
            StartResponse,
        },
    },
    utils::jwt::{BearerToken, Claims},
};

const MAX_ATTEMPT_ID_LEN: usize = 128;

fn check_attempt_id(attempt_id: &str) -> Result<(), AppError> {
    if attempt_id.is_empty() || attempt_id.len() > MAX_ATTEMPT_ID_LEN {
        return Err(AppError::BadRequest("Invalid attempt id".to_string()));
    }
    Ok(())
}

/// Loads the attempt and starts (or resumes) its session.
///
/// * Already submitted or expired attempts resolve to a redirect, nothing starts.
/// * A remote failure returns 502 and nothing starts.
/// * Returns 201 for a new session, 200 otherwise.
pub async fn start_session(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Extension(BearerToken(token)): Extension<BearerToken>,
    Path(attempt_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    check_attempt_id(&attempt_id)?;

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let outcome = sessions
        .start(StartRequest {
            attempt_id,
            owner: claims.sub,
            token,
            user_agent,
        })
        .await?;

    let (status, handle) = match outcome {
        StartOutcome::Started(handle) => (StatusCode::CREATED, handle),
        StartOutcome::Resumed(handle) => (StatusCode::OK, handle),
        StartOutcome::Terminal(entry) => {
            let destination = match entry {
                EntryState::AlreadySubmitted => Destination::AlreadySubmitted,
                _ => Destination::Dashboard,
            };
            let body = StartResponse {
                entry,
                session: None,
                questions: Vec::new(),
                request_fullscreen: false,
                destination: Some(destination),
            };
            return Ok((StatusCode::OK, Json(body)));
        }
    };

    let body = StartResponse {
        entry: EntryState::Active,
        session: Some(handle.view().await?),
        questions: handle.questions().to_vec(),
        request_fullscreen: true,
        destination: None,
    };
    Ok((status, Json(body)))
}

/// Returns the current countdown, banner, prompt and submit state.
pub async fn get_session(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let handle = sessions.get(&attempt_id, &claims.sub).await?;
    Ok(Json(handle.view().await?))
}

/// Classifies one browser signal.
pub async fn report_signal(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<SignalRequest>,
) -> Result<impl IntoResponse, AppError> {
    let handle = sessions.get(&attempt_id, &claims.sub).await?;
    let verdict = handle.signal(payload.kind, payload.visibility).await?;
    Ok(Json(verdict))
}

/// Selects (or changes) the answer of one question.
pub async fn select_answer(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<SelectAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let handle = sessions.get(&attempt_id, &claims.sub).await?;
    handle
        .select_answer(&payload.question_id, &payload.option)
        .await?;
    Ok(Json(handle.view().await?))
}

/// Manual submit. Returns 202 whether or not this call won the guard.
pub async fn submit_session(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let handle = sessions.get(&attempt_id, &claims.sub).await?;
    let accepted = handle.finalize(FinalizeReason::Manual).await?;
    let session = handle.view().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(FinalizeResponse { accepted, session }),
    ))
}

/// Answers the exit prompt. Confirming submits the assessment.
pub async fn resolve_exit(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<ExitRequest>,
) -> Result<impl IntoResponse, AppError> {
    let handle = sessions.get(&attempt_id, &claims.sub).await?;
    let accepted = handle.resolve_exit(payload.confirm).await?;
    let session = handle.view().await?;
    Ok(Json(FinalizeResponse { accepted, session }))
}

/// Returns the audit journal of the session.
pub async fn get_audit_log(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let handle = sessions.get(&attempt_id, &claims.sub).await?;
    Ok(Json(handle.audit_log().await?))
}

/// Tears the session down without submitting.
pub async fn close_session(
    State(sessions): State<SessionRegistry>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let view = sessions.close(&attempt_id, &claims.sub).await?;
    tracing::info!("Session {} closed by candidate", attempt_id);
    Ok(Json(view))
}

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use subtle::ConstantTimeEq;
use tracing::{debug, error, warn};

use quickpoll_core::{QuestionId, QuestionView};

use crate::problem::ProblemResponse;
use crate::recorder::VoteRequest;
use crate::router::AppState;

const HEADER_ADMIN_TOKEN: &str = "admin-token";

#[derive(Debug, Deserialize)]
struct VotePayload {
    id: QuestionId,
    email: String,
    usn: String,
    option: String,
    #[serde(default)]
    year: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionPayload {
    question: String,
    options: Vec<String>,
}

pub async fn latest(State(state): State<AppState>) -> Result<Json<QuestionView>, ProblemResponse> {
    state.polls().latest().map(Json).ok_or_else(|| {
        ProblemResponse::new(
            StatusCode::NOT_FOUND,
            "no_active_question",
            "no question has been published yet",
        )
    })
}

pub async fn vote(State(state): State<AppState>, body: Bytes) -> Result<Response, ProblemResponse> {
    let payload: VotePayload = parse_json(&body)?;
    let request = VoteRequest {
        question_id: payload.id,
        email: payload.email,
        usn: payload.usn,
        option: payload.option,
        year: payload.year,
    };

    let polls = state.polls().clone();
    let receipt = run_blocking(move || polls.record_vote(request)).await??;
    debug!(
        stage = "vote",
        question_id = receipt.question_id,
        fingerprint = %receipt.fingerprint,
        persisted = receipt.persisted,
        "vote response sent"
    );
    Ok(success())
}

pub async fn create_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    authorize_admin(state.admin_token(), &headers)?;
    let payload: QuestionPayload = parse_json(&body)?;

    let polls = state.polls().clone();
    let receipt =
        run_blocking(move || polls.create_question(payload.question, payload.options)).await??;
    debug!(
        stage = "admin",
        question_id = receipt.id,
        persisted = receipt.persisted,
        "question response sent"
    );
    Ok(success())
}

fn success() -> Response {
    (StatusCode::OK, "Success").into_response()
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ProblemResponse> {
    serde_json::from_slice(body).map_err(|err| {
        let problem_type = if err.is_data() {
            "invalid_payload"
        } else {
            "invalid_json"
        };
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            problem_type,
            format!("failed to parse payload: {err}"),
        )
    })
}

/// Poll operations touch the snapshot file, so they run off the async workers.
async fn run_blocking<T, F>(task: F) -> Result<T, ProblemResponse>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|err| {
        error!(stage = "app", error = %err, "poll task failed");
        ProblemResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "the request could not be completed",
        )
    })
}

/// Checks the admin token when one is configured.
///
/// Accepts either `Authorization: Bearer <token>` or `Admin-Token: <token>`.
fn authorize_admin(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ProblemResponse> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .or_else(|| {
            headers
                .get(HEADER_ADMIN_TOKEN)
                .and_then(|value| value.to_str().ok())
        })
        .map(str::trim);

    match provided {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => Ok(()),
        Some(_) => {
            warn!(stage = "admin", "rejected admin request with wrong token");
            Err(ProblemResponse::new(
                StatusCode::UNAUTHORIZED,
                "invalid_admin_token",
                "admin token does not match",
            ))
        }
        None => Err(ProblemResponse::new(
            StatusCode::UNAUTHORIZED,
            "missing_admin_token",
            "admin token required",
        )),
    }
}

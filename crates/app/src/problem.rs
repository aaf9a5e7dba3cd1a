use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use quickpoll_core::{QuestionError, VoteError};

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

/// `application/problem+json` error response.
#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[cfg(test)]
    pub fn problem_type(&self) -> &'static str {
        self.body.problem_type
    }
}

impl From<VoteError> for ProblemResponse {
    fn from(err: VoteError) -> Self {
        let (status, problem_type) = match err {
            VoteError::InvalidIdentity => (StatusCode::UNAUTHORIZED, "invalid_identity"),
            VoteError::QuestionNotFound(_) => (StatusCode::NOT_FOUND, "question_not_found"),
            VoteError::DuplicateIdentity => (StatusCode::CONFLICT, "duplicate_identity"),
            VoteError::UnknownOption(_) => (StatusCode::BAD_REQUEST, "unknown_option"),
        };
        Self::new(status, problem_type, err.to_string())
    }
}

impl From<QuestionError> for ProblemResponse {
    fn from(err: QuestionError) -> Self {
        let (status, problem_type) = match err {
            QuestionError::EmptyText | QuestionError::NoOptions => {
                (StatusCode::BAD_REQUEST, "invalid_question")
            }
            QuestionError::IdsExhausted => (StatusCode::SERVICE_UNAVAILABLE, "ids_exhausted"),
        };
        Self::new(status, problem_type, err.to_string())
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

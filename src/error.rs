use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Data file {} is not a valid store: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why a completion request did not produce text.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Errors surfaced by the web handlers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No student is logged in")]
    NotLoggedIn,

    #[error("Student not found: {0}")]
    StudentNotFound(String),

    #[error("Story not found: {0}")]
    StoryNotFound(String),

    #[error("Invalid form: {0}")]
    InvalidForm(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Template error: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// Title and message of an error response, rendered into the error
/// template by the router's response layer.
#[derive(Debug, Clone)]
pub struct ErrorPage {
    pub title: &'static str,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotLoggedIn => Redirect::to("/").into_response(),
            AppError::StudentNotFound(name) => {
                tracing::warn!(student = %name, "session refers to a missing student");
                page(
                    StatusCode::NOT_FOUND,
                    "Session expired",
                    "Your student record could not be found. Please log in again.",
                )
            }
            AppError::StoryNotFound(story_id) => {
                tracing::warn!(story_id = %story_id, "no such story");
                page(
                    StatusCode::NOT_FOUND,
                    "Story not found",
                    "That story does not exist.",
                )
            }
            AppError::InvalidForm(reason) => {
                page(StatusCode::BAD_REQUEST, "Invalid request", &reason)
            }
            AppError::Store(err) => {
                tracing::error!(error = %err, "store failure");
                page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong",
                    "The student data could not be read or written.",
                )
            }
            AppError::Render(err) => {
                tracing::error!(error = %err, "template failure");
                page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong",
                    "The page could not be displayed.",
                )
            }
        }
    }
}

/// Plain-text response tagged with the page to render in its place.
fn page(status: StatusCode, title: &'static str, message: &str) -> Response {
    let mut response = (status, format!("{}: {}", title, message)).into_response();
    response.extensions_mut().insert(ErrorPage {
        title,
        message: message.to_string(),
    });
    response
}

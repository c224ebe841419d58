//! Error types for command runner operations

use crate::auth::REALM;
use actix_web::http::{StatusCode, header};
use actix_web::{HttpResponse, ResponseError};
use std::io;
use thiserror::Error;

/// Result type for command runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while running or tracking commands
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{program} failed to start: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Command process creation is rate limited")]
    RateLimited,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl ResponseError for RunnerError {
    fn status_code(&self) -> StatusCode {
        match self {
            RunnerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RunnerError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut resp = HttpResponse::build(self.status_code());
        if let RunnerError::Unauthorized = self {
            resp.insert_header((
                header::WWW_AUTHENTICATE,
                format!("Basic realm=\"{}\"", REALM),
            ));
        }
        resp.content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}

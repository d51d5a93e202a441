use actix_web::{
    error::ResponseError,
    http::StatusCode,
    HttpResponse,
};
use serde::Serialize;
use thiserror::Error;
use log;

use crate::notify::NotifyError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Notification channel error: {0}")]
    Notify(#[from] NotifyError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = self.to_string();

        if status_code.is_server_error() {
            log::error!("Admin API error: {:?}", self);
        } else {
            log::warn!("Admin API error: {:?}", self);
        }

        HttpResponse::build(status_code).json(ErrorResponse {
            error: error_message,
            status: status_code.as_u16(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Notify(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

mod execute;
mod generate;

pub use execute::*;
pub use generate::*;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ErrorResponse {
    fn new(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::info!("Rejected malformed request body: {err}");
    let response = HttpResponse::BadRequest().json(ErrorResponse::new("Invalid request body"));
    InternalError::from_response(err, response).into()
}

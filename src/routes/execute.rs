use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};

use super::ErrorResponse;
use crate::engine::ExecutionEngine;
use crate::sandbox::{EngineError, ExecutionOutcome};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default, alias = "language")]
    pub language_key: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub stdout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub exit_status: i32,
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_output: bool,
    pub language_key: String,
}

impl From<ExecutionOutcome> for ExecuteResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        let no_output = !outcome.produced_output();
        Self {
            stdout: outcome.stdout.unwrap_or_default(),
            stderr: outcome.stderr,
            error: outcome.error,
            exit_status: outcome.exit_status,
            timed_out: outcome.timed_out,
            no_output,
            language_key: outcome.language_key,
        }
    }
}

#[post("/execute")]
pub async fn post_execute_handler(
    engine: web::Data<ExecutionEngine>,
    body: web::Json<ExecuteRequest>,
) -> impl Responder {
    let ExecuteRequest { code, language_key } = body.into_inner();

    match engine.execute(code, language_key.as_deref()).await {
        Ok(outcome) => {
            log::info!(
                "Execution finished: language={} exit={} timed_out={}",
                outcome.language_key,
                outcome.exit_status,
                outcome.timed_out
            );
            HttpResponse::Ok().json(ExecuteResponse::from(outcome))
        }
        Err(e @ EngineError::Validation(_)) => {
            log::info!("Rejected execution request: {e}");
            HttpResponse::BadRequest().json(ErrorResponse::new(e))
        }
        Err(e) => {
            log::error!("Execution failed: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse::new(e))
        }
    }
}

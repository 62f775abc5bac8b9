use actix_web::http::StatusCode;
use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};

use super::ErrorResponse;
use crate::generate::GenerateClient;

#[derive(Deserialize, Debug)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GenerateResponse {
    pub result: String,
}

#[post("/generate")]
pub async fn post_generate_handler(
    client: web::Data<GenerateClient>,
    body: web::Json<GenerateRequest>,
) -> impl Responder {
    match client.generate(&body.prompt).await {
        Ok(result) => {
            log::info!("Generated {} bytes of code", result.len());
            HttpResponse::Ok().json(GenerateResponse { result })
        }
        Err(e) => {
            let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
            if status.is_server_error() {
                log::error!("Code generation failed: {e}");
            } else {
                log::info!("Code generation rejected with {status}: {e}");
            }
            HttpResponse::build(status).json(ErrorResponse::new(e))
        }
    }
}

//! The unified `{success:false, errorCode, errorMessage}` envelope
//! (§4.6/§7): every domain error kind renders as HTTP 200 with a
//! machine-readable `errorCode`, never a non-2xx status, so players
//! that only branch on the JSON body still work.

use actix_web::{HttpResponse, ResponseError};
use danmaku_core::GatewayError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub GatewayError);

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    #[serde(rename = "errorCode")]
    error_code: i32,
    #[serde(rename = "errorMessage")]
    error_message: String,
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::Ok().json(ErrorEnvelope {
            success: false,
            error_code: self.0.error_code(),
            error_message: self.0.to_string(),
        })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;

    #[actix_web::test]
    async fn input_invalid_renders_code_1001() {
        let err = ApiError(GatewayError::InputInvalid("bad".into()));
        let resp = err.error_response();
        assert_eq!(resp.status(), actix_web::http::StatusCode::OK);
        let body = resp.into_body().try_into_bytes().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["success"], false);
        assert_eq!(parsed["errorCode"], 1001);
    }

    #[actix_web::test]
    async fn not_found_renders_code_1003() {
        let err = ApiError(GatewayError::NotFound("missing".into()));
        let resp = err.error_response();
        let body = resp.into_body().try_into_bytes().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["errorCode"], 1003);
    }
}

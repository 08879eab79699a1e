use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tonic::{Code, Status};
use users_api_core::gateway::http_status_from_code;

/// A gRPC status rendered as a gateway error response.
///
/// The body has the shape `{"code": <grpc code>, "message": <text>,
/// "details": []}` and the HTTP status follows the standard gateway table.
#[derive(Debug)]
pub struct GatewayError(pub Status);

impl From<Status> for GatewayError {
    fn from(status: Status) -> Self {
        Self(status)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self(Status::invalid_argument(err.to_string()))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let code: Code = self.0.code();
        let body = json!({
            "code": code as i32,
            "message": self.0.message(),
            "details": [],
        });
        (http_status_from_code(code), Json(body)).into_response()
    }
}

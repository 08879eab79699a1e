//! REST mapping shared by the HTTP gateway and its clients.
//!
//! The gateway exposes a single collection route. `POST` maps to
//! `UserService/CreateUser` and `GET` maps to `UserService/ListUsers`. Errors
//! are reported with an HTTP status derived from the gRPC status code using
//! the conventional gateway table in [`http_status_from_code`].

use http::StatusCode;
use tonic::Code;

/// Collection route for the users resource.
pub const USERS_ROUTE: &str = "/api/v1/users";

/// Non-standard status used by gateways for client-cancelled requests.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Maps a gRPC status code to the HTTP status returned by the gateway.
///
/// Matches the table used by gRPC-to-JSON gateways: `INVALID_ARGUMENT`,
/// `FAILED_PRECONDITION` and `OUT_OF_RANGE` are client errors (400),
/// `UNAVAILABLE` is 503, and anything the server cannot classify is 500.
pub fn http_status_from_code(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => {
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
        }
        Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::BAD_REQUEST,
        Code::Aborted => StatusCode::CONFLICT,
        Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{CreateUserRequest, CreateUserResponse, ListUsersResponse, User};

    #[test]
    fn maps_common_codes() {
        assert_eq!(http_status_from_code(Code::Ok), StatusCode::OK);
        assert_eq!(
            http_status_from_code(Code::InvalidArgument),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            http_status_from_code(Code::Internal),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            http_status_from_code(Code::Unavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(http_status_from_code(Code::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(http_status_from_code(Code::Cancelled).as_u16(), 499);
    }

    #[test]
    fn json_uses_protobuf_field_names() {
        let body = CreateUserResponse {
            user: Some(User {
                id: 1,
                email: "jdoe@example.com".to_string(),
                name: "John Doe".to_string(),
            }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"user": {"id": 1, "email": "jdoe@example.com", "name": "John Doe"}})
        );

        let list = serde_json::to_value(ListUsersResponse::default()).unwrap();
        assert_eq!(list, serde_json::json!({"users": []}));
    }

    #[test]
    fn missing_json_fields_take_defaults() {
        let req: CreateUserRequest = serde_json::from_str(r#"{"email":"a@b.c"}"#).unwrap();
        assert_eq!(req.email, "a@b.c");
        assert_eq!(req.name, "");
    }
}

//! REST/JSON gateway in front of the gRPC service.
//!
//! The gateway holds a [`UserServiceClient`] over a loopback [`Channel`] to
//! the process's own gRPC listener and translates:
//!
//! - `POST /api/v1/users` with a `CreateUserRequest` JSON body to
//!   `CreateUser`, answering `{"user": User}`.
//! - `GET /api/v1/users` to `ListUsers`, answering `{"users": [User, ...]}`.
//!
//! JSON bodies map field-for-field onto the protobuf messages. Request bodies
//! are decoded as JSON whatever their `Content-Type`, and an empty body is a
//! default request. gRPC failures
//! become [`GatewayError`] responses using the standard status table in
//! [`http_status_from_code`](users_api_core::gateway::http_status_from_code).

mod error;

pub use error::GatewayError;

use axum::{Json, Router, body::Bytes, extract::State, routing::get};
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tonic::transport::{Channel, Endpoint};
use tower_http::trace::TraceLayer;
use users_api_core::{
    gateway::USERS_ROUTE,
    proto::{
        CreateUserRequest, CreateUserResponse, ListUsersRequest, ListUsersResponse,
        user_service_client::UserServiceClient,
    },
};

pub type Client = UserServiceClient<Channel>;

/// Builds the gateway router around a gRPC client.
pub fn router(client: Client) -> Router {
    Router::new()
        .route(USERS_ROUTE, get(list_users).post(create_user))
        .layer(TraceLayer::new_for_http())
        .with_state(client)
}

/// Creates a client for the gRPC server bound at `grpc_addr`.
///
/// The channel connects on first use, so it can be built before the server
/// task starts accepting.
pub fn loopback_client(grpc_addr: SocketAddr) -> Result<Client, tonic::transport::Error> {
    let endpoint = Endpoint::from_shared(format!("http://{}", loopback(grpc_addr)))?;
    Ok(UserServiceClient::new(endpoint.connect_lazy()))
}

/// Replaces an unspecified bind address (`0.0.0.0` / `::`) with the matching
/// loopback address so it can be dialed.
pub fn loopback(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

async fn create_user(
    State(mut client): State<Client>,
    body: Bytes,
) -> Result<Json<CreateUserResponse>, GatewayError> {
    let req = decode_body::<CreateUserRequest>(&body)?;
    let resp = client.create_user(req).await?;
    Ok(Json(resp.into_inner()))
}

async fn list_users(
    State(mut client): State<Client>,
) -> Result<Json<ListUsersResponse>, GatewayError> {
    let resp = client.list_users(ListUsersRequest {}).await?;
    Ok(Json(resp.into_inner()))
}

/// Decodes a JSON request body. Whitespace-only bodies yield the default
/// message.
fn decode_body<T>(body: &[u8]) -> Result<T, GatewayError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}

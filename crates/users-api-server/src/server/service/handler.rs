//! gRPC service implementation for the users resource.
//!
//! This module defines [`UsersService`], the concrete implementation of the
//! generated [`UserService`] trait. The trait declares exactly `CreateUser`
//! and `ListUsers`; both forward to a [`UserStore`] and wrap the result.
//!
//! ## Responsibilities
//!
//! - Extract request fields and delegate to the store.
//! - Map stored rows to protobuf `User` messages.
//! - Convert store failures to `tonic::Status` without retrying.
//! - Record per-call metrics through [`ServiceMetrics`].
//! - Tag each call's span with its OpenTelemetry trace and span ids so the
//!   log lines it emits can be joined to the trace.

use crate::server::{
    error::Error,
    store::UserStore,
    telemetry::{ServiceMetrics, record_trace_context},
};
use std::{sync::Arc, time::Instant};
use tonic::{Code, Request, Response, Status};
use tracing::Span;
use users_api_core::proto::{
    CreateUserRequest, CreateUserResponse, ListUsersRequest, ListUsersResponse,
    user_service_server::UserService,
};

/// gRPC façade over a [`UserStore`].
///
/// No validation, authentication or authorization is applied: any caller
/// reaching the gRPC port may create or list users.
#[derive(Clone)]
pub struct UsersService {
    store: Arc<dyn UserStore>,
    metrics: ServiceMetrics,
}

impl UsersService {
    pub fn new(store: Arc<dyn UserStore>, metrics: ServiceMetrics) -> Self {
        Self { store, metrics }
    }

    fn finish<T>(
        &self,
        method: &'static str,
        start: Instant,
        result: Result<T, Error>,
    ) -> Result<Response<T>, Status> {
        match result {
            Ok(body) => {
                self.metrics.record_call(method, Code::Ok, start.elapsed());
                Ok(Response::new(body))
            }
            Err(err) => {
                tracing::error!(method, error = %err, "Store call failed");
                let status = Status::from(err);
                self.metrics
                    .record_call(method, status.code(), start.elapsed());
                Err(status)
            }
        }
    }
}

#[tonic::async_trait]
impl UserService for UsersService {
    /// Inserts a user and returns it with its store-assigned id.
    #[tracing::instrument(
        name = "CreateUser",
        skip_all,
        fields(trace_id = tracing::field::Empty, span_id = tracing::field::Empty)
    )]
    async fn create_user(
        &self,
        req: Request<CreateUserRequest>,
    ) -> Result<Response<CreateUserResponse>, Status> {
        record_trace_context(&Span::current());
        let start = Instant::now();
        let CreateUserRequest { email, name } = req.into_inner();

        let result = self.store.create_user(&email, &name).await.map(|user| {
            tracing::info!(user_id = user.id, "Created user");
            self.metrics.record_user_created();
            CreateUserResponse {
                user: Some(user.into()),
            }
        });

        self.finish("CreateUser", start, result)
    }

    /// Returns the full users table.
    #[tracing::instrument(
        name = "ListUsers",
        skip_all,
        fields(trace_id = tracing::field::Empty, span_id = tracing::field::Empty)
    )]
    async fn list_users(
        &self,
        _req: Request<ListUsersRequest>,
    ) -> Result<Response<ListUsersResponse>, Status> {
        record_trace_context(&Span::current());
        let start = Instant::now();

        let result = self.store.list_users().await.map(|users| {
            tracing::debug!(count = users.len(), "Listed users");
            ListUsersResponse {
                users: users.into_iter().map(Into::into).collect(),
            }
        });

        self.finish("ListUsers", start, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{error::Result, store::{InMemoryUserStore, User}};
    use users_api_core::proto;

    /// Store whose connection is gone.
    struct UnavailableStore;

    #[tonic::async_trait]
    impl UserStore for UnavailableStore {
        async fn create_user(&self, _email: &str, _name: &str) -> Result<User> {
            Err(sqlx::Error::PoolClosed.into())
        }

        async fn list_users(&self) -> Result<Vec<User>> {
            Err(sqlx::Error::PoolClosed.into())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Reports the error the driver returns for a row whose id column does not
    /// decode. The decode itself is exercised in `tests/postgres.rs`.
    struct CorruptStore;

    #[tonic::async_trait]
    impl UserStore for CorruptStore {
        async fn create_user(&self, _email: &str, _name: &str) -> Result<User> {
            unreachable!("not used")
        }

        async fn list_users(&self) -> Result<Vec<User>> {
            Err(sqlx::Error::ColumnDecode {
                index: "\"id\"".to_string(),
                source: "invalid digit found in string".into(),
            }
            .into())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn service(store: impl UserStore) -> UsersService {
        UsersService::new(Arc::new(store), ServiceMetrics::default())
    }

    fn create_request(email: &str, name: &str) -> Request<CreateUserRequest> {
        Request::new(CreateUserRequest {
            email: email.to_string(),
            name: name.to_string(),
        })
    }

    #[tokio::test]
    async fn create_then_list_contains_exactly_the_new_user() {
        let svc = service(InMemoryUserStore::new());

        let created = svc
            .create_user(create_request("john.doe@example.com", "John Doe"))
            .await
            .unwrap()
            .into_inner()
            .user
            .unwrap();
        assert_eq!(
            created,
            proto::User {
                id: 1,
                email: "john.doe@example.com".to_string(),
                name: "John Doe".to_string(),
            }
        );

        let users = svc
            .list_users(Request::new(ListUsersRequest {}))
            .await
            .unwrap()
            .into_inner()
            .users;
        let matching: Vec<_> = users
            .iter()
            .filter(|u| u.email == "john.doe@example.com" && u.name == "John Doe")
            .collect();
        assert_eq!(matching, vec![&created]);
    }

    #[tokio::test]
    async fn list_on_empty_store_is_empty() {
        let svc = service(InMemoryUserStore::new());
        let resp = svc
            .list_users(Request::new(ListUsersRequest {}))
            .await
            .unwrap();
        assert!(resp.into_inner().users.is_empty());
    }

    #[tokio::test]
    async fn identical_creates_get_distinct_ids() {
        let svc = service(InMemoryUserStore::new());
        let first = svc
            .create_user(create_request("dup@example.com", "Dup"))
            .await
            .unwrap()
            .into_inner()
            .user
            .unwrap();
        let second = svc
            .create_user(create_request("dup@example.com", "Dup"))
            .await
            .unwrap()
            .into_inner()
            .user
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn unavailable_store_fails_both_calls() {
        let svc = service(UnavailableStore);

        let status = svc
            .create_user(create_request("a@example.com", "A"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);

        let status = svc
            .list_users(Request::new(ListUsersRequest {}))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), sqlx::Error::PoolClosed.to_string());
    }

    #[tokio::test]
    async fn decode_failure_is_reported_not_skipped() {
        let svc = service(CorruptStore);
        let status = svc
            .list_users(Request::new(ListUsersRequest {}))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("invalid digit"));
    }
}

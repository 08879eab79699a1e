//! Record store for the users table.
//!
//! [`UserStore`] is the seam between the gRPC service and persistence. Each
//! operation performs exactly one round trip; there are no transactions
//! spanning statements and no retries. Errors surface as
//! [`Error::Store`](crate::server::error::Error::Store).
//!
//! - [`postgres::PgUserStore`] - the production store over a `sqlx` pool.
//! - [`memory::InMemoryUserStore`] - a process-local store for tests and
//!   local development.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryUserStore;
pub use postgres::PgUserStore;

use crate::server::error::Result;
use users_api_core::proto;

/// A persisted user row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    /// Store-assigned, never reused.
    pub id: i64,
    pub email: String,
    pub name: String,
}

impl From<User> for proto::User {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
        }
    }
}

/// Persistence operations backing the `UserService` RPCs.
///
/// Implementations must be safe for concurrent use; callers add no locking.
#[tonic::async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Inserts a user and returns it with its assigned id. Duplicate emails
    /// are accepted.
    async fn create_user(&self, email: &str, name: &str) -> Result<User>;

    /// Returns every stored user in store-native order. An empty table yields
    /// an empty vector.
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Releases the underlying connection handle.
    async fn close(&self) -> Result<()>;
}

use crate::server::{
    error::Result,
    store::{User, UserStore},
};
use tokio::sync::Mutex;

/// Process-local [`UserStore`] used for tests and local development.
///
/// Ids start at 1 and increase by one per insert, mirroring a fresh
/// PostgreSQL sequence. Rows are returned in insertion order.
#[derive(Debug)]
pub struct InMemoryUserStore {
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    next_id: i64,
    users: Vec<User>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                users: Vec::new(),
            }),
        }
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[tonic::async_trait]
impl UserStore for InMemoryUserStore {
    async fn create_user(&self, email: &str, name: &str) -> Result<User> {
        let mut state = self.state.lock().await;
        let user = User {
            id: state.next_id,
            email: email.to_owned(),
            name: name.to_owned(),
        };
        state.next_id += 1;
        state.users.push(user.clone());
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.state.lock().await.users.clone())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

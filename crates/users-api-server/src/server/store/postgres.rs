use crate::server::{
    config::DatabaseConfig,
    error::Result,
    store::{User, UserStore},
};
use core::time::Duration;
use sqlx::{
    PgPool,
    migrate::Migrator,
    postgres::{PgConnectOptions, PgPoolOptions},
};

/// Schema migrations embedded from `migrations/`, applied in ascending
/// version order.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const INSERT_USER: &str = "INSERT INTO users (email, name) VALUES ($1, $2) RETURNING id, email, name";
const SELECT_USERS: &str = "SELECT id, email, name FROM users";

/// [`UserStore`] over a PostgreSQL connection pool.
///
/// The pool serializes access to its connections internally, so a single
/// `PgUserStore` is shared by every in-flight request. Each statement runs in
/// its own span carrying the connection attributes in [`DbTarget`].
#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
    target: DbTarget,
}

/// Database identity attached to every statement span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DbTarget {
    pub name: String,
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl From<&PgConnectOptions> for DbTarget {
    fn from(options: &PgConnectOptions) -> Self {
        Self {
            name: options.get_database().unwrap_or_default().to_owned(),
            user: options.get_username().to_owned(),
            host: options.get_host().to_owned(),
            port: options.get_port(),
        }
    }
}

impl PgUserStore {
    /// Opens a pool with fixed settings and verifies a connection can be
    /// established.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            "Connecting to database"
        );
        let options = config.connect_options();
        let target = DbTarget::from(&options);
        let pool = pool_options().connect_with(options).await?;
        Ok(Self { pool, target })
    }

    /// Builds a store whose connections are opened on first use.
    pub fn connect_lazy(options: PgConnectOptions) -> Self {
        Self {
            target: DbTarget::from(&options),
            pool: pool_options().connect_lazy_with(options),
        }
    }

    /// Applies pending migrations. A database that is already current is left
    /// untouched.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        tracing::info!("Database migrations completed successfully");
        Ok(())
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub const fn target(&self) -> &DbTarget {
        &self.target
    }
}

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
}

#[tonic::async_trait]
impl UserStore for PgUserStore {
    #[tracing::instrument(
        name = "users.insert",
        skip_all,
        fields(
            otel.kind = "client",
            db.system = "postgresql",
            db.name = %self.target.name,
            db.user = %self.target.user,
            net.peer.name = %self.target.host,
            net.peer.port = self.target.port,
            db.statement = INSERT_USER
        )
    )]
    async fn create_user(&self, email: &str, name: &str) -> Result<User> {
        let user = sqlx::query_as::<_, User>(INSERT_USER)
            .bind(email)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(user)
    }

    #[tracing::instrument(
        name = "users.select",
        skip_all,
        fields(
            otel.kind = "client",
            db.system = "postgresql",
            db.name = %self.target.name,
            db.user = %self.target.user,
            net.peer.name = %self.target.host,
            net.peer.port = self.target.port,
            db.statement = SELECT_USERS
        )
    )]
    async fn list_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(SELECT_USERS)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("Shutting down database connection");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{error::Error, telemetry::span_capture::SpanCapture};
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    fn closed_store() -> PgUserStore {
        PgUserStore::connect_lazy(
            PgConnectOptions::new()
                .host("127.0.0.1")
                .port(1)
                .username("postgres")
                .database("users_api"),
        )
    }

    #[tokio::test]
    async fn closed_pool_fails_both_operations() {
        let store = closed_store();
        store.close().await.unwrap();

        let err = store.create_user("a@example.com", "A").await.unwrap_err();
        assert!(matches!(err, Error::Store(sqlx::Error::PoolClosed)));

        let err = store.list_users().await.unwrap_err();
        assert!(matches!(err, Error::Store(sqlx::Error::PoolClosed)));
    }

    #[tokio::test]
    async fn statements_run_in_database_spans() {
        let capture = SpanCapture::default();
        let _guard = tracing_subscriber::registry()
            .with(capture.clone())
            .set_default();

        let store = closed_store();
        store.close().await.unwrap();
        let _ = store.create_user("a@example.com", "A").await;
        let _ = store.list_users().await;

        let insert = capture.named("users.insert").unwrap();
        assert_eq!(insert.fields["db.system"], "postgresql");
        assert_eq!(insert.fields["db.name"], "users_api");
        assert_eq!(insert.fields["db.user"], "postgres");
        assert_eq!(insert.fields["net.peer.name"], "127.0.0.1");
        assert_eq!(insert.fields["net.peer.port"], "1");
        assert_eq!(insert.fields["db.statement"], INSERT_USER);

        let select = capture.named("users.select").unwrap();
        assert_eq!(select.fields["db.statement"], SELECT_USERS);
    }

    #[tokio::test]
    async fn target_comes_from_connect_options() {
        let store = closed_store();
        assert_eq!(
            store.target(),
            &DbTarget {
                name: "users_api".to_string(),
                user: "postgres".to_string(),
                host: "127.0.0.1".to_string(),
                port: 1,
            }
        );
    }

    #[test]
    fn migrations_are_ordered_and_create_users() {
        let versions: Vec<i64> = MIGRATOR.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted);

        let first = MIGRATOR.iter().next().unwrap();
        assert_eq!(first.version, 1);
        assert!(first.sql.contains("CREATE TABLE IF NOT EXISTS users"));
    }
}

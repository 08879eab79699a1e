//! Server-side components of the users service.
//!
//! ## Submodules
//!
//! - [`store`] - the record store (`UserStore`) and its PostgreSQL and
//!   in-memory implementations.
//! - [`service`] - the gRPC `UserService` implementation.
//! - [`gateway`] - the REST/JSON gateway that forwards to the gRPC service
//!   over a loopback channel.
//! - [`supervisor`] - process lifecycle: migrations, listeners and ordered
//!   graceful shutdown.
//! - [`telemetry`] - logging subscriber and OpenTelemetry providers.
//! - [`config`] - CLI/environment configuration.
//! - [`error`] - the crate-wide error type.

pub mod config;
pub mod error;
pub mod gateway;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod telemetry;

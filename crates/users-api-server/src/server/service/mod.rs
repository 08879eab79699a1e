//! gRPC service implementation.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`UsersService`).

pub mod handler;

pub use handler::UsersService;

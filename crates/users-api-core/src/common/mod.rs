pub mod gateway;

/// Generated `users.v1` protocol types and gRPC stubs.
pub mod proto {
    tonic::include_proto!("users.v1");

    /// Encoded file descriptor set for the `users.v1` package, registered with
    /// the reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("users_descriptor");
}

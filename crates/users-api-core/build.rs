/// Builds the gRPC client and server code for `users/v1/users.proto` using
/// `tonic-prost-build`.
///
/// # JSON support
///
/// Every message in the `users.v1` package additionally derives
/// `serde::Serialize` and `serde::Deserialize` with `#[serde(default)]`, so the
/// REST gateway can decode request bodies and encode responses with the exact
/// protobuf field names. Missing JSON fields take their protobuf defaults.
///
/// # Files and Paths
///
/// - Proto file: `proto/users/v1/users.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/users_descriptor.bin` (served via reflection)
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("users_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .type_attribute(
            ".users.v1",
            "#[derive(serde::Serialize, serde::Deserialize)] #[serde(default)]",
        )
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/users/v1/users.proto"], &["proto"])
        .unwrap();
}

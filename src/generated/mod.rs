//! Pre-compiled protocol types.
//!
//! The Rust types for the Terraform plugin protocol, the go-plugin broker
//! services, and the gRPC health protocol are generated from the `.proto`
//! files in `proto/` and committed here, so building the SDK does not require
//! `protoc`. Regenerate with `cargo build --features regenerate-proto` after
//! changing a proto file.

/// Types for `grpc.health.v1`.
pub mod health;
/// Types for the go-plugin `plugin` package (controller and stdio services).
pub mod plugin;
/// Types for the Terraform plugin protocol, `tfplugin6`.
pub mod tfplugin6;

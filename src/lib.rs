//! Terraform Provider SDK
//!
//! This crate lets a standalone Rust process act as a Terraform provider by
//! speaking plugin protocol v6: the go-plugin handshake line on stdout,
//! followed by a TLS-protected gRPC channel exposing the provider lifecycle
//! verbs.
//!
//! # Overview
//!
//! The SDK provides:
//!
//! - **Schema types**: a typed attribute model with presence rules, unions of
//!   alternatives, and one-way compilation to the wire schema format
//! - **State codec**: MessagePack encoding/decoding of config and state
//!   against a schema, including the "unknown value" sentinel
//! - **Validator and plan engine**: schema-driven config validation and plan
//!   preprocessing (computed-attribute substitution, replacement tracking)
//! - **Handler traits**: [`ProviderHandler`], [`ResourceHandler`], and
//!   [`DataSourceHandler`] for the user-supplied callbacks
//! - **Server**: [`serve`] runs the magic-cookie check, mTLS setup,
//!   handshake, and the gRPC services the host expects
//! - **Testing**: an in-process harness driving the dispatch layer without a
//!   server
//!
//! # Quick Start
//!
//! ```ignore
//! use terraform_provider_sdk::{
//!     async_trait, serve, Attribute, Diagnostics, Plugin, ProviderError,
//!     ProviderHandler, ResourceHandler, Schema, Value,
//! };
//! use terraform_provider_sdk::resource::{
//!     CreateRequest, DeleteRequest, ReadRequest, UpdateRequest,
//! };
//!
//! struct MyProvider {
//!     schema: Schema,
//! }
//!
//! #[async_trait]
//! impl ProviderHandler for MyProvider {
//!     type State = ApiClient;
//!
//!     fn schema(&self) -> &Schema {
//!         &self.schema
//!     }
//!
//!     async fn configure(
//!         &self,
//!         config: Value,
//!         diagnostics: &mut Diagnostics,
//!     ) -> Result<ApiClient, ProviderError> {
//!         ApiClient::connect(config.get("token"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = MyProvider {
//!         schema: Schema::new().with_attribute("token", Attribute::required_string()),
//!     };
//!     let plugin = Plugin::new("example", provider)
//!         .with_resource("record", my_record_resource());
//!     serve(plugin).await
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! When a plugin starts via [`serve`], it writes a single line to stdout:
//!
//! ```text
//! 1|6|tcp|127.0.0.1:50051|grpc|<base64-DER-certificate>
//! ```
//!
//! Format: `1|<api_protocol_version>|tcp|<address>|grpc[|<certificate>]`.
//! The certificate segment is present only when mutual TLS is active. This
//! line is everything the host parses to locate and trust the plugin; all
//! logging goes to stderr.
//!
//! # Protocol Surface
//!
//! The gRPC service implements the fixed tfplugin6 verb set:
//! `GetProviderSchema`, `ValidateProviderConfig`, `ConfigureProvider`,
//! `ValidateResourceConfig`, `PlanResourceChange`, `ApplyResourceChange`,
//! `ReadResource`, `ImportResourceState`, `UpgradeResourceState`,
//! `ValidateDataResourceConfig`, and `ReadDataSource`, plus the go-plugin
//! health, stdio, and controller services (the controller's `Shutdown` exits
//! the process).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod datasource;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod server;
pub mod testing;
pub mod validate;
pub mod value;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use codec::{decode_with_schema, encode_with_schema};
pub use datasource::DataSourceHandler;
pub use diagnostics::{AttributePath, Diagnostic, Diagnostics, PathStep, Severity};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use plan::{preprocess_plan, ReplacementTracker};
pub use provider::{Plugin, ProviderHandler};
pub use resource::ResourceHandler;
pub use schema::{
    fields, AttrType, Attribute, Field, Fields, Presence, ScalarType, Schema, Union,
};
pub use server::{
    serve, serve_with_options, MagicCookie, ServeOptions, CLIENT_CERT_ENV,
    TERRAFORM_MAGIC_COOKIE_NAME, TERRAFORM_MAGIC_COOKIE_VALUE,
};
pub use validate::validate_config;
pub use value::Value;

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;

//! Testing utilities for provider implementations.
//!
//! [`PluginTester`] wraps a [`Plugin`] and drives the real dispatch layer in
//! process, without a gRPC server or handshake: payloads are encoded through
//! the state codec, routed through the same verb handlers the host would
//! reach, and decoded back into [`Value`]s.
//!
//! # Example
//!
//! ```ignore
//! use terraform_provider_sdk::testing::PluginTester;
//! use terraform_provider_sdk::Value;
//!
//! #[tokio::test]
//! async fn test_create() {
//!     let tester = PluginTester::new(my_plugin());
//!     tester.configure(Value::object([("token", Value::from("t"))])).await.unwrap();
//!
//!     let state = tester
//!         .apply_create("example_record", Value::object([("name", Value::from("x"))]))
//!         .await
//!         .unwrap();
//!     assert_eq!(state.get("name"), Some(&Value::from("x")));
//! }
//! ```

use std::collections::HashMap;

use crate::codec::{decode_with_schema, encode_with_schema};
use crate::diagnostics::{AttributePath, PathStep};
use crate::error::ProviderError;
use crate::generated::tfplugin6 as proto;
use crate::generated::tfplugin6::provider_server::Provider as _;
use crate::provider::{Plugin, ProviderHandler};
use crate::schema::Schema;
use crate::server::PluginGrpcService;
use crate::value::Value;

/// The decoded result of a plan call.
#[derive(Debug)]
pub struct PlanOutcome {
    /// The planned state the host would persist.
    pub planned_state: Value,
    /// The attribute paths whose changes force replacement.
    pub requires_replace: Vec<AttributePath>,
}

/// Error type for test operations.
#[derive(Debug)]
pub enum TestError {
    /// The call answered with error diagnostics.
    Diagnostics(Vec<proto::Diagnostic>),
    /// The RPC itself failed.
    Status(tonic::Status),
    /// A payload could not be encoded or decoded.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diagnostics) => {
                writeln!(f, "call failed with {} diagnostic(s):", diagnostics.len())?;
                for diagnostic in diagnostics {
                    writeln!(f, "  [{}] {}", diagnostic.severity().as_str_name(), diagnostic.summary)?;
                }
                Ok(())
            }
            TestError::Status(status) => write!(f, "rpc failed: {}", status),
            TestError::Provider(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for TestError {}

impl From<tonic::Status> for TestError {
    fn from(status: tonic::Status) -> Self {
        TestError::Status(status)
    }
}

impl From<ProviderError> for TestError {
    fn from(err: ProviderError) -> Self {
        TestError::Provider(err)
    }
}

fn check_diagnostics(diagnostics: Vec<proto::Diagnostic>) -> Result<(), TestError> {
    let has_errors = diagnostics
        .iter()
        .any(|d| d.severity == proto::diagnostic::Severity::Error as i32);
    if has_errors {
        Err(TestError::Diagnostics(diagnostics))
    } else {
        Ok(())
    }
}

fn encode_value(value: &Value, schema: &Schema) -> Result<proto::DynamicValue, TestError> {
    Ok(proto::DynamicValue {
        msgpack: encode_with_schema(value, schema)?,
        json: Vec::new(),
    })
}

fn decode_value(value: Option<&proto::DynamicValue>, schema: &Schema) -> Result<Value, TestError> {
    match value {
        Some(dv) if !dv.msgpack.is_empty() => Ok(decode_with_schema(&dv.msgpack, schema)?),
        _ => Ok(Value::Null),
    }
}

fn path_from_proto(path: &proto::AttributePath) -> AttributePath {
    path.steps
        .iter()
        .filter_map(|step| step.selector.as_ref())
        .map(|selector| match selector {
            proto::attribute_path::step::Selector::AttributeName(name) => {
                PathStep::AttributeName(name.clone())
            }
            proto::attribute_path::step::Selector::ElementKeyString(key) => {
                PathStep::ElementKeyString(key.clone())
            }
            proto::attribute_path::step::Selector::ElementKeyInt(index) => {
                PathStep::ElementKeyInt(*index)
            }
        })
        .collect()
}

/// An in-process harness around a [`Plugin`].
pub struct PluginTester<P: ProviderHandler> {
    provider_schema: Schema,
    resource_schemas: HashMap<String, Schema>,
    data_source_schemas: HashMap<String, Schema>,
    service: PluginGrpcService<P>,
}

impl<P: ProviderHandler> PluginTester<P> {
    /// Create a tester for the given plugin.
    pub fn new(plugin: Plugin<P>) -> Self {
        let provider_schema = plugin.provider.schema().clone();
        let resource_schemas = plugin
            .resources
            .iter()
            .map(|(name, resource)| (name.clone(), resource.schema().clone()))
            .collect();
        let data_source_schemas = plugin
            .data_sources
            .iter()
            .map(|(name, data_source)| (name.clone(), data_source.schema().clone()))
            .collect();
        Self {
            provider_schema,
            resource_schemas,
            data_source_schemas,
            service: PluginGrpcService::new(plugin),
        }
    }

    fn resource_schema(&self, type_name: &str) -> Result<&Schema, TestError> {
        self.resource_schemas.get(type_name).ok_or_else(|| {
            TestError::Provider(ProviderError::UnknownResourceType(type_name.to_string()))
        })
    }

    fn data_source_schema(&self, type_name: &str) -> Result<&Schema, TestError> {
        self.data_source_schemas.get(type_name).ok_or_else(|| {
            TestError::Provider(ProviderError::UnknownDataSourceType(type_name.to_string()))
        })
    }

    /// Fetch the compiled wire schemas, exactly as the host would.
    pub async fn get_schema(&self) -> Result<proto::get_provider_schema::Response, TestError> {
        Ok(self
            .service
            .get_provider_schema(tonic::Request::new(proto::get_provider_schema::Request {}))
            .await?
            .into_inner())
    }

    /// Validate the provider configuration.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let request = proto::validate_provider_config::Request {
            config: Some(encode_value(&config, &self.provider_schema)?),
        };
        let response = self
            .service
            .validate_provider_config(tonic::Request::new(request))
            .await?
            .into_inner();
        check_diagnostics(response.diagnostics)
    }

    /// Configure the provider.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let request = proto::configure_provider::Request {
            terraform_version: "1.9.0".to_string(),
            config: Some(encode_value(&config, &self.provider_schema)?),
        };
        let response = self
            .service
            .configure_provider(tonic::Request::new(request))
            .await?
            .into_inner();
        check_diagnostics(response.diagnostics)
    }

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        type_name: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let schema = self.resource_schema(type_name)?;
        let request = proto::validate_resource_config::Request {
            type_name: type_name.to_string(),
            config: Some(encode_value(&config, schema)?),
        };
        let response = self
            .service
            .validate_resource_config(tonic::Request::new(request))
            .await?
            .into_inner();
        check_diagnostics(response.diagnostics)
    }

    /// Run a full plan with explicit prior state, proposed state, and config.
    pub async fn plan(
        &self,
        type_name: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanOutcome, TestError> {
        let schema = self.resource_schema(type_name)?;
        let prior = prior_state.unwrap_or(Value::Null);
        let request = proto::plan_resource_change::Request {
            type_name: type_name.to_string(),
            prior_state: Some(encode_value(&prior, schema)?),
            proposed_new_state: Some(encode_value(&proposed_state, schema)?),
            config: Some(encode_value(&config, schema)?),
        };
        let response = self
            .service
            .plan_resource_change(tonic::Request::new(request))
            .await?
            .into_inner();
        check_diagnostics(response.diagnostics)?;
        Ok(PlanOutcome {
            planned_state: decode_value(response.planned_state.as_ref(), schema)?,
            requires_replace: response.requires_replace.iter().map(path_from_proto).collect(),
        })
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        type_name: &str,
        config: Value,
    ) -> Result<PlanOutcome, TestError> {
        self.plan(type_name, None, config.clone(), config).await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        type_name: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanOutcome, TestError> {
        self.plan(type_name, Some(prior_state), proposed_state.clone(), proposed_state)
            .await
    }

    async fn apply(
        &self,
        type_name: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, TestError> {
        let schema = self.resource_schema(type_name)?;
        let request = proto::apply_resource_change::Request {
            type_name: type_name.to_string(),
            prior_state: Some(encode_value(&prior_state, schema)?),
            planned_state: Some(encode_value(&config, schema)?),
            config: Some(encode_value(&config, schema)?),
        };
        let response = self
            .service
            .apply_resource_change(tonic::Request::new(request))
            .await?
            .into_inner();
        check_diagnostics(response.diagnostics)?;
        decode_value(response.new_state.as_ref(), schema)
    }

    /// Apply a creation and return the new state.
    pub async fn apply_create(&self, type_name: &str, config: Value) -> Result<Value, TestError> {
        self.apply(type_name, Value::Null, config).await
    }

    /// Apply an in-place update and return the new state.
    pub async fn apply_update(
        &self,
        type_name: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, TestError> {
        self.apply(type_name, prior_state, config).await
    }

    /// Apply a deletion.
    pub async fn apply_delete(&self, type_name: &str, prior_state: Value) -> Result<(), TestError> {
        self.apply(type_name, prior_state, Value::Null).await?;
        Ok(())
    }

    /// Refresh a resource. A null result means the resource is gone.
    pub async fn read(&self, type_name: &str, saved_state: Value) -> Result<Value, TestError> {
        let schema = self.resource_schema(type_name)?;
        let request = proto::read_resource::Request {
            type_name: type_name.to_string(),
            current_state: Some(encode_value(&saved_state, schema)?),
        };
        let response = self
            .service
            .read_resource(tonic::Request::new(request))
            .await?
            .into_inner();
        check_diagnostics(response.diagnostics)?;
        decode_value(response.new_state.as_ref(), schema)
    }

    /// Import a resource by external identifier.
    pub async fn import(
        &self,
        type_name: &str,
        id: &str,
    ) -> Result<Vec<(String, Value)>, TestError> {
        let schema = self.resource_schema(type_name)?;
        let request = proto::import_resource_state::Request {
            type_name: type_name.to_string(),
            id: id.to_string(),
        };
        let response = self
            .service
            .import_resource_state(tonic::Request::new(request))
            .await?
            .into_inner();
        check_diagnostics(response.diagnostics)?;
        response
            .imported_resources
            .into_iter()
            .map(|imported| {
                Ok((
                    imported.type_name,
                    decode_value(imported.state.as_ref(), schema)?,
                ))
            })
            .collect()
    }

    /// Upgrade saved state from an older schema version; returns the raw
    /// upgraded JSON.
    pub async fn upgrade_resource_state(
        &self,
        type_name: &str,
        version: i64,
        json: &[u8],
    ) -> Result<Vec<u8>, TestError> {
        let request = proto::upgrade_resource_state::Request {
            type_name: type_name.to_string(),
            version,
            raw_state: Some(proto::RawState {
                json: json.to_vec(),
                flatmap: HashMap::new(),
            }),
        };
        let response = self
            .service
            .upgrade_resource_state(tonic::Request::new(request))
            .await?
            .into_inner();
        check_diagnostics(response.diagnostics)?;
        Ok(response.upgraded_state.map(|dv| dv.json).unwrap_or_default())
    }

    /// Validate a data source configuration.
    pub async fn validate_data_source_config(
        &self,
        type_name: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let schema = self.data_source_schema(type_name)?;
        let request = proto::validate_data_resource_config::Request {
            type_name: type_name.to_string(),
            config: Some(encode_value(&config, schema)?),
        };
        let response = self
            .service
            .validate_data_resource_config(tonic::Request::new(request))
            .await?
            .into_inner();
        check_diagnostics(response.diagnostics)
    }

    /// Read a data source.
    pub async fn read_data_source(
        &self,
        type_name: &str,
        config: Value,
    ) -> Result<Value, TestError> {
        let schema = self.data_source_schema(type_name)?;
        let request = proto::read_data_source::Request {
            type_name: type_name.to_string(),
            config: Some(encode_value(&config, schema)?),
        };
        let response = self
            .service
            .read_data_source(tonic::Request::new(request))
            .await?
            .into_inner();
        check_diagnostics(response.diagnostics)?;
        decode_value(response.state.as_ref(), schema)
    }
}

//! The plugin server: gRPC dispatch and the go-plugin handshake transport.
//!
//! # Startup sequence
//!
//! [`serve`] runs the protocol a plugin host expects from a spawned plugin
//! process:
//!
//! 1. Verify the magic cookie environment variable. On mismatch, print an
//!    explanatory message to stderr and exit with code 1 without opening a
//!    listener.
//! 2. With mutual TLS (the default), generate a fresh self-signed identity in
//!    memory and trust exactly one client certificate, taken from the
//!    `PLUGIN_CLIENT_CERT` environment variable. The channel is HTTP/2 only
//!    and rustls rejects anything below TLS 1.2.
//! 3. Bind to an OS-assigned port on loopback.
//! 4. Print the single handshake line to stdout:
//!    `1|<api>|tcp|127.0.0.1:<port>|grpc[|<base64-DER-cert>]`. Stdout carries
//!    nothing else; all logging goes to stderr.
//! 5. Serve the provider service alongside the health, stdio, and controller
//!    services. The controller's `Shutdown` call exits the process.
//!
//! # Dispatch
//!
//! Each verb decodes its payloads through the state codec, runs the
//! validator or plan engine where the protocol calls for it, and invokes the
//! registered handler callbacks. Diagnostics accumulate per call. A
//! [`ProviderError::Diagnostic`] is folded into the response; any other
//! error fails the RPC and is logged. Every call runs as its own task;
//! cancellation drops the handler future.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use tokio::net::TcpListener;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{decode_with_schema, encode_with_schema};
use crate::datasource::{DataReadRequest, DataSourceHandler};
use crate::diagnostics::{path_to_proto, Diagnostic, Diagnostics};
use crate::error::ProviderError;
use crate::generated::health::health_check_response::ServingStatus;
use crate::generated::health::health_server::{Health, HealthServer};
use crate::generated::health::{HealthCheckRequest, HealthCheckResponse};
use crate::generated::plugin::grpc_controller_server::{GrpcController, GrpcControllerServer};
use crate::generated::plugin::grpc_stdio_server::{GrpcStdio, GrpcStdioServer};
use crate::generated::plugin::{Empty, StdioData};
use crate::generated::tfplugin6 as proto;
use crate::generated::tfplugin6::provider_server::{Provider as ProviderGrpc, ProviderServer};
use crate::plan::{preprocess_plan, ReplacementTracker};
use crate::provider::{Plugin, ProviderHandler};
use crate::resource::{
    CreateRequest, DeleteRequest, ImportRequest, PlanRequest, ReadRequest, ResourceHandler,
    UpdateRequest,
};
use crate::schema::Schema;
use crate::validate::validate_config;
use crate::value::Value;

/// Environment variable holding the certificate the host wants the plugin to
/// trust as its client identity.
pub const CLIENT_CERT_ENV: &str = "PLUGIN_CLIENT_CERT";

/// The magic cookie name Terraform sets for its plugin processes.
pub const TERRAFORM_MAGIC_COOKIE_NAME: &str = "TF_PLUGIN_MAGIC_COOKIE";

/// The magic cookie value Terraform sets for its plugin processes.
pub const TERRAFORM_MAGIC_COOKIE_VALUE: &str =
    "d602bf8f470bc67ca7faa0386276bbdd4330efaf76d1a219cb4d6991ca9872b2";

const COOKIE_MISMATCH_MESSAGE: &str = "This binary is a plugin. These are not meant to be executed directly.\nPlease execute the program that consumes these plugins, which will\nload any plugins automatically";

/// An environment variable name/value pair proving the process was spawned
/// by a plugin host rather than run by hand.
#[derive(Debug, Clone)]
pub struct MagicCookie {
    /// The environment variable to check.
    pub name: String,
    /// The exact value it must hold.
    pub value: String,
}

impl MagicCookie {
    /// Create a magic cookie pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The cookie Terraform sets for providers.
    pub fn terraform() -> Self {
        Self::new(TERRAFORM_MAGIC_COOKIE_NAME, TERRAFORM_MAGIC_COOKIE_VALUE)
    }

    fn matches(&self, actual: Option<&str>) -> bool {
        actual == Some(self.value.as_str())
    }
}

/// Options for serving a plugin.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// The API protocol version advertised in the handshake line.
    pub api_protocol_version: u32,
    /// The magic cookie to verify at startup, if any.
    pub magic_cookie: Option<MagicCookie>,
    /// Whether to require mutual TLS with the host.
    pub mtls: bool,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            api_protocol_version: 6,
            magic_cookie: Some(MagicCookie::terraform()),
            mtls: true,
        }
    }
}

impl ServeOptions {
    /// Create options with the Terraform defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API protocol version advertised in the handshake.
    pub fn with_api_protocol_version(mut self, version: u32) -> Self {
        self.api_protocol_version = version;
        self
    }

    /// Replace the magic cookie pair.
    pub fn with_magic_cookie(mut self, cookie: MagicCookie) -> Self {
        self.magic_cookie = Some(cookie);
        self
    }

    /// Skip the magic cookie check.
    pub fn without_magic_cookie(mut self) -> Self {
        self.magic_cookie = None;
        self
    }

    /// Serve plaintext instead of mutual TLS. Only useful against hosts that
    /// dial plugins without client certificates.
    pub fn without_mtls(mut self) -> Self {
        self.mtls = false;
        self
    }
}

fn handshake_line(api_protocol_version: u32, addr: SocketAddr, certificate: Option<&str>) -> String {
    let mut line = format!("1|{}|tcp|{}|grpc", api_protocol_version, addr);
    if let Some(certificate) = certificate {
        line.push('|');
        line.push_str(certificate);
    }
    line
}

struct PluginIdentity {
    identity: Identity,
    certificate_base64: String,
}

// The identity lives only in memory for the lifetime of the process.
fn generate_identity() -> Result<PluginIdentity, rcgen::Error> {
    let key = rcgen::KeyPair::generate()?;
    let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()])?;
    params.distinguished_name = {
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "localhost");
        dn
    };
    let cert = params.self_signed(&key)?;
    let identity = Identity::from_pem(cert.pem(), key.serialize_pem());
    // The handshake carries the DER certificate base64-encoded without
    // padding.
    let certificate_base64 = STANDARD_NO_PAD.encode(cert.der());
    Ok(PluginIdentity {
        identity,
        certificate_base64,
    })
}

/// The gRPC service dispatching protocol verbs to registered handlers.
pub(crate) struct PluginGrpcService<P: ProviderHandler> {
    provider: P,
    resources: HashMap<String, Arc<dyn ResourceHandler<State = P::State>>>,
    data_sources: HashMap<String, Arc<dyn DataSourceHandler<State = P::State>>>,
    state: OnceLock<P::State>,
}

impl<P: ProviderHandler> PluginGrpcService<P> {
    pub(crate) fn new(plugin: Plugin<P>) -> Self {
        Self {
            provider: plugin.provider,
            resources: plugin.resources,
            data_sources: plugin.data_sources,
            state: OnceLock::new(),
        }
    }

    fn resource(
        &self,
        type_name: &str,
    ) -> Result<&Arc<dyn ResourceHandler<State = P::State>>, ProviderError> {
        self.resources
            .get(type_name)
            .ok_or_else(|| ProviderError::UnknownResourceType(type_name.to_string()))
    }

    fn data_source(
        &self,
        type_name: &str,
    ) -> Result<&Arc<dyn DataSourceHandler<State = P::State>>, ProviderError> {
        self.data_sources
            .get(type_name)
            .ok_or_else(|| ProviderError::UnknownDataSourceType(type_name.to_string()))
    }

    fn configured(&self) -> Result<&P::State, ProviderError> {
        self.state.get().ok_or(ProviderError::NotConfigured)
    }

    async fn do_validate_provider_config(
        &self,
        req: &proto::validate_provider_config::Request,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), ProviderError> {
        let schema = self.provider.schema();
        let config = decode_dynamic(req.config.as_ref(), schema)?;

        // Under `terraform test` the host validates with every attribute
        // unknown; there is nothing to check yet.
        if let Some(map) = config.as_object() {
            if map.values().all(Value::is_unknown) {
                return Ok(());
            }
        }

        validate_config(&config, schema, diagnostics);
        self.provider.validate(&config, diagnostics).await
    }

    async fn do_configure_provider(
        &self,
        req: &proto::configure_provider::Request,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), ProviderError> {
        let config = decode_dynamic(req.config.as_ref(), self.provider.schema())?;
        let state = self.provider.configure(config, diagnostics).await?;
        if self.state.set(state).is_err() {
            warn!("provider was configured more than once; keeping the first configuration");
        }
        Ok(())
    }

    async fn do_validate_resource_config(
        &self,
        req: &proto::validate_resource_config::Request,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), ProviderError> {
        let resource = self.resource(&req.type_name)?;
        let config = decode_dynamic(req.config.as_ref(), resource.schema())?;
        validate_config(&config, resource.schema(), diagnostics);
        resource.validate(&config, diagnostics).await
    }

    async fn do_plan_resource_change(
        &self,
        req: &proto::plan_resource_change::Request,
        diagnostics: &mut Diagnostics,
        tracker: &mut ReplacementTracker,
    ) -> Result<proto::DynamicValue, ProviderError> {
        let resource = self.resource(&req.type_name)?;
        let schema = resource.schema();

        let prior = decode_dynamic(req.prior_state.as_ref(), schema)?;
        let prior_state = if prior.is_null() { None } else { Some(prior) };
        let proposed = decode_dynamic(req.proposed_new_state.as_ref(), schema)?;
        let adjusted = preprocess_plan(schema, prior_state.as_ref(), &proposed, tracker);

        let config = decode_dynamic(req.config.as_ref(), schema)?;
        let request = PlanRequest {
            config,
            prior_state,
            proposed_new_state: adjusted.clone(),
            proposed_new_state_is_prior_state: same_payload(
                req.prior_state.as_ref(),
                req.proposed_new_state.as_ref(),
            ),
        };
        let planned = match resource
            .plan(request, self.configured()?, diagnostics)
            .await?
        {
            Some(planned) => planned,
            None => adjusted,
        };
        encode_dynamic(&planned, schema)
    }

    async fn do_apply_resource_change(
        &self,
        req: &proto::apply_resource_change::Request,
        diagnostics: &mut Diagnostics,
    ) -> Result<proto::DynamicValue, ProviderError> {
        let resource = self.resource(&req.type_name)?;
        let schema = resource.schema();
        let config = decode_dynamic(req.config.as_ref(), schema)?;
        let prior = decode_dynamic(req.prior_state.as_ref(), schema)?;
        let state = self.configured()?;

        let new_state = if prior.is_null() {
            resource
                .create(CreateRequest { config }, state, diagnostics)
                .await?
        } else if !config.is_null() {
            resource
                .update(
                    UpdateRequest {
                        config,
                        prior_state: prior,
                    },
                    state,
                    diagnostics,
                )
                .await?
        } else {
            resource
                .delete(DeleteRequest { prior_state: prior }, state, diagnostics)
                .await?;
            Value::Null
        };
        encode_dynamic(&new_state, schema)
    }

    async fn do_read_resource(
        &self,
        req: &proto::read_resource::Request,
        diagnostics: &mut Diagnostics,
    ) -> Result<proto::DynamicValue, ProviderError> {
        let resource = self.resource(&req.type_name)?;
        let schema = resource.schema();
        let saved = decode_dynamic(req.current_state.as_ref(), schema)?;
        if saved.is_null() {
            return encode_dynamic(&Value::Null, schema);
        }

        let state = self.configured()?;
        match resource
            .read(ReadRequest { saved_state: saved }, state, diagnostics)
            .await
        {
            Ok(current) => encode_dynamic(&current, schema),
            // Gone remotely: report deletion via a null state, not an error.
            Err(ProviderError::RemoteResourceNotFound) => encode_dynamic(&Value::Null, schema),
            Err(e) => Err(e),
        }
    }

    async fn do_import_resource_state(
        &self,
        req: &proto::import_resource_state::Request,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<proto::import_resource_state::ImportedResource>, ProviderError> {
        let resource = self.resource(&req.type_name)?;
        let request = ImportRequest {
            resource_id: req.id.clone(),
        };
        match resource
            .import(request, self.configured()?, diagnostics)
            .await?
        {
            Some(current) => {
                let state = encode_dynamic(&current, resource.schema())?;
                Ok(vec![proto::import_resource_state::ImportedResource {
                    type_name: req.type_name.clone(),
                    state: Some(state),
                }])
            }
            None => {
                diagnostics.push(Diagnostic::error("Import not supported").with_detail(format!(
                    "Resource {} does not support being imported.",
                    req.type_name
                )));
                Ok(Vec::new())
            }
        }
    }

    async fn do_validate_data_resource_config(
        &self,
        req: &proto::validate_data_resource_config::Request,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), ProviderError> {
        let data_source = self.data_source(&req.type_name)?;
        let config = decode_dynamic(req.config.as_ref(), data_source.schema())?;
        validate_config(&config, data_source.schema(), diagnostics);
        data_source.validate(&config, diagnostics).await
    }

    async fn do_read_data_source(
        &self,
        req: &proto::read_data_source::Request,
        diagnostics: &mut Diagnostics,
    ) -> Result<proto::DynamicValue, ProviderError> {
        let data_source = self.data_source(&req.type_name)?;
        let schema = data_source.schema();
        let config = decode_dynamic(req.config.as_ref(), schema)?;
        let state = data_source
            .read(DataReadRequest { config }, self.configured()?, diagnostics)
            .await?;
        encode_dynamic(&state, schema)
    }
}

fn decode_dynamic(
    value: Option<&proto::DynamicValue>,
    schema: &Schema,
) -> Result<Value, ProviderError> {
    match value {
        Some(dv) if !dv.msgpack.is_empty() => decode_with_schema(&dv.msgpack, schema),
        _ => Ok(Value::Null),
    }
}

fn encode_dynamic(value: &Value, schema: &Schema) -> Result<proto::DynamicValue, ProviderError> {
    Ok(proto::DynamicValue {
        msgpack: encode_with_schema(value, schema)?,
        json: Vec::new(),
    })
}

fn same_payload(a: Option<&proto::DynamicValue>, b: Option<&proto::DynamicValue>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.msgpack == b.msgpack,
        _ => false,
    }
}

#[tonic::async_trait]
impl<P: ProviderHandler> ProviderGrpc for PluginGrpcService<P> {
    #[instrument(skip(self, _request), name = "grpc.get_provider_schema")]
    async fn get_provider_schema(
        &self,
        _request: tonic::Request<proto::get_provider_schema::Request>,
    ) -> Result<tonic::Response<proto::get_provider_schema::Response>, tonic::Status> {
        debug!("GetProviderSchema called");
        let response = proto::get_provider_schema::Response {
            provider: Some(self.provider.schema().to_proto()),
            resource_schemas: self
                .resources
                .iter()
                .map(|(name, resource)| (name.clone(), resource.schema().to_proto()))
                .collect(),
            data_source_schemas: self
                .data_sources
                .iter()
                .map(|(name, data_source)| (name.clone(), data_source.schema().to_proto()))
                .collect(),
            diagnostics: Vec::new(),
        };
        info!(
            resources = response.resource_schemas.len(),
            data_sources = response.data_source_schemas.len(),
            "GetProviderSchema completed"
        );
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip(self, request), name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: tonic::Request<proto::validate_provider_config::Request>,
    ) -> Result<tonic::Response<proto::validate_provider_config::Response>, tonic::Status> {
        let req = request.into_inner();
        debug!("ValidateProviderConfig called");
        let mut diagnostics = Diagnostics::new();
        match self
            .do_validate_provider_config(&req, &mut diagnostics)
            .await
        {
            Ok(()) => {
                info!(
                    diagnostics = diagnostics.len(),
                    "ValidateProviderConfig completed"
                );
            }
            Err(ProviderError::Diagnostic(d)) => {
                warn!(summary = %d.summary, "ValidateProviderConfig failed with a diagnostic");
                diagnostics.push(d);
            }
            Err(e) => {
                error!(error = %e, "ValidateProviderConfig failed");
                return Err(e.into());
            }
        }
        Ok(tonic::Response::new(
            proto::validate_provider_config::Response {
                diagnostics: diagnostics.to_proto(),
            },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.configure_provider")]
    async fn configure_provider(
        &self,
        request: tonic::Request<proto::configure_provider::Request>,
    ) -> Result<tonic::Response<proto::configure_provider::Response>, tonic::Status> {
        let req = request.into_inner();
        debug!(terraform_version = %req.terraform_version, "ConfigureProvider called");
        let mut diagnostics = Diagnostics::new();
        match self.do_configure_provider(&req, &mut diagnostics).await {
            Ok(()) => {
                info!("ConfigureProvider completed");
            }
            Err(ProviderError::Diagnostic(d)) => {
                warn!(summary = %d.summary, "ConfigureProvider failed with a diagnostic");
                diagnostics.push(d);
            }
            Err(e) => {
                error!(error = %e, "ConfigureProvider failed");
                return Err(e.into());
            }
        }
        Ok(tonic::Response::new(proto::configure_provider::Response {
            diagnostics: diagnostics.to_proto(),
        }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        request: tonic::Request<proto::validate_resource_config::Request>,
    ) -> Result<tonic::Response<proto::validate_resource_config::Response>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ValidateResourceConfig called");
        let mut diagnostics = Diagnostics::new();
        match self
            .do_validate_resource_config(&req, &mut diagnostics)
            .await
        {
            Ok(()) => {
                info!(
                    type_name = %req.type_name,
                    diagnostics = diagnostics.len(),
                    "ValidateResourceConfig completed"
                );
            }
            Err(ProviderError::Diagnostic(d)) => {
                warn!(type_name = %req.type_name, summary = %d.summary, "ValidateResourceConfig failed with a diagnostic");
                diagnostics.push(d);
            }
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "ValidateResourceConfig failed");
                return Err(e.into());
            }
        }
        Ok(tonic::Response::new(
            proto::validate_resource_config::Response {
                diagnostics: diagnostics.to_proto(),
            },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.validate_data_resource_config")]
    async fn validate_data_resource_config(
        &self,
        request: tonic::Request<proto::validate_data_resource_config::Request>,
    ) -> Result<tonic::Response<proto::validate_data_resource_config::Response>, tonic::Status>
    {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ValidateDataResourceConfig called");
        let mut diagnostics = Diagnostics::new();
        match self
            .do_validate_data_resource_config(&req, &mut diagnostics)
            .await
        {
            Ok(()) => {
                info!(
                    type_name = %req.type_name,
                    diagnostics = diagnostics.len(),
                    "ValidateDataResourceConfig completed"
                );
            }
            Err(ProviderError::Diagnostic(d)) => {
                warn!(type_name = %req.type_name, summary = %d.summary, "ValidateDataResourceConfig failed with a diagnostic");
                diagnostics.push(d);
            }
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "ValidateDataResourceConfig failed");
                return Err(e.into());
            }
        }
        Ok(tonic::Response::new(
            proto::validate_data_resource_config::Response {
                diagnostics: diagnostics.to_proto(),
            },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        request: tonic::Request<proto::upgrade_resource_state::Request>,
    ) -> Result<tonic::Response<proto::upgrade_resource_state::Response>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, version = req.version, "UpgradeResourceState called");
        // Pass-through: state written by this SDK is already current.
        Ok(tonic::Response::new(
            proto::upgrade_resource_state::Response {
                upgraded_state: Some(proto::DynamicValue {
                    msgpack: Vec::new(),
                    json: req.raw_state.map(|raw| raw.json).unwrap_or_default(),
                }),
                diagnostics: Vec::new(),
            },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.read_resource")]
    async fn read_resource(
        &self,
        request: tonic::Request<proto::read_resource::Request>,
    ) -> Result<tonic::Response<proto::read_resource::Response>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ReadResource called");
        let mut diagnostics = Diagnostics::new();
        let new_state = match self.do_read_resource(&req, &mut diagnostics).await {
            Ok(state) => {
                debug!(type_name = %req.type_name, "ReadResource completed");
                Some(state)
            }
            Err(ProviderError::Diagnostic(d)) => {
                warn!(type_name = %req.type_name, summary = %d.summary, "ReadResource failed with a diagnostic");
                diagnostics.push(d);
                None
            }
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "ReadResource failed");
                return Err(e.into());
            }
        };
        Ok(tonic::Response::new(proto::read_resource::Response {
            new_state,
            diagnostics: diagnostics.to_proto(),
        }))
    }

    #[instrument(skip(self, request), name = "grpc.plan_resource_change")]
    async fn plan_resource_change(
        &self,
        request: tonic::Request<proto::plan_resource_change::Request>,
    ) -> Result<tonic::Response<proto::plan_resource_change::Response>, tonic::Status> {
        let req = request.into_inner();
        debug!(
            type_name = %req.type_name,
            is_create = req.prior_state.as_ref().map(|dv| dv.msgpack.is_empty()).unwrap_or(true),
            "PlanResourceChange called"
        );
        let mut diagnostics = Diagnostics::new();
        let mut tracker = ReplacementTracker::new();
        let planned_state = match self
            .do_plan_resource_change(&req, &mut diagnostics, &mut tracker)
            .await
        {
            Ok(state) => {
                info!(
                    type_name = %req.type_name,
                    requires_replace = tracker.paths().len(),
                    "PlanResourceChange completed"
                );
                Some(state)
            }
            Err(ProviderError::Diagnostic(d)) => {
                warn!(type_name = %req.type_name, summary = %d.summary, "PlanResourceChange failed with a diagnostic");
                diagnostics.push(d);
                None
            }
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "PlanResourceChange failed");
                return Err(e.into());
            }
        };
        Ok(tonic::Response::new(proto::plan_resource_change::Response {
            planned_state,
            requires_replace: tracker.paths().iter().map(path_to_proto).collect(),
            diagnostics: diagnostics.to_proto(),
        }))
    }

    #[instrument(skip(self, request), name = "grpc.apply_resource_change")]
    async fn apply_resource_change(
        &self,
        request: tonic::Request<proto::apply_resource_change::Request>,
    ) -> Result<tonic::Response<proto::apply_resource_change::Response>, tonic::Status> {
        let req = request.into_inner();
        info!(type_name = %req.type_name, "ApplyResourceChange called");
        let mut diagnostics = Diagnostics::new();
        let new_state = match self.do_apply_resource_change(&req, &mut diagnostics).await {
            Ok(state) => {
                info!(type_name = %req.type_name, "ApplyResourceChange completed");
                Some(state)
            }
            Err(ProviderError::Diagnostic(d)) => {
                warn!(type_name = %req.type_name, summary = %d.summary, "ApplyResourceChange failed with a diagnostic");
                diagnostics.push(d);
                None
            }
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "ApplyResourceChange failed");
                return Err(e.into());
            }
        };
        Ok(tonic::Response::new(proto::apply_resource_change::Response {
            new_state,
            diagnostics: diagnostics.to_proto(),
        }))
    }

    #[instrument(skip(self, request), name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: tonic::Request<proto::import_resource_state::Request>,
    ) -> Result<tonic::Response<proto::import_resource_state::Response>, tonic::Status> {
        let req = request.into_inner();
        info!(type_name = %req.type_name, id = %req.id, "ImportResourceState called");
        let mut diagnostics = Diagnostics::new();
        let imported_resources = match self
            .do_import_resource_state(&req, &mut diagnostics)
            .await
        {
            Ok(imported) => {
                info!(
                    type_name = %req.type_name,
                    id = %req.id,
                    imported = imported.len(),
                    "ImportResourceState completed"
                );
                imported
            }
            Err(ProviderError::Diagnostic(d)) => {
                warn!(type_name = %req.type_name, id = %req.id, summary = %d.summary, "ImportResourceState failed with a diagnostic");
                diagnostics.push(d);
                Vec::new()
            }
            Err(e) => {
                error!(type_name = %req.type_name, id = %req.id, error = %e, "ImportResourceState failed");
                return Err(e.into());
            }
        };
        Ok(tonic::Response::new(
            proto::import_resource_state::Response {
                imported_resources,
                diagnostics: diagnostics.to_proto(),
            },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: tonic::Request<proto::read_data_source::Request>,
    ) -> Result<tonic::Response<proto::read_data_source::Response>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ReadDataSource called");
        let mut diagnostics = Diagnostics::new();
        let state = match self.do_read_data_source(&req, &mut diagnostics).await {
            Ok(state) => {
                info!(type_name = %req.type_name, "ReadDataSource completed");
                Some(state)
            }
            Err(ProviderError::Diagnostic(d)) => {
                warn!(type_name = %req.type_name, summary = %d.summary, "ReadDataSource failed with a diagnostic");
                diagnostics.push(d);
                None
            }
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "ReadDataSource failed");
                return Err(e.into());
            }
        };
        Ok(tonic::Response::new(proto::read_data_source::Response {
            state,
            diagnostics: diagnostics.to_proto(),
        }))
    }
}

/// Health service: a plugin that answers is serving.
struct PluginHealth;

#[tonic::async_trait]
impl Health for PluginHealth {
    async fn check(
        &self,
        _request: tonic::Request<HealthCheckRequest>,
    ) -> Result<tonic::Response<HealthCheckResponse>, tonic::Status> {
        Ok(tonic::Response::new(HealthCheckResponse {
            status: ServingStatus::Serving as i32,
        }))
    }
}

/// Controller service: the host tells the plugin to exit.
struct PluginController;

#[tonic::async_trait]
impl GrpcController for PluginController {
    async fn shutdown(
        &self,
        _request: tonic::Request<Empty>,
    ) -> Result<tonic::Response<Empty>, tonic::Status> {
        info!("shutdown requested by host");
        std::process::exit(0);
    }
}

/// Stdio service: logs go to stderr, so the stream stays empty.
struct PluginStdio;

#[tonic::async_trait]
impl GrpcStdio for PluginStdio {
    type StreamStdioStream = tokio_stream::Empty<Result<StdioData, tonic::Status>>;

    async fn stream_stdio(
        &self,
        _request: tonic::Request<Empty>,
    ) -> Result<tonic::Response<Self::StreamStdioStream>, tonic::Status> {
        Ok(tonic::Response::new(tokio_stream::empty()))
    }
}

/// Serve a plugin with the Terraform defaults (protocol 6, Terraform magic
/// cookie, mutual TLS).
pub async fn serve<P: ProviderHandler>(plugin: Plugin<P>) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(plugin, ServeOptions::default()).await
}

/// Serve a plugin with custom options.
pub async fn serve_with_options<P: ProviderHandler>(
    plugin: Plugin<P>,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(cookie) = &options.magic_cookie {
        if !cookie.matches(std::env::var(&cookie.name).ok().as_deref()) {
            eprintln!("{}", COOKIE_MISMATCH_MESSAGE);
            std::process::exit(1);
        }
    }

    let mut tls = None;
    let mut certificate_base64 = None;
    if options.mtls {
        let client_cert = std::env::var(CLIENT_CERT_ENV)
            .map_err(|_| format!("no client certificate provided in {}", CLIENT_CERT_ENV))?;
        let identity = generate_identity()?;
        tls = Some(
            ServerTlsConfig::new()
                .identity(identity.identity)
                .client_ca_root(Certificate::from_pem(client_cert)),
        );
        certificate_base64 = Some(identity.certificate_base64);
    }

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    // The one line the host parses to find us. Everything else stays off
    // stdout.
    println!(
        "{}",
        handshake_line(
            options.api_protocol_version,
            addr,
            certificate_base64.as_deref()
        )
    );

    info!(address = %addr, mtls = options.mtls, "plugin server starting");

    let service = PluginGrpcService::new(plugin);
    let mut builder = Server::builder();
    if let Some(tls) = tls {
        builder = builder.tls_config(tls)?;
    }
    builder
        .add_service(ProviderServer::new(service))
        .add_service(GrpcControllerServer::new(PluginController))
        .add_service(HealthServer::new(PluginHealth))
        .add_service(GrpcStdioServer::new(PluginStdio))
        .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
        .await?;

    info!("plugin server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_line_without_certificate() {
        let addr: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        assert_eq!(handshake_line(6, addr, None), "1|6|tcp|127.0.0.1:12345|grpc");
    }

    #[test]
    fn test_handshake_line_with_certificate() {
        let addr: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        assert_eq!(
            handshake_line(6, addr, Some("ABC")),
            "1|6|tcp|127.0.0.1:12345|grpc|ABC"
        );
    }

    #[test]
    fn test_magic_cookie_matching() {
        let cookie = MagicCookie::terraform();
        assert!(!cookie.matches(None));
        assert!(!cookie.matches(Some("wrong")));
        assert!(cookie.matches(Some(TERRAFORM_MAGIC_COOKIE_VALUE)));
    }

    #[test]
    fn test_serve_options_defaults() {
        let options = ServeOptions::default();
        assert_eq!(options.api_protocol_version, 6);
        assert!(options.mtls);
        let cookie = options.magic_cookie.unwrap();
        assert_eq!(cookie.name, TERRAFORM_MAGIC_COOKIE_NAME);

        let options = ServeOptions::new()
            .with_api_protocol_version(7)
            .without_magic_cookie()
            .without_mtls();
        assert_eq!(options.api_protocol_version, 7);
        assert!(options.magic_cookie.is_none());
        assert!(!options.mtls);
    }

    #[test]
    fn test_generated_identity_is_fresh_and_unpadded() {
        let a = generate_identity().unwrap();
        let b = generate_identity().unwrap();
        assert_ne!(a.certificate_base64, b.certificate_base64);
        assert!(!a.certificate_base64.contains('='));
        assert!(!a.certificate_base64.is_empty());
    }

    #[test]
    fn test_same_payload() {
        let dv = |bytes: &[u8]| proto::DynamicValue {
            msgpack: bytes.to_vec(),
            json: Vec::new(),
        };
        assert!(same_payload(Some(&dv(b"abc")), Some(&dv(b"abc"))));
        assert!(!same_payload(Some(&dv(b"abc")), Some(&dv(b"abd"))));
        assert!(!same_payload(None, Some(&dv(b"abc"))));
        assert!(!same_payload(None, None));
    }
}

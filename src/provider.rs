//! Provider handlers and the plugin registry.
//!
//! A [`ProviderHandler`] owns the provider-level schema and produces the
//! configured state every resource and data source callback later reads. A
//! [`Plugin`] collects the provider together with its named resources and
//! data sources; [`serve`](crate::server::serve) turns it into a running
//! plugin process.
//!
//! The configured state is written exactly once, when the host issues
//! `ConfigureProvider`, and read by every later call. Ownership is explicit:
//! each plugin instance carries its own state cell, so several providers can
//! coexist in one process without aliasing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::datasource::DataSourceHandler;
use crate::diagnostics::Diagnostics;
use crate::error::ProviderError;
use crate::resource::ResourceHandler;
use crate::schema::Schema;
use crate::value::Value;

/// Callbacks for the provider itself.
#[async_trait]
pub trait ProviderHandler: Send + Sync + 'static {
    /// The configured state shared with every resource and data source
    /// callback, typically an authenticated API client.
    type State: Send + Sync + 'static;

    /// The schema describing the provider's configuration attributes.
    fn schema(&self) -> &Schema;

    /// Extra validation beyond the schema walk.
    async fn validate(
        &self,
        config: &Value,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), ProviderError> {
        let _ = (config, diagnostics);
        Ok(())
    }

    /// Configure the provider, producing the state for later calls.
    async fn configure(
        &self,
        config: Value,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self::State, ProviderError>;
}

/// A provider bundled with its resources and data sources, ready to serve.
///
/// Resource and data source names are prefixed with the provider name, so a
/// plugin named `statusphere` registering a resource `status` exposes the
/// type `statusphere_status`.
pub struct Plugin<P: ProviderHandler> {
    pub(crate) name: String,
    pub(crate) provider: P,
    pub(crate) resources: HashMap<String, Arc<dyn ResourceHandler<State = P::State>>>,
    pub(crate) data_sources: HashMap<String, Arc<dyn DataSourceHandler<State = P::State>>>,
}

impl<P: ProviderHandler> Plugin<P> {
    /// Create a plugin for the given provider name.
    pub fn new(name: impl Into<String>, provider: P) -> Self {
        Self {
            name: name.into(),
            provider,
            resources: HashMap::new(),
            data_sources: HashMap::new(),
        }
    }

    /// Register a resource type under `<provider>_<name>`.
    pub fn with_resource(
        mut self,
        name: &str,
        resource: impl ResourceHandler<State = P::State>,
    ) -> Self {
        self.resources
            .insert(format!("{}_{}", self.name, name), Arc::new(resource));
        self
    }

    /// Register a data source type under `<provider>_<name>`.
    pub fn with_data_source(
        mut self,
        name: &str,
        data_source: impl DataSourceHandler<State = P::State>,
    ) -> Self {
        self.data_sources
            .insert(format!("{}_{}", self.name, name), Arc::new(data_source));
        self
    }

    /// The provider name used as the type-name prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registered resource type names.
    pub fn resource_types(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// The registered data source type names.
    pub fn data_source_types(&self) -> Vec<&str> {
        self.data_sources.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{CreateRequest, DeleteRequest, ReadRequest, UpdateRequest};
    use crate::schema::Attribute;

    struct NullProvider {
        schema: Schema,
    }

    #[async_trait]
    impl ProviderHandler for NullProvider {
        type State = ();

        fn schema(&self) -> &Schema {
            &self.schema
        }

        async fn configure(
            &self,
            _config: Value,
            _diagnostics: &mut Diagnostics,
        ) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct NullResource {
        schema: Schema,
    }

    #[async_trait]
    impl ResourceHandler for NullResource {
        type State = ();

        fn schema(&self) -> &Schema {
            &self.schema
        }

        async fn create(
            &self,
            request: CreateRequest,
            _state: &(),
            _diagnostics: &mut Diagnostics,
        ) -> Result<Value, ProviderError> {
            Ok(request.config)
        }

        async fn read(
            &self,
            request: ReadRequest,
            _state: &(),
            _diagnostics: &mut Diagnostics,
        ) -> Result<Value, ProviderError> {
            Ok(request.saved_state)
        }

        async fn update(
            &self,
            request: UpdateRequest,
            _state: &(),
            _diagnostics: &mut Diagnostics,
        ) -> Result<Value, ProviderError> {
            Ok(request.config)
        }

        async fn delete(
            &self,
            _request: DeleteRequest,
            _state: &(),
            _diagnostics: &mut Diagnostics,
        ) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[test]
    fn test_registered_names_are_prefixed() {
        let plugin = Plugin::new(
            "statusphere",
            NullProvider {
                schema: Schema::new(),
            },
        )
        .with_resource(
            "status",
            NullResource {
                schema: Schema::new().with_attribute("text", Attribute::required_string()),
            },
        );

        assert_eq!(plugin.resource_types(), vec!["statusphere_status"]);
        assert!(plugin.data_source_types().is_empty());
    }
}

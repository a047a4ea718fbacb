//! Data source handlers.
//!
//! A [`DataSourceHandler`] binds a schema to the read callback for one data
//! source type. Data sources are read-only: the dispatch layer only ever
//! validates their configuration and reads them.

use async_trait::async_trait;

use crate::diagnostics::Diagnostics;
use crate::error::ProviderError;
use crate::schema::Schema;
use crate::value::Value;

/// Request for reading a data source.
#[derive(Debug, Clone)]
pub struct DataReadRequest {
    /// The practitioner's configuration, decoded against the schema.
    pub config: Value,
}

/// Callbacks for one data source type.
#[async_trait]
pub trait DataSourceHandler: Send + Sync + 'static {
    /// The provider's configured state type.
    type State: Send + Sync + 'static;

    /// The schema describing this data source's attributes.
    fn schema(&self) -> &Schema;

    /// Extra validation beyond the schema walk. Runs before the provider is
    /// configured, so it only sees the configuration itself.
    async fn validate(
        &self,
        config: &Value,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), ProviderError> {
        let _ = (config, diagnostics);
        Ok(())
    }

    /// Read the data source and return its state.
    async fn read(
        &self,
        request: DataReadRequest,
        state: &Self::State,
        diagnostics: &mut Diagnostics,
    ) -> Result<Value, ProviderError>;
}

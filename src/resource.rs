//! Resource handlers.
//!
//! A [`ResourceHandler`] binds a schema to the user-supplied callbacks for
//! one managed resource type. The dispatch layer decodes every payload
//! through the state codec, runs validation and plan preprocessing, and only
//! then invokes these callbacks.
//!
//! All callbacks receive the provider's configured state (the value produced
//! by [`ProviderHandler::configure`](crate::provider::ProviderHandler::configure));
//! the host guarantees configuration happens first. Cancellation of the
//! surrounding RPC drops the callback future, which cancels any outbound
//! request it is awaiting.

use async_trait::async_trait;

use crate::diagnostics::Diagnostics;
use crate::error::ProviderError;
use crate::schema::Schema;
use crate::value::Value;

/// Request for creating a resource.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// The practitioner's configuration, decoded against the schema.
    pub config: Value,
}

/// Request for updating a resource in place.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// The practitioner's configuration.
    pub config: Value,
    /// The state recorded after the previous apply.
    pub prior_state: Value,
}

/// Request for deleting a resource.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    /// The state recorded after the previous apply.
    pub prior_state: Value,
}

/// Request for refreshing a resource's state.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// The state as last saved by the host.
    pub saved_state: Value,
}

/// Request for importing existing infrastructure.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    /// The external identifier supplied on the command line.
    pub resource_id: String,
}

/// Request for refining a plan.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    /// The practitioner's configuration.
    pub config: Value,
    /// Prior state, absent when the resource is being created.
    pub prior_state: Option<Value>,
    /// The proposed state after schema preprocessing (computed attributes
    /// filled from prior state or marked unknown).
    pub proposed_new_state: Value,
    /// Whether the host sent byte-identical prior and proposed payloads.
    pub proposed_new_state_is_prior_state: bool,
}

/// Callbacks for one managed resource type.
///
/// `create`, `read`, `update`, and `delete` are mandatory; `validate`,
/// `plan`, and `import` have no-op defaults.
#[async_trait]
pub trait ResourceHandler: Send + Sync + 'static {
    /// The provider's configured state type.
    type State: Send + Sync + 'static;

    /// The schema describing this resource's attributes.
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

    /// Refine the preprocessed plan, typically by resetting computed
    /// attributes to unknown when their inputs changed. Returning `Ok(None)`
    /// keeps the preprocessed state as the planned state.
    async fn plan(
        &self,
        request: PlanRequest,
        state: &Self::State,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<Value>, ProviderError> {
        let _ = (request, state, diagnostics);
        Ok(None)
    }

    /// Create the resource remotely and return its new state.
    async fn create(
        &self,
        request: CreateRequest,
        state: &Self::State,
        diagnostics: &mut Diagnostics,
    ) -> Result<Value, ProviderError>;

    /// Read the resource's current remote state. Return
    /// [`ProviderError::RemoteResourceNotFound`] when it no longer exists;
    /// the dispatch layer reports that as a deletion, not an error.
    async fn read(
        &self,
        request: ReadRequest,
        state: &Self::State,
        diagnostics: &mut Diagnostics,
    ) -> Result<Value, ProviderError>;

    /// Update the resource in place and return its new state.
    async fn update(
        &self,
        request: UpdateRequest,
        state: &Self::State,
        diagnostics: &mut Diagnostics,
    ) -> Result<Value, ProviderError>;

    /// Delete the resource remotely.
    async fn delete(
        &self,
        request: DeleteRequest,
        state: &Self::State,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), ProviderError>;

    /// Import existing infrastructure by its external identifier, returning
    /// its current state. Returning `Ok(None)` reports that this resource
    /// type does not support importing.
    async fn import(
        &self,
        request: ImportRequest,
        state: &Self::State,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<Value>, ProviderError> {
        let _ = (request, state, diagnostics);
        Ok(None)
    }
}

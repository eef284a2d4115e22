//! The RPC dispatcher.
//!
//! Providers implement [`ProviderService`] using framework [`Value`]s.
//! [`ProviderServer`] sits between the orchestrator's protocol messages
//! and that trait: it resolves the schema for each request, decodes
//! payloads, runs validation, plan transformation and apply
//! classification, and encodes the results.
//!
//! Every handler collects diagnostics as it goes and returns as soon as an
//! error diagnostic has been recorded.
//!
//! # Cancellation
//!
//! Each request registers with the server's [`CancelRegistry`] for as long
//! as it runs. `StopProvider` cancels every registered request; cancelled
//! requests return a `Cancelled` diagnostic. Requests started after the
//! stop register fresh handles.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::apply::{self, ApplyOperation};
use crate::diag::{Diagnostic, Diagnostics};
use crate::error::ProviderError;
use crate::path::Path;
use crate::plan;
use crate::proto::{self, DynamicValue};
use crate::schema::{ProviderSchema, Schema};
use crate::types::{ImportedResource, ModifyPlanRequest, ModifyPlanResponse};
use crate::validation::validate_config;
use crate::value::Value;
use crate::wire::WireValue;

/// Trait that provider implementations must implement.
///
/// Values handed to these methods are already decoded with the schema of
/// the resource or data source and carry its types.
///
/// # Example
///
/// ```ignore
/// use hemmer_provider_framework::{ProviderError, ProviderSchema, ProviderService, Value};
/// use hemmer_provider_framework::diag::Diagnostics;
/// use hemmer_provider_framework::schema::{Attribute, Schema};
///
/// struct MyProvider;
///
/// #[async_trait::async_trait]
/// impl ProviderService for MyProvider {
///     fn schema(&self) -> ProviderSchema {
///         ProviderSchema::new().with_resource(
///             "example_resource",
///             Schema::v0().with_attribute("name", Attribute::required_string()),
///         )
///     }
///
///     async fn configure(&self, _config: Value) -> Result<Diagnostics, ProviderError> {
///         Ok(Diagnostics::new())
///     }
///
///     // ... implement the resource methods
/// }
/// ```
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Return the provider's schema including all resources and data sources.
    ///
    /// Called once, when the server is created.
    fn schema(&self) -> ProviderSchema;

    /// Validate the provider configuration beyond what the schema checks.
    async fn validate_provider_config(&self, config: &Value) -> Result<Diagnostics, ProviderError> {
        let _ = config;
        Ok(Diagnostics::new())
    }

    /// Configure the provider with credentials and settings.
    async fn configure(&self, config: Value) -> Result<Diagnostics, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Validate a resource's configuration beyond what the schema checks.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: &Value,
    ) -> Result<Diagnostics, ProviderError> {
        let _ = (resource_type, config);
        Ok(Diagnostics::new())
    }

    /// Upgrade resource state written with an older schema version.
    ///
    /// The returned JSON must match the current schema.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Adjust a plan after computed attributes were marked unknown.
    ///
    /// Also called when destroying, with a null planned state.
    async fn modify_plan(
        &self,
        resource_type: &str,
        request: ModifyPlanRequest,
    ) -> Result<ModifyPlanResponse, ProviderError> {
        let _ = resource_type;
        Ok(ModifyPlanResponse::unchanged(request.planned_state))
    }

    /// Create a new resource. The returned state must be wholly known.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Read the current state of a resource. Return a null value when the
    /// resource no longer exists.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update an existing resource. The returned state must be wholly known.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, prior_state: Value) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }

    /// Validate a data source's configuration beyond what the schema checks.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: &Value,
    ) -> Result<Diagnostics, ProviderError> {
        let _ = (data_source_type, config);
        Ok(Diagnostics::new())
    }

    /// Read data from an external source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!(
            "Unknown data source type: {}",
            data_source_type
        )))
    }
}

/// A registered request's view of cancellation.
#[derive(Debug, Clone)]
pub struct CancelHandle(watch::Receiver<bool>);

impl CancelHandle {
    /// Whether the request has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until the request is cancelled.
    pub async fn cancelled(&mut self) {
        let closed = self.0.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            // Dropped without cancelling: never resolves.
            std::future::pending::<()>().await;
        }
    }
}

/// Cancellation handles of the requests in flight.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    senders: Mutex<Vec<watch::Sender<bool>>>,
}

impl CancelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn senders(&self) -> MutexGuard<'_, Vec<watch::Sender<bool>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request. Handles of finished requests are dropped here.
    pub fn register(&self) -> CancelHandle {
        let (tx, rx) = watch::channel(false);
        let mut senders = self.senders();
        senders.retain(|tx| !tx.is_closed());
        senders.push(tx);
        CancelHandle(rx)
    }

    /// Cancel every registered request and clear the registry. Returns the
    /// number of requests still waiting.
    pub fn cancel_all(&self) -> usize {
        let senders = std::mem::take(&mut *self.senders());
        let mut cancelled = 0;
        for tx in senders.iter().filter(|tx| !tx.is_closed()) {
            tx.send_replace(true);
            cancelled += 1;
        }
        cancelled
    }

    /// Number of registered requests still running.
    pub fn len(&self) -> usize {
        self.senders().iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Whether no registered request is still running.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Options for [`ProviderServer`].
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Refuse to create the server when a schema has implementation errors.
    /// Otherwise the errors are reported by `GetSchema` and every request
    /// that needs a schema.
    pub reject_invalid_schemas: bool,
}

impl ServerOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether invalid schemas are rejected at creation.
    pub fn with_reject_invalid_schemas(mut self, reject: bool) -> Self {
        self.reject_invalid_schemas = reject;
        self
    }
}

/// A handler stopped after recording an error diagnostic.
struct Halt;

type Step<T> = Result<T, Halt>;

fn take<T>(diags: &mut Diagnostics, result: Result<T, Diagnostics>) -> Step<T> {
    result.map_err(|errs| {
        diags.append(errs);
        Halt
    })
}

fn take_provider<T>(diags: &mut Diagnostics, result: Result<T, ProviderError>) -> Step<T> {
    result.map_err(|err| {
        error!(error = %err, "provider returned an error");
        diags.push(err.to_diagnostic());
        Halt
    })
}

fn merge(diags: &mut Diagnostics, more: Diagnostics) -> Step<()> {
    diags.append(more);
    if diags.has_error() {
        Err(Halt)
    } else {
        Ok(())
    }
}

fn log_outcome(operation: &str, type_name: &str, diags: &Diagnostics) {
    if diags.has_error() {
        warn!(
            type_name,
            diagnostics = diags.len(),
            "{} completed with errors",
            operation
        );
    } else {
        info!(type_name, "{} completed successfully", operation);
    }
}

/// Serves a [`ProviderService`] over the protocol messages in
/// [`proto`](crate::proto).
pub struct ProviderServer<P: ProviderService> {
    provider: P,
    schema: ProviderSchema,
    schema_diagnostics: Diagnostics,
    cancel: CancelRegistry,
}

impl<P: ProviderService> ProviderServer<P> {
    /// Create a server, registering and validating the provider's schema.
    pub fn new(provider: P) -> Self {
        let schema = provider.schema();
        let schema_diagnostics = schema.validate_implementation();
        for diag in schema_diagnostics.errors() {
            warn!(summary = %diag.summary, "provider schema has an implementation error");
        }
        Self {
            provider,
            schema,
            schema_diagnostics,
            cancel: CancelRegistry::new(),
        }
    }

    /// Create a server with options.
    pub fn with_options(provider: P, options: ServerOptions) -> Result<Self, Diagnostics> {
        let server = Self::new(provider);
        if options.reject_invalid_schemas && server.schema_diagnostics.has_error() {
            return Err(server.schema_diagnostics);
        }
        Ok(server)
    }

    /// The provider implementation.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The registered schema.
    pub fn schema(&self) -> &ProviderSchema {
        &self.schema
    }

    /// Problems found in the registered schema.
    pub fn schema_diagnostics(&self) -> &Diagnostics {
        &self.schema_diagnostics
    }

    /// The registry of requests in flight.
    pub fn cancel_registry(&self) -> &CancelRegistry {
        &self.cancel
    }

    /// Run a provider call, returning early when the request is cancelled.
    async fn cancellable<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        let mut handle = self.cancel.register();
        tokio::select! {
            result = call => result,
            _ = handle.cancelled() => {
                Err(ProviderError::Cancelled("the provider was asked to stop".to_string()))
            },
        }
    }

    fn check_schemas(&self) -> Result<(), Diagnostics> {
        if self.schema_diagnostics.has_error() {
            return Err(self.schema_diagnostics.clone());
        }
        Ok(())
    }

    fn resource_schema(&self, type_name: &str) -> Result<&Schema, Diagnostics> {
        self.check_schemas()?;
        self.schema.resources.get(type_name).ok_or_else(|| {
            Diagnostic::error("Resource Type Not Found")
                .with_detail(format!(
                    "The resource type {:?} was not found. This is always an issue with the \
                     provider and should be reported to the provider developers.",
                    type_name
                ))
                .into()
        })
    }

    fn data_source_schema(&self, type_name: &str) -> Result<&Schema, Diagnostics> {
        self.check_schemas()?;
        self.schema.data_sources.get(type_name).ok_or_else(|| {
            Diagnostic::error("Data Source Type Not Found")
                .with_detail(format!(
                    "The data source type {:?} was not found. This is always an issue with the \
                     provider and should be reported to the provider developers.",
                    type_name
                ))
                .into()
        })
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Return every schema of the provider.
    #[instrument(skip(self), name = "rpc.get_schema")]
    pub async fn get_schema(&self) -> proto::GetSchemaResponse {
        debug!("GetSchema called");
        let response = proto::GetSchemaResponse {
            provider: Some(proto::Schema::from(&self.schema.provider)),
            resource_schemas: self
                .schema
                .resources
                .iter()
                .map(|(name, schema)| (name.clone(), proto::Schema::from(schema)))
                .collect(),
            data_source_schemas: self
                .schema
                .data_sources
                .iter()
                .map(|(name, schema)| (name.clone(), proto::Schema::from(schema)))
                .collect(),
            diagnostics: proto::diagnostics_to_proto(&self.schema_diagnostics),
        };
        info!(
            resources = response.resource_schemas.len(),
            data_sources = response.data_source_schemas.len(),
            "GetSchema completed"
        );
        response
    }

    // =========================================================================
    // Provider lifecycle
    // =========================================================================

    /// Validate the provider configuration.
    #[instrument(skip(self, request), name = "rpc.validate_provider_config")]
    pub async fn validate_provider_config(
        &self,
        request: proto::ProviderConfigRequest,
    ) -> proto::DiagnosticsResponse {
        debug!("ValidateProviderConfig called");
        let mut diags = Diagnostics::new();
        let _ = self.validate_provider_config_inner(&request, &mut diags).await;
        log_outcome("ValidateProviderConfig", "provider", &diags);
        proto::DiagnosticsResponse {
            diagnostics: proto::diagnostics_to_proto(&diags),
        }
    }

    async fn validate_provider_config_inner(
        &self,
        request: &proto::ProviderConfigRequest,
        diags: &mut Diagnostics,
    ) -> Step<()> {
        take(diags, self.check_schemas())?;
        let schema = &self.schema.provider;
        let config = take(diags, decode(schema, &request.config, "Configuration"))?;
        merge(diags, validate_config(schema, &config))?;
        let more = self
            .cancellable(self.provider.validate_provider_config(&config))
            .await;
        let more = take_provider(diags, more)?;
        merge(diags, more)
    }

    /// Configure the provider.
    #[instrument(skip(self, request), name = "rpc.configure_provider")]
    pub async fn configure_provider(
        &self,
        request: proto::ProviderConfigRequest,
    ) -> proto::DiagnosticsResponse {
        debug!("ConfigureProvider called");
        let mut diags = Diagnostics::new();
        let _ = self.configure_provider_inner(&request, &mut diags).await;
        log_outcome("ConfigureProvider", "provider", &diags);
        proto::DiagnosticsResponse {
            diagnostics: proto::diagnostics_to_proto(&diags),
        }
    }

    async fn configure_provider_inner(
        &self,
        request: &proto::ProviderConfigRequest,
        diags: &mut Diagnostics,
    ) -> Step<()> {
        take(diags, self.check_schemas())?;
        let config = take(diags, decode(&self.schema.provider, &request.config, "Configuration"))?;
        let more = self.cancellable(self.provider.configure(config)).await;
        let more = take_provider(diags, more)?;
        merge(diags, more)
    }

    /// Cancel every request in flight and stop the provider.
    #[instrument(skip(self), name = "rpc.stop_provider")]
    pub async fn stop_provider(&self) -> proto::StopProviderResponse {
        let cancelled = self.cancel.cancel_all();
        info!(cancelled, "StopProvider called");
        match self.provider.stop().await {
            Ok(()) => {
                info!("StopProvider completed successfully");
                proto::StopProviderResponse::default()
            },
            Err(e) => {
                error!(error = %e, "StopProvider failed");
                proto::StopProviderResponse {
                    error: e.to_string(),
                }
            },
        }
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Validate a resource configuration.
    #[instrument(skip(self, request), fields(type_name = %request.type_name), name = "rpc.validate_resource_config")]
    pub async fn validate_resource_config(
        &self,
        request: proto::ValidateConfigRequest,
    ) -> proto::DiagnosticsResponse {
        debug!("ValidateResourceConfig called");
        let mut diags = Diagnostics::new();
        let _ = self.validate_resource_config_inner(&request, &mut diags).await;
        log_outcome("ValidateResourceConfig", &request.type_name, &diags);
        proto::DiagnosticsResponse {
            diagnostics: proto::diagnostics_to_proto(&diags),
        }
    }

    async fn validate_resource_config_inner(
        &self,
        request: &proto::ValidateConfigRequest,
        diags: &mut Diagnostics,
    ) -> Step<()> {
        let schema = take(diags, self.resource_schema(&request.type_name))?;
        let config = take(diags, decode(schema, &request.config, "Configuration"))?;
        if let Some(message) = &schema.deprecation_message {
            diags.add_warning("Resource Deprecated", message.clone());
        }
        merge(diags, validate_config(schema, &config))?;
        let more = self
            .cancellable(self.provider.validate_resource_config(&request.type_name, &config))
            .await;
        let more = take_provider(diags, more)?;
        merge(diags, more)
    }

    /// Upgrade stored state to the current schema version.
    #[instrument(skip(self, request), fields(type_name = %request.type_name, version = request.version), name = "rpc.upgrade_resource_state")]
    pub async fn upgrade_resource_state(
        &self,
        request: proto::UpgradeResourceStateRequest,
    ) -> proto::UpgradeResourceStateResponse {
        debug!("UpgradeResourceState called");
        let mut diags = Diagnostics::new();
        let state = self.upgrade_resource_state_inner(&request, &mut diags).await.ok();
        log_outcome("UpgradeResourceState", &request.type_name, &diags);
        proto::UpgradeResourceStateResponse {
            upgraded_state: state.as_ref().map(DynamicValue::from_value),
            diagnostics: proto::diagnostics_to_proto(&diags),
        }
    }

    async fn upgrade_resource_state_inner(
        &self,
        request: &proto::UpgradeResourceStateRequest,
        diags: &mut Diagnostics,
    ) -> Step<Value> {
        let schema = take(diags, self.resource_schema(&request.type_name))?;
        if request.raw_state_json.is_empty() {
            return Ok(schema.null_value());
        }
        if request.version > schema.version {
            diags.add_error(
                "Unable to Upgrade Resource State",
                format!(
                    "The stored state was written with schema version {}, which is newer than \
                     the provider's schema version {}. Use a newer provider version.",
                    request.version, schema.version
                ),
            );
            return Err(Halt);
        }

        let raw: serde_json::Value = take(
            diags,
            serde_json::from_slice(&request.raw_state_json).map_err(|e| {
                Diagnostics::from(
                    Diagnostic::error("Unable to Read Previously Saved State for UpgradeResourceState")
                        .with_detail(format!(
                            "There was an error reading the saved resource state using the current \
                             resource schema.\n\nError: {}",
                            e
                        )),
                )
            }),
        )?;

        let upgraded = if request.version == schema.version {
            raw
        } else {
            debug!(from = request.version, to = schema.version, "calling provider upgrade");
            let result = self
                .cancellable(self.provider.upgrade_resource_state(
                    &request.type_name,
                    request.version,
                    raw,
                ))
                .await;
            take_provider(diags, result)?
        };

        take(
            diags,
            WireValue::from_json(&schema.terraform_type(), &upgraded)
                .and_then(|raw| schema.value_from_terraform(&raw))
                .map_err(|e| e.to_diagnostic("Unable to Convert Upgraded Resource State").into()),
        )
    }

    /// Refresh a resource's state.
    #[instrument(skip(self, request), fields(type_name = %request.type_name), name = "rpc.read_resource")]
    pub async fn read_resource(&self, request: proto::ReadResourceRequest) -> proto::ReadResponse {
        debug!("ReadResource called");
        let mut diags = Diagnostics::new();
        let state = self.read_resource_inner(&request, &mut diags).await.ok();
        log_outcome("ReadResource", &request.type_name, &diags);
        proto::ReadResponse {
            state: state.as_ref().map(DynamicValue::from_value),
            diagnostics: proto::diagnostics_to_proto(&diags),
        }
    }

    async fn read_resource_inner(
        &self,
        request: &proto::ReadResourceRequest,
        diags: &mut Diagnostics,
    ) -> Step<Value> {
        let schema = take(diags, self.resource_schema(&request.type_name))?;
        let current = take(diags, decode(schema, &request.current_state, "Current State"))?;
        if current.is_null() {
            return Ok(current);
        }

        let result = self
            .cancellable(self.provider.read(&request.type_name, current))
            .await;
        match result {
            Err(ProviderError::NotFound(msg)) => {
                debug!(reason = %msg, "resource no longer exists, removing from state");
                Ok(schema.null_value())
            },
            other => {
                let state = take_provider(diags, other)?;
                take(diags, check_returned(schema, &state, "read"))?;
                Ok(state)
            },
        }
    }

    /// Plan a change to a resource.
    ///
    /// Unset computed attributes are marked unknown whenever the plan
    /// differs from the prior state, then the resource may adjust the plan.
    #[instrument(skip(self, request), fields(type_name = %request.type_name), name = "rpc.plan_resource_change")]
    pub async fn plan_resource_change(
        &self,
        request: proto::PlanResourceChangeRequest,
    ) -> proto::PlanResourceChangeResponse {
        debug!("PlanResourceChange called");
        let mut diags = Diagnostics::new();
        let result = self.plan_resource_change_inner(&request, &mut diags).await.ok();
        log_outcome("PlanResourceChange", &request.type_name, &diags);

        let (planned, requires_replace) = result.unzip();
        proto::PlanResourceChangeResponse {
            planned_state: planned.as_ref().map(DynamicValue::from_value),
            requires_replace: requires_replace
                .unwrap_or_default()
                .iter()
                .map(proto::AttributePath::from)
                .collect(),
            diagnostics: proto::diagnostics_to_proto(&diags),
        }
    }

    async fn plan_resource_change_inner(
        &self,
        request: &proto::PlanResourceChangeRequest,
        diags: &mut Diagnostics,
    ) -> Step<(Value, Vec<Path>)> {
        let schema = take(diags, self.resource_schema(&request.type_name))?;
        let config = take(diags, decode(schema, &request.config, "Configuration"))?;
        let prior = take(diags, decode(schema, &request.prior_state, "Prior State"))?;
        let mut planned = take(
            diags,
            decode(schema, &request.proposed_new_state, "Proposed New State"),
        )?;

        if !planned.is_null() && planned != prior {
            debug!("marking computed null config values as unknown in plan");
            let modified = plan::mark_computed_nulls_as_unknown(schema, &planned, &config)
                .map_err(|e| {
                    Diagnostics::from(Diagnostic::error("Error modifying plan").with_detail(format!(
                        "There was an unexpected error updating the plan. This is always a \
                         problem with the provider. Please report the following to the provider \
                         developer:\n\n{}",
                        e
                    )))
                });
            let modified = take(diags, modified)?;
            if modified != planned {
                debug!("at least one computed null config value was changed to unknown");
            }
            planned = modified;
        }

        let mut requires_replace = plan::requires_replace(schema, &prior, &planned);

        let modify = ModifyPlanRequest {
            config,
            prior_state: prior,
            planned_state: planned,
        };
        let result = self
            .cancellable(self.provider.modify_plan(&request.type_name, modify))
            .await;
        let response = take_provider(diags, result)?;
        merge(diags, response.diagnostics)?;
        take(diags, check_returned(schema, &response.planned_state, "plan"))?;
        requires_replace.extend(response.requires_replace);

        Ok((
            response.planned_state,
            plan::normalize_requires_replace(requires_replace),
        ))
    }

    /// Apply a planned change to a resource.
    #[instrument(skip(self, request), fields(type_name = %request.type_name), name = "rpc.apply_resource_change")]
    pub async fn apply_resource_change(
        &self,
        request: proto::ApplyResourceChangeRequest,
    ) -> proto::ApplyResourceChangeResponse {
        debug!("ApplyResourceChange called");
        let mut diags = Diagnostics::new();
        let state = self.apply_resource_change_inner(&request, &mut diags).await.ok();
        log_outcome("ApplyResourceChange", &request.type_name, &diags);
        proto::ApplyResourceChangeResponse {
            new_state: state.as_ref().map(DynamicValue::from_value),
            diagnostics: proto::diagnostics_to_proto(&diags),
        }
    }

    async fn apply_resource_change_inner(
        &self,
        request: &proto::ApplyResourceChangeRequest,
        diags: &mut Diagnostics,
    ) -> Step<Value> {
        let schema = take(diags, self.resource_schema(&request.type_name))?;
        let prior = take(diags, decode(schema, &request.prior_state, "Prior State"))?;
        let planned = take(diags, decode(schema, &request.planned_state, "Planned State"))?;

        let operation = take(
            diags,
            apply::classify(&prior, &planned).map_err(|e| e.to_diagnostic().into()),
        )?;
        info!(operation = %operation, "applying resource change");

        let type_name = request.type_name.as_str();
        let new_state = match operation {
            ApplyOperation::Create => {
                let result = self.cancellable(self.provider.create(type_name, planned)).await;
                take_provider(diags, result)?
            },
            ApplyOperation::Update => {
                let result = self
                    .cancellable(self.provider.update(type_name, prior, planned))
                    .await;
                take_provider(diags, result)?
            },
            ApplyOperation::Delete => {
                let result = self.cancellable(self.provider.delete(type_name, prior)).await;
                take_provider(diags, result)?;
                schema.null_value()
            },
        };

        take(diags, check_returned(schema, &new_state, "apply"))?;
        if let Some(diag) = apply::check_new_state(operation, &new_state) {
            diags.push(diag);
            return Err(Halt);
        }
        Ok(new_state)
    }

    /// Import existing resources by identifier.
    #[instrument(skip(self, request), fields(type_name = %request.type_name), name = "rpc.import_resource_state")]
    pub async fn import_resource_state(
        &self,
        request: proto::ImportResourceStateRequest,
    ) -> proto::ImportResourceStateResponse {
        debug!(id = %request.id, "ImportResourceState called");
        let mut diags = Diagnostics::new();
        let imported = self
            .import_resource_state_inner(&request, &mut diags)
            .await
            .unwrap_or_default();
        log_outcome("ImportResourceState", &request.type_name, &diags);
        proto::ImportResourceStateResponse {
            imported_resources: imported
                .iter()
                .map(|resource| proto::ImportedResource {
                    type_name: resource.resource_type.clone(),
                    state: Some(DynamicValue::from_value(&resource.state)),
                })
                .collect(),
            diagnostics: proto::diagnostics_to_proto(&diags),
        }
    }

    async fn import_resource_state_inner(
        &self,
        request: &proto::ImportResourceStateRequest,
        diags: &mut Diagnostics,
    ) -> Step<Vec<ImportedResource>> {
        take(diags, self.resource_schema(&request.type_name).map(|_| ()))?;
        let result = self
            .cancellable(self.provider.import_resource(&request.type_name, &request.id))
            .await;
        let imported = take_provider(diags, result)?;

        for resource in &imported {
            match self.resource_schema(&resource.resource_type) {
                Ok(schema) => {
                    if let Err(errs) = check_returned(schema, &resource.state, "import") {
                        diags.append(errs);
                        continue;
                    }
                },
                Err(errs) => {
                    diags.append(errs);
                    continue;
                },
            }
            if resource.state.is_null() {
                diags.add_error(
                    "Missing Resource Import State",
                    format!(
                        "An unexpected error was encountered when importing the resource. This is \
                         always a problem with the provider. Please give the following information \
                         to the provider developer:\n\nResource ImportState method returned no \
                         state for {:?}.",
                        resource.resource_type
                    ),
                );
            }
        }
        if diags.has_error() {
            return Err(Halt);
        }
        Ok(imported)
    }

    // =========================================================================
    // Data sources
    // =========================================================================

    /// Validate a data source configuration.
    #[instrument(skip(self, request), fields(type_name = %request.type_name), name = "rpc.validate_data_source_config")]
    pub async fn validate_data_source_config(
        &self,
        request: proto::ValidateConfigRequest,
    ) -> proto::DiagnosticsResponse {
        debug!("ValidateDataSourceConfig called");
        let mut diags = Diagnostics::new();
        let _ = self
            .validate_data_source_config_inner(&request, &mut diags)
            .await;
        log_outcome("ValidateDataSourceConfig", &request.type_name, &diags);
        proto::DiagnosticsResponse {
            diagnostics: proto::diagnostics_to_proto(&diags),
        }
    }

    async fn validate_data_source_config_inner(
        &self,
        request: &proto::ValidateConfigRequest,
        diags: &mut Diagnostics,
    ) -> Step<()> {
        let schema = take(diags, self.data_source_schema(&request.type_name))?;
        let config = take(diags, decode(schema, &request.config, "Configuration"))?;
        if let Some(message) = &schema.deprecation_message {
            diags.add_warning("Data Source Deprecated", message.clone());
        }
        merge(diags, validate_config(schema, &config))?;
        let more = self
            .cancellable(
                self.provider
                    .validate_data_source_config(&request.type_name, &config),
            )
            .await;
        let more = take_provider(diags, more)?;
        merge(diags, more)
    }

    /// Read a data source.
    #[instrument(skip(self, request), fields(type_name = %request.type_name), name = "rpc.read_data_source")]
    pub async fn read_data_source(&self, request: proto::ReadDataSourceRequest) -> proto::ReadResponse {
        debug!("ReadDataSource called");
        let mut diags = Diagnostics::new();
        let state = self.read_data_source_inner(&request, &mut diags).await.ok();
        log_outcome("ReadDataSource", &request.type_name, &diags);
        proto::ReadResponse {
            state: state.as_ref().map(DynamicValue::from_value),
            diagnostics: proto::diagnostics_to_proto(&diags),
        }
    }

    async fn read_data_source_inner(
        &self,
        request: &proto::ReadDataSourceRequest,
        diags: &mut Diagnostics,
    ) -> Step<Value> {
        let schema = take(diags, self.data_source_schema(&request.type_name))?;
        let config = take(diags, decode(schema, &request.config, "Configuration"))?;
        let result = self
            .cancellable(self.provider.read_data_source(&request.type_name, config))
            .await;
        let state = take_provider(diags, result)?;
        take(diags, check_returned(schema, &state, "read"))?;
        if state.contains_unknown() {
            diags.add_error(
                "Provider returned invalid result object after read",
                "The data source returned unknown values. All values must be known after a read, \
                 so this is always a problem with the provider and should be reported to the \
                 provider developers.",
            );
            return Err(Halt);
        }
        Ok(state)
    }
}

/// Decode an optional payload with a schema. A missing payload is null.
fn decode(schema: &Schema, payload: &Option<DynamicValue>, what: &str) -> Result<Value, Diagnostics> {
    let Some(payload) = payload else {
        return Ok(schema.null_value());
    };
    payload
        .to_value(&schema.attribute_type())
        .map_err(|e| e.to_diagnostic(&format!("Unable to Convert {}", what)).into())
}

/// Reject a provider-returned value whose type differs from the schema's.
fn check_returned(schema: &Schema, value: &Value, after: &str) -> Result<(), Diagnostics> {
    let expected = schema.attribute_type();
    if value.ty() == &expected {
        return Ok(());
    }
    error!(expected = %expected, got = %value.ty(), "provider returned a value of the wrong type");
    let summary = if after == "plan" {
        "Provider produced invalid plan".to_string()
    } else {
        format!("Provider returned invalid result object after {}", after)
    };
    Err(Diagnostic::error(summary)
        .with_detail(format!(
            "The provider returned a value of type {}, but the schema declares {}. This is always \
             a problem with the provider and should be reported to the provider developers.",
            value.ty(),
            expected
        ))
        .into())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::schema::{Attribute, AttributeFlags};
    use crate::value::AttributeType;

    #[derive(Default)]
    struct TestProvider {
        creates: AtomicUsize,
        deletes: AtomicUsize,
    }

    fn resource_schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("zone", Attribute::optional_string().with_requires_replace())
            .with_attribute(
                "size",
                Attribute::new(AttributeType::Int64, AttributeFlags::optional_computed()),
            )
    }

    fn with_id(state: &Value, id: &str) -> Value {
        let AttributeType::Object(types) = state.ty() else {
            return state.clone();
        };
        let mut attrs: BTreeMap<String, Value> = state.entries().cloned().unwrap_or_default();
        attrs.insert("id".to_string(), Value::string(id));
        if attrs.get("size").is_some_and(Value::is_unknown) {
            attrs.insert("size".to_string(), Value::int64(1));
        }
        Value::object(types.clone(), attrs).unwrap_or_else(|_| state.clone())
    }

    #[async_trait::async_trait]
    impl ProviderService for TestProvider {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new()
                .with_provider_config(
                    Schema::v0().with_attribute("region", Attribute::optional_string()),
                )
                .with_resource("test_instance", resource_schema())
                .with_data_source(
                    "test_lookup",
                    Schema::v0()
                        .with_attribute("name", Attribute::required_string())
                        .with_attribute("value", Attribute::computed_string()),
                )
        }

        async fn configure(&self, _config: Value) -> Result<Diagnostics, ProviderError> {
            Ok(Diagnostics::new())
        }

        async fn create(&self, _resource_type: &str, planned: Value) -> Result<Value, ProviderError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(with_id(&planned, "i-123"))
        }

        async fn read(&self, _resource_type: &str, current: Value) -> Result<Value, ProviderError> {
            if current.attribute("name").and_then(Value::as_str) == Some("gone") {
                return Err(ProviderError::NotFound("gone".to_string()));
            }
            Ok(current)
        }

        async fn update(
            &self,
            _resource_type: &str,
            prior: Value,
            planned: Value,
        ) -> Result<Value, ProviderError> {
            let id = prior.attribute("id").and_then(Value::as_str).unwrap_or("i-new");
            Ok(with_id(&planned, id))
        }

        async fn delete(&self, _resource_type: &str, _prior: Value) -> Result<(), ProviderError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn read_data_source(
            &self,
            _data_source_type: &str,
            config: Value,
        ) -> Result<Value, ProviderError> {
            let AttributeType::Object(types) = config.ty().clone() else {
                return Err(ProviderError::InvalidRequest("not an object".to_string()));
            };
            let mut attrs = config.entries().cloned().unwrap_or_default();
            attrs.insert("value".to_string(), Value::string("found"));
            Value::object(types, attrs).map_err(|e| ProviderError::Framework(e.to_string()))
        }
    }

    struct SlowProvider;

    #[async_trait::async_trait]
    impl ProviderService for SlowProvider {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new().with_resource("test_instance", resource_schema())
        }

        async fn configure(&self, _config: Value) -> Result<Diagnostics, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Diagnostics::new())
        }

        async fn create(&self, _: &str, planned: Value) -> Result<Value, ProviderError> {
            Ok(planned)
        }

        async fn read(&self, _: &str, current: Value) -> Result<Value, ProviderError> {
            Ok(current)
        }

        async fn update(&self, _: &str, _: Value, planned: Value) -> Result<Value, ProviderError> {
            Ok(planned)
        }

        async fn delete(&self, _: &str, _: Value) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct BadSchemaProvider;

    #[async_trait::async_trait]
    impl ProviderService for BadSchemaProvider {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new().with_resource(
                "test_instance",
                Schema::v0().with_attribute("depends_on", Attribute::optional_string()),
            )
        }

        async fn configure(&self, _config: Value) -> Result<Diagnostics, ProviderError> {
            Ok(Diagnostics::new())
        }

        async fn create(&self, _: &str, planned: Value) -> Result<Value, ProviderError> {
            Ok(planned)
        }

        async fn read(&self, _: &str, current: Value) -> Result<Value, ProviderError> {
            Ok(current)
        }

        async fn update(&self, _: &str, _: Value, planned: Value) -> Result<Value, ProviderError> {
            Ok(planned)
        }

        async fn delete(&self, _: &str, _: Value) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct WrongTypeProvider;

    #[async_trait::async_trait]
    impl ProviderService for WrongTypeProvider {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new()
                .with_resource("test_instance", resource_schema())
                .with_data_source(
                    "test_lookup",
                    Schema::v0().with_attribute("name", Attribute::required_string()),
                )
        }

        async fn configure(&self, _config: Value) -> Result<Diagnostics, ProviderError> {
            Ok(Diagnostics::new())
        }

        async fn create(&self, _: &str, _: Value) -> Result<Value, ProviderError> {
            Ok(Value::string("oops"))
        }

        async fn read(&self, _: &str, _: Value) -> Result<Value, ProviderError> {
            Ok(Value::string("oops"))
        }

        async fn update(&self, _: &str, _: Value, planned: Value) -> Result<Value, ProviderError> {
            Ok(planned)
        }

        async fn delete(&self, _: &str, _: Value) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn read_data_source(&self, _: &str, _: Value) -> Result<Value, ProviderError> {
            Ok(Value::int64(7))
        }
    }

    fn dv(json: serde_json::Value) -> Option<DynamicValue> {
        Some(DynamicValue::from_json(&json))
    }

    fn decode_state(schema: &Schema, payload: &Option<DynamicValue>) -> Value {
        payload
            .as_ref()
            .unwrap()
            .to_value(&schema.attribute_type())
            .unwrap()
    }

    fn summaries(diags: &[proto::Diagnostic]) -> Vec<String> {
        diags.iter().map(|d| d.summary.clone()).collect()
    }

    #[tokio::test]
    async fn test_get_schema() {
        let server = ProviderServer::new(TestProvider::default());
        let resp = server.get_schema().await;

        assert!(resp.diagnostics.is_empty());
        assert!(resp.provider.is_some());
        assert!(resp.resource_schemas.contains_key("test_instance"));
        assert!(resp.data_source_schemas.contains_key("test_lookup"));
    }

    #[tokio::test]
    async fn test_invalid_schema_is_reported_and_blocks_requests() {
        let server = ProviderServer::new(BadSchemaProvider);
        let resp = server.get_schema().await;
        assert_eq!(summaries(&resp.diagnostics), vec!["Reserved Root Attribute/Block Name"]);

        let resp = server
            .plan_resource_change(proto::PlanResourceChangeRequest {
                type_name: "test_instance".to_string(),
                ..Default::default()
            })
            .await;
        assert_eq!(summaries(&resp.diagnostics), vec!["Reserved Root Attribute/Block Name"]);
        assert!(resp.planned_state.is_none());

        let rejected = ProviderServer::with_options(
            BadSchemaProvider,
            ServerOptions::new().with_reject_invalid_schemas(true),
        );
        assert!(rejected.is_err());
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let server = ProviderServer::new(TestProvider::default());
        let resp = server
            .validate_resource_config(proto::ValidateConfigRequest {
                type_name: "test_instance".to_string(),
                config: dv(json!({"name": null, "id": null, "zone": null, "size": null})),
            })
            .await;
        assert_eq!(
            summaries(&resp.diagnostics),
            vec!["Missing Configuration for Required Attribute"]
        );

        let resp = server
            .validate_resource_config(proto::ValidateConfigRequest {
                type_name: "test_unknown".to_string(),
                config: None,
            })
            .await;
        assert_eq!(summaries(&resp.diagnostics), vec!["Resource Type Not Found"]);
    }

    #[tokio::test]
    async fn test_plan_create_marks_computed_unknown() {
        let server = ProviderServer::new(TestProvider::default());
        let proposed = json!({"name": "web", "id": null, "zone": "a", "size": null});
        let resp = server
            .plan_resource_change(proto::PlanResourceChangeRequest {
                type_name: "test_instance".to_string(),
                prior_state: None,
                proposed_new_state: dv(proposed.clone()),
                config: dv(proposed),
            })
            .await;

        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert!(resp.requires_replace.is_empty());

        let planned = decode_state(&resource_schema(), &resp.planned_state);
        assert!(planned.attribute("id").unwrap().is_unknown());
        assert!(planned.attribute("size").unwrap().is_unknown());
        assert_eq!(planned.attribute("zone").unwrap(), &Value::string("a"));
    }

    #[tokio::test]
    async fn test_plan_without_changes_is_untouched() {
        let server = ProviderServer::new(TestProvider::default());
        let state = json!({"name": "web", "id": "i-1", "zone": "a", "size": null});
        let resp = server
            .plan_resource_change(proto::PlanResourceChangeRequest {
                type_name: "test_instance".to_string(),
                prior_state: dv(state.clone()),
                proposed_new_state: dv(state.clone()),
                config: dv(json!({"name": "web", "id": null, "zone": "a", "size": null})),
            })
            .await;

        let planned = decode_state(&resource_schema(), &resp.planned_state);
        assert!(planned.attribute("size").unwrap().is_null());
    }

    #[tokio::test]
    async fn test_plan_update_requires_replace() {
        let server = ProviderServer::new(TestProvider::default());
        let resp = server
            .plan_resource_change(proto::PlanResourceChangeRequest {
                type_name: "test_instance".to_string(),
                prior_state: dv(json!({"name": "web", "id": "i-1", "zone": "a", "size": 1})),
                proposed_new_state: dv(json!({"name": "web", "id": "i-1", "zone": "b", "size": 1})),
                config: dv(json!({"name": "web", "id": null, "zone": "b", "size": 1})),
            })
            .await;

        assert!(resp.diagnostics.is_empty());
        let paths: Vec<Path> = resp.requires_replace.iter().map(Path::from).collect();
        assert_eq!(paths, vec![Path::root("zone")]);
    }

    #[tokio::test]
    async fn test_apply_create_update_delete() {
        let server = ProviderServer::new(TestProvider::default());
        let schema = resource_schema();

        let resp = server
            .apply_resource_change(proto::ApplyResourceChangeRequest {
                type_name: "test_instance".to_string(),
                prior_state: None,
                planned_state: Some(DynamicValue {
                    json: br#"{"name":"web","id":null,"zone":null,"size":2}"#.to_vec(),
                    unknown_paths: vec![proto::AttributePath::from(&Path::root("id"))],
                }),
                config: dv(json!({"name": "web", "id": null, "zone": null, "size": 2})),
            })
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        let created = decode_state(&schema, &resp.new_state);
        assert_eq!(created.attribute("id").unwrap(), &Value::string("i-123"));
        assert_eq!(server.provider().creates.load(Ordering::SeqCst), 1);

        let state = json!({"name": "web", "id": "i-123", "zone": null, "size": 2});
        let resp = server
            .apply_resource_change(proto::ApplyResourceChangeRequest {
                type_name: "test_instance".to_string(),
                prior_state: dv(state.clone()),
                planned_state: dv(json!({"name": "api", "id": "i-123", "zone": null, "size": 2})),
                config: None,
            })
            .await;
        let updated = decode_state(&schema, &resp.new_state);
        assert_eq!(updated.attribute("name").unwrap(), &Value::string("api"));

        let resp = server
            .apply_resource_change(proto::ApplyResourceChangeRequest {
                type_name: "test_instance".to_string(),
                prior_state: dv(state),
                planned_state: None,
                config: None,
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert!(decode_state(&schema, &resp.new_state).is_null());
        assert_eq!(server.provider().deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_returned_state_of_wrong_type_is_rejected() {
        let server = ProviderServer::new(WrongTypeProvider);
        let state = json!({"name": "web", "id": null, "zone": null, "size": 2});

        let resp = server
            .apply_resource_change(proto::ApplyResourceChangeRequest {
                type_name: "test_instance".to_string(),
                prior_state: None,
                planned_state: dv(state.clone()),
                config: dv(state.clone()),
            })
            .await;
        assert_eq!(
            summaries(&resp.diagnostics),
            vec!["Provider returned invalid result object after apply"]
        );
        assert!(resp.new_state.is_none());

        let resp = server
            .read_resource(proto::ReadResourceRequest {
                type_name: "test_instance".to_string(),
                current_state: dv(state),
            })
            .await;
        assert_eq!(
            summaries(&resp.diagnostics),
            vec!["Provider returned invalid result object after read"]
        );
        assert!(resp.state.is_none());

        let resp = server
            .read_data_source(proto::ReadDataSourceRequest {
                type_name: "test_lookup".to_string(),
                config: dv(json!({"name": "web"})),
            })
            .await;
        assert_eq!(
            summaries(&resp.diagnostics),
            vec!["Provider returned invalid result object after read"]
        );
        assert!(resp.state.is_none());
    }

    #[tokio::test]
    async fn test_apply_with_both_states_null_is_rejected() {
        let server = ProviderServer::new(TestProvider::default());
        let resp = server
            .apply_resource_change(proto::ApplyResourceChangeRequest {
                type_name: "test_instance".to_string(),
                ..Default::default()
            })
            .await;
        assert_eq!(summaries(&resp.diagnostics), vec!["Error understanding request"]);
        assert!(resp.new_state.is_none());
        assert_eq!(server.provider().creates.load(Ordering::SeqCst), 0);
        assert_eq!(server.provider().deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_read_resource_that_is_gone() {
        let server = ProviderServer::new(TestProvider::default());
        let resp = server
            .read_resource(proto::ReadResourceRequest {
                type_name: "test_instance".to_string(),
                current_state: dv(json!({"name": "gone", "id": "i-1", "zone": null, "size": 1})),
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert!(decode_state(&resource_schema(), &resp.state).is_null());
    }

    #[tokio::test]
    async fn test_upgrade_resource_state() {
        let server = ProviderServer::new(TestProvider::default());
        let resp = server
            .upgrade_resource_state(proto::UpgradeResourceStateRequest {
                type_name: "test_instance".to_string(),
                version: 0,
                raw_state_json: br#"{"name":"web","id":"i-1","zone":null,"size":1}"#.to_vec(),
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        let state = decode_state(&resource_schema(), &resp.upgraded_state);
        assert_eq!(state.attribute("id").unwrap(), &Value::string("i-1"));

        let resp = server
            .upgrade_resource_state(proto::UpgradeResourceStateRequest {
                type_name: "test_instance".to_string(),
                version: 3,
                raw_state_json: b"{}".to_vec(),
            })
            .await;
        assert_eq!(summaries(&resp.diagnostics), vec!["Unable to Upgrade Resource State"]);
    }

    #[tokio::test]
    async fn test_import_not_supported() {
        let server = ProviderServer::new(TestProvider::default());
        let resp = server
            .import_resource_state(proto::ImportResourceStateRequest {
                type_name: "test_instance".to_string(),
                id: "i-1".to_string(),
            })
            .await;
        assert!(resp.imported_resources.is_empty());
        assert!(resp.diagnostics[0].summary.starts_with("Unimplemented"));
    }

    #[tokio::test]
    async fn test_read_data_source() {
        let server = ProviderServer::new(TestProvider::default());
        let resp = server
            .read_data_source(proto::ReadDataSourceRequest {
                type_name: "test_lookup".to_string(),
                config: dv(json!({"name": "x", "value": null})),
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        let schema = &server.schema().data_sources["test_lookup"];
        let state = decode_state(schema, &resp.state);
        assert_eq!(state.attribute("value").unwrap(), &Value::string("found"));
    }

    #[tokio::test]
    async fn test_stop_cancels_requests_in_flight() {
        let server = std::sync::Arc::new(ProviderServer::new(SlowProvider));

        let running = {
            let server = std::sync::Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .configure_provider(proto::ProviderConfigRequest { config: None })
                    .await
            })
        };

        while server.cancel_registry().is_empty() {
            tokio::task::yield_now().await;
        }

        let stop = server.stop_provider().await;
        assert!(stop.error.is_empty());

        let resp = running.await.unwrap();
        assert_eq!(resp.diagnostics.len(), 1);
        assert!(resp.diagnostics[0].summary.starts_with("Cancelled"));
        assert!(server.cancel_registry().is_empty());
    }

    #[test]
    fn test_cancel_registry() {
        let registry = CancelRegistry::new();
        let first = registry.register();
        let second = registry.register();
        assert_eq!(registry.len(), 2);

        drop(second);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.cancel_all(), 1);
        assert!(first.is_cancelled());
        assert!(registry.is_empty());

        let fresh = registry.register();
        assert!(!fresh.is_cancelled());
    }

    #[test]
    fn test_cancel_handle_wakes() {
        let registry = CancelRegistry::new();
        let mut handle = registry.register();
        registry.cancel_all();
        tokio_test::block_on(handle.cancelled());
        assert!(handle.is_cancelled());
    }
}

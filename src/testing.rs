//! Testing utilities for provider implementations.
//!
//! [`ProviderTester`] drives a [`ProviderService`] through the same
//! [`ProviderServer`] pipeline the orchestrator uses: payloads are encoded,
//! decoded with the schema, validated, planned and classified. Fixtures are
//! plain JSON documents.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_framework::testing::ProviderTester;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_resource() {
//!     let tester = ProviderTester::new(MyProvider::new());
//!     tester.configure(json!({"api_key": "test"})).await.unwrap();
//!
//!     let state = tester
//!         .lifecycle_create("my_resource", json!({"name": "test-resource", "id": null}))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(state["name"], "test-resource");
//! }
//! ```

use std::fmt;

use serde_json::Value as Json;

use crate::diag::{Diagnostic, Diagnostics};
use crate::error::ConversionError;
use crate::path::Path;
use crate::proto::{self, DynamicValue};
use crate::schema::{Attribute, ProviderSchema, Schema};
use crate::server::{ProviderServer, ProviderService};
use crate::value::Value;

/// A planned change returned by [`ProviderTester::plan`].
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// The planned state, unknown values included.
    pub planned_state: Value,
    /// Attributes whose change forces replacement.
    pub requires_replace: Vec<Path>,
    /// Warnings returned with the plan.
    pub diagnostics: Diagnostics,
}

impl PlannedChange {
    /// Whether the value at `path` is unknown in the plan.
    pub fn is_unknown(&self, path: &Path) -> bool {
        self.planned_state.walk(path).is_ok_and(Value::is_unknown)
    }

    /// The planned state as JSON, with unknown values as `null`.
    pub fn planned_json(&self) -> Json {
        to_json(&self.planned_state)
    }
}

/// A test harness for provider implementations.
pub struct ProviderTester<P: ProviderService> {
    server: ProviderServer<P>,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self {
            server: ProviderServer::new(provider),
        }
    }

    /// The server requests are sent through.
    pub fn server(&self) -> &ProviderServer<P> {
        &self.server
    }

    /// The underlying provider.
    pub fn provider(&self) -> &P {
        self.server.provider()
    }

    /// The provider's schema.
    pub fn schema(&self) -> &ProviderSchema {
        self.server.schema()
    }

    fn resource_schema(&self, resource_type: &str) -> Result<&Schema, TestError> {
        self.schema().resources.get(resource_type).ok_or_else(|| {
            TestError::Diagnostics(Diagnostic::error("Resource Type Not Found").into())
        })
    }

    /// Check the provider's schemas for implementation errors.
    pub fn validate_schema(&self) -> Result<(), TestError> {
        check(self.server.schema_diagnostics().clone())
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    pub async fn validate_provider_config(&self, config: Json) -> Result<(), TestError> {
        let resp = self
            .server
            .validate_provider_config(proto::ProviderConfigRequest {
                config: Some(DynamicValue::from_json(&config)),
            })
            .await;
        check(from_proto(&resp.diagnostics))
    }

    /// Configure the provider.
    pub async fn configure(&self, config: Json) -> Result<(), TestError> {
        let resp = self
            .server
            .configure_provider(proto::ProviderConfigRequest {
                config: Some(DynamicValue::from_json(&config)),
            })
            .await;
        check(from_proto(&resp.diagnostics))
    }

    /// Stop the provider, cancelling requests in flight.
    pub async fn stop(&self) -> Result<(), TestError> {
        let resp = self.server.stop_provider().await;
        if resp.error.is_empty() {
            Ok(())
        } else {
            Err(TestError::Diagnostics(Diagnostic::error(resp.error).into()))
        }
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Json,
    ) -> Result<(), TestError> {
        let resp = self
            .server
            .validate_resource_config(proto::ValidateConfigRequest {
                type_name: resource_type.to_string(),
                config: Some(DynamicValue::from_json(&config)),
            })
            .await;
        check(from_proto(&resp.diagnostics))
    }

    /// Plan with explicit prior state, proposed state and configuration.
    /// `None` prior state means the resource does not exist yet.
    pub async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Json>,
        proposed_state: Json,
        config: Json,
    ) -> Result<PlannedChange, TestError> {
        let schema = self.resource_schema(resource_type)?;
        let resp = self
            .server
            .plan_resource_change(proto::PlanResourceChangeRequest {
                type_name: resource_type.to_string(),
                prior_state: prior_state.as_ref().map(DynamicValue::from_json),
                proposed_new_state: Some(DynamicValue::from_json(&proposed_state)),
                config: Some(DynamicValue::from_json(&config)),
            })
            .await;
        let diagnostics = from_proto(&resp.diagnostics);
        if diagnostics.has_error() {
            return Err(TestError::Diagnostics(diagnostics));
        }
        Ok(PlannedChange {
            planned_state: decode(schema, resp.planned_state.as_ref())?,
            requires_replace: resp.requires_replace.iter().map(Path::from).collect(),
            diagnostics,
        })
    }

    /// Plan a resource creation. The configuration is also the proposed state.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Json,
    ) -> Result<PlannedChange, TestError> {
        self.plan(resource_type, None, config.clone(), config).await
    }

    /// Plan a resource update.
    ///
    /// Top-level computed attributes left null in `config` keep their prior
    /// value in the proposed state.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Json,
        config: Json,
    ) -> Result<PlannedChange, TestError> {
        let proposed = propose(self.resource_schema(resource_type)?, &prior_state, &config);
        self.plan(resource_type, Some(prior_state), proposed, config)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Json,
    ) -> Result<PlannedChange, TestError> {
        self.plan(resource_type, Some(prior_state), Json::Null, Json::Null)
            .await
    }

    /// Apply a planned change. Returns the new state, `null` after a delete.
    pub async fn apply(
        &self,
        resource_type: &str,
        prior_state: Option<Json>,
        planned: &PlannedChange,
        config: Json,
    ) -> Result<Json, TestError> {
        let schema = self.resource_schema(resource_type)?;
        let resp = self
            .server
            .apply_resource_change(proto::ApplyResourceChangeRequest {
                type_name: resource_type.to_string(),
                prior_state: prior_state.as_ref().map(DynamicValue::from_json),
                planned_state: Some(DynamicValue::from_value(&planned.planned_state)),
                config: Some(DynamicValue::from_json(&config)),
            })
            .await;
        check(from_proto(&resp.diagnostics))?;
        Ok(to_json(&decode(schema, resp.new_state.as_ref())?))
    }

    /// Read the current state of a resource. Returns `null` when the
    /// resource no longer exists.
    pub async fn read(&self, resource_type: &str, current_state: Json) -> Result<Json, TestError> {
        let schema = self.resource_schema(resource_type)?;
        let resp = self
            .server
            .read_resource(proto::ReadResourceRequest {
                type_name: resource_type.to_string(),
                current_state: Some(DynamicValue::from_json(&current_state)),
            })
            .await;
        check(from_proto(&resp.diagnostics))?;
        Ok(to_json(&decode(schema, resp.state.as_ref())?))
    }

    /// Import an existing resource. Returns `(type name, state)` pairs.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<(String, Json)>, TestError> {
        let resp = self
            .server
            .import_resource_state(proto::ImportResourceStateRequest {
                type_name: resource_type.to_string(),
                id: id.to_string(),
            })
            .await;
        check(from_proto(&resp.diagnostics))?;

        let mut imported = Vec::with_capacity(resp.imported_resources.len());
        for resource in &resp.imported_resources {
            let schema = self.resource_schema(&resource.type_name)?;
            let state = decode(schema, resource.state.as_ref())?;
            imported.push((resource.type_name.clone(), to_json(&state)));
        }
        Ok(imported)
    }

    /// Upgrade state written with an older schema version.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Json,
    ) -> Result<Json, TestError> {
        let schema = self.resource_schema(resource_type)?;
        let resp = self
            .server
            .upgrade_resource_state(proto::UpgradeResourceStateRequest {
                type_name: resource_type.to_string(),
                version,
                raw_state_json: state.to_string().into_bytes(),
            })
            .await;
        check(from_proto(&resp.diagnostics))?;
        Ok(to_json(&decode(schema, resp.upgraded_state.as_ref())?))
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source configuration.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Json,
    ) -> Result<(), TestError> {
        let resp = self
            .server
            .validate_data_source_config(proto::ValidateConfigRequest {
                type_name: data_source_type.to_string(),
                config: Some(DynamicValue::from_json(&config)),
            })
            .await;
        check(from_proto(&resp.diagnostics))
    }

    /// Read data from a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Json,
    ) -> Result<Json, TestError> {
        let schema = self.schema().data_sources.get(data_source_type).ok_or_else(|| {
            TestError::Diagnostics(Diagnostic::error("Data Source Type Not Found").into())
        })?;
        let resp = self
            .server
            .read_data_source(proto::ReadDataSourceRequest {
                type_name: data_source_type.to_string(),
                config: Some(DynamicValue::from_json(&config)),
            })
            .await;
        check(from_proto(&resp.diagnostics))?;
        Ok(to_json(&decode(schema, resp.state.as_ref())?))
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Plan, create, then read. Returns the state after read.
    pub async fn lifecycle_create(&self, resource_type: &str, config: Json) -> Result<Json, TestError> {
        let planned = self.plan_create(resource_type, config.clone()).await?;
        let created = self.apply(resource_type, None, &planned, config).await?;
        self.read(resource_type, created).await
    }

    /// Plan, update, then read. Returns the state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Json,
        config: Json,
    ) -> Result<Json, TestError> {
        let planned = self
            .plan_update(resource_type, prior_state.clone(), config.clone())
            .await?;
        let updated = self
            .apply(resource_type, Some(prior_state), &planned, config)
            .await?;
        self.read(resource_type, updated).await
    }

    /// Plan, then delete.
    pub async fn lifecycle_delete(&self, resource_type: &str, prior_state: Json) -> Result<(), TestError> {
        let planned = self.plan_delete(resource_type, prior_state.clone()).await?;
        self.apply(resource_type, Some(prior_state), &planned, Json::Null)
            .await?;
        Ok(())
    }

    /// Create, update, then delete. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Json,
        updated_config: Json,
    ) -> Result<Json, TestError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, created, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }
}

fn from_proto(diagnostics: &[proto::Diagnostic]) -> Diagnostics {
    diagnostics.iter().map(Diagnostic::from).collect()
}

fn decode(schema: &Schema, payload: Option<&DynamicValue>) -> Result<Value, TestError> {
    match payload {
        Some(payload) => Ok(payload.to_value(&schema.attribute_type())?),
        None => Ok(schema.null_value()),
    }
}

fn to_json(value: &Value) -> Json {
    let mut unknowns = Vec::new();
    value
        .to_terraform_value()
        .to_json(&value.ty().terraform_type(), &mut unknowns)
}

fn propose(schema: &Schema, prior: &Json, config: &Json) -> Json {
    let (Json::Object(prior), Json::Object(config)) = (prior, config) else {
        return config.clone();
    };
    let mut proposed = config.clone();
    for (name, value) in prior {
        let computed = schema.attributes.get(name).is_some_and(Attribute::is_computed);
        let unset = proposed.get(name).map_or(true, Json::is_null);
        if computed && unset {
            proposed.insert(name.clone(), value.clone());
        }
    }
    Json::Object(proposed)
}

/// Error type for test operations.
#[derive(Debug)]
pub enum TestError {
    /// The operation returned error diagnostics.
    Diagnostics(Diagnostics),
    /// A returned payload could not be decoded with the schema.
    Conversion(ConversionError),
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    writeln!(f, "  {}", diag)?;
                }
                Ok(())
            },
            TestError::Conversion(e) => write!(f, "Conversion error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ConversionError> for TestError {
    fn from(e: ConversionError) -> Self {
        TestError::Conversion(e)
    }
}

impl TestError {
    /// The diagnostics, if the operation returned any.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            TestError::Diagnostics(diags) => Some(diags),
            TestError::Conversion(_) => None,
        }
    }
}

fn check(diagnostics: Diagnostics) -> Result<(), TestError> {
    if diagnostics.has_error() {
        Err(TestError::Diagnostics(diagnostics.errors().cloned().collect()))
    } else {
        Ok(())
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan forces replacement because of `path`.
///
/// # Panics
///
/// Panics if `path` is not among the plan's replacement paths.
pub fn assert_plan_replaces(plan: &PlannedChange, path: &Path) {
    assert!(
        plan.requires_replace.contains(path),
        "Expected plan to require replacement for {}, but got {:?}",
        path,
        plan.requires_replace.iter().map(Path::to_string).collect::<Vec<_>>()
    );
}

/// Assert that a plan does not force replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlannedChange) {
    assert!(
        plan.requires_replace.is_empty(),
        "Expected plan to update in place, but it requires replacement for {:?}",
        plan.requires_replace.iter().map(Path::to_string).collect::<Vec<_>>()
    );
}

/// Assert that the value at `path` is unknown in the plan.
///
/// # Panics
///
/// Panics if the value is known, null or absent.
pub fn assert_plan_unknown(plan: &PlannedChange, path: &Path) {
    assert!(
        plan.is_unknown(path),
        "Expected {} to be unknown in the plan, but got {:?}",
        path,
        plan.planned_state.walk(path).map(Value::to_string).ok()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &Diagnostics) {
    let errors: Vec<_> = diagnostics.errors().map(|d| &d.summary).collect();
    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors
    );
}

/// Assert that diagnostics contain at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &Diagnostics) {
    assert!(diagnostics.has_error(), "Expected at least one error, but got none");
}

/// Assert that diagnostics contain an error whose summary contains
/// `substring`.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &Diagnostics, substring: &str) {
    assert!(
        diagnostics.errors().any(|d| d.summary.contains(substring)),
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics.errors().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

//! Hemmer Provider Framework
//!
//! A schema-driven framework for writing Hemmer providers. Providers
//! describe their configuration, resources and data sources with a
//! [`Schema`](schema::Schema) and implement [`ProviderService`] over typed
//! [`Value`]s; the framework handles decoding, validation, planning and
//! apply dispatch.
//!
//! # Overview
//!
//! - **Values**: [`value`] holds the typed value model. Every value is
//!   null, unknown or known, and carries its [`AttributeType`].
//! - **Paths and expressions**: [`path`] addresses a single position in a
//!   value; [`expression`] matches sets of positions.
//! - **Schemas**: [`schema`] describes attributes, including nested
//!   attributes in single, list, set and map nesting modes. [`validation`]
//!   checks schemas and configurations.
//! - **Planning**: [`plan`] marks unset computed attributes as unknown and
//!   collects attributes that force replacement.
//! - **Apply**: [`apply`] decides whether an apply request creates, updates
//!   or deletes.
//! - **Server**: [`server`] dispatches protocol requests from [`proto`] to
//!   a [`ProviderService`], with cancellation on stop.
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_provider_framework::{
//!     diag::Diagnostics,
//!     schema::{Attribute, Schema},
//!     ProviderError, ProviderSchema, ProviderServer, ProviderService, Value,
//! };
//!
//! struct MyProvider;
//!
//! #[async_trait::async_trait]
//! impl ProviderService for MyProvider {
//!     fn schema(&self) -> ProviderSchema {
//!         ProviderSchema::new().with_resource(
//!             "example_resource",
//!             Schema::v0()
//!                 .with_attribute("name", Attribute::required_string())
//!                 .with_attribute("id", Attribute::computed_string()),
//!         )
//!     }
//!
//!     async fn configure(&self, _config: Value) -> Result<Diagnostics, ProviderError> {
//!         Ok(Diagnostics::new())
//!     }
//!
//!     async fn create(&self, _ty: &str, planned: Value) -> Result<Value, ProviderError> {
//!         // set "id" and return the new state
//!         Ok(planned)
//!     }
//!
//!     async fn read(&self, _ty: &str, current: Value) -> Result<Value, ProviderError> {
//!         Ok(current)
//!     }
//!
//!     async fn update(&self, _ty: &str, _prior: Value, planned: Value) -> Result<Value, ProviderError> {
//!         Ok(planned)
//!     }
//!
//!     async fn delete(&self, _ty: &str, _prior: Value) -> Result<(), ProviderError> {
//!         Ok(())
//!     }
//! }
//!
//! let server = ProviderServer::new(MyProvider);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod apply;
pub mod diag;
pub mod error;
pub mod expression;
pub mod logging;
pub mod path;
pub mod plan;
pub mod proto;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;
pub mod value;
pub mod wire;

// Re-export main types at crate root
pub use apply::ApplyOperation;
pub use diag::{Diagnostic, Diagnostics, Severity};
pub use error::{ConversionError, ProviderError};
pub use expression::Expression;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use path::{Path, PathStep};
pub use schema::ProviderSchema;
pub use server::{CancelHandle, CancelRegistry, ProviderServer, ProviderService, ServerOptions};
pub use types::{ImportedResource, ModifyPlanRequest, ModifyPlanResponse};
pub use validation::{is_valid, validate_config, validate_result};
pub use value::{AttributeType, Value};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;

//! Convenience types for provider implementations.
//!
//! These carry framework [`Value`]s rather than protocol messages, so
//! providers never touch the wire encoding.

use crate::diag::Diagnostics;
use crate::path::Path;
use crate::value::Value;

/// Input to a resource's plan modification.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyPlanRequest {
    /// Configuration.
    pub config: Value,
    /// Current state. Null when creating.
    pub prior_state: Value,
    /// The plan so far, with unset computed attributes already unknown.
    /// Null when destroying.
    pub planned_state: Value,
}

/// Output of a resource's plan modification.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyPlanResponse {
    /// The plan to return.
    pub planned_state: Value,
    /// Extra attributes whose change forces replacement.
    pub requires_replace: Vec<Path>,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

impl ModifyPlanResponse {
    /// Keep the plan as it is.
    pub fn unchanged(planned_state: Value) -> Self {
        Self {
            planned_state,
            requires_replace: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Mark an attribute as forcing replacement.
    pub fn with_requires_replace(mut self, path: Path) -> Self {
        self.requires_replace.push(path);
        self
    }

    /// Add diagnostics.
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics.append(diagnostics);
        self
    }
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

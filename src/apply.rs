//! Apply request classification.
//!
//! An apply request carries no explicit operation. Whether it creates,
//! updates or deletes a resource is decided from which of the prior and
//! planned states are null.

use std::fmt;

use crate::diag::Diagnostic;
use crate::error::ClassificationError;
use crate::value::Value;

/// The lifecycle operation an apply request represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOperation {
    /// No prior state.
    Create,
    /// Prior and planned state are both present.
    Update,
    /// No planned state.
    Delete,
}

impl fmt::Display for ApplyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyOperation::Create => f.write_str("create"),
            ApplyOperation::Update => f.write_str("update"),
            ApplyOperation::Delete => f.write_str("delete"),
        }
    }
}

/// Decide which operation an apply request represents.
///
/// Exactly one operation must match. Both states being null matches create
/// and delete at once, which is reported as an error.
pub fn classify(prior: &Value, planned: &Value) -> Result<ApplyOperation, ClassificationError> {
    let create = prior.is_null();
    let delete = planned.is_null();
    let update = !create && !delete;

    match (create, update, delete) {
        (true, false, false) => Ok(ApplyOperation::Create),
        (false, true, false) => Ok(ApplyOperation::Update),
        (false, false, true) => Ok(ApplyOperation::Delete),
        _ => Err(ClassificationError {
            create,
            update,
            delete,
        }),
    }
}

impl ClassificationError {
    /// The diagnostic reported when classification fails.
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error("Error understanding request").with_detail(format!(
            "An unexpected error was encountered trying to understand the type of request being \
             made. This is always an error in the provider. Please report the following to the \
             provider developer:\n\n{}",
            self
        ))
    }
}

/// Check the state returned by a create or update.
///
/// The new state must exist and be wholly known.
pub fn check_new_state(operation: ApplyOperation, new_state: &Value) -> Option<Diagnostic> {
    if operation == ApplyOperation::Delete {
        return None;
    }
    if new_state.is_null() {
        return Some(
            Diagnostic::error("Provider returned invalid result object after apply").with_detail(
                format!(
                    "After the {} operation, the provider returned a null state. This is always \
                     a problem with the provider and should be reported to the provider developers.",
                    operation
                ),
            ),
        );
    }
    if new_state.contains_unknown() {
        return Some(
            Diagnostic::error("Provider returned invalid result object after apply")
                .with_detail(format!(
                    "After the {} operation, the provider still indicated an unknown value. All \
                     values must be known after apply, so this is always a problem with the \
                     provider and should be reported to the provider developers.",
                    operation
                )),
        );
    }
    None
}

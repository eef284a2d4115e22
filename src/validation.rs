//! Schema validation.
//!
//! Two kinds of validation live here:
//!
//! - [`Schema::validate_implementation`] checks that a schema written by a
//!   provider developer is well formed. It runs once, when the schema is
//!   registered with [`ProviderServer`](crate::server::ProviderServer).
//! - [`validate_config`] checks a configuration value against a schema: required
//!   attributes are set, read-only attributes are not, and nested
//!   collections respect their item limits.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_framework::schema::{Attribute, Schema};
//! use hemmer_provider_framework::validation::{validate_config, SchemaKind};
//! use hemmer_provider_framework::value::{AttributeType, Value};
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("depends_on", Attribute::optional_string());
//!
//! let diags = schema.validate_implementation(SchemaKind::Resource);
//! assert!(diags.has_error());
//!
//! let config = Value::null(schema.attribute_type());
//! assert!(validate_config(&schema, &config).is_empty());
//! ```

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::diag::{Diagnostic, Diagnostics};
use crate::path::Path;
use crate::schema::{Attribute, AttributeKind, NestedAttributes, NestingMode, ProviderSchema, Schema};
use crate::value::{AttributeType, Value};

static VALID_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("attribute name pattern is valid"));

static VALID_NAME_CHARACTERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").expect("attribute name pattern is valid"));

const RESERVED_PROVIDER_NAMES: &[&str] = &["alias", "version"];

const RESERVED_RESOURCE_NAMES: &[&str] = &[
    "connection",
    "count",
    "depends_on",
    "for_each",
    "lifecycle",
    "provider",
    "provisioner",
];

const IMPLEMENTATION_ISSUE: &str = "an implementation issue was found. This is always an issue \
    with the provider and should be reported to the provider developers.";

/// Which kind of schema is being validated. Reserved root names differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// Provider configuration.
    Provider,
    /// A managed resource.
    Resource,
    /// A data source.
    DataSource,
}

impl SchemaKind {
    fn reserved_names(self) -> &'static [&'static str] {
        match self {
            SchemaKind::Provider => RESERVED_PROVIDER_NAMES,
            SchemaKind::Resource | SchemaKind::DataSource => RESERVED_RESOURCE_NAMES,
        }
    }

    fn description(self) -> &'static str {
        match self {
            SchemaKind::Provider => "provider",
            SchemaKind::Resource | SchemaKind::DataSource => "resource or data source",
        }
    }
}

fn implementation_error(summary: &str, detail: impl std::fmt::Display) -> Diagnostic {
    Diagnostic::error(summary).with_detail(format!(
        "When validating the schema, {}\n\n{}",
        IMPLEMENTATION_ISSUE, detail
    ))
}

impl Schema {
    /// Check that the schema itself is well formed.
    ///
    /// Every problem found is reported; an empty result means the schema
    /// can be used.
    pub fn validate_implementation(&self, kind: SchemaKind) -> Diagnostics {
        let mut diags = Diagnostics::new();
        for (name, attr) in &self.attributes {
            let path = Path::root(name.clone());
            if kind.reserved_names().contains(&name.as_str()) {
                diags.push(Diagnostic::error("Reserved Root Attribute/Block Name").with_detail(
                    format!(
                        "When validating the {} schema, {}\n\n{:?} is a reserved root attribute/block \
                         name. This is to prevent practitioners from needing special configuration \
                         syntax.",
                        kind.description(),
                        IMPLEMENTATION_ISSUE,
                        name
                    ),
                ));
            }
            validate_attribute_implementation(name, attr, &path, &mut diags);
        }
        diags
    }
}

impl ProviderSchema {
    /// Check every schema of the provider.
    pub fn validate_implementation(&self) -> Diagnostics {
        let mut diags = self.provider.validate_implementation(SchemaKind::Provider);
        for schema in self.resources.values() {
            diags.append(schema.validate_implementation(SchemaKind::Resource));
        }
        for schema in self.data_sources.values() {
            diags.append(schema.validate_implementation(SchemaKind::DataSource));
        }
        diags
    }
}

fn validate_name(name: &str, path: &Path, diags: &mut Diagnostics) {
    if VALID_NAME.is_match(name) {
        return;
    }
    let rule = if VALID_NAME_CHARACTERS.is_match(name) {
        "Names must begin with a lowercase alphabet character (a-z) and must only contain \
         lowercase alphanumeric characters (a-z, 0-9) and underscores (_)."
    } else {
        "Names must only contain lowercase alphanumeric characters (a-z, 0-9) and underscores (_)."
    };
    diags.push(implementation_error(
        "Invalid Attribute/Block Name",
        format!(
            "{:?} at schema path {:?} is an invalid attribute/block name. {}",
            name,
            path.to_string(),
            rule
        ),
    ));
}

fn validate_attribute_implementation(
    name: &str,
    attr: &Attribute,
    path: &Path,
    diags: &mut Diagnostics,
) {
    validate_name(name, path, diags);

    let flags = attr.flags;
    if !flags.required && !flags.optional && !flags.computed {
        diags.push(implementation_error(
            "Invalid Attribute Implementation",
            format!("{:?} must be marked as required, optional, or computed.", path.to_string()),
        ));
    }
    if flags.required && (flags.optional || flags.computed) {
        diags.push(implementation_error(
            "Invalid Attribute Implementation",
            format!(
                "{:?} is marked as required and cannot also be optional or computed.",
                path.to_string()
            ),
        ));
    }

    match &attr.kind {
        AttributeKind::Primitive(ty) => validate_primitive_type(ty, path, diags),
        AttributeKind::Nested(nested) => validate_nested_implementation(nested, path, diags),
    }
}

fn validate_primitive_type(ty: &AttributeType, path: &Path, diags: &mut Diagnostics) {
    if *ty == AttributeType::Missing {
        diags.push(implementation_error(
            "Invalid Attribute Implementation",
            format!("{:?} must define either a type or nested attributes.", path.to_string()),
        ));
        return;
    }
    if ty.contains_missing() {
        diags.push(implementation_error(
            "Invalid Attribute Implementation",
            format!(
                "{:?} is missing the element type on a collection attribute. \
                 The element type is required to prevent other unexpected errors or panics.",
                path.to_string()
            ),
        ));
    }
    if ty.contains_collection_with_dynamic() {
        diags.push(dynamic_in_collection(path));
    }
}

fn dynamic_in_collection(path: &Path) -> Diagnostic {
    let name = path.to_string();
    Diagnostic::error("Invalid Schema Implementation")
        .with_detail(format!(
            "When validating the schema, {}\n\n{:?} is a collection type that contains a dynamic \
             type. Dynamic types inside of collections are not currently supported. If underlying \
             dynamic values are required, replace the {:?} attribute definition with a dynamic \
             attribute instead.",
            IMPLEMENTATION_ISSUE, name, name
        ))
        .with_path(path.clone())
}

fn validate_nested_implementation(nested: &NestedAttributes, path: &Path, diags: &mut Diagnostics) {
    let name = path.to_string();

    if nested.attributes.is_empty() {
        diags.push(implementation_error(
            "Invalid Attribute Implementation",
            format!("{:?} nested attributes must define at least one attribute.", name),
        ));
    }

    if nested.nesting_mode == NestingMode::Single {
        if nested.min_items > 0 || nested.max_items > 0 {
            diags.push(implementation_error(
                "Invalid Attribute Implementation",
                format!("{:?} uses single nesting and cannot set min or max items.", name),
            ));
        }
    } else {
        if nested.max_items > 0 && nested.max_items < nested.min_items {
            diags.push(implementation_error(
                "Invalid Attribute Implementation",
                format!(
                    "{:?} has max items ({}) lower than min items ({}).",
                    name, nested.max_items, nested.min_items
                ),
            ));
        }
        if nested.object_type().contains_dynamic() {
            diags.push(dynamic_in_collection(path));
        }
    }

    for (child_name, child) in &nested.attributes {
        validate_attribute_implementation(child_name, child, &path.at_name(child_name), diags);
    }
}

/// Validate a configuration value against a schema.
///
/// # Validation Rules
///
/// - Required attributes must not be null (unknown is accepted)
/// - Computed attributes that are not optional must not be set
/// - Deprecated attributes that are set produce a warning
/// - Nested list, set and map attributes respect min/max items when known
/// - Nested objects are validated recursively
pub fn validate_config(schema: &Schema, config: &Value) -> Diagnostics {
    let mut diags = Diagnostics::new();
    validate_object(&schema.attributes, config, &Path::empty(), &mut diags);
    diags
}

/// Validate a configuration value, returning Ok if there are no errors.
pub fn validate_result(schema: &Schema, config: &Value) -> Result<(), Diagnostics> {
    let diags = validate_config(schema, config);
    if diags.has_error() {
        Err(diags)
    } else {
        Ok(())
    }
}

/// Check if a configuration value has no errors against a schema.
pub fn is_valid(schema: &Schema, config: &Value) -> bool {
    !validate_config(schema, config).has_error()
}

fn validate_object(
    attributes: &BTreeMap<String, Attribute>,
    value: &Value,
    path: &Path,
    diags: &mut Diagnostics,
) {
    if !value.is_known() {
        return;
    }
    for (name, attr) in attributes {
        let attr_path = if path.is_empty() {
            Path::root(name.clone())
        } else {
            path.at_name(name.clone())
        };
        let null = Value::null(attr.attribute_type());
        let attr_value = value.attribute(name).unwrap_or(&null);
        validate_attribute(attr, attr_value, &attr_path, diags);
    }
}

fn validate_attribute(attr: &Attribute, value: &Value, path: &Path, diags: &mut Diagnostics) {
    if value.is_null() {
        if attr.is_required() {
            diags.add_attribute_error(
                path.clone(),
                "Missing Configuration for Required Attribute",
                format!(
                    "Must set a configuration value for the {} attribute as the provider has \
                     marked it as required.\n\nRefer to the provider documentation or contact the \
                     provider developers for additional information about configurable attributes \
                     that are required.",
                    path
                ),
            );
        }
        return;
    }

    if attr.is_computed() && !attr.is_optional() && !attr.is_required() {
        diags.add_attribute_error(
            path.clone(),
            "Invalid Configuration for Read-Only Attribute",
            format!(
                "Cannot set value for this attribute as the provider has marked it as read-only. \
                 Remove the configuration line setting the value.\n\nRefer to the provider \
                 documentation or contact the provider developers for additional information \
                 about configurable and read-only attributes that are supported.\n\nAttribute: {}",
                path
            ),
        );
        return;
    }

    if let Some(message) = &attr.deprecation_message {
        diags.add_attribute_warning(path.clone(), "Attribute Deprecated", message.clone());
    }

    if let AttributeKind::Nested(nested) = &attr.kind {
        validate_nested(nested, value, path, diags);
    }
}

fn validate_nested(nested: &NestedAttributes, value: &Value, path: &Path, diags: &mut Diagnostics) {
    if !value.is_known() {
        return;
    }

    if nested.nesting_mode == NestingMode::Single {
        validate_object(&nested.attributes, value, path, diags);
        return;
    }

    let count = match nested.nesting_mode {
        NestingMode::Map => value.entries().map(BTreeMap::len),
        _ => value.elements().map(<[Value]>::len),
    }
    .unwrap_or(0) as u32;

    if count < nested.min_items {
        diags.add_attribute_error(
            path.clone(),
            "Too few items",
            format!(
                "Attribute {} requires at least {} item(s), got {}",
                path, nested.min_items, count
            ),
        );
    }
    if nested.max_items > 0 && count > nested.max_items {
        diags.add_attribute_error(
            path.clone(),
            "Too many items",
            format!(
                "Attribute {} allows at most {} item(s), got {}",
                path, nested.max_items, count
            ),
        );
    }

    match nested.nesting_mode {
        NestingMode::List => {
            for (i, elem) in value.elements().unwrap_or_default().iter().enumerate() {
                validate_object(&nested.attributes, elem, &path.at_list_index(i as i64), diags);
            }
        },
        NestingMode::Set => {
            for elem in value.elements().unwrap_or_default() {
                validate_object(&nested.attributes, elem, &path.at_set_value(elem.clone()), diags);
            }
        },
        NestingMode::Map => {
            if let Some(entries) = value.entries() {
                for (key, elem) in entries {
                    validate_object(&nested.attributes, elem, &path.at_map_key(key.clone()), diags);
                }
            }
        },
        NestingMode::Single => {},
    }
}

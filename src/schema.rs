//! Schema types for describing provider and resource structure.
//!
//! A [`Schema`] is a tree of named [`Attribute`]s. Each attribute either has
//! a primitive [`AttributeType`] or [`NestedAttributes`] with a nesting mode
//! (single object, list, set, or map of objects). The schema decides the
//! type of every value the framework handles, and paths into values are
//! resolved against it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diag::Diagnostics;
use crate::error::{ConversionError, PathStepError, SchemaPathError, WalkError};
use crate::path::{Path, PathStep};
use crate::value::{AttributeType, Value};
use crate::wire::{WireType, WireValue};

/// Describes how an attribute can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// The attribute is required in configuration.
    pub required: bool,
    /// The attribute is optional in configuration.
    pub optional: bool,
    /// The attribute value may be set by the provider.
    pub computed: bool,
    /// The attribute contains sensitive data.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// Create flags for a required attribute.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional attribute.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Default::default()
        }
    }

    /// Create flags for a computed attribute.
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional attribute the provider may fill in.
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Default::default()
        }
    }

    /// Mark as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// How the objects of a nested attribute are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NestingMode {
    /// A single object.
    #[default]
    Single,
    /// An ordered list of objects.
    List,
    /// An unordered set of objects.
    Set,
    /// A string-keyed map of objects.
    Map,
}

impl fmt::Display for NestingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NestingMode::Single => f.write_str("single"),
            NestingMode::List => f.write_str("list"),
            NestingMode::Set => f.write_str("set"),
            NestingMode::Map => f.write_str("map"),
        }
    }
}

/// The object schema of a nested attribute.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NestedAttributes {
    /// Attributes of each nested object.
    pub attributes: BTreeMap<String, Attribute>,
    /// How the nested objects are arranged.
    pub nesting_mode: NestingMode,
    /// Minimum number of objects. Zero means no minimum.
    pub min_items: u32,
    /// Maximum number of objects. Zero means no maximum.
    pub max_items: u32,
}

impl NestedAttributes {
    /// A single nested object.
    pub fn single() -> Self {
        Self::with_mode(NestingMode::Single)
    }

    /// A list of nested objects.
    pub fn list() -> Self {
        Self::with_mode(NestingMode::List)
    }

    /// A set of nested objects.
    pub fn set() -> Self {
        Self::with_mode(NestingMode::Set)
    }

    /// A map of nested objects.
    pub fn map() -> Self {
        Self::with_mode(NestingMode::Map)
    }

    fn with_mode(nesting_mode: NestingMode) -> Self {
        Self {
            nesting_mode,
            ..Default::default()
        }
    }

    /// Add an attribute to the nested object.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Set minimum items.
    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        self
    }

    /// Set maximum items.
    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }

    /// The object type of one nested object.
    pub fn object_type(&self) -> AttributeType {
        object_type(&self.attributes)
    }

    /// The type of the whole nested attribute.
    pub fn attribute_type(&self) -> AttributeType {
        let object = self.object_type();
        match self.nesting_mode {
            NestingMode::Single => object,
            NestingMode::List => AttributeType::list(object),
            NestingMode::Set => AttributeType::set(object),
            NestingMode::Map => AttributeType::map(object),
        }
    }
}

/// What an attribute holds.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeKind {
    /// A value of a single type with no schema below it.
    Primitive(AttributeType),
    /// One or more objects with their own attributes.
    Nested(NestedAttributes),
}

/// Schema for a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// What the attribute holds.
    pub kind: AttributeKind,
    /// Usage flags.
    pub flags: AttributeFlags,
    /// Human-readable description.
    pub description: Option<String>,
    /// Markdown description.
    pub markdown_description: Option<String>,
    /// Set when the attribute is deprecated.
    pub deprecation_message: Option<String>,
    /// Changing this attribute forces resource replacement.
    pub requires_replace: bool,
}

impl Attribute {
    /// Create a primitive attribute.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self::with_kind(AttributeKind::Primitive(attr_type), flags)
    }

    /// Create a nested attribute.
    pub fn nested(nested: NestedAttributes, flags: AttributeFlags) -> Self {
        Self::with_kind(AttributeKind::Nested(nested), flags)
    }

    fn with_kind(kind: AttributeKind, flags: AttributeFlags) -> Self {
        Self {
            kind,
            flags,
            description: None,
            markdown_description: None,
            deprecation_message: None,
            requires_replace: false,
        }
    }

    /// Create a required string attribute.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// Create an optional string attribute.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// Create a computed string attribute.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// Create a required int64 attribute.
    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::required())
    }

    /// Create an optional int64 attribute.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// Create a computed int64 attribute.
    pub fn computed_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::computed())
    }

    /// Create a required bool attribute.
    pub fn required_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::required())
    }

    /// Create an optional bool attribute.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    /// Create a computed bool attribute.
    pub fn computed_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::computed())
    }

    /// Add a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a markdown description.
    pub fn with_markdown_description(mut self, description: impl Into<String>) -> Self {
        self.markdown_description = Some(description.into());
        self
    }

    /// Mark as deprecated.
    pub fn with_deprecation_message(mut self, message: impl Into<String>) -> Self {
        self.deprecation_message = Some(message.into());
        self
    }

    /// Mark that changing this attribute requires replacing the resource.
    pub fn with_requires_replace(mut self) -> Self {
        self.requires_replace = true;
        self
    }

    /// Mark as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }

    /// Whether the attribute must be set in configuration.
    pub fn is_required(&self) -> bool {
        self.flags.required
    }

    /// Whether the attribute may be set in configuration.
    pub fn is_optional(&self) -> bool {
        self.flags.optional
    }

    /// Whether the provider may set the attribute.
    pub fn is_computed(&self) -> bool {
        self.flags.computed
    }

    /// Whether the attribute holds sensitive data.
    pub fn is_sensitive(&self) -> bool {
        self.flags.sensitive
    }

    /// The nested schema, if this is a nested attribute.
    pub fn nested_attributes(&self) -> Option<&NestedAttributes> {
        match &self.kind {
            AttributeKind::Nested(nested) => Some(nested),
            AttributeKind::Primitive(_) => None,
        }
    }

    /// The type of values held by this attribute.
    pub fn attribute_type(&self) -> AttributeType {
        match &self.kind {
            AttributeKind::Primitive(ty) => ty.clone(),
            AttributeKind::Nested(nested) => nested.attribute_type(),
        }
    }

    /// The protocol type of values held by this attribute.
    pub fn terraform_type(&self) -> WireType {
        self.attribute_type().terraform_type()
    }
}

fn object_type(attributes: &BTreeMap<String, Attribute>) -> AttributeType {
    AttributeType::Object(
        attributes
            .iter()
            .map(|(name, attr)| (name.clone(), attr.attribute_type()))
            .collect(),
    )
}

/// Schema for provider configuration, a resource, or a data source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    /// Schema version, used for state upgrades.
    pub version: i64,
    /// Root attributes.
    pub attributes: BTreeMap<String, Attribute>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Markdown description.
    pub markdown_description: Option<String>,
    /// Set when the whole resource or data source is deprecated.
    pub deprecation_message: Option<String>,
}

impl Schema {
    /// Create a new schema with the given version.
    pub fn new(version: i64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    /// Create a new schema with version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Add a root attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a markdown description.
    pub fn with_markdown_description(mut self, description: impl Into<String>) -> Self {
        self.markdown_description = Some(description.into());
        self
    }

    /// Mark as deprecated.
    pub fn with_deprecation_message(mut self, message: impl Into<String>) -> Self {
        self.deprecation_message = Some(message.into());
        self
    }

    /// The object type of values described by this schema.
    pub fn attribute_type(&self) -> AttributeType {
        object_type(&self.attributes)
    }

    /// The protocol type of values described by this schema.
    pub fn terraform_type(&self) -> WireType {
        self.attribute_type().terraform_type()
    }

    /// Convert a protocol value into a framework value of this schema.
    pub fn value_from_terraform(&self, raw: &WireValue) -> Result<Value, ConversionError> {
        self.attribute_type().value_from_terraform(raw)
    }

    /// A null value of this schema's type.
    pub fn null_value(&self) -> Value {
        Value::null(self.attribute_type())
    }

    /// The attribute at `path`, with failures reported as diagnostics.
    pub fn attribute_at_path(&self, path: &Path) -> Result<&Attribute, Diagnostics> {
        self.try_attribute_at_path(path)
            .map_err(|err| Diagnostics::from(err.to_diagnostic(path)))
    }

    /// The attribute at `path`.
    ///
    /// A path that continues past an attribute without nested attributes
    /// fails with [`SchemaPathError::InsideAtomicAttribute`]. The empty
    /// path and paths ending on a nested object rather than an attribute
    /// fail with [`SchemaPathError::NotAnAttribute`].
    pub fn try_attribute_at_path(&self, path: &Path) -> Result<&Attribute, SchemaPathError> {
        let mut node = Node::Schema(self);
        for (index, step) in path.steps().iter().enumerate() {
            if let Node::Attribute(Attribute {
                kind: AttributeKind::Primitive(_),
                ..
            }) = node
            {
                return Err(SchemaPathError::InsideAtomicAttribute);
            }
            node = node
                .apply_path_step(step)
                .map_err(|source| WalkError::at_step(path, index, source))?;
        }

        match node {
            Node::Attribute(attr) => Ok(attr),
            Node::Schema(_) => Err(SchemaPathError::NotAnAttribute("schema")),
            Node::Object(_) => Err(SchemaPathError::NotAnAttribute("nested attribute object")),
        }
    }

    /// The type of values at `path`, continuing into primitive types where
    /// the schema ends.
    pub fn type_at_path(&self, path: &Path) -> Result<AttributeType, SchemaPathError> {
        let mut node = Node::Schema(self);
        for (index, step) in path.steps().iter().enumerate() {
            if let Node::Attribute(Attribute {
                kind: AttributeKind::Primitive(ty),
                ..
            }) = node
            {
                let rest = Path::from_steps(path.steps()[index..].to_vec());
                return Ok(ty.walk(&rest)?.clone());
            }
            node = node
                .apply_path_step(step)
                .map_err(|source| WalkError::at_step(path, index, source))?;
        }

        Ok(match node {
            Node::Schema(schema) => schema.attribute_type(),
            Node::Attribute(attr) => attr.attribute_type(),
            Node::Object(attrs) => object_type(attrs),
        })
    }
}

/// A position in the schema tree while walking a path.
#[derive(Clone, Copy)]
enum Node<'a> {
    Schema(&'a Schema),
    Attribute(&'a Attribute),
    Object(&'a BTreeMap<String, Attribute>),
}

impl<'a> Node<'a> {
    fn apply_path_step(self, step: &PathStep) -> Result<Node<'a>, PathStepError> {
        let inapplicable = |target: String| PathStepError::Inapplicable {
            step: step.kind(),
            target,
        };

        match self {
            Node::Schema(schema) => match step {
                PathStep::AttributeName(name) => schema
                    .attributes
                    .get(name)
                    .map(Node::Attribute)
                    .ok_or_else(|| PathStepError::AttributeNotFound {
                        name: name.clone(),
                        target: "schema".to_string(),
                    }),
                _ => Err(inapplicable("schema".to_string())),
            },
            Node::Object(attrs) => match step {
                PathStep::AttributeName(name) => {
                    attrs
                        .get(name)
                        .map(Node::Attribute)
                        .ok_or_else(|| PathStepError::AttributeNotFound {
                            name: name.clone(),
                            target: "nested attribute object".to_string(),
                        })
                },
                _ => Err(inapplicable("nested attribute object".to_string())),
            },
            Node::Attribute(attr) => {
                let nested = match &attr.kind {
                    AttributeKind::Nested(nested) => nested,
                    AttributeKind::Primitive(ty) => return Err(inapplicable(ty.to_string())),
                };
                match (nested.nesting_mode, step) {
                    (NestingMode::Single, PathStep::AttributeName(name)) => nested
                        .attributes
                        .get(name)
                        .map(Node::Attribute)
                        .ok_or_else(|| PathStepError::AttributeNotFound {
                            name: name.clone(),
                            target: "nested attributes".to_string(),
                        }),
                    (NestingMode::List, PathStep::ElementKeyInt(_))
                    | (NestingMode::Set, PathStep::ElementKeyValue(_))
                    | (NestingMode::Map, PathStep::ElementKeyString(_)) => {
                        Ok(Node::Object(&nested.attributes))
                    },
                    (mode, _) => Err(inapplicable(format!("{} nested attributes", mode))),
                }
            },
        }
    }
}

/// Complete provider schema including provider config, resources, and data sources.
#[derive(Debug, Clone, Default)]
pub struct ProviderSchema {
    /// Schema for provider configuration.
    pub provider: Schema,
    /// Schemas for each resource type.
    pub resources: BTreeMap<String, Schema>,
    /// Schemas for each data source type.
    pub data_sources: BTreeMap<String, Schema>,
}

impl ProviderSchema {
    /// Create a new empty provider schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider configuration schema.
    pub fn with_provider_config(mut self, schema: Schema) -> Self {
        self.provider = schema;
        self
    }

    /// Add a resource schema.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }

    /// Add a data source schema.
    pub fn with_data_source(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.data_sources.insert(name.into(), schema);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Severity;

    fn nested_list_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "test",
                Attribute::nested(
                    NestedAttributes::list()
                        .with_attribute("sub_test", Attribute::optional_string())
                        .with_attribute(
                            "tags",
                            Attribute::new(
                                AttributeType::list(AttributeType::String),
                                AttributeFlags::optional(),
                            ),
                        ),
                    AttributeFlags::optional(),
                ),
            )
    }

    #[test]
    fn test_attribute_flags() {
        let flags = AttributeFlags::optional_computed().sensitive();
        assert!(flags.optional);
        assert!(flags.computed);
        assert!(flags.sensitive);
        assert!(!flags.required);
    }

    #[test]
    fn test_schema_builder() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("id", Attribute::computed_string().with_requires_replace());

        assert_eq!(schema.version, 0);
        assert_eq!(schema.attributes.len(), 2);
        assert!(schema.attributes["id"].requires_replace);
        assert_eq!(
            schema.attribute_type(),
            AttributeType::object([("id", AttributeType::String), ("name", AttributeType::String)])
        );
    }

    #[test]
    fn test_nested_attribute_types() {
        let schema = nested_list_schema();
        let element = AttributeType::object([
            ("sub_test", AttributeType::String),
            ("tags", AttributeType::list(AttributeType::String)),
        ]);
        assert_eq!(
            schema.attributes["test"].attribute_type(),
            AttributeType::list(element)
        );
    }

    #[test]
    fn test_attribute_at_path_nested_list() {
        let schema = nested_list_schema();
        let path = Path::root("test").at_list_index(0).at_name("sub_test");

        let attr = schema.attribute_at_path(&path).unwrap();
        assert_eq!(attr, &Attribute::optional_string());
    }

    #[test]
    fn test_attribute_at_path_missing_root() {
        let schema = nested_list_schema();
        let path = Path::root("missing");

        let diags = schema.attribute_at_path(&path).unwrap_err();
        assert_eq!(diags.len(), 1);

        let diag = diags.iter().next().unwrap();
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.summary, "Invalid Schema Path");
        let detail = diag.detail.as_deref().unwrap();
        assert!(detail.contains("Path: missing"));
        assert!(detail.contains(
            "Original Error: AttributeName(\"missing\") still remains in the path: \
             could not find attribute \"missing\" in schema"
        ));
    }

    #[test]
    fn test_attribute_at_path_empty_path() {
        let schema = nested_list_schema();
        assert_eq!(
            schema.try_attribute_at_path(&Path::empty()),
            Err(SchemaPathError::NotAnAttribute("schema"))
        );
    }

    #[test]
    fn test_attribute_at_path_nested_object() {
        let schema = nested_list_schema();
        assert_eq!(
            schema.try_attribute_at_path(&Path::root("test").at_list_index(0)),
            Err(SchemaPathError::NotAnAttribute("nested attribute object"))
        );
    }

    #[test]
    fn test_attribute_at_path_wrong_step_kind() {
        let schema = nested_list_schema();
        let err = schema
            .try_attribute_at_path(&Path::root("test").at_map_key("x").at_name("sub_test"))
            .unwrap_err();

        let SchemaPathError::Walk(walk) = err else {
            panic!("expected walk error, got {:?}", err);
        };
        assert_eq!(walk.remaining, Path::empty().at_map_key("x").at_name("sub_test"));
        assert_eq!(
            walk.source,
            PathStepError::Inapplicable {
                step: "ElementKeyString",
                target: "list nested attributes".to_string(),
            }
        );
    }

    #[test]
    fn test_attribute_at_path_inside_atomic_attribute() {
        let schema = nested_list_schema();
        let path = Path::root("test")
            .at_list_index(0)
            .at_name("tags")
            .at_list_index(0);
        assert_eq!(
            schema.try_attribute_at_path(&path),
            Err(SchemaPathError::InsideAtomicAttribute)
        );
    }

    #[test]
    fn test_type_at_path() {
        let schema = nested_list_schema();

        let tag = Path::root("test").at_list_index(0).at_name("tags").at_list_index(2);
        assert_eq!(schema.type_at_path(&tag).unwrap(), AttributeType::String);

        let element = Path::root("test").at_list_index(0);
        assert_eq!(
            schema.type_at_path(&element).unwrap(),
            AttributeType::object([
                ("sub_test", AttributeType::String),
                ("tags", AttributeType::list(AttributeType::String)),
            ])
        );

        assert_eq!(schema.type_at_path(&Path::empty()).unwrap(), schema.attribute_type());

        let bad = Path::root("id").at_name("nope");
        assert!(matches!(schema.type_at_path(&bad), Err(SchemaPathError::Walk(_))));
    }

    #[test]
    fn test_single_and_map_nesting_paths() {
        let schema = Schema::v0()
            .with_attribute(
                "single",
                Attribute::nested(
                    NestedAttributes::single().with_attribute("a", Attribute::optional_bool()),
                    AttributeFlags::optional(),
                ),
            )
            .with_attribute(
                "by_key",
                Attribute::nested(
                    NestedAttributes::map().with_attribute("b", Attribute::optional_int64()),
                    AttributeFlags::optional(),
                ),
            );

        assert!(schema
            .try_attribute_at_path(&Path::root("single").at_name("a"))
            .is_ok());
        assert!(schema
            .try_attribute_at_path(&Path::root("by_key").at_map_key("k").at_name("b"))
            .is_ok());
        assert!(schema
            .try_attribute_at_path(&Path::root("single").at_list_index(0))
            .is_err());
    }
}

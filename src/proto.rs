//! Protocol messages exchanged with the orchestrator.
//!
//! Values travel as [`DynamicValue`]: a JSON document plus the paths of
//! values that are not yet known. Attribute paths, diagnostics and schemas
//! have their own messages. Conversions to and from the framework types
//! live here so the server only deals with framework types.

use std::collections::BTreeMap;

use crate::diag;
use crate::error::ConversionError;
use crate::path::{Path, PathStep};
use crate::schema;
use crate::value::{AttributeType, Value};
use crate::wire::{WireType, WireValue};

/// A value of a schema-defined type, encoded as JSON.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DynamicValue {
    /// JSON encoding of the value. Unknown values are `null` placeholders.
    #[prost(bytes = "vec", tag = "1")]
    pub json: Vec<u8>,
    /// Positions of unknown values inside `json`.
    #[prost(message, repeated, tag = "2")]
    pub unknown_paths: Vec<AttributePath>,
}

impl DynamicValue {
    /// Encode a protocol value declared with type `typ`.
    pub fn marshal(value: &WireValue, typ: &WireType) -> Self {
        let mut unknowns = Vec::new();
        let json = value.to_json(typ, &mut unknowns);
        Self {
            json: json.to_string().into_bytes(),
            unknown_paths: unknowns.iter().map(AttributePath::from).collect(),
        }
    }

    /// Decode into a protocol value of type `typ`. An empty message
    /// decodes to null.
    pub fn unmarshal(&self, typ: &WireType) -> Result<WireValue, ConversionError> {
        if self.json.is_empty() {
            return Ok(WireValue::null(typ.clone()));
        }
        let json: serde_json::Value = serde_json::from_slice(&self.json)?;
        let mut value = WireValue::from_json(typ, &json)?;
        for path in &self.unknown_paths {
            value.mark_unknown(&Path::from(path))?;
        }
        Ok(value)
    }

    /// Encode a framework value.
    pub fn from_value(value: &Value) -> Self {
        Self::marshal(&value.to_terraform_value(), &value.ty().terraform_type())
    }

    /// Decode into a framework value of type `ty`.
    pub fn to_value(&self, ty: &AttributeType) -> Result<Value, ConversionError> {
        let raw = self.unmarshal(&ty.terraform_type())?;
        ty.value_from_terraform(&raw)
    }

    /// Encode a plain JSON document with no unknown values.
    pub fn from_json(json: &serde_json::Value) -> Self {
        Self {
            json: json.to_string().into_bytes(),
            unknown_paths: Vec::new(),
        }
    }
}

/// A path to an attribute or element.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttributePath {
    /// Steps from the root.
    #[prost(message, repeated, tag = "1")]
    pub steps: Vec<attribute_path::Step>,
}

/// Nested message types of [`AttributePath`].
pub mod attribute_path {
    /// One path step.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Step {
        /// Which step this is.
        #[prost(oneof = "step::Selector", tags = "1, 2, 3")]
        pub selector: Option<step::Selector>,
    }

    /// Nested types of [`Step`].
    pub mod step {
        /// The step payload.
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Selector {
            /// An attribute of an object.
            #[prost(string, tag = "1")]
            AttributeName(String),
            /// An element of a map.
            #[prost(string, tag = "2")]
            ElementKeyString(String),
            /// An element of a list, or a set element by position.
            #[prost(int64, tag = "3")]
            ElementKeyInt(i64),
        }
    }
}

/// Set element steps have no protocol form; the path is cut off at the
/// first one.
impl From<&Path> for AttributePath {
    fn from(path: &Path) -> Self {
        use attribute_path::step::Selector;

        let steps = path
            .steps()
            .iter()
            .map_while(|step| {
                let selector = match step {
                    PathStep::AttributeName(name) => Selector::AttributeName(name.clone()),
                    PathStep::ElementKeyString(key) => Selector::ElementKeyString(key.clone()),
                    PathStep::ElementKeyInt(index) => Selector::ElementKeyInt(*index),
                    PathStep::ElementKeyValue(_) => return None,
                };
                Some(attribute_path::Step {
                    selector: Some(selector),
                })
            })
            .collect();
        Self { steps }
    }
}

impl From<&AttributePath> for Path {
    fn from(path: &AttributePath) -> Self {
        use attribute_path::step::Selector;

        Path::from_steps(
            path.steps
                .iter()
                .filter_map(|step| match &step.selector {
                    Some(Selector::AttributeName(name)) => Some(PathStep::AttributeName(name.clone())),
                    Some(Selector::ElementKeyString(key)) => {
                        Some(PathStep::ElementKeyString(key.clone()))
                    },
                    Some(Selector::ElementKeyInt(index)) => Some(PathStep::ElementKeyInt(*index)),
                    None => None,
                })
                .collect(),
        )
    }
}

/// A diagnostic on the wire.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Diagnostic {
    /// Severity level.
    #[prost(enumeration = "diagnostic::Severity", tag = "1")]
    pub severity: i32,
    /// Short summary.
    #[prost(string, tag = "2")]
    pub summary: String,
    /// Detailed description.
    #[prost(string, tag = "3")]
    pub detail: String,
    /// The attribute the diagnostic is about.
    #[prost(message, optional, tag = "4")]
    pub attribute: Option<AttributePath>,
}

/// Nested types of [`Diagnostic`].
pub mod diagnostic {
    /// Diagnostic severity on the wire.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Severity {
        /// Unset.
        Invalid = 0,
        /// Error.
        Error = 1,
        /// Warning.
        Warning = 2,
    }
}

impl From<&diag::Diagnostic> for Diagnostic {
    fn from(diag: &diag::Diagnostic) -> Self {
        let severity = match diag.severity {
            diag::Severity::Error => diagnostic::Severity::Error,
            diag::Severity::Warning => diagnostic::Severity::Warning,
        };
        Self {
            severity: severity as i32,
            summary: diag.summary.clone(),
            detail: diag.detail.clone().unwrap_or_default(),
            attribute: diag.path.as_ref().map(AttributePath::from),
        }
    }
}

impl From<&Diagnostic> for diag::Diagnostic {
    fn from(proto: &Diagnostic) -> Self {
        let severity = match diagnostic::Severity::try_from(proto.severity) {
            Ok(diagnostic::Severity::Warning) => diag::Severity::Warning,
            _ => diag::Severity::Error,
        };
        Self {
            severity,
            summary: proto.summary.clone(),
            detail: (!proto.detail.is_empty()).then(|| proto.detail.clone()),
            path: proto.attribute.as_ref().map(Path::from),
        }
    }
}

/// Convert a list of diagnostics for a response.
pub fn diagnostics_to_proto(diags: &diag::Diagnostics) -> Vec<Diagnostic> {
    diags.iter().map(Diagnostic::from).collect()
}

/// A schema on the wire.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Schema {
    /// Schema version.
    #[prost(int64, tag = "1")]
    pub version: i64,
    /// Root block.
    #[prost(message, optional, tag = "2")]
    pub block: Option<schema_proto::Block>,
}

/// Nested types of [`Schema`].
pub mod schema_proto {
    /// How a description is formatted.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum StringKind {
        /// Plain text.
        Plain = 0,
        /// Markdown.
        Markdown = 1,
    }

    /// The root attributes of a schema.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Block {
        /// Schema version.
        #[prost(int64, tag = "1")]
        pub version: i64,
        /// Attributes, sorted by name.
        #[prost(message, repeated, tag = "2")]
        pub attributes: Vec<Attribute>,
        /// Description.
        #[prost(string, tag = "3")]
        pub description: String,
        /// Description format.
        #[prost(enumeration = "StringKind", tag = "4")]
        pub description_kind: i32,
        /// The resource or data source is deprecated.
        #[prost(bool, tag = "5")]
        pub deprecated: bool,
    }

    /// One attribute.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Attribute {
        /// Attribute name.
        #[prost(string, tag = "1")]
        pub name: String,
        /// JSON-encoded type. Empty for nested attributes.
        #[prost(bytes = "vec", tag = "2")]
        pub r#type: Vec<u8>,
        /// Nested attributes.
        #[prost(message, optional, tag = "3")]
        pub nested_type: Option<Object>,
        /// Description.
        #[prost(string, tag = "4")]
        pub description: String,
        /// Must be set in configuration.
        #[prost(bool, tag = "5")]
        pub required: bool,
        /// May be set in configuration.
        #[prost(bool, tag = "6")]
        pub optional: bool,
        /// May be set by the provider.
        #[prost(bool, tag = "7")]
        pub computed: bool,
        /// Holds sensitive data.
        #[prost(bool, tag = "8")]
        pub sensitive: bool,
        /// Description format.
        #[prost(enumeration = "StringKind", tag = "9")]
        pub description_kind: i32,
        /// The attribute is deprecated.
        #[prost(bool, tag = "10")]
        pub deprecated: bool,
    }

    /// Attributes of a nested attribute.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Object {
        /// Attributes, sorted by name.
        #[prost(message, repeated, tag = "1")]
        pub attributes: Vec<Attribute>,
        /// Nesting mode.
        #[prost(enumeration = "NestingMode", tag = "3")]
        pub nesting: i32,
        /// Minimum number of objects.
        #[prost(int64, tag = "4")]
        pub min_items: i64,
        /// Maximum number of objects.
        #[prost(int64, tag = "5")]
        pub max_items: i64,
    }

    /// Nesting mode on the wire.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum NestingMode {
        /// Unset.
        Invalid = 0,
        /// A single object.
        Single = 1,
        /// A list of objects.
        List = 2,
        /// A set of objects.
        Set = 3,
        /// A map of objects.
        Map = 4,
    }
}

fn description(plain: &Option<String>, markdown: &Option<String>) -> (String, schema_proto::StringKind) {
    match (markdown, plain) {
        (Some(md), _) => (md.clone(), schema_proto::StringKind::Markdown),
        (None, Some(text)) => (text.clone(), schema_proto::StringKind::Plain),
        (None, None) => (String::new(), schema_proto::StringKind::Plain),
    }
}

fn attributes_to_proto(attrs: &BTreeMap<String, schema::Attribute>) -> Vec<schema_proto::Attribute> {
    attrs
        .iter()
        .map(|(name, attr)| attribute_to_proto(name, attr))
        .collect()
}

fn attribute_to_proto(name: &str, attr: &schema::Attribute) -> schema_proto::Attribute {
    let (description, kind) = description(&attr.description, &attr.markdown_description);
    let (r#type, nested_type) = match &attr.kind {
        schema::AttributeKind::Primitive(ty) => {
            (ty.terraform_type().to_json().to_string().into_bytes(), None)
        },
        schema::AttributeKind::Nested(nested) => {
            let nesting = match nested.nesting_mode {
                schema::NestingMode::Single => schema_proto::NestingMode::Single,
                schema::NestingMode::List => schema_proto::NestingMode::List,
                schema::NestingMode::Set => schema_proto::NestingMode::Set,
                schema::NestingMode::Map => schema_proto::NestingMode::Map,
            };
            let object = schema_proto::Object {
                attributes: attributes_to_proto(&nested.attributes),
                nesting: nesting as i32,
                min_items: i64::from(nested.min_items),
                max_items: i64::from(nested.max_items),
            };
            (Vec::new(), Some(object))
        },
    };

    schema_proto::Attribute {
        name: name.to_string(),
        r#type,
        nested_type,
        description,
        required: attr.flags.required,
        optional: attr.flags.optional,
        computed: attr.flags.computed,
        sensitive: attr.flags.sensitive,
        description_kind: kind as i32,
        deprecated: attr.deprecation_message.is_some(),
    }
}

impl From<&schema::Schema> for Schema {
    fn from(schema: &schema::Schema) -> Self {
        let (description, kind) = description(&schema.description, &schema.markdown_description);
        Self {
            version: schema.version,
            block: Some(schema_proto::Block {
                version: schema.version,
                attributes: attributes_to_proto(&schema.attributes),
                description,
                description_kind: kind as i32,
                deprecated: schema.deprecation_message.is_some(),
            }),
        }
    }
}

/// Response to `GetSchema`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSchemaResponse {
    /// Provider configuration schema.
    #[prost(message, optional, tag = "1")]
    pub provider: Option<Schema>,
    /// Resource schemas by type name.
    #[prost(btree_map = "string, message", tag = "2")]
    pub resource_schemas: BTreeMap<String, Schema>,
    /// Data source schemas by type name.
    #[prost(btree_map = "string, message", tag = "3")]
    pub data_source_schemas: BTreeMap<String, Schema>,
    /// Diagnostics.
    #[prost(message, repeated, tag = "4")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Request for `ValidateProviderConfig` and `ConfigureProvider`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProviderConfigRequest {
    /// Provider configuration.
    #[prost(message, optional, tag = "1")]
    pub config: Option<DynamicValue>,
}

/// Request for `ValidateResourceConfig` and `ValidateDataSourceConfig`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateConfigRequest {
    /// Resource or data source type.
    #[prost(string, tag = "1")]
    pub type_name: String,
    /// Configuration.
    #[prost(message, optional, tag = "2")]
    pub config: Option<DynamicValue>,
}

/// Response carrying only diagnostics.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiagnosticsResponse {
    /// Diagnostics.
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Request for `UpgradeResourceState`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpgradeResourceStateRequest {
    /// Resource type.
    #[prost(string, tag = "1")]
    pub type_name: String,
    /// Schema version the state was written with.
    #[prost(int64, tag = "2")]
    pub version: i64,
    /// The stored state as JSON.
    #[prost(bytes = "vec", tag = "3")]
    pub raw_state_json: Vec<u8>,
}

/// Response to `UpgradeResourceState`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpgradeResourceStateResponse {
    /// State in the current schema.
    #[prost(message, optional, tag = "1")]
    pub upgraded_state: Option<DynamicValue>,
    /// Diagnostics.
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Request for `ReadResource`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadResourceRequest {
    /// Resource type.
    #[prost(string, tag = "1")]
    pub type_name: String,
    /// State recorded after the last apply or refresh.
    #[prost(message, optional, tag = "2")]
    pub current_state: Option<DynamicValue>,
}

/// Response to `ReadResource` and `ReadDataSource`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadResponse {
    /// Refreshed state. Null when the resource no longer exists.
    #[prost(message, optional, tag = "1")]
    pub state: Option<DynamicValue>,
    /// Diagnostics.
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Request for `PlanResourceChange`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlanResourceChangeRequest {
    /// Resource type.
    #[prost(string, tag = "1")]
    pub type_name: String,
    /// Current state. Null when creating.
    #[prost(message, optional, tag = "2")]
    pub prior_state: Option<DynamicValue>,
    /// Configuration merged over the prior state. Null when destroying.
    #[prost(message, optional, tag = "3")]
    pub proposed_new_state: Option<DynamicValue>,
    /// Configuration.
    #[prost(message, optional, tag = "4")]
    pub config: Option<DynamicValue>,
}

/// Response to `PlanResourceChange`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlanResourceChangeResponse {
    /// The planned state.
    #[prost(message, optional, tag = "1")]
    pub planned_state: Option<DynamicValue>,
    /// Attributes whose change forces replacement.
    #[prost(message, repeated, tag = "2")]
    pub requires_replace: Vec<AttributePath>,
    /// Diagnostics.
    #[prost(message, repeated, tag = "3")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Request for `ApplyResourceChange`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplyResourceChangeRequest {
    /// Resource type.
    #[prost(string, tag = "1")]
    pub type_name: String,
    /// Current state. Null when creating.
    #[prost(message, optional, tag = "2")]
    pub prior_state: Option<DynamicValue>,
    /// Planned state. Null when destroying.
    #[prost(message, optional, tag = "3")]
    pub planned_state: Option<DynamicValue>,
    /// Configuration.
    #[prost(message, optional, tag = "4")]
    pub config: Option<DynamicValue>,
}

/// Response to `ApplyResourceChange`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplyResourceChangeResponse {
    /// State after apply.
    #[prost(message, optional, tag = "1")]
    pub new_state: Option<DynamicValue>,
    /// Diagnostics.
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Request for `ImportResourceState`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImportResourceStateRequest {
    /// Resource type.
    #[prost(string, tag = "1")]
    pub type_name: String,
    /// Identifier given by the practitioner.
    #[prost(string, tag = "2")]
    pub id: String,
}

/// One imported resource.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImportedResource {
    /// Resource type.
    #[prost(string, tag = "1")]
    pub type_name: String,
    /// Imported state.
    #[prost(message, optional, tag = "2")]
    pub state: Option<DynamicValue>,
}

/// Response to `ImportResourceState`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImportResourceStateResponse {
    /// Imported resources.
    #[prost(message, repeated, tag = "1")]
    pub imported_resources: Vec<ImportedResource>,
    /// Diagnostics.
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Request for `ReadDataSource`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadDataSourceRequest {
    /// Data source type.
    #[prost(string, tag = "1")]
    pub type_name: String,
    /// Configuration.
    #[prost(message, optional, tag = "2")]
    pub config: Option<DynamicValue>,
}

/// Response to `StopProvider`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopProviderResponse {
    /// Error message, empty on success.
    #[prost(string, tag = "1")]
    pub error: String,
}

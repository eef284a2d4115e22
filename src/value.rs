//! The framework value model.
//!
//! Every [`Value`] carries its [`AttributeType`] and is in exactly one of
//! three states: null, unknown, or known. Unknown is distinct from null:
//! it marks a value that will only be determined during apply.
//!
//! ```
//! use hemmer_provider_framework::value::{AttributeType, Value};
//!
//! let id = Value::unknown(AttributeType::String);
//! let name = Value::string("web");
//!
//! assert!(id.is_unknown());
//! assert!(!id.equal(&id.clone()));
//! assert!(name.equal(&Value::string("web")));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ConversionError, PathStepError, WalkError};
use crate::path::{self, Path, PathStep};
use crate::wire::{number_from_f64, WireKnown, WireState, WireType, WireValue};

/// The type of an attribute or value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeType {
    /// String type.
    String,
    /// Boolean type.
    Bool,
    /// Arbitrary precision number, carried as `f64`.
    Number,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// Ordered list of elements.
    List(Box<AttributeType>),
    /// Unordered set of elements.
    Set(Box<AttributeType>),
    /// String-keyed map of elements.
    Map(Box<AttributeType>),
    /// Object with fixed, typed attributes.
    Object(BTreeMap<String, AttributeType>),
    /// Any type, decided by the value at runtime.
    Dynamic,
    /// A collection element type that was never declared.
    Missing,
}

impl AttributeType {
    /// List type constructor.
    pub fn list(elem: AttributeType) -> Self {
        AttributeType::List(Box::new(elem))
    }

    /// Set type constructor.
    pub fn set(elem: AttributeType) -> Self {
        AttributeType::Set(Box::new(elem))
    }

    /// Map type constructor.
    pub fn map(elem: AttributeType) -> Self {
        AttributeType::Map(Box::new(elem))
    }

    /// Object type constructor.
    pub fn object<I, K>(attrs: I) -> Self
    where
        I: IntoIterator<Item = (K, AttributeType)>,
        K: Into<String>,
    {
        AttributeType::Object(attrs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Whether this is a list, set or map type.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            AttributeType::List(_) | AttributeType::Set(_) | AttributeType::Map(_)
        )
    }

    /// Whether the type is or contains [`AttributeType::Dynamic`].
    pub fn contains_dynamic(&self) -> bool {
        match self {
            AttributeType::Dynamic => true,
            AttributeType::List(elem) | AttributeType::Set(elem) | AttributeType::Map(elem) => {
                elem.contains_dynamic()
            },
            AttributeType::Object(attrs) => attrs.values().any(AttributeType::contains_dynamic),
            _ => false,
        }
    }

    /// Whether any collection inside this type has a dynamic element
    /// anywhere below it.
    pub fn contains_collection_with_dynamic(&self) -> bool {
        match self {
            AttributeType::List(elem) | AttributeType::Set(elem) | AttributeType::Map(elem) => {
                elem.contains_dynamic()
            },
            AttributeType::Object(attrs) => attrs
                .values()
                .any(AttributeType::contains_collection_with_dynamic),
            _ => false,
        }
    }

    /// Whether a collection element type is missing anywhere in the type.
    pub fn contains_missing(&self) -> bool {
        match self {
            AttributeType::Missing => true,
            AttributeType::List(elem) | AttributeType::Set(elem) | AttributeType::Map(elem) => {
                elem.contains_missing()
            },
            AttributeType::Object(attrs) => attrs.values().any(AttributeType::contains_missing),
            _ => false,
        }
    }

    /// The protocol type values of this type are sent as.
    pub fn terraform_type(&self) -> WireType {
        match self {
            AttributeType::String => WireType::String,
            AttributeType::Bool => WireType::Bool,
            AttributeType::Number | AttributeType::Int64 | AttributeType::Float64 => {
                WireType::Number
            },
            AttributeType::List(elem) => WireType::List(Box::new(elem.terraform_type())),
            AttributeType::Set(elem) => WireType::Set(Box::new(elem.terraform_type())),
            AttributeType::Map(elem) => WireType::Map(Box::new(elem.terraform_type())),
            AttributeType::Object(attrs) => WireType::Object(
                attrs
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.terraform_type()))
                    .collect(),
            ),
            AttributeType::Dynamic | AttributeType::Missing => WireType::DynamicPseudoType,
        }
    }

    /// The framework type used for values of a concrete protocol type
    /// arriving at a dynamic position.
    pub fn from_terraform_type(typ: &WireType) -> Result<Self, ConversionError> {
        Ok(match typ {
            WireType::String => AttributeType::String,
            WireType::Number => AttributeType::Number,
            WireType::Bool => AttributeType::Bool,
            WireType::List(elem) => AttributeType::list(Self::from_terraform_type(elem)?),
            WireType::Set(elem) => AttributeType::set(Self::from_terraform_type(elem)?),
            WireType::Map(elem) => AttributeType::map(Self::from_terraform_type(elem)?),
            WireType::Object(attrs) => AttributeType::Object(
                attrs
                    .iter()
                    .map(|(name, ty)| Ok((name.clone(), Self::from_terraform_type(ty)?)))
                    .collect::<Result<_, ConversionError>>()?,
            ),
            WireType::DynamicPseudoType => AttributeType::Dynamic,
            WireType::Tuple(_) => {
                return Err(ConversionError::new("tuple values are not supported"));
            },
        })
    }

    /// Convert a protocol value into a framework value of this type.
    pub fn value_from_terraform(&self, raw: &WireValue) -> Result<Value, ConversionError> {
        self.decode(raw, &Path::empty())
    }

    fn decode(&self, raw: &WireValue, path: &Path) -> Result<Value, ConversionError> {
        if *self == AttributeType::Missing {
            return Err(ConversionError::at(
                path.clone(),
                "cannot convert a value whose type is missing",
            ));
        }

        let payload = match &raw.state {
            WireState::Null => {
                return Ok(Value::null(self.clone()));
            },
            WireState::Unknown => {
                return Ok(Value::unknown(self.clone()));
            },
            WireState::Known(payload) => payload,
        };

        if *self == AttributeType::Dynamic {
            let concrete = Self::from_terraform_type(&raw.typ).map_err(|e| e.or_at(path))?;
            let inner = concrete.decode(raw, path)?;
            return Ok(Value::dynamic(inner));
        }

        if !self.terraform_type().accepts(&raw.typ) {
            return Err(ConversionError::at(
                path.clone(),
                format!("expected {} value, got {}", self, raw.typ),
            ));
        }

        let mismatch =
            || ConversionError::at(path.clone(), format!("unexpected {} payload", self));

        let known = match (self, payload) {
            (AttributeType::String, WireKnown::String(s)) => Known::String(s.clone()),
            (AttributeType::Bool, WireKnown::Bool(b)) => Known::Bool(*b),
            (AttributeType::Number, WireKnown::Number(n)) => {
                Known::Number(n.as_f64().ok_or_else(mismatch)?)
            },
            (AttributeType::Float64, WireKnown::Number(n)) => {
                Known::Float64(n.as_f64().ok_or_else(mismatch)?)
            },
            (AttributeType::Int64, WireKnown::Number(n)) => {
                Known::Int64(int64_from_number(n).ok_or_else(|| {
                    ConversionError::at(path.clone(), format!("{} is not a 64-bit integer", n))
                })?)
            },
            (AttributeType::List(elem), WireKnown::List(items)) => Known::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| elem.decode(item, &path.at_list_index(i as i64)))
                    .collect::<Result<_, _>>()?,
            ),
            (AttributeType::Set(elem), WireKnown::Set(items)) => Known::Set(
                items
                    .iter()
                    .map(|item| elem.decode(item, path))
                    .collect::<Result<_, _>>()?,
            ),
            (AttributeType::Map(elem), WireKnown::Map(items)) => Known::Map(
                items
                    .iter()
                    .map(|(key, item)| Ok((key.clone(), elem.decode(item, &path.at_map_key(key))?)))
                    .collect::<Result<_, ConversionError>>()?,
            ),
            (AttributeType::Object(attrs), WireKnown::Object(items)) => Known::Object(
                attrs
                    .iter()
                    .map(|(name, ty)| {
                        let attr_path = path.at_name(name);
                        let item = items.get(name).ok_or_else(|| {
                            ConversionError::at(attr_path.clone(), "attribute missing from value")
                        })?;
                        Ok((name.clone(), ty.decode(item, &attr_path)?))
                    })
                    .collect::<Result<_, ConversionError>>()?,
            ),
            _ => return Err(mismatch()),
        };

        Ok(Value::from_parts(self.clone(), ValueState::Known(known)))
    }

    /// The type reached by applying one path step to this type.
    pub fn apply_path_step(&self, step: &PathStep) -> Result<&AttributeType, PathStepError> {
        match (self, step) {
            (AttributeType::List(elem), PathStep::ElementKeyInt(_))
            | (AttributeType::Set(elem), PathStep::ElementKeyValue(_))
            | (AttributeType::Map(elem), PathStep::ElementKeyString(_)) => Ok(elem),
            (AttributeType::Object(attrs), PathStep::AttributeName(name)) => {
                attrs.get(name).ok_or_else(|| PathStepError::AttributeNotFound {
                    name: name.clone(),
                    target: self.to_string(),
                })
            },
            _ => Err(PathStepError::Inapplicable {
                step: step.kind(),
                target: self.to_string(),
            }),
        }
    }

    /// The type at `path` inside this type.
    pub fn walk(&self, path: &Path) -> Result<&AttributeType, WalkError> {
        path::walk(self, path, |ty, step| ty.apply_path_step(step))
    }
}

/// Renders the type the way configuration type constraints are written,
/// e.g. `list(string)` or `object({a=bool})`.
impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeType::String => f.write_str("string"),
            AttributeType::Bool => f.write_str("bool"),
            AttributeType::Number => f.write_str("number"),
            AttributeType::Int64 => f.write_str("int64"),
            AttributeType::Float64 => f.write_str("float64"),
            AttributeType::List(elem) => write!(f, "list({})", elem),
            AttributeType::Set(elem) => write!(f, "set({})", elem),
            AttributeType::Map(elem) => write!(f, "map({})", elem),
            AttributeType::Object(attrs) => {
                f.write_str("object({")?;
                for (i, (name, ty)) in attrs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}={}", name, ty)?;
                }
                f.write_str("})")
            },
            AttributeType::Dynamic => f.write_str("dynamic"),
            AttributeType::Missing => f.write_str("missing"),
        }
    }
}

/// Largest magnitude at which every whole `f64` is an exact integer.
const MAX_EXACT_F64: f64 = 9_007_199_254_740_992.0;

/// Integers are taken as written. A float is accepted only when it is whole
/// and small enough to be exact.
fn int64_from_number(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() <= MAX_EXACT_F64)
            .map(|f| f as i64)
    })
}

/// Payload of a known [`Value`].
#[derive(Debug, Clone)]
pub enum Known {
    /// String payload.
    String(String),
    /// Bool payload.
    Bool(bool),
    /// Number payload.
    Number(f64),
    /// Int64 payload.
    Int64(i64),
    /// Float64 payload.
    Float64(f64),
    /// List elements in order.
    List(Vec<Value>),
    /// Set elements; order carries no meaning.
    Set(Vec<Value>),
    /// Map elements.
    Map(BTreeMap<String, Value>),
    /// Object attributes.
    Object(BTreeMap<String, Value>),
    /// The concrete value held at a dynamic position.
    Dynamic(Box<Value>),
}

/// The three states of a [`Value`].
#[derive(Debug, Clone)]
pub enum ValueState {
    /// Explicitly absent.
    Null,
    /// Will be determined during apply.
    Unknown,
    /// Present.
    Known(Known),
}

/// A typed framework value.
///
/// `PartialEq` compares structure: two unknowns of the same type are the
/// same tree. Use [`Value::equal`] for protocol equality, where an unknown
/// value never equals anything.
#[derive(Debug, Clone)]
pub struct Value {
    ty: AttributeType,
    state: ValueState,
}

impl Value {
    /// Assemble a value without checking payload against type.
    pub(crate) fn from_parts(ty: AttributeType, state: ValueState) -> Self {
        Self { ty, state }
    }

    /// A null value of the given type.
    pub fn null(ty: AttributeType) -> Self {
        Self::from_parts(ty, ValueState::Null)
    }

    /// An unknown value of the given type.
    pub fn unknown(ty: AttributeType) -> Self {
        Self::from_parts(ty, ValueState::Unknown)
    }

    /// A known string.
    pub fn string(value: impl Into<String>) -> Self {
        Self::from_parts(AttributeType::String, ValueState::Known(Known::String(value.into())))
    }

    /// A known bool.
    pub fn bool(value: bool) -> Self {
        Self::from_parts(AttributeType::Bool, ValueState::Known(Known::Bool(value)))
    }

    /// A known number.
    pub fn number(value: f64) -> Self {
        Self::from_parts(AttributeType::Number, ValueState::Known(Known::Number(value)))
    }

    /// A known 64-bit integer.
    pub fn int64(value: i64) -> Self {
        Self::from_parts(AttributeType::Int64, ValueState::Known(Known::Int64(value)))
    }

    /// A known 64-bit float.
    pub fn float64(value: f64) -> Self {
        Self::from_parts(AttributeType::Float64, ValueState::Known(Known::Float64(value)))
    }

    /// A known list. Every element must have type `elem`.
    pub fn list(elem: AttributeType, elems: Vec<Value>) -> Result<Self, ConversionError> {
        check_elements(&elem, elems.iter())?;
        Ok(Self::from_parts(AttributeType::list(elem), ValueState::Known(Known::List(elems))))
    }

    /// A known set. Every element must have type `elem`.
    pub fn set(elem: AttributeType, elems: Vec<Value>) -> Result<Self, ConversionError> {
        check_elements(&elem, elems.iter())?;
        Ok(Self::from_parts(AttributeType::set(elem), ValueState::Known(Known::Set(elems))))
    }

    /// A known map. Every element must have type `elem`.
    pub fn map(elem: AttributeType, elems: BTreeMap<String, Value>) -> Result<Self, ConversionError> {
        check_elements(&elem, elems.values())?;
        Ok(Self::from_parts(AttributeType::map(elem), ValueState::Known(Known::Map(elems))))
    }

    /// A known object. `attrs` must have exactly the attributes of `types`,
    /// each of the declared type.
    pub fn object(
        types: BTreeMap<String, AttributeType>,
        attrs: BTreeMap<String, Value>,
    ) -> Result<Self, ConversionError> {
        if let Some(extra) = attrs.keys().find(|name| !types.contains_key(*name)) {
            return Err(ConversionError::new(format!(
                "object has undeclared attribute {:?}",
                extra
            )));
        }
        for (name, ty) in &types {
            match attrs.get(name) {
                Some(value) if value.ty == *ty => {},
                Some(value) => {
                    return Err(ConversionError::at(
                        Path::root(name.clone()),
                        format!("expected {}, got {}", ty, value.ty),
                    ));
                },
                None => {
                    return Err(ConversionError::at(
                        Path::root(name.clone()),
                        "attribute missing from object",
                    ));
                },
            }
        }
        Ok(Self::from_parts(AttributeType::Object(types), ValueState::Known(Known::Object(attrs))))
    }

    /// A value at a dynamic position. Null and unknown inner values become
    /// null and unknown dynamic values.
    pub fn dynamic(inner: Value) -> Self {
        match inner.state {
            ValueState::Null => Self::null(AttributeType::Dynamic),
            ValueState::Unknown => Self::unknown(AttributeType::Dynamic),
            ValueState::Known(Known::Dynamic(_)) => inner,
            ValueState::Known(_) => Self::from_parts(
                AttributeType::Dynamic,
                ValueState::Known(Known::Dynamic(Box::new(inner))),
            ),
        }
    }

    /// The type of this value.
    pub fn ty(&self) -> &AttributeType {
        &self.ty
    }

    /// The state and payload.
    pub fn state(&self) -> &ValueState {
        &self.state
    }

    /// Whether the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self.state, ValueState::Null)
    }

    /// Whether the value is unknown.
    pub fn is_unknown(&self) -> bool {
        matches!(self.state, ValueState::Unknown)
    }

    /// Whether the value is known.
    pub fn is_known(&self) -> bool {
        matches!(self.state, ValueState::Known(_))
    }

    fn known(&self) -> Option<&Known> {
        match &self.state {
            ValueState::Known(Known::Dynamic(inner)) => inner.known(),
            ValueState::Known(known) => Some(known),
            _ => None,
        }
    }

    /// The string payload, if this is a known string.
    pub fn as_str(&self) -> Option<&str> {
        match self.known() {
            Some(Known::String(s)) => Some(s),
            _ => None,
        }
    }

    /// The bool payload, if this is a known bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self.known() {
            Some(Known::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// The integer payload, if this is a known Int64.
    pub fn as_i64(&self) -> Option<i64> {
        match self.known() {
            Some(Known::Int64(n)) => Some(*n),
            _ => None,
        }
    }

    /// The numeric payload of any known number-like value.
    pub fn as_f64(&self) -> Option<f64> {
        match self.known() {
            Some(Known::Number(n) | Known::Float64(n)) => Some(*n),
            Some(Known::Int64(n)) => Some(*n as f64),
            _ => None,
        }
    }

    /// List or set elements, if known.
    pub fn elements(&self) -> Option<&[Value]> {
        match self.known() {
            Some(Known::List(elems) | Known::Set(elems)) => Some(elems),
            _ => None,
        }
    }

    /// Map elements or object attributes, if known.
    pub fn entries(&self) -> Option<&BTreeMap<String, Value>> {
        match self.known() {
            Some(Known::Map(elems) | Known::Object(elems)) => Some(elems),
            _ => None,
        }
    }

    /// A single object attribute, if this is a known object.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        match self.known() {
            Some(Known::Object(attrs)) => attrs.get(name),
            _ => None,
        }
    }

    /// Whether this value or anything inside it is unknown.
    pub fn contains_unknown(&self) -> bool {
        match &self.state {
            ValueState::Null => false,
            ValueState::Unknown => true,
            ValueState::Known(known) => match known {
                Known::List(elems) | Known::Set(elems) => elems.iter().any(Value::contains_unknown),
                Known::Map(elems) | Known::Object(elems) => {
                    elems.values().any(Value::contains_unknown)
                },
                Known::Dynamic(inner) => inner.contains_unknown(),
                _ => false,
            },
        }
    }

    /// Protocol equality.
    ///
    /// Unknown values are never equal to anything, including another
    /// unknown. Nulls are equal when their types are. Known values are
    /// equal when their types and payloads are; set elements compare
    /// without regard to order.
    pub fn equal(&self, other: &Value) -> bool {
        if self.is_unknown() || other.is_unknown() || self.ty != other.ty {
            return false;
        }
        match (&self.state, &other.state) {
            (ValueState::Null, ValueState::Null) => true,
            (ValueState::Known(a), ValueState::Known(b)) => known_eq(a, b, Value::equal),
            _ => false,
        }
    }

    /// The protocol form of this value.
    pub fn to_terraform_value(&self) -> WireValue {
        let payload = match &self.state {
            ValueState::Null => return WireValue::null(self.ty.terraform_type()),
            ValueState::Unknown => return WireValue::unknown(self.ty.terraform_type()),
            ValueState::Known(known) => known,
        };

        let payload = match payload {
            Known::Dynamic(inner) => return inner.to_terraform_value(),
            Known::String(s) => WireKnown::String(s.clone()),
            Known::Bool(b) => WireKnown::Bool(*b),
            Known::Number(n) | Known::Float64(n) => match number_from_f64(*n) {
                Some(n) => WireKnown::Number(n),
                None => return WireValue::null(self.ty.terraform_type()),
            },
            Known::Int64(n) => WireKnown::Number((*n).into()),
            Known::List(elems) => {
                WireKnown::List(elems.iter().map(Value::to_terraform_value).collect())
            },
            Known::Set(elems) => {
                WireKnown::Set(elems.iter().map(Value::to_terraform_value).collect())
            },
            Known::Map(elems) => WireKnown::Map(
                elems
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_terraform_value()))
                    .collect(),
            ),
            Known::Object(attrs) => WireKnown::Object(
                attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_terraform_value()))
                    .collect(),
            ),
        };

        WireValue::known(self.ty.terraform_type(), payload)
    }

    /// The value reached by applying one path step.
    pub fn apply_path_step(&self, step: &PathStep) -> Result<&Value, PathStepError> {
        let known = match &self.state {
            ValueState::Null => {
                return Err(PathStepError::NotKnown {
                    step: step.to_string(),
                    state: "null",
                });
            },
            ValueState::Unknown => {
                return Err(PathStepError::NotKnown {
                    step: step.to_string(),
                    state: "unknown",
                });
            },
            ValueState::Known(Known::Dynamic(inner)) => return inner.apply_path_step(step),
            ValueState::Known(known) => known,
        };

        let not_found = || PathStepError::ElementNotFound {
            step: step.to_string(),
            target: self.ty.to_string(),
        };

        match (known, step) {
            (Known::List(elems), PathStep::ElementKeyInt(index)) => usize::try_from(*index)
                .ok()
                .and_then(|i| elems.get(i))
                .ok_or_else(not_found),
            (Known::Set(elems), PathStep::ElementKeyValue(wanted)) => {
                elems.iter().find(|elem| *elem == wanted).ok_or_else(not_found)
            },
            (Known::Map(elems), PathStep::ElementKeyString(key)) => {
                elems.get(key).ok_or_else(not_found)
            },
            (Known::Object(attrs), PathStep::AttributeName(name)) => {
                attrs.get(name).ok_or_else(|| PathStepError::AttributeNotFound {
                    name: name.clone(),
                    target: self.ty.to_string(),
                })
            },
            _ => Err(PathStepError::Inapplicable {
                step: step.kind(),
                target: self.ty.to_string(),
            }),
        }
    }

    /// The value at `path` inside this value.
    pub fn walk(&self, path: &Path) -> Result<&Value, WalkError> {
        path::walk(self, path, |value, step| value.apply_path_step(step))
    }
}

fn check_elements<'a>(
    elem: &AttributeType,
    values: impl Iterator<Item = &'a Value>,
) -> Result<(), ConversionError> {
    for value in values {
        if value.ty != *elem {
            return Err(ConversionError::new(format!(
                "expected element of type {}, got {}",
                elem, value.ty
            )));
        }
    }
    Ok(())
}

fn known_eq(a: &Known, b: &Known, eq: fn(&Value, &Value) -> bool) -> bool {
    match (a, b) {
        (Known::String(x), Known::String(y)) => x == y,
        (Known::Bool(x), Known::Bool(y)) => x == y,
        (Known::Number(x), Known::Number(y)) | (Known::Float64(x), Known::Float64(y)) => x == y,
        (Known::Int64(x), Known::Int64(y)) => x == y,
        (Known::List(x), Known::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| eq(a, b))
        },
        (Known::Set(x), Known::Set(y)) => {
            x.len() == y.len()
                && x.iter().all(|a| y.iter().any(|b| eq(a, b)))
                && y.iter().all(|b| x.iter().any(|a| eq(a, b)))
        },
        (Known::Map(x), Known::Map(y)) | (Known::Object(x), Known::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, a)| y.get(key).is_some_and(|b| eq(a, b)))
        },
        (Known::Dynamic(x), Known::Dynamic(y)) => eq(x, y),
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        if self.ty != other.ty {
            return false;
        }
        match (&self.state, &other.state) {
            (ValueState::Null, ValueState::Null) | (ValueState::Unknown, ValueState::Unknown) => {
                true
            },
            (ValueState::Known(a), ValueState::Known(b)) => known_eq(a, b, Value::eq),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let known = match &self.state {
            ValueState::Null => return f.write_str("<null>"),
            ValueState::Unknown => return f.write_str("<unknown>"),
            ValueState::Known(known) => known,
        };
        match known {
            Known::String(s) => write!(f, "{:?}", s),
            Known::Bool(b) => write!(f, "{}", b),
            Known::Number(n) | Known::Float64(n) => write!(f, "{}", n),
            Known::Int64(n) => write!(f, "{}", n),
            Known::List(elems) | Known::Set(elems) => {
                f.write_str("[")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", elem)?;
                }
                f.write_str("]")
            },
            Known::Map(entries) | Known::Object(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{:?}:{}", key, value)?;
                }
                f.write_str("}")
            },
            Known::Dynamic(inner) => write!(f, "{}", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(attrs: Vec<(&str, Value)>) -> Value {
        let types = attrs
            .iter()
            .map(|(name, value)| (name.to_string(), value.ty().clone()))
            .collect();
        let values = attrs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        Value::object(types, values).unwrap()
    }

    #[test]
    fn test_unknown_is_never_equal() {
        let unknown = Value::unknown(AttributeType::String);
        assert!(!unknown.equal(&unknown));
        assert!(!unknown.equal(&Value::string("x")));
        assert!(!Value::string("x").equal(&unknown));
        // Structural identity still holds.
        assert_eq!(unknown, Value::unknown(AttributeType::String));
    }

    #[test]
    fn test_null_equality_depends_on_type() {
        assert!(Value::null(AttributeType::String).equal(&Value::null(AttributeType::String)));
        assert!(!Value::null(AttributeType::String).equal(&Value::null(AttributeType::Bool)));
        assert!(!Value::null(AttributeType::String).equal(&Value::string("")));
    }

    #[test]
    fn test_nested_unknown_breaks_equality() {
        let a = Value::list(
            AttributeType::String,
            vec![Value::string("a"), Value::unknown(AttributeType::String)],
        )
        .unwrap();
        assert!(!a.equal(&a.clone()));
        assert!(a.contains_unknown());
    }

    #[test]
    fn test_set_equality_ignores_order() {
        let a = Value::set(AttributeType::String, vec![Value::string("a"), Value::string("b")])
            .unwrap();
        let b = Value::set(AttributeType::String, vec![Value::string("b"), Value::string("a")])
            .unwrap();
        assert!(a.equal(&b));
        assert_eq!(a, b);

        let list_a = Value::list(AttributeType::String, vec![Value::string("a"), Value::string("b")])
            .unwrap();
        let list_b = Value::list(AttributeType::String, vec![Value::string("b"), Value::string("a")])
            .unwrap();
        assert!(!list_a.equal(&list_b));
    }

    #[test]
    fn test_constructors_check_types() {
        assert!(Value::list(AttributeType::String, vec![Value::bool(true)]).is_err());

        let types = BTreeMap::from([("a".to_string(), AttributeType::Bool)]);
        let missing = Value::object(types.clone(), BTreeMap::new()).unwrap_err();
        assert_eq!(missing.path, Some(Path::root("a")));

        let extra = BTreeMap::from([
            ("a".to_string(), Value::bool(true)),
            ("b".to_string(), Value::bool(true)),
        ]);
        assert!(Value::object(types, extra).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::string("x").to_string(), "\"x\"");
        assert_eq!(Value::null(AttributeType::String).to_string(), "<null>");
        assert_eq!(Value::unknown(AttributeType::Bool).to_string(), "<unknown>");
        assert_eq!(
            obj(vec![("a", Value::bool(true)), ("b", Value::string("x"))]).to_string(),
            "{\"a\":true,\"b\":\"x\"}"
        );
        assert_eq!(Value::int64(42).to_string(), "42");
    }

    #[test]
    fn test_terraform_round_trip_with_unknowns() {
        let ty = AttributeType::object([
            ("id", AttributeType::String),
            ("port", AttributeType::Int64),
            ("tags", AttributeType::map(AttributeType::String)),
        ]);
        let value = obj(vec![
            ("id", Value::unknown(AttributeType::String)),
            ("port", Value::int64(8080)),
            ("tags", Value::null(AttributeType::map(AttributeType::String))),
        ]);

        let raw = value.to_terraform_value();
        let back = ty.value_from_terraform(&raw).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_int64_rejects_fractions() {
        let raw = WireValue::from_json(&WireType::Number, &json!(1.5)).unwrap();
        let err = AttributeType::Int64.value_from_terraform(&raw).unwrap_err();
        assert!(err.message.contains("not a 64-bit integer"));
    }

    #[test]
    fn test_int64_survives_the_wire_exactly() {
        for n in [9_007_199_254_740_993_i64, i64::MAX, i64::MIN] {
            let raw = WireValue::from_json(&WireType::Number, &json!(n)).unwrap();
            let value = AttributeType::Int64.value_from_terraform(&raw).unwrap();
            assert_eq!(value.as_i64(), Some(n));

            let mut unknowns = Vec::new();
            let encoded = Value::int64(n)
                .to_terraform_value()
                .to_json(&WireType::Number, &mut unknowns);
            assert_eq!(encoded, json!(n));
        }
    }

    #[test]
    fn test_int64_rejects_out_of_range() {
        let too_big: serde_json::Value = serde_json::from_str("9223372036854775808").unwrap();
        let raw = WireValue::from_json(&WireType::Number, &too_big).unwrap();
        let err = AttributeType::Int64.value_from_terraform(&raw).unwrap_err();
        assert!(err.message.contains("not a 64-bit integer"));

        let inexact = WireValue::from_json(&WireType::Number, &json!(1e17)).unwrap();
        assert!(AttributeType::Int64.value_from_terraform(&inexact).is_err());

        let whole = WireValue::from_json(&WireType::Number, &json!(42.0)).unwrap();
        assert_eq!(AttributeType::Int64.value_from_terraform(&whole).unwrap().as_i64(), Some(42));
    }

    #[test]
    fn test_type_mismatch() {
        let raw = WireValue::from_json(&WireType::Bool, &json!(true)).unwrap();
        assert!(AttributeType::String.value_from_terraform(&raw).is_err());
    }

    #[test]
    fn test_dynamic_takes_concrete_type() {
        let raw = WireValue::from_json(
            &WireType::DynamicPseudoType,
            &json!({"value": {"a": 1}, "type": ["object", {"a": "number"}]}),
        )
        .unwrap();
        let value = AttributeType::Dynamic.value_from_terraform(&raw).unwrap();
        assert_eq!(value.ty(), &AttributeType::Dynamic);
        assert_eq!(value.walk(&Path::root("a")).unwrap().as_f64(), Some(1.0));

        let back = value.to_terraform_value();
        assert_eq!(back.typ, raw.typ);
    }

    #[test]
    fn test_missing_type_cannot_decode() {
        let raw = WireValue::null(WireType::DynamicPseudoType);
        assert!(AttributeType::Missing.value_from_terraform(&raw).is_err());
    }

    #[test]
    fn test_type_path_steps() {
        let ty = AttributeType::object([(
            "rules",
            AttributeType::list(AttributeType::object([("port", AttributeType::Int64)])),
        )]);

        let path = Path::root("rules").at_list_index(0).at_name("port");
        assert_eq!(ty.walk(&path).unwrap(), &AttributeType::Int64);

        let bad = Path::root("rules").at_map_key("x");
        let err = ty.walk(&bad).unwrap_err();
        assert_eq!(err.remaining, Path::empty().at_map_key("x"));
        assert_eq!(
            err.to_string(),
            "ElementKeyString(\"x\") still remains in the path: \
             cannot apply AttributePathStep ElementKeyString to list(object({port=int64}))"
        );
    }

    #[test]
    fn test_value_path_steps() {
        let tags = Value::set(AttributeType::String, vec![Value::string("a"), Value::string("b")])
            .unwrap();
        let value = obj(vec![("tags", tags), ("name", Value::null(AttributeType::String))]);

        let found = value
            .walk(&Path::root("tags").at_set_value(Value::string("b")))
            .unwrap();
        assert_eq!(found.as_str(), Some("b"));

        assert!(value
            .walk(&Path::root("tags").at_set_value(Value::string("z")))
            .is_err());

        let err = value.walk(&Path::root("name").at_name("x")).unwrap_err();
        assert_eq!(
            err.source,
            PathStepError::NotKnown {
                step: "AttributeName(\"x\")".to_string(),
                state: "null",
            }
        );
    }

    #[test]
    fn test_collection_with_dynamic() {
        assert!(AttributeType::list(AttributeType::Dynamic).contains_collection_with_dynamic());
        assert!(AttributeType::object([(
            "a",
            AttributeType::map(AttributeType::object([("b", AttributeType::Dynamic)]))
        )])
        .contains_collection_with_dynamic());
        assert!(!AttributeType::object([("a", AttributeType::Dynamic)])
            .contains_collection_with_dynamic());
    }
}

//! Wire-level types and values.
//!
//! These mirror the protocol's own type system: `Number` has no integer or
//! float distinction, tuples exist, and positions declared as dynamic carry
//! values of a concrete type chosen at runtime. Framework values convert to
//! and from these via [`AttributeType`](crate::value::AttributeType).
//!
//! Values travel as JSON. Types are encoded the way the protocol expects:
//!
//! ```
//! use hemmer_provider_framework::wire::WireType;
//!
//! let ty = WireType::List(Box::new(WireType::String));
//! assert_eq!(serde_json::to_string(&ty).unwrap(), r#"["list","string"]"#);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;

use crate::error::ConversionError;
use crate::path::{Path, PathStep};

/// A protocol type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireType {
    /// UTF-8 string.
    String,
    /// Arbitrary number.
    Number,
    /// Boolean.
    Bool,
    /// Ordered list of one element type.
    List(Box<WireType>),
    /// Unordered set of one element type.
    Set(Box<WireType>),
    /// String-keyed map of one element type.
    Map(Box<WireType>),
    /// Fixed attributes, each with its own type.
    Object(BTreeMap<String, WireType>),
    /// Fixed positions, each with its own type.
    Tuple(Vec<WireType>),
    /// Any type, decided by the value.
    DynamicPseudoType,
}

impl WireType {
    /// Whether a value of type `other` may appear where `self` is declared.
    pub fn accepts(&self, other: &WireType) -> bool {
        match (self, other) {
            (WireType::DynamicPseudoType, _) => true,
            (WireType::List(a), WireType::List(b))
            | (WireType::Set(a), WireType::Set(b))
            | (WireType::Map(a), WireType::Map(b)) => a.accepts(b),
            (WireType::Object(a), WireType::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(name, ty)| b.get(name).is_some_and(|other| ty.accepts(other)))
            },
            (WireType::Tuple(a), WireType::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.accepts(y))
            },
            (a, b) => a == b,
        }
    }

    /// The JSON encoding of this type.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            WireType::String => json!("string"),
            WireType::Number => json!("number"),
            WireType::Bool => json!("bool"),
            WireType::DynamicPseudoType => json!("dynamic"),
            WireType::List(elem) => json!(["list", elem.to_json()]),
            WireType::Set(elem) => json!(["set", elem.to_json()]),
            WireType::Map(elem) => json!(["map", elem.to_json()]),
            WireType::Object(attrs) => {
                let attrs: serde_json::Map<String, serde_json::Value> = attrs
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.to_json()))
                    .collect();
                json!(["object", attrs])
            },
            WireType::Tuple(elems) => {
                let elems: Vec<serde_json::Value> = elems.iter().map(WireType::to_json).collect();
                json!(["tuple", elems])
            },
        }
    }

    /// Parse the JSON encoding of a type.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, ConversionError> {
        match json {
            serde_json::Value::String(name) => match name.as_str() {
                "string" => Ok(WireType::String),
                "number" => Ok(WireType::Number),
                "bool" => Ok(WireType::Bool),
                "dynamic" => Ok(WireType::DynamicPseudoType),
                other => Err(ConversionError::new(format!("unknown type {:?}", other))),
            },
            serde_json::Value::Array(parts) if parts.len() == 2 => {
                let kind = parts[0]
                    .as_str()
                    .ok_or_else(|| ConversionError::new("type kind must be a string"))?;
                match (kind, &parts[1]) {
                    ("list", elem) => Ok(WireType::List(Box::new(Self::from_json(elem)?))),
                    ("set", elem) => Ok(WireType::Set(Box::new(Self::from_json(elem)?))),
                    ("map", elem) => Ok(WireType::Map(Box::new(Self::from_json(elem)?))),
                    ("object", serde_json::Value::Object(attrs)) => attrs
                        .iter()
                        .map(|(name, ty)| Ok((name.clone(), Self::from_json(ty)?)))
                        .collect::<Result<_, ConversionError>>()
                        .map(WireType::Object),
                    ("tuple", serde_json::Value::Array(elems)) => elems
                        .iter()
                        .map(Self::from_json)
                        .collect::<Result<_, _>>()
                        .map(WireType::Tuple),
                    (other, _) => Err(ConversionError::new(format!(
                        "invalid type specification for {:?}",
                        other
                    ))),
                }
            },
            other => Err(ConversionError::new(format!(
                "invalid type specification {}",
                other
            ))),
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for WireType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WireType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        WireType::from_json(&json).map_err(D::Error::custom)
    }
}

/// Payload of a known [`WireValue`].
#[derive(Debug, Clone, PartialEq)]
pub enum WireKnown {
    /// String payload.
    String(String),
    /// Number payload, kept as written so integers stay exact.
    Number(serde_json::Number),
    /// Bool payload.
    Bool(bool),
    /// List elements.
    List(Vec<WireValue>),
    /// Set elements.
    Set(Vec<WireValue>),
    /// Map elements.
    Map(BTreeMap<String, WireValue>),
    /// Object attributes.
    Object(BTreeMap<String, WireValue>),
    /// Tuple elements.
    Tuple(Vec<WireValue>),
}

/// Whether a [`WireValue`] is null, unknown, or known.
#[derive(Debug, Clone, PartialEq)]
pub enum WireState {
    /// Explicitly absent.
    Null,
    /// Not yet determined.
    Unknown,
    /// Present with a payload.
    Known(WireKnown),
}

/// A protocol value with its concrete type.
#[derive(Debug, Clone, PartialEq)]
pub struct WireValue {
    /// The type of this value. For unknown or null values at dynamic
    /// positions this is [`WireType::DynamicPseudoType`].
    pub typ: WireType,
    /// The state and payload.
    pub state: WireState,
}

impl WireValue {
    /// A null value.
    pub fn null(typ: WireType) -> Self {
        Self {
            typ,
            state: WireState::Null,
        }
    }

    /// An unknown value.
    pub fn unknown(typ: WireType) -> Self {
        Self {
            typ,
            state: WireState::Unknown,
        }
    }

    /// A known value.
    pub fn known(typ: WireType, payload: WireKnown) -> Self {
        Self {
            typ,
            state: WireState::Known(payload),
        }
    }

    /// Whether the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self.state, WireState::Null)
    }

    /// Whether the value is unknown.
    pub fn is_unknown(&self) -> bool {
        matches!(self.state, WireState::Unknown)
    }

    /// Decode JSON using the declared type of the position.
    pub fn from_json(typ: &WireType, json: &serde_json::Value) -> Result<Self, ConversionError> {
        decode(typ, json, &Path::empty())
    }

    /// Encode as JSON for a position declared as `typ`.
    ///
    /// Unknown values are written as `null` and their positions appended to
    /// `unknowns`. Set elements are addressed by their position.
    pub fn to_json(&self, typ: &WireType, unknowns: &mut Vec<Path>) -> serde_json::Value {
        encode(self, typ, &Path::empty(), unknowns)
    }

    /// Replace the value at `path` with an unknown of the same type.
    ///
    /// `path` addresses elements positionally, the same way
    /// [`to_json`](Self::to_json) reports them.
    pub fn mark_unknown(&mut self, path: &Path) -> Result<(), ConversionError> {
        let mut current = self;
        for (index, step) in path.steps().iter().enumerate() {
            let here = Path::from_steps(path.steps()[..index].to_vec());
            let next = match (&mut current.state, step) {
                (WireState::Known(WireKnown::Object(attrs)), PathStep::AttributeName(name)) => {
                    attrs.get_mut(name)
                },
                (WireState::Known(WireKnown::Map(elems)), PathStep::ElementKeyString(key)) => {
                    elems.get_mut(key)
                },
                (
                    WireState::Known(
                        WireKnown::List(elems) | WireKnown::Set(elems) | WireKnown::Tuple(elems),
                    ),
                    PathStep::ElementKeyInt(pos),
                ) => usize::try_from(*pos).ok().and_then(|pos| elems.get_mut(pos)),
                _ => None,
            };
            current = next.ok_or_else(|| {
                ConversionError::at(here, format!("unknown value path step {} not found", step))
            })?;
        }
        current.state = WireState::Unknown;
        Ok(())
    }
}

fn decode(typ: &WireType, json: &serde_json::Value, path: &Path) -> Result<WireValue, ConversionError> {
    use serde_json::Value as Json;

    if json.is_null() {
        return Ok(WireValue::null(typ.clone()));
    }

    let mismatch = || ConversionError::at(path.clone(), format!("expected {}, got {}", typ, json));

    let payload = match (typ, json) {
        (WireType::String, Json::String(s)) => WireKnown::String(s.clone()),
        (WireType::Number, Json::Number(n)) => WireKnown::Number(n.clone()),
        (WireType::Number, Json::String(s)) => WireKnown::Number(parse_number(s).ok_or_else(mismatch)?),
        (WireType::Bool, Json::Bool(b)) => WireKnown::Bool(*b),
        (WireType::List(elem), Json::Array(items)) => WireKnown::List(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| decode(elem, item, &path.at_list_index(i as i64)))
                .collect::<Result<_, _>>()?,
        ),
        (WireType::Set(elem), Json::Array(items)) => WireKnown::Set(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| decode(elem, item, &path.at_list_index(i as i64)))
                .collect::<Result<_, _>>()?,
        ),
        (WireType::Tuple(elems), Json::Array(items)) => {
            if elems.len() != items.len() {
                return Err(mismatch());
            }
            WireKnown::Tuple(
                elems
                    .iter()
                    .zip(items)
                    .enumerate()
                    .map(|(i, (ty, item))| decode(ty, item, &path.at_list_index(i as i64)))
                    .collect::<Result<_, _>>()?,
            )
        },
        (WireType::Map(elem), Json::Object(items)) => WireKnown::Map(
            items
                .iter()
                .map(|(key, item)| Ok((key.clone(), decode(elem, item, &path.at_map_key(key))?)))
                .collect::<Result<_, ConversionError>>()?,
        ),
        (WireType::Object(attrs), Json::Object(items)) => {
            if let Some(extra) = items.keys().find(|key| !attrs.contains_key(*key)) {
                return Err(ConversionError::at(
                    path.clone(),
                    format!("unsupported attribute {:?}", extra),
                ));
            }
            WireKnown::Object(
                attrs
                    .iter()
                    .map(|(name, ty)| {
                        let item = items.get(name).unwrap_or(&Json::Null);
                        Ok((name.clone(), decode(ty, item, &path.at_name(name))?))
                    })
                    .collect::<Result<_, ConversionError>>()?,
            )
        },
        (WireType::DynamicPseudoType, Json::Object(envelope)) => {
            let (Some(value), Some(ty)) = (envelope.get("value"), envelope.get("type")) else {
                return Err(ConversionError::at(
                    path.clone(),
                    "dynamic value must have \"value\" and \"type\" fields",
                ));
            };
            let concrete = WireType::from_json(ty).map_err(|e| e.or_at(path))?;
            return decode(&concrete, value, path);
        },
        _ => return Err(mismatch()),
    };

    Ok(WireValue::known(typ.clone(), payload))
}

fn encode(
    value: &WireValue,
    declared: &WireType,
    path: &Path,
    unknowns: &mut Vec<Path>,
) -> serde_json::Value {
    use serde_json::Value as Json;

    let payload = match &value.state {
        WireState::Null => return Json::Null,
        WireState::Unknown => {
            unknowns.push(path.clone());
            return Json::Null;
        },
        WireState::Known(payload) => payload,
    };

    if *declared == WireType::DynamicPseudoType && value.typ != WireType::DynamicPseudoType {
        return json!({
            "value": encode(value, &value.typ, path, unknowns),
            "type": value.typ.to_json(),
        });
    }

    let elem_type = |i: usize| match declared {
        WireType::List(elem) | WireType::Set(elem) | WireType::Map(elem) => (**elem).clone(),
        WireType::Tuple(elems) => elems.get(i).cloned().unwrap_or(WireType::DynamicPseudoType),
        _ => WireType::DynamicPseudoType,
    };

    match payload {
        WireKnown::String(s) => Json::String(s.clone()),
        WireKnown::Number(n) => Json::Number(n.clone()),
        WireKnown::Bool(b) => Json::Bool(*b),
        WireKnown::List(elems) | WireKnown::Set(elems) | WireKnown::Tuple(elems) => Json::Array(
            elems
                .iter()
                .enumerate()
                .map(|(i, elem)| encode(elem, &elem_type(i), &path.at_list_index(i as i64), unknowns))
                .collect(),
        ),
        WireKnown::Map(elems) => Json::Object(
            elems
                .iter()
                .map(|(key, elem)| {
                    (key.clone(), encode(elem, &elem_type(0), &path.at_map_key(key), unknowns))
                })
                .collect(),
        ),
        WireKnown::Object(attrs) => Json::Object(
            attrs
                .iter()
                .map(|(name, attr)| {
                    let declared_attr = match declared {
                        WireType::Object(types) => {
                            types.get(name).cloned().unwrap_or_else(|| attr.typ.clone())
                        },
                        _ => attr.typ.clone(),
                    };
                    (name.clone(), encode(attr, &declared_attr, &path.at_name(name), unknowns))
                })
                .collect(),
        ),
    }
}

fn parse_number(s: &str) -> Option<serde_json::Number> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(i.into());
    }
    s.parse::<f64>().ok().and_then(serde_json::Number::from_f64)
}

/// The wire form of a float. Whole numbers are written as integers.
/// Returns `None` for NaN and infinities, which JSON cannot carry.
pub(crate) fn number_from_f64(n: f64) -> Option<serde_json::Number> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Some((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
    }
}

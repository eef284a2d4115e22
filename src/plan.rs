//! Plan transformation.
//!
//! Before a plan is returned, computed attributes the practitioner left
//! unset are marked unknown so the caller knows their final value is only
//! decided during apply.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::error::ConversionError;
use crate::path::Path;
use crate::schema::{Attribute, AttributeKind, NestedAttributes, NestingMode, Schema};
use crate::value::{AttributeType, Value};

/// Replace every computed attribute that is null in `planned` and null or
/// absent in `config` with an unknown value of the same type.
///
/// The walk follows the schema. Values inside primitive attributes are
/// never touched, even when they hold collections or objects. Applying the
/// transform to its own output changes nothing.
pub fn mark_computed_nulls_as_unknown(
    schema: &Schema,
    planned: &Value,
    config: &Value,
) -> Result<Value, ConversionError> {
    transform_object(&schema.attributes, planned, config, &Path::empty())
}

fn transform_object(
    attributes: &BTreeMap<String, Attribute>,
    value: &Value,
    config: &Value,
    path: &Path,
) -> Result<Value, ConversionError> {
    let Some(entries) = value.entries() else {
        return Ok(value.clone());
    };
    let AttributeType::Object(types) = value.ty() else {
        return Err(ConversionError::at(
            path.clone(),
            format!("expected an object value, got {}", value.ty()),
        ));
    };

    let mut out = BTreeMap::new();
    for (name, child) in entries {
        let child_path = path.at_name(name.clone());
        let attr = attributes.get(name).ok_or_else(|| {
            ConversionError::at(child_path.clone(), "couldn't find attribute in resource schema")
        })?;
        out.insert(name.clone(), transform_attribute(attr, child, config, &child_path)?);
    }
    Value::object(types.clone(), out).map_err(|e| e.or_at(path))
}

fn transform_attribute(
    attr: &Attribute,
    value: &Value,
    config: &Value,
    path: &Path,
) -> Result<Value, ConversionError> {
    let value = match &attr.kind {
        AttributeKind::Nested(nested) => transform_nested(nested, value, config, path)?,
        AttributeKind::Primitive(_) => value.clone(),
    };

    if !value.is_null() {
        return Ok(value);
    }
    if !attr.is_computed() {
        trace!(path = %path, "attribute is not computed in schema, not marking unknown");
        return Ok(value);
    }
    if !null_in_config(config, path) {
        trace!(path = %path, "attribute not null in config, not marking unknown");
        return Ok(value);
    }

    debug!(path = %path, "marking computed attribute that is null in the config as unknown");
    Ok(Value::unknown(value.ty().clone()))
}

/// A config position that cannot be reached counts as null.
fn null_in_config(config: &Value, path: &Path) -> bool {
    config.walk(path).map_or(true, Value::is_null)
}

fn transform_nested(
    nested: &NestedAttributes,
    value: &Value,
    config: &Value,
    path: &Path,
) -> Result<Value, ConversionError> {
    if !value.is_known() {
        return Ok(value.clone());
    }

    let attrs = &nested.attributes;
    let elem = nested.object_type();
    let result = match nested.nesting_mode {
        NestingMode::Single => return transform_object(attrs, value, config, path),
        NestingMode::List => {
            let elems = value
                .elements()
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(|(i, e)| transform_object(attrs, e, config, &path.at_list_index(i as i64)))
                .collect::<Result<_, _>>()?;
            Value::list(elem, elems)
        },
        NestingMode::Set => {
            let elems = value
                .elements()
                .unwrap_or_default()
                .iter()
                .map(|e| transform_object(attrs, e, config, &path.at_set_value(e.clone())))
                .collect::<Result<_, _>>()?;
            Value::set(elem, elems)
        },
        NestingMode::Map => {
            let mut elems = BTreeMap::new();
            if let Some(entries) = value.entries() {
                for (key, e) in entries {
                    let transformed =
                        transform_object(attrs, e, config, &path.at_map_key(key.clone()))?;
                    elems.insert(key.clone(), transformed);
                }
            }
            Value::map(elem, elems)
        },
    };
    result.map_err(|e| e.or_at(path))
}

/// Paths of `requires_replace` attributes whose planned value differs from
/// the prior one. Nothing needs replacing when either side is null.
pub fn requires_replace(schema: &Schema, prior: &Value, planned: &Value) -> Vec<Path> {
    let mut out = Vec::new();
    if prior.is_null() || planned.is_null() {
        return out;
    }
    collect_replace(&schema.attributes, prior, planned, &Path::empty(), &mut out);
    normalize_requires_replace(out)
}

fn collect_replace(
    attributes: &BTreeMap<String, Attribute>,
    prior: &Value,
    planned: &Value,
    path: &Path,
    out: &mut Vec<Path>,
) {
    let Some(entries) = planned.entries() else {
        return;
    };
    for (name, child) in entries {
        let Some(attr) = attributes.get(name) else {
            continue;
        };
        let child_path = path.at_name(name.clone());
        if attr.requires_replace {
            let changed = match prior.walk(&child_path) {
                Ok(before) => before != child,
                Err(_) => !child.is_null(),
            };
            if changed {
                out.push(child_path.clone());
            }
        }
        if let AttributeKind::Nested(nested) = &attr.kind {
            collect_nested_replace(nested, prior, child, &child_path, out);
        }
    }
}

fn collect_nested_replace(
    nested: &NestedAttributes,
    prior: &Value,
    planned: &Value,
    path: &Path,
    out: &mut Vec<Path>,
) {
    let attrs = &nested.attributes;
    match nested.nesting_mode {
        NestingMode::Single => collect_replace(attrs, prior, planned, path, out),
        NestingMode::List => {
            for (i, e) in planned.elements().unwrap_or_default().iter().enumerate() {
                collect_replace(attrs, prior, e, &path.at_list_index(i as i64), out);
            }
        },
        NestingMode::Set => {
            for e in planned.elements().unwrap_or_default() {
                collect_replace(attrs, prior, e, &path.at_set_value(e.clone()), out);
            }
        },
        NestingMode::Map => {
            if let Some(entries) = planned.entries() {
                for (key, e) in entries {
                    collect_replace(attrs, prior, e, &path.at_map_key(key.clone()), out);
                }
            }
        },
    }
}

/// Sort paths by their string form and drop duplicates.
pub fn normalize_requires_replace(mut paths: Vec<Path>) -> Vec<Path> {
    paths.sort_by_cached_key(Path::to_string);
    paths.dedup_by(|a, b| {
        let duplicate = a == b;
        if duplicate {
            debug!(path = %a, "attribute found multiple times in requires_replace, removing duplicate");
        }
        duplicate
    });
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeFlags;

    fn object(attrs: Vec<(&str, Value)>) -> Value {
        let types = attrs
            .iter()
            .map(|(n, v)| (n.to_string(), v.ty().clone()))
            .collect();
        let values = attrs.into_iter().map(|(n, v)| (n.to_string(), v)).collect();
        Value::object(types, values).unwrap()
    }

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("region", Attribute::optional_string().with_requires_replace())
            .with_attribute(
                "size",
                Attribute::new(AttributeType::Int64, AttributeFlags::optional_computed()),
            )
            .with_attribute(
                "tags",
                Attribute::new(
                    AttributeType::map(AttributeType::String),
                    AttributeFlags::computed(),
                ),
            )
    }

    fn value(id: Value, region: Value, size: Value) -> Value {
        object(vec![
            ("name", Value::string("web")),
            ("id", id),
            ("region", region),
            ("size", size),
            ("tags", Value::null(AttributeType::map(AttributeType::String))),
        ])
    }

    #[test]
    fn test_computed_nulls_become_unknown() {
        let planned = value(
            Value::null(AttributeType::String),
            Value::null(AttributeType::String),
            Value::null(AttributeType::Int64),
        );

        let result = mark_computed_nulls_as_unknown(&schema(), &planned, &planned).unwrap();

        assert!(result.attribute("id").unwrap().is_unknown());
        assert!(result.attribute("size").unwrap().is_unknown());
        assert!(result.attribute("tags").unwrap().is_unknown());
        // Optional only: stays null.
        assert!(result.attribute("region").unwrap().is_null());
        assert_eq!(result.attribute("name").unwrap(), &Value::string("web"));
    }

    #[test]
    fn test_config_value_blocks_marking() {
        let planned = value(
            Value::null(AttributeType::String),
            Value::null(AttributeType::String),
            Value::null(AttributeType::Int64),
        );
        let config = value(
            Value::null(AttributeType::String),
            Value::null(AttributeType::String),
            Value::int64(3),
        );

        let result = mark_computed_nulls_as_unknown(&schema(), &planned, &config).unwrap();
        assert!(result.attribute("size").unwrap().is_null());
        assert!(result.attribute("id").unwrap().is_unknown());
    }

    #[test]
    fn test_transform_is_idempotent() {
        let planned = value(
            Value::null(AttributeType::String),
            Value::string("eu"),
            Value::null(AttributeType::Int64),
        );
        let once = mark_computed_nulls_as_unknown(&schema(), &planned, &planned).unwrap();
        let twice = mark_computed_nulls_as_unknown(&schema(), &once, &planned).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_no_descent_into_primitive_attributes() {
        let schema = Schema::v0().with_attribute(
            "settings",
            Attribute::new(
                AttributeType::object([("inner", AttributeType::String)]),
                AttributeFlags::optional_computed(),
            ),
        );
        let settings = object(vec![("inner", Value::null(AttributeType::String))]);
        let planned = object(vec![("settings", settings.clone())]);

        let result = mark_computed_nulls_as_unknown(&schema, &planned, &planned).unwrap();
        assert_eq!(result.attribute("settings").unwrap(), &settings);
    }

    #[test]
    fn test_nested_list_attributes() {
        let nested = NestedAttributes::list()
            .with_attribute("port", Attribute::required_int64())
            .with_attribute("rule_id", Attribute::computed_string());
        let schema = Schema::v0().with_attribute(
            "rules",
            Attribute::nested(nested.clone(), AttributeFlags::optional()),
        );

        let rule = object(vec![
            ("port", Value::int64(80)),
            ("rule_id", Value::null(AttributeType::String)),
        ]);
        let rules = Value::list(nested.object_type(), vec![rule]).unwrap();
        let planned = object(vec![("rules", rules)]);

        let result = mark_computed_nulls_as_unknown(&schema, &planned, &planned).unwrap();
        let rule_id = result
            .walk(&Path::root("rules").at_list_index(0).at_name("rule_id"))
            .unwrap();
        assert!(rule_id.is_unknown());
        assert_eq!(
            result.walk(&Path::root("rules").at_list_index(0).at_name("port")).unwrap(),
            &Value::int64(80)
        );
    }

    #[test]
    fn test_nested_set_attributes() {
        let nested = NestedAttributes::set()
            .with_attribute("port", Attribute::required_int64())
            .with_attribute(
                "rule_id",
                Attribute::new(AttributeType::String, AttributeFlags::optional_computed()),
            );
        let schema = Schema::v0().with_attribute(
            "rules",
            Attribute::nested(nested.clone(), AttributeFlags::optional()),
        );

        let rule = |port: i64, rule_id: Value| {
            object(vec![("port", Value::int64(port)), ("rule_id", rule_id)])
        };
        let rules = Value::set(
            nested.object_type(),
            vec![
                rule(80, Value::null(AttributeType::String)),
                rule(443, Value::string("r-443")),
            ],
        )
        .unwrap();
        let planned = object(vec![("rules", rules)]);

        let once = mark_computed_nulls_as_unknown(&schema, &planned, &planned).unwrap();
        let elems = once.attribute("rules").unwrap().elements().unwrap();
        assert_eq!(elems.len(), 2);
        for elem in elems {
            let rule_id = elem.attribute("rule_id").unwrap();
            match elem.attribute("port").unwrap().as_i64() {
                Some(80) => assert!(rule_id.is_unknown()),
                Some(443) => assert_eq!(rule_id, &Value::string("r-443")),
                other => panic!("unexpected port {:?}", other),
            }
        }

        let twice = mark_computed_nulls_as_unknown(&schema, &once, &planned).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_nested_map_attributes() {
        let nested = NestedAttributes::map().with_attribute("arn", Attribute::computed_string());
        let schema = Schema::v0().with_attribute(
            "roles",
            Attribute::nested(nested.clone(), AttributeFlags::optional()),
        );
        let roles = Value::map(
            nested.object_type(),
            BTreeMap::from([(
                "admin".to_string(),
                object(vec![("arn", Value::null(AttributeType::String))]),
            )]),
        )
        .unwrap();
        let planned = object(vec![("roles", roles)]);

        let result = mark_computed_nulls_as_unknown(&schema, &planned, &planned).unwrap();
        assert!(result
            .walk(&Path::root("roles").at_map_key("admin").at_name("arn"))
            .unwrap()
            .is_unknown());
    }

    #[test]
    fn test_null_plan_is_unchanged() {
        let planned = Value::null(schema().attribute_type());
        let result = mark_computed_nulls_as_unknown(&schema(), &planned, &planned).unwrap();
        assert_eq!(result, planned);
    }

    #[test]
    fn test_unknown_attribute_in_value_is_an_error() {
        let planned = object(vec![("other", Value::string("x"))]);
        let err = mark_computed_nulls_as_unknown(&schema(), &planned, &planned).unwrap_err();
        assert_eq!(err.path, Some(Path::root("other")));
    }

    #[test]
    fn test_requires_replace() {
        let prior = value(
            Value::string("i-1"),
            Value::string("us"),
            Value::int64(1),
        );
        let same = requires_replace(&schema(), &prior, &prior);
        assert!(same.is_empty());

        let planned = value(
            Value::string("i-1"),
            Value::string("eu"),
            Value::int64(2),
        );
        assert_eq!(
            requires_replace(&schema(), &prior, &planned),
            vec![Path::root("region")]
        );

        let null = Value::null(schema().attribute_type());
        assert!(requires_replace(&schema(), &null, &planned).is_empty());
        assert!(requires_replace(&schema(), &prior, &null).is_empty());
    }

    #[test]
    fn test_normalize_requires_replace() {
        let paths = vec![
            Path::root("b"),
            Path::root("a").at_list_index(1),
            Path::root("b"),
            Path::root("a").at_list_index(0),
        ];
        assert_eq!(
            normalize_requires_replace(paths),
            vec![
                Path::root("a").at_list_index(0),
                Path::root("a").at_list_index(1),
                Path::root("b"),
            ]
        );
    }
}

//! Exact locations inside a schema-typed value.
//!
//! A [`Path`] is an ordered list of [`PathStep`]s starting at the root
//! object of a schema. Extending a path always returns a new path, so a
//! base path can be shared by many children without them affecting each
//! other:
//!
//! ```
//! use hemmer_provider_framework::path::Path;
//!
//! let base = Path::root("rules");
//! let first = base.at_list_index(0).at_name("port");
//! let second = base.at_list_index(1).at_name("port");
//!
//! assert_eq!(base.to_string(), "rules");
//! assert_eq!(first.to_string(), "rules[0].port");
//! assert_eq!(second.to_string(), "rules[1].port");
//! ```

use std::fmt;

use crate::error::{PathStepError, WalkError};
use crate::expression::Expression;
use crate::value::Value;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    /// Select an attribute of an object or nested attribute by name.
    AttributeName(String),
    /// Select a map element by key.
    ElementKeyString(String),
    /// Select a list element by position.
    ElementKeyInt(i64),
    /// Select a set element by its value.
    ElementKeyValue(Value),
}

impl PathStep {
    /// The name of this kind of step.
    pub fn kind(&self) -> &'static str {
        match self {
            PathStep::AttributeName(_) => "AttributeName",
            PathStep::ElementKeyString(_) => "ElementKeyString",
            PathStep::ElementKeyInt(_) => "ElementKeyInt",
            PathStep::ElementKeyValue(_) => "ElementKeyValue",
        }
    }

    /// Render the step as it appears in a [`Path`] string, without the
    /// separating dot.
    fn write_path_segment(&self, f: &mut fmt::Formatter<'_>, first: bool) -> fmt::Result {
        match self {
            PathStep::AttributeName(name) if first => write!(f, "{}", name),
            PathStep::AttributeName(name) => write!(f, ".{}", name),
            PathStep::ElementKeyString(key) => write!(f, "[{:?}]", key),
            PathStep::ElementKeyInt(index) => write!(f, "[{}]", index),
            PathStep::ElementKeyValue(value) => write!(f, "[Value({})]", value),
        }
    }
}

/// Renders the step in its standalone form, e.g. `AttributeName("id")`.
impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::AttributeName(name) => write!(f, "AttributeName({:?})", name),
            PathStep::ElementKeyString(key) => write!(f, "ElementKeyString({:?})", key),
            PathStep::ElementKeyInt(index) => write!(f, "ElementKeyInt({})", index),
            PathStep::ElementKeyValue(value) => write!(f, "ElementKeyValue({})", value),
        }
    }
}

/// An exact location in a value, starting at the schema root.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    steps: Vec<PathStep>,
}

impl Path {
    /// The empty path, addressing the root object itself.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A path starting at the named root attribute.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            steps: vec![PathStep::AttributeName(name.into())],
        }
    }

    /// Build a path from explicit steps.
    pub fn from_steps(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    fn extended(&self, step: PathStep) -> Self {
        let mut steps = Vec::with_capacity(self.steps.len() + 1);
        steps.extend_from_slice(&self.steps);
        steps.push(step);
        Self { steps }
    }

    /// A new path that continues into the named attribute.
    pub fn at_name(&self, name: impl Into<String>) -> Self {
        self.extended(PathStep::AttributeName(name.into()))
    }

    /// A new path that continues into a list element.
    pub fn at_list_index(&self, index: i64) -> Self {
        self.extended(PathStep::ElementKeyInt(index))
    }

    /// A new path that continues into a map element.
    pub fn at_map_key(&self, key: impl Into<String>) -> Self {
        self.extended(PathStep::ElementKeyString(key.into()))
    }

    /// A new path that continues into a set element.
    pub fn at_set_value(&self, value: Value) -> Self {
        self.extended(PathStep::ElementKeyValue(value))
    }

    /// The path without its last step. The parent of the empty path is
    /// the empty path.
    pub fn parent_path(&self) -> Self {
        match self.steps.split_last() {
            Some((_, rest)) => Self {
                steps: rest.to_vec(),
            },
            None => Self::empty(),
        }
    }

    /// All steps in order.
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// The final step, if any.
    pub fn last_step(&self) -> Option<&PathStep> {
        self.steps.last()
    }

    /// The first step and the path of everything after it.
    pub fn next_step(&self) -> Option<(&PathStep, Path)> {
        self.steps.split_first().map(|(first, rest)| {
            (
                first,
                Path {
                    steps: rest.to_vec(),
                },
            )
        })
    }

    /// Whether this is the empty path.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether `self` starts with every step of `prefix`.
    pub fn has_prefix(&self, prefix: &Path) -> bool {
        self.steps.len() >= prefix.steps.len()
            && self.steps.iter().zip(prefix.steps.iter()).all(|(a, b)| a == b)
    }

    /// An expression matching exactly this path.
    pub fn expression(&self) -> Expression {
        Expression::from_path(self)
    }

    /// The steps rendered in their standalone form and joined by dots,
    /// e.g. `ElementKeyInt(1).AttributeName("name")`.
    pub fn step_list(&self) -> String {
        self.steps
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            step.write_path_segment(f, i == 0)?;
        }
        Ok(())
    }
}

impl From<Vec<PathStep>> for Path {
    fn from(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }
}

impl WalkError {
    /// Build the error for the step at `index` of `path`.
    pub(crate) fn at_step(path: &Path, index: usize, source: PathStepError) -> Self {
        Self {
            remaining: Path::from_steps(path.steps[index..].to_vec()),
            source,
        }
    }
}

/// Apply every step of `path` to `start`, one at a time.
///
/// Walking stops at the first step that cannot be applied; the returned
/// error carries that step and everything after it.
pub(crate) fn walk<T>(
    start: T,
    path: &Path,
    mut apply: impl FnMut(T, &PathStep) -> Result<T, PathStepError>,
) -> Result<T, WalkError> {
    let mut node = start;
    for (index, step) in path.steps.iter().enumerate() {
        node = apply(node, step).map_err(|source| WalkError::at_step(path, index, source))?;
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_path_display() {
        let cases = vec![
            (Path::empty(), ""),
            (Path::root("test"), "test"),
            (Path::root("test1").at_list_index(0).at_name("test2"), "test1[0].test2"),
            (Path::root("test").at_map_key("key"), "test[\"key\"]"),
            (
                Path::root("test").at_set_value(Value::string("x")),
                "test[Value(\"x\")]",
            ),
            (Path::empty().at_list_index(0), "[0]"),
        ];

        for (path, expected) in cases {
            assert_eq!(path.to_string(), expected);
        }
    }

    #[test]
    fn test_extension_does_not_alias() {
        let base = Path::root("a").at_name("b");
        let left = base.at_name("c");
        let right = base.at_name("d");

        assert_eq!(base.len(), 2);
        assert_eq!(left.to_string(), "a.b.c");
        assert_eq!(right.to_string(), "a.b.d");
        assert_eq!(left.parent_path(), base);
    }

    #[test]
    fn test_parent_of_empty_is_empty() {
        assert_eq!(Path::empty().parent_path(), Path::empty());
        assert_eq!(Path::root("a").parent_path(), Path::empty());
    }

    #[test]
    fn test_next_and_last_step() {
        let path = Path::root("a").at_list_index(3);
        let (first, rest) = path.next_step().unwrap();
        assert_eq!(first, &PathStep::AttributeName("a".to_string()));
        assert_eq!(rest, Path::empty().at_list_index(3));
        assert_eq!(path.last_step(), Some(&PathStep::ElementKeyInt(3)));
        assert!(Path::empty().next_step().is_none());
    }

    #[test]
    fn test_parent_plus_last_step_rebuilds_path() {
        let base = Path::root("a");
        let paths = [
            base.at_name("b"),
            base.at_list_index(2),
            base.at_map_key("k"),
            base.at_set_value(Value::string("v")),
        ];
        for path in paths {
            let parent = path.parent_path();
            let rebuilt = match path.last_step().unwrap().clone() {
                PathStep::AttributeName(name) => parent.at_name(name),
                PathStep::ElementKeyInt(index) => parent.at_list_index(index),
                PathStep::ElementKeyString(key) => parent.at_map_key(key),
                PathStep::ElementKeyValue(value) => parent.at_set_value(value),
            };
            assert_eq!(parent, base);
            assert_eq!(rebuilt, path);
        }
    }

    #[test]
    fn test_equality_is_stepwise() {
        assert_eq!(Path::root("a").at_map_key("k"), Path::root("a").at_map_key("k"));
        assert_ne!(Path::root("a").at_map_key("0"), Path::root("a").at_list_index(0));
        assert_ne!(Path::root("a"), Path::root("a").at_name("b"));
    }

    #[test]
    fn test_has_prefix() {
        let path = Path::root("a").at_list_index(0).at_name("b");
        assert!(path.has_prefix(&Path::empty()));
        assert!(path.has_prefix(&Path::root("a").at_list_index(0)));
        assert!(!path.has_prefix(&Path::root("a").at_list_index(1)));
    }

    #[test]
    fn test_walk_reports_remaining_steps() {
        let path = Path::root("a").at_name("b").at_name("c");
        let result = walk(0usize, &path, |depth, step| match step {
            PathStep::AttributeName(name) if name == "a" => Ok(depth + 1),
            other => Err(PathStepError::Inapplicable {
                step: other.kind(),
                target: "test".to_string(),
            }),
        });

        let err = result.unwrap_err();
        assert_eq!(err.remaining, Path::empty().at_name("b").at_name("c"));
        assert_eq!(
            err.to_string(),
            "AttributeName(\"b\").AttributeName(\"c\") still remains in the path: \
             cannot apply AttributePathStep AttributeName to test"
        );
    }
}

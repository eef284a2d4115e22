//! Patterns over paths.
//!
//! An [`Expression`] is built like a [`Path`] but each step may match any
//! name, index, key or set value, optionally with exclusions. Expressions
//! may also contain parent steps, which are folded away by
//! [`Expression::resolve`] before matching.
//!
//! ```
//! use hemmer_provider_framework::expression::Expression;
//! use hemmer_provider_framework::path::Path;
//!
//! let expr = Expression::match_root("rules").at_any_list_index().at_name("port");
//!
//! assert!(expr.matches(&Path::root("rules").at_list_index(3).at_name("port")));
//! assert!(!expr.matches(&Path::root("rules").at_map_key("x").at_name("port")));
//! assert!(expr.matches_parent(&Path::root("rules").at_list_index(3)));
//! ```

use std::fmt;

use crate::path::{Path, PathStep};
use crate::value::Value;

/// How an expression step matches the payload of a path step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepMatcher<T> {
    /// Only this payload.
    Exact(T),
    /// Any payload.
    Any,
    /// Any payload except these.
    AnyExcept(Vec<T>),
}

impl<T: PartialEq> StepMatcher<T> {
    /// Whether `payload` is accepted.
    pub fn matches(&self, payload: &T) -> bool {
        match self {
            StepMatcher::Exact(expected) => expected == payload,
            StepMatcher::Any => true,
            StepMatcher::AnyExcept(excluded) => !excluded.contains(payload),
        }
    }
}

/// One step of an [`Expression`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionStep {
    /// Matches attribute name steps.
    AttributeName(StepMatcher<String>),
    /// Matches map key steps.
    ElementKeyString(StepMatcher<String>),
    /// Matches list index steps.
    ElementKeyInt(StepMatcher<i64>),
    /// Matches set value steps.
    ElementKeyValue(StepMatcher<Value>),
    /// Moves back up one step. Removed by [`Expression::resolve`].
    Parent,
}

impl ExpressionStep {
    /// Whether this step accepts the given path step. Parent steps accept
    /// nothing.
    pub fn matches(&self, step: &PathStep) -> bool {
        match (self, step) {
            (ExpressionStep::AttributeName(m), PathStep::AttributeName(name)) => m.matches(name),
            (ExpressionStep::ElementKeyString(m), PathStep::ElementKeyString(key)) => {
                m.matches(key)
            },
            (ExpressionStep::ElementKeyInt(m), PathStep::ElementKeyInt(index)) => {
                m.matches(index)
            },
            (ExpressionStep::ElementKeyValue(m), PathStep::ElementKeyValue(value)) => {
                m.matches(value)
            },
            _ => false,
        }
    }

    fn exact(step: &PathStep) -> Self {
        match step {
            PathStep::AttributeName(name) => {
                ExpressionStep::AttributeName(StepMatcher::Exact(name.clone()))
            },
            PathStep::ElementKeyString(key) => {
                ExpressionStep::ElementKeyString(StepMatcher::Exact(key.clone()))
            },
            PathStep::ElementKeyInt(index) => {
                ExpressionStep::ElementKeyInt(StepMatcher::Exact(*index))
            },
            PathStep::ElementKeyValue(value) => {
                ExpressionStep::ElementKeyValue(StepMatcher::Exact(value.clone()))
            },
        }
    }

    fn write_segment(&self, f: &mut fmt::Formatter<'_>, first: bool) -> fmt::Result {
        let dot = if first { "" } else { "." };
        match self {
            ExpressionStep::AttributeName(StepMatcher::Exact(name)) => write!(f, "{}{}", dot, name),
            ExpressionStep::AttributeName(StepMatcher::Any) => write!(f, "{}*", dot),
            ExpressionStep::AttributeName(StepMatcher::AnyExcept(names)) => {
                write!(f, "{}*-{{{}}}", dot, names.join(","))
            },
            ExpressionStep::ElementKeyString(StepMatcher::Exact(key)) => write!(f, "[{:?}]", key),
            ExpressionStep::ElementKeyString(StepMatcher::Any) => f.write_str("[\"*\"]"),
            ExpressionStep::ElementKeyString(StepMatcher::AnyExcept(keys)) => {
                let keys: Vec<String> = keys.iter().map(|k| format!("{:?}", k)).collect();
                write!(f, "[\"*\"-{{{}}}]", keys.join(","))
            },
            ExpressionStep::ElementKeyInt(StepMatcher::Exact(index)) => write!(f, "[{}]", index),
            ExpressionStep::ElementKeyInt(StepMatcher::Any) => f.write_str("[*]"),
            ExpressionStep::ElementKeyInt(StepMatcher::AnyExcept(indexes)) => {
                let indexes: Vec<String> = indexes.iter().map(ToString::to_string).collect();
                write!(f, "[*-{{{}}}]", indexes.join(","))
            },
            ExpressionStep::ElementKeyValue(StepMatcher::Exact(value)) => {
                write!(f, "[Value({})]", value)
            },
            ExpressionStep::ElementKeyValue(StepMatcher::Any) => f.write_str("[Value(*)]"),
            ExpressionStep::ElementKeyValue(StepMatcher::AnyExcept(values)) => {
                let values: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "[Value(*)-{{{}}}]", values.join(","))
            },
            ExpressionStep::Parent => write!(f, "{}<", dot),
        }
    }
}

/// A pattern over paths.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expression {
    steps: Vec<ExpressionStep>,
    relative: bool,
}

impl Expression {
    /// An expression starting at the named root attribute.
    pub fn match_root(name: impl Into<String>) -> Self {
        Self {
            steps: vec![ExpressionStep::AttributeName(StepMatcher::Exact(name.into()))],
            relative: false,
        }
    }

    /// An empty expression meant to be merged onto another one.
    pub fn match_relative() -> Self {
        Self {
            steps: Vec::new(),
            relative: true,
        }
    }

    /// The expression matching exactly `path`.
    pub fn from_path(path: &Path) -> Self {
        Self {
            steps: path.steps().iter().map(ExpressionStep::exact).collect(),
            relative: false,
        }
    }

    /// Build an expression from explicit steps.
    pub fn from_steps(steps: Vec<ExpressionStep>) -> Self {
        Self {
            steps,
            relative: false,
        }
    }

    /// A new expression with `step` appended.
    pub fn at(&self, step: ExpressionStep) -> Self {
        let mut steps = Vec::with_capacity(self.steps.len() + 1);
        steps.extend_from_slice(&self.steps);
        steps.push(step);
        Self {
            steps,
            relative: self.relative,
        }
    }

    /// Continue into the named attribute.
    pub fn at_name(&self, name: impl Into<String>) -> Self {
        self.at(ExpressionStep::AttributeName(StepMatcher::Exact(name.into())))
    }

    /// Continue into any attribute.
    pub fn at_any_name(&self) -> Self {
        self.at(ExpressionStep::AttributeName(StepMatcher::Any))
    }

    /// Continue into any attribute except the given ones.
    pub fn at_any_name_except<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.at(ExpressionStep::AttributeName(StepMatcher::AnyExcept(
            names.into_iter().map(Into::into).collect(),
        )))
    }

    /// Continue into a list element by position.
    pub fn at_list_index(&self, index: i64) -> Self {
        self.at(ExpressionStep::ElementKeyInt(StepMatcher::Exact(index)))
    }

    /// Continue into any list element.
    pub fn at_any_list_index(&self) -> Self {
        self.at(ExpressionStep::ElementKeyInt(StepMatcher::Any))
    }

    /// Continue into any list element except the given positions.
    pub fn at_any_list_index_except(&self, indexes: impl IntoIterator<Item = i64>) -> Self {
        self.at(ExpressionStep::ElementKeyInt(StepMatcher::AnyExcept(
            indexes.into_iter().collect(),
        )))
    }

    /// Continue into a map element by key.
    pub fn at_map_key(&self, key: impl Into<String>) -> Self {
        self.at(ExpressionStep::ElementKeyString(StepMatcher::Exact(key.into())))
    }

    /// Continue into any map element.
    pub fn at_any_map_key(&self) -> Self {
        self.at(ExpressionStep::ElementKeyString(StepMatcher::Any))
    }

    /// Continue into any map element except the given keys.
    pub fn at_any_map_key_except<I, S>(&self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.at(ExpressionStep::ElementKeyString(StepMatcher::AnyExcept(
            keys.into_iter().map(Into::into).collect(),
        )))
    }

    /// Continue into a set element by value.
    pub fn at_set_value(&self, value: Value) -> Self {
        self.at(ExpressionStep::ElementKeyValue(StepMatcher::Exact(value)))
    }

    /// Continue into any set element.
    pub fn at_any_set_value(&self) -> Self {
        self.at(ExpressionStep::ElementKeyValue(StepMatcher::Any))
    }

    /// Continue into any set element except the given values.
    pub fn at_any_set_value_except(&self, values: impl IntoIterator<Item = Value>) -> Self {
        self.at(ExpressionStep::ElementKeyValue(StepMatcher::AnyExcept(
            values.into_iter().collect(),
        )))
    }

    /// Move back up one step.
    pub fn at_parent(&self) -> Self {
        self.at(ExpressionStep::Parent)
    }

    /// All steps, including unresolved parent steps.
    pub fn steps(&self) -> &[ExpressionStep] {
        &self.steps
    }

    /// Whether this expression was started with [`match_relative`](Self::match_relative).
    pub fn is_relative(&self) -> bool {
        self.relative
    }

    /// Append a relative expression to this one. A non-relative `other`
    /// replaces this expression entirely.
    pub fn merge(&self, other: &Expression) -> Self {
        if !other.relative {
            return other.clone();
        }
        let mut steps = self.steps.clone();
        steps.extend_from_slice(&other.steps);
        Self {
            steps,
            relative: self.relative,
        }
    }

    /// Merge every expression in `others` onto this one. With no others,
    /// the result contains only this expression.
    pub fn merge_expressions(&self, others: &[Expression]) -> Expressions {
        if others.is_empty() {
            return Expressions(vec![self.clone()]);
        }
        Expressions(others.iter().map(|other| self.merge(other)).collect())
    }

    /// Fold parent steps into the steps before them.
    ///
    /// Returns `None` when a parent step has nothing left to remove, since
    /// such an expression can never match a path.
    pub fn resolve(&self) -> Option<Expression> {
        let mut resolved: Vec<ExpressionStep> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            match step {
                ExpressionStep::Parent => {
                    resolved.pop()?;
                },
                other => resolved.push(other.clone()),
            }
        }
        Some(Self {
            steps: resolved,
            relative: self.relative,
        })
    }

    /// Whether `path` matches this expression step for step.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(resolved) = self.resolve() else {
            return false;
        };
        resolved.steps.len() == path.len()
            && resolved
                .steps
                .iter()
                .zip(path.steps())
                .all(|(expr, step)| expr.matches(step))
    }

    /// Whether `path` is a strict ancestor of some path this expression
    /// could match.
    pub fn matches_parent(&self, path: &Path) -> bool {
        let Some(resolved) = self.resolve() else {
            return false;
        };
        path.len() < resolved.steps.len()
            && resolved
                .steps
                .iter()
                .zip(path.steps())
                .all(|(expr, step)| expr.matches(step))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            step.write_segment(f, i == 0)?;
        }
        Ok(())
    }
}

/// A collection of expressions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expressions(pub Vec<Expression>);

impl Expressions {
    /// Whether any expression matches `path`.
    pub fn matches(&self, path: &Path) -> bool {
        self.0.iter().any(|expr| expr.matches(path))
    }

    /// Whether an identical expression is already present.
    pub fn contains(&self, expr: &Expression) -> bool {
        self.0.contains(expr)
    }

    /// Add expressions that are not already present.
    pub fn append(&mut self, exprs: impl IntoIterator<Item = Expression>) {
        for expr in exprs {
            if !self.contains(&expr) {
                self.0.push(expr);
            }
        }
    }

    /// Number of expressions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no expressions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Expressions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", rendered.join(","))
    }
}

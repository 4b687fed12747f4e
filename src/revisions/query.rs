//! Structured queries over documents and branches.
//!
//! Expressions are evaluated against JSON values; field names may use dots
//! to reach into nested objects (`"metadata.owner"`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Boolean filter expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    MatchAll,
    MatchNone,
    /// Matches by logical id (document id, or branch path).
    Ids(BTreeSet<String>),
    /// Field equals value. Array fields match if any element equals.
    Exact { field: String, value: Value },
    Prefix { field: String, prefix: String },
    /// Inclusive range over numbers or strings.
    Range {
        field: String,
        gte: Option<Value>,
        lte: Option<Value>,
    },
    Exists(String),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn exact(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::Exact {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Expr::Prefix {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    pub fn range(field: impl Into<String>, gte: Option<Value>, lte: Option<Value>) -> Self {
        Expr::Range {
            field: field.into(),
            gte,
            lte,
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Expr::Exists(field.into())
    }

    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut all) => {
                all.push(other);
                Expr::And(all)
            }
            expr => Expr::And(vec![expr, other]),
        }
    }

    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut any) => {
                any.push(other);
                Expr::Or(any)
            }
            expr => Expr::Or(vec![expr, other]),
        }
    }

    pub fn negate(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Evaluate against an item with logical id `id` and body `value`.
    pub fn matches(&self, id: &str, value: &Value) -> bool {
        match self {
            Expr::MatchAll => true,
            Expr::MatchNone => false,
            Expr::Ids(ids) => ids.contains(id),
            Expr::Exact { field, value: expected } => match lookup(value, field) {
                Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
                Some(actual) => actual == expected,
                None => false,
            },
            Expr::Prefix { field, prefix } => matches!(
                lookup(value, field),
                Some(Value::String(s)) if s.starts_with(prefix.as_str())
            ),
            Expr::Range { field, gte, lte } => {
                let Some(actual) = lookup(value, field) else {
                    return false;
                };
                let above = match gte {
                    Some(bound) => matches!(
                        compare_values(actual, bound),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                    None => true,
                };
                let below = match lte {
                    Some(bound) => matches!(
                        compare_values(actual, bound),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                    None => true,
                };
                above && below
            }
            Expr::Exists(field) => !matches!(lookup(value, field), None | Some(Value::Null)),
            Expr::And(all) => all.iter().all(|e| e.matches(id, value)),
            Expr::Or(any) => any.iter().any(|e| e.matches(id, value)),
            Expr::Not(inner) => !inner.matches(id, value),
        }
    }
}

fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

/// Ordering between two JSON scalars of the same kind.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    pub order: SortOrder,
}

/// A filtered, sorted and paged query.
///
/// Results without an explicit sort come back ordered by id. Relevance
/// scoring is not supported.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Restrict to one document type (ignored for branch search).
    pub doc_type: Option<String>,
    pub filter: Expr,
    pub sort: Vec<SortBy>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Query {
    /// Query over every document type.
    pub fn all() -> Self {
        Self {
            doc_type: None,
            filter: Expr::MatchAll,
            sort: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// Query over one document type.
    pub fn select(doc_type: impl Into<String>) -> Self {
        Self {
            doc_type: Some(doc_type.into()),
            ..Self::all()
        }
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortBy {
            field: field.into(),
            order,
        });
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Filter, sort and page `items`, given as `(id, body, item)` triples
    /// already ordered by id.
    pub(crate) fn execute<T>(&self, items: Vec<(String, Value, T)>) -> Hits<T> {
        let mut matched: Vec<(String, Value, T)> = items
            .into_iter()
            .filter(|(id, value, _)| self.filter.matches(id, value))
            .collect();

        if !self.sort.is_empty() {
            matched.sort_by(|(_, a, _), (_, b, _)| self.compare(a, b));
        }

        let total = matched.len();
        let limit = self.limit.unwrap_or(usize::MAX);
        let items = matched
            .into_iter()
            .skip(self.offset)
            .take(limit)
            .map(|(_, _, item)| item)
            .collect();

        Hits {
            items,
            total,
            offset: self.offset,
            limit: self.limit,
        }
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for sort in &self.sort {
            let ordering = match (lookup(a, &sort.field), lookup(b, &sort.field)) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                // Missing values sort last regardless of direction.
                (Some(_), None) => return Ordering::Less,
                (None, Some(_)) => return Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ordering = match sort.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::all()
    }
}

/// One page of query results.
#[derive(Clone, Debug, PartialEq)]
pub struct Hits<T> {
    pub items: Vec<T>,
    /// Number of matches before paging.
    pub total: usize,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl<T> Hits<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Hits<U> {
        Hits {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

impl<T> IntoIterator for Hits<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

use std::fmt;

use sea_query::backend::QueryBuilder;
use sea_query::prepare::SqlWriter;
use sea_query::{Alias, ColumnRef, Expr, ExprTrait, IntoIden, SimpleExpr, Value};

use crate::dialect::DialectOptions;
use crate::error::{Error, Result};
use crate::registration::EntityRegistration;

/// Reference to a mapped property, optionally qualified with the alias of a
/// joined entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRef {
    pub alias: Option<String>,
    pub property: String,
}

impl PropertyRef {
    fn new(property: &str) -> Self {
        Self {
            alias: None,
            property: property.to_string(),
        }
    }
}

/// Comparison operators usable in a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Typed WHERE predicate over mapped properties.
///
/// Property names are resolved to column names of the entity in scope when
/// the statement is built; values become named parameters.
#[derive(Debug, Clone)]
pub enum Filter {
    /// property <op> value
    Compare(PropertyRef, Comparison, Value),
    /// property [NOT] IN (values)
    In(PropertyRef, Vec<Value>, bool),
    /// property IS [NOT] NULL
    Null(PropertyRef, bool),
    /// property [NOT] LIKE pattern
    Like(PropertyRef, String, bool),
    /// property BETWEEN low AND high
    Between(PropertyRef, Value, Value),
    /// property <op> property
    Columns(PropertyRef, Comparison, PropertyRef),
    /// Logical AND of multiple filters
    And(Vec<Self>),
    /// Logical OR of multiple filters
    Or(Vec<Self>),
    /// Logical NOT of a filter
    Not(Box<Self>),
}

impl Filter {
    /// property = value
    #[must_use]
    pub fn eq(property: &str, value: impl Into<Value>) -> Self {
        Self::Compare(PropertyRef::new(property), Comparison::Eq, value.into())
    }

    /// property != value
    #[must_use]
    pub fn ne(property: &str, value: impl Into<Value>) -> Self {
        Self::Compare(PropertyRef::new(property), Comparison::Ne, value.into())
    }

    /// property > value
    #[must_use]
    pub fn gt(property: &str, value: impl Into<Value>) -> Self {
        Self::Compare(PropertyRef::new(property), Comparison::Gt, value.into())
    }

    /// property >= value
    #[must_use]
    pub fn gte(property: &str, value: impl Into<Value>) -> Self {
        Self::Compare(PropertyRef::new(property), Comparison::Gte, value.into())
    }

    /// property < value
    #[must_use]
    pub fn lt(property: &str, value: impl Into<Value>) -> Self {
        Self::Compare(PropertyRef::new(property), Comparison::Lt, value.into())
    }

    /// property <= value
    #[must_use]
    pub fn lte(property: &str, value: impl Into<Value>) -> Self {
        Self::Compare(PropertyRef::new(property), Comparison::Lte, value.into())
    }

    /// property IN (values)
    #[must_use]
    pub fn r#in(property: &str, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::In(PropertyRef::new(property), values.into_iter().map(Into::into).collect(), false)
    }

    /// property NOT IN (values)
    #[must_use]
    pub fn not_in(property: &str, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::In(PropertyRef::new(property), values.into_iter().map(Into::into).collect(), true)
    }

    /// property IS NULL
    #[must_use]
    pub fn is_null(property: &str) -> Self {
        Self::Null(PropertyRef::new(property), false)
    }

    /// property IS NOT NULL
    #[must_use]
    pub fn is_not_null(property: &str) -> Self {
        Self::Null(PropertyRef::new(property), true)
    }

    /// property LIKE pattern
    #[must_use]
    pub fn like(property: &str, pattern: impl Into<String>) -> Self {
        Self::Like(PropertyRef::new(property), pattern.into(), false)
    }

    /// property NOT LIKE pattern
    #[must_use]
    pub fn not_like(property: &str, pattern: impl Into<String>) -> Self {
        Self::Like(PropertyRef::new(property), pattern.into(), true)
    }

    /// property BETWEEN low AND high
    #[must_use]
    pub fn between(property: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::Between(PropertyRef::new(property), low.into(), high.into())
    }

    /// Compares two properties, each qualified with the alias of its entity.
    #[must_use]
    pub fn columns(
        left_alias: &str, left: &str, comparison: Comparison, right_alias: &str, right: &str,
    ) -> Self {
        Self::Columns(
            PropertyRef {
                alias: Some(left_alias.to_string()),
                property: left.to_string(),
            },
            comparison,
            PropertyRef {
                alias: Some(right_alias.to_string()),
                property: right.to_string(),
            },
        )
    }

    /// Logical AND.
    #[must_use]
    pub const fn and(filters: Vec<Self>) -> Self {
        Self::And(filters)
    }

    /// Logical OR.
    #[must_use]
    pub const fn or(filters: Vec<Self>) -> Self {
        Self::Or(filters)
    }

    /// Logical NOT.
    #[must_use]
    pub fn not(filter: Self) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Qualifies the property of a leaf filter with the alias of a joined
    /// entity. Composite filters are returned unchanged.
    #[must_use]
    pub fn of(mut self, alias: &str) -> Self {
        match &mut self {
            Self::Compare(target, ..)
            | Self::In(target, ..)
            | Self::Null(target, ..)
            | Self::Like(target, ..)
            | Self::Between(target, ..) => target.alias = Some(alias.to_string()),
            Self::Columns(..) | Self::And(_) | Self::Or(_) | Self::Not(_) => {}
        }
        self
    }

    /// Converts the filter into a sea-query expression, resolving property
    /// names against `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error when a property or alias cannot be resolved.
    pub(crate) fn into_expr(self, scope: &FilterScope<'_>) -> Result<SimpleExpr> {
        let expr = match self {
            Self::Compare(target, comparison, value) => {
                compare(scope.column(&target)?, comparison, SimpleExpr::Value(value))
            }
            Self::In(target, values, negated) => {
                let column = scope.column(&target)?;
                if negated { column.is_not_in(values) } else { column.is_in(values) }
            }
            Self::Null(target, negated) => {
                let column = scope.column(&target)?;
                if negated { column.is_not_null() } else { column.is_null() }
            }
            Self::Like(target, pattern, negated) => {
                let column = scope.column(&target)?;
                if negated { column.not_like(pattern) } else { column.like(pattern) }
            }
            Self::Between(target, low, high) => scope.column(&target)?.between(low, high),
            Self::Columns(left, comparison, right) => {
                compare(scope.column(&left)?, comparison, scope.column(&right)?)
            }
            Self::And(filters) => {
                let mut exprs = filters.into_iter().map(|f| f.into_expr(scope));
                match exprs.next() {
                    // no filters, so all conditions satisfied, hence `true`
                    None => Expr::value(true),
                    Some(first) => exprs.try_fold(first?, |acc, next| Ok::<_, Error>(acc.and(next?)))?,
                }
            }
            Self::Or(filters) => {
                let mut exprs = filters.into_iter().map(|f| f.into_expr(scope));
                match exprs.next() {
                    // no filters, so 0 conditions satisfied, hence `false`
                    None => Expr::value(false),
                    Some(first) => exprs.try_fold(first?, |acc, next| Ok::<_, Error>(acc.or(next?)))?,
                }
            }
            Self::Not(filter) => Expr::expr(filter.into_expr(scope)?).not(),
        };
        Ok(expr)
    }
}

fn compare(left: SimpleExpr, comparison: Comparison, right: SimpleExpr) -> SimpleExpr {
    match comparison {
        Comparison::Eq => left.eq(right),
        Comparison::Ne => left.ne(right),
        Comparison::Gt => left.gt(right),
        Comparison::Gte => left.gte(right),
        Comparison::Lt => left.lt(right),
        Comparison::Lte => left.lte(right),
    }
}

/// Entities visible to a filter: the alias each one is known by in the
/// statement (or `None` for unaliased single-table statements).
pub(crate) struct FilterScope<'a> {
    entries: Vec<(Option<&'a str>, &'a EntityRegistration)>,
    default: usize,
}

impl<'a> FilterScope<'a> {
    pub(crate) fn single(alias: Option<&'a str>, registration: &'a EntityRegistration) -> Self {
        Self {
            entries: vec![(alias, registration)],
            default: 0,
        }
    }

    pub(crate) fn joined(
        entries: Vec<(Option<&'a str>, &'a EntityRegistration)>, default: usize,
    ) -> Self {
        Self { entries, default }
    }

    fn column(&self, target: &PropertyRef) -> Result<SimpleExpr> {
        let (alias, registration) = match &target.alias {
            None => self.entries[self.default],
            Some(wanted) => self
                .entries
                .iter()
                .copied()
                .find(|(alias, registration)| {
                    alias.map_or_else(|| registration.table_name() == wanted, |alias| alias == wanted)
                })
                .ok_or_else(|| {
                    Error::invalid_argument(
                        wanted.as_str(),
                        "alias does not belong to any entity in the statement",
                    )
                })?,
        };

        let property = registration.property(&target.property).ok_or_else(|| {
            Error::invalid_argument(
                target.property.as_str(),
                format!("not a property of {}", registration.entity_name()),
            )
        })?;

        let column = Alias::new(property.column_name()).into_iden();
        let column_ref = match alias {
            Some(alias) => ColumnRef::TableColumn(Alias::new(alias).into_iden(), column),
            None => ColumnRef::Column(column),
        };
        Ok(Expr::col(column_ref).into())
    }
}

/// Renders an expression in the dialect's quoting. Parameters are named
/// `{stem}1`, `{stem}2`, … and returned alongside their values.
pub(crate) fn render(
    expr: &SimpleExpr, options: &DialectOptions, stem: &str,
) -> (String, Vec<(String, Value)>) {
    let builder = options.query_builder(format!("{}{stem}", options.parameter_prefix));
    let mut writer = NamedParameters {
        sql: String::new(),
        options,
        stem,
        params: Vec::new(),
    };
    builder.prepare_simple_expr(expr, &mut writer);
    (writer.sql, writer.params)
}

/// Writes each parameter as `{prefix}{stem}{n}{suffix}` and collects its value.
struct NamedParameters<'a> {
    sql: String,
    options: &'a DialectOptions,
    stem: &'a str,
    params: Vec<(String, Value)>,
}

impl fmt::Write for NamedParameters<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.sql.push_str(s);
        Ok(())
    }
}

impl fmt::Display for NamedParameters<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

impl SqlWriter for NamedParameters<'_> {
    fn push_param(&mut self, value: Value, _: &dyn QueryBuilder) {
        let name = format!("{}{}", self.stem, self.params.len() + 1);
        self.sql.push_str(self.options.parameter_prefix);
        self.sql.push_str(&name);
        self.sql.push_str(self.options.parameter_suffix);
        self.params.push((name, value));
    }

    fn as_writer(&mut self) -> &mut dyn fmt::Write {
        self
    }
}

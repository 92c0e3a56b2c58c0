//! Caller-supplied WHERE and ORDER BY fragments.
//!
//! Templates reference mapped properties instead of columns so that the same
//! clause works in every dialect and under any alias:
//!
//! | placeholder       | expands to                                       |
//! |-------------------|--------------------------------------------------|
//! | `{Prop:C}`        | delimited column of `Prop`                       |
//! | `{Prop:TC}`       | column of `Prop` qualified by alias or table     |
//! | `{Prop:P}`        | parameter `@Prop`                                |
//! | `{Text:I}`        | `Text` as a delimited identifier                 |
//! | `{:T}`            | alias, or table name when not aliased            |
//!
//! Prefixing the name with `alias.` (`{w.Name:TC}`, `{w.:T}`) resolves it
//! against another entity of a joined statement.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use sea_query::{Order, Value};

use crate::builder::GenericStatementSqlBuilder;
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterScope, render};

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(?:([A-Za-z_][A-Za-z0-9_]*)\.)?([^{}:]*):(TC|C|T|P|I)\}").expect("should compile")
});

/// A WHERE or ORDER BY fragment.
#[derive(Debug, Clone)]
pub enum Clause {
    /// SQL text with property placeholders.
    Template(String),
    /// Typed predicate; values become named parameters.
    Filter(Filter),
    /// Ordered list of sort keys.
    Order(Vec<OrderSpec>),
}

impl Clause {
    /// SQL text with property placeholders.
    #[must_use]
    pub fn sql(template: impl Into<String>) -> Self {
        Self::Template(template.into())
    }

    /// Sort keys, in order of precedence.
    #[must_use]
    pub const fn order(specs: Vec<OrderSpec>) -> Self {
        Self::Order(specs)
    }

    /// Renders the clause against `scope`. Parameters of typed filters are
    /// named `{stem}1`, `{stem}2`, …
    pub(crate) fn render(&self, scope: &ClauseScope<'_>, stem: &str) -> Result<Rendered> {
        match self {
            Self::Template(template) => Ok(Rendered {
                sql: format_template(template, scope)?,
                params: Vec::new(),
            }),
            Self::Filter(filter) => {
                let expr = filter.clone().into_expr(&scope.filter_scope())?;
                let (sql, params) = render(&expr, scope.current()?.1.options(), stem);
                Ok(Rendered { sql, params })
            }
            Self::Order(specs) => {
                let keys = specs.iter().map(|spec| spec.render(scope)).collect::<Result<Vec<_>>>()?;
                Ok(Rendered {
                    sql: keys.join(", "),
                    params: Vec::new(),
                })
            }
        }
    }
}

impl From<Filter> for Clause {
    fn from(filter: Filter) -> Self {
        Self::Filter(filter)
    }
}

impl From<&str> for Clause {
    fn from(template: &str) -> Self {
        Self::sql(template)
    }
}

impl From<OrderSpec> for Clause {
    fn from(spec: OrderSpec) -> Self {
        Self::Order(vec![spec])
    }
}

impl From<Vec<OrderSpec>> for Clause {
    fn from(specs: Vec<OrderSpec>) -> Self {
        Self::Order(specs)
    }
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub alias: Option<String>,
    pub property: String,
    pub order: Order,
}

impl OrderSpec {
    /// Ascending order on `property`.
    #[must_use]
    pub fn asc(property: &str) -> Self {
        Self {
            alias: None,
            property: property.to_string(),
            order: Order::Asc,
        }
    }

    /// Descending order on `property`.
    #[must_use]
    pub fn desc(property: &str) -> Self {
        Self {
            alias: None,
            property: property.to_string(),
            order: Order::Desc,
        }
    }

    /// Resolves the property against the joined entity known as `alias`.
    #[must_use]
    pub fn of(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    fn render(&self, scope: &ClauseScope<'_>) -> Result<String> {
        let (alias, builder) = scope.resolve(self.alias.as_deref())?;
        let column = qualified_column(builder, alias, &self.property)?;
        let direction = match self.order {
            Order::Desc => " DESC",
            _ => "",
        };
        Ok(format!("{column}{direction}"))
    }
}

/// Output of [`Clause::render`].
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Rendered {
    pub sql: String,
    pub params: Vec<(String, Value)>,
}

/// Entities a clause can reference, each with the alias it is known by.
pub(crate) struct ClauseScope<'a> {
    entries: Vec<(Option<&'a str>, &'a GenericStatementSqlBuilder)>,
    current: usize,
}

impl<'a> ClauseScope<'a> {
    pub(crate) fn single(alias: Option<&'a str>, builder: &'a GenericStatementSqlBuilder) -> Self {
        Self {
            entries: vec![(alias, builder)],
            current: 0,
        }
    }

    pub(crate) fn joined(
        entries: Vec<(Option<&'a str>, &'a GenericStatementSqlBuilder)>, current: usize,
    ) -> Self {
        Self { entries, current }
    }

    fn current(&self) -> Result<(Option<&'a str>, &'a GenericStatementSqlBuilder)> {
        self.entries
            .get(self.current)
            .copied()
            .ok_or_else(|| Error::invalid_argument("scope", "no entity to resolve against"))
    }

    fn resolve(&self, alias: Option<&str>) -> Result<(Option<&'a str>, &'a GenericStatementSqlBuilder)> {
        let Some(wanted) = alias else {
            return self.current();
        };
        self.entries
            .iter()
            .copied()
            .find(|(alias, builder)| match alias {
                Some(alias) => *alias == wanted,
                None => builder.registration().table_name() == wanted,
            })
            .ok_or_else(|| {
                Error::invalid_argument(wanted, "alias does not belong to any entity in the statement")
            })
    }

    fn filter_scope(&self) -> FilterScope<'a> {
        let entries =
            self.entries.iter().map(|(alias, builder)| (*alias, builder.registration().as_ref())).collect();
        FilterScope::joined(entries, self.current)
    }
}

fn format_template(template: &str, scope: &ClauseScope<'_>) -> Result<String> {
    let mut formatted = String::with_capacity(template.len());
    let mut last = 0;
    for captures in PLACEHOLDER_REGEX.captures_iter(template) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        formatted.push_str(&template[last..whole.start()]);
        formatted.push_str(&expand(&captures, scope)?);
        last = whole.end();
    }
    formatted.push_str(&template[last..]);
    Ok(formatted)
}

fn expand(captures: &Captures<'_>, scope: &ClauseScope<'_>) -> Result<String> {
    let alias = captures.get(1).map(|m| m.as_str());
    let name = captures.get(2).map_or("", |m| m.as_str()).trim();
    let specifier = captures.get(3).map_or("", |m| m.as_str());

    let (alias, builder) = scope.resolve(alias)?;
    match specifier {
        "C" => builder.get_column_name(name, None, false),
        "TC" => qualified_column(builder, alias, name),
        "P" => builder.get_prefixed_parameter(name),
        "I" => builder.get_delimited_identifier(name),
        "T" => match alias {
            Some(alias) => builder.get_delimited_identifier(alias),
            None => builder.get_table_name(None),
        },
        other => Err(Error::invalid_argument("clause", format!("unknown format specifier `{other}`"))),
    }
}

fn qualified_column(
    builder: &GenericStatementSqlBuilder, alias: Option<&str>, property: &str,
) -> Result<String> {
    match alias {
        Some(alias) => builder.get_column_name(property, Some(alias), false),
        None => Ok(format!(
            "{}.{}",
            builder.get_table_name(None)?,
            builder.get_column_name(property, None, false)?
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::property;
    use crate::registration::{Entity, EntityMapping};

    #[derive(Default)]
    struct Building {
        id: i32,
        name: String,
    }

    impl Entity for Building {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::new("Buildings")
                .property(property!(Building, id as "Id").primary_key())
                .property(property!(Building, name as "Name").column("BuildingName"))
        }
    }

    #[derive(Default)]
    struct Workstation {
        id: i64,
    }

    impl Entity for Workstation {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::new("Workstations").property(property!(Workstation, id as "Id").primary_key())
        }
    }

    fn buildings(dialect: Dialect) -> GenericStatementSqlBuilder {
        GenericStatementSqlBuilder::new(Building::mapping().freeze().unwrap(), dialect)
    }

    #[test]
    fn template_placeholders() {
        let builder = buildings(Dialect::MsSql);
        let scope = ClauseScope::single(None, &builder);

        let rendered = Clause::sql("{Name:C} LIKE {Pattern:P} AND {Id:TC} > 0 AND {:T} IS NOT NULL AND {x:I}")
            .render(&scope, "w")
            .unwrap();
        assert_eq!(
            rendered.sql,
            "[BuildingName] LIKE @Pattern AND [Buildings].[Id] > 0 AND [Buildings] IS NOT NULL AND [x]"
        );
        assert!(rendered.params.is_empty());

        let scope = ClauseScope::single(Some("b"), &builder);
        let rendered = Clause::sql("{Name:TC} = {Name:P}").render(&scope, "w").unwrap();
        assert_eq!(rendered.sql, "[b].[BuildingName] = @Name");
    }

    #[test]
    fn aliased_placeholders() {
        let building = buildings(Dialect::PostgreSql);
        let workstation =
            GenericStatementSqlBuilder::new(Workstation::mapping().freeze().unwrap(), Dialect::PostgreSql);
        let scope = ClauseScope::joined(vec![(Some("b"), &building), (Some("w"), &workstation)], 0);

        let rendered = Clause::sql("{w.Id:TC} > {b.Id:TC} AND {w.:T} = {:T}").render(&scope, "w").unwrap();
        assert_eq!(rendered.sql, "\"w\".\"Id\" > \"b\".\"Id\" AND \"w\" = \"b\"");

        let err = Clause::sql("{z.Id:TC}").render(&scope, "w").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn unknown_property() {
        let builder = buildings(Dialect::MsSql);
        let scope = ClauseScope::single(None, &builder);
        let err = Clause::sql("{Height:C} > 3").render(&scope, "w").unwrap_err();
        assert!(err.to_string().contains("Height"));
    }

    #[test]
    fn order_specs() {
        let builder = buildings(Dialect::MySql);
        let scope = ClauseScope::single(Some("b"), &builder);
        let rendered = Clause::order(vec![OrderSpec::desc("Name"), OrderSpec::asc("Id")])
            .render(&scope, "o")
            .unwrap();
        assert_eq!(rendered.sql, "`b`.`BuildingName` DESC, `b`.`Id`");
    }

    #[test]
    fn filter_clause() {
        let builder = buildings(Dialect::MsSql);
        let scope = ClauseScope::single(None, &builder);
        let rendered = Clause::from(Filter::eq("Name", "HQ")).render(&scope, "w0_").unwrap();
        assert!(rendered.sql.contains("[BuildingName]"));
        assert!(rendered.sql.contains("@w0_1"));
        assert_eq!(rendered.params, vec![("w0_1".to_string(), Value::from("HQ"))]);
    }
}

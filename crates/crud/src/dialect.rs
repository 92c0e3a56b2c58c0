//! SQL dialects and their identifier/parameter conventions.

use std::fmt;
use std::str::FromStr;

use sea_query::backend::{
    EscapeBuilder, OperLeftAssocDecider, PrecedenceDecider, QuotedBuilder, TableRefBuilder,
};
use sea_query::prepare::SqlWriter;
use sea_query::{BinOper, Oper, Quote, SimpleExpr, SubQueryStatement, Value};

use crate::error::{Error, Result};

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// SQL Server 2012 and later (`OFFSET … FETCH`, `OUTPUT inserted.*`).
    MsSql,
    /// SQL Server before 2012; paging is emulated with `ROW_NUMBER()`.
    MsSql2008,
    /// PostgreSQL (`LIMIT … OFFSET …`, `RETURNING`).
    PostgreSql,
    /// MySQL / MariaDB (`LIMIT offset,count`).
    MySql,
    /// SQLite; generated values are read back through the single row id.
    Sqlite,
}

impl Dialect {
    /// All built-in dialects.
    pub const ALL: [Self; 5] = [Self::MsSql, Self::MsSql2008, Self::PostgreSql, Self::MySql, Self::Sqlite];

    /// Identifier and parameter conventions for the dialect.
    #[must_use]
    pub const fn options(self) -> DialectOptions {
        match self {
            Self::MsSql | Self::MsSql2008 => DialectOptions {
                delimiters: Some(('[', ']')),
                parameter_prefix: "@",
                parameter_suffix: "",
                supports_schemas: true,
                supports_databases: true,
            },
            Self::PostgreSql => DialectOptions {
                delimiters: Some(('"', '"')),
                parameter_prefix: "@",
                parameter_suffix: "",
                supports_schemas: true,
                supports_databases: false,
            },
            Self::MySql => DialectOptions {
                delimiters: Some(('`', '`')),
                parameter_prefix: "@",
                parameter_suffix: "",
                supports_schemas: false,
                supports_databases: true,
            },
            Self::Sqlite => DialectOptions {
                delimiters: Some(('"', '"')),
                parameter_prefix: "@",
                parameter_suffix: "",
                supports_schemas: false,
                supports_databases: false,
            },
        }
    }

    /// Expression returning the last identity value generated in the session.
    #[must_use]
    pub const fn last_identity_function(self) -> &'static str {
        match self {
            Self::MsSql | Self::MsSql2008 => "SCOPE_IDENTITY()",
            Self::PostgreSql => "lastval()",
            Self::MySql => "LAST_INSERT_ID()",
            Self::Sqlite => "last_insert_rowid()",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MsSql => "mssql",
            Self::MsSql2008 => "mssql2008",
            Self::PostgreSql => "postgresql",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        };
        f.write_str(name)
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" => Ok(Self::MsSql),
            "mssql2008" | "sqlserver2008" => Ok(Self::MsSql2008),
            "postgresql" | "postgres" | "pg" => Ok(Self::PostgreSql),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::invalid_argument("dialect", format!("unknown dialect `{other}`"))),
        }
    }
}

/// Identifier and parameter conventions of a dialect. Pure configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectOptions {
    /// Start and end identifier delimiters; `None` leaves identifiers as is.
    pub delimiters: Option<(char, char)>,
    /// Prefix of named parameters.
    pub parameter_prefix: &'static str,
    /// Suffix of named parameters.
    pub parameter_suffix: &'static str,
    /// Whether tables may be qualified with a schema.
    pub supports_schemas: bool,
    /// Whether tables may be qualified with a database.
    pub supports_databases: bool,
}

impl DialectOptions {
    /// Delimits an identifier, doubling any closing delimiter inside it.
    /// Already delimited identifiers are returned unchanged, so the
    /// operation is idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error for empty identifiers.
    pub fn delimit(&self, identifier: &str) -> Result<String> {
        if identifier.trim().is_empty() {
            return Err(Error::invalid_argument("identifier", "must not be empty"));
        }

        let Some((left, right)) = self.delimiters else {
            return Ok(identifier.to_string());
        };

        let delimited = identifier.len() >= 2
            && identifier.starts_with(left)
            && identifier.ends_with(right);
        if delimited {
            Ok(identifier.to_string())
        } else {
            let escaped = identifier.replace(right, &format!("{right}{right}"));
            Ok(format!("{left}{escaped}{right}"))
        }
    }

    /// sea-query backend rendering expressions with these conventions.
    /// Undelimited options render identifiers with ANSI double quotes.
    #[must_use]
    pub(crate) fn query_builder(&self, placeholder: String) -> QueryBuilder {
        let quote = match self.delimiters {
            Some((left, right)) => Quote::from((left as u8, right as u8)),
            None => Quote::new(b'"'),
        };
        QueryBuilder {
            quote,
            placeholder,
            numbered: true,
        }
    }

    /// Formats a named parameter reference.
    ///
    /// # Errors
    ///
    /// Returns an error for empty parameter names.
    pub fn parameter(&self, name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(Error::invalid_argument("parameter", "must not be empty"));
        }
        Ok(format!("{}{name}{}", self.parameter_prefix, self.parameter_suffix))
    }
}

/// sea-query backend used to render typed filters in a dialect's quoting and
/// parameter style.
pub struct QueryBuilder {
    pub quote: Quote,
    pub placeholder: String,
    pub numbered: bool,
}

impl QuotedBuilder for QueryBuilder {
    fn quote(&self) -> Quote {
        self.quote
    }
}

impl EscapeBuilder for QueryBuilder {}

impl TableRefBuilder for QueryBuilder {}

impl OperLeftAssocDecider for QueryBuilder {
    fn well_known_left_associative(&self, op: &BinOper) -> bool {
        matches!(
            op,
            BinOper::And | BinOper::Or | BinOper::Add | BinOper::Sub | BinOper::Mul | BinOper::Mod
        )
    }
}

impl PrecedenceDecider for QueryBuilder {
    fn inner_expr_well_known_greater_precedence(
        &self, _inner: &SimpleExpr, _outer_oper: &Oper,
    ) -> bool {
        // always parenthesize
        false
    }
}

impl sea_query::backend::QueryBuilder for QueryBuilder {
    fn prepare_query_statement(&self, query: &SubQueryStatement, sql: &mut dyn SqlWriter) {
        match query {
            SubQueryStatement::SelectStatement(s) => self.prepare_select_statement(s, sql),
            SubQueryStatement::InsertStatement(s) => self.prepare_insert_statement(s, sql),
            SubQueryStatement::UpdateStatement(s) => self.prepare_update_statement(s, sql),
            SubQueryStatement::DeleteStatement(s) => self.prepare_delete_statement(s, sql),
            SubQueryStatement::WithStatement(s) => self.prepare_with_query(s, sql),
        }
    }

    fn prepare_value(&self, value: &Value, sql: &mut dyn SqlWriter) {
        sql.push_param(value.clone(), self);
    }

    fn placeholder(&self) -> (&str, bool) {
        (&self.placeholder, self.numbered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiting_is_idempotent() {
        for dialect in Dialect::ALL {
            let options = dialect.options();
            let once = options.delimit("Buildings").unwrap();
            let twice = options.delimit(&once).unwrap();
            assert_eq!(once, twice, "{dialect}");
        }

        assert_eq!(Dialect::MsSql.options().delimit("Name").unwrap(), "[Name]");
        assert_eq!(Dialect::PostgreSql.options().delimit("Name").unwrap(), "\"Name\"");
        assert_eq!(Dialect::MySql.options().delimit("Name").unwrap(), "`Name`");
    }

    #[test]
    fn undelimited_options() {
        let options = DialectOptions {
            delimiters: None,
            parameter_prefix: "?",
            parameter_suffix: "?",
            supports_schemas: false,
            supports_databases: false,
        };
        assert_eq!(options.delimit("Name").unwrap(), "Name");
        assert_eq!(options.delimit(&options.delimit("Name").unwrap()).unwrap(), "Name");
        assert_eq!(options.parameter("Name").unwrap(), "?Name?");
    }

    #[test]
    fn empty_arguments_are_rejected() {
        let options = Dialect::MsSql.options();
        assert!(matches!(options.delimit(""), Err(Error::InvalidArgument { .. })));
        assert!(matches!(options.parameter("  "), Err(Error::InvalidArgument { .. })));
        assert_eq!(options.parameter("Id").unwrap(), "@Id");
    }

    #[test]
    fn closing_delimiter_is_doubled() {
        let escaped = Dialect::MsSql.options().delimit("a]b").unwrap();
        assert_eq!(escaped, "[a]]b]");
        assert_eq!(Dialect::MsSql.options().delimit(&escaped).unwrap(), escaped);
        assert_eq!(Dialect::PostgreSql.options().delimit("say \"hi\"").unwrap(), "\"say \"\"hi\"\"\"");
        assert_eq!(Dialect::MySql.options().delimit("a`b").unwrap(), "`a``b`");
    }

    #[test]
    fn parse_dialects() {
        for dialect in Dialect::ALL {
            assert_eq!(dialect.to_string().parse::<Dialect>().unwrap(), dialect);
        }
        assert_eq!("Postgres".parse::<Dialect>().unwrap(), Dialect::PostgreSql);
        "oracle".parse::<Dialect>().unwrap_err();
    }
}

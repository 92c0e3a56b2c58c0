use crate::builder::{GenericStatementSqlBuilder, cached};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::update::non_empty;

/// Column alias carrying the emulated row number on legacy SQL Server.
pub(crate) const ROW_NUMBER_COLUMN: &str = "__RowNumber";
const PAGED_RESULT_SET: &str = "__Paged";
const PAGED_COLUMN: &str = "__Column";

/// Inputs of a multi-row SELECT. Missing select and from clauses default to
/// the entity's own columns and table.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchSelect<'a> {
    pub select: Option<&'a str>,
    pub from: Option<&'a str>,
    pub where_clause: Option<&'a str>,
    pub order_clause: Option<&'a str>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl GenericStatementSqlBuilder {
    /// `SELECT <columns> FROM … WHERE <keys>`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the entity has no primary key.
    pub fn construct_full_single_select_statement(&self) -> Result<String> {
        cached(&self.full_single_select, || {
            let sql = format!(
                "SELECT {} FROM {} WHERE {}",
                self.construct_column_enumeration_for_select(None)?,
                self.get_table_name(None)?,
                self.construct_keys_where_clause(None)?
            );
            self.log_statement("single select", &sql);
            Ok(sql)
        })
    }

    /// Multi-row SELECT with dialect-specific pagination.
    ///
    /// # Errors
    ///
    /// Returns a pagination error when a SQL Server dialect is asked to page
    /// without an ORDER BY clause.
    pub fn construct_full_batch_select_statement(&self, select: &BatchSelect<'_>) -> Result<String> {
        let columns = match non_empty(select.select) {
            Some(columns) => columns.to_string(),
            None => self.construct_column_enumeration_for_select(None)?,
        };
        let from = match non_empty(select.from) {
            Some(from) => from.to_string(),
            None => self.get_table_name(None)?,
        };
        let where_clause = non_empty(select.where_clause);
        let order_clause = non_empty(select.order_clause);
        let paged = select.skip.is_some() || select.limit.is_some();

        let mut sql = format!("SELECT {columns} FROM {from}");
        if let Some(condition) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(condition);
        }

        let sql = match self.dialect() {
            Dialect::MsSql => {
                if let Some(order) = order_clause {
                    sql.push_str(" ORDER BY ");
                    sql.push_str(order);
                }
                if paged {
                    if order_clause.is_none() {
                        return Err(self.unordered_paging());
                    }
                    sql.push_str(&format!(" OFFSET {} ROWS", select.skip.unwrap_or(0)));
                    if let Some(limit) = select.limit {
                        sql.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
                    }
                }
                sql
            }
            Dialect::MsSql2008 => {
                if paged {
                    let order = order_clause.ok_or_else(|| self.unordered_paging())?;
                    self.row_number_paging(&columns, &from, where_clause, order, select.skip, select.limit)?
                } else {
                    if let Some(order) = order_clause {
                        sql.push_str(" ORDER BY ");
                        sql.push_str(order);
                    }
                    sql
                }
            }
            Dialect::PostgreSql | Dialect::Sqlite => {
                if let Some(order) = order_clause {
                    sql.push_str(" ORDER BY ");
                    sql.push_str(order);
                }
                match (select.skip, select.limit) {
                    (Some(skip), Some(limit)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {skip}")),
                    (None, Some(limit)) => sql.push_str(&format!(" LIMIT {limit}")),
                    (Some(skip), None) if self.dialect() == Dialect::Sqlite => {
                        sql.push_str(&format!(" LIMIT -1 OFFSET {skip}"));
                    }
                    (Some(skip), None) => sql.push_str(&format!(" OFFSET {skip}")),
                    (None, None) => {}
                }
                sql
            }
            Dialect::MySql => {
                if let Some(order) = order_clause {
                    sql.push_str(" ORDER BY ");
                    sql.push_str(order);
                }
                match (select.skip, select.limit) {
                    (Some(skip), Some(limit)) => sql.push_str(&format!(" LIMIT {skip},{limit}")),
                    (None, Some(limit)) => sql.push_str(&format!(" LIMIT {limit}")),
                    (Some(skip), None) => sql.push_str(&format!(" LIMIT {skip},{}", u64::MAX)),
                    (None, None) => {}
                }
                sql
            }
        };

        self.log_statement("batch select", &sql);
        Ok(sql)
    }

    /// Emulates OFFSET/FETCH with `ROW_NUMBER()` for SQL Server before 2012.
    ///
    /// The derived table needs unique column names, so every selected column
    /// is given a positional alias inside it and renamed back outside.
    fn row_number_paging(
        &self, columns: &str, from: &str, where_clause: Option<&str>, order: &str,
        skip: Option<u64>, limit: Option<u64>,
    ) -> Result<String> {
        let row_number = self.get_delimited_identifier(ROW_NUMBER_COLUMN)?;
        let paged = self.get_delimited_identifier(PAGED_RESULT_SET)?;
        let skip = skip.unwrap_or(0);

        let items = split_select_list(columns);
        let (inner_columns, outer_columns) = if items.iter().any(|item| item.ends_with('*')) {
            (columns.to_string(), "*".to_string())
        } else {
            let mut inner = Vec::with_capacity(items.len());
            let mut outer = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let (expression, name) = output_column(item);
                let slot = self.get_delimited_identifier(&format!("{PAGED_COLUMN}{index}"))?;
                inner.push(format!("{expression} AS {slot}"));
                outer.push(format!("{slot} AS {name}"));
            }
            (inner.join(", "), outer.join(", "))
        };

        let mut inner = format!(
            "SELECT ROW_NUMBER() OVER (ORDER BY {order}) AS {row_number}, {inner_columns} FROM {from}"
        );
        if let Some(condition) = where_clause {
            inner.push_str(" WHERE ");
            inner.push_str(condition);
        }

        let range = match limit {
            Some(limit) => format!("BETWEEN {} AND {}", skip.saturating_add(1), skip.saturating_add(limit)),
            None => format!("> {skip}"),
        };
        Ok(format!(
            "SELECT {outer_columns} FROM ({inner}) AS {paged} WHERE {row_number} {range} ORDER BY {row_number}"
        ))
    }

    fn unordered_paging(&self) -> Error {
        Error::pagination(format!(
            "{} requires an ORDER BY clause to page {}",
            self.dialect(),
            self.registration().entity_name()
        ))
    }
}

/// Byte offsets of `needle` outside delimited identifiers, literals and
/// parentheses. Matching is ASCII case-insensitive.
fn top_level_matches(text: &str, needle: &str) -> Vec<usize> {
    let mut matches = Vec::new();
    let mut depth = 0_usize;
    let mut closing: Option<char> = None;
    for (at, ch) in text.char_indices() {
        if let Some(close) = closing {
            if ch == close {
                closing = None;
            }
            continue;
        }
        match ch {
            '[' => closing = Some(']'),
            '"' | '`' | '\'' => closing = Some(ch),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0
                && text.get(at..at + needle.len()).is_some_and(|s| s.eq_ignore_ascii_case(needle)) =>
            {
                matches.push(at);
            }
            _ => {}
        }
    }
    matches
}

fn split_select_list(columns: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    for at in top_level_matches(columns, ",") {
        items.push(columns[start..at].trim());
        start = at + 1;
    }
    items.push(columns[start..].trim());
    items
}

/// Splits a select item into its expression and the name it is returned as.
fn output_column(item: &str) -> (&str, &str) {
    if let Some(&at) = top_level_matches(item, " AS ").last() {
        return (item[..at].trim(), item[at + 4..].trim());
    }
    let name = top_level_matches(item, ".").last().map_or(item, |&at| &item[at + 1..]);
    (item, name)
}

#[cfg(test)]
mod tests {
    use super::{BatchSelect, output_column, split_select_list};
    use crate::builder::GenericStatementSqlBuilder;
    use crate::dialect::Dialect;
    use crate::error::Error;
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
                .property(property!(Building, id as "Id").primary_key().database_generated())
                .property(property!(Building, name as "Name").column("BuildingName"))
        }
    }

    fn builder(dialect: Dialect) -> GenericStatementSqlBuilder {
        GenericStatementSqlBuilder::new(Building::mapping().freeze().unwrap(), dialect)
    }

    fn paged<'a>(order: Option<&'a str>) -> BatchSelect<'a> {
        BatchSelect {
            order_clause: order,
            skip: Some(2),
            limit: Some(3),
            ..BatchSelect::default()
        }
    }

    #[test]
    fn single_select() {
        assert_eq!(
            builder(Dialect::MsSql).construct_full_single_select_statement().unwrap(),
            "SELECT [Id], [BuildingName] AS [Name] FROM [Buildings] WHERE [Id]=@Id"
        );
    }

    #[test]
    fn pagination_per_dialect() {
        let expected = [
            (
                Dialect::MsSql,
                "SELECT [Id], [BuildingName] AS [Name] FROM [Buildings] ORDER BY [Id] OFFSET 2 ROWS FETCH NEXT 3 ROWS ONLY",
            ),
            (
                Dialect::PostgreSql,
                "SELECT \"Id\", \"BuildingName\" AS \"Name\" FROM \"Buildings\" ORDER BY [Id] LIMIT 3 OFFSET 2",
            ),
            (
                Dialect::MySql,
                "SELECT `Id`, `BuildingName` AS `Name` FROM `Buildings` ORDER BY [Id] LIMIT 2,3",
            ),
            (
                Dialect::MsSql2008,
                "SELECT [__Column0] AS [Id], [__Column1] AS [Name] FROM (SELECT ROW_NUMBER() OVER (ORDER BY [Id]) AS [__RowNumber], [Id] AS [__Column0], [BuildingName] AS [__Column1] FROM [Buildings]) AS [__Paged] WHERE [__RowNumber] BETWEEN 3 AND 5 ORDER BY [__RowNumber]",
            ),
        ];
        for (dialect, sql) in expected {
            let builder = builder(dialect);
            let first = builder.construct_full_batch_select_statement(&paged(Some("[Id]"))).unwrap();
            let second = builder.construct_full_batch_select_statement(&paged(Some("[Id]"))).unwrap();
            assert_eq!(first, sql);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn skip_only() {
        let select = BatchSelect {
            skip: Some(4),
            ..BatchSelect::default()
        };
        let sql = builder(Dialect::Sqlite).construct_full_batch_select_statement(&select).unwrap();
        assert!(sql.ends_with(" LIMIT -1 OFFSET 4"));

        let sql = builder(Dialect::PostgreSql).construct_full_batch_select_statement(&select).unwrap();
        assert!(sql.ends_with(" OFFSET 4"));
    }

    #[test]
    fn paging_without_order_on_sql_server() {
        for dialect in [Dialect::MsSql, Dialect::MsSql2008] {
            let err = builder(dialect).construct_full_batch_select_statement(&paged(None)).unwrap_err();
            assert!(matches!(err, Error::Pagination { .. }), "{dialect}");
        }
    }

    #[test]
    fn where_and_order() {
        let select = BatchSelect {
            where_clause: Some("[Name] LIKE @Pattern"),
            order_clause: Some("[Name] DESC"),
            ..BatchSelect::default()
        };
        assert_eq!(
            builder(Dialect::MsSql).construct_full_batch_select_statement(&select).unwrap(),
            "SELECT [Id], [BuildingName] AS [Name] FROM [Buildings] WHERE [Name] LIKE @Pattern ORDER BY [Name] DESC"
        );
    }

    #[test]
    fn select_list_items() {
        let items = split_select_list("[b].[Id], CAST([b].[Name] AS nvarchar(20)) AS [Name], [x,y], 'a, b' AS [Text]");
        assert_eq!(items.len(), 4);
        assert_eq!(output_column(items[0]), ("[b].[Id]", "[Id]"));
        assert_eq!(output_column(items[1]), ("CAST([b].[Name] AS nvarchar(20))", "[Name]"));
        assert_eq!(output_column(items[2]), ("[x,y]", "[x,y]"));
        assert_eq!(output_column(items[3]), ("'a, b'", "[Text]"));
    }

    #[test]
    fn row_number_range_saturates() {
        let select = BatchSelect {
            order_clause: Some("[Id]"),
            skip: Some(u64::MAX),
            limit: Some(10),
            ..BatchSelect::default()
        };
        let sql = builder(Dialect::MsSql2008).construct_full_batch_select_statement(&select).unwrap();
        let max = u64::MAX;
        assert!(sql.contains(&format!("BETWEEN {max} AND {max}")));
    }

    #[test]
    fn row_number_wildcard_passes_through() {
        let select = BatchSelect {
            select: Some("*"),
            order_clause: Some("[Id]"),
            skip: Some(1),
            ..BatchSelect::default()
        };
        let sql = builder(Dialect::MsSql2008).construct_full_batch_select_statement(&select).unwrap();
        assert!(sql.starts_with("SELECT * FROM (SELECT ROW_NUMBER() OVER (ORDER BY [Id]) AS [__RowNumber], * FROM [Buildings])"));
        assert!(sql.ends_with("WHERE [__RowNumber] > 1 ORDER BY [__RowNumber]"));
    }
}

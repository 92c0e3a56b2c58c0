use crate::builder::GenericStatementSqlBuilder;
use crate::error::Result;
use crate::update::non_empty;

const DISTINCT_RESULT_SET: &str = "DistinctResultSet";

impl GenericStatementSqlBuilder {
    /// `SELECT COUNT(*)`. With joins, distinct root identities are counted
    /// so that one-to-many fan-out does not inflate the result.
    ///
    /// # Errors
    ///
    /// Propagates identifier errors.
    pub fn construct_full_count_statement(
        &self, from: Option<&str>, where_clause: Option<&str>, has_joins: bool,
        main_alias: Option<&str>,
    ) -> Result<String> {
        let from = match non_empty(from) {
            Some(from) => from.to_string(),
            None => self.get_table_name(main_alias)?,
        };
        let condition = non_empty(where_clause)
            .map(|condition| format!(" WHERE {condition}"))
            .unwrap_or_default();

        let sql = if has_joins {
            let qualifier = match main_alias {
                Some(alias) => alias,
                None => self.registration().table_name(),
            };
            let identity = self.distinct_identity_columns(qualifier)?;
            format!(
                "SELECT COUNT(*) FROM (SELECT DISTINCT {identity} FROM {from}{condition}) AS {}",
                self.get_delimited_identifier(DISTINCT_RESULT_SET)?
            )
        } else {
            format!("SELECT COUNT(*) FROM {from}{condition}")
        };

        self.log_statement("count", &sql);
        Ok(sql)
    }

    /// Key columns of the root entity, or all of its columns when it has no
    /// primary key.
    fn distinct_identity_columns(&self, qualifier: &str) -> Result<String> {
        let registration = self.registration();
        let columns = if registration.key_count() > 0 {
            registration
                .key_properties()
                .map(|key| self.column_name(key, Some(qualifier), false))
                .collect::<Result<Vec<_>>>()?
        } else {
            registration
                .properties()
                .iter()
                .map(|property| self.column_name(property, Some(qualifier), false))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(columns.join(", "))
    }
}

use crate::builder::{GenericStatementSqlBuilder, cached};
use crate::dialect::Dialect;
use crate::error::Result;

impl GenericStatementSqlBuilder {
    /// `UPDATE … SET … WHERE <keys>`, reading back refreshed-on-update
    /// properties when there are any.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the entity has no primary key or
    /// nothing to update.
    pub fn construct_full_single_update_statement(&self) -> Result<String> {
        cached(&self.full_single_update, || {
            let sql = self.single_update_statement()?;
            self.log_statement("single update", &sql);
            Ok(sql)
        })
    }

    fn single_update_statement(&self) -> Result<String> {
        let table = self.get_table_name(None)?;
        let keys = self.construct_keys_where_clause(None)?;
        let set = self.construct_update_clause(None)?;
        let refreshed = self.refreshed_on_update();

        if refreshed.is_empty() {
            return Ok(format!("UPDATE {table} SET {set} WHERE {keys}"));
        }

        let sql = match self.dialect() {
            Dialect::MsSql | Dialect::MsSql2008 => {
                let output = self.output_clause(&refreshed)?;
                format!("UPDATE {table} SET {set} {output} WHERE {keys}")
            }
            Dialect::PostgreSql => {
                let returning = self.returned_columns(&refreshed)?;
                format!("UPDATE {table} SET {set} WHERE {keys} RETURNING {returning}")
            }
            Dialect::MySql | Dialect::Sqlite => {
                let columns = self.returned_columns(&refreshed)?;
                format!(
                    "UPDATE {table} SET {set} WHERE {keys}; SELECT {columns} FROM {table} WHERE {keys}"
                )
            }
        };
        Ok(sql)
    }

    /// `UPDATE … SET …` scoped entirely by the caller's WHERE clause.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when nothing can be updated.
    pub fn construct_full_batch_update_statement(&self, where_clause: Option<&str>) -> Result<String> {
        let table = self.get_table_name(None)?;
        let set = self.construct_update_clause(None)?;
        let sql = match non_empty(where_clause) {
            Some(condition) => format!("UPDATE {table} SET {set} WHERE {condition}"),
            None => format!("UPDATE {table} SET {set}"),
        };
        self.log_statement("batch update", &sql);
        Ok(sql)
    }
}

pub(crate) fn non_empty(clause: Option<&str>) -> Option<&str> {
    clause.map(str::trim).filter(|clause| !clause.is_empty())
}

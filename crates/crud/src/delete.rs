use crate::builder::{GenericStatementSqlBuilder, cached};
use crate::error::Result;
use crate::update::non_empty;

impl GenericStatementSqlBuilder {
    /// `DELETE FROM … WHERE <keys>`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the entity has no primary key.
    pub fn construct_full_single_delete_statement(&self) -> Result<String> {
        cached(&self.full_single_delete, || {
            let sql = format!(
                "DELETE FROM {} WHERE {}",
                self.get_table_name(None)?,
                self.construct_keys_where_clause(None)?
            );
            self.log_statement("single delete", &sql);
            Ok(sql)
        })
    }

    /// `DELETE FROM …` scoped entirely by the caller's WHERE clause.
    ///
    /// # Errors
    ///
    /// Propagates identifier errors.
    pub fn construct_full_batch_delete_statement(&self, where_clause: Option<&str>) -> Result<String> {
        let table = self.get_table_name(None)?;
        let sql = match non_empty(where_clause) {
            Some(condition) => format!("DELETE FROM {table} WHERE {condition}"),
            None => format!("DELETE FROM {table}"),
        };
        self.log_statement("batch delete", &sql);
        Ok(sql)
    }
}

use crate::builder::{GenericStatementSqlBuilder, cached};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::registration::PropertyRegistration;

impl GenericStatementSqlBuilder {
    /// Full single-row INSERT, reading back every refreshed-on-insert
    /// property with the cheapest mechanism the dialect offers.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the generated keys cannot be read
    /// back in this dialect.
    pub fn construct_full_insert_statement(&self) -> Result<String> {
        cached(&self.full_insert, || {
            let sql = self.insert_statement()?;
            self.log_statement("insert", &sql);
            Ok(sql)
        })
    }

    /// Returns `true` when the only value read back after an insert is a
    /// single integer identity key, which the dialect's last-identity
    /// function can supply.
    #[must_use]
    pub fn uses_last_identity(&self) -> bool {
        let registration = self.registration();
        let generated: Vec<&PropertyRegistration> =
            registration.properties().iter().filter(|p| p.is_database_generated()).collect();
        let [key] = generated.as_slice() else {
            return false;
        };
        let refreshed = self.refreshed_on_insert();

        key.is_primary_key()
            && registration.key_count() == 1
            && key.is_integer()
            && refreshed.len() == 1
            && refreshed[0].name() == key.name()
    }

    fn insert_statement(&self) -> Result<String> {
        let table = self.get_table_name(None)?;
        let columns = self.construct_column_enumeration_for_insert()?;
        let params = self.construct_param_enumeration_for_insert()?;
        let refreshed = self.refreshed_on_insert();

        if refreshed.is_empty() {
            return Ok(self.plain_insert(&table, &columns, &params, ""));
        }

        if self.uses_last_identity() {
            let key = refreshed[0];
            let plain = self.plain_insert(&table, &columns, &params, "");
            return Ok(format!(
                "{plain}; SELECT {} AS {}",
                self.dialect().last_identity_function(),
                self.get_delimited_identifier(key.name())?
            ));
        }

        match self.dialect() {
            Dialect::MsSql | Dialect::MsSql2008 => {
                let output = self.output_clause(&refreshed)?;
                Ok(self.plain_insert(&table, &columns, &params, &output))
            }
            Dialect::PostgreSql => {
                let plain = self.plain_insert(&table, &columns, &params, "");
                Ok(format!("{plain} RETURNING {}", self.returned_columns(&refreshed)?))
            }
            Dialect::MySql | Dialect::Sqlite => {
                let plain = self.plain_insert(&table, &columns, &params, "");
                let condition = self.inserted_row_condition()?;
                Ok(format!(
                    "{plain}; SELECT {} FROM {table} WHERE {condition}",
                    self.returned_columns(&refreshed)?
                ))
            }
        }
    }

    fn plain_insert(&self, table: &str, columns: &str, params: &str, output: &str) -> String {
        let output = if output.is_empty() { String::new() } else { format!(" {output}") };
        if columns.is_empty() {
            return match self.dialect() {
                Dialect::MySql => format!("INSERT INTO {table} (){output} VALUES ()"),
                _ => format!("INSERT INTO {table}{output} DEFAULT VALUES"),
            };
        }
        format!("INSERT INTO {table} ({columns}){output} VALUES ({params})")
    }

    /// Locates the freshly inserted row for dialects reading generated
    /// values back with a follow-up SELECT.
    fn inserted_row_condition(&self) -> Result<String> {
        let registration = self.registration();
        let generated_keys: Vec<&PropertyRegistration> = registration
            .key_properties()
            .filter(|key| key.is_database_generated())
            .collect();

        match generated_keys.as_slice() {
            [] => self.construct_keys_where_clause(None),
            [key] => {
                if self.dialect() == Dialect::Sqlite && registration.key_count() > 1 {
                    return Err(Error::configuration(
                        registration.entity_name(),
                        "sqlite can only read back a generated key when it is the only primary key",
                    ));
                }
                Ok(format!(
                    "{}={}",
                    self.column_name(key, None, false)?,
                    self.dialect().last_identity_function()
                ))
            }
            _ => Err(Error::configuration(
                registration.entity_name(),
                format!("{} cannot read back more than one generated key", self.dialect()),
            )),
        }
    }

    /// Properties bound as parameters of the INSERT: the inserted columns,
    /// then provided keys the statement only reads back by.
    pub(crate) fn insert_parameters(&self) -> impl Iterator<Item = &PropertyRegistration> {
        let provided_keys = self
            .registration()
            .key_properties()
            .filter(|key| !key.is_database_generated() && key.is_excluded_from_inserts());
        self.insert_properties().chain(provided_keys)
    }

    /// `OUTPUT inserted.col, …` for SQL Server.
    pub(crate) fn output_clause(&self, properties: &[&PropertyRegistration]) -> Result<String> {
        let columns = properties
            .iter()
            .map(|property| Ok(format!("inserted.{}", self.column_name(property, None, true)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("OUTPUT {}", columns.join(", ")))
    }

    pub(crate) fn returned_columns(&self, properties: &[&PropertyRegistration]) -> Result<String> {
        let columns = properties
            .iter()
            .map(|property| self.column_name(property, None, true))
            .collect::<Result<Vec<_>>>()?;
        Ok(columns.join(", "))
    }
}

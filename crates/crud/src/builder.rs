//! Per-entity, per-dialect statement builder.
//!
//! Fragments that depend only on the registration and the dialect are
//! computed on first use and published once; fragments depending on an alias
//! or on call arguments are recomputed on every call.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::dialect::{Dialect, DialectOptions};
use crate::error::{Error, Result};
use crate::registration::{EntityRegistration, PropertyRegistration};

type Cached = OnceLock<Result<String>>;

/// Derives SQL text for one entity registration in one dialect.
pub struct GenericStatementSqlBuilder {
    registration: Arc<EntityRegistration>,
    dialect: Dialect,
    options: DialectOptions,
    table_name: Cached,
    keys_where_clause: Cached,
    select_columns: Cached,
    insert_columns: Cached,
    insert_params: Cached,
    update_clause: Cached,
    pub(crate) full_insert: Cached,
    pub(crate) full_single_update: Cached,
    pub(crate) full_single_delete: Cached,
    pub(crate) full_single_select: Cached,
}

impl GenericStatementSqlBuilder {
    /// Creates a builder using the dialect's own conventions.
    #[must_use]
    pub fn new(registration: Arc<EntityRegistration>, dialect: Dialect) -> Self {
        Self::with_options(registration, dialect, dialect.options())
    }

    /// Creates a builder with custom identifier and parameter conventions.
    /// Statement strategies still follow `dialect`.
    #[must_use]
    pub fn with_options(
        registration: Arc<EntityRegistration>, dialect: Dialect, options: DialectOptions,
    ) -> Self {
        Self {
            registration,
            dialect,
            options,
            table_name: OnceLock::new(),
            keys_where_clause: OnceLock::new(),
            select_columns: OnceLock::new(),
            insert_columns: OnceLock::new(),
            insert_params: OnceLock::new(),
            update_clause: OnceLock::new(),
            full_insert: OnceLock::new(),
            full_single_update: OnceLock::new(),
            full_single_delete: OnceLock::new(),
            full_single_select: OnceLock::new(),
        }
    }

    #[must_use]
    pub const fn registration(&self) -> &Arc<EntityRegistration> {
        &self.registration
    }

    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[must_use]
    pub const fn options(&self) -> &DialectOptions {
        &self.options
    }

    /// Delimits an identifier in the dialect's quoting.
    ///
    /// # Errors
    ///
    /// Returns an error for empty identifiers.
    pub fn get_delimited_identifier(&self, identifier: &str) -> Result<String> {
        self.options.delimit(identifier)
    }

    /// Formats a parameter reference in the dialect's style.
    ///
    /// # Errors
    ///
    /// Returns an error for empty parameter names.
    pub fn get_prefixed_parameter(&self, name: &str) -> Result<String> {
        self.options.parameter(name)
    }

    /// Delimited, optionally schema/database qualified table name, followed
    /// by `AS alias` when an alias is given.
    ///
    /// # Errors
    ///
    /// Returns an error for empty aliases.
    pub fn get_table_name(&self, alias: Option<&str>) -> Result<String> {
        let table = cached(&self.table_name, || self.qualified_table_name())?;
        match alias {
            None => Ok(table),
            Some(alias) => Ok(format!("{table} AS {}", self.options.delimit(alias)?)),
        }
    }

    fn qualified_table_name(&self) -> Result<String> {
        let registration = &self.registration;
        let mut parts = Vec::with_capacity(3);
        if self.options.supports_databases
            && let Some(database) = registration.database_name()
        {
            parts.push(self.options.delimit(database)?);
        }
        if self.options.supports_schemas
            && let Some(schema) = registration.schema_name()
        {
            parts.push(self.options.delimit(schema)?);
        }
        parts.push(self.options.delimit(registration.table_name())?);
        Ok(parts.join("."))
    }

    /// Delimited column name of the named property, qualified with `alias`.
    /// With `normalize_for_select`, a column named differently from its
    /// property is followed by `AS <property>`.
    ///
    /// # Errors
    ///
    /// Returns an error when the property is not mapped.
    pub fn get_column_name(
        &self, property: &str, alias: Option<&str>, normalize_for_select: bool,
    ) -> Result<String> {
        let property = self.property(property)?;
        self.column_name(property, alias, normalize_for_select)
    }

    pub(crate) fn column_name(
        &self, property: &PropertyRegistration, alias: Option<&str>, normalize_for_select: bool,
    ) -> Result<String> {
        let column = self.options.delimit(property.column_name())?;
        let mut name = match alias {
            Some(alias) => format!("{}.{column}", self.options.delimit(alias)?),
            None => column,
        };
        if normalize_for_select && property.column_name() != property.name() {
            name.push_str(" AS ");
            name.push_str(&self.options.delimit(property.name())?);
        }
        Ok(name)
    }

    pub(crate) fn property(&self, name: &str) -> Result<&PropertyRegistration> {
        self.registration.property(name).ok_or_else(|| {
            Error::invalid_argument(
                name,
                format!("not a property of {}", self.registration.entity_name()),
            )
        })
    }

    /// `col1=@Prop1 AND col2=@Prop2` over the primary keys in key order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the entity has no primary key.
    pub fn construct_keys_where_clause(&self, alias: Option<&str>) -> Result<String> {
        match alias {
            None => cached(&self.keys_where_clause, || self.keys_where_clause(None)),
            Some(_) => self.keys_where_clause(alias),
        }
    }

    fn keys_where_clause(&self, alias: Option<&str>) -> Result<String> {
        self.require_keys()?;
        let conditions = self
            .registration
            .key_properties()
            .map(|key| {
                Ok(format!(
                    "{}={}",
                    self.column_name(key, alias, false)?,
                    self.options.parameter(key.name())?
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(conditions.join(" AND "))
    }

    /// All mapped columns, normalized to their property names.
    ///
    /// # Errors
    ///
    /// Returns an error for empty aliases.
    pub fn construct_column_enumeration_for_select(&self, alias: Option<&str>) -> Result<String> {
        match alias {
            None => cached(&self.select_columns, || self.select_columns(None)),
            Some(_) => self.select_columns(alias),
        }
    }

    fn select_columns(&self, alias: Option<&str>) -> Result<String> {
        self.enumerate(self.registration.properties().iter(), |property| {
            self.column_name(property, alias, true)
        })
    }

    /// Columns written by an INSERT.
    ///
    /// # Errors
    ///
    /// Propagates identifier errors.
    pub fn construct_column_enumeration_for_insert(&self) -> Result<String> {
        cached(&self.insert_columns, || {
            self.enumerate(self.insert_properties(), |property| {
                self.column_name(property, None, false)
            })
        })
    }

    /// Parameters matching [`Self::construct_column_enumeration_for_insert`].
    ///
    /// # Errors
    ///
    /// Propagates parameter errors.
    pub fn construct_param_enumeration_for_insert(&self) -> Result<String> {
        cached(&self.insert_params, || {
            self.enumerate(self.insert_properties(), |property| {
                self.options.parameter(property.name())
            })
        })
    }

    /// `col1=@Prop1, col2=@Prop2` over the updatable properties.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when nothing can be updated.
    pub fn construct_update_clause(&self, alias: Option<&str>) -> Result<String> {
        match alias {
            None => cached(&self.update_clause, || self.update_clause(None)),
            Some(_) => self.update_clause(alias),
        }
    }

    fn update_clause(&self, alias: Option<&str>) -> Result<String> {
        let clause = self.enumerate(self.update_properties(), |property| {
            Ok(format!(
                "{}={}",
                self.column_name(property, alias, false)?,
                self.options.parameter(property.name())?
            ))
        })?;
        if clause.is_empty() {
            return Err(Error::configuration(
                self.registration.entity_name(),
                "no property can be updated",
            ));
        }
        Ok(clause)
    }

    fn enumerate<'a>(
        &self, properties: impl Iterator<Item = &'a PropertyRegistration>,
        render: impl Fn(&PropertyRegistration) -> Result<String>,
    ) -> Result<String> {
        let rendered = properties.map(render).collect::<Result<Vec<_>>>()?;
        Ok(rendered.join(", "))
    }

    pub(crate) fn insert_properties(&self) -> impl Iterator<Item = &PropertyRegistration> {
        self.registration.properties().iter().filter(|property| !property.is_excluded_from_inserts())
    }

    pub(crate) fn update_properties(&self) -> impl Iterator<Item = &PropertyRegistration> {
        self.registration.properties().iter().filter(|property| {
            !property.is_primary_key()
                && !property.is_excluded_from_updates()
                && !property.is_database_generated()
        })
    }

    pub(crate) fn refreshed_on_insert(&self) -> Vec<&PropertyRegistration> {
        self.registration.properties().iter().filter(|property| property.is_refreshed_on_inserts()).collect()
    }

    pub(crate) fn refreshed_on_update(&self) -> Vec<&PropertyRegistration> {
        self.registration.properties().iter().filter(|property| property.is_refreshed_on_updates()).collect()
    }

    pub(crate) fn require_keys(&self) -> Result<()> {
        if self.registration.key_count() == 0 {
            return Err(Error::configuration(
                self.registration.entity_name(),
                "no primary key is mapped",
            ));
        }
        Ok(())
    }

    pub(crate) fn log_statement(&self, kind: &str, sql: &str) {
        tracing::debug!(
            entity = self.registration.entity_name(),
            dialect = %self.dialect,
            sql = %sql,
            "{kind} statement constructed"
        );
    }
}

impl fmt::Debug for GenericStatementSqlBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericStatementSqlBuilder")
            .field("entity", &self.registration.entity_name())
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

/// Computes `cell` once, errors included, and hands out copies.
pub(crate) fn cached(cell: &Cached, init: impl FnOnce() -> Result<String>) -> Result<String> {
    cell.get_or_init(init).clone()
}

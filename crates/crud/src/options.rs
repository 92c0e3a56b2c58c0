//! Statement option aggregation.
//!
//! Options are plain values: they carry what the caller asked for and are
//! read, never modified, while statements are built and rows materialized.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sea_query::Value;

use crate::clause::Clause;
use crate::error::{Error, Result};
use crate::join::JoinKind;
use crate::mappings::Mappings;
use crate::query::Transaction;
use crate::registration::{Entity, EntityRegistration, short_type_name};

type Resolve = fn(&Mappings) -> Result<Arc<EntityRegistration>>;

/// Per-statement options.
#[derive(Debug, Clone, Default)]
pub struct StatementOptions {
    pub(crate) transaction: Option<Transaction>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) mapping: Option<Arc<EntityRegistration>>,
    pub(crate) where_clause: Option<Clause>,
    pub(crate) order_clause: Option<Clause>,
    pub(crate) parameters: Vec<(String, Value)>,
    pub(crate) skip: Option<u64>,
    pub(crate) limit: Option<u64>,
    pub(crate) force_stream: bool,
    pub(crate) alias: Option<String>,
    pub(crate) joins: Vec<JoinOptions>,
}

impl StatementOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the statement inside the caller's transaction.
    #[must_use]
    pub fn attach_to_transaction(mut self, transaction: Transaction) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Command timeout handed to the executor.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses `mapping` instead of the registered mapping of the entity.
    #[must_use]
    pub fn with_entity_mapping_override(mut self, mapping: Arc<EntityRegistration>) -> Self {
        self.mapping = Some(mapping);
        self
    }

    #[must_use]
    pub fn r#where(mut self, clause: impl Into<Clause>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    #[must_use]
    pub fn order_by(mut self, clause: impl Into<Clause>) -> Self {
        self.order_clause = Some(clause.into());
        self
    }

    /// Adds a named parameter referenced by the clauses.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub const fn top(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Asks the executor to stream rows instead of buffering them.
    #[must_use]
    pub const fn stream(mut self) -> Self {
        self.force_stream = true;
        self
    }

    /// Alias of the main entity in joined statements.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Joins a related entity.
    #[must_use]
    pub fn include(mut self, join: JoinOptions) -> Self {
        self.joins.push(join);
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn joins(&self) -> &[JoinOptions] {
        &self.joins
    }

    #[must_use]
    pub const fn has_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    /// Rejects option combinations that cannot produce a reproducible
    /// statement.
    ///
    /// # Errors
    ///
    /// Returns a pagination error for SKIP/TOP across joins without an ORDER
    /// BY clause, and an argument error for duplicate joins, empty aliases or
    /// empty parameter names.
    pub fn validate(&self) -> Result<()> {
        let paged = self.skip.is_some() || self.limit.is_some();
        let ordered = self.order_clause.is_some() || self.joins.iter().any(|join| join.order_clause.is_some());
        if paged && self.has_joins() && !ordered {
            return Err(Error::pagination(
                "SKIP/TOP across joined entities requires an ORDER BY clause",
            ));
        }

        if self.alias.as_deref().is_some_and(|alias| alias.trim().is_empty()) {
            return Err(Error::invalid_argument("alias", "must not be empty"));
        }

        if let Some((name, _)) = self.parameters.iter().find(|(name, _)| name.trim().is_empty()) {
            return Err(Error::invalid_argument("parameter", format!("`{name}` is not a valid name")));
        }

        let mut seen = HashSet::new();
        for join in &self.joins {
            if !seen.insert(join.entity_type) {
                return Err(Error::invalid_argument(
                    join.entity_name,
                    "the entity is joined more than once",
                ));
            }
            if join.alias.as_deref().is_some_and(|alias| alias.trim().is_empty()) {
                return Err(Error::invalid_argument("alias", "must not be empty"));
            }
        }
        Ok(())
    }
}

/// Options for one joined entity.
#[derive(Debug, Clone)]
pub struct JoinOptions {
    pub(crate) entity_type: TypeId,
    pub(crate) entity_name: &'static str,
    pub(crate) resolve: Resolve,
    pub(crate) mapping: Option<Arc<EntityRegistration>>,
    pub(crate) kind: Option<JoinKind>,
    pub(crate) alias: Option<String>,
    pub(crate) where_clause: Option<Clause>,
    pub(crate) order_clause: Option<Clause>,
}

impl JoinOptions {
    /// Joins `E` with the join kind inferred from the relationship.
    #[must_use]
    pub fn of<E: Entity>() -> Self {
        Self {
            entity_type: TypeId::of::<E>(),
            entity_name: short_type_name::<E>(),
            resolve: Mappings::registration::<E>,
            mapping: None,
            kind: None,
            alias: None,
            where_clause: None,
            order_clause: None,
        }
    }

    #[must_use]
    pub const fn inner_join(mut self) -> Self {
        self.kind = Some(JoinKind::Inner);
        self
    }

    #[must_use]
    pub const fn left_outer_join(mut self) -> Self {
        self.kind = Some(JoinKind::LeftOuter);
        self
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn r#where(mut self, clause: impl Into<Clause>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    #[must_use]
    pub fn order_by(mut self, clause: impl Into<Clause>) -> Self {
        self.order_clause = Some(clause.into());
        self
    }

    /// Uses `mapping` instead of the registered mapping of the joined entity.
    #[must_use]
    pub fn with_entity_mapping_override(mut self, mapping: Arc<EntityRegistration>) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub(crate) fn registration(&self, mappings: &Mappings) -> Result<Arc<EntityRegistration>> {
        match &self.mapping {
            Some(mapping) => Ok(Arc::clone(mapping)),
            None => (self.resolve)(mappings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property;
    use crate::registration::EntityMapping;

    #[derive(Default)]
    struct Building {
        id: i32,
    }

    impl Entity for Building {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::new("Buildings").property(property!(Building, id as "Id").primary_key())
        }
    }

    #[test]
    fn paging_across_joins_needs_order() {
        let options = StatementOptions::new().include(JoinOptions::of::<Building>()).top(10);
        assert!(matches!(options.validate(), Err(Error::Pagination { .. })));

        let options = options.order_by("{Id:TC}");
        options.validate().unwrap();

        // without joins the dialect decides
        StatementOptions::new().skip(3).validate().unwrap();
    }

    #[test]
    fn duplicate_joins() {
        let options = StatementOptions::new()
            .include(JoinOptions::of::<Building>())
            .include(JoinOptions::of::<Building>().with_alias("b2"));
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn empty_names() {
        let err = StatementOptions::new().with_parameter(" ", 1).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let err = StatementOptions::new().with_alias("").validate().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}

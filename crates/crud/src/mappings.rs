use std::any::TypeId;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::builder::GenericStatementSqlBuilder;
use crate::config::CrudConfig;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::join::DEFAULT_MAX_JOINS;
use crate::registration::{Entity, EntityMapping, EntityRegistration, short_type_name};

/// Registry of frozen entity registrations and their statement builders.
///
/// Builders are created on first use for each registration and dialect and
/// shared from then on.
#[derive(Debug)]
pub struct Mappings {
    dialect: Dialect,
    max_joins: usize,
    timeout: Option<Duration>,
    registrations: DashMap<TypeId, Arc<EntityRegistration>>,
    builders: DashMap<(TypeId, Dialect), Arc<GenericStatementSqlBuilder>>,
}

impl Mappings {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            max_joins: DEFAULT_MAX_JOINS,
            timeout: None,
            registrations: DashMap::new(),
            builders: DashMap::new(),
        }
    }

    /// Registry using the environment-provided defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when a configuration value cannot be parsed.
    pub fn from_config(config: &CrudConfig) -> anyhow::Result<Self> {
        let mut mappings = Self::new(config.dialect()?);
        mappings.max_joins = config.max_joins()?;
        mappings.timeout = config.command_timeout()?;
        Ok(mappings)
    }

    #[must_use]
    pub const fn with_max_joins(mut self, max_joins: usize) -> Self {
        self.max_joins = max_joins;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[must_use]
    pub const fn max_joins(&self) -> usize {
        self.max_joins
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Registers the default mapping of `E`.
    ///
    /// # Errors
    ///
    /// Returns an error when the mapping is invalid or `E` is already
    /// registered.
    pub fn register<E: Entity>(&self) -> Result<Arc<EntityRegistration>> {
        self.register_with(E::mapping())
    }

    /// Registers a custom mapping for `E`.
    ///
    /// # Errors
    ///
    /// Returns an error when the mapping is invalid or `E` is already
    /// registered.
    pub fn register_with<E: Entity>(&self, mapping: EntityMapping<E>) -> Result<Arc<EntityRegistration>> {
        let registration = mapping.freeze()?;
        match self.registrations.entry(TypeId::of::<E>()) {
            Entry::Occupied(_) => Err(Error::configuration(
                short_type_name::<E>(),
                "the entity is already registered",
            )),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&registration));
                Ok(registration)
            }
        }
    }

    /// Registration of `E`, registering its default mapping on first use.
    ///
    /// # Errors
    ///
    /// Returns an error when the default mapping is invalid.
    pub fn registration<E: Entity>(&self) -> Result<Arc<EntityRegistration>> {
        if let Some(registration) = self.registrations.get(&TypeId::of::<E>()) {
            return Ok(Arc::clone(&registration));
        }
        let registration = E::mapping().freeze()?;
        let registered = self.registrations.entry(TypeId::of::<E>()).or_insert(registration);
        Ok(Arc::clone(&registered))
    }

    /// Registration of an already registered type.
    #[must_use]
    pub fn registration_of(&self, entity_type: TypeId) -> Option<Arc<EntityRegistration>> {
        self.registrations.get(&entity_type).map(|registration| Arc::clone(&registration))
    }

    /// Builder for `registration` in the default dialect.
    #[must_use]
    pub fn builder(&self, registration: &Arc<EntityRegistration>) -> Arc<GenericStatementSqlBuilder> {
        self.builder_for(registration, self.dialect)
    }

    /// Builder for `registration` in `dialect`. Builders of registered
    /// mappings are cached; any other mapping gets a fresh builder.
    #[must_use]
    pub fn builder_for(
        &self, registration: &Arc<EntityRegistration>, dialect: Dialect,
    ) -> Arc<GenericStatementSqlBuilder> {
        let entity_type = registration.entity_type();
        let registered = self
            .registrations
            .get(&entity_type)
            .is_some_and(|registered| Arc::ptr_eq(&registered, registration));
        if !registered {
            // one-off mappings are not cached
            return Arc::new(GenericStatementSqlBuilder::new(Arc::clone(registration), dialect));
        }

        let builder = self.builders.entry((entity_type, dialect)).or_insert_with(|| {
            Arc::new(GenericStatementSqlBuilder::new(Arc::clone(registration), dialect))
        });
        Arc::clone(&builder)
    }
}

impl Default for Mappings {
    fn default() -> Self {
        Self::new(Dialect::PostgreSql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property;

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
    fn registering_twice_fails() {
        let mappings = Mappings::new(Dialect::MsSql);
        mappings.register::<Building>().unwrap();
        let err = mappings.register::<Building>().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn default_registration_is_reused() {
        let mappings = Mappings::default();
        let first = mappings.registration::<Building>().unwrap();
        let second = mappings.registration::<Building>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(mappings.registration_of(TypeId::of::<Building>()).is_some());
    }

    #[test]
    fn builders_are_cached_per_dialect() {
        let mappings = Mappings::new(Dialect::MsSql);
        let registration = mappings.registration::<Building>().unwrap();

        let first = mappings.builder(&registration);
        let second = mappings.builder(&registration);
        assert!(Arc::ptr_eq(&first, &second));

        let other = mappings.builder_for(&registration, Dialect::MySql);
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(other.dialect(), Dialect::MySql);
    }

    #[test]
    fn unregistered_mappings_are_not_cached() {
        let mappings = Mappings::new(Dialect::MsSql);
        mappings.registration::<Building>().unwrap();
        let adhoc = Building::mapping().freeze().unwrap();

        let first = mappings.builder(&adhoc);
        let second = mappings.builder(&adhoc);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(first.registration(), &adhoc));
        assert!(mappings.builders.is_empty());
    }

    #[test]
    fn from_config() {
        let config = CrudConfig {
            dialect: "mysql".to_string(),
            command_timeout_secs: "5".to_string(),
            max_joins: "4".to_string(),
        };
        let mappings = Mappings::from_config(&config).unwrap();
        assert_eq!(mappings.dialect(), Dialect::MySql);
        assert_eq!(mappings.max_joins(), 4);
        assert_eq!(mappings.timeout(), Some(Duration::from_secs(5)));
    }
}

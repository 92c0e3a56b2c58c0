//! Entity metadata consumed by the statement builder and the relationship
//! instance builder.
//!
//! Mappings are assembled with the typed [`EntityMapping`] builder and frozen
//! into an [`EntityRegistration`]. A frozen registration exposes no mutators;
//! every statement builder reads it once and caches what it derives from it.

use std::any::{Any, TypeId, type_name};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use sea_query::{ColumnType, Value, ValueType};

use crate::error::{Error, Result};
use crate::value::{Field, coerce, is_integer};

/// Shared, mutable handle to a materialized entity.
pub type Shared<E> = Arc<RwLock<E>>;

/// Wraps an entity in a [`Shared`] handle.
#[must_use]
pub fn shared<E>(entity: E) -> Shared<E> {
    Arc::new(RwLock::new(entity))
}

/// Types with a default mapping.
pub trait Entity: Any + Send + Sync + Default {
    /// The mapping used when no override is supplied.
    fn mapping() -> EntityMapping<Self>;
}

/// Declares a [`PropertyRegistration`] for a struct field.
///
/// # Examples
///
/// ```ignore
/// let id = property!(Building, id as "Id").primary_key().database_generated();
/// let name = property!(Building, name);
/// ```
#[macro_export]
macro_rules! property {
    ($entity:ty, $field:ident as $name:expr) => {
        $crate::PropertyRegistration::new(
            $name,
            |entity: &$entity| ::std::clone::Clone::clone(&entity.$field),
            |entity: &mut $entity, value| entity.$field = value,
        )
    };
    ($entity:ty, $field:ident) => {
        $crate::property!($entity, $field as stringify!($field))
    };
}

/// Read/write capability for a single mapped property.
///
/// Resolved once at registration so that hot paths never need reflection.
pub trait PropertyAccessor: Send + Sync {
    /// Reads the property value. Returns `None` when `entity` is not an
    /// instance of the owning type.
    fn get_value(&self, entity: &dyn Any) -> Option<Value>;

    /// Writes the property value.
    ///
    /// # Errors
    ///
    /// Returns an error when `entity` is of another type or `value` cannot be
    /// converted to the property type.
    fn set_value(&self, entity: &mut dyn Any, value: Value) -> Result<()>;
}

type Getter<E, V> = Box<dyn Fn(&E) -> V + Send + Sync>;
type Setter<E, V> = Box<dyn Fn(&mut E, V) + Send + Sync>;

struct FieldAccessor<E, V> {
    get: Getter<E, V>,
    set: Setter<E, V>,
}

impl<E, V> PropertyAccessor for FieldAccessor<E, V>
where
    E: Any,
    V: ValueType + Into<Value> + 'static,
{
    fn get_value(&self, entity: &dyn Any) -> Option<Value> {
        entity.downcast_ref::<E>().map(|entity| (self.get)(entity).into())
    }

    fn set_value(&self, entity: &mut dyn Any, value: Value) -> Result<()> {
        let entity = entity.downcast_mut::<E>().ok_or_else(|| {
            Error::invalid_argument("entity", format!("expected an instance of {}", type_name::<E>()))
        })?;
        let value = coerce(value, &<V as ValueType>::column_type());
        let converted = <V as ValueType>::try_from(value).map_err(|_e| {
            Error::conversion(format!("cannot convert value into {}", <V as ValueType>::type_name()))
        })?;
        (self.set)(entity, converted);
        Ok(())
    }
}

/// Metadata for one mapped property.
#[derive(Clone)]
pub struct PropertyRegistration {
    name: String,
    column_name: String,
    column_type: ColumnType,
    column_order: Option<i32>,
    declared_order: usize,
    primary_key: bool,
    database_generated: bool,
    excluded_from_inserts: bool,
    excluded_from_updates: bool,
    refreshed_on_inserts: bool,
    refreshed_on_updates: bool,
    nullable: bool,
    accessor: Arc<dyn PropertyAccessor>,
}

impl PropertyRegistration {
    /// Creates a property backed by a getter and a setter. The column name
    /// defaults to the property name.
    ///
    /// Prefer the [`property!`](crate::property) macro for plain struct fields.
    pub fn new<E, V, G, S>(name: impl Into<String>, get: G, set: S) -> Self
    where
        E: Any + Send + Sync,
        V: ValueType + Into<Value> + 'static,
        G: Fn(&E) -> V + Send + Sync + 'static,
        S: Fn(&mut E, V) + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            column_name: name.clone(),
            name,
            column_type: <V as ValueType>::column_type(),
            column_order: None,
            declared_order: 0,
            primary_key: false,
            database_generated: false,
            excluded_from_inserts: false,
            excluded_from_updates: false,
            refreshed_on_inserts: false,
            refreshed_on_updates: false,
            nullable: false,
            accessor: Arc::new(FieldAccessor {
                get: Box::new(get),
                set: Box::new(set),
            }),
        }
    }

    /// Maps the property to a differently named column.
    #[must_use]
    pub fn column(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = column_name.into();
        self
    }

    /// Marks the property as (part of) the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks the property as generated by the database. Generated properties
    /// are never written and are read back after an insert.
    #[must_use]
    pub const fn database_generated(mut self) -> Self {
        self.database_generated = true;
        self.excluded_from_inserts = true;
        self.excluded_from_updates = true;
        self.refreshed_on_inserts = true;
        self
    }

    /// Leaves the property out of INSERT statements.
    #[must_use]
    pub const fn exclude_from_inserts(mut self) -> Self {
        self.excluded_from_inserts = true;
        self
    }

    /// Leaves the property out of UPDATE statements.
    #[must_use]
    pub const fn exclude_from_updates(mut self) -> Self {
        self.excluded_from_updates = true;
        self
    }

    /// Reads the property back after an insert.
    #[must_use]
    pub const fn refresh_on_inserts(mut self) -> Self {
        self.refreshed_on_inserts = true;
        self
    }

    /// Reads the property back after an update.
    #[must_use]
    pub const fn refresh_on_updates(mut self) -> Self {
        self.refreshed_on_updates = true;
        self
    }

    /// Marks the column as nullable (relevant for foreign keys).
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Orders the property among the composite key columns.
    #[must_use]
    pub const fn column_order(mut self, order: i32) -> Self {
        self.column_order = Some(order);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    #[must_use]
    pub const fn column_type(&self) -> &ColumnType {
        &self.column_type
    }

    #[must_use]
    pub const fn declared_order(&self) -> usize {
        self.declared_order
    }

    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    #[must_use]
    pub const fn is_database_generated(&self) -> bool {
        self.database_generated
    }

    #[must_use]
    pub const fn is_excluded_from_inserts(&self) -> bool {
        self.excluded_from_inserts
    }

    #[must_use]
    pub const fn is_excluded_from_updates(&self) -> bool {
        self.excluded_from_updates
    }

    #[must_use]
    pub const fn is_refreshed_on_inserts(&self) -> bool {
        self.refreshed_on_inserts
    }

    #[must_use]
    pub const fn is_refreshed_on_updates(&self) -> bool {
        self.refreshed_on_updates
    }

    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Returns `true` when the property maps to an integer column.
    #[must_use]
    pub const fn is_integer(&self) -> bool {
        is_integer(&self.column_type)
    }

    /// Reads the property from an entity (`&E`, not a [`Shared`] handle).
    #[must_use]
    pub fn get_value(&self, entity: &dyn Any) -> Option<Value> {
        self.accessor.get_value(entity)
    }

    /// Writes the property on an entity (`&mut E`).
    ///
    /// # Errors
    ///
    /// Returns an error when the entity type or the value type does not match.
    pub fn set_value(&self, entity: &mut dyn Any, value: Value) -> Result<()> {
        self.accessor.set_value(entity, value)
    }
}

impl fmt::Debug for PropertyRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyRegistration")
            .field("name", &self.name)
            .field("column_name", &self.column_name)
            .field("primary_key", &self.primary_key)
            .field("database_generated", &self.database_generated)
            .field("declared_order", &self.declared_order)
            .finish_non_exhaustive()
    }
}

/// Direction of a relationship as seen from the entity that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// The declaring entity is the parent and holds a collection of children.
    OneToMany,
    /// The declaring entity references a single parent.
    ManyToOne,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneToMany => write!(f, "one-to-many"),
            Self::ManyToOne => write!(f, "many-to-one"),
        }
    }
}

type AttachFn = Arc<dyn Fn(&mut dyn Any, &EntityInstance) -> Result<()> + Send + Sync>;

/// Relationship descriptor owned by one entity registration.
#[derive(Clone)]
pub struct RelationshipRegistration {
    owner_type: TypeId,
    kind: RelationshipKind,
    related_type: TypeId,
    related_name: &'static str,
    referencing_keys: Vec<String>,
    referenced_keys: Vec<String>,
    property: Option<String>,
    attach: Option<AttachFn>,
}

impl RelationshipRegistration {
    /// `P` holds a collection of `C`; `referencing_keys` are the foreign key
    /// properties declared on `C`.
    #[must_use]
    pub fn one_to_many<P, C>(referencing_keys: &[&str]) -> Self
    where
        P: Any,
        C: Any,
    {
        Self::new::<P, C>(RelationshipKind::OneToMany, referencing_keys)
    }

    /// `C` references a single `P`; `referencing_keys` are the foreign key
    /// properties declared on `C`.
    #[must_use]
    pub fn many_to_one<C, P>(referencing_keys: &[&str]) -> Self
    where
        C: Any,
        P: Any,
    {
        Self::new::<C, P>(RelationshipKind::ManyToOne, referencing_keys)
    }

    fn new<O: Any, R: Any>(kind: RelationshipKind, referencing_keys: &[&str]) -> Self {
        Self {
            owner_type: TypeId::of::<O>(),
            kind,
            related_type: TypeId::of::<R>(),
            related_name: short_type_name::<R>(),
            referencing_keys: referencing_keys.iter().map(ToString::to_string).collect(),
            referenced_keys: Vec::new(),
            property: None,
            attach: None,
        }
    }

    /// Uses explicit parent key properties instead of the parent's primary keys.
    #[must_use]
    pub fn with_referenced_keys(mut self, keys: &[&str]) -> Self {
        self.referenced_keys = keys.iter().map(ToString::to_string).collect();
        self
    }

    /// Stores related instances through `attach`, which receives the owning
    /// entity and the related instance. `property` names the navigation
    /// property in error messages.
    ///
    /// `O` is the declaring entity and `R` the related entity; for
    /// one-to-many relationships `attach` is called once per distinct child,
    /// for many-to-one relationships it overwrites the parent reference.
    #[must_use]
    pub fn attach<O, R, F>(mut self, property: impl Into<String>, attach: F) -> Self
    where
        O: Any + Send + Sync,
        R: Any + Send + Sync,
        F: Fn(&mut O, Shared<R>) + Send + Sync + 'static,
    {
        let property = property.into();
        let name = property.clone();
        self.property = Some(property);
        self.attach = Some(Arc::new(move |owner: &mut dyn Any, related: &EntityInstance| {
            let owner = owner.downcast_mut::<O>().ok_or_else(|| {
                Error::invalid_argument(
                    name.as_str(),
                    format!("expected an instance of {}", type_name::<O>()),
                )
            })?;
            let related = related.downcast::<R>().ok_or_else(|| {
                Error::invalid_argument(
                    name.as_str(),
                    format!("expected a related instance of {}", type_name::<R>()),
                )
            })?;
            attach(owner, related);
            Ok(())
        }));
        self
    }

    #[must_use]
    pub const fn kind(&self) -> RelationshipKind {
        self.kind
    }

    #[must_use]
    pub const fn related_type(&self) -> TypeId {
        self.related_type
    }

    #[must_use]
    pub const fn related_name(&self) -> &'static str {
        self.related_name
    }

    #[must_use]
    pub fn referencing_keys(&self) -> &[String] {
        &self.referencing_keys
    }

    #[must_use]
    pub fn referenced_keys(&self) -> &[String] {
        &self.referenced_keys
    }

    #[must_use]
    pub fn property(&self) -> Option<&str> {
        self.property.as_deref()
    }

    /// Returns `true` when the relationship stores related data on the entity.
    #[must_use]
    pub const fn has_property(&self) -> bool {
        self.attach.is_some()
    }

    /// Attaches `related` to `owner` (`&mut O`). Relationships without a
    /// navigation property are a no-op.
    pub(crate) fn attach_to(&self, owner: &mut dyn Any, related: &EntityInstance) -> Result<()> {
        match &self.attach {
            Some(attach) => attach(owner, related),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for RelationshipRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipRegistration")
            .field("kind", &self.kind)
            .field("related", &self.related_name)
            .field("referencing_keys", &self.referencing_keys)
            .field("referenced_keys", &self.referenced_keys)
            .field("property", &self.property)
            .finish_non_exhaustive()
    }
}

/// Typed, mutable mapping for `E`. Call [`EntityMapping::freeze`] to obtain
/// the immutable [`EntityRegistration`].
pub struct EntityMapping<E> {
    table_name: String,
    schema_name: Option<String>,
    database_name: Option<String>,
    properties: Vec<PropertyRegistration>,
    relationships: Vec<RelationshipRegistration>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> EntityMapping<E> {
    /// Starts a mapping for the given table.
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            schema_name: None,
            database_name: None,
            properties: Vec::new(),
            relationships: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Qualifies the table with a schema.
    #[must_use]
    pub fn schema(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = Some(schema_name.into());
        self
    }

    /// Qualifies the table with a database.
    #[must_use]
    pub fn database(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = Some(database_name.into());
        self
    }

    /// Adds a property. Declaration order is preserved.
    #[must_use]
    pub fn property(mut self, property: PropertyRegistration) -> Self {
        self.properties.push(property);
        self
    }

    /// Adds a relationship descriptor.
    #[must_use]
    pub fn relationship(mut self, relationship: RelationshipRegistration) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Declares that `E` holds a collection of `C`, linked through the
    /// `referencing_keys` foreign key properties on `C`.
    #[must_use]
    pub fn has_many<C>(
        self, property: impl Into<String>, referencing_keys: &[&str],
        attach: impl Fn(&mut E, Shared<C>) + Send + Sync + 'static,
    ) -> Self
    where
        C: Any + Send + Sync,
    {
        let relationship = RelationshipRegistration::one_to_many::<E, C>(referencing_keys)
            .attach::<E, C, _>(property, attach);
        self.relationship(relationship)
    }

    /// Declares that `E` references a single `P` through its own
    /// `referencing_keys` foreign key properties.
    #[must_use]
    pub fn belongs_to<P>(
        self, property: impl Into<String>, referencing_keys: &[&str],
        attach: impl Fn(&mut E, Shared<P>) + Send + Sync + 'static,
    ) -> Self
    where
        P: Any + Send + Sync,
    {
        let relationship = RelationshipRegistration::many_to_one::<E, P>(referencing_keys)
            .attach::<E, P, _>(property, attach);
        self.relationship(relationship)
    }

    /// Validates the mapping and freezes it.
    ///
    /// # Errors
    ///
    /// Returns an error when the table name is empty, no property is mapped,
    /// property names repeat, or a relationship refers to unknown properties.
    pub fn freeze(self) -> Result<Arc<EntityRegistration>> {
        let entity_name = short_type_name::<E>();

        if self.table_name.trim().is_empty() {
            return Err(Error::invalid_argument("table_name", "must not be empty"));
        }
        if self.properties.is_empty() {
            return Err(Error::configuration(entity_name, "no properties are mapped"));
        }

        let mut names = HashSet::new();
        for property in &self.properties {
            if property.name.is_empty() || property.column_name.is_empty() {
                return Err(Error::invalid_argument(
                    "property",
                    format!("{entity_name} has a property with an empty name or column"),
                ));
            }
            if !names.insert(property.name.as_str()) {
                return Err(Error::configuration(
                    entity_name,
                    format!("property `{}` is mapped more than once", property.name),
                ));
            }
        }

        for relationship in &self.relationships {
            validate_relationship::<E>(relationship, &names)?;
        }

        let mut properties = self.properties;
        for (index, property) in properties.iter_mut().enumerate() {
            property.declared_order = index;
        }

        let mut key_order: Vec<usize> = properties
            .iter()
            .enumerate()
            .filter(|(_, property)| property.primary_key)
            .map(|(index, _)| index)
            .collect();
        key_order.sort_by_key(|index| {
            let property = &properties[*index];
            (property.column_order.unwrap_or(i32::MAX), property.declared_order)
        });

        tracing::debug!(
            entity = entity_name,
            table = %self.table_name,
            properties = properties.len(),
            relationships = self.relationships.len(),
            "froze entity registration"
        );

        Ok(Arc::new(EntityRegistration {
            entity_type: TypeId::of::<E>(),
            entity_name,
            table_name: self.table_name,
            schema_name: self.schema_name,
            database_name: self.database_name,
            properties,
            key_order,
            relationships: self.relationships,
            instantiate: instantiate::<E>,
        }))
    }
}

fn validate_relationship<E: Any>(
    relationship: &RelationshipRegistration, names: &HashSet<&str>,
) -> Result<()> {
    let entity_name = short_type_name::<E>();

    if relationship.owner_type != TypeId::of::<E>() {
        return Err(Error::configuration(
            entity_name,
            format!("relationship to {} is declared for another entity", relationship.related_name),
        ));
    }
    if relationship.referencing_keys.is_empty() {
        return Err(Error::configuration(
            entity_name,
            format!("relationship to {} has no referencing keys", relationship.related_name),
        ));
    }

    // keys living on this entity can be checked now, the others at join time
    let local_keys = match relationship.kind {
        RelationshipKind::ManyToOne => &relationship.referencing_keys,
        RelationshipKind::OneToMany => &relationship.referenced_keys,
    };
    if let Some(missing) = local_keys.iter().find(|key| !names.contains(key.as_str())) {
        return Err(Error::configuration(
            entity_name,
            format!(
                "relationship to {} refers to unknown property `{missing}`",
                relationship.related_name
            ),
        ));
    }
    Ok(())
}

fn instantiate<E: Entity>(registration: &EntityRegistration, fields: &[Field]) -> Result<EntityInstance> {
    let mut entity = E::default();
    for field in fields {
        if let Some(property) = registration.property(&field.name) {
            property.set_value(&mut entity, field.value.clone()).map_err(|err| {
                Error::conversion(format!(
                    "{}.{}: {err}",
                    registration.entity_name,
                    property.name()
                ))
            })?;
        }
    }
    Ok(EntityInstance::new(entity))
}

/// Frozen entity metadata.
#[derive(Debug)]
pub struct EntityRegistration {
    entity_type: TypeId,
    entity_name: &'static str,
    table_name: String,
    schema_name: Option<String>,
    database_name: Option<String>,
    properties: Vec<PropertyRegistration>,
    key_order: Vec<usize>,
    relationships: Vec<RelationshipRegistration>,
    instantiate: fn(&Self, &[Field]) -> Result<EntityInstance>,
}

impl EntityRegistration {
    #[must_use]
    pub const fn entity_type(&self) -> TypeId {
        self.entity_type
    }

    #[must_use]
    pub const fn entity_name(&self) -> &'static str {
        self.entity_name
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[must_use]
    pub fn schema_name(&self) -> Option<&str> {
        self.schema_name.as_deref()
    }

    #[must_use]
    pub fn database_name(&self) -> Option<&str> {
        self.database_name.as_deref()
    }

    /// All properties in declaration order.
    #[must_use]
    pub fn properties(&self) -> &[PropertyRegistration] {
        &self.properties
    }

    /// Looks a property up by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyRegistration> {
        self.properties.iter().find(|property| property.name == name)
    }

    /// Primary key properties ordered by column order, then declaration order.
    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyRegistration> {
        self.key_order.iter().map(|index| &self.properties[*index])
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.key_order.len()
    }

    #[must_use]
    pub fn relationships(&self) -> &[RelationshipRegistration] {
        &self.relationships
    }

    /// Relationship descriptors pointing at `related_type`.
    pub fn relationships_to(
        &self, related_type: TypeId,
    ) -> impl Iterator<Item = &RelationshipRegistration> {
        self.relationships.iter().filter(move |relationship| relationship.related_type == related_type)
    }

    /// Creates an instance from the named fields of a row segment. Unknown
    /// fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error when a field value cannot be converted.
    pub fn instantiate(&self, fields: &[Field]) -> Result<EntityInstance> {
        (self.instantiate)(self, fields)
    }
}

type ReadFn = fn(&(dyn Any + Send + Sync), &mut dyn FnMut(&dyn Any));
type WriteFn = fn(&(dyn Any + Send + Sync), &mut dyn FnMut(&mut dyn Any));

/// Type-erased [`Shared`] entity handle.
///
/// Used as the element type of a joined row so that any number of entities
/// can participate without one generic type per join arity.
#[derive(Clone)]
pub struct EntityInstance {
    entity_type: TypeId,
    handle: Arc<dyn Any + Send + Sync>,
    read: ReadFn,
    write: WriteFn,
}

impl EntityInstance {
    /// Wraps an owned entity.
    #[must_use]
    pub fn new<E: Any + Send + Sync>(entity: E) -> Self {
        Self::from_shared(shared(entity))
    }

    /// Wraps an existing shared handle without copying the entity.
    #[must_use]
    pub fn from_shared<E: Any + Send + Sync>(entity: Shared<E>) -> Self {
        Self {
            entity_type: TypeId::of::<E>(),
            handle: entity,
            read: read_locked::<E>,
            write: write_locked::<E>,
        }
    }

    #[must_use]
    pub const fn entity_type(&self) -> TypeId {
        self.entity_type
    }

    /// Recovers the typed handle.
    #[must_use]
    pub fn downcast<E: Any + Send + Sync>(&self) -> Option<Shared<E>> {
        Arc::clone(&self.handle).downcast::<RwLock<E>>().ok()
    }

    /// Returns `true` when both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }

    /// Address of the instance, stable for its lifetime.
    #[must_use]
    pub fn address(&self) -> usize {
        Arc::as_ptr(&self.handle).cast::<()>() as usize
    }

    /// Runs `f` with shared access to the entity (`&E` as `&dyn Any`).
    pub fn with_entity<R>(&self, f: impl FnOnce(&dyn Any) -> R) -> R {
        let mut f = Some(f);
        let mut out = None;
        (self.read)(self.handle.as_ref(), &mut |entity: &dyn Any| {
            if let Some(f) = f.take() {
                out = Some(f(entity));
            }
        });
        out.unwrap_or_else(|| unreachable!("entity handle always matches its reader"))
    }

    /// Runs `f` with exclusive access to the entity (`&mut E` as `&mut dyn Any`).
    pub fn with_entity_mut<R>(&self, f: impl FnOnce(&mut dyn Any) -> R) -> R {
        let mut f = Some(f);
        let mut out = None;
        (self.write)(self.handle.as_ref(), &mut |entity: &mut dyn Any| {
            if let Some(f) = f.take() {
                out = Some(f(entity));
            }
        });
        out.unwrap_or_else(|| unreachable!("entity handle always matches its writer"))
    }
}

impl fmt::Debug for EntityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityInstance")
            .field("entity_type", &self.entity_type)
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

fn read_locked<E: Any + Send + Sync>(
    handle: &(dyn Any + Send + Sync), f: &mut dyn FnMut(&dyn Any),
) {
    if let Some(lock) = handle.downcast_ref::<RwLock<E>>() {
        let guard = lock.read();
        f(&*guard);
    }
}

fn write_locked<E: Any + Send + Sync>(
    handle: &(dyn Any + Send + Sync), f: &mut dyn FnMut(&mut dyn Any),
) {
    if let Some(lock) = handle.downcast_ref::<RwLock<E>>() {
        let mut guard = lock.write();
        f(&mut *guard);
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property;

    #[derive(Debug, Default)]
    struct Building {
        id: i32,
        name: String,
        workstations: Vec<Shared<Workstation>>,
    }

    #[derive(Debug, Default)]
    struct Workstation {
        id: i64,
        building_id: i32,
        building: Option<Shared<Building>>,
    }

    impl Entity for Building {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::new("Buildings")
                .property(property!(Building, id as "Id").primary_key().database_generated())
                .property(property!(Building, name as "Name"))
                .has_many::<Workstation>("Workstations", &["BuildingId"], |building: &mut Building, ws| {
                    building.workstations.push(ws);
                })
        }
    }

    impl Entity for Workstation {
        fn mapping() -> EntityMapping<Self> {
            EntityMapping::new("Workstations")
                .property(property!(Workstation, id as "Id").primary_key())
                .property(property!(Workstation, building_id as "BuildingId"))
                .belongs_to::<Building>("Building", &["BuildingId"], |ws: &mut Workstation, building| {
                    ws.building = Some(building);
                })
        }
    }

    #[test]
    fn freeze_orders_keys_and_flags() {
        let registration = Building::mapping().freeze().unwrap();
        assert_eq!(registration.entity_name(), "Building");
        assert_eq!(registration.table_name(), "Buildings");
        assert_eq!(registration.key_count(), 1);

        let id = registration.property("Id").unwrap();
        assert!(id.is_primary_key());
        assert!(id.is_database_generated());
        assert!(id.is_excluded_from_inserts());
        assert!(id.is_refreshed_on_inserts());
        assert!(id.is_integer());
        assert!(!registration.property("Name").unwrap().is_integer());
    }

    #[test]
    fn composite_keys_follow_column_order() {
        #[derive(Default)]
        struct Assignment {
            employee: i32,
            project: i32,
        }
        impl Entity for Assignment {
            fn mapping() -> EntityMapping<Self> {
                EntityMapping::new("Assignments")
                    .property(property!(Assignment, employee).primary_key().column_order(2))
                    .property(property!(Assignment, project).primary_key().column_order(1))
            }
        }

        let registration = Assignment::mapping().freeze().unwrap();
        let keys: Vec<&str> = registration.key_properties().map(PropertyRegistration::name).collect();
        assert_eq!(keys, ["project", "employee"]);
    }

    #[test]
    fn freeze_rejects_invalid_mappings() {
        let err = EntityMapping::<Building>::new("Buildings").freeze().unwrap_err();
        assert!(err.is_configuration());

        let err = EntityMapping::<Building>::new("Buildings")
            .property(property!(Building, id))
            .property(property!(Building, id))
            .freeze()
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));

        let err = EntityMapping::<Workstation>::new("Workstations")
            .property(property!(Workstation, id))
            .belongs_to::<Building>("Building", &["Missing"], |_, _| {})
            .freeze()
            .unwrap_err();
        assert!(err.to_string().contains("unknown property `Missing`"));

        let err = EntityMapping::<Building>::new(" ").property(property!(Building, id)).freeze();
        assert!(matches!(err, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn accessors_read_and_write() {
        let registration = Building::mapping().freeze().unwrap();
        let name = registration.property("Name").unwrap();

        let mut building = Building {
            id: 1,
            name: "HQ".to_string(),
            ..Building::default()
        };
        assert_eq!(name.get_value(&building), Some(Value::from("HQ")));

        name.set_value(&mut building, Value::from("Annex")).unwrap();
        assert_eq!(building.name, "Annex");

        let id = registration.property("Id").unwrap();
        id.set_value(&mut building, Value::BigInt(Some(42))).unwrap();
        assert_eq!(building.id, 42);

        let err = id.set_value(&mut building, Value::from("nope")).unwrap_err();
        assert!(matches!(err, Error::Conversion { .. }));

        let mut other = 5_u8;
        assert!(id.get_value(&other).is_none());
        id.set_value(&mut other, Value::Int(Some(1))).unwrap_err();
    }

    #[test]
    fn instance_handles() {
        let instance = EntityInstance::new(Building {
            id: 3,
            ..Building::default()
        });
        let typed = instance.downcast::<Building>().unwrap();
        assert_eq!(typed.read().id, 3);
        assert!(instance.downcast::<Workstation>().is_none());

        let same = EntityInstance::from_shared(typed);
        assert!(same.ptr_eq(&instance));

        instance.with_entity_mut(|entity| {
            entity.downcast_mut::<Building>().unwrap().name = "Depot".to_string();
        });
        let name = instance.with_entity(|entity| entity.downcast_ref::<Building>().unwrap().name.clone());
        assert_eq!(name, "Depot");
    }

    #[test]
    fn attach_relationships() {
        let building = Building::mapping().freeze().unwrap();
        let relationship = building.relationships_to(TypeId::of::<Workstation>()).next().unwrap();
        assert_eq!(relationship.kind(), RelationshipKind::OneToMany);
        assert_eq!(relationship.property(), Some("Workstations"));

        let parent = EntityInstance::new(Building::default());
        let child = EntityInstance::new(Workstation::default());
        parent.with_entity_mut(|owner| relationship.attach_to(owner, &child)).unwrap();

        let parent = parent.downcast::<Building>().unwrap();
        assert_eq!(parent.read().workstations.len(), 1);
    }
}

use std::any::TypeId;
use std::hash::{DefaultHasher, Hash, Hasher};

use crate::error::{Error, Result};
use crate::registration::{EntityInstance, EntityRegistration};
use crate::value::{KeyComponent, key_component};

/// Identity of an entity instance: its ordered primary-key values.
///
/// The hash is computed once, at construction. Entities without primary keys
/// are identified by the address of the instance.
#[derive(Debug, Clone)]
pub struct RelationshipEntityInstanceIdentity {
    entity_type: TypeId,
    keys: Vec<KeyComponent>,
    hash: u64,
}

impl RelationshipEntityInstanceIdentity {
    /// Identity of `instance`. Returns `None` when any key value is `NULL`.
    ///
    /// # Errors
    ///
    /// Returns an error when `instance` is not of the registered type or a
    /// key value cannot act as a key.
    pub fn of(registration: &EntityRegistration, instance: &EntityInstance) -> Result<Option<Self>> {
        if instance.entity_type() != registration.entity_type() {
            return Err(Error::invalid_argument(
                "instance",
                format!("expected an instance of {}", registration.entity_name()),
            ));
        }

        if registration.key_count() == 0 {
            return Ok(Some(Self::new(
                registration.entity_type(),
                vec![KeyComponent::Instance(instance.address())],
            )));
        }

        let values = instance.with_entity(|entity| {
            registration.key_properties().map(|key| key.get_value(entity)).collect::<Vec<_>>()
        });

        let mut keys = Vec::with_capacity(values.len());
        for value in values {
            let value = value.ok_or_else(|| {
                Error::invalid_argument("instance", "key property cannot be read")
            })?;
            match key_component(&value)? {
                Some(component) => keys.push(component),
                None => return Ok(None),
            }
        }
        Ok(Some(Self::new(registration.entity_type(), keys)))
    }

    /// Identity from already extracted key components.
    #[must_use]
    pub fn new(entity_type: TypeId, keys: Vec<KeyComponent>) -> Self {
        let hash = rotating_hash(&keys);
        Self {
            entity_type,
            keys,
            hash,
        }
    }

    #[must_use]
    pub fn keys(&self) -> &[KeyComponent] {
        &self.keys
    }
}

fn rotating_hash(keys: &[KeyComponent]) -> u64 {
    keys.iter().fold(0_u64, |hash, key| {
        let mut hasher = DefaultHasher::new();
        hasher.write(&key.bytes());
        hash.rotate_left(4) ^ hasher.finish()
    })
}

impl PartialEq for RelationshipEntityInstanceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.entity_type == other.entity_type && self.keys == other.keys
    }
}

impl Eq for RelationshipEntityInstanceIdentity {}

impl Hash for RelationshipEntityInstanceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

//! Turns flat joined rows into a deduplicated, linked object graph.
//!
//! Every row holds one optional instance per participant, in join order. Each
//! row is first registered (instances already seen are swapped for the
//! first-seen instance with the same identity) and then bound (related
//! instances are attached to each other through their relationship
//! descriptors).

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::identity::RelationshipEntityInstanceIdentity;
use crate::registration::{EntityInstance, EntityRegistration, RelationshipRegistration};

/// First-seen instances of one entity type, by identity.
#[derive(Debug, Default)]
pub struct EntityInstanceContainer {
    instances: HashMap<RelationshipEntityInstanceIdentity, EntityInstance>,
}

impl EntityInstanceContainer {
    /// Returns the instance already known for `identity`, or records
    /// `instance` as its first occurrence. The flag is `true` for newly
    /// recorded instances.
    pub fn get_or_add(
        &mut self, identity: RelationshipEntityInstanceIdentity, instance: EntityInstance,
    ) -> (EntityInstance, bool) {
        match self.instances.get(&identity) {
            Some(existing) => (existing.clone(), false),
            None => {
                self.instances.insert(identity, instance.clone());
                (instance, true)
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Relationship entity instance builder for one query execution.
pub struct RelationshipEntityInstanceBuilder {
    participants: Vec<Arc<EntityRegistration>>,
    containers: Vec<EntityInstanceContainer>,
    slot_container: Vec<usize>,
    plan: Vec<Vec<Option<RelationshipRegistration>>>,
    scratch: Vec<(Option<EntityInstance>, bool)>,
    rows: usize,
    roots: usize,
}

impl RelationshipEntityInstanceBuilder {
    /// Prepares a builder for rows holding one instance per participant, root
    /// first.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when there are no participants or two
    /// entities are related through more than one navigation property.
    pub fn new(participants: Vec<Arc<EntityRegistration>>) -> Result<Self> {
        if participants.is_empty() {
            return Err(Error::invalid_argument("participants", "at least the root entity is required"));
        }

        let mut types: Vec<TypeId> = Vec::new();
        let slot_container = participants
            .iter()
            .map(|registration| {
                let entity_type = registration.entity_type();
                types.iter().position(|t| *t == entity_type).unwrap_or_else(|| {
                    types.push(entity_type);
                    types.len() - 1
                })
            })
            .collect();
        let containers = types.iter().map(|_| EntityInstanceContainer::default()).collect();

        let mut plan = Vec::with_capacity(participants.len());
        for main in &participants {
            let mut attachments = Vec::with_capacity(participants.len());
            for other in &participants {
                attachments.push(attachment(main, other)?);
            }
            plan.push(attachments);
        }

        Ok(Self {
            scratch: Vec::with_capacity(participants.len()),
            participants,
            containers,
            slot_container,
            plan,
            rows: 0,
            roots: 0,
        })
    }

    /// Registers and binds one row. Returns the root instance when it has not
    /// been returned before.
    ///
    /// # Errors
    ///
    /// Returns an error when the row does not match the participants, the
    /// root instance is missing, or an instance cannot be attached.
    pub fn register_row(&mut self, row: Vec<Option<EntityInstance>>) -> Result<Option<EntityInstance>> {
        if row.len() != self.participants.len() {
            return Err(Error::invalid_argument(
                "row",
                format!("expected {} instances, got {}", self.participants.len(), row.len()),
            ));
        }
        if row[0].is_none() {
            return Err(Error::invalid_argument("row", "the root instance is missing"));
        }
        self.rows += 1;

        self.scratch.clear();
        for (slot, instance) in row.into_iter().enumerate() {
            let registered = match instance {
                None => (None, true),
                Some(instance) => {
                    let registration = &self.participants[slot];
                    match RelationshipEntityInstanceIdentity::of(registration, &instance)? {
                        None => (Some(instance), true),
                        Some(identity) => {
                            let container = &mut self.containers[self.slot_container[slot]];
                            let (instance, added) = container.get_or_add(identity, instance);
                            (Some(instance), added)
                        }
                    }
                }
            };
            self.scratch.push(registered);
        }

        for i in 0..self.scratch.len() {
            for j in (i + 1)..self.scratch.len() {
                if self.scratch[i].1 || self.scratch[j].1 {
                    self.attach(i, j)?;
                    self.attach(j, i)?;
                }
            }
        }

        let (root, is_new) = &self.scratch[0];
        if *is_new {
            self.roots += 1;
            Ok(root.clone())
        } else {
            Ok(None)
        }
    }

    /// Attaches the instance in slot `other` to the one in slot `main`.
    fn attach(&self, main: usize, other: usize) -> Result<()> {
        let Some(relationship) = &self.plan[main][other] else {
            return Ok(());
        };
        let (Some(owner), Some(related)) = (&self.scratch[main].0, &self.scratch[other].0) else {
            return Ok(());
        };
        owner.with_entity_mut(|entity| relationship.attach_to(entity, related))
    }

    /// Number of rows registered so far.
    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.rows
    }

    /// Number of distinct roots returned so far.
    #[must_use]
    pub const fn root_count(&self) -> usize {
        self.roots
    }

    /// Container of distinct instances for the participant in `slot`.
    #[must_use]
    pub fn container(&self, slot: usize) -> Option<&EntityInstanceContainer> {
        self.slot_container.get(slot).map(|index| &self.containers[*index])
    }

    /// Buffered consumption: materializes every row and returns the distinct
    /// roots in first-seen order.
    ///
    /// # Errors
    ///
    /// Propagates the first row error.
    pub fn materialize<I>(mut self, rows: I) -> Result<Vec<EntityInstance>>
    where
        I: IntoIterator<Item = Vec<Option<EntityInstance>>>,
    {
        let mut roots = Vec::new();
        for row in rows {
            if let Some(root) = self.register_row(row)? {
                roots.push(root);
            }
        }
        self.log_summary();
        Ok(roots)
    }

    /// Streaming consumption: yields each distinct root as soon as its first
    /// row is seen. Instances keep being completed in place while later rows
    /// are consumed.
    pub fn stream<I>(self, rows: I) -> MaterializedRoots<I::IntoIter>
    where
        I: IntoIterator<Item = Result<Vec<Option<EntityInstance>>>>,
    {
        MaterializedRoots {
            builder: self,
            rows: rows.into_iter(),
            failed: false,
        }
    }

    fn log_summary(&self) {
        let root = self.participants[0].entity_name();
        tracing::debug!(entity = root, rows = self.rows, roots = self.roots, "rows materialized");
    }
}

/// Iterator returned by [`RelationshipEntityInstanceBuilder::stream`].
pub struct MaterializedRoots<I> {
    builder: RelationshipEntityInstanceBuilder,
    rows: I,
    failed: bool,
}

impl<I> Iterator for MaterializedRoots<I>
where
    I: Iterator<Item = Result<Vec<Option<EntityInstance>>>>,
{
    type Item = Result<EntityInstance>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let Some(row) = self.rows.next() else {
                self.builder.log_summary();
                return None;
            };
            match row.and_then(|row| self.builder.register_row(row)) {
                Ok(Some(root)) => return Some(Ok(root)),
                Ok(None) => {}
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// The single descriptor on `main` that stores instances of `other`.
fn attachment(
    main: &EntityRegistration, other: &EntityRegistration,
) -> Result<Option<RelationshipRegistration>> {
    if main.entity_type() == other.entity_type() {
        return Ok(None);
    }
    let mut candidates = main.relationships_to(other.entity_type()).filter(|r| r.has_property());
    let Some(relationship) = candidates.next() else {
        return Ok(None);
    };
    if let Some(second) = candidates.next() {
        return Err(Error::configuration(
            main.entity_name(),
            format!(
                "ambiguous relationship with {}: both `{}` and `{}` qualify",
                other.entity_name(),
                relationship.property().unwrap_or_default(),
                second.property().unwrap_or_default()
            ),
        ));
    }
    Ok(Some(relationship.clone()))
}

//! Multi-entity statements: relationship discovery, FROM/ON composition and
//! split-on columns for the row mapper.

use std::fmt;
use std::sync::Arc;

use sea_query::Value;

use crate::builder::GenericStatementSqlBuilder;
use crate::clause::{Clause, ClauseScope};
use crate::error::{Error, Result};
use crate::registration::{EntityRegistration, RelationshipKind, RelationshipRegistration};

/// Upper bound on the number of entities taking part in one statement.
pub const DEFAULT_MAX_JOINS: usize = 16;

/// Join types supported by relationship queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

impl JoinKind {
    const fn keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::LeftOuter => "LEFT OUTER JOIN",
        }
    }
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One entity taking part in a multi-entity statement.
///
/// The root entity is represented the same way; it is simply never joined.
#[derive(Debug, Clone)]
pub struct SqlStatementJoin {
    builder: Arc<GenericStatementSqlBuilder>,
    alias: String,
    requested_kind: Option<JoinKind>,
    kind: JoinKind,
    where_clause: Option<Clause>,
    order_clause: Option<Clause>,
    column_pairs: Vec<(String, String)>,
}

impl SqlStatementJoin {
    /// Participant known by its table name, with the join kind inferred from
    /// the relationship.
    #[must_use]
    pub fn new(builder: Arc<GenericStatementSqlBuilder>) -> Self {
        let alias = builder.registration().table_name().to_string();
        Self {
            builder,
            alias,
            requested_kind: None,
            kind: JoinKind::LeftOuter,
            where_clause: None,
            order_clause: None,
            column_pairs: Vec::new(),
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Forces the join kind instead of inferring it.
    #[must_use]
    pub const fn kind(mut self, kind: JoinKind) -> Self {
        self.requested_kind = Some(kind);
        self
    }

    /// Extra condition, resolved against this participant.
    #[must_use]
    pub fn where_clause(mut self, clause: impl Into<Clause>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    /// Extra sort keys, resolved against this participant.
    #[must_use]
    pub fn order_clause(mut self, clause: impl Into<Clause>) -> Self {
        self.order_clause = Some(clause.into());
        self
    }

    #[must_use]
    pub const fn builder(&self) -> &Arc<GenericStatementSqlBuilder> {
        &self.builder
    }

    #[must_use]
    pub fn alias_name(&self) -> &str {
        &self.alias
    }

    /// Join kind in effect once the statement is constructed.
    #[must_use]
    pub const fn join_kind(&self) -> JoinKind {
        self.kind
    }

    /// Resolved `(referencing column, referenced column)` pairs, qualified by
    /// their aliases.
    #[must_use]
    pub fn column_pairs(&self) -> &[(String, String)] {
        &self.column_pairs
    }

    fn registration(&self) -> &EntityRegistration {
        self.builder.registration()
    }
}

/// Parent/child link between two participants, by participant index.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Link {
    parent: usize,
    child: usize,
    referencing: Vec<String>,
    referenced: Vec<String>,
}

/// FROM, SELECT and split-on text for a root entity and its joined entities.
#[derive(Debug, Clone)]
pub struct JoinedStatement {
    participants: Vec<SqlStatementJoin>,
    from_clause: String,
    select_clause: String,
    split_on: Vec<String>,
}

impl JoinedStatement {
    /// Places `root` first, then each join in order, discovering how every
    /// new participant relates to the ones already placed.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a relationship is missing or
    /// ambiguous, key counts differ, an entity is joined twice, or more than
    /// `max_joins` entities take part.
    pub fn construct(
        root: SqlStatementJoin, joins: Vec<SqlStatementJoin>, max_joins: usize,
    ) -> Result<Self> {
        let root_name = root.registration().entity_name();
        if joins.len() + 1 > max_joins {
            return Err(Error::configuration(
                root_name,
                format!("{} entities joined, at most {max_joins} are supported", joins.len() + 1),
            ));
        }

        let mut from_clause = root.builder.get_table_name(Some(&root.alias))?;
        let mut participants = vec![root];

        for mut join in joins {
            let index = participants.len();
            check_unique(&participants, &join)?;

            let link = discover(&participants, &join, index)?;
            let (parent, child) = if link.parent == index {
                (&join, &participants[link.child])
            } else {
                (&participants[link.parent], &join)
            };
            let column_pairs = column_pairs(&link, parent, child)?;

            let kind = join.requested_kind.unwrap_or_else(|| {
                if link.parent == index && inner_join_is_safe(&participants[link.child], &link) {
                    JoinKind::Inner
                } else {
                    JoinKind::LeftOuter
                }
            });

            let on = column_pairs
                .iter()
                .map(|(referencing, referenced)| format!("{referencing}={referenced}"))
                .collect::<Vec<_>>()
                .join(" AND ");
            from_clause.push_str(&format!(
                " {} {} ON {on}",
                kind.keyword(),
                join.builder.get_table_name(Some(&join.alias))?
            ));

            join.kind = kind;
            join.column_pairs = column_pairs;
            participants.push(join);
        }

        let select_clause = participants
            .iter()
            .map(|p| p.builder.construct_column_enumeration_for_select(Some(&p.alias)))
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        let split_on = participants
            .iter()
            .skip(1)
            .map(|p| {
                p.registration()
                    .properties()
                    .first()
                    .map(|property| property.name().to_string())
                    .ok_or_else(|| Error::configuration(p.registration().entity_name(), "no properties are mapped"))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            entity = root_name,
            participants = participants.len(),
            from = %from_clause,
            "joined statement constructed"
        );

        Ok(Self {
            participants,
            from_clause,
            select_clause,
            split_on,
        })
    }

    #[must_use]
    pub fn participants(&self) -> &[SqlStatementJoin] {
        &self.participants
    }

    #[must_use]
    pub fn from_clause(&self) -> &str {
        &self.from_clause
    }

    #[must_use]
    pub fn select_clause(&self) -> &str {
        &self.select_clause
    }

    /// Split-on columns, one per joined (non-root) entity.
    #[must_use]
    pub fn split_on_columns(&self) -> &[String] {
        &self.split_on
    }

    /// Split-on columns as the comma separated list row mappers expect.
    #[must_use]
    pub fn split_on(&self) -> String {
        self.split_on.join(",")
    }

    #[must_use]
    pub fn root_alias(&self) -> &str {
        &self.participants[0].alias
    }

    /// Aggregates the WHERE and ORDER BY clauses of every participant, each
    /// resolved against its own alias.
    pub(crate) fn render_clauses(&self) -> Result<RenderedClauses> {
        let mut conditions = Vec::new();
        let mut orders = Vec::new();
        let mut params = Vec::new();

        for (index, participant) in self.participants.iter().enumerate() {
            let scope = self.scope(index);
            if let Some(clause) = &participant.where_clause {
                let rendered = clause.render(&scope, &format!("w{index}_"))?;
                if !rendered.sql.trim().is_empty() {
                    conditions.push(rendered.sql);
                    params.extend(rendered.params);
                }
            }
            if let Some(clause) = &participant.order_clause {
                let rendered = clause.render(&scope, &format!("o{index}_"))?;
                if !rendered.sql.trim().is_empty() {
                    orders.push(rendered.sql);
                    params.extend(rendered.params);
                }
            }
        }

        let where_clause = match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => Some(conditions.iter().map(|c| format!("({c})")).collect::<Vec<_>>().join(" AND ")),
        };
        let order_clause = if orders.is_empty() { None } else { Some(orders.join(", ")) };

        Ok(RenderedClauses {
            where_clause,
            order_clause,
            params,
        })
    }

    fn scope(&self, current: usize) -> ClauseScope<'_> {
        let entries =
            self.participants.iter().map(|p| (Some(p.alias.as_str()), p.builder.as_ref())).collect();
        ClauseScope::joined(entries, current)
    }
}

/// Aggregated clauses of a [`JoinedStatement`].
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RenderedClauses {
    pub where_clause: Option<String>,
    pub order_clause: Option<String>,
    pub params: Vec<(String, Value)>,
}

fn check_unique(placed: &[SqlStatementJoin], join: &SqlStatementJoin) -> Result<()> {
    let registration = join.registration();
    if join.alias.trim().is_empty() {
        return Err(Error::invalid_argument("alias", "must not be empty"));
    }
    if placed.iter().any(|p| p.registration().entity_type() == registration.entity_type()) {
        return Err(Error::configuration(
            registration.entity_name(),
            "the entity is already part of the statement",
        ));
    }
    if placed.iter().any(|p| p.alias == join.alias) {
        return Err(Error::invalid_argument(
            join.alias.as_str(),
            "alias is already used by another entity in the statement",
        ));
    }
    Ok(())
}

/// Finds the single relationship between `join` and any placed participant,
/// looking at the descriptors declared on both sides.
fn discover(placed: &[SqlStatementJoin], join: &SqlStatementJoin, index: usize) -> Result<Link> {
    let registration = join.registration();
    let mut links: Vec<Link> = Vec::new();

    for (position, participant) in placed.iter().enumerate() {
        let other = participant.registration();
        let declared_by_placed = other
            .relationships_to(registration.entity_type())
            .map(|relationship| (relationship, position, index));
        let declared_by_join = registration
            .relationships_to(other.entity_type())
            .map(|relationship| (relationship, index, position));

        for (relationship, owner, related) in declared_by_placed.chain(declared_by_join) {
            let link = link(relationship, owner, related, |position| {
                if position == index { registration } else { placed[position].registration() }
            });
            // mirror declarations describe the same link
            if !links.contains(&link) {
                links.push(link);
            }
        }
    }

    let name_of = |position: usize| {
        if position == index {
            registration.entity_name()
        } else {
            placed[position].registration().entity_name()
        }
    };

    match links.len() {
        0 => {
            let names = placed.iter().map(|p| p.registration().entity_name()).collect::<Vec<_>>();
            Err(Error::configuration(
                registration.entity_name(),
                format!("no relationship found with {}", names.join(", ")),
            ))
        }
        1 => Ok(links.remove(0)),
        _ => {
            let related = links
                .iter()
                .map(|link| if link.parent == index { name_of(link.child) } else { name_of(link.parent) })
                .collect::<Vec<_>>();
            Err(Error::configuration(
                registration.entity_name(),
                format!(
                    "ambiguous relationship between {} and {}",
                    registration.entity_name(),
                    related.join(" / ")
                ),
            ))
        }
    }
}

fn link<'a>(
    relationship: &RelationshipRegistration, owner: usize, related: usize,
    registration_of: impl Fn(usize) -> &'a EntityRegistration,
) -> Link {
    let (parent, child) = match relationship.kind() {
        RelationshipKind::OneToMany => (owner, related),
        RelationshipKind::ManyToOne => (related, owner),
    };
    let referenced = if relationship.referenced_keys().is_empty() {
        registration_of(parent).key_properties().map(|key| key.name().to_string()).collect()
    } else {
        relationship.referenced_keys().to_vec()
    };
    Link {
        parent,
        child,
        referencing: relationship.referencing_keys().to_vec(),
        referenced,
    }
}

fn column_pairs(
    link: &Link, parent: &SqlStatementJoin, child: &SqlStatementJoin,
) -> Result<Vec<(String, String)>> {
    let parent_name = parent.registration().entity_name();
    let child_name = child.registration().entity_name();

    if link.referenced.is_empty() {
        return Err(Error::configuration(
            parent_name,
            format!("no key is available to relate {child_name} to it"),
        ));
    }
    if link.referencing.len() != link.referenced.len() {
        return Err(Error::configuration(
            child_name,
            format!(
                "{} referencing keys do not match the {} keys of {parent_name}",
                link.referencing.len(),
                link.referenced.len()
            ),
        ));
    }

    link.referencing
        .iter()
        .zip(&link.referenced)
        .map(|(referencing, referenced)| {
            let referencing = child
                .builder
                .get_column_name(referencing, Some(&child.alias), false)
                .map_err(|_| unknown_key(child_name, referencing, parent_name))?;
            let referenced = parent
                .builder
                .get_column_name(referenced, Some(&parent.alias), false)
                .map_err(|_| unknown_key(parent_name, referenced, child_name))?;
            Ok((referencing, referenced))
        })
        .collect()
}

fn unknown_key(entity: &str, property: &str, related: &str) -> Error {
    Error::configuration(
        entity,
        format!("relationship with {related} refers to unknown property `{property}`"),
    )
}

/// A parent joined through a non-nullable foreign key always exists, unless
/// the child itself came from an outer join.
fn inner_join_is_safe(child: &SqlStatementJoin, link: &Link) -> bool {
    let registration = child.registration();
    let child_is_certain = link.child == 0 || child.kind == JoinKind::Inner;
    child_is_certain
        && link.referencing.iter().all(|key| {
            registration.property(key).is_some_and(|property| !property.is_nullable())
        })
}

//! Metadata-driven CRUD statements and relationship graph materialization.
//!
//! Entities describe their table, columns and relationships once through an
//! [`EntityMapping`]. Statement builders derive dialect-correct SQL from the
//! frozen [`EntityRegistration`] and cache what never changes. Joined rows
//! come back as a deduplicated graph of linked entities.
//!
//! # Quick Start
//!
//! ## Map Entities
//!
//! ```ignore
//! #[derive(Default)]
//! pub struct Building {
//!     pub id: i32,
//!     pub name: String,
//!     pub workstations: Vec<Shared<Workstation>>,
//! }
//!
//! impl Entity for Building {
//!     fn mapping() -> EntityMapping<Self> {
//!         EntityMapping::new("Buildings")
//!             .property(property!(Building, id as "Id").primary_key().database_generated())
//!             .property(property!(Building, name as "Name"))
//!             .has_many::<Workstation>("Workstations", &["BuildingId"], |b, w| b.workstations.push(w))
//!     }
//! }
//! ```
//!
//! ## Build Statements
//!
//! ```ignore
//! let mappings = Mappings::new(Dialect::MsSql);
//! let builder = mappings.builder(&mappings.registration::<Building>()?);
//!
//! // INSERT INTO [Buildings] ([Name]) VALUES (@Name); SELECT SCOPE_IDENTITY() AS [Id]
//! let sql = builder.construct_full_insert_statement()?;
//! ```
//!
//! ## Run Statements
//!
//! ```ignore
//! let session = Session::new(executor, Arc::new(mappings));
//!
//! let buildings = session
//!     .find::<Building>(
//!         StatementOptions::new()
//!             .include(JoinOptions::of::<Workstation>())
//!             .r#where(Filter::like("Name", "HQ%"))
//!             .order_by("{Name:TC}"),
//!     )
//!     .await?;
//! ```

mod builder;
mod clause;
mod config;
mod count;
mod delete;
mod dialect;
mod error;
mod filter;
mod identity;
mod insert;
mod join;
mod mapper;
mod mappings;
mod materialize;
mod options;
mod query;
mod registration;
mod select;
mod session;
mod update;
mod value;

pub use builder::GenericStatementSqlBuilder;
pub use clause::{Clause, OrderSpec};
pub use config::CrudConfig;
pub use dialect::{Dialect, DialectOptions};
pub use error::{Error, Result};
pub use filter::{Comparison, Filter, PropertyRef};
pub use identity::RelationshipEntityInstanceIdentity;
pub use join::{DEFAULT_MAX_JOINS, JoinKind, JoinedStatement, SqlStatementJoin};
pub use mapper::RowMapper;
pub use mappings::Mappings;
pub use materialize::{EntityInstanceContainer, MaterializedRoots, RelationshipEntityInstanceBuilder};
pub use options::{JoinOptions, StatementOptions};
pub use query::{ExecutionContext, Executor, FutureResult, Query, Transaction};
pub use registration::{
    Entity, EntityInstance, EntityMapping, EntityRegistration, PropertyAccessor, PropertyRegistration,
    RelationshipKind, RelationshipRegistration, Shared, shared,
};
pub use select::BatchSelect;
pub use session::{EntityStream, Session};
pub use value::{Field, KeyComponent, Row};

// Re-exported so callers can build parameter values and rows without
// depending on ``SeaQuery`` directly.
pub use sea_query::Value;

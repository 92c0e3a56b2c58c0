//! Statement execution on top of an [`Executor`].
//!
//! A [`Session`] builds statements through the shared [`Mappings`], binds
//! entity values as named parameters and turns the returned rows back into
//! entities. Running the SQL is left entirely to the executor.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use sea_query::Value;
use tracing::instrument;

use crate::builder::GenericStatementSqlBuilder;
use crate::clause::{Clause, ClauseScope, Rendered};
use crate::error::{Error, Result};
use crate::join::{JoinedStatement, SqlStatementJoin};
use crate::mapper::RowMapper;
use crate::mappings::Mappings;
use crate::materialize::RelationshipEntityInstanceBuilder;
use crate::options::StatementOptions;
use crate::query::{ExecutionContext, Executor, Query};
use crate::registration::{
    Entity, EntityInstance, EntityRegistration, PropertyRegistration, Shared, short_type_name,
};
use crate::select::BatchSelect;
use crate::value::Row;

/// Entities yielded one at a time by [`Session::find_stream`].
pub type EntityStream<E> = Box<dyn Iterator<Item = Result<Shared<E>>> + Send>;

/// Entry point for CRUD operations.
#[derive(Clone)]
pub struct Session {
    executor: Arc<dyn Executor>,
    mappings: Arc<Mappings>,
}

impl Session {
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, mappings: Arc<Mappings>) -> Self {
        Self { executor, mappings }
    }

    #[must_use]
    pub fn mappings(&self) -> &Mappings {
        &self.mappings
    }

    /// Loads the entity whose primary keys match the ones set on `keys`.
    ///
    /// # Errors
    ///
    /// Returns an error when the entity has no primary key, the statement
    /// fails or the row cannot be converted.
    #[instrument(skip_all)]
    pub async fn get<E: Entity>(&self, keys: &E, options: StatementOptions) -> Result<Option<Shared<E>>> {
        options.validate()?;
        let builder = self.builder::<E>(&options)?;
        let sql = builder.construct_full_single_select_statement()?;
        let registration = builder.registration();
        let query = bind_properties(self.query(sql, &options), keys, registration.key_properties())?;

        let rows = self.executor.query(query, self.context(&options)).await?;
        let mapper = RowMapper::single(Arc::clone(registration));
        rows.first().map(|row| typed::<E>(&root(mapper.map(row)?)?)).transpose()
    }

    /// Loads every matching entity. With joins, related entities are
    /// attached to their navigation properties and each root is returned
    /// once, in the order it was first read.
    ///
    /// # Errors
    ///
    /// Returns an error when the options are inconsistent, a relationship
    /// cannot be resolved, the statement fails or a row cannot be converted.
    #[instrument(skip_all)]
    pub async fn find<E: Entity>(&self, options: StatementOptions) -> Result<Vec<Shared<E>>> {
        let (plan, query) = self.select::<E>(&options)?;
        let rows = self.executor.query(query, self.context(&options)).await?;
        tracing::debug!(entity = short_type_name::<E>(), rows = rows.len(), "rows fetched");

        let roots = plan.materialize(&rows)?;
        roots.iter().map(typed::<E>).collect()
    }

    /// Like [`Session::find`], but asks the executor to stream and yields
    /// each root as soon as its first row is read. Related collections keep
    /// filling while the iterator is consumed.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement cannot be built or executed.
    #[instrument(skip_all)]
    pub async fn find_stream<E: Entity>(&self, options: StatementOptions) -> Result<EntityStream<E>> {
        let (plan, query) = self.select::<E>(&options)?;
        let context = ExecutionContext {
            force_stream: true,
            ..self.context(&options)
        };
        let rows = self.executor.query(query, context).await?;
        Ok(plan.stream::<E>(rows))
    }

    /// Counts the matching entities. With joins, distinct roots are counted.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement cannot be built or executed, or
    /// the result is not a count.
    #[instrument(skip_all)]
    pub async fn count<E: Entity>(&self, options: StatementOptions) -> Result<u64> {
        options.validate()?;
        let builder = self.builder::<E>(&options)?;

        let (sql, params) = if options.has_joins() {
            let statement = self.joined_statement(&builder, &options, false)?;
            let clauses = statement.render_clauses()?;
            let sql = builder.construct_full_count_statement(
                Some(statement.from_clause()),
                clauses.where_clause.as_deref(),
                true,
                Some(statement.root_alias()),
            )?;
            (sql, clauses.params)
        } else {
            let alias = options.alias.as_deref();
            let scope = ClauseScope::single(alias, &builder);
            let condition = render_clause(options.where_clause.as_ref(), &scope, "w0_")?;
            let sql = builder.construct_full_count_statement(None, Some(&condition.sql), false, alias)?;
            (sql, condition.params)
        };

        let query = bind_all(self.query(sql, &options), params);
        let rows = self.executor.query(query, self.context(&options)).await?;
        let field = rows
            .first()
            .and_then(|row| row.fields.first())
            .ok_or_else(|| Error::execution("the count statement returned no rows"))?;
        count_value(&field.value)
    }

    /// Inserts `entity` and copies the values generated by the database back
    /// onto it.
    ///
    /// # Errors
    ///
    /// Returns an error when generated values cannot be read back in the
    /// dialect, the statement fails or returns no row to refresh from.
    #[instrument(skip_all)]
    pub async fn insert<E: Entity>(&self, entity: &mut E, options: StatementOptions) -> Result<()> {
        options.validate()?;
        let builder = self.builder::<E>(&options)?;
        let sql = builder.construct_full_insert_statement()?;
        let registration = builder.registration();

        let query = bind_properties(self.query(sql, &options), &*entity, builder.insert_parameters())?;

        let refreshed = builder.refreshed_on_insert();
        let context = self.context(&options);
        if refreshed.is_empty() {
            self.executor.execute(query, context).await?;
            return Ok(());
        }

        let rows = self.executor.query(query, context).await?;
        let row = rows.first().ok_or_else(|| {
            Error::execution(format!("insert into {} returned no row", registration.table_name()))
        })?;
        refresh(entity, row, &refreshed)
    }

    /// Updates the row matching the keys of `entity`. Returns `false` when
    /// no row matched.
    ///
    /// # Errors
    ///
    /// Returns an error when the entity has no primary key or nothing to
    /// update, or the statement fails.
    #[instrument(skip_all)]
    pub async fn update<E: Entity>(&self, entity: &mut E, options: StatementOptions) -> Result<bool> {
        options.validate()?;
        let builder = self.builder::<E>(&options)?;
        let sql = builder.construct_full_single_update_statement()?;
        let registration = builder.registration();
        let query = bind_properties(
            self.query(sql, &options),
            &*entity,
            builder.update_properties().chain(registration.key_properties()),
        )?;

        let refreshed = builder.refreshed_on_update();
        let context = self.context(&options);
        if refreshed.is_empty() {
            let affected = self.executor.execute(query, context).await?;
            return Ok(affected > 0);
        }

        let rows = self.executor.query(query, context).await?;
        match rows.first() {
            Some(row) => refresh(entity, row, &refreshed).map(|()| true),
            None => Ok(false),
        }
    }

    /// Writes the updatable values of `values` to every row matching the
    /// WHERE clause of `options`. Returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error when nothing can be updated or the statement fails.
    #[instrument(skip_all)]
    pub async fn bulk_update<E: Entity>(&self, values: &E, options: StatementOptions) -> Result<u64> {
        options.validate()?;
        let builder = self.builder::<E>(&options)?;
        let condition =
            render_clause(options.where_clause.as_ref(), &ClauseScope::single(None, &builder), "w0_")?;
        let sql = builder.construct_full_batch_update_statement(Some(&condition.sql))?;

        let query = bind_properties(self.query(sql, &options), values, builder.update_properties())?;
        let query = bind_all(query, condition.params);
        Ok(self.executor.execute(query, self.context(&options)).await?)
    }

    /// Deletes the row matching the keys of `entity`. Returns `false` when no
    /// row matched.
    ///
    /// # Errors
    ///
    /// Returns an error when the entity has no primary key or the statement
    /// fails.
    #[instrument(skip_all)]
    pub async fn delete<E: Entity>(&self, entity: &E, options: StatementOptions) -> Result<bool> {
        options.validate()?;
        let builder = self.builder::<E>(&options)?;
        let sql = builder.construct_full_single_delete_statement()?;
        let query = bind_properties(self.query(sql, &options), entity, builder.registration().key_properties())?;

        let affected = self.executor.execute(query, self.context(&options)).await?;
        Ok(affected > 0)
    }

    /// Deletes every row matching the WHERE clause of `options`, or every
    /// row of the table without one. Returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    #[instrument(skip_all)]
    pub async fn bulk_delete<E: Entity>(&self, options: StatementOptions) -> Result<u64> {
        options.validate()?;
        let builder = self.builder::<E>(&options)?;
        let condition =
            render_clause(options.where_clause.as_ref(), &ClauseScope::single(None, &builder), "w0_")?;
        let sql = builder.construct_full_batch_delete_statement(Some(&condition.sql))?;

        let query = bind_all(self.query(sql, &options), condition.params);
        Ok(self.executor.execute(query, self.context(&options)).await?)
    }

    fn builder<E: Entity>(&self, options: &StatementOptions) -> Result<Arc<GenericStatementSqlBuilder>> {
        let registration = match &options.mapping {
            Some(mapping) if mapping.entity_type() != TypeId::of::<E>() => {
                return Err(Error::invalid_argument(
                    "mapping",
                    format!("{} cannot be used for {}", mapping.entity_name(), short_type_name::<E>()),
                ));
            }
            Some(mapping) => Arc::clone(mapping),
            None => self.mappings.registration::<E>()?,
        };
        Ok(self.mappings.builder(&registration))
    }

    fn context(&self, options: &StatementOptions) -> ExecutionContext {
        ExecutionContext {
            timeout: options.timeout.or_else(|| self.mappings.timeout()),
            transaction: options.transaction.clone(),
            force_stream: options.force_stream,
        }
    }

    /// Query carrying the caller's own parameters.
    fn query(&self, sql: String, options: &StatementOptions) -> Query {
        bind_all(Query::new(sql), options.parameters.iter().cloned())
    }

    fn select<E: Entity>(&self, options: &StatementOptions) -> Result<(SelectPlan, Query)> {
        options.validate()?;
        let builder = self.builder::<E>(options)?;

        if !options.has_joins() {
            let alias = options.alias.as_deref();
            let scope = ClauseScope::single(alias, &builder);
            let condition = render_clause(options.where_clause.as_ref(), &scope, "w0_")?;
            let order = render_clause(options.order_clause.as_ref(), &scope, "o0_")?;
            let columns = builder.construct_column_enumeration_for_select(alias)?;
            let from = builder.get_table_name(alias)?;

            let sql = builder.construct_full_batch_select_statement(&BatchSelect {
                select: Some(&columns),
                from: Some(&from),
                where_clause: Some(&condition.sql),
                order_clause: Some(&order.sql),
                skip: options.skip,
                limit: options.limit,
            })?;
            let query = bind_all(bind_all(self.query(sql, options), condition.params), order.params);
            let plan = SelectPlan {
                participants: vec![Arc::clone(builder.registration())],
                mapper: RowMapper::single(Arc::clone(builder.registration())),
            };
            return Ok((plan, query));
        }

        let statement = self.joined_statement(&builder, options, true)?;
        let clauses = statement.render_clauses()?;
        let sql = builder.construct_full_batch_select_statement(&BatchSelect {
            select: Some(statement.select_clause()),
            from: Some(statement.from_clause()),
            where_clause: clauses.where_clause.as_deref(),
            order_clause: clauses.order_clause.as_deref(),
            skip: options.skip,
            limit: options.limit,
        })?;
        let query = bind_all(self.query(sql, options), clauses.params);

        let participants: Vec<Arc<EntityRegistration>> =
            statement.participants().iter().map(|p| Arc::clone(p.builder().registration())).collect();
        let mapper = RowMapper::joined(participants.clone(), statement.split_on_columns().to_vec())?;
        Ok((SelectPlan { participants, mapper }, query))
    }

    fn joined_statement(
        &self, builder: &Arc<GenericStatementSqlBuilder>, options: &StatementOptions, ordered: bool,
    ) -> Result<JoinedStatement> {
        let mut root = SqlStatementJoin::new(Arc::clone(builder));
        if let Some(alias) = &options.alias {
            root = root.alias(alias.clone());
        }
        if let Some(clause) = &options.where_clause {
            root = root.where_clause(clause.clone());
        }
        if ordered && let Some(clause) = &options.order_clause {
            root = root.order_clause(clause.clone());
        }

        let mut joins = Vec::with_capacity(options.joins.len());
        for join in &options.joins {
            let registration = join.registration(&self.mappings)?;
            let mut participant = SqlStatementJoin::new(self.mappings.builder(&registration));
            if let Some(alias) = &join.alias {
                participant = participant.alias(alias.clone());
            }
            if let Some(kind) = join.kind {
                participant = participant.kind(kind);
            }
            if let Some(clause) = &join.where_clause {
                participant = participant.where_clause(clause.clone());
            }
            if ordered && let Some(clause) = &join.order_clause {
                participant = participant.order_clause(clause.clone());
            }
            joins.push(participant);
        }

        JoinedStatement::construct(root, joins, self.mappings.max_joins())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("mappings", &self.mappings).finish_non_exhaustive()
    }
}

/// How the rows of a SELECT become entities.
struct SelectPlan {
    participants: Vec<Arc<EntityRegistration>>,
    mapper: RowMapper,
}

impl SelectPlan {
    fn materialize(&self, rows: &[Row]) -> Result<Vec<EntityInstance>> {
        if self.participants.len() == 1 {
            return rows.iter().map(|row| root(self.mapper.map(row)?)).collect();
        }
        let builder = RelationshipEntityInstanceBuilder::new(self.participants.clone())?;
        let mapped = rows.iter().map(|row| self.mapper.map(row)).collect::<Result<Vec<_>>>()?;
        builder.materialize(mapped)
    }

    fn stream<E: Entity>(self, rows: Vec<Row>) -> EntityStream<E> {
        let Self { participants, mapper } = self;
        if participants.len() == 1 {
            return Box::new(
                rows.into_iter().map(move |row| mapper.map(&row).and_then(root).and_then(|i| typed::<E>(&i))),
            );
        }
        match RelationshipEntityInstanceBuilder::new(participants) {
            Ok(builder) => {
                let mapped = rows.into_iter().map(move |row| mapper.map(&row));
                Box::new(builder.stream(mapped).map(|root| root.and_then(|i| typed::<E>(&i))))
            }
            Err(err) => Box::new(std::iter::once(Err(err))),
        }
    }
}

fn render_clause(clause: Option<&Clause>, scope: &ClauseScope<'_>, stem: &str) -> Result<Rendered> {
    clause.map_or_else(|| Ok(Rendered::default()), |clause| clause.render(scope, stem))
}

fn bind_all(query: Query, params: impl IntoIterator<Item = (String, Value)>) -> Query {
    params.into_iter().fold(query, |query, (name, value)| query.bind(name, value))
}

/// Binds each property of `entity` under its property name.
fn bind_properties<'a, E: Entity>(
    mut query: Query, entity: &E, properties: impl IntoIterator<Item = &'a PropertyRegistration>,
) -> Result<Query> {
    for property in properties {
        let value = property.get_value(entity).ok_or_else(|| {
            Error::invalid_argument(property.name(), format!("cannot be read from {}", short_type_name::<E>()))
        })?;
        query = query.bind(property.name(), value);
    }
    Ok(query)
}

/// Copies values read back by an INSERT or UPDATE onto the entity.
fn refresh<E: Entity>(entity: &mut E, row: &Row, properties: &[&PropertyRegistration]) -> Result<()> {
    for property in properties {
        let value = row
            .get(property.name())
            .ok_or_else(|| Error::execution(format!("`{}` was not returned", property.name())))?;
        property.set_value(&mut *entity, value.clone())?;
    }
    Ok(())
}

fn root(instances: Vec<Option<EntityInstance>>) -> Result<EntityInstance> {
    instances.into_iter().next().flatten().ok_or_else(|| Error::conversion("the row holds no root entity"))
}

fn typed<E: Entity>(instance: &EntityInstance) -> Result<Shared<E>> {
    instance
        .downcast::<E>()
        .ok_or_else(|| Error::conversion(format!("materialized instance is not a {}", short_type_name::<E>())))
}

fn count_value(value: &Value) -> Result<u64> {
    let count = match value {
        Value::TinyInt(Some(n)) => i64::from(*n),
        Value::SmallInt(Some(n)) => i64::from(*n),
        Value::Int(Some(n)) => i64::from(*n),
        Value::BigInt(Some(n)) => *n,
        Value::TinyUnsigned(Some(n)) => return Ok(u64::from(*n)),
        Value::SmallUnsigned(Some(n)) => return Ok(u64::from(*n)),
        Value::Unsigned(Some(n)) => return Ok(u64::from(*n)),
        Value::BigUnsigned(Some(n)) => return Ok(*n),
        other => return Err(Error::conversion(format!("{other:?} is not a row count"))),
    };
    u64::try_from(count).map_err(|_| Error::conversion(format!("{count} is not a row count")))
}

//! Common test helpers shared across integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use omnia_crud::{
    Entity, EntityMapping, ExecutionContext, Executor, FutureResult, Query, Row, Shared, property,
};
use parking_lot::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Routes `debug!` statement logs to the test output. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = Registry::default().with(EnvFilter::new("debug")).with(fmt::layer().with_test_writer()).try_init();
}

// Common test entities used across multiple test files

#[derive(Debug, Default)]
pub struct Building {
    pub id: i32,
    pub name: String,
    pub workstations: Vec<Shared<Workstation>>,
}

impl Entity for Building {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new("Buildings")
            .property(property!(Building, id as "Id").primary_key().database_generated())
            .property(property!(Building, name as "Name"))
            .has_many::<Workstation>("Workstations", &["BuildingId"], |building: &mut Building, workstation| {
                building.workstations.push(workstation);
            })
    }
}

#[derive(Debug, Default)]
pub struct Workstation {
    pub id: i64,
    pub name: String,
    pub building_id: i32,
    pub building: Option<Shared<Building>>,
    pub employees: Vec<Shared<Employee>>,
}

impl Entity for Workstation {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new("Workstations")
            .property(property!(Workstation, id as "WorkstationId").primary_key())
            .property(property!(Workstation, name as "Name"))
            .property(property!(Workstation, building_id as "BuildingId"))
            .belongs_to::<Building>("Building", &["BuildingId"], |workstation: &mut Workstation, building| {
                workstation.building = Some(building);
            })
            .has_many::<Employee>("Employees", &["WorkstationId"], |workstation, employee| {
                workstation.employees.push(employee);
            })
    }
}

/// Composite key with a generated component and a computed column.
#[derive(Debug, Default)]
pub struct Employee {
    pub user_id: i32,
    pub employee_id: String,
    pub last_name: String,
    pub full_name: String,
    pub workstation_id: i64,
    pub workstation: Option<Shared<Workstation>>,
}

impl Entity for Employee {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new("Employees")
            .property(property!(Employee, user_id as "UserId").primary_key().database_generated().column_order(1))
            .property(property!(Employee, employee_id as "EmployeeId").primary_key().column_order(2))
            .property(property!(Employee, last_name as "LastName"))
            .property(
                property!(Employee, full_name as "FullName")
                    .exclude_from_inserts()
                    .exclude_from_updates()
                    .refresh_on_inserts(),
            )
            .property(property!(Employee, workstation_id as "WorkstationId").nullable())
            .belongs_to::<Workstation>("Workstation", &["WorkstationId"], |employee: &mut Employee, workstation| {
                employee.workstation = Some(workstation);
            })
    }
}

/// Table without a primary key.
#[derive(Debug, Default)]
pub struct AuditEntry {
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl Entity for AuditEntry {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::new("AuditEntries")
            .schema("audit")
            .property(property!(AuditEntry, message as "Message"))
            .property(property!(AuditEntry, occurred_at as "OccurredAt"))
    }
}

/// Executor recording every statement and answering queries from a queue.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(Query, ExecutionContext)>>,
    responses: Mutex<VecDeque<Vec<Row>>>,
    affected: u64,
}

impl RecordingExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Affected row count reported by `execute`.
    #[must_use]
    pub const fn affecting(mut self, affected: u64) -> Self {
        self.affected = affected;
        self
    }

    /// Queues the rows returned by the next `query` call.
    #[must_use]
    pub fn respond(self, rows: Vec<Row>) -> Self {
        self.responses.lock().push_back(rows);
        self
    }

    #[must_use]
    pub fn queries(&self) -> Vec<Query> {
        self.calls.lock().iter().map(|(query, _)| query.clone()).collect()
    }

    #[must_use]
    pub fn contexts(&self) -> Vec<ExecutionContext> {
        self.calls.lock().iter().map(|(_, context)| context.clone()).collect()
    }
}

impl Executor for RecordingExecutor {
    fn execute(&self, query: Query, context: ExecutionContext) -> FutureResult<u64> {
        self.calls.lock().push((query, context));
        let affected = self.affected;
        Box::pin(async move { Ok(affected) })
    }

    fn query(&self, query: Query, context: ExecutionContext) -> FutureResult<Vec<Row>> {
        self.calls.lock().push((query, context));
        let rows = self.responses.lock().pop_front().unwrap_or_default();
        Box::pin(async move { Ok(rows) })
    }
}

/// Normalize SQL by collapsing whitespace.
fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonicalize SQL for comparison by removing identifier delimiters and normalizing whitespace.
/// Preserves delimiters inside string literals.
fn canonicalize_sql(sql: &str) -> String {
    let mut cleaned = String::with_capacity(sql.len());
    let mut in_single_quote = false;

    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_single_quote = !in_single_quote;
                cleaned.push(ch);
            }
            '"' | '[' | ']' | '`' if !in_single_quote => {
                // Strip identifier delimiters so one expectation covers every dialect.
            }
            _ => cleaned.push(ch),
        }
    }

    normalize_sql(&cleaned)
}

/// Assert that SQL contains all expected fragments in order.
///
/// Identifier delimiters are stripped and whitespace normalized before the
/// fragments are searched for sequentially in the generated SQL.
#[allow(clippy::missing_panics_doc)]
pub fn assert_sql_contains(actual: &str, fragments: &[&str]) {
    let actual_canonical = canonicalize_sql(actual);
    let mut search_start = 0usize;

    for fragment in fragments {
        let fragment_canonical = canonicalize_sql(fragment);
        if fragment_canonical.is_empty() {
            continue;
        }

        if let Some(pos) = actual_canonical[search_start..].find(&fragment_canonical) {
            search_start += pos + fragment_canonical.len();
        } else {
            use std::io::Write;
            let mut stderr = std::io::stderr();
            writeln!(stderr, "*** fragment-canonical: {fragment_canonical}").unwrap();
            writeln!(stderr, "*** actual-canonical-sql: {actual_canonical}").unwrap();
            stderr.flush().unwrap();

            panic!(
                "expected SQL fragment `{fragment_canonical}` not found in `{actual_canonical}`"
            );
        }
    }
}

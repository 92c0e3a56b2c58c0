use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sea_query::Value;

use crate::value::Row;

/// Boxed future returned by an [`Executor`].
pub type FutureResult<T> = BoxFuture<'static, anyhow::Result<T>>;

/// SQL text with its named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub sql: String,
    /// Parameter names without the dialect prefix, with their values.
    pub params: Vec<(String, Value)>,
}

impl Query {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Adds a parameter. An existing parameter with the same name is replaced.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(existing, _)| *existing == name) {
            Some(param) => param.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    /// Looks a parameter up by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.iter().find(|(existing, _)| existing == name).map(|(_, value)| value)
    }
}

/// Opaque transaction handle owned by the executor.
#[derive(Clone)]
pub struct Transaction(Arc<dyn Any + Send + Sync>);

impl Transaction {
    pub fn new<T: Any + Send + Sync>(transaction: T) -> Self {
        Self(Arc::new(transaction))
    }

    #[must_use]
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transaction").finish_non_exhaustive()
    }
}

/// Execution settings passed through to the executor untouched.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub timeout: Option<Duration>,
    pub transaction: Option<Transaction>,
    pub force_stream: bool,
}

/// Data-access layer running statements against a data store.
///
/// Connection handling, parameter binding and retries belong to the
/// implementation.
pub trait Executor: Send + Sync {
    /// Runs a statement that returns no rows and reports the affected row
    /// count.
    fn execute(&self, query: Query, context: ExecutionContext) -> FutureResult<u64>;

    /// Runs a statement and returns its rows.
    fn query(&self, query: Query, context: ExecutionContext) -> FutureResult<Vec<Row>>;
}

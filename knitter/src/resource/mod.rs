//! Named side resources (connections and the like) owned by the
//! execution context for the lifetime of one render.

pub mod memory;

use thiserror::Error;

use crate::value::Table;

pub use memory::MemoryDatabase;

/// Errors reported by resources.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    #[error("resource '{0}' is closed")]
    Closed(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("{0}")]
    Other(String),
}

/// A handle supplied at render time and consumed by evaluators through the
/// execution context.
///
/// The context guarantees `close` is called exactly once per resource, on
/// every exit path of a render.
pub trait Resource: Send {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Query capability, if this resource is a connection.
    fn as_connection(&mut self) -> Option<&mut dyn Connection> {
        None
    }

    fn close(&mut self) -> Result<(), ResourceError>;
}

/// A resource that answers queries with tables.
pub trait Connection {
    fn query(&mut self, sql: &str) -> Result<Table, ResourceError>;
}

/// Borrowed access to a resource owned by the execution context.
///
/// Has no `close`. Closing goes through `Context::close_resource`, which
/// also forgets the handle.
pub struct ResourceHandle<'a> {
    inner: &'a mut (dyn Resource + 'static),
}

impl<'a> ResourceHandle<'a> {
    pub(crate) fn new(inner: &'a mut (dyn Resource + 'static)) -> Self {
        ResourceHandle { inner }
    }

    pub fn describe(&self) -> String {
        self.inner.describe()
    }

    pub fn as_connection(&mut self) -> Option<&mut dyn Connection> {
        self.inner.as_connection()
    }
}

/// Resources handed to a render, keyed by the name chunks refer to them by.
pub type Resources = Vec<(String, Box<dyn Resource>)>;

//! Connector trait seam and the owned value/row model
//!
//! The pool manages session lifecycle; the actual wire client sits behind
//! [`Connector`] so tests can script connections and other backends can
//! slot in without touching the pool.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ServerDescriptor;
use crate::error::Result;

/// A single database value, owned and serializable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,

    /// Boolean
    Bool(bool),

    /// Any integer width, widened to 64 bits
    Int(i64),

    /// Any float width, widened to 64 bits
    Float(f64),

    /// Character data
    Text(String),

    /// Raw bytes
    Bytes(Vec<u8>),
}

impl Value {
    /// Canonical, type-tagged rendering used for cache key derivation.
    ///
    /// The tag keeps `Int(1)` and `Text("1")` from colliding.
    pub fn canonical(&self) -> String {
        match self {
            Value::Null => "n:".to_string(),
            Value::Bool(b) => format!("b:{}", b),
            Value::Int(i) => format!("i:{}", i),
            Value::Float(x) => format!("f:{}", x),
            Value::Text(s) => format!("t:{}", s),
            Value::Bytes(b) => format!("x:{}", hex::encode(b)),
        }
    }

    /// True for [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// One result row with named columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Column names in select order
    pub columns: Vec<String>,
    /// Values aligned with `columns`
    pub values: Vec<Value>,
}

impl Row {
    /// Value of the named column, if the row has it
    pub fn get(&self, column: &str) -> Option<&Value> {
        let i = self.columns.iter().position(|c| c == column)?;
        self.values.get(i)
    }
}

/// Outcome of a liveness round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// The session answered
    Alive,

    /// The session is unusable; the reason feeds the reconnect log
    Dead(String),
}

/// Options applied while establishing one connection
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Handshake timeout
    pub connect_timeout: Duration,
    /// Ask for a keepalive session expected to outlive single requests
    pub persistent: bool,
    /// SQL executed once right after the session is up
    pub init_sql: Option<String>,
}

/// A live database session
pub trait Connection: Send {
    /// Liveness round trip (`SELECT 1` or equivalent)
    fn ping(&mut self) -> Liveness;

    /// Run a statement and return the number of rows affected
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a query and return every row, fully materialized
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;
}

impl fmt::Debug for dyn Connection + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish()
    }
}

/// Factory that knows how to reach one kind of database server
pub trait Connector: Send + Sync {
    /// Establish a fresh session against `server`
    fn connect(
        &self,
        server: &ServerDescriptor,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>>;
}

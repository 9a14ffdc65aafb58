//! The core of an embeddable, multi-threaded relational database engine.
//!
//! Many independent client threads share one process. Each thread owns a
//! [`dbs::Connection`] with its own transaction, prepared plan and bound
//! parameters, and pulls tuples out of a tree of executor nodes. Scans may
//! be delegated to a producer thread which walks the index or heap and
//! hands row pointers to the executor in batches.
//!
//! The SQL parser, planner and rewriter are external collaborators: the
//! engine consumes planned statements through the [`plan::Planner`] trait.

#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod cnf;
pub mod dbs;
pub mod delegate;
pub mod err;
pub mod exe;
pub mod plan;
pub mod spi;
pub mod sql;
pub mod store;

pub use dbs::Connection;
pub use err::Error;
pub use store::Database;

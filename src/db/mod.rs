//! Job persistence.
//!
//! Research jobs are stored in a relational database through libsql:
//! - **Memory**: throwaway in-process SQLite, used by tests
//! - **SQLite**: a local file, the default
//! - **Turso**: a remote libsql database
//!
//! The engine depends only on the [`JobStore`] trait.

pub mod traits;
pub mod turso;

// Re-exports
pub use traits::{DatabaseProvider, JobStore};
pub use turso::TursoClient;

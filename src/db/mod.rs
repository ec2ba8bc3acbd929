//! Database module: view models and SQL repositories.
//!
//! - `model`: row shapes returned by reader queries.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! The repository API is re-exported at `feedpoll::db::*`.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{ItemView, SortOrder};

//! Database module for persistent storage
//! Uses SQLite via sqlx as the persistent metadata cache

mod models;
mod ops;
mod repository;
mod schema;

pub use models::*;
pub use repository::MediaDatabase;

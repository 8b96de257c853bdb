//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations (users, persistent sessions)
//! - In-memory session store (volatile)
//! - Repository traits the handlers depend on

mod cache;
mod database;
mod models;
mod repository;

pub use cache::MemorySessionStore;
pub use database::Database;
pub use models::*;
pub use repository::{SessionStore, UserRepository};

#[cfg(test)]
pub use repository::MockUserRepository;

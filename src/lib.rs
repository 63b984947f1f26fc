//! Online-course platform backend: catalog, enrollment approval, assignment
//! submission/feedback threads, video-progress tracking and review
//! collection, fronted by a JSON API with JWT authentication.
//!
//! SQLite (via sqlx) is the source of truth; Redis is a read-through cache
//! and short-lived token/verification-code store. The cache is invalidated
//! on writes to the entities a cached listing is derived from and
//! repopulated lazily on the next read.

pub mod api;
pub mod assignments;
pub mod auth;
pub mod cache;
pub mod config;
pub mod courses;
pub mod error;
pub mod registrations;
pub mod reviews;
pub mod server;
pub mod state;
pub mod storage;
pub mod terms;
pub mod users;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

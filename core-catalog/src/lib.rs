//! # Catalog Store Module
//!
//! Owns the persisted media catalog and provides repository patterns for
//! data access.
//!
//! ## Overview
//!
//! This crate manages:
//! - SQLite database schema and migrations
//! - The `AudioRecord` domain model
//! - The record repository: CRUD, pagination, ordering updates, duplicate
//!   queries, and the navigation queries used for playback traversal

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{CatalogError, Result};
pub use models::AudioRecord;
pub use repositories::{AudioRecordRepository, Page, PageRequest, SqliteAudioRecordRepository};

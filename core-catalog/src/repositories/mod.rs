//! Repository layer for catalog data access

pub mod pagination;
pub mod record;

pub use pagination::{Page, PageRequest};
pub use record::{AudioRecordRepository, SqliteAudioRecordRepository};

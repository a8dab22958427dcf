//! Audio record repository trait and SQLite implementation
//!
//! All catalog reads and writes go through `AudioRecordRepository`. The
//! navigation and duplicate queries are indexed point lookups so they stay
//! cheap on catalogs with thousands of records.

use crate::error::{CatalogError, Result};
use crate::models::{AudioRecord, STICKY_ORDER};
use crate::repositories::{Page, PageRequest};
use async_trait::async_trait;
use sqlx::{query_as, SqlitePool};
use tracing::debug;

/// Record repository interface for catalog data access
#[async_trait]
pub trait AudioRecordRepository: Send + Sync {
    /// Find a record by its URL
    ///
    /// # Returns
    /// - `Ok(Some(record))` if found
    /// - `Ok(None)` if not found
    async fn find_by_url(&self, url: &str) -> Result<Option<AudioRecord>>;

    /// Insert a new record
    ///
    /// # Errors
    /// Returns an error if a record with the same URL already exists,
    /// validation fails, or a database error occurs.
    async fn insert(&self, record: &AudioRecord) -> Result<()>;

    /// Update an existing record
    ///
    /// # Errors
    /// Returns `CatalogError::NotFound` if no record with the URL exists.
    async fn update(&self, record: &AudioRecord) -> Result<()>;

    /// Delete a record by URL.
    ///
    /// Any other record whose `duplicated_of` points at the deleted URL
    /// has that reference nulled in the same transaction, so no dangling
    /// duplicate links survive.
    ///
    /// # Returns
    /// - `Ok(true)` if the record was deleted
    /// - `Ok(false)` if it did not exist
    async fn delete(&self, url: &str) -> Result<bool>;

    /// Fetch every record, ordered by `play_order`.
    ///
    /// `reason` tags the enumeration in logs; full-catalog reads are the
    /// most expensive queries this store serves.
    async fn all(&self, reason: &str) -> Result<Vec<AudioRecord>>;

    /// Query records with pagination, ordered by `play_order`.
    async fn paginate(&self, page_request: PageRequest) -> Result<Page<AudioRecord>>;

    /// Count all records
    async fn count(&self) -> Result<i64>;

    /// Fetch all liked records, ordered by `play_order`.
    async fn liked(&self) -> Result<Vec<AudioRecord>>;

    /// Records eligible for content hashing: fully downloaded, non-empty,
    /// not folders, hash unset.
    async fn records_needing_hash(&self) -> Result<Vec<AudioRecord>>;

    /// Records with a computed hash, in `(play_order, url)` order.
    async fn hashed_records(&self) -> Result<Vec<AudioRecord>>;

    /// Set or clear a record's content hash.
    ///
    /// # Returns
    /// `Ok(false)` when the record no longer exists (deleted mid-job).
    async fn set_file_hash(&self, url: &str, file_hash: Option<&str>) -> Result<bool>;

    /// Set or clear a record's duplicate back-reference.
    async fn set_duplicated_of(&self, url: &str, duplicated_of: Option<&str>) -> Result<bool>;

    /// Find the canonical record for a hash: the record sharing
    /// `file_hash` with the smallest `(play_order, url)` strictly below
    /// the given position. Equal orders fall back to lexical URL
    /// comparison.
    async fn find_canonical(
        &self,
        file_hash: &str,
        play_order: i64,
        url: &str,
    ) -> Result<Option<AudioRecord>>;

    /// Count records marked as duplicates of the given URL.
    async fn count_duplicates_of(&self, url: &str) -> Result<i64>;

    /// Apply a batch of `(url, play_order)` assignments in one
    /// transaction. Used by ordering passes so a full re-order is a
    /// single commit.
    async fn update_orders(&self, orders: &[(String, i64)]) -> Result<()>;

    /// The record currently holding the reserved sticky order, if any.
    async fn find_sticky(&self) -> Result<Option<AudioRecord>>;

    /// First record in the active ordering (folders excluded).
    async fn first(&self) -> Result<Option<AudioRecord>>;

    /// Last record in the active ordering (folders excluded).
    async fn last(&self) -> Result<Option<AudioRecord>>;

    /// Record with the smallest order strictly greater than the given
    /// position, excluding the given URL so duplicate order values cannot
    /// return the current record.
    async fn next_after(&self, play_order: i64, url: &str) -> Result<Option<AudioRecord>>;

    /// Record with the largest order strictly less than the given
    /// position, excluding the given URL.
    async fn prev_before(&self, play_order: i64, url: &str) -> Result<Option<AudioRecord>>;

    /// Set the liked flag. Returns `Ok(false)` if the record is gone.
    async fn set_liked(&self, url: &str, liked: bool) -> Result<bool>;

    /// Increment the play counter. Returns `Ok(false)` if the record is gone.
    async fn increment_play_count(&self, url: &str) -> Result<bool>;

    /// Set the cover-art flag. Returns `Ok(false)` if the record is gone.
    async fn set_has_cover(&self, url: &str, has_cover: bool) -> Result<bool>;

    /// Refresh download progress. Returns `Ok(false)` if the record is gone.
    async fn set_download_progress(&self, url: &str, progress: f64) -> Result<bool>;
}

/// SQLite implementation of `AudioRecordRepository`
pub struct SqliteAudioRecordRepository {
    pool: SqlitePool,
}

impl SqliteAudioRecordRepository {
    /// Create a new SQLite record repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl AudioRecordRepository for SqliteAudioRecordRepository {
    async fn find_by_url(&self, url: &str) -> Result<Option<AudioRecord>> {
        let record = query_as::<_, AudioRecord>("SELECT * FROM audio_records WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn insert(&self, record: &AudioRecord) -> Result<()> {
        record.validate().map_err(|msg| CatalogError::InvalidInput {
            field: "record".to_string(),
            message: msg,
        })?;

        sqlx::query(
            r#"
            INSERT INTO audio_records (
                url, title, play_order, size, content_type, is_folder,
                file_hash, duplicated_of, liked, play_count,
                is_placeholder, download_progress, has_cover,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.url)
        .bind(&record.title)
        .bind(record.play_order)
        .bind(record.size)
        .bind(&record.content_type)
        .bind(record.is_folder)
        .bind(&record.file_hash)
        .bind(&record.duplicated_of)
        .bind(record.liked)
        .bind(record.play_count)
        .bind(record.is_placeholder)
        .bind(record.download_progress)
        .bind(record.has_cover)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, record: &AudioRecord) -> Result<()> {
        record.validate().map_err(|msg| CatalogError::InvalidInput {
            field: "record".to_string(),
            message: msg,
        })?;

        let result = sqlx::query(
            r#"
            UPDATE audio_records SET
                title = ?, play_order = ?, size = ?, content_type = ?,
                is_folder = ?, file_hash = ?, duplicated_of = ?, liked = ?,
                play_count = ?, is_placeholder = ?, download_progress = ?,
                has_cover = ?, updated_at = ?
            WHERE url = ?
            "#,
        )
        .bind(&record.title)
        .bind(record.play_order)
        .bind(record.size)
        .bind(&record.content_type)
        .bind(record.is_folder)
        .bind(&record.file_hash)
        .bind(&record.duplicated_of)
        .bind(record.liked)
        .bind(record.play_count)
        .bind(record.is_placeholder)
        .bind(record.download_progress)
        .bind(record.has_cover)
        .bind(record.updated_at)
        .bind(&record.url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound {
                url: record.url.clone(),
            });
        }

        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE audio_records SET duplicated_of = NULL, updated_at = ? WHERE duplicated_of = ?",
        )
        .bind(now_timestamp())
        .bind(url)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM audio_records WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn all(&self, reason: &str) -> Result<Vec<AudioRecord>> {
        debug!(reason, "Enumerating full catalog");

        let records =
            query_as::<_, AudioRecord>("SELECT * FROM audio_records ORDER BY play_order, url")
                .fetch_all(&self.pool)
                .await?;

        Ok(records)
    }

    async fn paginate(&self, page_request: PageRequest) -> Result<Page<AudioRecord>> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audio_records")
            .fetch_one(&self.pool)
            .await?;

        let records = query_as::<_, AudioRecord>(
            "SELECT * FROM audio_records ORDER BY play_order, url LIMIT ? OFFSET ?",
        )
        .bind(page_request.limit() as i64)
        .bind(page_request.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(records, total.0 as u64, page_request))
    }

    async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audio_records")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    async fn liked(&self) -> Result<Vec<AudioRecord>> {
        let records = query_as::<_, AudioRecord>(
            "SELECT * FROM audio_records WHERE liked = 1 ORDER BY play_order, url",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn records_needing_hash(&self) -> Result<Vec<AudioRecord>> {
        let records = query_as::<_, AudioRecord>(
            r#"
            SELECT * FROM audio_records
            WHERE (file_hash IS NULL OR file_hash = '')
              AND is_placeholder = 0
              AND is_folder = 0
              AND COALESCE(size, 0) > 0
            ORDER BY play_order, url
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn hashed_records(&self) -> Result<Vec<AudioRecord>> {
        let records = query_as::<_, AudioRecord>(
            r#"
            SELECT * FROM audio_records
            WHERE file_hash IS NOT NULL AND file_hash != ''
            ORDER BY play_order, url
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn set_file_hash(&self, url: &str, file_hash: Option<&str>) -> Result<bool> {
        let result =
            sqlx::query("UPDATE audio_records SET file_hash = ?, updated_at = ? WHERE url = ?")
                .bind(file_hash)
                .bind(now_timestamp())
                .bind(url)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_duplicated_of(&self, url: &str, duplicated_of: Option<&str>) -> Result<bool> {
        if duplicated_of == Some(url) {
            return Err(CatalogError::InvalidInput {
                field: "duplicated_of".to_string(),
                message: "Record cannot be a duplicate of itself".to_string(),
            });
        }

        let result =
            sqlx::query("UPDATE audio_records SET duplicated_of = ?, updated_at = ? WHERE url = ?")
                .bind(duplicated_of)
                .bind(now_timestamp())
                .bind(url)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_canonical(
        &self,
        file_hash: &str,
        play_order: i64,
        url: &str,
    ) -> Result<Option<AudioRecord>> {
        let record = query_as::<_, AudioRecord>(
            r#"
            SELECT * FROM audio_records
            WHERE file_hash = ?
              AND url != ?
              AND (play_order < ? OR (play_order = ? AND url < ?))
            ORDER BY play_order, url
            LIMIT 1
            "#,
        )
        .bind(file_hash)
        .bind(url)
        .bind(play_order)
        .bind(play_order)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn count_duplicates_of(&self, url: &str) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM audio_records WHERE duplicated_of = ?")
                .bind(url)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.0)
    }

    async fn update_orders(&self, orders: &[(String, i64)]) -> Result<()> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        for (url, play_order) in orders {
            sqlx::query("UPDATE audio_records SET play_order = ?, updated_at = ? WHERE url = ?")
                .bind(play_order)
                .bind(now)
                .bind(url)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_sticky(&self) -> Result<Option<AudioRecord>> {
        let record = query_as::<_, AudioRecord>(
            "SELECT * FROM audio_records WHERE play_order = ? ORDER BY url LIMIT 1",
        )
        .bind(STICKY_ORDER)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn first(&self) -> Result<Option<AudioRecord>> {
        let record = query_as::<_, AudioRecord>(
            "SELECT * FROM audio_records WHERE is_folder = 0 ORDER BY play_order, url LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn last(&self) -> Result<Option<AudioRecord>> {
        let record = query_as::<_, AudioRecord>(
            "SELECT * FROM audio_records WHERE is_folder = 0 ORDER BY play_order DESC, url DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn next_after(&self, play_order: i64, url: &str) -> Result<Option<AudioRecord>> {
        let record = query_as::<_, AudioRecord>(
            r#"
            SELECT * FROM audio_records
            WHERE is_folder = 0 AND url != ? AND play_order > ?
            ORDER BY play_order, url
            LIMIT 1
            "#,
        )
        .bind(url)
        .bind(play_order)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn prev_before(&self, play_order: i64, url: &str) -> Result<Option<AudioRecord>> {
        let record = query_as::<_, AudioRecord>(
            r#"
            SELECT * FROM audio_records
            WHERE is_folder = 0 AND url != ? AND play_order < ?
            ORDER BY play_order DESC, url DESC
            LIMIT 1
            "#,
        )
        .bind(url)
        .bind(play_order)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn set_liked(&self, url: &str, liked: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE audio_records SET liked = ?, updated_at = ? WHERE url = ?")
            .bind(liked)
            .bind(now_timestamp())
            .bind(url)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_play_count(&self, url: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE audio_records SET play_count = play_count + 1, updated_at = ? WHERE url = ?",
        )
        .bind(now_timestamp())
        .bind(url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_has_cover(&self, url: &str, has_cover: bool) -> Result<bool> {
        let result =
            sqlx::query("UPDATE audio_records SET has_cover = ?, updated_at = ? WHERE url = ?")
                .bind(has_cover)
                .bind(now_timestamp())
                .bind(url)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_download_progress(&self, url: &str, progress: f64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE audio_records SET download_progress = ?, updated_at = ? WHERE url = ?",
        )
        .bind(progress.clamp(0.0, 1.0))
        .bind(now_timestamp())
        .bind(url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

//! Audio Metadata Abstractions
//!
//! Tag and cover-art parsing stays with the host; the core only needs to
//! know whether a file carries embedded artwork.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Cover-art probe.
///
/// Failures are expected (unparseable files, placeholders with no local
/// bytes) and must be non-fatal to callers; `Ok(None)` means the file was
/// readable but carries no artwork.
#[async_trait]
pub trait MetadataReader: Send + Sync {
    /// Read embedded cover art for a file, if any.
    async fn read_cover(&self, url: &str) -> Result<Option<Bytes>>;
}

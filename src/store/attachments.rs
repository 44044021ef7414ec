//! File-backed store for source documents.
//!
//! Layout under the storage root:
//! - `bookings/<company-id>/<YYYY>/<MM>/<DD>/<name>`
//! - name collisions get `_1`, `_2`, ... before the extension

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{NaiveDate, Utc};
use regex::Regex;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::StorageError;

const DEFAULT_NAME: &str = "attachment.pdf";

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[\\/:*?"<>|]+"#).unwrap_or_else(|e| panic!("invalid filename pattern: {e}"))
});

/// Replace path and shell-hostile characters; empty names get a default.
pub fn normalize_filename(name: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(name, "_");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        DEFAULT_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Stores raw documents on disk, partitioned by company and day.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    base_path: PathBuf,
}

impl AttachmentStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a stored relative path to an absolute one.
    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        self.base_path.join(relative)
    }

    /// Save a document for today. Returns the path relative to the root.
    pub async fn save(
        &self,
        company_id: Uuid,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        self.save_on(company_id, Utc::now().date_naive(), filename, bytes)
            .await
    }

    /// Save a document under a given day's partition.
    pub async fn save_on(
        &self,
        company_id: Uuid,
        day: NaiveDate,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let rel_dir = format!("bookings/{company_id}/{}", day.format("%Y/%m/%d"));
        let dir = self.base_path.join(&rel_dir);
        fs::create_dir_all(&dir).await?;

        let name = normalize_filename(filename);
        let (stem, extension) = split_extension(&name);
        let mut candidate = name.clone();
        let mut counter = 1;
        while fs::try_exists(dir.join(&candidate)).await? {
            candidate = format!("{stem}_{counter}{extension}");
            counter += 1;
        }

        fs::write(dir.join(&candidate), bytes).await?;
        let relative = format!("{rel_dir}/{candidate}");
        debug!(path = %relative, size = bytes.len(), "Stored source document");
        Ok(relative)
    }
}

/// `("booking", ".pdf")` for `booking.pdf`; dotfiles have no extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 18).unwrap()
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(normalize_filename("a/b\\c:d*.pdf"), "a_b_c_d_.pdf");
        assert_eq!(normalize_filename("  "), DEFAULT_NAME);
        assert_eq!(normalize_filename(".."), DEFAULT_NAME);
        assert_eq!(normalize_filename("κράτηση.pdf"), "κράτηση.pdf");
    }

    #[test]
    fn extension_split() {
        assert_eq!(split_extension("booking.pdf"), ("booking", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("noext"), ("noext", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
    }

    #[tokio::test]
    async fn documents_are_partitioned_by_company_and_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path());
        let company = Uuid::new_v4();

        let rel = store.save_on(company, day(), "booking.pdf", b"%PDF").await.unwrap();
        assert_eq!(rel, format!("bookings/{company}/2025/08/18/booking.pdf"));
        assert_eq!(std::fs::read(store.resolve_path(&rel)).unwrap(), b"%PDF");
    }

    #[tokio::test]
    async fn collisions_get_numeric_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path());
        let company = Uuid::new_v4();

        let first = store.save_on(company, day(), "booking.pdf", b"1").await.unwrap();
        let second = store.save_on(company, day(), "booking.pdf", b"2").await.unwrap();
        let third = store.save_on(company, day(), "booking.pdf", b"3").await.unwrap();

        assert!(first.ends_with("/booking.pdf"));
        assert!(second.ends_with("/booking_1.pdf"));
        assert!(third.ends_with("/booking_2.pdf"));
        assert_eq!(std::fs::read(store.resolve_path(&first)).unwrap(), b"1");
    }
}

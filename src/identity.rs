//! Content identity: the SHA-1 of a file's bytes rendered as lowercase hex.
//!
//! A file is in canonical form when its stem is such a hash. The extension is
//! kept as-is so the media type stays recognizable on disk.

use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::catalog::CatalogError;

/// Length of a hex-encoded 160-bit digest.
pub const IDENTITY_HEX_LEN: usize = 40;

/// Hash an entire byte stream.
pub fn compute_identity<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha1::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash a file on the blocking pool.
pub async fn hash_file(path: &Path) -> Result<String, CatalogError> {
    let owned: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::File::open(&owned)
            .and_then(|file| compute_identity(std::io::BufReader::new(file)))
            .map_err(|source| CatalogError::UnreadableFile {
                path: owned.clone(),
                source,
            })
    })
    .await?
}

/// True iff the stem of `file_name` is a 40 character hex string.
pub fn is_canonical_name(file_name: &str) -> bool {
    let stem = identity_of(file_name);
    stem.len() == IDENTITY_HEX_LEN && stem.chars().all(|c| c.is_ascii_hexdigit())
}

/// The stem of a file name, which is what the catalog uses as an image id.
pub fn identity_of(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name)
}

/// `{identity}.{ext}` using the extension of `original`.
pub fn canonical_file_name(identity: &str, original: &Path) -> String {
    match original.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{}.{}", identity, ext),
        None => identity.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_identity_known_digest() {
        let identity = compute_identity(&b"hello world"[..]).unwrap();
        assert_eq!(identity, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert_eq!(identity.len(), IDENTITY_HEX_LEN);
    }

    #[test]
    fn test_compute_identity_ignores_name() {
        let a = compute_identity(&b"same bytes"[..]).unwrap();
        let b = compute_identity(&b"same bytes"[..]).unwrap();
        let c = compute_identity(&b"other bytes"[..]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_is_canonical_name() {
        assert!(is_canonical_name(
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed.png"
        ));
        assert!(is_canonical_name("2AAE6C35C94FCFB415DBE95F408B9CE91EE846ED.JPG"));
        assert!(is_canonical_name("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"));
        assert!(!is_canonical_name("cat.png"));
        assert!(!is_canonical_name("2aae6c35c94fcfb415dbe95f408b9ce91ee846e.png"));
        assert!(!is_canonical_name("zaae6c35c94fcfb415dbe95f408b9ce91ee846ed.png"));
    }

    #[test]
    fn test_canonical_file_name_keeps_extension() {
        let id = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";
        assert_eq!(
            canonical_file_name(id, Path::new("/photos/pets/Cat.PNG")),
            format!("{}.PNG", id)
        );
        assert_eq!(canonical_file_name(id, Path::new("/photos/pets/README")), id);
    }

    #[tokio::test]
    async fn test_hash_file_missing_is_unreadable() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let result = hash_file(&temp_dir.path().join("missing.png")).await;
        assert!(matches!(result, Err(CatalogError::UnreadableFile { .. })));
    }

    #[tokio::test]
    async fn test_hash_file_matches_stream_hash() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("bytes.bin");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(
            hash_file(&path).await.unwrap(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }
}

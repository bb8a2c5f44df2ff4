//! Deterministic scan bundles and content fingerprints
//!
//! The same set of files always produces byte-identical bundles: entries are
//! sorted by path, timestamps are pinned to the ZIP epoch, permissions are
//! fixed and no build metadata is written. Scanners key their caches by the
//! bundle's SHA-256, so republishing identical bytes hits the same verdict.

use crate::core::service::ServiceError;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBundle {
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of `bytes`
    pub sha256: String,
    pub file_count: usize,
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Build the bundle uploaded to file-reputation scanners
pub fn build_scan_bundle(files: &[(String, Vec<u8>)]) -> Result<ScanBundle, ServiceError> {
    let mut sorted: Vec<&(String, Vec<u8>)> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, content) in sorted {
        zip.start_file(path.as_str(), options)
            .map_err(|e| ServiceError::Storage(format!("Failed to add {} to bundle: {}", path, e)))?;
        zip.write_all(content).map_err(ServiceError::Io)?;
    }
    let bytes = zip
        .finish()
        .map_err(|e| ServiceError::Storage(format!("Failed to finalize bundle: {}", e)))?
        .into_inner();

    Ok(ScanBundle {
        sha256: sha256_hex(&bytes),
        file_count: files.len(),
        bytes,
    })
}

/// Stable hash over `(path, sha256)` pairs, independent of input order
pub fn fingerprint_files(files: &[(String, String)]) -> String {
    let mut entries: Vec<&(String, String)> = files.iter().collect();
    entries.sort();
    let mut hasher = Sha256::new();
    for (path, sha256) in entries {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(sha256.as_bytes());
        hasher.update([b'\n']);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn files() -> Vec<(String, Vec<u8>)> {
        vec![
            ("SKILL.md".to_string(), b"# Demo\n\nDoes things.".to_vec()),
            ("scripts/run.sh".to_string(), b"echo hi\n".to_vec()),
        ]
    }

    #[test]
    fn test_bundle_is_deterministic_and_order_independent() {
        let a = build_scan_bundle(&files()).unwrap();
        let mut reversed = files();
        reversed.reverse();
        let b = build_scan_bundle(&reversed).unwrap();
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.file_count, 2);
    }

    #[test]
    fn test_bundle_changes_with_content() {
        let a = build_scan_bundle(&files()).unwrap();
        let mut changed = files();
        changed[1].1 = b"echo bye\n".to_vec();
        assert_ne!(a.sha256, build_scan_bundle(&changed).unwrap().sha256);
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = vec![
            ("a.md".to_string(), "11".to_string()),
            ("b.md".to_string(), "22".to_string()),
        ];
        let b = vec![a[1].clone(), a[0].clone()];
        assert_eq!(fingerprint_files(&a), fingerprint_files(&b));
        assert_ne!(
            fingerprint_files(&a),
            fingerprint_files(&[("a.md".to_string(), "11".to_string())])
        );
        assert_eq!(sha256_hex(b"").len(), 64);
    }
}

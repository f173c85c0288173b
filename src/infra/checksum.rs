//! SHA-256 content digests
//!
//! Checksums are lowercase hex strings; comparisons ignore case.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::ChecksumError;

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compare two hex digests, ignoring case and surrounding whitespace
pub fn checksums_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Compute the SHA256 checksum of a file, streaming its content
pub async fn compute_file_checksum(path: &Path) -> Result<String, ChecksumError> {
    let io_error = |e: std::io::Error| ChecksumError::Io {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    let mut file = tokio::fs::File::open(path).await.map_err(io_error)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer).await.map_err(io_error)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify SHA256 checksum of a file
pub fn verify_checksum(path: &Path, expected: &str) -> Result<bool, ChecksumError> {
    let content = std::fs::read(path).map_err(|e| ChecksumError::Io {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    Ok(checksums_match(&compute_checksum(&content), expected))
}

/// Async version of checksum verification
pub async fn verify_checksum_async(path: &Path, expected: &str) -> Result<bool, ChecksumError> {
    let actual = compute_file_checksum(path).await?;
    Ok(checksums_match(&actual, expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_checksum() {
        assert_eq!(compute_checksum(b"hello world"), HELLO_WORLD);
    }

    #[test]
    fn test_compute_checksum_empty() {
        assert_eq!(
            compute_checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify_checksum_case_insensitive() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");
        std::fs::write(&file_path, b"hello world").unwrap();

        assert!(verify_checksum(&file_path, &HELLO_WORLD.to_uppercase()).unwrap());
        assert!(!verify_checksum(&file_path, &"0".repeat(64)).unwrap());
    }

    #[test]
    fn test_verify_checksum_file_not_found() {
        let result = verify_checksum(Path::new("/nonexistent/file.txt"), HELLO_WORLD);
        assert!(matches!(result, Err(ChecksumError::Io { .. })));
    }

    #[tokio::test]
    async fn test_file_checksum_streams_large_content() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("large.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&file_path, &data).unwrap();

        let streamed = compute_file_checksum(&file_path).await.unwrap();
        assert_eq!(streamed, compute_checksum(&data));
        assert!(verify_checksum_async(&file_path, &streamed).await.unwrap());
    }

    fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>(), 0..1000)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// For any content, verification accepts its own digest and rejects a different one
        #[test]
        fn prop_checksum_verification(data in data_strategy()) {
            let temp = TempDir::new().unwrap();
            let file_path = temp.path().join("test.bin");
            std::fs::write(&file_path, &data).unwrap();

            let actual = compute_checksum(&data);
            prop_assert!(verify_checksum(&file_path, &actual).unwrap());

            let wrong = "0".repeat(64);
            if actual != wrong {
                prop_assert!(!verify_checksum(&file_path, &wrong).unwrap());
            }
        }

        /// Checksum is always 64 hex characters
        #[test]
        fn prop_checksum_format(data in data_strategy()) {
            let checksum = compute_checksum(&data);
            prop_assert_eq!(checksum.len(), 64);
            prop_assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}

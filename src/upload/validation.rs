//! Upload validation helpers

use md5::{Digest, Md5};

use crate::config::ClassLimits;

use super::types::{file_extension, ResourceClass, UploadError};

/// Chunk size checks, applied only when the client declared a size
pub fn check_chunk_size(declared: u64, actual: u64, max: u64) -> Result<(), UploadError> {
    if declared == 0 {
        return Ok(());
    }
    if actual > max {
        return Err(UploadError::ChunkTooLarge { size: actual, max });
    }
    if declared != actual {
        return Err(UploadError::SizeMismatch { declared, actual });
    }
    Ok(())
}

/// Compare a declared checksum with a computed one; an empty declaration passes
pub fn check_checksum(declared: &str, actual: &str) -> Result<(), UploadError> {
    if declared.is_empty() || declared.eq_ignore_ascii_case(actual) {
        return Ok(());
    }
    Err(UploadError::ChecksumMismatch {
        expected: declared.to_string(),
        actual: actual.to_string(),
    })
}

/// Extension allow-list of a resource class; an empty list accepts anything
pub fn check_extension(
    class: ResourceClass,
    limits: &ClassLimits,
    filename: &str,
) -> Result<(), UploadError> {
    if limits.accept_suffixes.is_empty() {
        return Ok(());
    }
    let suffix = file_extension(filename);
    if limits.accept_suffixes.iter().any(|s| s == &suffix) {
        return Ok(());
    }
    Err(UploadError::UnsupportedExtension {
        suffix,
        class: class.as_str(),
        accepted: limits.accept_suffixes.clone(),
    })
}

/// Whole-file size limit of a single-shot upload
pub fn check_file_size(size: u64, limits: &ClassLimits) -> Result<(), UploadError> {
    if size > limits.max_file_size {
        return Err(UploadError::FileTooLarge {
            size,
            max: limits.max_file_size,
        });
    }
    Ok(())
}

/// Lowercase hex MD5 of a chunk body
pub fn content_checksum(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Running MD5 over the chunk checksums of a merge, in merge order
#[derive(Default)]
pub struct AggregateChecksum {
    hasher: Md5,
}

impl AggregateChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk_checksum: &str) {
        self.hasher.update(chunk_checksum.as_bytes());
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Aggregate checksum a client should declare for the given chunk checksums
pub fn aggregate_checksum<'a>(chunk_checksums: impl IntoIterator<Item = &'a str>) -> String {
    let mut aggregate = AggregateChecksum::new();
    for checksum in chunk_checksums {
        aggregate.update(checksum);
    }
    aggregate.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size() {
        assert!(check_chunk_size(0, 999, 10).is_ok());
        assert!(check_chunk_size(5, 5, 10).is_ok());
        assert!(matches!(
            check_chunk_size(11, 11, 10),
            Err(UploadError::ChunkTooLarge { size: 11, max: 10 })
        ));
        assert!(matches!(
            check_chunk_size(4, 5, 10),
            Err(UploadError::SizeMismatch { declared: 4, actual: 5 })
        ));
    }

    #[test]
    fn test_checksum() {
        assert!(check_checksum("", "abc").is_ok());
        assert!(check_checksum("ABC", "abc").is_ok());
        let err = check_checksum("abd", "abc").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_extension() {
        let limits = ClassLimits::default();
        assert!(check_extension(ResourceClass::Image, &limits, "a.png").is_ok());
        assert!(matches!(
            check_extension(ResourceClass::Image, &limits, "a.exe"),
            Err(UploadError::UnsupportedExtension { .. })
        ));

        let open = ClassLimits {
            accept_suffixes: Vec::new(),
            ..ClassLimits::default()
        };
        assert!(check_extension(ResourceClass::Image, &open, "a.exe").is_ok());
    }

    #[test]
    fn test_content_checksum_is_md5() {
        assert_eq!(content_checksum(b"hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(content_checksum(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_aggregate_is_order_sensitive() {
        let forward = aggregate_checksum(["a", "b"]);
        let backward = aggregate_checksum(["b", "a"]);
        assert_ne!(forward, backward);
        // Equivalent to hashing the concatenated checksum strings
        assert_eq!(forward, aggregate_checksum(["ab"]));
        assert_eq!(forward, content_checksum(b"ab"));
    }
}

//! SHA-256 verification of downloaded update packages.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{ServiceError, ServiceResult};

const BUF_SIZE: usize = 64 * 1024;

/// Compute SHA-256 of a file and return the digest as lowercase hex.
pub fn sha256_path(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check `path` against a published hex digest (case-insensitive).
pub fn verify_sha256(path: &Path, expected: &str) -> ServiceResult<()> {
    let actual = sha256_path(path)?;
    let expected = expected.trim().to_ascii_lowercase();
    if actual != expected {
        return Err(ServiceError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HELLO: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    #[test]
    fn sha256_path_empty_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let digest = sha256_path(f.path()).unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn verify_accepts_uppercase_digest() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        verify_sha256(f.path(), &HELLO.to_uppercase()).unwrap();
    }

    #[test]
    fn verify_reports_mismatch() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"tampered\n").unwrap();
        f.flush().unwrap();
        match verify_sha256(f.path(), HELLO) {
            Err(ServiceError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, HELLO);
                assert_ne!(actual, HELLO);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }
}

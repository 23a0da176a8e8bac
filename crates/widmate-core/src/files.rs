//! Download-directory confinement for served files.

use std::path::{Path, PathBuf};

use crate::error::{ServiceError, ServiceResult};

/// Resolve a stored output path to a regular file inside `download_dir`.
///
/// Both paths are canonicalized first, so symlinks and `..` segments cannot
/// escape the directory. Anything that does not resolve to an existing regular
/// file under the directory is reported as `NotFound`.
pub fn resolve_output_file(download_dir: &Path, stored: &str) -> ServiceResult<PathBuf> {
    let not_found = || ServiceError::NotFound("file".to_string());

    let root = download_dir.canonicalize().map_err(|_| not_found())?;
    let candidate = Path::new(stored);
    let candidate = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let resolved = candidate.canonicalize().map_err(|_| not_found())?;

    if !resolved.starts_with(&root) {
        tracing::warn!(path = %resolved.display(), "refusing to serve file outside download directory");
        return Err(not_found());
    }
    if !resolved.is_file() {
        return Err(not_found());
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_inside_dir_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abc_Title.mp4");
        std::fs::write(&file, b"data").unwrap();
        let got = resolve_output_file(dir.path(), file.to_str().unwrap()).unwrap();
        assert_eq!(got, file.canonicalize().unwrap());

        let rel = resolve_output_file(dir.path(), "abc_Title.mp4").unwrap();
        assert_eq!(rel, got);
    }

    #[test]
    fn file_outside_dir_is_not_found() {
        let downloads = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let secret = elsewhere.path().join("secret.txt");
        std::fs::write(&secret, b"secret").unwrap();

        let err = resolve_output_file(downloads.path(), secret.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let escape = format!(
            "../{}/secret.txt",
            elsewhere.path().file_name().unwrap().to_str().unwrap()
        );
        assert!(resolve_output_file(downloads.path(), &escape).is_err());
    }

    #[test]
    fn directories_and_missing_files_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        assert!(resolve_output_file(dir.path(), "sub").is_err());
        assert!(resolve_output_file(dir.path(), "missing.mp4").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_dir_is_not_found() {
        let downloads = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let secret = elsewhere.path().join("secret.txt");
        std::fs::write(&secret, b"secret").unwrap();
        let link = downloads.path().join("link.mp4");
        std::os::unix::fs::symlink(&secret, &link).unwrap();
        assert!(resolve_output_file(downloads.path(), link.to_str().unwrap()).is_err());
    }
}

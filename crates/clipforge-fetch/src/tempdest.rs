//! Nonce-prefixed temp file naming shared by every fetcher.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Build a collision-free temp path under `dir` for `file_name`, prefixed with
/// a random nonce so concurrent workers sharing the process-wide temp
/// directory never collide.
#[must_use]
pub fn nonce_path(dir: &Path, file_name: &str) -> PathBuf {
    let nonce = Uuid::new_v4().simple().to_string();
    let safe_name = sanitize(file_name);
    dir.join(format!("{nonce}-{safe_name}"))
}

fn sanitize(file_name: &str) -> String {
    let candidate = Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("download.bin");
    if candidate.is_empty() {
        "download.bin".to_string()
    } else {
        candidate.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_path_is_prefixed_and_keeps_base_name() {
        let dir = Path::new("/tmp/clipforge");
        let path = nonce_path(dir, "movie.mp4");
        let name = path.file_name().expect("file name").to_str().expect("utf8");
        assert!(name.ends_with("-movie.mp4"));
        assert_eq!(path.parent(), Some(dir));
    }

    #[test]
    fn sanitize_rejects_path_traversal() {
        let path = nonce_path(Path::new("/tmp"), "../../etc/passwd");
        let name = path.file_name().expect("file name").to_str().expect("utf8");
        assert!(name.ends_with("-passwd"));
    }

    #[test]
    fn sanitize_falls_back_for_empty_name() {
        let path = nonce_path(Path::new("/tmp"), "");
        let name = path.file_name().expect("file name").to_str().expect("utf8");
        assert!(name.ends_with("-download.bin"));
    }
}

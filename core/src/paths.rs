//! Remote path helpers.
//!
//! Remote paths on the SD card are absolute and forward-slash separated.
//! These helpers normalize caller input, derive directory keys and reject
//! traversal before anything is handed to the external tool.

use crate::errors::OperationError;

/// Normalize a remote path: leading `/`, no repeated or trailing slashes,
/// no `.` segments. `..` segments are kept so validation can reject them.
pub fn normalize_remote_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .trim()
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}

/// Parent directory of a normalized path. The root is its own parent.
pub fn parent_dir(path: &str) -> String {
    let path = normalize_remote_path(path);
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Last component of a path, or `/` for the root.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Join a directory and an entry name.
pub fn join_remote(dir: &str, name: &str) -> String {
    let dir = normalize_remote_path(dir);
    let name = name.trim_matches('/');
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Whether any segment of the path is `..`.
pub fn has_traversal(path: &str) -> bool {
    path.split('/').any(|s| s == "..")
}

/// Validate a remote path before it reaches the external tool.
pub fn validate_remote_path(path: &str) -> Result<(), OperationError> {
    if path.trim().is_empty() {
        return Err(OperationError::invalid_path("remote path is empty"));
    }
    if has_traversal(path) {
        return Err(OperationError::invalid_path(format!(
            "remote path contains '..': {path}"
        )));
    }
    Ok(())
}

/// Validate the new name of a rename: one non-empty path component.
pub fn validate_new_name(name: &str) -> Result<(), OperationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(OperationError::invalid_path("new name is empty"));
    }
    if trimmed == ".." || trimmed == "." {
        return Err(OperationError::invalid_path(format!(
            "new name is not a valid entry name: {name}"
        )));
    }
    if trimmed.contains('/') {
        return Err(OperationError::invalid_path(format!(
            "new name must not contain '/': {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn normalize_collapses_slashes() {
        assert_eq!(normalize_remote_path("/Games//N64/"), "/Games/N64");
        assert_eq!(normalize_remote_path("Games"), "/Games");
        assert_eq!(normalize_remote_path("/./Games/."), "/Games");
        assert_eq!(normalize_remote_path(""), "/");
        assert_eq!(normalize_remote_path("///"), "/");
    }

    #[test]
    fn normalize_keeps_traversal_for_validation() {
        assert_eq!(normalize_remote_path("/Games/../x"), "/Games/../x");
    }

    #[test]
    fn parent_dir_of_paths() {
        assert_eq!(parent_dir("/Games/mario.z64"), "/Games");
        assert_eq!(parent_dir("/sc64menu.n64"), "/");
        assert_eq!(parent_dir("/"), "/");
        assert_eq!(parent_dir("/a/b/c/"), "/a/b");
    }

    #[test]
    fn file_name_of_paths() {
        assert_eq!(file_name("/Games/mario.z64"), "mario.z64");
        assert_eq!(file_name("/Games/"), "Games");
        assert_eq!(file_name("plain"), "plain");
        assert_eq!(file_name("/"), "/");
    }

    #[test]
    fn join_remote_handles_root() {
        assert_eq!(join_remote("/", "menu"), "/menu");
        assert_eq!(join_remote("/Games/", "zelda.z64"), "/Games/zelda.z64");
    }

    #[test]
    fn validate_rejects_traversal_and_empty() {
        assert!(validate_remote_path("/Games/a.z64").is_ok());
        let err = validate_remote_path("/Games/../etc").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPath);
        assert!(validate_remote_path("   ").is_err());
        // Names that merely contain dots are fine.
        assert!(validate_remote_path("/saves/..hidden").is_ok());
    }

    #[test]
    fn validate_new_name_rules() {
        assert!(validate_new_name("zelda.z64").is_ok());
        assert!(validate_new_name("").is_err());
        assert!(validate_new_name("..").is_err());
        assert!(validate_new_name("a/b").is_err());
    }
}

//! Path helpers for configured locations.

use std::path::{Path, PathBuf};

/// Expand a leading `~` to the user's home directory.
///
/// Paths without a leading `~` component, or when no home directory can be
/// determined, are returned unchanged.
pub fn expand_home(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Ensure a configured directory exists, returning its expanded form.
pub fn ensure_dir(path: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    let dir = expand_home(path);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_path_unchanged() {
        assert_eq!(expand_home("/srv/objects"), PathBuf::from("/srv/objects"));
        assert_eq!(expand_home("uploads"), PathBuf::from("uploads"));
        // Only a whole leading component counts.
        assert_eq!(expand_home("~user/x"), PathBuf::from("~user/x"));
    }

    #[test]
    fn test_tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.vstash/objects"), home.join(".vstash/objects"));
            assert_eq!(expand_home("~"), home);
        }
    }

    #[test]
    fn test_ensure_dir_creates() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("a/b");
        let created = ensure_dir(&target).unwrap();
        assert!(created.is_dir());
    }
}

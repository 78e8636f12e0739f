//! Data directory layout.

use std::path::{Path, PathBuf};

/// Resolve the data directory.
///
/// Priority:
/// 1. `DRAFTLINE_DATA_DIR` environment variable
/// 2. `~/.draftline`
/// 3. `.draftline` in the working directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DRAFTLINE_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".draftline");
    }

    PathBuf::from(".draftline")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// `{data_dir}/criteria` unless the config names another directory.
pub fn criteria_dir(data_dir: &Path, configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => data_dir.join(dir),
        None => data_dir.join("criteria"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let data_dir = PathBuf::from("/home/user/.draftline");
        assert_eq!(config_path(&data_dir), PathBuf::from("/home/user/.draftline/config.toml"));
        assert_eq!(criteria_dir(&data_dir, None), PathBuf::from("/home/user/.draftline/criteria"));
        assert_eq!(
            criteria_dir(&data_dir, Some(Path::new("rubrics"))),
            PathBuf::from("/home/user/.draftline/rubrics")
        );
        assert_eq!(
            criteria_dir(&data_dir, Some(Path::new("/etc/draftline/criteria"))),
            PathBuf::from("/etc/draftline/criteria")
        );
    }

    #[test]
    fn test_resolve_data_dir_from_env() {
        // SAFETY: no other test in this crate reads DRAFTLINE_DATA_DIR concurrently.
        unsafe {
            std::env::set_var("DRAFTLINE_DATA_DIR", "/tmp/test-draftline");
        }
        let dir = resolve_data_dir();
        unsafe {
            std::env::remove_var("DRAFTLINE_DATA_DIR");
        }
        assert_eq!(dir, PathBuf::from("/tmp/test-draftline"));
    }
}

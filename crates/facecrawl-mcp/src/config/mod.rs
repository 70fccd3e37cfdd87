//! Data directory and model path resolution.

use std::path::{Path, PathBuf};

use facecrawl::detector::DEFAULT_MODEL_FILENAME;

/// Env var overriding the data directory.
pub const DATA_DIR_ENV: &str = "FACECRAWL_DIR";
/// Env var overriding the detector model path.
pub const MODEL_ENV: &str = "FACECRAWL_MODEL";

const DATA_DIR_NAME: &str = ".facecrawl";

/// Resolve the data directory.
///
/// Order: explicit flag, `FACECRAWL_DIR`, `./.facecrawl` if it exists,
/// then `~/.facecrawl`.
pub fn resolve_data_dir(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var(DATA_DIR_ENV) {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }

    let cwd_dir = PathBuf::from(DATA_DIR_NAME);
    if cwd_dir.is_dir() {
        return cwd_dir;
    }

    home_dir().join(DATA_DIR_NAME)
}

/// Resolve the SCRFD model path: explicit flag, `FACECRAWL_MODEL`, then
/// `~/.facecrawl/models/scrfd_2.5g.onnx`.
pub fn resolve_model_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var(MODEL_ENV) {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }

    home_dir()
        .join(DATA_DIR_NAME)
        .join("models")
        .join(DEFAULT_MODEL_FILENAME)
}

pub fn catalog_path(data_dir: &Path) -> PathBuf {
    data_dir.join("catalog.db")
}

pub fn image_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("images")
}

fn home_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
}

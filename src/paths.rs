use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the directory containing the executable.
pub fn get_exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the logs directory: `<exe_dir>/logs/`
pub fn get_logs_dir() -> PathBuf {
    get_exe_dir().join("logs")
}

/// Returns the capture dump directory: `<exe_dir>/captures/`
pub fn get_captures_dir() -> PathBuf {
    get_exe_dir().join("captures")
}

/// Returns the default config path: `<exe_dir>/config.json`
pub fn get_config_path() -> PathBuf {
    get_exe_dir().join("config.json")
}

/// Resolves a configured output path; relative paths land next to the executable.
pub fn resolve_output_path(path: &Path) -> PathBuf {
    resolve_against(get_exe_dir(), path)
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Ensures all output directories exist. Call at startup.
pub fn ensure_directories() -> std::io::Result<()> {
    std::fs::create_dir_all(get_logs_dir())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let base = Path::new("/opt/pricewatch");
        assert_eq!(
            resolve_against(base, Path::new("prices.csv")),
            PathBuf::from("/opt/pricewatch/prices.csv")
        );
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("prices.csv");
        assert_eq!(resolve_against(Path::new("/elsewhere"), &csv), csv);
    }

    #[test]
    fn test_directories_live_under_exe_dir() {
        assert!(get_logs_dir().starts_with(get_exe_dir()));
        assert!(get_config_path().ends_with("config.json"));
    }
}

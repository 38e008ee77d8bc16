//! Locating the Tesseract executable and its language data.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

const TESSDATA_REPO: &str = "https://github.com/tesseract-ocr/tessdata/raw/main";

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "tesseract.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "tesseract";

#[cfg(windows)]
const COMMON_INSTALL_DIRS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR",
    r"C:\Program Files (x86)\Tesseract-OCR",
];
#[cfg(not(windows))]
const COMMON_INSTALL_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"];

/// Resolved locations handed to the recognizer.
#[derive(Debug, Clone)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    /// `None` lets Tesseract use its compiled-in data directory.
    pub tessdata: Option<PathBuf>,
}

/// Directory for application-managed Tesseract files.
pub fn get_tesseract_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pricewatch")
        .join("tesseract")
}

fn responds_to_version(executable: &Path) -> bool {
    Command::new(executable)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Finds the Tesseract executable.
///
/// Order: explicit configuration, the application data dir, `PATH`, then
/// common install locations.
pub fn find_tesseract_executable(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(anyhow!(
            "Configured Tesseract executable does not exist: {}",
            path.display()
        ));
    }

    let local_exe = get_tesseract_dir().join(EXECUTABLE_NAME);
    if local_exe.exists() {
        return Ok(local_exe);
    }

    let on_path = PathBuf::from(EXECUTABLE_NAME);
    if responds_to_version(&on_path) {
        return Ok(on_path);
    }

    COMMON_INSTALL_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(EXECUTABLE_NAME))
        .find(|p| p.exists())
        .ok_or_else(|| anyhow!("Tesseract not found. Install Tesseract-OCR or set ocr.executable."))
}

fn has_language(dir: &Path, language: &str) -> bool {
    dir.join(format!("{language}.traineddata")).exists()
}

/// Finds a tessdata directory that contains `<language>.traineddata`.
///
/// Returns `None` when only Tesseract's built-in search path is left.
pub fn find_tessdata_dir(configured: Option<&Path>, language: &str) -> Option<PathBuf> {
    if let Some(dir) = configured {
        return Some(dir.to_path_buf());
    }

    let local = get_tesseract_dir().join("tessdata");
    if has_language(&local, language) {
        return Some(local);
    }

    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let prefix = PathBuf::from(prefix);
        for candidate in [prefix.clone(), prefix.join("tessdata")] {
            if has_language(&candidate, language) {
                return Some(candidate);
            }
        }
    }

    COMMON_INSTALL_DIRS
        .iter()
        .map(|dir| Path::new(dir).join("tessdata"))
        .find(|dir| has_language(dir, language))
}

/// Resolves executable and data directory, failing only on a missing executable.
pub fn resolve(
    executable: Option<&Path>,
    tessdata: Option<&Path>,
    language: &str,
) -> Result<TesseractPaths> {
    let executable = find_tesseract_executable(executable)?;
    let tessdata = find_tessdata_dir(tessdata, language);
    debug!(
        "Tesseract: {} (tessdata: {})",
        executable.display(),
        tessdata
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in".to_string())
    );
    Ok(TesseractPaths {
        executable,
        tessdata,
    })
}

/// Ensures Tesseract is runnable and the language data is present locally,
/// downloading the trained data when no copy can be found.
///
/// A configured tessdata directory is the only place searched, and the
/// download lands there when it lacks the language.
pub fn ensure_tesseract(
    executable: Option<&Path>,
    tessdata: Option<&Path>,
    language: &str,
) -> Result<TesseractPaths> {
    let executable = find_tesseract_executable(executable)?;
    info!("Tesseract found at: {}", executable.display());

    let tessdata_dir = match tessdata_target(tessdata, language) {
        Ok(dir) => {
            info!("Language data '{}' found in {}", language, dir.display());
            return Ok(TesseractPaths {
                executable,
                tessdata: Some(dir),
            });
        }
        Err(dir) => dir,
    };

    fs::create_dir_all(&tessdata_dir)
        .with_context(|| format!("Failed to create {}", tessdata_dir.display()))?;
    download_tessdata(&tessdata_dir, language)?;

    Ok(TesseractPaths {
        executable,
        tessdata: Some(tessdata_dir),
    })
}

/// `Ok` with the directory that already holds the language, or `Err` with
/// the directory to download it into.
fn tessdata_target(configured: Option<&Path>, language: &str) -> Result<PathBuf, PathBuf> {
    match configured {
        Some(dir) if has_language(dir, language) => Ok(dir.to_path_buf()),
        Some(dir) => Err(dir.to_path_buf()),
        None => find_tessdata_dir(None, language)
            .ok_or_else(|| get_tesseract_dir().join("tessdata")),
    }
}

/// Downloads `<language>.traineddata` into `tessdata_dir`.
fn download_tessdata(tessdata_dir: &Path, language: &str) -> Result<()> {
    let url = format!("{TESSDATA_REPO}/{language}.traineddata");
    let target = tessdata_dir.join(format!("{language}.traineddata"));

    info!("Downloading {}...", url);

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()?;

    let response = client
        .get(&url)
        .header("User-Agent", "pricewatch")
        .send()
        .context("Failed to request trained data")?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to download {}.traineddata: HTTP {}",
            language,
            response.status()
        ));
    }

    let bytes = response.bytes()?;
    let mut file = fs::File::create(&target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    file.write_all(&bytes)?;

    info!(
        "Downloaded {}.traineddata ({} bytes) to {}",
        language,
        bytes.len(),
        target.display()
    );
    Ok(())
}

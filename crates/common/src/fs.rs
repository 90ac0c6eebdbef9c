//! File helpers shared by the JSON-backed stores.

use std::path::Path;

use tokio::fs;

/// Replace `path` with `contents` atomically: write a sibling temp file,
/// copy the previous file to `<path>.bak`, then rename over the target.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let tmp = sibling(path, "tmp");
    fs::write(&tmp, contents).await?;

    if fs::try_exists(path).await.unwrap_or(false) {
        let _ = fs::copy(path, sibling(path, "bak")).await;
    }

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Read `path` to a string, `None` when the file does not exist.
pub async fn read_optional(path: &Path) -> std::io::Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn sibling(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

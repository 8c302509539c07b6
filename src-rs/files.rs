use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde_json::Value;
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const DEFAULT_OUT_ROOT: &str = ".photo-zukan";

/// Reads an image file into a `data:<mime>;base64,` URI, MIME sniffed from the bytes.
pub fn load_image_data_uri(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read image: {}", path.display()))?;
    let format = image::guess_format(&bytes)
        .with_context(|| format!("unrecognized image format: {}", path.display()))?;
    Ok(format!(
        "data:{};base64,{}",
        format.to_mime_type(),
        STANDARD.encode(bytes)
    ))
}

/// `-` reads the key from stdin.
pub fn read_api_key(value: &str) -> Result<String> {
    let key = if value == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read API key from stdin")?;
        buf
    } else {
        value.to_string()
    };
    Ok(key.trim().to_string())
}

pub fn load_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read JSON: {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid JSON: {}", path.display()))?;
    if !value.is_object() {
        bail!("expected a JSON object in {}", path.display());
    }
    Ok(value)
}

pub fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent_dir(path)?;
    fs::write(path, bytes).with_context(|| format!("failed to write file: {}", path.display()))
}

pub fn write_text_file(path: &Path, content: &str) -> Result<()> {
    write_bytes(path, content.as_bytes())
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

/// `.photo-zukan/<timestamp>` under the working directory.
pub fn default_out_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUT_ROOT).join(timestamp_compact())
}

pub fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

pub fn timestamp_compact() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

pub fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn image_file_becomes_data_uri() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("photo.png");
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255])))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();

        let uri = load_image_data_uri(&path).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn non_image_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "hello").unwrap();
        assert!(load_image_data_uri(&path).is_err());
    }

    #[test]
    fn writes_json_pretty() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b.json");
        write_json_pretty(&target, &json!({"ok": true})).unwrap();
        assert_eq!(load_json(&target).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn api_key_is_trimmed() {
        assert_eq!(read_api_key("  abc \n").unwrap(), "abc");
    }
}

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};

/// Detects a MIME type from magic bytes. `infer` misses the HEIC family that
/// phone cameras produce, so the ftyp box is checked first.
pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

fn mime_from_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        _ => return None,
    };
    Some(mime.to_string())
}

/// An opaque image payload: raw bytes plus the MIME type the provider
/// should be told about. No pixel-level processing happens anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageData {
    pub fn new(bytes: Vec<u8>, mime_type: String) -> Self {
        Self { bytes, mime_type }
    }

    /// Reads a photo from disk, sniffing the MIME type from content and
    /// falling back to the file extension, then `image/jpeg`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read photo {}", path.display()))?;
        if bytes.is_empty() {
            return Err(anyhow!("Photo {} is empty", path.display()));
        }
        let mime_type = detect_mime_type(&bytes)
            .or_else(|| mime_from_extension(path))
            .unwrap_or_else(|| "image/jpeg".to_string());
        Ok(Self { bytes, mime_type })
    }

    /// Parses a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| anyhow!("Not a data URL"))?;
        let (mime_type, encoded) = rest
            .split_once(";base64,")
            .ok_or_else(|| anyhow!("Data URL is not base64-encoded"))?;
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .context("Invalid base64 payload in data URL")?;
        if bytes.is_empty() {
            return Err(anyhow!("Data URL carries no image bytes"));
        }
        let mime_type = if mime_type.trim().is_empty() {
            "image/png".to_string()
        } else {
            mime_type.trim().to_string()
        };
        Ok(Self { bytes, mime_type })
    }

    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    pub fn base64_bytes(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/heic" => "heic",
            _ => "png",
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.bytes)
            .with_context(|| format!("Failed to write image {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0, 0];

    #[test]
    fn detects_png_from_magic_bytes() {
        assert_eq!(detect_mime_type(PNG_MAGIC).as_deref(), Some("image/png"));
    }

    #[test]
    fn detects_heic_from_ftyp_box() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(b"ftypheic");
        data.extend_from_slice(&[0u8; 8]);
        assert_eq!(detect_mime_type(&data).as_deref(), Some("image/heic"));
    }

    #[test]
    fn data_url_round_trip() {
        let image = ImageData::new(PNG_MAGIC.to_vec(), "image/png".to_string());
        let url = image.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(ImageData::from_data_url(&url).unwrap(), image);
    }

    #[test]
    fn rejects_non_data_urls() {
        assert!(ImageData::from_data_url("https://example.com/x.png").is_err());
        assert!(ImageData::from_data_url("data:image/png;base64,!!!").is_err());
    }

    #[test]
    fn extension_follows_mime_type() {
        assert_eq!(
            ImageData::new(vec![1], "image/jpeg".to_string()).file_extension(),
            "jpg"
        );
        assert_eq!(
            ImageData::new(vec![1], "image/png".to_string()).file_extension(),
            "png"
        );
        assert_eq!(
            ImageData::new(vec![1], "application/octet-stream".to_string()).file_extension(),
            "png"
        );
    }
}

//! Image persistence.
//!
//! Evidence and diagnostic artifacts are written atomically (temp file, then
//! rename) so a reader never observes a half-written JPEG.

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Component, Path, PathBuf};

/// Capability for persisting images under a relative path.
///
/// Implementations create missing parent directories.
pub trait EvidenceStore: Send {
    fn persist(&mut self, relative: &Path, image: &RgbImage) -> Result<PathBuf>;
}

/// Evidence store rooted at a local directory.
#[derive(Clone, Debug)]
pub struct FsEvidenceStore {
    root: PathBuf,
}

impl FsEvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create evidence root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl EvidenceStore for FsEvidenceStore {
    fn persist(&mut self, relative: &Path, image: &RgbImage) -> Result<PathBuf> {
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(anyhow!(
                "evidence path {} must be relative without '..'",
                relative.display()
            ));
        }
        let path = self.root.join(relative);
        write_image_atomic(&path, image)?;
        Ok(path)
    }
}

/// Encode and write an image, format chosen by the path extension.
pub fn write_image_atomic(path: &Path, image: &RgbImage) -> Result<()> {
    let format = ImageFormat::from_path(path)
        .with_context(|| format!("unknown image format for {}", path.display()))?;
    let bytes = encode_image(image, format)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    write_atomic(path, &bytes).with_context(|| format!("write {}", path.display()))
}

pub fn encode_image(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .with_context(|| format!("encode {:?} image", format))?;
    Ok(bytes)
}

/// PNG-encode an image as standard base64, the form HTTP services accept inline.
#[cfg(feature = "http")]
pub fn image_to_base64_png(image: &RgbImage) -> Result<String> {
    use base64::Engine;

    let png = encode_image(image, ImageFormat::Png)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(png))
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn persist_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsEvidenceStore::new(dir.path().join("images")).unwrap();
        let image = RgbImage::from_pixel(8, 8, Rgb([200, 10, 10]));

        let path = store
            .persist(Path::new("Pigeon/20240101-1200/zone-3/tile-3.jpg"), &image)
            .expect("persist");

        assert!(path.is_file());
        assert!(!path.with_extension("tmp").exists());
        let decoded = image::open(&path).expect("decode").to_rgb8();
        assert_eq!(decoded.dimensions(), (8, 8));
    }

    #[test]
    fn persist_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsEvidenceStore::new(dir.path()).unwrap();
        let image = RgbImage::new(2, 2);
        assert!(store.persist(Path::new("../escape.jpg"), &image).is_err());
        assert!(store.persist(Path::new("/abs.jpg"), &image).is_err());
    }

    #[test]
    fn unknown_extension_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::new(2, 2);
        assert!(write_image_atomic(&dir.path().join("frame.xyz"), &image).is_err());
    }

    #[cfg(feature = "http")]
    #[test]
    fn base64_png_decodes_to_png_bytes() {
        use base64::Engine;

        let encoded = image_to_base64_png(&RgbImage::new(4, 4)).unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}

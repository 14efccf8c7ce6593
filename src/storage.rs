//! Batch output directories and atomic file writes.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "info.json";
pub const COMBINED_PDF_FILE: &str = "combined_certificates.pdf";

/// `cert_<16 hex>.<micros mod 1e8>`
pub fn generate_batch_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "cert_{}.{}",
        &id[..16],
        Utc::now().timestamp_micros().rem_euclid(100_000_000)
    )
}

/// Ids this crate generates: `cert_` followed by hex digits, a dot and digits.
/// Anything else (path separators included) is rejected before touching disk.
pub fn is_valid_batch_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix("cert_") else {
        return false;
    };
    match rest.split_once('.') {
        Some((hex, micros)) => {
            !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit())
                && !micros.is_empty()
                && micros.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Alphanumerics, '-' and '_' are kept; anything else becomes '_'.
pub fn safe_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Write `bytes` to a temp file beside `path`, then rename it into place.
/// Readers see the old file, the complete new file, or nothing.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Working directory owned by one batch.
#[derive(Debug, Clone)]
pub struct BatchDir {
    pub id: String,
    pub root: PathBuf,
}

impl BatchDir {
    /// Create `<output_root>/<id>` with its `jpg/` and `pdf/` folders. Fails if
    /// the directory already exists, so two batches never share one.
    pub fn create(output_root: &Path, id: &str) -> io::Result<Self> {
        fs::create_dir_all(output_root)?;
        let root = output_root.join(id);
        fs::create_dir(&root)?;
        fs::create_dir(root.join("jpg"))?;
        fs::create_dir(root.join("pdf"))?;
        Ok(Self {
            id: id.to_string(),
            root,
        })
    }

    /// An existing batch directory, for reading its manifest back.
    pub fn open(output_root: &Path, id: &str) -> Self {
        Self {
            id: id.to_string(),
            root: output_root.join(id),
        }
    }

    /// `cert_<n>_<safe name>` with a 1-based position.
    pub fn file_stem(position: usize, name: &str) -> String {
        format!("cert_{}_{}", position, safe_file_stem(name))
    }

    pub fn png_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{}.png", stem))
    }

    pub fn jpg_path(&self, stem: &str) -> PathBuf {
        self.root.join("jpg").join(format!("{}.jpg", stem))
    }

    pub fn pdf_path(&self, stem: &str) -> PathBuf {
        self.root.join("pdf").join(format!("{}.pdf", stem))
    }

    pub fn combined_pdf_path(&self) -> PathBuf {
        self.root.join(COMBINED_PDF_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_shape() {
        let id = generate_batch_id();
        assert!(id.starts_with("cert_"));
        let (hex, micros) = id["cert_".len()..].split_once('.').unwrap();
        assert_eq!(hex.len(), 16);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(micros.parse::<u64>().unwrap() < 100_000_000);
        assert!(is_valid_batch_id(&id));
    }

    #[test]
    fn test_batch_id_rejects_paths() {
        assert!(!is_valid_batch_id("cert_../etc.1"));
        assert!(!is_valid_batch_id("../cert_ab.1"));
        assert!(!is_valid_batch_id("cert_ab"));
        assert!(!is_valid_batch_id("session_ab.1"));
    }

    #[test]
    fn test_safe_file_stem() {
        assert_eq!(safe_file_stem("Anju Shah"), "Anju_Shah");
        assert_eq!(safe_file_stem("O'Neil/Jr."), "O_Neil_Jr_");
        assert_eq!(BatchDir::file_stem(3, "Mary-Ann Lee"), "cert_3_Mary-Ann_Lee");
    }

    #[test]
    fn test_batch_dir_is_exclusive() {
        let out = tempfile::tempdir().unwrap();
        let dir = BatchDir::create(out.path(), "cert_test").unwrap();
        assert!(dir.root.join("jpg").is_dir());
        assert!(dir.root.join("pdf").is_dir());
        assert!(BatchDir::create(out.path(), "cert_test").is_err());
    }

    #[test]
    fn test_open_points_at_created_dir() {
        let out = tempfile::tempdir().unwrap();
        let created = BatchDir::create(out.path(), "cert_ab.12").unwrap();
        let opened = BatchDir::open(out.path(), "cert_ab.12");
        assert_eq!(opened.root, created.root);
        assert_eq!(opened.manifest_path(), created.root.join(MANIFEST_FILE));
    }

    #[test]
    fn test_write_atomic_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("info.json");
        write_atomic(&path, b"first version, quite long").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}

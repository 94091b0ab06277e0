use std::path::{Path, PathBuf};

use base64::Engine;
use tokio::fs;
use tracing::{debug, info};

use crate::error::CartoonError;

/// 本地图片存储。
///
/// The local write is the mandatory half of the dual persister: without it
/// nothing can be shown to the user, so its failures are fatal.
#[derive(Clone, Debug)]
pub struct LocalImageStorage {
    base_dir: PathBuf,
    base_url: String,
}

impl LocalImageStorage {
    pub fn new(base_dir: PathBuf, base_url: String) -> Self {
        Self { base_dir, base_url }
    }

    pub async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, CartoonError> {
        let path = self.resolve_path(file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| CartoonError::FileStorage(err.to_string()))?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|err| CartoonError::FileStorage(err.to_string()))?;
        debug!(file = %file_name, size = bytes.len(), "image saved locally");
        Ok(path)
    }

    /// Decodes base64 image data (with or without a data-URI prefix) and
    /// saves it under `file_name`.
    pub async fn save_base64(
        &self,
        base64_data: &str,
        file_name: &str,
    ) -> Result<PathBuf, CartoonError> {
        let clean = strip_data_uri(base64_data);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(clean.trim())
            .map_err(|err| CartoonError::FileStorage(format!("base64解码失败: {err}")))?;
        self.save(file_name, &bytes).await
    }

    pub async fn read(&self, file_name: &str) -> Result<Vec<u8>, CartoonError> {
        let path = self.resolve_path(file_name);
        fs::read(&path)
            .await
            .map_err(|err| CartoonError::FileStorage(err.to_string()))
    }

    pub fn url_for(&self, file_name: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let name = file_name.trim_start_matches('/');
        format!("{base}/{name}")
    }

    /// Whether `url` points back at this storage's own public prefix.
    pub fn is_local_url(&self, url: &str) -> bool {
        url.starts_with(self.base_url.trim_end_matches('/'))
            || url.contains("localhost")
            || url.contains("127.0.0.1")
    }

    /// Maps a URL under our public prefix back to the file on disk.
    pub fn path_for_local_url(&self, url: &str) -> Option<PathBuf> {
        let base = self.base_url.trim_end_matches('/');
        let rest = url.strip_prefix(base)?.trim_start_matches('/');
        if rest.is_empty() {
            return None;
        }
        Some(self.resolve_path(rest))
    }

    pub fn resolve_path(&self, file_name: &str) -> PathBuf {
        let normalized = file_name.trim_start_matches('/');
        self.base_dir.join(Path::new(normalized))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

/// 移除可能的 `data:image/...;base64,` 前缀。
pub fn strip_data_uri(data: &str) -> &str {
    match data.find(',') {
        Some(index) if data[..index].contains("base64") => &data[index + 1..],
        _ => data,
    }
}

pub async fn ensure_dir(dir: &Path) -> Result<(), CartoonError> {
    if !fs::try_exists(dir)
        .await
        .map_err(|err| CartoonError::FileStorage(err.to_string()))?
    {
        fs::create_dir_all(dir)
            .await
            .map_err(|err| CartoonError::FileStorage(err.to_string()))?;
        info!(dir = %dir.display(), "created upload directory");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(dir: &Path) -> LocalImageStorage {
        LocalImageStorage::new(dir.to_path_buf(), "http://localhost:8080/upload".to_string())
    }

    #[tokio::test]
    async fn save_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let path = storage.save("cartoon_test.jpeg", b"hello").await.unwrap();
        assert!(path.exists());
        assert_eq!(storage.read("cartoon_test.jpeg").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn save_base64_strips_data_uri_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"pixels");
        let data = format!("data:image/jpeg;base64,{encoded}");
        storage.save_base64(&data, "a.jpeg").await.unwrap();
        assert_eq!(storage.read("a.jpeg").await.unwrap(), b"pixels");
    }

    #[tokio::test]
    async fn invalid_base64_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let err = storage.save_base64("!!!not-base64!!!", "a.jpeg").await.unwrap_err();
        assert!(matches!(err, CartoonError::FileStorage(_)));
    }

    #[test]
    fn url_for_joins_without_double_slash() {
        let storage = LocalImageStorage::new(
            PathBuf::from("/tmp"),
            "http://localhost:8080/upload/".to_string(),
        );
        assert_eq!(
            storage.url_for("/cartoon_x.jpeg"),
            "http://localhost:8080/upload/cartoon_x.jpeg"
        );
    }

    #[test]
    fn local_url_maps_back_to_disk_path() {
        let storage = LocalImageStorage::new(
            PathBuf::from("/data/upload"),
            "http://localhost:8080/upload".to_string(),
        );
        assert!(storage.is_local_url("http://localhost:8080/upload/a.jpeg"));
        assert_eq!(
            storage.path_for_local_url("http://localhost:8080/upload/a.jpeg"),
            Some(PathBuf::from("/data/upload/a.jpeg"))
        );
        assert_eq!(storage.path_for_local_url("http://other.example/a.jpeg"), None);
    }

    #[test]
    fn strip_data_uri_leaves_plain_base64_alone() {
        assert_eq!(strip_data_uri("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri("QUJD"), "QUJD");
    }
}

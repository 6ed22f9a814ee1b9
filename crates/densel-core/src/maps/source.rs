use crate::engine::error::EngineError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where the bytes of a map or reflection file come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ByteSource {
    Url(String),
    File(PathBuf),
    Bytes { name: String, data: Vec<u8> },
}

impl ByteSource {
    pub fn name(&self) -> String {
        match self {
            ByteSource::Url(url) => url
                .rsplit('/')
                .find(|segment| !segment.is_empty())
                .unwrap_or(url.as_str())
                .to_string(),
            ByteSource::File(path) => file_name(path),
            ByteSource::Bytes { name, .. } => name.clone(),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Reads a [`ByteSource`] into memory.
#[derive(Debug, Clone, Default)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, source: ByteSource) -> Result<Vec<u8>, EngineError> {
        match source {
            ByteSource::Url(url) => {
                debug!("Fetching {}", url);
                let response = self.client.get(&url).send().await?.error_for_status()?;
                Ok(response.bytes().await?.to_vec())
            }
            ByteSource::File(path) => {
                debug!("Reading {}", path.display());
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| EngineError::Fetch {
                        source_name: path.display().to_string(),
                        reason: e.to_string(),
                    })
            }
            ByteSource::Bytes { data, .. } => Ok(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_come_from_the_last_path_segment() {
        assert_eq!(
            ByteSource::Url("https://example.org/maps/5a3h.mtz".into()).name(),
            "5a3h.mtz"
        );
        assert_eq!(
            ByteSource::Url("https://example.org/maps/".into()).name(),
            "maps"
        );
        assert_eq!(ByteSource::File(PathBuf::from("/tmp/x.map")).name(), "x.map");
    }

    #[tokio::test]
    async fn reads_files_and_passes_bytes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("density.map");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let fetcher = Fetcher::new();
        assert_eq!(
            fetcher.fetch(ByteSource::File(path)).await.unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(
            fetcher
                .fetch(ByteSource::Bytes {
                    name: "inline".into(),
                    data: vec![9]
                })
                .await
                .unwrap(),
            vec![9]
        );
    }

    #[tokio::test]
    async fn missing_file_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Fetcher::new()
            .fetch(ByteSource::File(dir.path().join("absent.map")))
            .await;
        assert!(matches!(result, Err(EngineError::Fetch { .. })));
    }
}

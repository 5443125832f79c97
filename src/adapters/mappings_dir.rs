use crate::domain::model::StubMapping;
use crate::domain::ports::MappingSource;
use crate::utils::error::{Result, StubError};
use crate::utils::validation::{self, Validate};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 單一映射，或 `{ "mappings": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum MappingFile {
    Many { mappings: Vec<StubMapping> },
    One(Box<StubMapping>),
}

/// 讀取目錄下所有 `*.json` 映射檔（依檔名排序）
#[derive(Debug, Clone)]
pub struct MappingsDir {
    root: PathBuf,
}

impl MappingsDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn json_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read_file(path: &Path) -> Result<Vec<StubMapping>> {
        let content = tokio::fs::read_to_string(path).await?;
        let parsed: MappingFile = serde_json::from_str(&content).map_err(|e| StubError::ConfigError {
            message: format!("{}: {}", path.display(), e),
        })?;
        let mappings = match parsed {
            MappingFile::Many { mappings } => mappings,
            MappingFile::One(mapping) => vec![*mapping],
        };
        for mapping in &mappings {
            mapping.validate().map_err(|e| StubError::ConfigError {
                message: format!("{} ({}): {}", path.display(), mapping.label(), e),
            })?;
        }
        Ok(mappings)
    }
}

#[async_trait]
impl MappingSource for MappingsDir {
    async fn load(&self) -> Result<Vec<StubMapping>> {
        validation::validate_path("mappings", &self.root.to_string_lossy())?;

        let mut mappings = Vec::new();
        for path in self.json_files().await? {
            let loaded = Self::read_file(&path).await?;
            tracing::debug!("📄 {} mapping(s) from {}", loaded.len(), path.display());
            mappings.extend(loaded);
        }
        Ok(mappings)
    }

    fn describe(&self) -> String {
        format!("mappings directory {}", self.root.display())
    }
}

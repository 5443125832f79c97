use crate::config::ServerConfig;
use crate::domain::model::StubMapping;
use crate::domain::ports::MappingSource;
use crate::utils::error::{Result, StubError};
use crate::utils::validation::{self, Validate};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TOML 格式的 stub 檔：可選的 `[server]` 與多個 `[[stubs]]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StubFile {
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub stubs: Vec<StubMapping>,
    #[serde(skip)]
    origin: Option<PathBuf>,
}

impl StubFile {
    /// 從 TOML 檔案載入
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        validation::validate_path("mappings", &path.to_string_lossy())?;
        let content = std::fs::read_to_string(path)?;
        let mut file = Self::from_toml_str(&content)?;
        file.origin = Some(path.to_path_buf());
        Ok(file)
    }

    /// 從 TOML 字串解析
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;
        Ok(toml::from_str(&processed_content)?)
    }

    /// 替換環境變數 (例如 ${UPSTREAM_URL})，未設定的保留原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| StubError::ConfigError {
            message: format!("environment pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.into_owned())
    }

    /// 伺服器設定，沒有 `[server]` 時用預設值
    pub fn server_config(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }
}

impl Validate for StubFile {
    fn validate(&self) -> Result<()> {
        if let Some(server) = &self.server {
            server.validate()?;
        }
        for (index, stub) in self.stubs.iter().enumerate() {
            stub.validate().map_err(|e| StubError::ConfigError {
                message: format!("stubs[{}] ({}): {}", index, stub.label(), e),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl MappingSource for StubFile {
    async fn load(&self) -> Result<Vec<StubMapping>> {
        self.validate()?;
        Ok(self.stubs.clone())
    }

    fn describe(&self) -> String {
        match &self.origin {
            Some(path) => format!("TOML stub file {}", path.display()),
            None => "inline TOML stubs".to_string(),
        }
    }
}

#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::CliConfig;

use crate::core::template::EscapeMode;
use crate::utils::error::{Result, StubError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;

/// 伺服器設定；`port = 0` 代表由系統挑選可用的埠
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: String,
    /// 對所有回應套用 response-template
    pub global_templating: bool,
    pub template_escape: EscapeMode,
    /// 請求紀錄上限，`None` 為不限
    pub journal_capacity: Option<usize>,
    pub proxy_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_address: "127.0.0.1".to_string(),
            global_templating: false,
            template_escape: EscapeMode::None,
            journal_capacity: None,
            proxy_timeout_seconds: 30,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|e| StubError::InvalidConfigValue {
                field: "server.bind_address".to_string(),
                value: self.bind_address.clone(),
                reason: format!("Invalid IP address: {}", e),
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// 請求紀錄上限；`Some(0)` 會被 `validate` 擋下，這裡一併視為不限
    pub fn journal_limit(&self) -> Option<NonZeroUsize> {
        self.journal_capacity.and_then(NonZeroUsize::new)
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("server.bind_address", &self.bind_address)?;
        self.socket_addr()?;
        if let Some(capacity) = self.journal_capacity {
            validation::validate_positive_number("server.journal_capacity", capacity, 1)?;
        }
        validation::validate_range("server.proxy_timeout_seconds", self.proxy_timeout_seconds, 1, 3600)?;
        Ok(())
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StubError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Proxy request failed: {0}")]
    ProxyError(#[from] reqwest::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}': {value} ({reason})")]
    InvalidConfigValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Template syntax error: {message}")]
    TemplateSyntax { message: String },

    #[error("Template rendering error: {message}")]
    TemplateRender { message: String },

    #[error("Expected {expected} matching request(s) but received {actual}")]
    Verification { expected: String, actual: usize },

    #[error("No stub mapping with id {id}")]
    StubNotFound { id: String },

    #[error("Server error: {message}")]
    ServerError { message: String },
}

impl StubError {
    pub fn render(message: impl Into<String>) -> Self {
        StubError::TemplateRender {
            message: message.into(),
        }
    }

    /// 是否屬於呼叫端輸入錯誤（映射或配置內容有誤）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StubError::SerializationError(_)
                | StubError::TomlError(_)
                | StubError::ConfigError { .. }
                | StubError::InvalidConfigValue { .. }
                | StubError::TemplateSyntax { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            StubError::IoError(_) => "Check that the path exists and the port is not already in use",
            StubError::SerializationError(_) => "Validate the JSON mapping against the mapping format",
            StubError::TomlError(_) => "Check the TOML syntax of the stub file",
            StubError::ProxyError(_) => "Make sure the proxy target is reachable",
            StubError::ConfigError { .. }
            | StubError::InvalidConfigValue { .. } => "Fix the reported configuration value and retry",
            StubError::TemplateSyntax { .. } | StubError::TemplateRender { .. } => {
                "Review the response template of the matched stub"
            }
            StubError::Verification { .. } => "Inspect the request journal for the received requests",
            StubError::StubNotFound { .. } => "List the registered mappings to find a valid id",
            StubError::ServerError { .. } => "Restart the server with verbose logging enabled",
        }
    }
}

impl From<handlebars::TemplateError> for StubError {
    fn from(error: handlebars::TemplateError) -> Self {
        StubError::TemplateSyntax {
            message: error.to_string(),
        }
    }
}

impl From<handlebars::RenderError> for StubError {
    fn from(error: handlebars::RenderError) -> Self {
        StubError::TemplateRender {
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StubError>;

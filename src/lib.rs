pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use crate::core::dsl;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::MappingsDir;
pub use config::{toml_config::StubFile, ServerConfig};
pub use crate::core::journal::{CountMatch, RequestJournal};
pub use crate::core::server::MockServer;
pub use crate::core::template::{EscapeMode, TemplateEngine};
pub use crate::core::transformer::{ResponseTemplateTransformer, TransformerRegistry, RESPONSE_TEMPLATE};
pub use domain::model::{
    BodyPattern, HttpMethod, RecordedRequest, RequestPattern, ResponseDefinition, ServedResponse,
    StringMatcher, StubMapping, UrlPattern,
};
pub use domain::ports::{MappingSource, ResponseTransformer};
pub use utils::error::{Result, StubError};

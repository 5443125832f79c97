pub mod dsl;
pub mod journal;
pub mod matcher;
pub mod registry;
pub mod responder;
pub mod server;
pub mod template;
pub mod transformer;

pub use crate::domain::model::{RecordedRequest, StubMapping};
pub use crate::domain::ports::{MappingSource, ResponseTransformer};
pub use crate::utils::error::Result;

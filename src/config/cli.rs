use super::ServerConfig;
use crate::core::template::EscapeMode;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "stubforge")]
#[command(about = "A stub HTTP server with request matching and response templating")]
pub struct CliConfig {
    #[arg(long, default_value = "8080")]
    pub port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    pub bind_address: String,

    #[arg(long, help = "TOML stub file or directory of JSON mappings")]
    pub mappings: Option<PathBuf>,

    #[arg(long, help = "Apply response templating to every stub")]
    pub global_response_templating: bool,

    #[arg(long, help = "HTML-escape {{value}} output in templates")]
    pub escape_html: bool,

    #[arg(long, help = "Keep at most this many requests in the journal")]
    pub max_request_journal_entries: Option<usize>,

    #[arg(long, default_value = "30")]
    pub proxy_timeout_seconds: u64,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub log_json: bool,
}

impl CliConfig {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            bind_address: self.bind_address.clone(),
            global_templating: self.global_response_templating,
            template_escape: if self.escape_html {
                EscapeMode::Html
            } else {
                EscapeMode::None
            },
            journal_capacity: self.max_request_journal_entries,
            proxy_timeout_seconds: self.proxy_timeout_seconds,
        }
    }
}

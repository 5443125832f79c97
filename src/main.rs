use anyhow::Context;
use clap::Parser;
use stubforge::core::server;
use stubforge::utils::{logger, validation::Validate};
use stubforge::{CliConfig, MappingSource, MappingsDir, StubFile, StubMapping};

async fn load_mappings(config: &CliConfig) -> anyhow::Result<Vec<StubMapping>> {
    let Some(path) = &config.mappings else {
        tracing::info!("📭 No mappings given, starting with an empty registry");
        return Ok(Vec::new());
    };

    let source: Box<dyn MappingSource> = if path.is_dir() {
        Box::new(MappingsDir::new(path))
    } else {
        Box::new(StubFile::from_file(path).with_context(|| format!("reading {}", path.display()))?)
    };

    tracing::info!("📂 Loading mappings from {}", source.describe());
    let mappings = source
        .load()
        .await
        .with_context(|| format!("loading {}", source.describe()))?;
    Ok(mappings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.log_json {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting stubforge");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let config = cli.server_config();
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        std::process::exit(1);
    }

    let mappings = load_mappings(&cli).await?;

    if let Err(e) = server::run(config, mappings).await {
        tracing::error!("❌ Server failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        return Err(e.into());
    }

    Ok(())
}

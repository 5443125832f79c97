//! tracing 訂閱者設定；有設定 `RUST_LOG` 時以它為準

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "stubforge=info";
const VERBOSE_DIRECTIVES: &str = "stubforge=debug,info";

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// 終端機用的精簡輸出；verbose 時連同 target 與相依套件的 info 一起顯示
pub fn init_cli_logger(verbose: bool) {
    let directives = if verbose { VERBOSE_DIRECTIVES } else { DEFAULT_DIRECTIVES };
    let layer = fmt::layer()
        .with_target(verbose)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter(directives))
        .with(layer)
        .try_init()
    {
        eprintln!("logger already initialised: {}", e);
    }
}

/// 每個事件一行 JSON，欄位攤平在最上層
pub fn init_json_logger() {
    let layer = fmt::layer()
        .with_target(true)
        .json()
        .flatten_event(true)
        .with_current_span(false);

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter(DEFAULT_DIRECTIVES))
        .with(layer)
        .try_init()
    {
        eprintln!("logger already initialised: {}", e);
    }
}

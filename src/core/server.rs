use crate::config::ServerConfig;
use crate::core::journal::{CountMatch, RequestJournal};
use crate::core::registry::StubRegistry;
use crate::core::responder::Responder;
use crate::core::transformer::TransformerRegistry;
use crate::domain::model::{HttpMethod, RecordedRequest, RequestPattern, ServedResponse, StubMapping};
use crate::domain::ports::ResponseTransformer;
use crate::utils::error::{Result, StubError};
use crate::utils::validation::Validate;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Builder;
use tokio::sync::oneshot;
use uuid::Uuid;

/// 路由處理器共用的狀態
#[derive(Clone)]
pub struct ServerState {
    registry: Arc<StubRegistry>,
    journal: Arc<RequestJournal>,
    transformers: Arc<TransformerRegistry>,
    responder: Responder,
    base_url: String,
}

impl ServerState {
    pub fn new(config: &ServerConfig, base_url: String) -> Result<Self> {
        let registry = Arc::new(StubRegistry::new());
        let journal = Arc::new(RequestJournal::new(config.journal_limit()));
        let transformers = Arc::new(TransformerRegistry::with_defaults(
            config.global_templating,
            config.template_escape,
        ));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.proxy_timeout_seconds))
            .build()?;
        let responder = Responder::new(
            Arc::clone(&registry),
            Arc::clone(&journal),
            Arc::clone(&transformers),
            client,
        );

        Ok(Self {
            registry,
            journal,
            transformers,
            responder,
            base_url,
        })
    }

    /// 註冊前先確認 stub 使用的轉換器都存在
    pub fn add_mapping(&self, mapping: StubMapping) -> Result<Uuid> {
        self.transformers.ensure_known(&mapping.response.transformers)?;
        self.registry.add(mapping)
    }
}

pub fn router(state: ServerState) -> Router {
    let admin = Router::new()
        .route(
            "/mappings",
            get(list_mappings).post(create_mapping).delete(reset_mappings),
        )
        .route("/mappings/:id", get(get_mapping).delete(delete_mapping))
        .route("/requests", get(list_requests).delete(reset_requests))
        .route("/requests/count", post(count_requests))
        .route("/reset", post(reset_all));

    Router::new()
        .nest("/__admin", admin)
        .fallback(handle_stub)
        .with_state(state)
}

struct AdminError(StubError);

impl From<StubError> for AdminError {
    fn from(error: StubError) -> Self {
        Self(error)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StubError::StubNotFound { .. } => StatusCode::NOT_FOUND,
            e if e.is_client_error() => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!("⚠️ Admin request failed ({}): {}", status, self.0);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type AdminResult<T> = std::result::Result<T, AdminError>;

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| StubError::StubNotFound { id: raw.to_string() })
}

async fn list_mappings(State(state): State<ServerState>) -> Json<serde_json::Value> {
    let mappings = state.registry.list();
    Json(json!({ "mappings": mappings, "meta": { "total": mappings.len() } }))
}

async fn create_mapping(State(state): State<ServerState>, body: Bytes) -> AdminResult<Response> {
    let mut mapping: StubMapping = serde_json::from_slice(&body).map_err(StubError::from)?;
    let id = state.add_mapping(mapping.clone())?;
    mapping.id = Some(id);
    tracing::info!("➕ Admin registered stub {}", mapping.label());
    Ok((StatusCode::CREATED, Json(mapping)).into_response())
}

async fn reset_mappings(State(state): State<ServerState>) -> StatusCode {
    state.registry.reset();
    StatusCode::OK
}

async fn get_mapping(State(state): State<ServerState>, Path(id): Path<String>) -> AdminResult<Json<StubMapping>> {
    let id = parse_id(&id)?;
    state
        .registry
        .get(id)
        .map(Json)
        .ok_or_else(|| AdminError(StubError::StubNotFound { id: id.to_string() }))
}

async fn delete_mapping(State(state): State<ServerState>, Path(id): Path<String>) -> AdminResult<StatusCode> {
    let id = parse_id(&id)?;
    if state.registry.remove(id) {
        Ok(StatusCode::OK)
    } else {
        Err(AdminError(StubError::StubNotFound { id: id.to_string() }))
    }
}

async fn list_requests(State(state): State<ServerState>) -> Json<serde_json::Value> {
    let requests = state.journal.all();
    Json(json!({ "requests": requests, "meta": { "total": requests.len() } }))
}

async fn reset_requests(State(state): State<ServerState>) -> StatusCode {
    state.journal.reset();
    StatusCode::OK
}

async fn count_requests(State(state): State<ServerState>, body: Bytes) -> AdminResult<Json<serde_json::Value>> {
    let pattern: RequestPattern = serde_json::from_slice(&body).map_err(StubError::from)?;
    pattern.validate()?;
    let count = state.journal.count(&pattern)?;
    Ok(Json(json!({ "count": count })))
}

async fn reset_all(State(state): State<ServerState>) -> StatusCode {
    state.registry.reset();
    state.journal.reset();
    tracing::info!("🧹 Stubs and request journal reset");
    StatusCode::OK
}

async fn handle_stub(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(method) = method.as_str().parse::<HttpMethod>() else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    let url = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let request = RecordedRequest::new(method, url, &state.base_url, headers, &body);
    into_http(state.responder.respond(request).await)
}

fn into_http(served: ServedResponse) -> Response {
    let status = StatusCode::from_u16(served.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(served.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in served.headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!("⚠️ Dropping invalid response header {}: {}", name, value),
        }
    }
    response
}

/// 在背景執行緒上運作的 stub 伺服器，drop 時關閉
pub struct MockServer {
    state: ServerState,
    address: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    /// 以預設設定在 127.0.0.1 的隨機埠啟動
    pub fn start() -> Result<Self> {
        Self::start_with(ServerConfig::default())
    }

    pub fn start_with(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = StdTcpListener::bind(config.socket_addr()?)?;
        listener.set_nonblocking(true)?;
        let address = listener.local_addr()?;
        let state = ServerState::new(&config, format!("http://{}", address))?;

        let app = router(state.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let join = thread::Builder::new()
            .name(format!("stubforge-{}", address.port()))
            .spawn(move || {
                let runtime = match Builder::new_multi_thread().worker_threads(2).enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!("❌ Failed to build server runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            tracing::error!("❌ Failed to adopt listener: {}", e);
                            return;
                        }
                    };
                    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                        let _ = shutdown_rx.await;
                    });
                    if let Err(e) = server.await {
                        tracing::error!("❌ Stub server stopped with error: {}", e);
                    }
                });
            })?;

        tracing::info!("🚀 Stub server listening on http://{}", address);
        Ok(Self {
            state,
            address,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.state.base_url
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn stub_for(&self, mapping: impl Into<StubMapping>) -> Result<Uuid> {
        self.state.add_mapping(mapping.into())
    }

    pub fn remove_stub(&self, id: Uuid) -> Result<()> {
        if self.state.registry.remove(id) {
            Ok(())
        } else {
            Err(StubError::StubNotFound { id: id.to_string() })
        }
    }

    pub fn stubs(&self) -> Vec<StubMapping> {
        self.state.registry.list()
    }

    /// 清除所有 stub 與請求紀錄
    pub fn reset(&self) {
        self.state.registry.reset();
        self.state.journal.reset();
    }

    pub fn reset_requests(&self) {
        self.state.journal.reset();
    }

    pub fn received_requests(&self) -> Vec<RecordedRequest> {
        self.state.journal.all()
    }

    pub fn find_all(&self, pattern: impl Into<RequestPattern>) -> Result<Vec<RecordedRequest>> {
        self.state.journal.find(&pattern.into())
    }

    pub fn verify(&self, expected: CountMatch, pattern: impl Into<RequestPattern>) -> Result<()> {
        self.state.journal.verify(expected, &pattern.into())
    }

    pub fn register_transformer(&self, transformer: Arc<dyn ResponseTransformer>) {
        self.state.transformers.register(transformer);
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// CLI 用：在目前的 runtime 上服務直到 Ctrl-C
pub async fn run(config: ServerConfig, mappings: Vec<StubMapping>) -> Result<()> {
    config.validate()?;
    let listener = tokio::net::TcpListener::bind(config.socket_addr()?).await?;
    let address = listener.local_addr()?;
    let state = ServerState::new(&config, format!("http://{}", address))?;

    let total = mappings.len();
    for mapping in mappings {
        state.add_mapping(mapping)?;
    }
    tracing::info!("📋 Loaded {} stub mapping(s)", total);
    tracing::info!("🚀 Stub server listening on http://{}", address);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("👋 Shutting down");
        })
        .await?;
    Ok(())
}

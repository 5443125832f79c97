use crate::core::journal::RequestJournal;
use crate::core::registry::StubRegistry;
use crate::core::transformer::TransformerRegistry;
use crate::domain::model::{RecordedRequest, ResponseDefinition, ServedResponse, StubMapping};
use crate::utils::error::{Result, StubError};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// 不轉送給上游、也不從上游複製回來的標頭
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// 把收到的請求變成回應：比對 stub、代理或渲染、轉換、延遲
#[derive(Clone)]
pub struct Responder {
    registry: Arc<StubRegistry>,
    journal: Arc<RequestJournal>,
    transformers: Arc<TransformerRegistry>,
    client: Client,
}

impl Responder {
    pub fn new(
        registry: Arc<StubRegistry>,
        journal: Arc<RequestJournal>,
        transformers: Arc<TransformerRegistry>,
        client: Client,
    ) -> Self {
        Self {
            registry,
            journal,
            transformers,
            client,
        }
    }

    pub async fn respond(&self, mut request: RecordedRequest) -> ServedResponse {
        let matched = self.registry.find_match(&request);
        request.matched_stub_id = matched.as_ref().and_then(|m| m.id);
        self.journal.record(request.clone());

        let Some(mapping) = matched else {
            tracing::info!("❓ No stub matched {} {}", request.method, request.url);
            return ServedResponse::text(
                404,
                format!(
                    "Request was not matched\n\n{} {}\n",
                    request.method, request.url
                ),
            );
        };

        tracing::debug!("✅ {} {} matched {}", request.method, request.url, mapping.label());

        match self.produce(&request, &mapping).await {
            Ok(response) => {
                if let Some(delay) = mapping.response.fixed_delay_milliseconds {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                response
            }
            Err(e) => {
                tracing::error!(
                    "❌ Failed to serve {} {} with {}: {}",
                    request.method,
                    request.url,
                    mapping.label(),
                    e
                );
                ServedResponse::text(500, e.to_string())
            }
        }
    }

    async fn produce(&self, request: &RecordedRequest, mapping: &StubMapping) -> Result<ServedResponse> {
        let definition = &mapping.response;
        let response = match &definition.proxy_base_url {
            Some(base) => self.proxy(request, base).await?,
            None => render_definition(definition)?,
        };
        self.transformers.apply(
            request,
            response,
            &definition.transformers,
            &definition.transformer_parameters,
        )
    }

    async fn proxy(&self, request: &RecordedRequest, base_url: &str) -> Result<ServedResponse> {
        let target = format!("{}{}", base_url.trim_end_matches('/'), request.url);
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| StubError::ServerError {
                message: format!("cannot proxy method {}: {}", request.method, e),
            })?;
        tracing::debug!("🔀 Proxying {} {} to {}", request.method, request.url, target);

        let mut builder = self.client.request(method, &target);
        for (name, values) in &request.headers {
            if name == "host" || is_hop_by_hop(name) {
                continue;
            }
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let upstream = builder.send().await?;
        let status = upstream.status().as_u16();
        let headers = upstream
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = upstream.bytes().await?.to_vec();

        Ok(ServedResponse {
            status,
            headers,
            body,
        })
    }
}

/// 依 stub 的回應定義產生回應；`jsonBody` 會補上 JSON content-type
pub fn render_definition(definition: &ResponseDefinition) -> Result<ServedResponse> {
    let mut response = ServedResponse {
        status: definition.status,
        headers: definition
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        body: Vec::new(),
    };

    if let Some(json) = &definition.json_body {
        response.body = serde_json::to_vec(json)?;
        if response.header("content-type").is_none() {
            response.set_header("content-type", "application/json");
        }
    } else if let Some(body) = &definition.body {
        response.body = body.clone().into_bytes();
    }

    Ok(response)
}

use crate::core::template::{self, EscapeMode, TemplateEngine};
use crate::domain::model::{RecordedRequest, ServedResponse};
use crate::domain::ports::ResponseTransformer;
use crate::utils::error::{Result, StubError};
use serde_json::{json, Map, Value};
use std::sync::{Arc, PoisonError, RwLock};

pub const RESPONSE_TEMPLATE: &str = "response-template";

/// 快取的已編譯範本數量上限，超過時整批清空
pub const TEMPLATE_CACHE_LIMIT: usize = 256;

/// 以 Handlebars 渲染回應內容與標頭值
pub struct ResponseTemplateTransformer {
    engine: RwLock<TemplateEngine>,
    global: bool,
}

impl ResponseTemplateTransformer {
    pub fn new(global: bool, escape: EscapeMode) -> Self {
        Self::with_engine(TemplateEngine::new().with_escape(escape), global)
    }

    /// 使用自訂（例如額外註冊 helper 的）引擎
    pub fn with_engine(engine: TemplateEngine, global: bool) -> Self {
        Self {
            engine: RwLock::new(engine),
            global,
        }
    }

    pub fn cached_templates(&self) -> usize {
        self.engine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .template_count()
    }

    /// 沒有任何標籤時回傳 None，呼叫端保留原內容
    fn render(&self, source: &str, model: &Value) -> Result<Option<String>> {
        if template::is_static(source) {
            return Ok(None);
        }

        {
            let engine = self.engine.read().unwrap_or_else(PoisonError::into_inner);
            if engine.has_template(source) {
                return engine.render(source, model).map(Some);
            }
        }

        let mut engine = self.engine.write().unwrap_or_else(PoisonError::into_inner);
        if engine.template_count() >= TEMPLATE_CACHE_LIMIT {
            tracing::debug!("🧹 Template cache full ({} entries), clearing", TEMPLATE_CACHE_LIMIT);
            engine.clear_templates();
        }
        engine.register_template(source)?;
        engine.render(source, model).map(Some)
    }
}

fn first_values(values: &std::collections::BTreeMap<String, Vec<String>>) -> Map<String, Value> {
    values
        .iter()
        .filter_map(|(key, values)| {
            values
                .first()
                .map(|first| (key.clone(), Value::String(first.clone())))
        })
        .collect()
}

/// 範本可用的 `request` 與 `parameters`
pub fn template_model(request: &RecordedRequest, parameters: &Map<String, Value>) -> Value {
    let base_url = request
        .absolute_url
        .strip_suffix(request.url.as_str())
        .unwrap_or(&request.absolute_url);

    json!({
        "request": {
            "id": request.id.to_string(),
            "url": request.url,
            "path": request.path(),
            "pathSegments": request.path_segments(),
            "method": request.method.as_str(),
            "baseUrl": base_url,
            "headers": first_values(&request.headers),
            "query": first_values(&request.query),
            "body": request.body,
        },
        "parameters": parameters,
    })
}

impl ResponseTransformer for ResponseTemplateTransformer {
    fn name(&self) -> &str {
        RESPONSE_TEMPLATE
    }

    fn applies_globally(&self) -> bool {
        self.global
    }

    fn transform(
        &self,
        request: &RecordedRequest,
        mut response: ServedResponse,
        parameters: &Map<String, Value>,
    ) -> Result<ServedResponse> {
        let model = template_model(request, parameters);

        // 非 UTF-8 的內容（例如代理回來的圖片）原樣保留
        match std::str::from_utf8(&response.body) {
            Ok(body) => {
                if let Some(rendered) = self.render(body, &model)? {
                    response.body = rendered.into_bytes();
                }
            }
            Err(_) => tracing::debug!(
                "📦 Skipping template rendering for a non-UTF-8 body ({} bytes)",
                response.body.len()
            ),
        }

        for (_, value) in response.headers.iter_mut() {
            if let Some(rendered) = self.render(value, &model)? {
                *value = rendered;
            }
        }

        Ok(response)
    }
}

/// 依名稱登記的轉換器
#[derive(Default)]
pub struct TransformerRegistry {
    transformers: RwLock<Vec<Arc<dyn ResponseTransformer>>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 內建 `response-template` 已註冊的登記表
    pub fn with_defaults(global_templating: bool, escape: EscapeMode) -> Self {
        let registry = Self::new();
        registry.register(Arc::new(ResponseTemplateTransformer::new(
            global_templating,
            escape,
        )));
        registry
    }

    /// 同名的轉換器會被取代
    pub fn register(&self, transformer: Arc<dyn ResponseTransformer>) {
        let mut transformers = self
            .transformers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        transformers.retain(|existing| existing.name() != transformer.name());
        tracing::debug!(
            "🧩 Registered transformer '{}' (global: {})",
            transformer.name(),
            transformer.applies_globally()
        );
        transformers.push(transformer);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transformers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|t| t.name() == name)
    }

    /// 確認 stub 列出的轉換器都已註冊
    pub fn ensure_known(&self, names: &[String]) -> Result<()> {
        match names.iter().find(|name| !self.contains(name)) {
            Some(unknown) => Err(StubError::InvalidConfigValue {
                field: "response.transformers".to_string(),
                value: unknown.clone(),
                reason: "no transformer with this name is registered".to_string(),
            }),
            None => Ok(()),
        }
    }

    /// 先套用全域轉換器，再依 stub 列出的順序套用；同一個轉換器只套用一次
    pub fn apply(
        &self,
        request: &RecordedRequest,
        mut response: ServedResponse,
        names: &[String],
        parameters: &Map<String, Value>,
    ) -> Result<ServedResponse> {
        let transformers = self
            .transformers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut applied: Vec<&str> = Vec::new();
        let globals = transformers.iter().filter(|t| t.applies_globally());
        let named = names
            .iter()
            .filter_map(|name| transformers.iter().find(|t| t.name() == name));

        for transformer in globals.chain(named) {
            if applied.contains(&transformer.name()) {
                continue;
            }
            applied.push(transformer.name());
            response = transformer.transform(request, response, parameters)?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::HttpMethod;

    fn request(body: &str) -> RecordedRequest {
        RecordedRequest::new(
            HttpMethod::Post,
            "/things/42?debug=true",
            "http://127.0.0.1:8080",
            vec![("X-Trace".to_string(), "abc".to_string())],
            body.as_bytes(),
        )
    }

    fn response(body: &str) -> ServedResponse {
        ServedResponse {
            status: 200,
            headers: vec![("x-echo".to_string(), "{{request.headers.x-trace}}".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_model_exposes_request_parts() {
        let model = template_model(&request("hello"), &Map::new());
        assert_eq!(model["request"]["path"], "/things/42");
        assert_eq!(model["request"]["pathSegments"][1], "42");
        assert_eq!(model["request"]["baseUrl"], "http://127.0.0.1:8080");
        assert_eq!(model["request"]["query"]["debug"], "true");
        assert_eq!(model["request"]["headers"]["x-trace"], "abc");
        assert_eq!(model["request"]["method"], "POST");
    }

    #[test]
    fn test_transform_renders_body_and_headers() {
        let transformer = ResponseTemplateTransformer::new(false, EscapeMode::None);
        let mut parameters = Map::new();
        parameters.insert("greeting".to_string(), Value::String("hi".to_string()));

        let out = transformer
            .transform(
                &request("payload"),
                response("{{parameters.greeting}} {{request.body}} {{request.pathSegments.1}}"),
                &parameters,
            )
            .unwrap();

        assert_eq!(out.body_text(), "hi payload 42");
        assert_eq!(out.header("x-echo"), Some("abc"));
    }

    #[test]
    fn test_registry_applies_only_named_unless_global() {
        let registry = TransformerRegistry::with_defaults(false, EscapeMode::None);
        let untouched = registry
            .apply(&request("x"), response("{{request.body}}"), &[], &Map::new())
            .unwrap();
        assert_eq!(untouched.body_text(), "{{request.body}}");

        let rendered = registry
            .apply(
                &request("x"),
                response("{{request.body}}"),
                &[RESPONSE_TEMPLATE.to_string()],
                &Map::new(),
            )
            .unwrap();
        assert_eq!(rendered.body_text(), "x");

        let global = TransformerRegistry::with_defaults(true, EscapeMode::None);
        let rendered = global
            .apply(&request("y"), response("{{request.body}}"), &[], &Map::new())
            .unwrap();
        assert_eq!(rendered.body_text(), "y");
    }

    #[test]
    fn test_binary_body_is_left_untouched() {
        let registry = TransformerRegistry::with_defaults(true, EscapeMode::None);
        let png = vec![137, 80, 78, 71, 255, 254, 0];
        let served = ServedResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "image/png".to_string())],
            body: png.clone(),
        };

        let out = registry.apply(&request("x"), served, &[], &Map::new()).unwrap();
        assert_eq!(out.body, png);
        assert_eq!(out.header("content-type"), Some("image/png"));
    }

    #[test]
    fn test_static_body_keeps_original_bytes() {
        let transformer = ResponseTemplateTransformer::new(true, EscapeMode::None);
        let body = "caf\u{e9} {not a tag}";
        let out = transformer
            .transform(&request("x"), response(body), &Map::new())
            .unwrap();

        assert_eq!(out.body, body.as_bytes());
        assert_eq!(transformer.cached_templates(), 1); // 只有標頭值是範本
    }

    #[test]
    fn test_template_cache_is_bounded() {
        let transformer = ResponseTemplateTransformer::new(true, EscapeMode::None);
        for i in 0..(TEMPLATE_CACHE_LIMIT * 4) {
            let out = transformer
                .transform(
                    &request("b"),
                    response(&format!("{{{{request.body}}}}-{}", i)),
                    &Map::new(),
                )
                .unwrap();
            assert_eq!(out.body_text(), format!("b-{}", i));
        }
        assert!(transformer.cached_templates() <= TEMPLATE_CACHE_LIMIT);

        // 沒有標籤的內容不進快取
        let plain = ResponseTemplateTransformer::new(true, EscapeMode::None);
        for i in 0..100 {
            let served = ServedResponse {
                status: 200,
                headers: Vec::new(),
                body: format!("plain-{}", i).into_bytes(),
            };
            plain.transform(&request("b"), served, &Map::new()).unwrap();
        }
        assert_eq!(plain.cached_templates(), 0);
    }

    #[test]
    fn test_unknown_transformer_is_rejected() {
        let registry = TransformerRegistry::with_defaults(false, EscapeMode::None);
        assert!(registry.ensure_known(&[RESPONSE_TEMPLATE.to_string()]).is_ok());
        assert!(registry.ensure_known(&["nope".to_string()]).is_err());
    }
}

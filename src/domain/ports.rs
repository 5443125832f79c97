use crate::domain::model::{RecordedRequest, ServedResponse, StubMapping};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// 回應轉換器：在回應送出前改寫它（例如套用範本）
pub trait ResponseTransformer: Send + Sync {
    fn name(&self) -> &str;

    /// 為 true 時對所有回應套用，不必在 stub 中列出名稱
    fn applies_globally(&self) -> bool {
        false
    }

    fn transform(
        &self,
        request: &RecordedRequest,
        response: ServedResponse,
        parameters: &Map<String, Value>,
    ) -> Result<ServedResponse>;
}

/// stub 映射來源（TOML 檔、JSON 目錄……）
#[async_trait]
pub trait MappingSource: Send + Sync {
    async fn load(&self) -> Result<Vec<StubMapping>>;

    fn describe(&self) -> String;
}

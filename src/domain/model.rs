use crate::utils::error::{Result, StubError};
use crate::utils::validation::{self, Validate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_PRIORITY: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Trace,
    #[default]
    Any,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Any => "ANY",
        }
    }

    /// `ANY` 可匹配所有方法
    pub fn matches(&self, actual: HttpMethod) -> bool {
        *self == HttpMethod::Any || *self == actual
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = StubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            "TRACE" => Ok(HttpMethod::Trace),
            "ANY" => Ok(HttpMethod::Any),
            other => Err(StubError::InvalidConfigValue {
                field: "method".to_string(),
                value: other.to_string(),
                reason: "Unsupported HTTP method".to_string(),
            }),
        }
    }
}

/// URL 比對方式。`Equal`/`Matching` 針對路徑加查詢字串，`Path*` 只看路徑。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UrlPattern {
    #[default]
    Any,
    Equal(String),
    Matching(String),
    PathEqual(String),
    PathMatching(String),
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Any => f.write_str("<any url>"),
            UrlPattern::Equal(url) => write!(f, "url == {}", url),
            UrlPattern::Matching(re) => write!(f, "url ~= {}", re),
            UrlPattern::PathEqual(path) => write!(f, "path == {}", path),
            UrlPattern::PathMatching(re) => write!(f, "path ~= {}", re),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StringMatcher {
    EqualTo(String),
    Contains(String),
    Matches(String),
    Absent(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyPattern {
    EqualTo(String),
    Contains(String),
    Matches(String),
    /// 可以是 JSON 值，也可以是內含 JSON 的字串
    EqualToJson(Value),
    MatchesJsonPath(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RequestPatternWire", into = "RequestPatternWire")]
pub struct RequestPattern {
    pub method: HttpMethod,
    pub url: UrlPattern,
    pub headers: BTreeMap<String, StringMatcher>,
    pub query_parameters: BTreeMap<String, StringMatcher>,
    pub body_patterns: Vec<BodyPattern>,
}

impl RequestPattern {
    pub fn new(method: HttpMethod, url: UrlPattern) -> Self {
        Self {
            method,
            url,
            ..Default::default()
        }
    }
}

impl fmt::Display for RequestPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

impl Validate for RequestPattern {
    fn validate(&self) -> Result<()> {
        match &self.url {
            UrlPattern::PathEqual(path) => validation::validate_url_path("request.urlPath", path)?,
            UrlPattern::Equal(url) => validation::validate_url_path("request.url", url)?,
            UrlPattern::Matching(re) => {
                validation::validate_regex("request.urlPattern", re)?;
            }
            UrlPattern::PathMatching(re) => {
                validation::validate_regex("request.urlPathPattern", re)?;
            }
            UrlPattern::Any => {}
        }

        for name in self.headers.keys() {
            validation::validate_non_empty_string("request.headers", name)?;
        }
        for name in self.query_parameters.keys() {
            validation::validate_non_empty_string("request.queryParameters", name)?;
        }
        Ok(())
    }
}

/// JSON/TOML 上的 WireMock 風格欄位
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestPatternWire {
    #[serde(default)]
    method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url_path_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, StringMatcher>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    query_parameters: BTreeMap<String, StringMatcher>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    body_patterns: Vec<BodyPattern>,
}

impl TryFrom<RequestPatternWire> for RequestPattern {
    type Error = StubError;

    fn try_from(wire: RequestPatternWire) -> Result<Self> {
        let candidates = [
            wire.url.map(UrlPattern::Equal),
            wire.url_pattern.map(UrlPattern::Matching),
            wire.url_path.map(UrlPattern::PathEqual),
            wire.url_path_pattern.map(UrlPattern::PathMatching),
        ];
        let mut set: Vec<UrlPattern> = candidates.into_iter().flatten().collect();
        if set.len() > 1 {
            return Err(StubError::ConfigError {
                message: "Only one of url, urlPattern, urlPath, urlPathPattern may be set"
                    .to_string(),
            });
        }

        Ok(RequestPattern {
            method: wire.method,
            url: set.pop().unwrap_or_default(),
            headers: wire.headers,
            query_parameters: wire.query_parameters,
            body_patterns: wire.body_patterns,
        })
    }
}

impl From<RequestPattern> for RequestPatternWire {
    fn from(pattern: RequestPattern) -> Self {
        let mut wire = RequestPatternWire {
            method: pattern.method,
            headers: pattern.headers,
            query_parameters: pattern.query_parameters,
            body_patterns: pattern.body_patterns,
            ..Default::default()
        };
        match pattern.url {
            UrlPattern::Any => {}
            UrlPattern::Equal(url) => wire.url = Some(url),
            UrlPattern::Matching(re) => wire.url_pattern = Some(re),
            UrlPattern::PathEqual(path) => wire.url_path = Some(path),
            UrlPattern::PathMatching(re) => wire.url_path_pattern = Some(re),
        }
        wire
    }
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDefinition {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_body: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformers: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub transformer_parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_delay_milliseconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_base_url: Option<String>,
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: BTreeMap::new(),
            body: None,
            json_body: None,
            transformers: Vec::new(),
            transformer_parameters: Map::new(),
            fixed_delay_milliseconds: None,
            proxy_base_url: None,
        }
    }
}

impl Validate for ResponseDefinition {
    fn validate(&self) -> Result<()> {
        validation::validate_range("response.status", self.status, 100, 599)?;

        if self.body.is_some() && self.json_body.is_some() {
            return Err(StubError::ConfigError {
                message: "response.body and response.jsonBody are mutually exclusive".to_string(),
            });
        }

        if let Some(proxy) = &self.proxy_base_url {
            validation::validate_url("response.proxyBaseUrl", proxy)?;
        }

        for name in &self.transformers {
            validation::validate_non_empty_string("response.transformers", name)?;
        }
        Ok(())
    }
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StubMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub request: RequestPattern,
    pub response: ResponseDefinition,
}

impl StubMapping {
    pub fn new(request: RequestPattern, response: ResponseDefinition) -> Self {
        Self {
            id: None,
            name: None,
            priority: DEFAULT_PRIORITY,
            request,
            response,
        }
    }

    pub fn label(&self) -> String {
        match (&self.name, &self.id) {
            (Some(name), _) => name.clone(),
            (None, Some(id)) => id.to_string(),
            (None, None) => self.request.to_string(),
        }
    }
}

impl Validate for StubMapping {
    fn validate(&self) -> Result<()> {
        self.request.validate()?;
        self.response.validate()
    }
}

/// 伺服器收到的請求，同時也是請求紀錄（journal）的一筆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRequest {
    pub id: Uuid,
    pub method: HttpMethod,
    pub url: String,
    pub absolute_url: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub query: BTreeMap<String, Vec<String>>,
    pub body: String,
    pub logged_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_stub_id: Option<Uuid>,
}

impl RecordedRequest {
    pub fn new(
        method: HttpMethod,
        url: &str,
        base_url: &str,
        headers: Vec<(String, String)>,
        body: &[u8],
    ) -> Self {
        let mut header_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            header_map
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value);
        }

        let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Ok(parsed) = url::Url::parse(&format!("http://localhost{}", url)) {
            for (key, value) in parsed.query_pairs() {
                query.entry(key.into_owned()).or_default().push(value.into_owned());
            }
        }

        Self {
            id: Uuid::new_v4(),
            method,
            url: url.to_string(),
            absolute_url: format!("{}{}", base_url.trim_end_matches('/'), url),
            headers: header_map,
            query,
            body: String::from_utf8_lossy(body).into_owned(),
            logged_date: Utc::now(),
            matched_stub_id: None,
        }
    }

    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or_default()
    }

    pub fn path_segments(&self) -> Vec<&str> {
        self.path().split('/').filter(|s| !s.is_empty()).collect()
    }

    /// 標頭名稱不分大小寫，回傳第一個值
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ServedResponse {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![(
                "content-type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: body.into().into_bytes(),
        }
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// 取代同名標頭（不分大小寫）
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }
}

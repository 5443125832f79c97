//! 建立 stub 與驗證條件的流暢 API
//!
//! ```no_run
//! use stubforge::dsl::*;
//! use stubforge::MockServer;
//!
//! # fn main() -> stubforge::Result<()> {
//! let server = MockServer::start()?;
//! server.stub_for(
//!     post(url_equal_to("/echo"))
//!         .will_return(a_response().with_status(202).with_body("{{request.body}}").with_transformers(&["response-template"])),
//! )?;
//! server.verify(exactly(0), post_requested_for(url_equal_to("/echo")))?;
//! # Ok(())
//! # }
//! ```

use crate::core::journal::CountMatch;
use crate::domain::model::{
    BodyPattern, HttpMethod, RequestPattern, ResponseDefinition, StringMatcher, StubMapping, UrlPattern,
};
use crate::utils::error::Result;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

pub fn url_equal_to(url: impl Into<String>) -> UrlPattern {
    UrlPattern::Equal(url.into())
}

pub fn url_matching(regex: impl Into<String>) -> UrlPattern {
    UrlPattern::Matching(regex.into())
}

pub fn url_path_equal_to(path: impl Into<String>) -> UrlPattern {
    UrlPattern::PathEqual(path.into())
}

pub fn url_path_matching(regex: impl Into<String>) -> UrlPattern {
    UrlPattern::PathMatching(regex.into())
}

pub fn any_url() -> UrlPattern {
    UrlPattern::Any
}

pub fn equal_to(value: impl Into<String>) -> StringMatcher {
    StringMatcher::EqualTo(value.into())
}

pub fn containing(value: impl Into<String>) -> StringMatcher {
    StringMatcher::Contains(value.into())
}

pub fn matching(regex: impl Into<String>) -> StringMatcher {
    StringMatcher::Matches(regex.into())
}

pub fn absent() -> StringMatcher {
    StringMatcher::Absent(true)
}

pub fn equal_to_json(json: impl Into<Value>) -> BodyPattern {
    BodyPattern::EqualToJson(json.into())
}

pub fn matching_json_path(path: impl Into<String>) -> BodyPattern {
    BodyPattern::MatchesJsonPath(path.into())
}

/// 文字比對器也能用在請求內容；`absent()` 代表內容為空
impl From<StringMatcher> for BodyPattern {
    fn from(matcher: StringMatcher) -> Self {
        match matcher {
            StringMatcher::EqualTo(value) => BodyPattern::EqualTo(value),
            StringMatcher::Contains(value) => BodyPattern::Contains(value),
            StringMatcher::Matches(regex) => BodyPattern::Matches(regex),
            StringMatcher::Absent(true) => BodyPattern::EqualTo(String::new()),
            StringMatcher::Absent(false) => BodyPattern::Matches("(?s).+".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestPatternBuilder {
    pattern: RequestPattern,
}

impl RequestPatternBuilder {
    pub fn new(method: HttpMethod, url: UrlPattern) -> Self {
        Self {
            pattern: RequestPattern::new(method, url),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, matcher: StringMatcher) -> Self {
        self.pattern.headers.insert(name.into(), matcher);
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, matcher: StringMatcher) -> Self {
        self.pattern.query_parameters.insert(name.into(), matcher);
        self
    }

    pub fn with_request_body(mut self, pattern: impl Into<BodyPattern>) -> Self {
        self.pattern.body_patterns.push(pattern.into());
        self
    }

    pub fn build(self) -> RequestPattern {
        self.pattern
    }
}

impl From<RequestPatternBuilder> for RequestPattern {
    fn from(builder: RequestPatternBuilder) -> Self {
        builder.build()
    }
}

pub fn get_requested_for(url: UrlPattern) -> RequestPatternBuilder {
    RequestPatternBuilder::new(HttpMethod::Get, url)
}

pub fn post_requested_for(url: UrlPattern) -> RequestPatternBuilder {
    RequestPatternBuilder::new(HttpMethod::Post, url)
}

pub fn put_requested_for(url: UrlPattern) -> RequestPatternBuilder {
    RequestPatternBuilder::new(HttpMethod::Put, url)
}

pub fn patch_requested_for(url: UrlPattern) -> RequestPatternBuilder {
    RequestPatternBuilder::new(HttpMethod::Patch, url)
}

pub fn delete_requested_for(url: UrlPattern) -> RequestPatternBuilder {
    RequestPatternBuilder::new(HttpMethod::Delete, url)
}

pub fn any_requested_for(url: UrlPattern) -> RequestPatternBuilder {
    RequestPatternBuilder::new(HttpMethod::Any, url)
}

pub fn exactly(count: usize) -> CountMatch {
    CountMatch::Exactly(count)
}

pub fn more_than_or_exactly(count: usize) -> CountMatch {
    CountMatch::AtLeast(count)
}

pub fn less_than_or_exactly(count: usize) -> CountMatch {
    CountMatch::AtMost(count)
}

#[derive(Debug, Clone, Default)]
pub struct ResponseDefinitionBuilder {
    definition: ResponseDefinition,
}

pub fn a_response() -> ResponseDefinitionBuilder {
    ResponseDefinitionBuilder::default()
}

pub fn ok() -> ResponseDefinitionBuilder {
    a_response().with_status(200)
}

impl ResponseDefinitionBuilder {
    /// 200 回應，內容為序列化後的 JSON
    pub fn ok_for_json<T: Serialize + ?Sized>(body: &T) -> Result<Self> {
        Ok(ok().with_json_body(serde_json::to_value(body)?))
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.definition.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.definition.headers.insert(name.into(), value.into());
        self
    }

    /// 與 `with_json_body` 互斥，後設定的生效
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.definition.json_body = None;
        self.definition.body = Some(body.into());
        self
    }

    pub fn with_json_body(mut self, json: impl Into<Value>) -> Self {
        self.definition.body = None;
        self.definition.json_body = Some(json.into());
        self
    }

    pub fn with_transformers(mut self, names: &[&str]) -> Self {
        self.definition
            .transformers
            .extend(names.iter().map(|name| name.to_string()));
        self
    }

    pub fn with_transformer_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.definition
            .transformer_parameters
            .insert(name.into(), value.into());
        self
    }

    pub fn with_fixed_delay(mut self, milliseconds: u64) -> Self {
        self.definition.fixed_delay_milliseconds = Some(milliseconds);
        self
    }

    pub fn proxied_from(mut self, base_url: impl Into<String>) -> Self {
        self.definition.proxy_base_url = Some(base_url.into());
        self
    }

    pub fn build(self) -> ResponseDefinition {
        self.definition
    }
}

impl From<ResponseDefinitionBuilder> for ResponseDefinition {
    fn from(builder: ResponseDefinitionBuilder) -> Self {
        builder.build()
    }
}

#[derive(Debug, Clone)]
pub struct MappingBuilder {
    mapping: StubMapping,
}

impl MappingBuilder {
    pub fn new(method: HttpMethod, url: UrlPattern) -> Self {
        Self {
            mapping: StubMapping::new(RequestPattern::new(method, url), ResponseDefinition::default()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, matcher: StringMatcher) -> Self {
        self.mapping.request.headers.insert(name.into(), matcher);
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, matcher: StringMatcher) -> Self {
        self.mapping.request.query_parameters.insert(name.into(), matcher);
        self
    }

    pub fn with_request_body(mut self, pattern: impl Into<BodyPattern>) -> Self {
        self.mapping.request.body_patterns.push(pattern.into());
        self
    }

    pub fn at_priority(mut self, priority: u32) -> Self {
        self.mapping.priority = priority;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.mapping.name = Some(name.into());
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.mapping.id = Some(id);
        self
    }

    pub fn will_return(mut self, response: impl Into<ResponseDefinition>) -> Self {
        self.mapping.response = response.into();
        self
    }

    pub fn build(self) -> StubMapping {
        self.mapping
    }
}

impl From<MappingBuilder> for StubMapping {
    fn from(builder: MappingBuilder) -> Self {
        builder.build()
    }
}

pub fn get(url: UrlPattern) -> MappingBuilder {
    MappingBuilder::new(HttpMethod::Get, url)
}

pub fn post(url: UrlPattern) -> MappingBuilder {
    MappingBuilder::new(HttpMethod::Post, url)
}

pub fn put(url: UrlPattern) -> MappingBuilder {
    MappingBuilder::new(HttpMethod::Put, url)
}

pub fn patch(url: UrlPattern) -> MappingBuilder {
    MappingBuilder::new(HttpMethod::Patch, url)
}

pub fn delete(url: UrlPattern) -> MappingBuilder {
    MappingBuilder::new(HttpMethod::Delete, url)
}

pub fn any(url: UrlPattern) -> MappingBuilder {
    MappingBuilder::new(HttpMethod::Any, url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Dto {
        id: Option<String>,
        field: String,
    }

    #[test]
    fn test_builder_produces_mapping() {
        let mapping: StubMapping = post(url_path_equal_to("/orders"))
            .with_header("Content-Type", containing("json"))
            .with_query_param("dryRun", absent())
            .with_request_body(matching_json_path("$.items"))
            .at_priority(1)
            .with_name("create order")
            .will_return(
                a_response()
                    .with_status(201)
                    .with_header("Location", "/orders/1")
                    .with_body("{}")
                    .with_fixed_delay(10),
            )
            .into();

        assert_eq!(mapping.request.method, HttpMethod::Post);
        assert_eq!(mapping.request.url, UrlPattern::PathEqual("/orders".to_string()));
        assert_eq!(mapping.request.headers["Content-Type"], StringMatcher::Contains("json".to_string()));
        assert_eq!(mapping.request.query_parameters["dryRun"], StringMatcher::Absent(true));
        assert_eq!(mapping.priority, 1);
        assert_eq!(mapping.response.status, 201);
        assert_eq!(mapping.response.fixed_delay_milliseconds, Some(10));
        assert_eq!(mapping.label(), "create order");
    }

    #[test]
    fn test_ok_for_json_serializes_body() {
        let dto = Dto {
            id: None,
            field: "value".to_string(),
        };
        let definition = ResponseDefinitionBuilder::ok_for_json(&dto).unwrap().build();
        assert_eq!(definition.status, 200);
        assert_eq!(definition.json_body, Some(json!({"id": null, "field": "value"})));
        assert!(definition.body.is_none());
    }

    #[test]
    fn test_body_and_json_body_replace_each_other() {
        let definition = a_response().with_json_body(json!({"a": 1})).with_body("text").build();
        assert_eq!(definition.body.as_deref(), Some("text"));
        assert!(definition.json_body.is_none());
    }

    #[test]
    fn test_string_matchers_convert_to_body_patterns() {
        assert_eq!(BodyPattern::from(containing("x")), BodyPattern::Contains("x".to_string()));
        assert_eq!(BodyPattern::from(absent()), BodyPattern::EqualTo(String::new()));
    }

    #[test]
    fn test_verification_builders() {
        let pattern: RequestPattern = get_requested_for(url_matching("/items/.*"))
            .with_header("accept", equal_to("application/json"))
            .into();
        assert_eq!(pattern.method, HttpMethod::Get);
        assert_eq!(pattern.headers.len(), 1);
        assert_eq!(exactly(2), CountMatch::Exactly(2));
        assert_eq!(more_than_or_exactly(1), CountMatch::AtLeast(1));
        assert_eq!(less_than_or_exactly(3), CountMatch::AtMost(3));
    }
}

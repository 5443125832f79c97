use crate::domain::model::{
    BodyPattern, HttpMethod, RecordedRequest, RequestPattern, StringMatcher, UrlPattern,
};
use crate::utils::error::{Result, StubError};
use crate::utils::validation;
use regex::Regex;
use serde_json::Value;

/// 預先編譯好的 RequestPattern，正規表達式只在註冊時編譯一次
#[derive(Debug, Clone)]
pub struct RequestMatcher {
    method: HttpMethod,
    url: CompiledUrl,
    headers: Vec<(String, CompiledString)>,
    query: Vec<(String, CompiledString)>,
    body: Vec<CompiledBody>,
}

#[derive(Debug, Clone)]
enum CompiledUrl {
    Any,
    Equal(String),
    Matching(Regex),
    PathEqual(String),
    PathMatching(Regex),
}

#[derive(Debug, Clone)]
enum CompiledString {
    EqualTo(String),
    Contains(String),
    Matches(Regex),
    Absent(bool),
}

#[derive(Debug, Clone)]
enum CompiledBody {
    EqualTo(String),
    Contains(String),
    Matches(Regex),
    EqualToJson(Value),
    MatchesJsonPath(String),
}

/// 正規表達式需比對整個值
fn anchored(field: &str, pattern: &str) -> Result<Regex> {
    validation::validate_regex(field, &format!("^(?:{})$", pattern))
}

impl CompiledString {
    fn compile(field: &str, matcher: &StringMatcher) -> Result<Self> {
        Ok(match matcher {
            StringMatcher::EqualTo(value) => CompiledString::EqualTo(value.clone()),
            StringMatcher::Contains(value) => CompiledString::Contains(value.clone()),
            StringMatcher::Matches(pattern) => CompiledString::Matches(anchored(field, pattern)?),
            StringMatcher::Absent(absent) => CompiledString::Absent(*absent),
        })
    }

    fn matches(&self, values: Option<&Vec<String>>) -> bool {
        let values = match (self, values) {
            (CompiledString::Absent(absent), values) => {
                let missing = values.map_or(true, |v| v.is_empty());
                return missing == *absent;
            }
            (_, None) => return false,
            (_, Some(values)) => values,
        };

        values.iter().any(|value| match self {
            CompiledString::EqualTo(expected) => value == expected,
            CompiledString::Contains(needle) => value.contains(needle.as_str()),
            CompiledString::Matches(re) => re.is_match(value),
            CompiledString::Absent(_) => false,
        })
    }
}

impl CompiledBody {
    fn compile(pattern: &BodyPattern) -> Result<Self> {
        Ok(match pattern {
            BodyPattern::EqualTo(value) => CompiledBody::EqualTo(value.clone()),
            BodyPattern::Contains(value) => CompiledBody::Contains(value.clone()),
            BodyPattern::Matches(re) => {
                CompiledBody::Matches(anchored("request.bodyPatterns.matches", re)?)
            }
            // 字串形式的 equalToJson 需先解析
            BodyPattern::EqualToJson(Value::String(raw)) => {
                let parsed = serde_json::from_str(raw).map_err(|e| StubError::InvalidConfigValue {
                    field: "request.bodyPatterns.equalToJson".to_string(),
                    value: raw.clone(),
                    reason: format!("Invalid JSON: {}", e),
                })?;
                CompiledBody::EqualToJson(parsed)
            }
            BodyPattern::EqualToJson(value) => CompiledBody::EqualToJson(value.clone()),
            BodyPattern::MatchesJsonPath(path) => {
                // 對 null 選取一次即可檢查路徑語法
                jsonpath_lib::select(&Value::Null, path).map_err(|e| StubError::InvalidConfigValue {
                    field: "request.bodyPatterns.matchesJsonPath".to_string(),
                    value: path.clone(),
                    reason: format!("Invalid JSONPath: {:?}", e),
                })?;
                CompiledBody::MatchesJsonPath(path.clone())
            }
        })
    }

    fn matches(&self, body: &str, parsed: &mut Option<Option<Value>>) -> bool {
        match self {
            CompiledBody::EqualTo(expected) => body == expected,
            CompiledBody::Contains(needle) => body.contains(needle.as_str()),
            CompiledBody::Matches(re) => re.is_match(body),
            CompiledBody::EqualToJson(expected) => {
                parse_body(body, parsed).is_some_and(|actual| actual == expected)
            }
            CompiledBody::MatchesJsonPath(path) => parse_body(body, parsed).is_some_and(|actual| {
                jsonpath_lib::select(actual, path).is_ok_and(|found| !found.is_empty())
            }),
        }
    }
}

/// 請求主體只解析一次，供多個 JSON 條件共用
fn parse_body<'a>(body: &str, parsed: &'a mut Option<Option<Value>>) -> Option<&'a Value> {
    let parsed: &'a Option<Value> = parsed.get_or_insert_with(|| serde_json::from_str(body).ok());
    parsed.as_ref()
}

impl RequestMatcher {
    pub fn compile(pattern: &RequestPattern) -> Result<Self> {
        let url = match &pattern.url {
            UrlPattern::Any => CompiledUrl::Any,
            UrlPattern::Equal(url) => CompiledUrl::Equal(url.clone()),
            UrlPattern::Matching(re) => CompiledUrl::Matching(anchored("request.urlPattern", re)?),
            UrlPattern::PathEqual(path) => CompiledUrl::PathEqual(path.clone()),
            UrlPattern::PathMatching(re) => {
                CompiledUrl::PathMatching(anchored("request.urlPathPattern", re)?)
            }
        };

        let headers = pattern
            .headers
            .iter()
            .map(|(name, matcher)| {
                Ok((
                    name.to_ascii_lowercase(),
                    CompiledString::compile("request.headers", matcher)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let query = pattern
            .query_parameters
            .iter()
            .map(|(name, matcher)| {
                Ok((
                    name.clone(),
                    CompiledString::compile("request.queryParameters", matcher)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let body = pattern
            .body_patterns
            .iter()
            .map(CompiledBody::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            method: pattern.method,
            url,
            headers,
            query,
            body,
        })
    }

    pub fn matches(&self, request: &RecordedRequest) -> bool {
        if !self.method.matches(request.method) {
            return false;
        }

        let url_matches = match &self.url {
            CompiledUrl::Any => true,
            CompiledUrl::Equal(url) => request.url == *url,
            CompiledUrl::Matching(re) => re.is_match(&request.url),
            CompiledUrl::PathEqual(path) => request.path() == path,
            CompiledUrl::PathMatching(re) => re.is_match(request.path()),
        };
        if !url_matches {
            return false;
        }

        let headers_match = self
            .headers
            .iter()
            .all(|(name, matcher)| matcher.matches(request.headers.get(name)));
        if !headers_match {
            return false;
        }

        let query_matches = self
            .query
            .iter()
            .all(|(name, matcher)| matcher.matches(request.query.get(name)));
        if !query_matches {
            return false;
        }

        let mut parsed_body = None;
        self.body
            .iter()
            .all(|pattern| pattern.matches(&request.body, &mut parsed_body))
    }
}

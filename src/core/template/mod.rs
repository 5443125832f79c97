//! 以 `handlebars` 渲染回應範本，並加上 WireMock 風格的 helper（`val`、`assign`、`jsonMerge` 等）

pub mod helpers;

use crate::utils::error::Result;
use handlebars::Handlebars;
use helpers::{HelperArgs, ValueHelper};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// `{{x}}` 輸出時是否做 HTML 跳脫；回應多半是 JSON，預設不跳脫
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscapeMode {
    #[default]
    None,
    Html,
}

/// 不含 `{{` 的內容渲染後不變，可略過引擎
pub fn is_static(source: &str) -> bool {
    !source.contains("{{")
}

pub struct TemplateEngine {
    registry: Handlebars<'static>,
    custom_helpers: BTreeSet<String>,
    escape: EscapeMode,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// 內建 helper 全部註冊好、不跳脫輸出的引擎
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        helpers::register_builtins(&mut registry);
        Self {
            registry,
            custom_helpers: BTreeSet::new(),
            escape: EscapeMode::None,
        }
    }

    pub fn with_escape(mut self, escape: EscapeMode) -> Self {
        match escape {
            EscapeMode::None => self.registry.register_escape_fn(handlebars::no_escape),
            EscapeMode::Html => self.registry.register_escape_fn(handlebars::html_escape),
        }
        self.escape = escape;
        self
    }

    pub fn escape_mode(&self) -> EscapeMode {
        self.escape
    }

    /// 註冊自訂 helper，同名會覆蓋內建的
    pub fn register_helper<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&HelperArgs<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.registry.register_helper(name, Box::new(ValueHelper(f)));
        self.custom_helpers.insert(name.to_string());
    }

    /// 是否註冊過同名的自訂 helper
    pub fn has_helper(&self, name: &str) -> bool {
        self.custom_helpers.contains(name)
    }

    /// 編譯範本並以 `source` 本身作為名稱保留
    pub fn register_template(&mut self, source: &str) -> Result<()> {
        self.registry.register_template_string(source, source)?;
        Ok(())
    }

    pub fn has_template(&self, source: &str) -> bool {
        self.registry.has_template(source)
    }

    pub fn template_count(&self) -> usize {
        self.registry.get_templates().len()
    }

    pub fn clear_templates(&mut self) {
        self.registry.clear_templates();
    }

    /// 渲染先前以 `register_template` 保留的範本
    pub fn render(&self, source: &str, model: &Value) -> Result<String> {
        Ok(self.registry.render(source, model)?)
    }

    /// 一次性編譯並渲染
    pub fn render_str(&self, source: &str, model: &Value) -> Result<String> {
        Ok(self.registry.render_template(source, model)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::StubError;
    use serde_json::json;

    fn request_model(body: &str) -> Value {
        json!({
            "request": {
                "url": "/test?x=1",
                "path": "/test",
                "pathSegments": ["test"],
                "method": "POST",
                "headers": {"content-type": "application/json"},
                "query": {"x": "1"},
                "body": body,
            }
        })
    }

    #[test]
    fn test_echo_request_body() {
        let engine = TemplateEngine::new();
        let body = r#"{"id":null,"field":"<b>"}"#;
        let out = engine.render_str("{{request.body}}", &request_model(body)).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn test_assign_and_json_merge() {
        let engine = TemplateEngine::new();
        let template = "{{val request.body assign='currentBody'}}\
                        {{#assign 'newId'}}{\"id\": 1}{{/assign}}\
                        {{jsonMerge currentBody newId}}";
        let out = engine
            .render_str(template, &request_model(r#"{"id":null,"field":null}"#))
            .unwrap();

        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["id"], json!(1));
        assert_eq!(parsed["field"], Value::Null);
    }

    #[test]
    fn test_nested_assign_with_compact_format() {
        let engine = TemplateEngine::new();
        let template = "{{val request.body assign='currentBody'}}\n\
                        {{#assign 'newId'}}{\"id\": 1}{{/assign}}\n\
                        {{#assign 'extended'}}{{jsonMerge currentBody newId}}{{/assign}}\n\
                        {{formatJson extended format='compact'}}";
        let out = engine
            .render_str(template, &request_model(r#"{"id":"abc","field":"response"}"#))
            .unwrap();

        assert_eq!(out.trim(), r#"{"id":1,"field":"response"}"#);
    }

    #[test]
    fn test_if_else_and_each() {
        let engine = TemplateEngine::new();
        let model = json!({"items": ["a", "b", "c"], "flag": false, "empty": []});

        let out = engine
            .render_str("{{#each items}}{{@index}}={{this}}{{#unless @last}},{{/unless}}{{/each}}", &model)
            .unwrap();
        assert_eq!(out, "0=a,1=b,2=c");

        let out = engine
            .render_str("{{#if flag}}yes{{else}}no{{/if}}|{{#each empty}}x{{else}}none{{/each}}", &model)
            .unwrap();
        assert_eq!(out, "no|none");
    }

    #[test]
    fn test_with_and_parent_scope() {
        let engine = TemplateEngine::new();
        let model = json!({"name": "outer", "inner": {"name": "inner"}});
        let out = engine
            .render_str("{{#with inner}}{{name}}/{{../name}}/{{@root.name}}{{/with}}", &model)
            .unwrap();
        assert_eq!(out, "inner/outer/outer");
    }

    #[test]
    fn test_each_over_object_exposes_key() {
        let engine = TemplateEngine::new();
        let model = json!({"headers": {"a": "1", "b": "2"}});
        let out = engine
            .render_str("{{#each headers}}{{@key}}:{{this}};{{/each}}", &model)
            .unwrap();
        assert_eq!(out, "a:1;b:2;");
    }

    #[test]
    fn test_html_escape_mode() {
        let model = json!({"v": "<a href=\"x\">"});
        let escaped = TemplateEngine::new()
            .with_escape(EscapeMode::Html)
            .render_str("{{v}}|{{{v}}}", &model)
            .unwrap();
        assert_eq!(escaped, "&lt;a href&#x3D;&quot;x&quot;&gt;|<a href=\"x\">");

        let plain = TemplateEngine::new().render_str("{{v}}", &model).unwrap();
        assert_eq!(plain, "<a href=\"x\">");
    }

    #[test]
    fn test_sub_expression_and_custom_helper() {
        let mut engine = TemplateEngine::new();
        assert!(!engine.has_helper("shout"));
        engine.register_helper("shout", |args: &HelperArgs<'_>| {
            let text = helpers::stringify(args.required(0)?);
            Ok(Value::String(format!("{}!", text.to_uppercase())))
        });

        let model = json!({"word": "hi", "list": [1, 2]});
        let out = engine
            .render_str("{{shout word}} {{#if (eq (size list) 2)}}two{{/if}}", &model)
            .unwrap();
        assert_eq!(out, "HI! two");
        assert!(engine.has_helper("shout"));
    }

    #[test]
    fn test_missing_values_render_empty() {
        let engine = TemplateEngine::new();
        let out = engine.render_str("[{{nope.deeper}}]", &json!({})).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_unknown_helper_with_arguments_fails() {
        let engine = TemplateEngine::new();
        let err = engine.render_str("{{frobnicate request.body}}", &json!({})).unwrap_err();
        assert!(matches!(err, StubError::TemplateRender { .. }));
    }

    #[test]
    fn test_static_template_detection() {
        assert!(is_static("plain text with { braces }"));
        assert!(!is_static("{{x}}"));
    }

    #[test]
    fn test_if_include_zero() {
        let engine = TemplateEngine::new();
        let model = json!({"count": 0});
        let out = engine
            .render_str("{{#if count}}a{{else}}b{{/if}}{{#if count includeZero=true}}c{{/if}}", &model)
            .unwrap();
        assert_eq!(out, "bc");
    }

    #[test]
    fn test_inline_assign_and_block_format_json() {
        let engine = TemplateEngine::new();
        let out = engine
            .render_str(
                "{{assign 'n' 3}}{{#formatJson format='compact'}} { \"n\": {{n}} } {{/formatJson}}",
                &json!({}),
            )
            .unwrap();
        assert_eq!(out, r#"{"n":3}"#);
    }

    #[test]
    fn test_registered_templates_are_reused() {
        let mut engine = TemplateEngine::new();
        engine.register_template("{{request.body}}!").unwrap();
        assert!(engine.has_template("{{request.body}}!"));
        assert_eq!(engine.template_count(), 1);
        assert_eq!(engine.render("{{request.body}}!", &request_model("hi")).unwrap(), "hi!");

        engine.clear_templates();
        assert_eq!(engine.template_count(), 0);
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let mut engine = TemplateEngine::new();
        let err = engine.register_template("{{#if x}}never closed").unwrap_err();
        assert!(matches!(err, StubError::TemplateSyntax { .. }));
    }
}

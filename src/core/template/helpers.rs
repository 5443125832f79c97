use crate::utils::error::{Result, StubError};
use chrono::{Duration, Utc};
use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext, RenderError,
    RenderErrorReason, Renderable, ScopedJson,
};
use serde_json::{Map, Value};
use std::fmt::Write;
use uuid::Uuid;

/// helper 收到的參數；區塊形式呼叫時 `block` 為已渲染的區塊內容
#[derive(Debug)]
pub struct HelperArgs<'a> {
    pub name: &'a str,
    pub params: Vec<Value>,
    pub hash: Map<String, Value>,
    pub block: Option<String>,
}

impl<'a> HelperArgs<'a> {
    fn collect<'reg: 'rc, 'rc>(
        h: &'a Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
    ) -> std::result::Result<Self, RenderError> {
        let block = match h.template() {
            Some(template) => Some(template.renders(r, ctx, rc)?),
            None => None,
        };
        Ok(Self {
            name: h.name(),
            params: h.params().iter().map(|p| p.value().clone()).collect(),
            hash: h
                .hash()
                .iter()
                .map(|(key, p)| (key.to_string(), p.value().clone()))
                .collect(),
            block,
        })
    }

    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }

    pub fn required(&self, index: usize) -> Result<&Value> {
        self.params.get(index).ok_or_else(|| {
            StubError::render(format!(
                "helper '{}' expects at least {} parameter(s)",
                self.name,
                index + 1
            ))
        })
    }

    pub fn hash_str(&self, key: &str) -> Option<&str> {
        self.hash.get(key).and_then(Value::as_str)
    }

    pub fn hash_flag(&self, key: &str) -> bool {
        self.hash.get(key).is_some_and(|v| is_truthy(v, true))
    }
}

fn render_error(error: StubError) -> RenderError {
    RenderErrorReason::Other(error.to_string()).into()
}

/// 把回傳 JSON 值的函式包成 Handlebars helper。
///
/// 當成子運算式時直接回傳值；直接輸出時寫出字串形式，
/// 帶 `assign='name'` 時改為存成範本變數、不輸出。
pub struct ValueHelper<F>(pub F);

impl<F> HelperDef for ValueHelper<F>
where
    F: Fn(&HelperArgs<'_>) -> Result<Value> + Send + Sync,
{
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
    ) -> std::result::Result<ScopedJson<'rc>, RenderError> {
        let args = HelperArgs::collect(h, r, ctx, rc)?;
        let value = (self.0)(&args).map_err(render_error)?;
        Ok(ScopedJson::Derived(value))
    }

    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let args = HelperArgs::collect(h, r, ctx, rc)?;
        let value = (self.0)(&args).map_err(render_error)?;
        match args.hash_str("assign") {
            Some(name) => assign_variable(name, value, ctx, rc),
            None => {
                out.write(&stringify(&value))?;
                Ok(())
            }
        }
    }
}

/// 在目前的 context 根層加入變數，之後的標籤可直接用名稱取用
fn assign_variable<'reg: 'rc, 'rc>(
    name: &str,
    value: Value,
    ctx: &'rc Context,
    rc: &mut RenderContext<'reg, 'rc>,
) -> HelperResult {
    let mut scope = rc.context().as_deref().unwrap_or(ctx).clone();
    match scope.data_mut() {
        Value::Object(map) => {
            map.insert(name.to_string(), value);
        }
        _ => {
            return Err(RenderErrorReason::Other(format!(
                "assign: cannot store '{}' outside an object context",
                name
            ))
            .into());
        }
    }
    rc.set_context(scope);
    Ok(())
}

/// `{{#assign 'name'}}...{{/assign}}` 存下去頭尾空白的區塊內容；
/// `{{assign 'name' value}}` 直接存值
pub struct AssignHelper;

impl HelperDef for AssignHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        _out: &mut dyn Output,
    ) -> HelperResult {
        let name = h
            .param(0)
            .and_then(|p| p.value().as_str())
            .map(str::to_string)
            .ok_or_else(|| RenderErrorReason::Other("assign expects a variable name".to_string()))?;

        let value = match h.template() {
            Some(template) => Value::String(template.renders(r, ctx, rc)?.trim().to_string()),
            None => h.param(1).map(|p| p.value().clone()).unwrap_or(Value::Null),
        };
        assign_variable(&name, value, ctx, rc)
    }
}

pub fn register_builtins(registry: &mut Handlebars<'static>) {
    registry.register_helper("assign", Box::new(AssignHelper));
    registry.register_helper("val", Box::new(ValueHelper(val)));
    registry.register_helper("jsonMerge", Box::new(ValueHelper(json_merge)));
    registry.register_helper("formatJson", Box::new(ValueHelper(format_json)));
    registry.register_helper("parseJson", Box::new(ValueHelper(parse_json)));
    registry.register_helper("jsonPath", Box::new(ValueHelper(json_path_helper)));
    registry.register_helper("size", Box::new(ValueHelper(size)));
    registry.register_helper("eq", Box::new(ValueHelper(eq)));
    registry.register_helper("neq", Box::new(ValueHelper(neq)));
    registry.register_helper("not", Box::new(ValueHelper(not)));
    registry.register_helper("and", Box::new(ValueHelper(and)));
    registry.register_helper("or", Box::new(ValueHelper(or)));
    registry.register_helper("contains", Box::new(ValueHelper(contains)));
    registry.register_helper(
        "trim",
        Box::new(ValueHelper(|args: &HelperArgs<'_>| map_text(args, |s| s.trim().to_string()))),
    );
    registry.register_helper(
        "upper",
        Box::new(ValueHelper(|args: &HelperArgs<'_>| map_text(args, str::to_uppercase))),
    );
    registry.register_helper(
        "lower",
        Box::new(ValueHelper(|args: &HelperArgs<'_>| map_text(args, str::to_lowercase))),
    );
    registry.register_helper("randomValue", Box::new(ValueHelper(random_value)));
    registry.register_helper("now", Box::new(ValueHelper(now)));
}

/// Handlebars 的真假值：null、false、空字串、空陣列、0（除非 includeZero）為假
pub fn is_truthy(value: &Value, include_zero: bool) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => include_zero || n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// 輸出到範本時的字串形式
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// 字串視為 JSON 文字並解析，其他值原樣使用
fn as_json(helper: &str, value: &Value) -> Result<Value> {
    match value {
        Value::String(text) => serde_json::from_str(text.trim())
            .map_err(|e| StubError::render(format!("{}: invalid JSON input: {}", helper, e))),
        other => Ok(other.clone()),
    }
}

fn val(args: &HelperArgs<'_>) -> Result<Value> {
    match args.param(0) {
        Some(value) if !value.is_null() => Ok(value.clone()),
        _ => Ok(args.hash.get("default").cloned().unwrap_or(Value::Null)),
    }
}

fn deep_merge(base: &mut Map<String, Value>, other: Map<String, Value>) {
    for (key, value) in other {
        let both_objects = matches!(
            (base.get(&key), &value),
            (Some(Value::Object(_)), Value::Object(_))
        );
        if !both_objects {
            base.insert(key, value);
            continue;
        }
        if let (Some(Value::Object(existing)), Value::Object(incoming)) = (base.get_mut(&key), value) {
            deep_merge(existing, incoming);
        }
    }
}

fn remove_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(remove_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(remove_nulls),
        _ => {}
    }
}

fn json_merge(args: &HelperArgs<'_>) -> Result<Value> {
    let base = as_json("jsonMerge", args.required(0)?)?;
    let other = as_json("jsonMerge", args.required(1)?)?;

    let (Value::Object(mut base), Value::Object(other)) = (base, other) else {
        return Err(StubError::render("jsonMerge: both parameters must be JSON objects"));
    };
    deep_merge(&mut base, other);

    let mut merged = Value::Object(base);
    if args.hash_flag("removeNulls") {
        remove_nulls(&mut merged);
    }
    Ok(Value::String(serde_json::to_string_pretty(&merged)?))
}

fn format_json(args: &HelperArgs<'_>) -> Result<Value> {
    let input = match (args.param(0), &args.block) {
        (Some(value), _) => value.clone(),
        (None, Some(content)) => Value::String(content.clone()),
        (None, None) => {
            return Err(StubError::render("formatJson expects a value or a block"));
        }
    };
    let parsed = as_json("formatJson", &input)?;

    let formatted = match args.hash_str("format").unwrap_or("pretty") {
        "pretty" => serde_json::to_string_pretty(&parsed)?,
        "compact" => serde_json::to_string(&parsed)?,
        other => {
            return Err(StubError::render(format!(
                "formatJson: unknown format '{}', expected 'pretty' or 'compact'",
                other
            )));
        }
    };
    Ok(Value::String(formatted))
}

fn parse_json(args: &HelperArgs<'_>) -> Result<Value> {
    as_json("parseJson", args.required(0)?)
}

/// 單一結果直接回傳，多個結果包成陣列，找不到則為 null
fn json_path_helper(args: &HelperArgs<'_>) -> Result<Value> {
    let document = as_json("jsonPath", args.required(0)?)?;
    let path = args
        .required(1)?
        .as_str()
        .ok_or_else(|| StubError::render("jsonPath: the path must be a string"))?;
    let selected = jsonpath_lib::select(&document, path)
        .map_err(|e| StubError::render(format!("jsonPath: invalid path '{}': {:?}", path, e)))?;
    Ok(match selected.as_slice() {
        [] => Value::Null,
        [single] => (*single).clone(),
        many => Value::Array(many.iter().map(|v| (*v).clone()).collect()),
    })
}

fn size(args: &HelperArgs<'_>) -> Result<Value> {
    let count = match args.required(0)? {
        Value::Null => 0,
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(s) => s.chars().count(),
        other => {
            return Err(StubError::render(format!("size: cannot measure {}", other)));
        }
    };
    Ok(Value::from(count))
}

/// 型別不同時以輸出字串比較，例如路徑片段 "42" 與數字 42
fn loosely_equal(a: &Value, b: &Value) -> bool {
    a == b || (!a.is_object() && !a.is_array() && stringify(a) == stringify(b))
}

fn eq(args: &HelperArgs<'_>) -> Result<Value> {
    Ok(Value::Bool(loosely_equal(args.required(0)?, args.required(1)?)))
}

fn neq(args: &HelperArgs<'_>) -> Result<Value> {
    Ok(Value::Bool(!loosely_equal(args.required(0)?, args.required(1)?)))
}

fn not(args: &HelperArgs<'_>) -> Result<Value> {
    Ok(Value::Bool(!is_truthy(args.required(0)?, false)))
}

fn and(args: &HelperArgs<'_>) -> Result<Value> {
    args.required(0)?;
    Ok(Value::Bool(args.params.iter().all(|v| is_truthy(v, false))))
}

fn or(args: &HelperArgs<'_>) -> Result<Value> {
    args.required(0)?;
    Ok(Value::Bool(args.params.iter().any(|v| is_truthy(v, false))))
}

fn contains(args: &HelperArgs<'_>) -> Result<Value> {
    let needle = args.required(1)?;
    let found = match args.required(0)? {
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        Value::Object(map) => map.contains_key(&stringify(needle)),
        haystack => stringify(haystack).contains(&stringify(needle)),
    };
    Ok(Value::Bool(found))
}

fn map_text(args: &HelperArgs<'_>, f: impl Fn(&str) -> String) -> Result<Value> {
    let input = match (args.param(0), &args.block) {
        (Some(value), _) => stringify(value),
        (None, Some(content)) => content.clone(),
        (None, None) => {
            return Err(StubError::render(format!("{} expects a value or a block", args.name)));
        }
    };
    Ok(Value::String(f(&input)))
}

fn random_value(args: &HelperArgs<'_>) -> Result<Value> {
    match args.hash_str("type").unwrap_or("UUID") {
        "UUID" => Ok(Value::String(Uuid::new_v4().to_string())),
        other => Err(StubError::render(format!("randomValue: unsupported type '{}'", other))),
    }
}

/// `offset='3 days'`、`offset='-10 minutes'`
fn parse_offset(raw: &str) -> Result<Duration> {
    let invalid = || StubError::render(format!("now: invalid offset '{}'", raw));
    let mut parts = raw.split_whitespace();
    let amount: i64 = parts.next().and_then(|n| n.parse().ok()).ok_or_else(invalid)?;
    let unit = parts.next().ok_or_else(invalid)?;
    let duration = match unit.trim_end_matches('s') {
        "second" => Duration::seconds(amount),
        "minute" => Duration::minutes(amount),
        "hour" => Duration::hours(amount),
        "day" => Duration::days(amount),
        "week" => Duration::weeks(amount),
        _ => return Err(invalid()),
    };
    Ok(duration)
}

fn now(args: &HelperArgs<'_>) -> Result<Value> {
    let mut timestamp = Utc::now();
    if let Some(offset) = args.hash_str("offset") {
        timestamp += parse_offset(offset)?;
    }

    match args.hash_str("format") {
        None => Ok(Value::String(timestamp.to_rfc3339())),
        Some("epoch") => Ok(Value::from(timestamp.timestamp_millis())),
        Some("unix") => Ok(Value::from(timestamp.timestamp())),
        Some(pattern) => {
            // chrono 遇到無效格式時 Display 會回傳錯誤，不能直接 to_string()
            let mut formatted = String::new();
            write!(formatted, "{}", timestamp.format(pattern))
                .map_err(|_| StubError::render(format!("now: invalid format '{}'", pattern)))?;
            Ok(Value::String(formatted))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(name: &'static str, params: Vec<Value>, hash: Value) -> HelperArgs<'static> {
        HelperArgs {
            name,
            params,
            hash: hash.as_object().cloned().unwrap_or_default(),
            block: None,
        }
    }

    #[test]
    fn test_json_merge_is_deep_and_overrides() {
        let merged = json_merge(&args(
            "jsonMerge",
            vec![
                json!(r#"{"id": null, "meta": {"a": 1, "b": 2}, "field": "x"}"#),
                json!({"id": 1, "meta": {"b": 3}}),
            ],
            json!({}),
        ))
        .unwrap();

        let parsed: Value = serde_json::from_str(merged.as_str().unwrap()).unwrap();
        assert_eq!(parsed, json!({"id": 1, "meta": {"a": 1, "b": 3}, "field": "x"}));
    }

    #[test]
    fn test_json_merge_remove_nulls_and_errors() {
        let merged = json_merge(&args(
            "jsonMerge",
            vec![json!({"a": null, "b": {"c": null, "d": 1}}), json!({})],
            json!({"removeNulls": true}),
        ))
        .unwrap();
        let parsed: Value = serde_json::from_str(merged.as_str().unwrap()).unwrap();
        assert_eq!(parsed, json!({"b": {"d": 1}}));

        assert!(json_merge(&args("jsonMerge", vec![json!("[1]"), json!({})], json!({}))).is_err());
        assert!(json_merge(&args("jsonMerge", vec![json!("{bad")], json!({}))).is_err());
    }

    #[test]
    fn test_format_json() {
        let compact = format_json(&args(
            "formatJson",
            vec![json!("{\n  \"a\": 1\n}")],
            json!({"format": "compact"}),
        ))
        .unwrap();
        assert_eq!(compact, json!(r#"{"a":1}"#));

        let pretty = format_json(&args("formatJson", vec![json!({"a": 1})], json!({}))).unwrap();
        assert_eq!(pretty, json!("{\n  \"a\": 1\n}"));

        assert!(format_json(&args("formatJson", vec![json!({})], json!({"format": "yaml"}))).is_err());
    }

    #[test]
    fn test_val_default_and_comparisons() {
        assert_eq!(val(&args("val", vec![Value::Null], json!({"default": "d"}))).unwrap(), json!("d"));
        assert_eq!(val(&args("val", vec![json!(3)], json!({"default": "d"}))).unwrap(), json!(3));

        assert_eq!(eq(&args("eq", vec![json!("42"), json!(42)], json!({}))).unwrap(), json!(true));
        assert_eq!(neq(&args("neq", vec![json!("a"), json!("b")], json!({}))).unwrap(), json!(true));
        assert_eq!(and(&args("and", vec![json!(true), json!("")], json!({}))).unwrap(), json!(false));
        assert_eq!(or(&args("or", vec![json!(0), json!("x")], json!({}))).unwrap(), json!(true));
        assert_eq!(not(&args("not", vec![json!([])], json!({}))).unwrap(), json!(true));
    }

    #[test]
    fn test_size_contains_and_json_path() {
        assert_eq!(size(&args("size", vec![json!([1, 2, 3])], json!({}))).unwrap(), json!(3));
        assert_eq!(size(&args("size", vec![json!("héllo")], json!({}))).unwrap(), json!(5));
        assert!(size(&args("size", vec![json!(true)], json!({}))).is_err());

        assert_eq!(
            contains(&args("contains", vec![json!(["a", "b"]), json!("b")], json!({}))).unwrap(),
            json!(true)
        );
        assert_eq!(
            json_path_helper(&args("jsonPath", vec![json!(r#"{"a":{"b":[5]}}"#), json!("$.a.b[0]")], json!({})))
                .unwrap(),
            json!(5)
        );
        assert_eq!(
            json_path_helper(&args("jsonPath", vec![json!({"a": [1, 2]}), json!("$.a[*]")], json!({})))
                .unwrap(),
            json!([1, 2])
        );
        assert_eq!(
            json_path_helper(&args("jsonPath", vec![json!({"a": 1}), json!("$.missing")], json!({})))
                .unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_now_and_random_value() {
        let epoch = now(&args("now", vec![], json!({"format": "epoch"}))).unwrap();
        assert!(epoch.as_i64().unwrap() > 0);

        let year = now(&args("now", vec![], json!({"format": "%Y", "offset": "1 days"}))).unwrap();
        assert_eq!(year.as_str().unwrap().len(), 4);

        assert!(now(&args("now", vec![], json!({"offset": "soon"}))).is_err());

        let uuid = random_value(&args("randomValue", vec![], json!({"type": "UUID"}))).unwrap();
        assert!(Uuid::parse_str(uuid.as_str().unwrap()).is_ok());
        assert!(random_value(&args("randomValue", vec![], json!({"type": "ALPHA"}))).is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(0), false));
        assert!(is_truthy(&json!(0), true));
        assert!(!is_truthy(&json!(""), false));
        assert!(is_truthy(&json!({}), false));
        assert_eq!(stringify(&json!(null)), "");
        assert_eq!(stringify(&json!({"a": [1]})), r#"{"a":[1]}"#);
    }
}

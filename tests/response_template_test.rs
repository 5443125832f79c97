use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stubforge::dsl::*;
use stubforge::MockServer;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Dto {
    id: Option<String>,
    field: String,
}

/// 靜態 JSON 回應
#[tokio::test]
async fn test_static_json_stub() -> Result<()> {
    let server = MockServer::start()?;
    let expected = Dto {
        id: Some(Uuid::new_v4().to_string()),
        field: "responseFromServer".to_string(),
    };
    server.stub_for(
        get(url_path_equal_to("/test")).will_return(ResponseDefinitionBuilder::ok_for_json(&expected)?),
    )?;

    let client = reqwest::Client::new();
    let response = client.get(server.url("/test")).send().await?;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
    let body: Dto = response.json().await?;
    assert_eq!(body, expected);
    Ok(())
}

/// 回應內容直接回傳請求內容
#[tokio::test]
async fn test_echo_request_body() -> Result<()> {
    let server = MockServer::start()?;
    server.stub_for(
        post(url_path_equal_to("/test")).will_return(
            a_response()
                .with_status(202)
                .with_body("{{request.body}}")
                .with_transformers(&["response-template"]),
        ),
    )?;

    let request_body = Dto {
        id: None,
        field: "responseFromServer".to_string(),
    };
    let client = reqwest::Client::new();
    let response = client
        .post(server.url("/test"))
        .body(serde_json::to_string(&request_body)?)
        .send()
        .await?;

    assert_eq!(response.status().as_u16(), 202);
    let body: Value = serde_json::from_str(&response.text().await?)?;
    assert_eq!(body, serde_json::to_value(&request_body)?);
    Ok(())
}

/// 在請求內容上合併新的欄位
#[tokio::test]
async fn test_merge_new_id_into_request_body() -> Result<()> {
    let server = MockServer::start()?;
    server.stub_for(
        post(url_path_equal_to("/test")).will_return(
            a_response()
                .with_status(202)
                .with_body(
                    r#"
{{val request.body assign='currentBody'}}
{{#assign 'newId'}}
{"id":  1}
{{/assign}}
{{jsonMerge currentBody newId}}
"#,
                )
                .with_transformers(&["response-template"]),
        ),
    )?;

    let request_body = Dto {
        id: None,
        field: "responseFromServer".to_string(),
    };
    let client = reqwest::Client::new();
    let response = client
        .post(server.url("/test"))
        .json(&request_body)
        .send()
        .await?;

    assert_eq!(response.status().as_u16(), 202);
    let body: Value = serde_json::from_str(&response.text().await?)?;
    assert_eq!(body["id"], 1);
    assert_eq!(body["field"], "responseFromServer");
    Ok(())
}

/// 合併後再以 compact 格式輸出
#[tokio::test]
async fn test_merge_and_format_compact() -> Result<()> {
    let server = MockServer::start()?;
    server.stub_for(
        post(url_path_equal_to("/test")).will_return(
            a_response()
                .with_status(202)
                .with_body(
                    r#"
{{val request.body assign='currentBody'}}
{{#assign 'newId'}}
{"id":  1, "field": "response"}
{{/assign}}
{{#assign 'extended'}}
  {{jsonMerge currentBody newId}}
{{/assign}}
{{formatJson extended format='compact'}}
"#,
                )
                .with_transformers(&["response-template"]),
        ),
    )?;

    let request_body = Dto {
        id: None,
        field: "request".to_string(),
    };
    let client = reqwest::Client::new();
    let response = client
        .post(server.url("/test"))
        .json(&request_body)
        .send()
        .await?;

    assert_eq!(response.status().as_u16(), 202);
    let text = response.text().await?;
    assert_eq!(text.trim(), r#"{"id":1,"field":"response"}"#);
    Ok(())
}

/// 範本可以讀取路徑、查詢參數、標頭與 transformer 參數
#[tokio::test]
async fn test_template_reads_request_parts() -> Result<()> {
    let server = MockServer::start()?;
    server.stub_for(
        get(url_path_matching("/users/[0-9]+")).will_return(
            a_response()
                .with_header("X-Request-Path", "{{request.path}}")
                .with_body(
                    "{{parameters.prefix}}-{{request.pathSegments.1}}-{{request.query.lang}}-{{request.headers.x-tenant}}",
                )
                .with_transformers(&["response-template"])
                .with_transformer_parameter("prefix", "user"),
        ),
    )?;

    let client = reqwest::Client::new();
    let response = client
        .get(server.url("/users/42?lang=de"))
        .header("X-Tenant", "acme")
        .send()
        .await?;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers().get("x-request-path").and_then(|v| v.to_str().ok()),
        Some("/users/42")
    );
    assert_eq!(response.text().await?, "user-42-de-acme");
    Ok(())
}

/// 沒有列出 response-template 的 stub 原樣輸出
#[tokio::test]
async fn test_template_not_applied_without_transformer() -> Result<()> {
    let server = MockServer::start()?;
    server.stub_for(post(url_equal_to("/raw")).will_return(ok().with_body("{{request.body}}")))?;

    let client = reqwest::Client::new();
    let response = client.post(server.url("/raw")).body("hello").send().await?;
    assert_eq!(response.text().await?, "{{request.body}}");
    Ok(())
}

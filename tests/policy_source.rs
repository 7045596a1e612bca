//! Remote and file policy sources against a mock HTTP server.

use llm_guardrails::{
    Direction, Error, EvaluationOptions, GuardrailEngine, PolicyAction, PolicySource,
};
use mockito::Matcher;
use std::io::Write;

const JSON_DOC: &str = r#"{
  "version": "7",
  "policies": [
    {
      "id": "no-secrets",
      "name": "No secrets",
      "description": "Blocks the word classified",
      "direction": "both",
      "action": "block",
      "severity": "high",
      "patterns": ["\\bclassified\\b"]
    }
  ]
}"#;

const YAML_DOC: &str = "version: '8'\npolicies:\n  - id: tone\n    name: Tone\n    description: Rude words\n    direction: outbound\n    action: warn\n    domains: [idiot]\n";

fn remote(url: String, api_key: Option<&str>) -> PolicySource {
    PolicySource::Remote {
        url,
        api_key: api_key.map(str::to_string),
    }
}

#[tokio::test]
async fn test_remote_json_with_bearer_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/policies")
        .match_header("authorization", "Bearer secret-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(JSON_DOC)
        .create_async()
        .await;

    let source = remote(format!("{}/policies", server.url()), Some("secret-token"));
    let document = source.load().await.unwrap();
    mock.assert_async().await;

    assert_eq!(document.version, "7");
    assert_eq!(document.policies.len(), 1);
    assert_eq!(document.policies[0].action, PolicyAction::Block);
}

#[tokio::test]
async fn test_remote_yaml_by_content_type() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/policies.yaml")
        .with_status(200)
        .with_header("content-type", "application/x-yaml")
        .with_body(YAML_DOC)
        .create_async()
        .await;

    let document = remote(format!("{}/policies.yaml", server.url()), None)
        .load()
        .await
        .unwrap();
    assert_eq!(document.version, "8");
    assert_eq!(document.policies[0].domains, vec!["idiot"]);
}

#[tokio::test]
async fn test_remote_http_error_is_source_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/policies")
        .with_status(503)
        .with_body("maintenance")
        .create_async()
        .await;

    let url = format!("{}/policies", server.url());
    let err = remote(url.clone(), None).load().await.unwrap_err();
    assert!(matches!(err, Error::PolicySource { ref source_name, .. } if *source_name == url));
    assert!(err.to_string().contains("503"));
    assert!(err.is_load_time());
}

#[tokio::test]
async fn test_remote_schema_violation_is_format_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/policies")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"version": "1", "policies": [{"id": "x"}]}"#)
        .create_async()
        .await;

    let err = remote(format!("{}/policies", server.url()), None)
        .load()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PolicyFormat { .. }));
}

#[tokio::test]
async fn test_engine_fails_to_build_from_unreachable_source() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Any)
        .with_status(404)
        .create_async()
        .await;

    let result = GuardrailEngine::builder()
        .with_policy_source(remote(format!("{}/missing", server.url()), None))
        .build()
        .await;
    assert!(matches!(result, Err(Error::PolicySource { .. })));
}

#[tokio::test]
async fn test_engine_merges_remote_and_file_sources() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/policies")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(JSON_DOC)
        .create_async()
        .await;

    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(YAML_DOC.as_bytes()).unwrap();

    let url = format!("{}/policies", server.url());
    let engine = GuardrailEngine::builder()
        .with_policy_source(remote(url.clone(), None))
        .with_policy_source(PolicySource::File(file.path().to_path_buf()))
        .build()
        .await
        .unwrap();

    let stats = engine.get_policy_stats();
    assert_eq!(stats.total_policies, 2);
    assert_eq!(stats.by_source.get(&url), Some(&1));
    assert_eq!(stats.versions.get(&url).map(String::as_str), Some("7"));

    let options = EvaluationOptions::default();
    let result = engine.evaluate("This is classified", Direction::Inbound, &options).await;
    assert!(result.blocked);

    let result = engine.evaluate_output("you idiot", &options).await;
    assert!(result.allowed);
    assert_eq!(result.triggered_policies, vec!["tone"]);
}

#[tokio::test]
async fn test_reload_from_remote() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/policies")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(JSON_DOC)
        .create_async()
        .await;

    let engine = GuardrailEngine::builder()
        .with_policy_source(PolicySource::Builtin)
        .build()
        .await
        .unwrap();
    assert!(engine.get_policy("pii-email").is_some());

    engine
        .reload_from(&remote(format!("{}/policies", server.url()), None))
        .await
        .unwrap();
    assert_eq!(engine.policy_ids(), vec!["no-secrets"]);
}

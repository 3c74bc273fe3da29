//! Integration tests for dual-scope uploads and scoped retrieval,
//! exercised against a mocked pinning service.

use pinstore::{ArtifactKind, PinClient, PinCredentials, Retriever, Scope, UploadOptions};

use model::RagScope;
use std::sync::Arc;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn credentials(tag: &str) -> PinCredentials {
    PinCredentials {
        api_key: format!("{tag}-key"),
        api_secret: format!("{tag}-secret"),
    }
}

async fn mock_pin_service(cid: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinning/pinFileToIPFS"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "IpfsHash": cid })),
        )
        .mount(&server)
        .await;
    server
}

fn client_for(server: &MockServer, dir: &std::path::Path) -> PinClient {
    PinClient::new(dir, Some(credentials("team")), Some(credentials("community")))
        .with_endpoints(server.uri(), server.uri())
}

#[tokio::test]
async fn test_community_upload_lands_only_in_community_registry() {
    let dir = tempfile::tempdir().unwrap();
    let server = mock_pin_service("bafycommunity1").await;
    let client = client_for(&server, dir.path());

    let receipt = client
        .upload(
            "hello",
            ArtifactKind::Prompt,
            Scope::Community,
            UploadOptions {
                user_id: Some("u1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(receipt.scope, Scope::Community);
    assert_eq!(receipt.registry_entry.content_hash, HELLO_SHA256);
    assert_eq!(receipt.artifact_id, format!("prompt-{}", &HELLO_SHA256[..16]));
    assert_eq!(receipt.registry_entry.uploader_id.as_deref(), Some("u1"));
    assert_eq!(receipt.ipfs_url, "ipfs://bafycommunity1");

    // The entry is only in the community registry file.
    let community = client.registry(Scope::Community);
    let team = client.registry(Scope::Team);
    assert_eq!(community.len(), 1);
    assert!(team.is_empty());
    assert!(dir.path().join("cid-registry-community.json").exists());
    assert!(!dir.path().join("cid-registry-team.json").exists());
}

#[tokio::test]
async fn test_team_upload_never_carries_uploader_id() {
    let dir = tempfile::tempdir().unwrap();
    let server = mock_pin_service("bafyteam1").await;
    let client = client_for(&server, dir.path());

    let receipt = client
        .upload(
            "contract source",
            ArtifactKind::Contract,
            Scope::Team,
            UploadOptions {
                user_id: Some("u1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(receipt.registry_entry.uploader_id.is_none());
    assert_eq!(client.registry(Scope::Team).len(), 1);
    assert!(client.registry(Scope::Community).is_empty());
}

#[tokio::test]
async fn test_same_bytes_twice_is_content_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let server = mock_pin_service("bafysame").await;
    let client = client_for(&server, dir.path());

    let first = client
        .upload("hello", ArtifactKind::Prompt, Scope::Team, UploadOptions::default())
        .await
        .unwrap();
    let second = client
        .upload("hello", ArtifactKind::Prompt, Scope::Team, UploadOptions::default())
        .await
        .unwrap();

    assert_eq!(first.artifact_id, second.artifact_id);
    assert_eq!(
        first.registry_entry.content_hash,
        second.registry_entry.content_hash
    );
    // One key, content-identical: the second upload is a no-op in content terms.
    assert_eq!(client.registry(Scope::Team).len(), 1);
}

#[tokio::test]
async fn test_upload_failure_is_terminal_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinning/pinFileToIPFS"))
        .respond_with(ResponseTemplate::new(500).set_body_string("pin backend down"))
        .mount(&server)
        .await;
    let client = client_for(&server, dir.path());

    let err = client
        .upload("hello", ArtifactKind::Prompt, Scope::Team, UploadOptions::default())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("500"));
    assert!(client.registry(Scope::Team).is_empty());
    assert!(client.registry(Scope::Community).is_empty());
}

#[tokio::test]
async fn test_official_only_retrieval_filters_out_community() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;

    // Uploads return distinct CIDs per scope via two sequential mounts.
    Mock::given(method("POST"))
        .and(path("/pinning/pinFileToIPFS"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "IpfsHash": "bafyteamerc20" })),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pinning/pinFileToIPFS"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "IpfsHash": "bafycommunityerc20" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/ipfs/.+"))
        .respond_with(ResponseTemplate::new(200).set_body_string("contract Template {}"))
        .mount(&server)
        .await;

    let client = Arc::new(client_for(&server, dir.path()));

    let erc20_options = || UploadOptions {
        description: Some("erc20 token template".to_string()),
        tags: vec!["erc20".to_string(), "token".to_string()],
        ..Default::default()
    };
    client
        .upload("team template", ArtifactKind::Contract, Scope::Team, erc20_options())
        .await
        .unwrap();
    client
        .upload(
            "community template",
            ArtifactKind::Contract,
            Scope::Community,
            erc20_options(),
        )
        .await
        .unwrap();

    let retriever = Retriever::new(client.clone());

    // Official-only: the equally matching community artifact is filtered out.
    let official = retriever
        .retrieve("erc20 token template", RagScope::OfficialOnly, 5)
        .await;
    assert!(official.status.context_retrieved);
    assert_eq!(official.status.sources, vec!["bafyteamerc20".to_string()]);
    let team_cids: Vec<String> = client
        .registry(Scope::Team)
        .entries()
        .values()
        .map(|e| e.cid.clone())
        .collect();
    assert!(official.status.sources.iter().all(|s| team_cids.contains(s)));

    // Community-allowed sees both.
    let open = retriever
        .retrieve("erc20 token template", RagScope::CommunityAllowed, 5)
        .await;
    assert_eq!(open.status.sources.len(), 2);
}

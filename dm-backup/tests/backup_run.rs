use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::PathBuf;

use dm_backup::cli::{run, Cli, Commands};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_json(server: &MockServer, route: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn version(id: &str, name: &str, storage: String) -> serde_json::Value {
    json!({
        "type": "versions",
        "id": id,
        "attributes": { "displayName": name, "versionNumber": 1 },
        "relationships": { "storage": { "meta": { "link": { "href": storage } } } }
    })
}

/// One hub, one project: `Project Files/Plans/A1: Ground.pdf` plus a top-level `readme.txt`
/// and one item whose download fails.
async fn service() -> MockServer {
    let server = MockServer::start().await;
    let uri = server.uri();

    mount_json(&server, "/project/v1/hubs", json!({
        "data": [{ "type": "hubs", "id": "h1", "attributes": { "name": "Studio" } }]
    }))
    .await;
    mount_json(&server, "/project/v1/hubs/h1/projects", json!({
        "data": [{ "type": "projects", "id": "p1", "attributes": { "name": "Harbour Bridge" } }]
    }))
    .await;
    mount_json(&server, "/project/v1/hubs/h1/projects/p1/topFolders", json!({
        "data": [{ "type": "folders", "id": "f-root", "attributes": { "name": "Project Files" } }]
    }))
    .await;
    mount_json(&server, "/data/v1/projects/p1/folders/f-root/contents", json!({
        "data": [
            { "type": "items", "id": "i-readme", "attributes": { "displayName": "readme.txt" } },
            { "type": "folders", "id": "f-plans", "attributes": { "name": "Plans" } },
            { "type": "items", "id": "i-gone", "attributes": { "displayName": "gone.dwg" } }
        ]
    }))
    .await;
    mount_json(&server, "/data/v1/projects/p1/folders/f-plans/contents", json!({
        "data": [{ "type": "items", "id": "i-plan", "attributes": { "displayName": "A1: Ground.pdf" } }]
    }))
    .await;
    mount_json(&server, "/data/v1/projects/p1/items/i-readme/versions", json!({
        "data": [version("v-readme", "readme.txt", format!("{uri}/storage/readme"))]
    }))
    .await;
    mount_json(&server, "/data/v1/projects/p1/items/i-plan/versions", json!({
        "data": [version("v-plan", "A1: Ground.pdf", format!("{uri}/storage/plan"))]
    }))
    .await;
    mount_json(&server, "/data/v1/projects/p1/items/i-gone/versions", json!({
        "data": [version("v-gone", "gone.dwg", format!("{uri}/storage/gone"))]
    }))
    .await;

    Mock::given(method("GET"))
        .and(path("/storage/readme"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"read me first".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 ground floor".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    server
}

fn write_config(dir: &TempDir, base_url: &str) -> PathBuf {
    let config = dir.path().join("config.yaml");
    std::fs::write(
        &config,
        format!("service:\n  base_url: {base_url}\nbackup:\n  listing_timeout_ms: 5000\n  version_timeout_ms: 5000\n"),
    )
    .expect("write config");
    config
}

fn read_zip(path: &std::path::Path) -> BTreeMap<String, Vec<u8>> {
    let bytes = std::fs::read(path).expect("archive exists");
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip archive");
    let mut entries = BTreeMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).expect("readable entry");
        let mut content = Vec::new();
        file.read_to_end(&mut content).expect("entry decompresses");
        entries.insert(file.name().to_string(), content);
    }
    entries
}

#[tokio::test]
async fn full_backup_writes_archive_mirroring_the_tree() {
    let server = service().await;
    let dir = TempDir::new().expect("temp dir");
    let output = dir.path().join("full.zip");

    run(Cli {
        command: Commands::Backup {
            config: Some(write_config(&dir, &server.uri())),
            output: output.clone(),
            hub_id: None,
            project_id: None,
            token: Some("test-token".into()),
        },
    })
    .await
    .expect("backup succeeds despite one failing item");

    let entries = read_zip(&output);
    let names: Vec<&str> = entries.keys().map(String::as_str).collect();
    assert_eq!(
        names,
        vec![
            "Studio/Harbour Bridge/Project Files/Plans/A1_ Ground.pdf",
            "Studio/Harbour Bridge/Project Files/readme.txt",
        ]
    );
    assert_eq!(
        entries["Studio/Harbour Bridge/Project Files/readme.txt"],
        b"read me first".to_vec()
    );
}

#[tokio::test]
async fn scoped_backup_roots_entries_at_the_project() {
    let server = service().await;
    let dir = TempDir::new().expect("temp dir");
    let output = dir.path().join("scoped.zip");

    run(Cli {
        command: Commands::Backup {
            config: Some(write_config(&dir, &server.uri())),
            output: output.clone(),
            hub_id: Some("h1".into()),
            project_id: Some("p1".into()),
            token: Some("test-token".into()),
        },
    })
    .await
    .expect("scoped backup succeeds");

    let entries = read_zip(&output);
    assert!(entries.contains_key("Harbour Bridge/Project Files/Plans/A1_ Ground.pdf"));
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn unknown_project_fails_without_writing_a_file() {
    let server = service().await;
    let dir = TempDir::new().expect("temp dir");
    let output = dir.path().join("never.zip");

    let err = run(Cli {
        command: Commands::Backup {
            config: Some(write_config(&dir, &server.uri())),
            output: output.clone(),
            hub_id: Some("h1".into()),
            project_id: Some("p-unknown".into()),
            token: Some("test-token".into()),
        },
    })
    .await
    .expect_err("unknown project must fail");

    assert!(err.to_string().contains("p-unknown"), "unexpected error: {err}");
    assert!(!output.exists());
}

#[tokio::test]
async fn hub_listing_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/project/v1/hubs"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("temp dir");
    let output = dir.path().join("never.zip");

    let result = run(Cli {
        command: Commands::Backup {
            config: Some(write_config(&dir, &server.uri())),
            output: output.clone(),
            hub_id: None,
            project_id: None,
            token: Some("test-token".into()),
        },
    })
    .await;

    assert!(result.is_err());
    assert!(!output.exists());
}

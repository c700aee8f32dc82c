use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use lexicon_core::{CompatMode, IndexPaths};
use lexicon_server::{build_app, load_catalog, ServerConfig};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_sources(dir: &Path) -> Vec<std::path::PathBuf> {
    let tsv = dir.join("garden.tsv");
    fs::write(&tsv, "rose\ta fragrant red flower\ntulip\ta spring flower\nthorn\tsharp point on a rose stem\n").unwrap();
    let json = dir.join("kitchen.json");
    fs::write(
        &json,
        r#"{"name":"Kitchen","description":"cooking terms","entries":[
            {"word":"Roast","definition":"cook with dry heat"},
            {"word":"rose","definition":"wine with a pink colour"}]}"#,
    )
    .unwrap();
    vec![tsv, json]
}

fn app(dir: &Path) -> Router {
    let config = ServerConfig { sources: write_sources(dir), workers: 2, ..Default::default() };
    build_app(load_catalog(&config).unwrap())
}

async fn call(app: Router, uri: &str) -> (StatusCode, Bytes) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    let resp = tower::ServiceExt::oneshot(app, req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn call_json(app: Router, uri: &str) -> Value {
    let (status, body) = call(app, uri).await;
    assert_eq!(status, StatusCode::OK, "{uri}: {}", String::from_utf8_lossy(&body));
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let dir = tempdir().unwrap();
    let (status, body) = call(app(dir.path()), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn search_returns_ranked_highlighted_hits() {
    let dir = tempdir().unwrap();
    let json = call_json(app(dir.path()), "/search?q=flower&k=5").await;
    let arr = json["results"].as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(json["total_hits"], 2);
    assert_eq!(arr[0]["word"], "rose");
    assert_eq!(arr[0]["source"], "garden");
    assert_eq!(arr[0]["snippet"], "a fragrant red <em>flower</em>");
    assert_eq!(arr[1]["word"], "tulip");
    assert!(arr[0]["score"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn lookup_modes() {
    let dir = tempdir().unwrap();
    let app = app(dir.path());

    let prefix = call_json(app.clone(), "/lookup?q=ro").await;
    assert_eq!(prefix["mode"], "prefix");
    let words: Vec<&str> = prefix["results"].as_array().unwrap().iter().map(|r| r["word"].as_str().unwrap()).collect();
    assert_eq!(words, ["Roast", "rose"]);
    assert_eq!(prefix["results"][1]["sources"], serde_json::json!(["garden", "Kitchen"]));

    let fuzzy = call_json(app.clone(), "/lookup?q=tulp&mode=fuzzy").await;
    assert_eq!(fuzzy["results"][0]["word"], "tulip");

    let wildcard = call_json(app.clone(), "/lookup?q=t*n&mode=wildcard").await;
    assert_eq!(wildcard["results"][0]["word"], "thorn");

    let (status, _) = call(app, "/lookup?q=x&mode=phonetic").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn word_lists_definitions_from_every_source() {
    let dir = tempdir().unwrap();
    let app = app(dir.path());
    let json = call_json(app.clone(), "/word/ROSE").await;
    let defs = json["definitions"].as_array().unwrap();
    assert_eq!(defs.len(), 2);
    assert_eq!(defs[0]["source"], "garden");
    assert_eq!(defs[1]["definition"], "wine with a pink colour");

    let (status, _) = call(app, "/word/lily").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_report_sources_and_fulltext() {
    let dir = tempdir().unwrap();
    let json = call_json(app(dir.path()), "/stats").await;
    assert_eq!(json["words"], 4);
    assert_eq!(json["sources"][1]["name"], "Kitchen");
    assert_eq!(json["sources"][1]["description"], "cooking terms");
    assert_eq!(json["fulltext"]["docs"], 5);
    assert!(json["signature"].as_str().unwrap().contains("|N=2;garden|3|rose|thorn|"));
}

#[tokio::test]
async fn persisted_index_is_reused_when_signature_matches() {
    let dir = tempdir().unwrap();
    let sources = write_sources(dir.path());
    let out = dir.path().join("build");
    fs::create_dir(&out).unwrap();
    let config = ServerConfig { sources, index_dir: Some(out.clone()), compat: CompatMode::Strict, ..Default::default() };

    let mut catalog = load_catalog(&config).unwrap();
    assert_eq!(catalog.fulltext().unwrap().version(), None);
    catalog.save_fulltext(IndexPaths::new(&out).fulltext()).unwrap();

    let reloaded = load_catalog(&config).unwrap();
    let stats = reloaded.fulltext_stats().unwrap();
    assert_eq!(stats.version, Some(3));
    assert_eq!(stats.pairs_decompressed, 0);

    let json = call_json(build_app(reloaded), "/search?q=rose").await;
    let words: Vec<&str> = json["results"].as_array().unwrap().iter().map(|r| r["word"].as_str().unwrap()).collect();
    assert_eq!(words, ["thorn"]);
}

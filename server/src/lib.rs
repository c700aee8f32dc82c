use anyhow::{bail, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use lexicon_core::{
    source_paths_from_env, Catalog, CatalogConfig, CompatMode, Definition, FullTextStats, FulltextOrigin, IndexPaths,
    LookupMode, SourceRegistry, SOURCES_ENV,
};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const MAX_K: usize = 100;
const SNIPPET_BEFORE: usize = 60;
const SNIPPET_LEN: usize = 200;

/// Where the server gets its dictionaries and persisted indexes from.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub sources: Vec<PathBuf>,
    pub scan_dir: Option<PathBuf>,
    /// Build directory holding a `fulltext.udft` to reuse when the policy accepts it.
    pub index_dir: Option<PathBuf>,
    pub workers: usize,
    pub compat: CompatMode,
}

/// Load every configured source and make the full-text index queryable.
pub fn load_catalog(config: &ServerConfig) -> Result<Catalog> {
    let mut catalog = Catalog::new(
        SourceRegistry::with_defaults(),
        CatalogConfig { fulltext_workers: config.workers, compat: config.compat },
    );
    let mut paths = config.sources.clone();
    if let Some(dir) = &config.scan_dir {
        paths.extend(catalog.registry().discover(dir));
    }
    if paths.is_empty() {
        paths = source_paths_from_env();
    }
    if paths.is_empty() {
        bail!("no dictionary sources configured; pass --source/--scan-dir or set {SOURCES_ENV}");
    }
    catalog.add_sources(&paths)?;

    match &config.index_dir {
        Some(dir) => match catalog.load_or_build_fulltext(IndexPaths::new(dir).fulltext()) {
            FulltextOrigin::Loaded { acceptance } => tracing::info!(?acceptance, "reusing persisted full-text index"),
            FulltextOrigin::Rebuilt { reason } => tracing::info!(%reason, "full-text index rebuilt from sources"),
        },
        None => catalog.build_fulltext(),
    }
    Ok(catalog)
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
}

#[derive(Deserialize)]
pub struct LookupParams {
    pub q: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default = "default_lookup_k")]
    pub k: usize,
}
fn default_lookup_k() -> usize { 20 }

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize { 10 }

#[derive(Serialize)]
pub struct LookupResponse {
    pub query: String,
    pub mode: LookupMode,
    pub results: Vec<LookupHit>,
}

#[derive(Serialize)]
pub struct LookupHit {
    pub word: String,
    pub sources: Vec<String>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub source: String,
    pub word: String,
    pub score: f64,
    pub snippet: String,
}

#[derive(Serialize)]
pub struct WordResponse {
    pub word: String,
    pub definitions: Vec<Definition>,
}

#[derive(Serialize)]
pub struct SourceSummary {
    pub name: String,
    pub kind: &'static str,
    pub words: usize,
    pub description: Option<String>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub words: usize,
    pub sources: Vec<SourceSummary>,
    pub fulltext: Option<FullTextStats>,
    pub signature: String,
}

type ApiError = (StatusCode, String);

pub fn build_app(catalog: Catalog) -> Router {
    let app_state = AppState { catalog: Arc::new(catalog) };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/lookup", get(lookup_handler))
        .route("/search", get(search_handler))
        .route("/word/:word", get(word_handler))
        .route("/stats", get(stats_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn lookup_handler(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> Result<Json<LookupResponse>, ApiError> {
    let mode = match params.mode.as_deref() {
        None | Some("") => LookupMode::default(),
        Some(m) => m.parse::<LookupMode>().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?,
    };
    let k = params.k.clamp(1, MAX_K);
    let engine = state.catalog.engine();
    let results = state
        .catalog
        .lookup(mode, &params.q, k)
        .into_iter()
        .map(|word| {
            let sources = engine.dictionaries_for_word(&word);
            LookupHit { word, sources }
        })
        .collect();
    Ok(Json(LookupResponse { query: params.q, mode, results }))
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let k = params.k.clamp(1, MAX_K);
    let highlighter = highlighter(&params.q);
    let results: Vec<SearchHit> = state
        .catalog
        .fulltext_search(&params.q, k)
        .into_iter()
        .map(|hit| SearchHit {
            snippet: snippet(&hit.definition, highlighter.as_ref()),
            source: hit.source,
            word: hit.word,
            score: hit.score,
        })
        .collect();
    let elapsed = start.elapsed();
    Json(SearchResponse { query: params.q, took_s: elapsed.as_secs_f64(), total_hits: results.len(), results })
}

pub async fn word_handler(
    State(state): State<AppState>,
    Path(word): Path<String>,
) -> Result<Json<WordResponse>, ApiError> {
    let definitions = state.catalog.definitions(&word);
    if definitions.is_empty() {
        return Err((StatusCode::NOT_FOUND, format!("no definition for {word:?}")));
    }
    Ok(Json(WordResponse { word, definitions }))
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let catalog = &state.catalog;
    let sources = catalog
        .sources()
        .iter()
        .map(|s| SourceSummary {
            name: s.name.clone(),
            kind: s.data.kind(),
            words: s.word_count(),
            description: s.data.description().map(str::to_string),
        })
        .collect();
    Json(StatsResponse {
        words: catalog.engine().word_count(),
        sources,
        fulltext: catalog.fulltext_stats(),
        signature: catalog.signature().to_string(),
    })
}

/// Case-insensitive matcher for any whitespace-separated query term.
fn highlighter(query: &str) -> Option<Regex> {
    let alternation: Vec<String> = query.split_whitespace().map(regex::escape).collect();
    if alternation.is_empty() {
        return None;
    }
    RegexBuilder::new(&alternation.join("|")).case_insensitive(true).build().ok()
}

/// A window of `text` around the first matching term, with matches wrapped in `<em>`.
fn snippet(text: &str, highlighter: Option<&Regex>) -> String {
    let Some(re) = highlighter else {
        return text.chars().take(SNIPPET_LEN).collect();
    };
    let (start, end) = match re.find(text) {
        Some(m) => {
            let start = char_boundary(text, m.start().saturating_sub(SNIPPET_BEFORE));
            (start, char_boundary(text, (start + SNIPPET_LEN).min(text.len())))
        }
        None => (0, char_boundary(text, SNIPPET_LEN.min(text.len()))),
    };
    re.replace_all(&text[start..end], "<em>$0</em>").into_owned()
}

fn char_boundary(text: &str, mut i: usize) -> usize {
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

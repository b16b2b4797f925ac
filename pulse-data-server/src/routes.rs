use crate::{error::ApiError, state::AppState};
use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use indexmap::IndexMap;
use pulse_data::{
    Symbol,
    ingest::{AssetSnapshot, Fill, FillStats},
    series::{Horizon, SeriesPoint},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_FILLS_LIMIT: usize = 100;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chart-cache", post(chart_cache))
        .route("/series", get(series))
        .route("/assets", get(assets))
        .route("/fills", get(fills).delete(clear_fills))
        .route("/health", get(health))
        .with_state(state)
}

// ── Chart cache ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChartCacheRequest {
    symbols: Vec<String>,
    #[serde(default)]
    range: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChartCacheResponse {
    data: IndexMap<Symbol, Vec<f64>>,
    meta: ChartCacheMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartCacheMeta {
    range: Horizon,
    symbol_count: usize,
    generated_at: i64,
}

/// `POST /chart-cache`: batch series query. Unknown ranges fall back to the default horizon.
async fn chart_cache(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChartCacheRequest>, JsonRejection>,
) -> Result<Json<ChartCacheResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        debug!(%rejection, "rejected chart-cache body");
        ApiError::BadRequest("symbols array is required".to_string())
    })?;

    let range = Horizon::normalize(request.range.as_deref().unwrap_or_default());
    let data = state.cache.query(request.symbols, range).await?;

    Ok(Json(ChartCacheResponse {
        meta: ChartCacheMeta {
            range,
            symbol_count: data.len(),
            generated_at: state.clock.now_ms(),
        },
        data,
    }))
}

// ── Live series ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    symbol: String,
    #[serde(default)]
    range: Option<String>,
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    symbol: String,
    range: Horizon,
    points: Vec<SeriesPoint>,
}

/// `GET /series`: live horizon store read.
async fn series(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<SeriesResponse>, ApiError> {
    let range = match query.range.as_deref() {
        Some(id) => id.parse::<Horizon>()?,
        None => Horizon::default(),
    };

    if !state.book.contains(&query.symbol) {
        return Err(ApiError::NotFound(format!("no series for {}", query.symbol)));
    }

    Ok(Json(SeriesResponse {
        points: state.book.read_points(&query.symbol, range, query.count),
        symbol: query.symbol,
        range,
    }))
}

// ── Assets & fills ───────────────────────────────────────────────────────

/// `GET /assets`: latest published snapshot.
async fn assets(State(state): State<Arc<AppState>>) -> Json<AssetSnapshot> {
    Json(AssetSnapshot::clone(&state.latest_snapshot()))
}

#[derive(Debug, Deserialize)]
pub struct FillsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct FillsResponse {
    stats: FillStats,
    fills: Vec<Fill>,
}

/// `GET /fills`: fill statistics and the most recent fills, newest first.
async fn fills(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FillsQuery>,
) -> Json<FillsResponse> {
    let tape = state.fills.lock();
    Json(FillsResponse {
        stats: tape.stats(),
        fills: tape.recent(query.limit.unwrap_or(DEFAULT_FILLS_LIMIT)),
    })
}

/// `DELETE /fills`: forget every fill and reset the statistics.
async fn clear_fills(State(state): State<Arc<AppState>>) -> StatusCode {
    state.fills.lock().clear(state.clock.now_ms());
    info!("fills tape cleared");
    StatusCode::NO_CONTENT
}

// ── Health ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: &'static str,
    uptime_ms: i64,
    live_symbols: usize,
    published_assets: usize,
    cached_series: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_ms: state.clock.now_ms() - state.started_at,
        live_symbols: state.book.len(),
        published_assets: state.latest_snapshot().assets.len(),
        cached_series: state.cache.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, header},
    };
    use pulse_data::{
        cache::ChartCache,
        candle::{Candle, CandleRequest, HistoricalSource},
        clock::ManualClock,
        config::CacheConfig,
        error::DataError,
        ingest::FillTape,
        series::SeriesBook,
    };
    use serde_json::{Value, json};
    use tokio::sync::watch;
    use tower::ServiceExt;

    /// Serves `[5, 6]` for "B" and fails every other symbol.
    struct MockSource;

    #[async_trait]
    impl HistoricalSource for MockSource {
        async fn fetch_candles(&self, request: &CandleRequest) -> Result<Vec<Candle>, DataError> {
            match request.symbol.as_str() {
                "B" => Ok(vec![
                    Candle::new(request.start_time, 5.0),
                    Candle::new(request.start_time + 1, 6.0),
                ]),
                _ => Err(DataError::RateLimited("429 Too Many Requests".to_string())),
            }
        }
    }

    fn app() -> Router {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = ChartCache::new(Arc::new(MockSource), clock.clone(), CacheConfig::default());

        let book = SeriesBook::new();
        book.append(&Symbol::new("BTC"), 0, 100.0);
        book.append(&Symbol::new("BTC"), 60_000, 101.0);

        let (_snapshot_tx, snapshots) = watch::channel(Arc::new(AssetSnapshot::default()));
        let state = AppState::new(cache, book, snapshots, FillTape::shared(10, 0), clock);
        router(state)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_chart_cache_partial_failure() {
        let (status, body) = send(app(), post_json("/chart-cache", r#"{"symbols":["A","B"],"range":"1h"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!({"A": [], "B": [5.0, 6.0]}));
        assert_eq!(body["meta"]["range"], "1H");
        assert_eq!(body["meta"]["symbolCount"], json!(2));
        assert_eq!(body["meta"]["generatedAt"], json!(1_000));
    }

    #[tokio::test]
    async fn test_chart_cache_rejects_invalid_body() {
        struct TestCase {
            input: &'static str,
            expected: StatusCode,
        }

        let tests = vec![
            TestCase {
                // TC0: empty symbols
                input: r#"{"symbols":[]}"#,
                expected: StatusCode::BAD_REQUEST,
            },
            TestCase {
                // TC1: symbols not a sequence
                input: r#"{"symbols":"BTC"}"#,
                expected: StatusCode::BAD_REQUEST,
            },
            TestCase {
                // TC2: symbols missing
                input: r#"{"range":"1D"}"#,
                expected: StatusCode::BAD_REQUEST,
            },
            TestCase {
                // TC3: not JSON
                input: "symbols=BTC",
                expected: StatusCode::BAD_REQUEST,
            },
            TestCase {
                // TC4: unknown range falls back to the default horizon
                input: r#"{"symbols":["B"],"range":"2W"}"#,
                expected: StatusCode::OK,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let (status, body) = send(app(), post_json("/chart-cache", test.input)).await;
            assert_eq!(status, test.expected, "TC{} failed", index);
            if status == StatusCode::BAD_REQUEST {
                assert_eq!(body["error"], "symbols array is required", "TC{} failed", index);
            }
        }
    }

    #[tokio::test]
    async fn test_series_reads_live_store() {
        let (status, body) = send(app(), get("/series?symbol=BTC&range=1h")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["range"], "1H");
        assert_eq!(
            body["points"],
            json!([{"timestamp": 0, "value": 100.0}, {"timestamp": 60_000, "value": 101.0}])
        );

        let (status, body) = send(app(), get("/series?symbol=BTC&count=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["points"], json!([{"timestamp": 60_000, "value": 101.0}]));

        let (status, _) = send(app(), get("/series?symbol=DOGE")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app(), get("/series?symbol=BTC&range=2W")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_fills_and_health() {
        let app = app();

        let (status, body) = send(app.clone(), get("/fills?limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fills"], json!([]));
        assert_eq!(body["stats"]["totalFills"], json!(0));

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/fills")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["liveSymbols"], json!(1));
        assert_eq!(body["uptimeMs"], json!(0));
    }
}

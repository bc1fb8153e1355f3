//! Stock Scope — technical analysis server and CLI
//!
//! Usage:
//!   stock-scope serve --port 3000              — Launch web server with UI
//!   stock-scope analyze AAPL --range 1d        — Print metrics and trade plan
//!   stock-scope backtest AAPL --ma-basis 50-150 — Replay the retracement strategy

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::{Parser, Subcommand};
use engine::{
    position_size, AnalysisOptions, AnalysisReport, BacktestConfig, BacktestReport, EngineError,
    MaBasis, MarketDataProvider, Range, YahooClient,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info, warn};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "stock-scope")]
#[command(about = "Stock technical analysis, trade plans and retracement backtests", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the web server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },
    /// Analyze one ticker and print metrics, plan and levels
    Analyze {
        ticker: String,
        /// Chart timeframe: 5m, 15m, 1h, 1d, 1w
        #[arg(long, default_value = "1d")]
        range: Range,
        /// Moving-average pair: 20-50 or 50-150
        #[arg(long, default_value = "20-50")]
        ma_basis: MaBasis,
        /// Dollar risk per trade; prints a share count for the plan
        #[arg(long)]
        risk: Option<f64>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Backtest the Fibonacci retracement strategy on one ticker
    Backtest {
        ticker: String,
        #[arg(long, default_value = "1d")]
        range: Range,
        #[arg(long, default_value = "20-50")]
        ma_basis: MaBasis,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone)]
struct AppState {
    provider: Arc<dyn MarketDataProvider>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,stock_scope=debug")
    } else {
        EnvFilter::new("info,engine=info,stock_scope=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn build_provider() -> anyhow::Result<Arc<dyn MarketDataProvider>> {
    let client = match std::env::var("YAHOO_BASE_URL") {
        Ok(url) => YahooClient::with_base_url(&url)?,
        Err(_) => YahooClient::new()?,
    };
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let provider = build_provider()?;

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(provider, &host, port).await?;
        }
        Commands::Analyze {
            ticker,
            range,
            ma_basis,
            risk,
            json,
        } => {
            cmd_analyze(provider.as_ref(), &ticker, range, ma_basis, risk, json).await?;
        }
        Commands::Backtest {
            ticker,
            range,
            ma_basis,
            json,
        } => {
            cmd_backtest(provider.as_ref(), &ticker, range, ma_basis, json).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command — Axum web server
// ============================================================================

fn build_router(state: AppState, static_dir: &std::path::Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/analyze/:ticker", get(api_analyze))
        .route("/backtest/:ticker", get(api_backtest))
        .route("/suggest", get(api_suggest))
        .with_state(state);

    let static_files =
        ServeDir::new(static_dir).fallback(ServeFile::new(static_dir.join("index.html")));

    Router::new()
        .nest("/api", api_routes)
        .fallback_service(static_files)
        .layer(cors)
}

async fn cmd_serve(provider: Arc<dyn MarketDataProvider>, host: &str, port: u16) -> anyhow::Result<()> {
    info!("Stock Scope v{} starting...", APP_VERSION);

    let static_dir = std::path::PathBuf::from(
        std::env::var("STOCK_SCOPE_STATIC_DIR").unwrap_or_else(|_| "public".to_string()),
    );
    if !static_dir.exists() {
        warn!(dir = %static_dir.display(), "Static directory not found; only the API will be served");
    }

    let app = build_router(AppState { provider }, &static_dir);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Stock Scope v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  GET  /api/analyze/:ticker     - Metrics, plan and levels (?range=&mabasis=)");
    println!("  GET  /api/backtest/:ticker    - Retracement backtest (?range=&mabasis=)");
    println!("  GET  /api/suggest?q=          - Ticker suggestions");
    println!("\n  Static files: {}", static_dir.display());
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// CLI commands
// ============================================================================

async fn cmd_analyze(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    range: Range,
    ma_basis: MaBasis,
    risk: Option<f64>,
    json: bool,
) -> anyhow::Result<()> {
    let report = engine::analyze(provider, ticker, range, &AnalysisOptions { ma_basis }).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_analysis(&report, risk);
    }
    Ok(())
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{:.*}", decimals, v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn print_analysis(report: &AnalysisReport, risk: Option<f64>) {
    let m = &report.metrics;
    let p = &report.plan;

    println!(
        "\n=== {} {} ({}) ===",
        report.ticker,
        report.company_name.as_deref().unwrap_or(""),
        report.range
    );
    println!(
        "  Close {:.2}  Change {} ({}%)",
        m.last_close,
        fmt_opt(report.price_change, 2),
        fmt_opt(report.price_change_percent, 2)
    );
    println!("  Trend {} {:?}  (MA {})", m.trend_emoji, m.trend, m.ma_basis);
    println!(
        "  RSI {}  CCI {}  ATR {} ({}%)  VolΔ {}%  RelVol {}%",
        fmt_opt(m.rsi, 2),
        fmt_opt(m.cci, 2),
        fmt_opt(m.atr, 2),
        fmt_opt(m.atr_pct, 2),
        fmt_opt(m.vol_delta, 1),
        fmt_opt(m.rel_vol_speed, 1),
    );
    println!("  Earnings {}", m.earnings_str);

    println!("\nPlan: {:?} {}", p.bias, p.confidence.stars());
    println!(
        "  Entry {:.2}  Stop {:.2}  T1 {:.2}  T2 {:.2}",
        p.entry, p.stop, p.target1, p.target2
    );
    if let Some(shares) = risk.and_then(|r| position_size(r, p.entry, p.stop)) {
        println!("  Size {} shares", shares);
    }

    println!("\nLevels ({} bars):", report.sr_history_bars);
    for level in &report.sr_levels {
        println!(
            "  {:>10.2}  {:<10} touches {:>2}  score {:.2}",
            level.price,
            format!("{:?}", level.kind),
            level.touches,
            level.score
        );
    }
    println!(
        "  Key resistance {}  Key support {}",
        fmt_opt(report.key_levels.resistance, 2),
        fmt_opt(report.key_levels.support, 2)
    );
    println!("\n{}", report.insight);
}

async fn cmd_backtest(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    range: Range,
    ma_basis: MaBasis,
    json: bool,
) -> anyhow::Result<()> {
    let config = BacktestConfig {
        ma_basis,
        ..Default::default()
    };
    let report = engine::backtest(provider, ticker, range, &config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_backtest(&report);
    }
    Ok(())
}

fn print_backtest(report: &BacktestReport) {
    let s = &report.stats;
    println!("\nBacktest (MA {}):", s.ma_basis);
    println!(
        "  Setups {}  Long {}  Short {}  Wins {}  Losses {}  No exit {}",
        s.setups, s.longs, s.shorts, s.wins, s.losses, s.no_exit
    );
    println!(
        "  Win rate {:.1}%  Resolved {:.1}%  Expectancy {:+.2}R  PF {:.2}",
        s.win_rate, s.resolved_win_rate, s.expectancy, s.profit_factor
    );
    println!(
        "  Final {:+.0}R  Max DD {:.0}R  Avg bars win {}  loss {}",
        s.final_r,
        s.max_drawdown_r,
        fmt_opt(s.avg_bars_win, 1),
        fmt_opt(s.avg_bars_loss, 1)
    );

    if report.samples.is_empty() {
        return;
    }
    println!(
        "\n  {:<10} {:<5} {:>10} {:>10} {:>10} {:<8} {:>4}",
        "Date", "Side", "Entry", "Target", "Stop", "Outcome", "Bars"
    );
    println!("  {}", "-".repeat(65));
    for sample in &report.samples {
        println!(
            "  {:<10} {:<5} {:>10.2} {:>10.2} {:>10.2} {:<8} {:>4}",
            sample.date,
            format!("{:?}", sample.side),
            sample.entry,
            sample.target,
            sample.stop,
            format!("{:?}", sample.outcome),
            sample
                .bars_held
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// Error body for every failed API call: `{ "ok": false, "error": "..." }`
enum ApiError {
    Engine(EngineError),
    Internal(anyhow::Error),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(EngineError::NoData { .. }) => StatusCode::NOT_FOUND,
            ApiError::Engine(EngineError::InsufficientHistory { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Engine(EngineError::InvalidRange(_) | EngineError::InvalidMaBasis(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Engine(EngineError::Provider(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Engine(e) => e.to_string(),
            ApiError::Internal(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            error!(status = status.as_u16(), "API error: {}", message);
        } else {
            warn!(status = status.as_u16(), "API error: {}", message);
        }
        (
            status,
            Json(serde_json::json!({
                "ok": false,
                "error": message,
            })),
        )
            .into_response()
    }
}

/// Flatten a report into `{ "ok": true, ...report }`
fn ok_body<T: Serialize>(value: &T) -> Result<Json<serde_json::Value>, ApiError> {
    let mut body = serde_json::to_value(value)?;
    match body.as_object_mut() {
        Some(map) => {
            map.insert("ok".to_string(), serde_json::Value::Bool(true));
        }
        None => {
            body = serde_json::json!({ "ok": true, "data": body });
        }
    }
    Ok(Json(body))
}

/// Query params shared by analyze and backtest
#[derive(Debug, Default, Deserialize)]
struct AnalysisParams {
    range: Option<String>,
    mabasis: Option<String>,
}

impl AnalysisParams {
    fn parse(&self) -> Result<(Range, MaBasis), EngineError> {
        let range = self
            .range
            .as_deref()
            .map(str::parse::<Range>)
            .transpose()?
            .unwrap_or_default();
        let ma_basis = self
            .mabasis
            .as_deref()
            .map(str::parse::<MaBasis>)
            .transpose()?
            .unwrap_or_default();
        Ok((range, ma_basis))
    }
}

#[derive(Debug, Deserialize)]
struct SuggestParams {
    #[serde(default)]
    q: String,
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "status": "ok",
        "service": "stock-scope",
        "version": APP_VERSION,
    }))
}

/// GET /api/analyze/:ticker — metrics, plan, levels and candles
async fn api_analyze(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(params): Query<AnalysisParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (range, ma_basis) = params.parse()?;
    let report = engine::analyze(
        state.provider.as_ref(),
        &ticker,
        range,
        &AnalysisOptions { ma_basis },
    )
    .await?;
    ok_body(&report)
}

/// GET /api/backtest/:ticker — retracement backtest stats and samples
async fn api_backtest(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(params): Query<AnalysisParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (range, ma_basis) = params.parse()?;
    let config = BacktestConfig {
        ma_basis,
        ..Default::default()
    };
    let report = engine::backtest(state.provider.as_ref(), &ticker, range, &config).await?;
    ok_body(&report)
}

/// GET /api/suggest?q= — ticker lookup
async fn api_suggest(
    State(state): State<AppState>,
    Query(params): Query<SuggestParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let suggestions = state
        .provider
        .search(&params.q)
        .await
        .map_err(EngineError::from)?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "suggestions": suggestions,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use engine::{Candle, HistoryDepth, TickerInfo, TickerSuggestion};

    struct StaticProvider {
        candles: Vec<Candle>,
    }

    #[async_trait]
    impl MarketDataProvider for StaticProvider {
        async fn fetch_candles(
            &self,
            _ticker: &str,
            _range: Range,
            _depth: HistoryDepth,
        ) -> anyhow::Result<Vec<Candle>> {
            Ok(self.candles.clone())
        }

        async fn fetch_earnings_date(&self, _ticker: &str) -> anyhow::Result<Option<NaiveDate>> {
            Ok(None)
        }

        async fn fetch_ticker_info(&self, _ticker: &str) -> anyhow::Result<TickerInfo> {
            Ok(TickerInfo::default())
        }

        async fn search(&self, query: &str) -> anyhow::Result<Vec<TickerSuggestion>> {
            if query.is_empty() {
                anyhow::bail!("empty query");
            }
            Ok(vec![TickerSuggestion {
                symbol: query.to_uppercase(),
                name: "Example Inc.".to_string(),
                exchange: "NASDAQ".to_string(),
            }])
        }
    }

    fn state(n: usize) -> State<AppState> {
        let candles = (0..n)
            .map(|i| {
                let c = 50.0 + i as f64 * 0.25;
                Candle {
                    timestamp: 1_700_000_000 + i as i64 * 86_400,
                    open: c,
                    high: c + 0.5,
                    low: c - 0.5,
                    close: c,
                    volume: 10_000.0,
                }
            })
            .collect();
        State(AppState {
            provider: Arc::new(StaticProvider { candles }),
        })
    }

    fn params(range: Option<&str>, mabasis: Option<&str>) -> Query<AnalysisParams> {
        Query(AnalysisParams {
            range: range.map(str::to_string),
            mabasis: mabasis.map(str::to_string),
        })
    }

    #[test]
    fn test_params_defaults_and_errors() {
        assert_eq!(
            AnalysisParams::default().parse().unwrap(),
            (Range::OneDay, MaBasis::Short)
        );
        let p = AnalysisParams {
            range: Some("1w".to_string()),
            mabasis: Some("50-150".to_string()),
        };
        assert_eq!(p.parse().unwrap(), (Range::OneWeek, MaBasis::Medium));
        let bad = AnalysisParams {
            range: Some("3mo".to_string()),
            mabasis: None,
        };
        assert!(matches!(bad.parse(), Err(EngineError::InvalidRange(_))));
    }

    #[test]
    fn test_error_status_mapping() {
        let no_data = ApiError::from(EngineError::NoData {
            ticker: "X".to_string(),
            range: "1d".to_string(),
        });
        assert_eq!(no_data.status(), StatusCode::NOT_FOUND);
        let short = ApiError::from(EngineError::InsufficientHistory {
            operation: "backtest",
            required: 120,
            actual: 3,
        });
        assert_eq!(short.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let upstream = ApiError::from(EngineError::from(anyhow::anyhow!("timeout")));
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(upstream.message(), "timeout");
    }

    #[tokio::test]
    async fn test_analyze_handler_flattens_report() {
        let Json(body) = api_analyze(state(200), Path("msft".to_string()), params(None, None))
            .await
            .unwrap_or_else(|e| panic!("analyze failed: {}", e.message()));
        assert_eq!(body["ok"], true);
        assert_eq!(body["ticker"], "MSFT");
        assert_eq!(body["range"], "1d");
        assert!(body["plan"]["fib"].get("61.8%").is_some());
    }

    #[tokio::test]
    async fn test_backtest_handler_rejects_short_history() {
        let err = api_backtest(state(50), Path("MSFT".to_string()), params(Some("1h"), None))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let Json(body) = api_backtest(state(150), Path("MSFT".to_string()), params(None, Some("20-50")))
            .await
            .unwrap_or_else(|e| panic!("backtest failed: {}", e.message()));
        assert_eq!(body["ok"], true);
        assert_eq!(body["stats"]["maBasis"], "20-50");
    }

    #[tokio::test]
    async fn test_bad_query_is_bad_request() {
        let err = api_analyze(state(10), Path("MSFT".to_string()), params(None, Some("10-30")))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_suggest_handler() {
        let Json(body) = api_suggest(state(1), Query(SuggestParams { q: "aapl".to_string() }))
            .await
            .unwrap_or_else(|e| panic!("suggest failed: {}", e.message()));
        assert_eq!(body["suggestions"][0]["symbol"], "AAPL");

        let err = api_suggest(state(1), Query(SuggestParams { q: String::new() }))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = api_health().await;
        assert_eq!(body["version"], APP_VERSION);
    }
}

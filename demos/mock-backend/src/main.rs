//! Scripted analysis backend.
//!
//! Speaks the same HTTP + SSE contract as the real pipeline and replays a
//! fixed multi-agent run for every request.
//!
//! Run with: cargo run -p sedno-mock-backend -- --port 8000

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use clap::Parser;
use sedno_core::event::{
    Credibility, CredibilityLevel, Document, DocumentBatch, Done, FactUnit, Hypothesis, Inference,
    ReasoningChain, ReportSection, ScenarioPayload,
};
use sedno_core::request::SessionStatusResponse;
use sedno_core::{AnalyzeRequest, AnalyzeResponse, Event, EventKind, Timeframe, Variant};
use serde_json::{Value, json};
use tokio::sync::{RwLock, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "sedno-mock-backend", about = "Scripted analysis backend for local runs")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Pause between scripted events.
    #[arg(long, default_value_t = 300)]
    delay_ms: u64,

    /// Idle time before a heartbeat frame is sent.
    #[arg(long, default_value_t = 30)]
    heartbeat_secs: u64,

    /// End every run with an `error` event instead of `done`.
    #[arg(long)]
    fail: bool,
}

struct MockSession {
    query: String,
    status: String,
    created_at: DateTime<Utc>,
    /// Taken by the first stream request.
    events: Option<mpsc::UnboundedReceiver<Event>>,
    result: Option<Value>,
}

#[derive(Clone)]
struct AppState {
    sessions: Arc<RwLock<HashMap<String, MockSession>>>,
    delay: Duration,
    heartbeat: Duration,
    fail: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let state = AppState {
        sessions: Arc::new(RwLock::new(HashMap::new())),
        delay: Duration::from_millis(args.delay_ms),
        heartbeat: Duration::from_secs(args.heartbeat_secs.max(1)),
        fail: args.fail,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .route("/api/stream/{session_id}", get(stream))
        .route("/api/session/{session_id}", get(session_status))
        .route("/api/session/{session_id}/result", get(session_result))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    tracing::info!("Mock backend listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") }))
}

async fn analyze(State(state): State<AppState>, Json(request): Json<AnalyzeRequest>) -> Response {
    if request.query.trim().chars().count() < 3 {
        return detail(StatusCode::UNPROCESSABLE_ENTITY, "query must have at least 3 characters");
    }

    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    state.sessions.write().await.insert(
        session_id.clone(),
        MockSession {
            query: request.query.clone(),
            status: "pending".to_string(),
            created_at: Utc::now(),
            events: Some(rx),
            result: None,
        },
    );
    tracing::info!(%session_id, query = %request.query, "Analysis requested");

    tokio::spawn(run_pipeline(state, session_id.clone(), request, tx));

    Json(AnalyzeResponse {
        session_id,
        status: "started".to_string(),
        message: "Analysis started. Connect to the stream endpoint for events.".to_string(),
    })
    .into_response()
}

async fn stream(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    let receiver = {
        let mut sessions = state.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) => session.events.take(),
            None => return detail(StatusCode::NOT_FOUND, "Session not found"),
        }
    };
    let Some(receiver) = receiver else {
        return detail(StatusCode::CONFLICT, "Stream already consumed");
    };

    let heartbeat = state.heartbeat;
    let frames = futures::stream::unfold(Some(receiver), move |receiver| async move {
        let mut receiver = receiver?;
        match tokio::time::timeout(heartbeat, receiver.recv()).await {
            Ok(Some(event)) => {
                let next = (!event.is_terminal()).then_some(receiver);
                Some((sse_frame(&event), next))
            }
            Ok(None) => None,
            Err(_) => Some((sse_frame(&Event::new(EventKind::Heartbeat)), Some(receiver))),
        }
    });

    Sse::new(frames).into_response()
}

async fn session_status(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    let sessions = state.sessions.read().await;
    let Some(session) = sessions.get(&session_id) else {
        return detail(StatusCode::NOT_FOUND, "Session not found");
    };
    Json(SessionStatusResponse {
        session_id,
        status: session.status.clone(),
        created_at: session.created_at.to_rfc3339(),
        query: session.query.clone(),
    })
    .into_response()
}

async fn session_result(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    let sessions = state.sessions.read().await;
    let Some(session) = sessions.get(&session_id) else {
        return detail(StatusCode::NOT_FOUND, "Session not found");
    };
    if session.status != "completed" {
        return detail(
            StatusCode::BAD_REQUEST,
            format!("Analysis not finished. Status: {}", session.status),
        );
    }
    Json(json!({
        "session_id": session_id,
        "query": session.query,
        "result": session.result,
    }))
    .into_response()
}

fn sse_frame(event: &Event) -> Result<SseEvent, Infallible> {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize event: {e}");
        json!({ "type": "error", "content": "serialization failure" }).to_string()
    });
    Ok(SseEvent::default().data(data))
}

async fn set_status(state: &AppState, session_id: &str, status: &str, result: Option<Value>) {
    if let Some(session) = state.sessions.write().await.get_mut(session_id) {
        session.status = status.to_string();
        session.result = result;
    }
}

async fn run_pipeline(
    state: AppState,
    session_id: String,
    request: AnalyzeRequest,
    tx: mpsc::UnboundedSender<Event>,
) {
    set_status(&state, &session_id, "running", None).await;

    for event in script(&request) {
        tokio::time::sleep(state.delay).await;
        let event = event.with_timestamp(Utc::now().to_rfc3339());
        if tx.send(event).is_err() {
            tracing::warn!(%session_id, "Client went away, stopping pipeline");
            set_status(&state, &session_id, "error", None).await;
            return;
        }
    }

    tokio::time::sleep(state.delay).await;
    let terminal = if state.fail {
        set_status(&state, &session_id, "error", None).await;
        Event::new(EventKind::Error)
            .with_agent("system")
            .with_content("Synthesis model unavailable")
    } else {
        let result = json!({ "query": request.query, "scenarios": 4 });
        set_status(&state, &session_id, "completed", Some(result.clone())).await;
        Event::new(EventKind::Done(Done {
            session_id: Some(session_id.clone()),
            result: Some(result),
        }))
    };
    let _ = tx.send(terminal.with_timestamp(Utc::now().to_rfc3339()));
    tracing::info!(%session_id, "Pipeline finished");
}

/// The fixed run: supervisor planning, regional search, analysis, synthesis.
fn script(request: &AnalyzeRequest) -> Vec<Event> {
    let mut events = vec![
        Event::new(EventKind::Thinking)
            .with_agent("system")
            .with_content(format!("Starting analysis: {}", request.query)),
        Event::new(EventKind::Thinking)
            .with_agent("supervisor")
            .with_content("Splitting the question into regional and sector tasks"),
    ];

    let regions = if request.regions.is_empty() {
        vec!["europe".to_string()]
    } else {
        request.regions.clone()
    };
    let share = 60.0 / regions.len() as f64;
    for (i, region) in regions.iter().enumerate() {
        let agent = format!("region_{region}");
        events.push(
            Event::new(EventKind::SearchingProgress)
                .with_agent(&agent)
                .with_content(format!("Searching sources for {region}"))
                .with_progress(share.mul_add(i as f64, 10.0)),
        );
        events.push(
            Event::new(EventKind::DocumentBatch(DocumentBatch {
                query: Some(request.query.clone()),
                docs: vec![
                    Document {
                        title: format!("{region}: energy market outlook"),
                        relevance: 0.91,
                        source: "reuters".to_string(),
                        url: Some("https://example.org/outlook".to_string()),
                        credibility: Some(Credibility {
                            level: CredibilityLevel::High,
                            score: Some(0.9),
                        }),
                    },
                    Document {
                        title: format!("{region}: trade policy brief"),
                        relevance: 0.74,
                        source: "think-tank".to_string(),
                        url: None,
                        credibility: None,
                    },
                ],
            }))
            .with_agent("search"),
        );
        events.push(
            Event::new(EventKind::Thinking)
                .with_agent(&agent)
                .with_content(format!("Assessing exposure of {region}")),
        );
    }

    let fact = FactUnit {
        id: Some("f1".to_string()),
        content: "Gas storage is above the five-year average".to_string(),
        source: Some("reuters".to_string()),
        confidence: Some(0.85),
        priority: Some(1),
    };
    events.extend([
        Event::new(EventKind::Reasoning(ReasoningChain {
            steps: vec![
                "Storage is high".to_string(),
                "Winter demand is covered".to_string(),
            ],
            conclusion: Some("Price spikes are unlikely this winter".to_string()),
            confidence: Some(0.7),
        }))
        .with_agent("meta_supervisor")
        .with_progress(75.0),
        Event::new(EventKind::Hypothesis(Hypothesis {
            statement: "Lower prices revive industrial output".to_string(),
            testable_predictions: vec!["PMI above 50 within two quarters".to_string()],
            confidence: Some(0.6),
        }))
        .with_agent("meta_supervisor"),
        Event::new(EventKind::Inference(Inference {
            facts: vec![fact],
            chain: vec!["storage high".to_string(), "prices ease".to_string()],
            prediction: "Industrial output recovers by mid-year".to_string(),
            horizon: Some("12m".to_string()),
            assumptions: vec!["No supply shock".to_string()],
            confidence: Some(0.65),
        }))
        .with_agent("synthesis")
        .with_progress(85.0),
        Event::new(EventKind::ReportSection(ReportSection {
            section: Some("summary".to_string()),
        }))
        .with_agent("synthesis")
        .with_content(format!(
            "Executive summary for \"{}\": regional evidence points to a stable short-term outlook with downside risks concentrated in trade policy.",
            request.query
        )),
    ]);

    for timeframe in [Timeframe::TwelveMonths, Timeframe::ThirtySixMonths] {
        for (variant, confidence) in [(Variant::Positive, 0.65), (Variant::Negative, 0.35)] {
            events.push(
                Event::new(EventKind::Scenario(ScenarioPayload {
                    timeframe: Some(timeframe),
                    variant: Some(variant),
                    title: Some(format!("{variant} outlook, {timeframe}")),
                    confidence: Some(confidence),
                    chart: None,
                }))
                .with_agent("synthesis")
                .with_content(format!("Full {variant} scenario over {timeframe} for: {}", request.query))
                .with_progress(95.0),
            );
        }
    }

    events
}

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use futures::stream;
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::Deserialize;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

use crate::assistant::AssistantClient;
use crate::config::DEFAULT_ASSISTANT;

/// Fixed literal appended after all content chunks, signaling completion to
/// the frontend.
pub const END_RESPONSE_MARKER: &str = "\nEND_RESPONSE";

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    assistant: Arc<AssistantClient>,
}

impl AppState {
    pub fn new(assistant: Arc<AssistantClient>) -> Result<Self> {
        let templates = create_minijinja_env().context("Failed to initialize template engine")?;
        Ok(Self {
            templates: Arc::new(templates),
            assistant,
        })
    }
}

// Minijinja Environment setup
fn create_minijinja_env() -> Result<AutoReloader> {
    // Use AutoReloader for development convenience
    let reloader = AutoReloader::new(|notifier| {
        // Create the loader *inside* the closure
        let loader = path_loader("templates");
        let mut env = Environment::new();
        env.set_loader(loader);
        // Watch the templates directory for changes
        notifier.watch_path("templates", true);
        Ok(env)
    });
    Ok(reloader)
}

async fn index_handler(
    State(state): State<AppState>,
) -> Result<axum::response::Html<String>, axum::response::Html<String>> {
    // Acquire env, get template, and render within the same block
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                let context = minijinja::context! {
                    title => "Sonoma Chat",
                };
                tmpl.render(context)
            })
        })
        .map(axum::response::Html) // Wrap successful render in Html()
        .map_err(|e| {
            // Handle errors from acquire_env, get_template, or render
            error!("Failed to get or render template: {}", e);
            axum::response::Html(format!("Internal Server Error: {}", e))
        })
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    prompt: Option<String>,
}

// Triggered by the Submit button on the page. Forwards the prompt to the
// assistant bridge and streams the formatted chunks back as text/plain,
// ending with the END_RESPONSE marker.
async fn chat_handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    // Trim whitespace to avoid false positives; absent field means "".
    let prompt = request.prompt.unwrap_or_default().trim().to_string();
    info!(prompt_len = prompt.len(), "Received chat prompt");

    match state.assistant.respond(DEFAULT_ASSISTANT, &prompt).await {
        Ok(chunks) => {
            let parts = chunks
                .into_iter()
                .chain(std::iter::once(END_RESPONSE_MARKER.to_string()))
                .map(Ok::<_, Infallible>);
            let body = Body::from_stream(stream::iter(parts));
            ([(header::CONTENT_TYPE, "text/plain")], body).into_response()
        }
        Err(e) => {
            error!("Assistant request failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get a response from the assistant.",
            )
                .into_response()
        }
    }
}

// Build our application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/chat", post(chat_handler))
        // Route for static files must be nested under a path like /static
        // or it will conflict with other routes.
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

pub async fn start_web_server(port: u16, assistant: Arc<AssistantClient>) -> Result<()> {
    let state = AppState::new(assistant)?;
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    // Bind using tokio::net::TcpListener
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    // Use axum::serve to run the application
    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}

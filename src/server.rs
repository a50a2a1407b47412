//! Web layer: routes, per-request orchestration, and the background model
//! loader.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{sse::Event, Html, IntoResponse, Response, Sse},
    routing::{get, post},
    Form, Json, Router,
};
use futures::stream;
use serde::{Deserialize, Serialize};
use tera::Tera;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::cookies::{session_set_cookie, CookieJar};
use crate::emotion::EmotionClassifier;
use crate::enhance::{enhance_character_profile, EnhancerConfig};
use crate::error::PersonaError;
use crate::http::HttpClient;
use crate::model::{RoleplayModel, TextGenerator};
use crate::prompt::{build_character_prompt, format_history};
use crate::scrape::{scrape_character, CharacterProfile};
use crate::session::{ConversationTurn, SessionStore};
use crate::status::ModelStatus;

pub const SESSION_COOKIE: &str = "wp_session";

const MODEL_LOADING_MESSAGE: &str = "AI model still loading";
const GENERATION_APOLOGY: &str = "I encountered an error. Please try again.";

/// Bounded token channel between the generation task and the SSE writer;
/// capacity is the backpressure limit for a slow client.
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Process-wide application state shared across requests.
pub struct AppState {
    pub status: ModelStatus,
    pub sessions: SessionStore,
    pub models: RwLock<Option<LoadedModels>>,
    pub tera: Tera,
    /// Scrape fetch timeout; integration tests shorten it.
    pub scrape_timeout_secs: u64,
    /// Enhancement source endpoints; integration tests point these at a mock.
    pub enhancer: EnhancerConfig,
}

/// Inference handles installed by the background loader once ready.
#[derive(Clone)]
pub struct LoadedModels {
    pub generator: Arc<dyn TextGenerator>,
    pub emotion: Arc<EmotionClassifier>,
}

impl AppState {
    pub fn new(tera: Tera) -> Self {
        Self {
            status: ModelStatus::new(),
            sessions: SessionStore::new(),
            models: RwLock::new(None),
            tera,
            scrape_timeout_secs: crate::http::DEFAULT_TIMEOUT_SECS,
            enhancer: EnhancerConfig::default(),
        }
    }

    pub fn loaded_models(&self) -> Option<LoadedModels> {
        if !self.status.is_loaded() {
            return None;
        }
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn install_models(&self, models: LoadedModels) {
        *self.models.write().unwrap_or_else(PoisonError::into_inner) = Some(models);
        self.status.set_loaded();
    }
}

#[derive(Debug, Deserialize)]
pub struct SetCharacterForm {
    #[serde(default)]
    pub wiki_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
struct CharacterResponse {
    success: bool,
    name: String,
    image_url: String,
    speech_style: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<bool>,
}

fn bad_request(error: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            success: false,
            error,
        }),
    )
        .into_response()
}

fn apology_response() -> Response {
    Json(ChatResponse {
        response: GENERATION_APOLOGY.to_string(),
        error: Some(true),
    })
    .into_response()
}

fn session_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    let jar = CookieJar::parse(raw);
    jar.get(SESSION_COOKIE).and_then(|v| Uuid::parse_str(v).ok())
}

/// Resolve the browser session, minting a new id (and its `Set-Cookie`
/// value) when the request carries none.
fn ensure_session(headers: &HeaderMap) -> (Uuid, Option<HeaderValue>) {
    if let Some(id) = session_from_headers(headers) {
        return (id, None);
    }
    let id = Uuid::new_v4();
    let cookie = HeaderValue::from_str(&session_set_cookie(SESSION_COOKIE, &id.to_string())).ok();
    (id, cookie)
}

fn with_session_cookie(mut response: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(value) = cookie {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.tera.render("index.html", &tera::Context::new()) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!(error = %e, "template rendering failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
        }
    }
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.status.snapshot()).into_response()
}

async fn set_character_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<SetCharacterForm>,
) -> Response {
    let wiki_url = form.wiki_url.trim().to_string();
    let scheme_ok = Url::parse(&wiki_url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false);
    if wiki_url.is_empty() || !scheme_ok {
        warn!(wiki_url = %form.wiki_url, "rejected character URL");
        return bad_request(format!("Invalid wiki URL: {}", form.wiki_url));
    }

    let client = match HttpClient::with_timeout(state.scrape_timeout_secs) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "scrape client construction failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    success: false,
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    let mut profile = scrape_character(&client, &wiki_url).await;
    enhance_character_profile(&state.enhancer, &mut profile).await;

    let (session_id, new_cookie) = ensure_session(&headers);
    state.sessions.set_character(session_id, profile.clone());
    info!(session = %session_id, name = %profile.display_name(), "character set");

    let response = Json(CharacterResponse {
        success: true,
        name: profile.display_name().to_string(),
        image_url: profile.image_url,
        speech_style: profile.speech_style,
    })
    .into_response();
    with_session_cookie(response, new_cookie)
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<ChatForm>,
) -> Response {
    let message = form.message.trim().to_string();
    if message.is_empty() {
        return bad_request("Message must not be empty".to_string());
    }

    let Some(models) = state.loaded_models() else {
        return Json(ChatResponse {
            response: MODEL_LOADING_MESSAGE.to_string(),
            error: Some(true),
        })
        .into_response();
    };

    let (session_id, new_cookie) = ensure_session(&headers);
    let character = state.sessions.character(session_id).unwrap_or_default();
    let history = state.sessions.history(session_id);
    let history_text = format_history(character.display_name(), &history);

    state.status.mark_inference_started();

    let wants_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));

    if wants_stream {
        let response = stream_chat(state, models, session_id, character, message, history_text);
        with_session_cookie(response, new_cookie)
    } else {
        let response = blocking_chat(state, models, session_id, character, message, history_text).await;
        with_session_cookie(response, new_cookie)
    }
}

async fn blocking_chat(
    state: Arc<AppState>,
    models: LoadedModels,
    session_id: Uuid,
    character: CharacterProfile,
    message: String,
    history_text: String,
) -> Response {
    let started = Instant::now();
    let user_input = message.clone();

    let result = tokio::task::spawn_blocking(move || {
        let emotion = models.emotion.detect(&message);
        let prompt = build_character_prompt(&character, &message, &emotion, &history_text);
        models.generator.generate(&prompt)
    })
    .await;

    match result {
        Ok(Ok(response_text)) => {
            state.sessions.append_turn(
                session_id,
                ConversationTurn {
                    user: user_input,
                    bot: response_text.clone(),
                },
            );
            state.status.record_inference(started.elapsed());
            Json(ChatResponse {
                response: response_text,
                error: None,
            })
            .into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, session = %session_id, "generation failed");
            apology_response()
        }
        Err(e) => {
            error!(error = %e, session = %session_id, "generation task panicked");
            apology_response()
        }
    }
}

/// Streamed generation: a blocking producer task feeds a bounded channel
/// consumed by the SSE writer. The producer owns the post-completion history
/// append and status update, so a client disconnect never loses the turn.
fn stream_chat(
    state: Arc<AppState>,
    models: LoadedModels,
    session_id: Uuid,
    character: CharacterProfile,
    message: String,
    history_text: String,
) -> Response {
    let (tx, rx) = mpsc::channel::<String>(STREAM_CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let emotion = models.emotion.detect(&message);
        let prompt = build_character_prompt(&character, &message, &emotion, &history_text);

        let mut full_response = String::new();
        let result = models.generator.generate_streaming(&prompt, &mut |fragment| {
            full_response.push_str(fragment);
            // A closed channel means the client went away; keep generating so
            // the finished turn still reaches the history.
            let _ = tx.blocking_send(fragment.to_string());
        });

        match result {
            Ok(_) => {
                state.sessions.append_turn(
                    session_id,
                    ConversationTurn {
                        user: message,
                        bot: full_response,
                    },
                );
                state.status.record_inference(started.elapsed());
            }
            Err(e) => {
                error!(error = %e, session = %session_id, "streaming generation failed");
            }
        }
    });

    let token_stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|token| {
            (
                Ok::<Event, std::convert::Infallible>(Event::default().data(token)),
                rx,
            )
        })
    });

    Sse::new(token_stream).into_response()
}

async fn clear_history_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let (session_id, new_cookie) = ensure_session(&headers);
    state.sessions.clear_history(session_id);
    let response = Json(serde_json::json!({ "success": true })).into_response();
    with_session_cookie(response, new_cookie)
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/set_character", post(set_character_handler))
        .route("/chat", post(chat_handler))
        .route("/clear_history", post(clear_history_handler))
        .route("/status", get(status_handler))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
        .layer(cors)
}

/// Load the models off the request path; chat stays in the "still loading"
/// state until this finishes, and a failure parks the feature for the
/// process lifetime.
pub fn spawn_model_loader(state: Arc<AppState>, model_dir: PathBuf, emotion_dir: PathBuf) {
    tokio::spawn(async move {
        state.status.set_loading();
        info!(model_dir = %model_dir.display(), "starting background model load");

        let load = tokio::task::spawn_blocking(move || {
            let roleplay = RoleplayModel::load(&model_dir)?;
            let emotion = EmotionClassifier::load(&emotion_dir);
            Ok::<_, PersonaError>((roleplay, emotion))
        })
        .await;

        match load {
            Ok(Ok((roleplay, emotion))) => {
                state.install_models(LoadedModels {
                    generator: Arc::new(roleplay),
                    emotion: Arc::new(emotion),
                });
                info!("models loaded successfully");
            }
            Ok(Err(e)) => {
                error!(error = %e, "model load failed");
                state.status.set_load_error(e.to_string());
            }
            Err(e) => {
                error!(error = %e, "model loader panicked");
                state.status.set_load_error(format!("model loader panicked: {}", e));
            }
        }
    });
}

pub async fn start_server(
    port: u16,
    model_dir: PathBuf,
    emotion_dir: PathBuf,
) -> std::io::Result<()> {
    let tera = match Tera::new("templates/**/*") {
        Ok(tera) => tera,
        Err(e) => {
            error!(error = %e, "template parsing failed, chat shell unavailable");
            Tera::default()
        }
    };

    let state = Arc::new(AppState::new(tera));
    spawn_model_loader(state.clone(), model_dir, emotion_dir);

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!(port, "wikipersona server listening");
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_session_mints_cookie_when_absent() {
        let headers = HeaderMap::new();
        let (_, cookie) = ensure_session(&headers);
        let cookie = cookie.expect("new session should set a cookie");
        assert!(cookie.to_str().unwrap().starts_with("wp_session="));
    }

    #[test]
    fn test_ensure_session_reuses_existing_id() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, id)).unwrap(),
        );

        let (resolved, cookie) = ensure_session(&headers);
        assert_eq!(resolved, id);
        assert!(cookie.is_none());
    }

    #[test]
    fn test_ensure_session_ignores_garbage_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("wp_session=not-a-uuid"),
        );

        let (_, cookie) = ensure_session(&headers);
        assert!(cookie.is_some());
    }
}

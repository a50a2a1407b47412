mod common;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tera::Tera;
use tokio::time::timeout;
use tower::ServiceExt;
use uuid::Uuid;

use wikipersona_lib::{
    enhance::EnhancerConfig,
    server::{create_router, AppState},
    session::SessionStore,
    status::ModelStatus,
};

fn test_state(mock_base: &str) -> Arc<AppState> {
    Arc::new(AppState {
        status: ModelStatus::new(),
        sessions: SessionStore::new(),
        models: RwLock::new(None),
        tera: Tera::default(),
        scrape_timeout_secs: 1,
        enhancer: EnhancerConfig {
            wikipedia_base: mock_base.to_string(),
            quotes_base: mock_base.to_string(),
            charwiki_base: mock_base.to_string(),
            timeout_secs: 1,
        },
    })
}

/// State whose enhancement sources refuse connections immediately.
fn state_without_sources() -> Arc<AppState> {
    test_state("http://127.0.0.1:1")
}

#[tokio::test]
async fn set_character_happy_path_is_hermetic() {
    let mock = common::mock_wiki::MockWikiServer::start().await;
    let state = test_state(&mock.base_url);
    let app = create_router(state.clone());

    let req = common::http::form_request(
        "/set_character",
        &[("wiki_url", &format!("{}/wiki/Alice", mock.base_url))],
    );
    let res = timeout(Duration::from_secs(5), app.oneshot(req))
        .await
        .expect("request timed out")
        .expect("request failed");

    let cookie = common::http::session_cookie(&res).expect("session cookie should be set");
    let session_id: Uuid = cookie
        .strip_prefix("wp_session=")
        .unwrap()
        .parse()
        .expect("cookie should hold a uuid");

    let v = common::http::read_json_response(res).await;
    assert_eq!(v["success"], true);
    assert_eq!(v["name"], "Alice");
    assert_eq!(v["image_url"], "https://img.mock/alice.png");
    assert!(v["speech_style"]
        .as_str()
        .unwrap()
        .contains("Curiouser and curiouser!"));

    // Fresh character, fresh history.
    let profile = state.sessions.character(session_id).expect("profile stored");
    assert_eq!(profile.name, "Alice");
    assert!(state.sessions.history(session_id).is_empty());
}

#[tokio::test]
async fn set_character_rejects_invalid_url() {
    let state = state_without_sources();
    let app = create_router(state);

    let req = common::http::form_request("/set_character", &[("wiki_url", "not a url")]);
    let res = timeout(Duration::from_secs(5), app.oneshot(req))
        .await
        .expect("request timed out")
        .expect("request failed");

    assert_eq!(res.status(), axum::http::StatusCode::BAD_REQUEST);
    let v = common::http::read_json_response(res).await;
    assert_eq!(v["success"], false);
    assert!(v["error"].as_str().unwrap().contains("Invalid wiki URL"));
}

#[tokio::test]
async fn set_character_rejects_empty_url() {
    let state = state_without_sources();
    let app = create_router(state);

    let req = common::http::form_request("/set_character", &[("wiki_url", "")]);
    let res = timeout(Duration::from_secs(5), app.oneshot(req))
        .await
        .expect("request timed out")
        .expect("request failed");

    assert_eq!(res.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn set_character_scrape_failure_uses_fallback_profile() {
    let mock = common::mock_wiki::MockWikiServer::start().await;
    let state = state_without_sources();
    let app = create_router(state);

    let req = common::http::form_request(
        "/set_character",
        &[("wiki_url", &format!("{}/wiki/Missing", mock.base_url))],
    );
    let res = timeout(Duration::from_secs(5), app.oneshot(req))
        .await
        .expect("request timed out")
        .expect("request failed");

    // Upstream failures degrade to defaults instead of erroring.
    let v = common::http::read_json_response(res).await;
    assert_eq!(v["success"], true);
    assert_eq!(v["name"], "Character");
    assert_eq!(v["image_url"], "");
    assert_eq!(
        v["speech_style"],
        "No specific speech style information available"
    );
}

#[tokio::test]
async fn set_character_scrape_timeout_uses_fallback_profile() {
    let mock = common::mock_wiki::MockWikiServer::start().await;
    let state = state_without_sources();
    let app = create_router(state);

    let req = common::http::form_request(
        "/set_character",
        &[("wiki_url", &format!("{}/wiki/Slow", mock.base_url))],
    );
    let res = timeout(Duration::from_secs(5), app.oneshot(req))
        .await
        .expect("request timed out")
        .expect("request failed");

    let v = common::http::read_json_response(res).await;
    assert_eq!(v["success"], true);
    assert_eq!(v["name"], "Character");
}

#[tokio::test]
async fn set_character_enhances_thin_profile() {
    let mock = common::mock_wiki::MockWikiServer::start().await;
    let state = test_state(&mock.base_url);
    let app = create_router(state.clone());

    let req = common::http::form_request(
        "/set_character",
        &[("wiki_url", &format!("{}/wiki/Sparse", mock.base_url))],
    );
    let res = timeout(Duration::from_secs(5), app.oneshot(req))
        .await
        .expect("request timed out")
        .expect("request failed");

    let cookie = common::http::session_cookie(&res).expect("session cookie should be set");
    let session_id: Uuid = cookie.strip_prefix("wp_session=").unwrap().parse().unwrap();

    let v = common::http::read_json_response(res).await;
    assert_eq!(v["success"], true);
    assert_eq!(v["name"], "Sparse");
    // Image backfilled from the encyclopedia thumbnail.
    assert_eq!(
        v["image_url"],
        format!("{}/thumb.png", mock.base_url)
    );
    // Speech style built from the quote API.
    let speech = v["speech_style"].as_str().unwrap();
    assert!(speech.starts_with("Character is known for quotes like:"));
    assert!(speech.contains("- Stay curious."));

    // Personality supplemented from the secondary character wiki.
    let profile = state.sessions.character(session_id).unwrap();
    assert!(profile.personality.contains("keeps to the margins"));
    // Description picked up the encyclopedia extract.
    assert!(profile.description.contains("fictional heroine"));
}

#[tokio::test]
async fn set_character_replaces_existing_session_character() {
    let mock = common::mock_wiki::MockWikiServer::start().await;
    let state = test_state(&mock.base_url);
    let app = create_router(state.clone());

    let first = common::http::form_request(
        "/set_character",
        &[("wiki_url", &format!("{}/wiki/Alice", mock.base_url))],
    );
    let res = app
        .clone()
        .oneshot(first)
        .await
        .expect("request failed");
    let cookie = common::http::session_cookie(&res).unwrap();
    let session_id: Uuid = cookie.strip_prefix("wp_session=").unwrap().parse().unwrap();

    // Seed a turn, then switch characters: history must reset.
    state.sessions.append_turn(
        session_id,
        wikipersona_lib::session::ConversationTurn {
            user: "hi".to_string(),
            bot: "hello".to_string(),
        },
    );

    let second = common::http::form_request_with(
        "/set_character",
        &[("wiki_url", &format!("{}/wiki/Sparse", mock.base_url))],
        &[("cookie", &cookie)],
    );
    let res = app.oneshot(second).await.expect("request failed");
    let v = common::http::read_json_response(res).await;
    assert_eq!(v["name"], "Sparse");

    assert_eq!(
        state.sessions.character(session_id).unwrap().name,
        "Sparse"
    );
    assert!(state.sessions.history(session_id).is_empty());
}

#![allow(dead_code)]

use axum::{
    extract::Path,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use tokio::{net::TcpListener, task::JoinHandle};

const LONG_PARA: &str = "Alice is a curious young girl who tumbles down a rabbit hole into a topsy-turvy world of riddles and talking creatures.";

/// Local mock standing in for the character wiki and all three enhancement
/// sources, so integration tests never touch the network.
pub struct MockWikiServer {
    pub base_url: String,
    _task: JoinHandle<()>,
}

impl MockWikiServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let addr: SocketAddr = listener
            .local_addr()
            .expect("failed to get mock server addr");
        let base_url = format!("http://{}", addr);

        // Wiki paths contain characters (`Special:Search`) that the router's
        // parameter syntax would reject, so everything under /wiki/ goes
        // through one wildcard handler.
        let base_for_wiki = base_url.clone();
        let base_for_api = base_url.clone();

        let app = Router::new()
            .route(
                "/wiki/*page",
                get(move |Path(page): Path<String>| {
                    let base = base_for_wiki.clone();
                    async move { wiki_page(&page, &base).await }
                }),
            )
            // Encyclopedia summary API.
            .route(
                "/w/api.php",
                get(move || {
                    let base = base_for_api.clone();
                    async move {
                        Json(json!({
                            "query": {
                                "pages": {
                                    "123": {
                                        "extract": "A fictional heroine created in 1865, widely adapted across literature, film, and games ever since.",
                                        "thumbnail": { "source": format!("{}/thumb.png", base) }
                                    }
                                }
                            }
                        }))
                    }
                }),
            )
            // Quote search API.
            .route(
                "/api/search",
                get(|| async {
                    Json(json!({
                        "quotes": [
                            { "content": "Stay curious." },
                            { "content": "Nothing is impossible." }
                        ]
                    }))
                }),
            );

        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock server failed");
        });

        Self {
            base_url,
            _task: task,
        }
    }
}

async fn wiki_page(page: &str, base_url: &str) -> Response {
    match page {
        // Rich character page: long lead, quotes, infobox image. The
        // enhancer must treat the scraped profile as complete.
        "Alice" => Html(format!(
            r#"<!DOCTYPE html>
<html><head><meta property="og:image" content="//img.mock/alice-og.png"></head>
<body>
<h1 id="firstHeading">Alice</h1>
<div class="mw-parser-output">
  <img class="pi-image-thumbnail" src="https://img.mock/alice.png">
  <p>{p}</p>
  <p>{p}</p>
  <p>{p}</p>
  <h2>Personality</h2>
  <p>Endlessly curious, polite to a fault, and far braver than she first appears to be in the story.</p>
  <h2>Quotes</h2>
  <blockquote>Curiouser and curiouser!</blockquote>
</div>
</body></html>"#,
            p = LONG_PARA
        ))
        .into_response(),

        // Thin character page: forces every enhancement source to run.
        "Sparse" => Html(
            r#"<!DOCTYPE html>
<html><body>
<h1 id="firstHeading">Sparse</h1>
<div class="mw-parser-output"><p>Thin.</p></div>
</body></html>"#,
        )
        .into_response(),

        // Page that answers slower than the scrape timeout.
        "Slow" => {
            tokio::time::sleep(std::time::Duration::from_secs(3)).await;
            Html("<h1 id=\"firstHeading\">Slow</h1>").into_response()
        }

        // Secondary character wiki: search results linking to the profile.
        "Special:Search" => Html(format!(
            r#"<ul><li class="unified-search__result__content">
<a href="{}/wiki/profile/Sparse">Sparse</a></li></ul>"#,
            base_url
        ))
        .into_response(),

        "profile/Sparse" => Html(
            r#"<!DOCTYPE html>
<html><body>
<h2><span id="Personality">Personality</span></h2>
<p>Sparse keeps to the margins and speaks only when spoken to.</p>
<h2>Other</h2>
<img class="pi-image-thumbnail" src="https://img.mock/sparse.png">
</body></html>"#,
        )
        .into_response(),

        _ => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

use std::path::PathBuf;

use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wikipersona_lib=debug,info")),
        )
        .init();

    let port = std::env::var("WIKIPERSONA_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(5000);

    let model_dir = PathBuf::from(
        std::env::var("WIKIPERSONA_MODEL_DIR").unwrap_or_else(|_| "./models/roleplay".to_string()),
    );
    let emotion_dir = PathBuf::from(
        std::env::var("WIKIPERSONA_EMOTION_MODEL_DIR")
            .unwrap_or_else(|_| "./models/emotion".to_string()),
    );

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    rt.block_on(async move {
        if let Err(e) = wikipersona_lib::server::start_server(port, model_dir, emotion_dir).await {
            eprintln!("server error: {}", e);
            std::process::exit(1);
        }
    });
}

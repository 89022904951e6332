use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;

use chat_relay_backend::{logging, routes, AppState, BackendClient, Config, Dispatcher, OllamaBackend, Validator};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// True when the command line asks for the version.
fn wants_version<I>(args: I) -> bool
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    args.into_iter()
        .skip(1)
        .any(|a| matches!(a.as_ref(), "--version" | "-V"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    if wants_version(env::args()) {
        println!("chat-relay {}", VERSION);
        return Ok(());
    }

    // Load configuration
    let config = Config::load().map_err(|e| {
        format!(
            "{}. Check config.toml or the RELAY__SECTION__KEY environment variables.",
            e
        )
    })?;

    logging::init(&config.logging.level);
    tracing::info!("Starting Chat Relay {}", VERSION);

    // Backend client owned by the dispatcher
    let backend = Arc::new(OllamaBackend::new(&config.backend.base_url, &config.backend.model));
    tracing::info!(
        "Using Ollama at {} with model {}",
        config.backend.base_url,
        backend.model()
    );
    let client = BackendClient::new(backend, config.backend.timeout())
        .with_system_prompt(config.backend.system_prompt.clone());
    let dispatcher = Dispatcher::start(client, &config.dispatch);
    let validator = Validator::new(config.validation.max_content_chars);
    tracing::info!(max_chars = validator.max_chars(), "Request validation configured");

    let state = Arc::new(AppState {
        config: config.clone(),
        validator,
        dispatcher,
    });

    let app = routes::app(state.clone());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.dispatcher.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wants_version() {
        assert!(wants_version(["chat-relay", "--version"]));
        assert!(wants_version(["chat-relay", "-V"]));
        assert!(!wants_version(["chat-relay"]));
        assert!(!wants_version(["chat-relay", "--verbose"]));
    }

    #[test]
    fn test_program_name_is_not_a_flag() {
        assert!(!wants_version(["-V"]));
    }
}

use tracing::{error, info};
use uuid::Uuid;

use mdstore::{Backend, Config, DocumentService, RateLimiter};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = mdstore::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        mdstore::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("{e}");
        std::process::exit(1);
    }

    let backend = match Backend::open(&config).await {
        Ok(backend) => backend,
        Err(e) => {
            error!("Failed to open storage: {e}");
            std::process::exit(1);
        }
    };

    let service = DocumentService::new(
        backend,
        RateLimiter::new(config.rate_limit.limiter_config()),
    );

    info!(
        backend = service.backend().name(),
        space_bytes = config.quota.space_bytes,
        max_files = config.quota.max_files,
        "mdstore storage ready"
    );

    // Optional user id: list that user's documents
    if let Some(arg) = std::env::args().nth(1) {
        match arg.parse::<Uuid>() {
            Ok(user) => match service.list(user).await {
                Ok(names) => {
                    info!(%user, count = names.len(), "documents");
                    for name in names {
                        println!("{name}");
                    }
                }
                Err(e) => error!(%user, "Failed to list documents: {e}"),
            },
            Err(e) => error!("Invalid user id {arg:?}: {e}"),
        }
    }

    service.backend().close().await;
}

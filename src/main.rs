use salvo::catcher::Catcher;
use salvo::prelude::*;
use salvo::server::ServerHandle;
use tokio::signal;
use tracing::info;

mod admission;
mod blob;
mod config;
mod correlator;
mod db;
mod error;
mod events;
mod executor;
mod hub;
mod ids;
mod models;
mod pending;
mod prelude;
mod registry;
mod response;
mod routers;
mod schema;
mod targeting;
mod transport;
mod utils;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    crate::config::init();
    let config = crate::config::get();

    let _guard = config.log.guard();
    tracing::info!("log level: {}", &config.log.filter_level);

    let pool = crate::db::init(&config.database_url);
    crate::hub::Hub::init(pool, config);

    crate::utils::limiter::periodic_rate_limit_report();

    let service = Service::new(routers::root()).catcher(Catcher::default());
    let addr = format!("{}:{}", config.listen_addr, config.listen_port);
    println!(
        "🚀 Server listening on ws://{}/connect",
        addr.replace("0.0.0.0", "127.0.0.1")
    );
    println!(
        "📖 Open API page: http://{}/scalar",
        addr.replace("0.0.0.0", "127.0.0.1")
    );

    let acceptor = TcpListener::new(&addr).bind().await;
    let server = Server::new(acceptor);
    tokio::spawn(shutdown_signal(server.handle()));
    server.serve(service).await;
}

async fn shutdown_signal(handle: ServerHandle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl_c signal received"),
        _ = terminate => info!("terminate signal received"),
    }
    handle.stop_graceful(std::time::Duration::from_secs(60));
}

#[cfg(test)]
mod tests {
    use salvo::prelude::*;
    use salvo::test::TestClient;

    use crate::config;

    #[tokio::test]
    async fn openapi_doc_is_served() {
        let config_path = std::env::temp_dir().join(format!(
            "rpchub-test-{}.toml",
            crate::ids::RequestId::new()
        ));
        std::fs::write(
            &config_path,
            "database_url = \"sqlite::memory:\"\n",
        )
        .unwrap();
        // SAFETY: test-only process-wide env var, set before config::init reads it.
        unsafe {
            std::env::set_var("APP_CONFIG", &config_path);
        }
        config::init();

        let service = Service::new(crate::routers::root());
        let status = TestClient::get("http://127.0.0.1/api-doc/openapi.json")
            .send(&service)
            .await
            .status_code;
        assert_eq!(status, Some(salvo::http::StatusCode::OK));
    }
}

use actix_files::Files;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use dotenv::dotenv;
use relay_server::websocket::ws_route;
use relay_server::{AppError, AppState, Cli, Settings};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> relay_server::Result<()> {
    dotenv().ok();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Settings::new(&cli)?;
    info!("Serving static files from {} at /", config.static_files.dir);

    let host = config.server.host.clone();
    let port = config.server.port;
    let workers = config.server.workers as usize;
    let state = web::Data::new(AppState::new(config));

    info!("Running on port {}", port);

    // Bind failure (e.g. port already in use) is fatal
    HttpServer::new(move || {
        let static_dir = state.config.static_files.dir.clone();
        App::new()
            .app_data(state.clone())
            .route("/ws", web::get().to(ws_route))
            .service(Files::new("/", static_dir).index_file("index.html"))
    })
    .bind((host.as_str(), port))?
    .workers(workers)
    .run()
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(())
}

#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use actix_web::{middleware::Logger, web, App, HttpServer};
use discharger::{configure_services, DischargerSettings, ServiceContainer};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = DischargerSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;

    // Build stores, oven, rendezvous and identity providers once
    let services = ServiceContainer::new(settings)
        .await
        .map_err(|e| std::io::Error::other(format!("Failed to initialize services: {e}")))?;

    start_server(services).await
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(services: ServiceContainer) -> std::io::Result<()> {
    let bind_address = services.settings().get_bind_address();
    print_startup_info(&bind_address, &services);

    let services = web::Data::new(services);
    HttpServer::new(move || {
        App::new()
            .app_data(services.clone())
            .wrap(Logger::default())
            .configure(configure_services)
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, services: &ServiceContainer) {
    let settings = services.settings();
    println!("Starting discharger on http://{bind_address}");
    println!("Public location: {}", services.location);
    println!();
    println!("Discharge endpoints:");
    println!("  GET|POST /discharge               - Discharge a third-party caveat");
    println!("  GET|POST /v1/discharger/discharge - Legacy discharge path");
    println!("  GET      /wait                    - Wait for an interactive login");
    println!("  POST     /discharge-token         - Exchange a one-time code");
    println!();
    println!("Login endpoints:");
    println!("  GET      /login                   - Start an interactive login");
    for provider in services.registry.iter() {
        println!(
            "  *        /login/{}/...  - {}",
            provider.name(),
            provider.description()
        );
    }
    println!();
    println!("System endpoints:");
    println!("  GET  /ping            - Health check");
    println!("  Templates folder: {}", settings.templates.folder);
    println!(
        "  Rendezvous wait timeout: {}s",
        settings.rendezvous.wait_timeout_secs
    );
}

// HTTP request handlers for the discharger
pub mod discharge;
pub mod health;
pub mod helpers;
pub mod login;
pub mod token;
pub mod wait;

// Re-export the main handler functions
pub use discharge::discharge;
pub use health::health;
pub use login::{login, provider_login};
pub use token::discharge_token;
pub use wait::wait;

use actix_web::web;

/// Register every discharger route
pub fn configure_services(cfg: &mut web::ServiceConfig) {
    cfg
        // Discharge endpoints, including the legacy path
        .route("/discharge", web::get().to(discharge))
        .route("/discharge", web::post().to(discharge))
        .route("/v1/discharger/discharge", web::get().to(discharge))
        .route("/v1/discharger/discharge", web::post().to(discharge))
        // Interaction endpoints
        .route("/wait", web::get().to(wait))
        .route("/login", web::get().to(login))
        .route("/login/{provider}/{path:.*}", web::get().to(provider_login))
        .route("/login/{provider}/{path:.*}", web::post().to(provider_login))
        .route("/login/{provider}/{path:.*}", web::put().to(provider_login))
        .route("/discharge-token", web::post().to(discharge_token))
        // Health endpoint
        .route("/ping", web::get().to(health));
}

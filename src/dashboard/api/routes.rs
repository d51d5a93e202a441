use actix_web::{web, Scope};
use super::handlers;
use log::info;

pub fn configure_routes() -> Scope {
    web::scope("/api")
        .route("/health", web::get().to(handlers::health))
        .route("/filter", web::get().to(handlers::get_filter))
        .route("/filter", web::put().to(handlers::update_filter))
        .route("/credentials", web::get().to(handlers::get_credentials))
        .route("/credentials/reset", web::post().to(handlers::reset_credentials))
        .route("/notifications/test", web::post().to(handlers::send_test_notification))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    info!("Configuring admin routes (/api)");
    cfg.service(configure_routes());
}

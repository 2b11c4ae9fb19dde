pub mod bangumi;
pub mod comment;
pub mod health;
pub mod match_routes;
pub mod search;

use actix_web::web;

use crate::middleware::TokenAuth;

fn configure_compat(cfg: &mut web::ServiceConfig) {
    search::configure(cfg);
    bangumi::configure(cfg);
    match_routes::configure(cfg);
    comment::configure(cfg);
}

/// Mounts the dandanplay-compatible surface under both
/// `/{token}/api/v2/...` and `/{token}/...`, since real clients have
/// historically been observed hitting either form. Both scopes share
/// the same handlers and are wrapped in the same token-gating
/// middleware.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/{token}/api/v2").wrap(TokenAuth).configure(configure_compat));
    cfg.service(web::scope("/{token}").wrap(TokenAuth).configure(configure_compat));
}

use actix_web::{HttpRequest, HttpResponse, http::header, route, web};
use tracing::{info, warn};

use crate::error::AppError;
use crate::state::AppState;

macros_utils::routes! {
    route cron_route,
}

fn authorized(req: &HttpRequest, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };

    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

/// Run one dispatcher batch. Schedulers tend to fire GET, so both verbs work.
#[route("/monitoring/cron", method = "GET", method = "POST")]
pub async fn cron_route(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    if !authorized(&req, state.cron_secret.as_deref()) {
        warn!("Rejected cron trigger with missing or wrong secret");
        return Err(AppError::Unauthorized);
    }

    let report = state.engine.dispatcher.run_batch().await?;
    info!(executed = report.summary.executed, "Cron batch complete");

    Ok(HttpResponse::Ok().json(report))
}

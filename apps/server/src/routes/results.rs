use actix_web::{HttpResponse, get, web};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

macros_utils::routes! {
    route results_route,
}

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    limit: Option<usize>,
}

/// Most recent results of a check, newest first
#[get("/monitoring/checks/{id}/results")]
pub async fn results_route(
    path: web::Path<Uuid>,
    query: web::Query<ResultsQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let check_id = path.into_inner();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let database = &state.engine.database;
    if database.get_check(check_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Monitoring check {check_id}")));
    }

    let results = database.recent_results(check_id, limit).await?;

    Ok(HttpResponse::Ok().json(results))
}

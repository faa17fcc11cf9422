use actix_web::{HttpResponse, get, web};
use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

macros_utils::routes! {
    route on_call_route,
}

#[get("/schedules/{id}/on-call")]
pub async fn on_call_route(path: web::Path<Uuid>, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let schedule_id = path.into_inner();

    let view = state
        .engine
        .on_call
        .current_on_call(schedule_id, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Schedule {schedule_id}")))?;

    Ok(HttpResponse::Ok().json(view))
}

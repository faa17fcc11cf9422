#![warn(clippy::all, clippy::pedantic)]

use std::env;
use std::net::SocketAddr;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use tracing::{info, warn};

mod error;
mod routes;
mod state;

use error::AppError;
use logger::init_tracing;
use lookout_service::Engine;
use lookout_service::config::Config;
use state::AppState;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenv().ok();
    init_tracing();

    let config = Config::from_config(env::var_os("LOOKOUT_CONFIG"))?;
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    let engine = Engine::open(&config).await?;
    let cron_secret = config.cron_secret().map(str::to_owned);
    if cron_secret.is_none() {
        warn!("No cron secret configured, /monitoring/cron accepts any caller");
    }

    run_server(addr, web::Data::new(AppState { engine, cron_secret })).await
}

async fn run_server(addr: SocketAddr, state: web::Data<AppState>) -> Result<(), AppError> {
    info!(%addr, "Starting HTTP server");

    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::routes))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::{StatusCode, header};
    use actix_web::test;
    use chrono::Utc;
    use lookout_service::database::models::{MonitoringCheck, OnCallSchedule, ScheduleMember};
    use lookout_service::monitoring::{CheckResult, CheckType, ProbeOutcome};
    use serde_json::Value;

    async fn state(cron_secret: Option<&str>) -> (tempfile::TempDir, web::Data<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("lookout.db");
        config.probes.inspect_certificates = false;

        let engine = Engine::open(&config).await.unwrap();
        let state = AppState { engine, cron_secret: cron_secret.map(str::to_owned) };
        (dir, web::Data::new(state))
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(App::new().app_data($state.clone()).configure(routes::routes)).await
        };
    }

    #[actix_web::test]
    async fn test_health() {
        let (_dir, state) = state(None).await;
        let app = app!(state);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;

        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_cron_requires_secret() {
        let (_dir, state) = state(Some("s3cret")).await;
        let app = app!(state);

        let missing = test::TestRequest::post().uri("/monitoring/cron").to_request();
        assert_eq!(test::call_service(&app, missing).await.status(), StatusCode::UNAUTHORIZED);

        let wrong = test::TestRequest::post()
            .uri("/monitoring/cron")
            .insert_header((header::AUTHORIZATION, "Bearer nope"))
            .to_request();
        assert_eq!(test::call_service(&app, wrong).await.status(), StatusCode::UNAUTHORIZED);

        let good = test::TestRequest::post()
            .uri("/monitoring/cron")
            .insert_header((header::AUTHORIZATION, "Bearer s3cret"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, good).await;
        assert_eq!(body["summary"]["totalChecks"], 0);
        assert!(body["results"].as_array().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_cron_open_without_secret() {
        let (_dir, state) = state(None).await;
        let app = app!(state);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/monitoring/cron").to_request()).await;

        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_on_call_lookup() {
        let (_dir, state) = state(None).await;
        let mut schedule = OnCallSchedule::new(
            "org".into(),
            "primary".into(),
            vec![
                ScheduleMember { user_id: "second".into(), order: 2 },
                ScheduleMember { user_id: "first".into(), order: 1 },
            ],
        );
        schedule.rotation_config.schedule_start = Some(Utc::now() - chrono::Duration::minutes(5));
        state.engine.database.save_schedule(&schedule).await.unwrap();
        let app = app!(state);

        let req = test::TestRequest::get().uri(&format!("/schedules/{}/on-call", schedule.id)).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["scheduleId"], schedule.id.to_string());
        assert_eq!(body["currentOnCallUserId"], "first");

        let missing = test::TestRequest::get()
            .uri(&format!("/schedules/{}/on-call", uuid::Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, missing).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_recent_results() {
        let (_dir, state) = state(None).await;
        let check = MonitoringCheck::new("org".into(), "api".into(), CheckType::Http, "https://example.com".into());
        state.engine.database.save_check(&check).await.unwrap();
        for ms in [10, 20, 30] {
            let result = CheckResult::from_outcome(check.id, &ProbeOutcome::success(ms, Some(200)), Utc::now());
            state.engine.database.insert_check_result(&result).await.unwrap();
        }
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri(&format!("/monitoring/checks/{}/results?limit=2", check.id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let unknown = test::TestRequest::get()
            .uri(&format!("/monitoring/checks/{}/results", uuid::Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, unknown).await.status(), StatusCode::NOT_FOUND);
    }
}

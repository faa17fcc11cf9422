use actix_web::web::ServiceConfig;

mod cron;
mod health;
mod results;
mod schedules;

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.configure(health::routes)
        .configure(cron::routes)
        .configure(schedules::routes)
        .configure(results::routes);
}

use lookout_service::Engine;

/// Shared across workers through `web::Data`
pub struct AppState {
    pub engine: Engine,
    /// Bearer token the cron trigger must present; `None` leaves it open
    pub cron_secret: Option<String>,
}

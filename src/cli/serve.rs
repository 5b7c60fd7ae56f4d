use anyhow::Result;

use crate::core::config::EnvConfig;
use crate::core::terminal::{print_status, print_step};
use crate::interfaces::web::{ApiServer, AppState};

/// Host the worker API until interrupted.
pub async fn run_serve(cfg: &EnvConfig, host: String, port: u16) -> Result<()> {
    let state = AppState::from_config(cfg)?;

    print_step("Starting worker API...");
    print_status("Endpoint", &format!("http://{}:{}", host, port));
    print_status("Routes", "GET /  POST /smoke");

    ApiServer::new(host, port, state).serve().await
}

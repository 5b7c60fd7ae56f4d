mod cli;
mod core;
mod interfaces;
mod logging;

use crate::core::terminal;

#[tokio::main]
async fn main() {
    logging::init();

    match cli::run_main().await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code as i32),
        Err(e) => {
            terminal::print_error(&format!("{e:#}"));
            std::process::exit(1);
        }
    }
}

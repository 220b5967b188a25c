#![forbid(unsafe_code)]

use token_migrator::console::ConsoleMode;
use tracing_subscriber::EnvFilter;

/// Log filter variable; `warn` when unset or invalid.
const LOG_ENV: &str = "TOKEN_MIGRATOR_LOG";

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let mode = ConsoleMode::detect();
    init_tracing(mode.wants_json());

    if let Err(error) = token_migrator::run_from_env() {
        if mode.wants_json() {
            eprintln!(
                "{}",
                serde_json::json!({
                    "status": "error",
                    "error": error.to_string(),
                    "exit_code": error.exit_code(),
                    "output_mode": mode,
                })
            );
        } else {
            eprintln!("{error}");
        }
        std::process::exit(error.exit_code());
    }
}

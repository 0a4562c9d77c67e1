mod auth;
mod backup;
mod calendar;
mod db;
mod error;
mod ipc;
mod model;
mod stats;
mod store;
mod transfer;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Logs go to stderr; stdout carries only protocol lines.
fn init_tracing() {
    let filter = std::env::var("PORTALD_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn preselect_workspace(state: &mut ipc::AppState) {
    let Some(path) = std::env::var_os("PORTALD_WORKSPACE").map(PathBuf::from) else {
        return;
    };
    match store::Store::open(&path) {
        Ok(s) => {
            state.workspace = Some(path);
            state.store = Some(s);
        }
        Err(e) => warn!(
            workspace = %path.display(),
            error = %format!("{e:#}"),
            "PORTALD_WORKSPACE could not be opened"
        ),
    }
}

fn main() {
    init_tracing();
    let mut state = ipc::AppState::default();
    preselect_workspace(&mut state);
    info!(version = env!("CARGO_PKG_VERSION"), "portald ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // No id to echo back.
            Err(e) => ipc::err("", "bad_json", e.to_string(), None),
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}

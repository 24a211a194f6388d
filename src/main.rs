mod backup;
mod calc;
mod columns;
mod db;
mod ids;
mod ipc;
mod reconcile;
mod records;
mod report;
mod store;
mod table;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "rollbookd", version, about = "Attendance and gradebook sidecar")]
struct Cli {
    /// Workspace directory to open at startup.
    #[arg(long, env = "ROLLBOOKD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Log filter, e.g. `info` or `rollbookd=debug`.
    #[arg(long, env = "ROLLBOOKD_LOG", default_value = "info")]
    log: String,
}

fn main() {
    let cli = Cli::parse();

    // stdout carries the IPC stream.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let mut state = ipc::AppState::default();
    if let Some(path) = cli.workspace.as_deref() {
        if let Err(e) = ipc::open_workspace(&mut state, path) {
            error!(workspace = %path.to_string_lossy(), error = %format!("{e:#}"), "failed to open workspace");
        }
    }

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

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                warn!(error = %e, "unparsable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}

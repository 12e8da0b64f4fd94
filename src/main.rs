use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

mod api;
mod cli;
mod error;
mod metrics;
mod models;
mod services;
mod state;

use cli::CommandArgs;
use services::logs::APP_LOG_FILE;
use services::LocalProcessManager;
use state::AppContext;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let args = CommandArgs::parse();
    init_logger(args.log_dir.as_deref())?;
    let bind_address = args.bind_address();

    let manager = Arc::new(LocalProcessManager::new());
    let state = AppContext::build(args.context_config(), manager).with_context(|| {
        format!("Failed to load settings from {}", args.settings_file.display())
    })?;

    state.start_background();
    log::info!("🔄 Bootstrapping OpenList core and auto-mounts...");
    state.sidecar.bootstrap().await;

    print_banner(&args);

    let server_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(server_state.clone()))
            .configure(api::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {bind_address}"))?
    .run();

    let result = server.await;

    log::info!("Shutting down, stopping mount processes...");
    state.teardown().await;
    result.context("HTTP server terminated with an error")
}

/// 同时写入标准错误与 app.log
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logger(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(dir) = log_dir {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(APP_LOG_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
    }
    builder.init();
    Ok(())
}

fn print_banner(args: &CommandArgs) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      Sidecar Coordinator v{:<32}║", env!("CARGO_PKG_VERSION"));
    println!("║      OpenList core + rclone mount lifecycle               ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Server starting on http://{}", args.bind_address());
    println!("📄 Settings file: {}", args.settings_file.display());
    println!();
    println!("📋 Available endpoints:");
    println!("  GET    /api/processes                 - List processes with status");
    println!("  POST   /api/processes                 - Create a process");
    println!("  PUT    /api/processes/{{id}}            - Update a process");
    println!("  DELETE /api/processes/{{id}}            - Stop and delete a process");
    println!("  POST   /api/processes/{{id}}/{{action}}   - start | stop | restart");
    println!("  GET    /api/remotes                   - List remotes");
    println!("  POST   /api/remotes/{{name}}/{{action}}   - mount | unmount");
    println!("  GET    /api/mounts                    - Mount status");
    println!("  POST   /api/core/{{action}}             - start | stop | restart OpenList");
    println!("  GET    /api/core/status               - Process state and /ping result");
    println!("  GET    /api/core/admin-password       - Initial admin password from the core log");
    println!("  GET    /api/logs/{{source}}             - openlist_core | rclone | app | openlist");
    println!("  GET    /api/settings                  - Current settings");
    println!("  GET    /metrics                       - Prometheus metrics");
    println!("  GET    /health                        - Health check");
    println!("═══════════════════════════════════════════════════════════");
}

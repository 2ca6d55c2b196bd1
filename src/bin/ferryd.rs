use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use ferry::cli::DaemonOpts;
use ferry::config::ServerConfig;
use ferry::logger::{JsonlLogger, Logger, NoopLogger};
use ferry::server::{self, ServerContext};

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Shutting down ferryd (Ctrl-C)...");
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let opts = DaemonOpts::parse();
    let file_cfg = ServerConfig::load_or_default(opts.config.as_deref())?;
    let cfg = opts.apply(file_cfg);
    cfg.validate()?;

    let logger: Arc<dyn Logger> = match cfg.log_file {
        Some(ref p) => Arc::new(JsonlLogger::new(p)?),
        None => Arc::new(NoopLogger),
    };

    let ctx = ServerContext::new(cfg, logger)?;

    println!("Starting ferry daemon:");
    println!("  Root: {}", ctx.storage.root().display());
    println!("  Bind: {}", ctx.config.bind);
    println!(
        "  Mode: {}{}",
        if ctx.config.one_shot { "one command per connection" } else { "multi-command connections" },
        if ctx.config.upload_ack { ", upload acknowledgements" } else { "" }
    );
    match ctx.config.io_timeout() {
        Some(t) => println!("  I/O timeout: {}s", t.as_secs()),
        None => println!("  I/O timeout: none"),
    }

    if ctx.config.bind.starts_with("0.0.0.0") {
        eprintln!("⚠️  WARNING: Binding to 0.0.0.0 exposes the daemon to all network interfaces");
        eprintln!("   This protocol is UNENCRYPTED and UNAUTHENTICATED");
        eprintln!("   Only use on trusted networks (LAN)");
        eprintln!();
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(server::serve(Arc::new(ctx)))
}

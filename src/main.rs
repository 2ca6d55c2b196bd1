//! ferry - client for the ferryd file store
//!
//! Connects once, then runs either the requested action or the interactive
//! menu on that single connection.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Write};
use std::path::Path;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;

use ferry::cli::{Action, ClientOpts};
use ferry::client::{Client, ClientOptions};
use ferry::menu::{prompt_choice, MenuChoice};
use ferry::protocol::timeouts;
use ferry::transfer::TransferOpts;
use ferry::ProtocolError;

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let args = ClientOpts::parse();
    let options = ClientOptions {
        transfer: TransferOpts {
            idle_timeout: timeouts::idle(args.timeout_secs),
            ..TransferOpts::default()
        },
        upload_ack: args.upload_ack,
        progress: !args.no_progress,
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let mut client = rt.block_on(Client::connect(&args.addr, options))?;
    println!("Connected to server {}", args.addr);

    match args.action {
        Some(Action::Upload { ref paths }) => {
            for p in paths {
                upload(&rt, &mut client, p)?;
            }
        }
        Some(Action::Download { ref names }) => {
            for n in names {
                download(&rt, &mut client, n, &args.download_dir)?;
            }
        }
        None => interactive(&rt, &mut client, &args.download_dir)?,
    }

    rt.block_on(client.close()).ok();
    Ok(())
}

fn interactive(rt: &Runtime, client: &mut Client<TcpStream>, download_dir: &Path) -> Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();
    loop {
        let Some(choice) = prompt_choice(&mut input, &mut out)? else {
            break;
        };
        match choice {
            MenuChoice::Upload(path) => upload(rt, client, Path::new(&path))?,
            MenuChoice::Download(name) => download(rt, client, &name, download_dir)?,
            MenuChoice::Exit => {
                println!("Exiting...");
                break;
            }
            MenuChoice::Invalid(_) => println!("Invalid choice. Try again."),
        }
        out.flush().ok();
    }
    Ok(())
}

/// Recoverable failures are printed; anything that desynchronizes the
/// connection ends the session.
fn report(res: Result<(), ProtocolError>) -> Result<()> {
    match res {
        Ok(()) => Ok(()),
        Err(e) if !e.is_fatal() => {
            eprintln!("Error: {}", e);
            Ok(())
        }
        Err(e) => Err(e).context("connection is no longer usable"),
    }
}

fn upload(rt: &Runtime, client: &mut Client<TcpStream>, path: &Path) -> Result<()> {
    report(rt.block_on(async {
        let n = client.upload(path).await?;
        println!("File {} uploaded successfully ({} bytes).", path.display(), n);
        Ok::<(), ProtocolError>(())
    }))
}

fn download(rt: &Runtime, client: &mut Client<TcpStream>, name: &str, dir: &Path) -> Result<()> {
    report(rt.block_on(async {
        let (target, n) = client.download(name, dir).await?;
        println!(
            "File {} downloaded successfully as {} ({} bytes).",
            name,
            target.display(),
            n
        );
        Ok::<(), ProtocolError>(())
    }))
}

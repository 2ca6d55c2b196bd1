//! ferryd accept loop and per-connection handler.

use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::command::{Command, Response};
use crate::config::ServerConfig;
use crate::error::{timed, ProtocolError};
use crate::frame::FrameReader;
use crate::logger::{Logger, SessionStats};
use crate::protocol::messages;
use crate::storage::Storage;
use crate::transfer::{receive_payload, send_payload, TransferOpts};

/// Everything a connection task needs, shared read-only.
pub struct ServerContext {
    pub config: ServerConfig,
    pub storage: Storage,
    pub logger: Arc<dyn Logger>,
}

impl ServerContext {
    pub fn new(config: ServerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(&config.root)?;
        Ok(Self {
            config,
            storage,
            logger,
        })
    }
}

/// Connection handler phases, in order of appearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingHeader,
    Dispatching,
    ReceivingPayload,
    SendingPayload,
    RejectingUnknown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::AwaitingHeader => "awaiting header",
            Phase::Dispatching => "dispatching",
            Phase::ReceivingPayload => "receiving payload",
            Phase::SendingPayload => "sending payload",
            Phase::RejectingUnknown => "rejecting unknown command",
        };
        f.write_str(s)
    }
}

/// Why a connection ended.
#[derive(Debug)]
pub enum CloseReason {
    /// Peer closed between commands
    PeerClosed,
    /// one_shot mode finished its command
    Done,
    UnknownCommand(String),
    /// Failure in the given phase
    Failed(Phase, ProtocolError),
}

/// Result of one dispatched command.
enum Step {
    Continue,
    Close(CloseReason),
}

pub async fn serve(ctx: Arc<ServerContext>) -> Result<()> {
    let bind = ctx.config.bind.clone();
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {}", bind))?;
    serve_listener(listener, ctx).await
}

/// Accept forever; one task per connection.
pub async fn serve_listener(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    eprintln!(
        "ferryd listening on {} root={}",
        listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
        ctx.storage.root().display()
    );
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                eprintln!("accept failed: {}", e);
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let peer = peer.to_string();
            let (rd, wr) = stream.into_split();
            let (reason, stats) = handle_connection(rd, wr, &peer, &ctx).await;
            match reason {
                CloseReason::Failed(phase, e) => {
                    eprintln!("[{}] closed while {}: {}", peer, phase, e)
                }
                CloseReason::UnknownCommand(raw) => {
                    eprintln!("[{}] closed after unknown command: {:?}", peer, raw)
                }
                CloseReason::PeerClosed | CloseReason::Done => {}
            }
            eprintln!(
                "[{}] disconnected: {} command(s), {} byte(s) in, {} byte(s) out",
                peer, stats.commands, stats.bytes_received, stats.bytes_sent
            );
        });
    }
}

/// Run the command/payload state machine until the connection closes.
pub async fn handle_connection<R, W>(
    reader: R,
    mut writer: W,
    peer: &str,
    ctx: &ServerContext,
) -> (CloseReason, SessionStats)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let cfg = &ctx.config;
    let opts = cfg.transfer_opts();
    let mut reader = FrameReader::with_capacity(cfg.chunk_size, reader).with_max_header(cfg.max_header_len);
    let mut stats = SessionStats::default();

    eprintln!("[{}] connected", peer);
    ctx.logger.connected(peer);

    let reason = loop {
        // A quiet peer between commands is an idle session, not a stalled transfer
        let line = match reader.read_header_timed(None, opts.idle_timeout).await {
            Ok(Some(line)) => line,
            Ok(None) => break CloseReason::PeerClosed,
            Err(e) => break CloseReason::Failed(Phase::AwaitingHeader, e),
        };
        stats.commands += 1;

        let step = match Command::from_header(&line) {
            Command::Upload { filename, size } => {
                receive_upload(&mut reader, &mut writer, peer, ctx, &opts, &filename, size, &mut stats).await
            }
            Command::Download { filename } => {
                send_download(&mut writer, peer, ctx, &opts, &filename, &mut stats).await
            }
            Command::Unknown { raw } => {
                eprintln!("[{}] {}: {:?}", peer, Phase::RejectingUnknown, raw);
                ctx.logger.rejected(peer, &raw, "unknown command");
                Step::Close(CloseReason::UnknownCommand(raw))
            }
        };

        match step {
            Step::Close(reason) => break reason,
            Step::Continue if cfg.one_shot => break CloseReason::Done,
            Step::Continue => {}
        }
    };

    if let CloseReason::Failed(phase, ref e) = reason {
        ctx.logger.error(peer, &phase.to_string(), &e.to_string());
    }
    let _ = writer.shutdown().await;
    ctx.logger.closed(peer, &stats);
    (reason, stats)
}

#[allow(clippy::too_many_arguments)]
async fn receive_upload<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut W,
    peer: &str,
    ctx: &ServerContext,
    opts: &TransferOpts,
    filename: &str,
    size: u64,
    stats: &mut SessionStats,
) -> Step
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    eprintln!("[{}] receiving file: {} ({} bytes)", peer, filename, size);

    let (path, mut file) = match ctx.storage.create(filename).await {
        Ok(opened) => opened,
        Err(e) => {
            // Payload bytes are already in flight; report and drop the connection.
            // Without acks the client never reads a reply to an upload.
            eprintln!("[{}] refusing upload {}: {}", peer, filename, e);
            ctx.logger.rejected(peer, filename, &e.to_string());
            if ctx.config.upload_ack {
                let message = match e {
                    ProtocolError::RejectedFilename { .. } => messages::INVALID_FILENAME,
                    _ => messages::OPEN_FAILED,
                };
                let _ = respond(writer, opts, &Response::Error { message: message.to_string() }).await;
            }
            return Step::Close(CloseReason::Failed(Phase::Dispatching, e));
        }
    };

    match receive_payload(reader, &mut file, size, opts, None).await {
        Ok(n) => {
            stats.files_received += 1;
            stats.bytes_received += n;
            eprintln!("[{}] file {} received successfully ({})", peer, filename, path.display());
            ctx.logger.upload_done(peer, filename, n);
        }
        Err(e) => {
            if let ProtocolError::PayloadTruncated { expected, remaining } = e {
                stats.bytes_received += expected - remaining;
            }
            return Step::Close(CloseReason::Failed(Phase::ReceivingPayload, e));
        }
    }

    if ctx.config.upload_ack {
        if let Err(e) = respond(writer, opts, &Response::Ok { size }).await {
            return Step::Close(CloseReason::Failed(Phase::ReceivingPayload, e));
        }
    }
    Step::Continue
}

async fn send_download<W>(
    writer: &mut W,
    peer: &str,
    ctx: &ServerContext,
    opts: &TransferOpts,
    filename: &str,
    stats: &mut SessionStats,
) -> Step
where
    W: AsyncWrite + Unpin,
{
    eprintln!("[{}] client requests file: {}", peer, filename);

    let (mut file, size) = match ctx.storage.open_read(filename).await {
        Ok(opened) => opened,
        Err(e) => {
            let message = match e {
                ProtocolError::FileNotFound(_) => messages::FILE_NOT_FOUND.to_string(),
                ProtocolError::RejectedFilename { .. } => messages::INVALID_FILENAME.to_string(),
                ref other => other.to_string(),
            };
            eprintln!("[{}] cannot serve {}: {}", peer, filename, e);
            ctx.logger.rejected(peer, filename, &e.to_string());
            // Nothing but the header goes out, so the stream stays in sync
            return match respond(writer, opts, &Response::Error { message }).await {
                Ok(()) => Step::Continue,
                Err(e) => Step::Close(CloseReason::Failed(Phase::Dispatching, e)),
            };
        }
    };

    if let Err(e) = respond(writer, opts, &Response::Ok { size }).await {
        return Step::Close(CloseReason::Failed(Phase::Dispatching, e));
    }
    match send_payload(&mut file, writer, size, opts, None).await {
        Ok(n) => {
            stats.files_sent += 1;
            stats.bytes_sent += n;
            eprintln!("[{}] file {} sent successfully", peer, filename);
            ctx.logger.download_done(peer, filename, n);
            Step::Continue
        }
        Err(e) => Step::Close(CloseReason::Failed(Phase::SendingPayload, e)),
    }
}

async fn respond<W>(writer: &mut W, opts: &TransferOpts, response: &Response) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let line = response.header_line();
    timed("response write", opts.idle_timeout, writer.write_all(line.as_bytes())).await?;
    timed("response flush", opts.idle_timeout, writer.flush()).await?;
    Ok(())
}

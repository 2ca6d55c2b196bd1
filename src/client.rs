//! Client side of the protocol: one connection, any number of sequential
//! commands. Each command drains its payload fully before the next header.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use crate::command::{validate_token, Command, Response};
use crate::error::{timed, ProtocolError};
use crate::frame::FrameReader;
use crate::protocol::{timeouts, DOWNLOAD_PREFIX};
use crate::transfer::{receive_payload, send_payload, TransferOpts};

#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    pub transfer: TransferOpts,
    /// Wait for `OK <size>` after each upload
    pub upload_ack: bool,
    pub progress: bool,
}

pub struct Client<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    opts: ClientOptions,
}

impl Client<TcpStream> {
    pub async fn connect(addr: &str, opts: ClientOptions) -> anyhow::Result<Self> {
        let connect_timeout = Duration::from_millis(timeouts::CONNECT_MS);
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| anyhow::anyhow!("Connection timeout ({} ms)", timeouts::CONNECT_MS))?
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", addr, e))?;
        let _ = stream.set_nodelay(true);
        Ok(Self::new(stream, opts))
    }
}

impl<S: AsyncRead + AsyncWrite> Client<S> {
    pub fn new(stream: S, opts: ClientOptions) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: FrameReader::with_capacity(opts.transfer.chunk_size, rd),
            writer: wr,
            opts,
        }
    }

    /// Upload `path` under its base name.
    pub async fn upload(&mut self, path: &Path) -> Result<u64, ProtocolError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.upload_as(path, &name).await
    }

    pub async fn upload_as(&mut self, path: &Path, name: &str) -> Result<u64, ProtocolError> {
        validate_token(name)?;
        let mut file = match File::open(path).await {
            Ok(f) => f,
            Err(e) => {
                return Err(ProtocolError::LocalFile {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        let size = file.metadata().await?.len();

        let header = Command::Upload {
            filename: name.to_string(),
            size,
        };
        self.write_header(&header).await?;

        let pb = self.progress_bar(size, name);
        let sent = send_payload(&mut file, &mut self.writer, size, &self.opts.transfer, pb.as_ref()).await;
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        let sent = sent?;

        if self.opts.upload_ack {
            match self.read_response().await? {
                Response::Ok { size: acked } if acked == sent => {}
                Response::Ok { size: acked } => {
                    return Err(ProtocolError::BadResponse(format!("OK {} (sent {})", acked, sent)))
                }
                // The server hangs up after refusing an upload
                Response::Error { message } => return Err(ProtocolError::UploadRejected(message)),
            }
        }
        Ok(sent)
    }

    /// Download `name` into `dir/downloaded_<name>`.
    pub async fn download(&mut self, name: &str, dir: &Path) -> Result<(PathBuf, u64), ProtocolError> {
        validate_token(name)?;
        self.write_header(&Command::Download {
            filename: name.to_string(),
        })
        .await?;
        let size = match self.read_response().await? {
            Response::Ok { size } => size,
            Response::Error { message } => return Err(ProtocolError::Remote(message)),
        };

        let target = dir.join(format!("{}{}", DOWNLOAD_PREFIX, local_name(name)));
        let mut file = File::create(&target).await?;
        let n = self.receive(&mut file, size, name).await?;
        Ok((target, n))
    }

    /// Download `name` into an arbitrary sink.
    pub async fn download_to<W>(&mut self, name: &str, sink: &mut W) -> Result<u64, ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        validate_token(name)?;
        self.write_header(&Command::Download {
            filename: name.to_string(),
        })
        .await?;
        match self.read_response().await? {
            Response::Ok { size } => self.receive(sink, size, name).await,
            Response::Error { message } => Err(ProtocolError::Remote(message)),
        }
    }

    pub async fn close(mut self) -> Result<(), ProtocolError> {
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn receive<W>(&mut self, sink: &mut W, size: u64, name: &str) -> Result<u64, ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let pb = self.progress_bar(size, name);
        let res = receive_payload(&mut self.reader, sink, size, &self.opts.transfer, pb.as_ref()).await;
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        res
    }

    async fn write_header(&mut self, command: &Command) -> Result<(), ProtocolError> {
        let line = command.header_line();
        let idle = self.opts.transfer.idle_timeout;
        timed("header write", idle, self.writer.write_all(line.as_bytes())).await?;
        timed("header flush", idle, self.writer.flush()).await?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Response, ProtocolError> {
        let idle = self.opts.transfer.idle_timeout;
        match self.reader.read_header_timed(idle, idle).await? {
            Some(line) if line.is_lossy() => Err(ProtocolError::BadResponse(line.as_str().to_string())),
            Some(line) => Response::parse(&line),
            None => Err(ProtocolError::NoResponse),
        }
    }

    fn progress_bar(&self, len: u64, name: &str) -> Option<ProgressBar> {
        if !self.opts.progress {
            return None;
        }
        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:30.cyan/blue} {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message(name.to_string());
        Some(pb)
    }
}

// Only the last component of a server-side name is used locally
fn local_name(name: &str) -> &str {
    name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    #[test]
    fn local_name_strips_directories() {
        assert_eq!(local_name("report.txt"), "report.txt");
        assert_eq!(local_name("../../etc/passwd"), "passwd");
        assert_eq!(local_name("a\\b.txt"), "b.txt");
    }

    #[tokio::test]
    async fn upload_writes_header_then_payload() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("report.txt");
        std::fs::write(&src, b"hello world!\n").unwrap();

        let (client_end, mut server_end) = tokio::io::duplex(1024);
        let mut client = Client::new(client_end, ClientOptions::default());
        let sent = client.upload(&src).await.unwrap();
        assert_eq!(sent, 13);
        client.close().await.unwrap();

        let mut wire = Vec::new();
        server_end.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire, b"UPLOAD report.txt 13\nhello world!\n");
    }

    #[tokio::test]
    async fn upload_rejects_whitespace_names() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("my report.txt");
        std::fs::write(&src, b"x").unwrap();
        let (client_end, _server_end) = tokio::io::duplex(64);
        let mut client = Client::new(client_end, ClientOptions::default());
        assert!(matches!(
            client.upload(&src).await,
            Err(ProtocolError::UnrepresentableFilename(_))
        ));
    }

    #[tokio::test]
    async fn download_reads_ok_header_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let (client_end, server_end) = tokio::io::duplex(1024);
        let server = tokio::spawn(async move {
            let (rd, mut wr) = tokio::io::split(server_end);
            let mut rd = BufReader::new(rd);
            let mut line = String::new();
            rd.read_line(&mut line).await.unwrap();
            assert_eq!(line, "DOWNLOAD report.txt\n");
            // header and payload in one write, plus the next response
            wr.write_all(b"OK 13\nhello world!\nERROR File not found\n").await.unwrap();
            line.clear();
            rd.read_line(&mut line).await.unwrap();
            assert_eq!(line, "DOWNLOAD gone.txt\n");
        });

        let mut client = Client::new(client_end, ClientOptions::default());
        let (path, n) = client.download("report.txt", dir.path()).await.unwrap();
        assert_eq!(n, 13);
        assert_eq!(path, dir.path().join("downloaded_report.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world!\n");

        match client.download("gone.txt", dir.path()).await {
            Err(ProtocolError::Remote(msg)) => assert_eq!(msg, "File not found"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!dir.path().join("downloaded_gone.txt").exists());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn upload_ack_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, b"abc").unwrap();

        let (client_end, server_end) = tokio::io::duplex(1024);
        let server = tokio::spawn(async move {
            let (rd, mut wr) = tokio::io::split(server_end);
            let mut rd = BufReader::new(rd);
            let mut line = String::new();
            rd.read_line(&mut line).await.unwrap();
            let mut body = [0u8; 3];
            rd.read_exact(&mut body).await.unwrap();
            wr.write_all(b"OK 3\n").await.unwrap();
        });

        let opts = ClientOptions {
            upload_ack: true,
            ..ClientOptions::default()
        };
        let mut client = Client::new(client_end, opts);
        assert_eq!(client.upload(&src).await.unwrap(), 3);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_upload_ends_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, b"abc").unwrap();

        let (client_end, server_end) = tokio::io::duplex(1024);
        let server = tokio::spawn(async move {
            let (rd, mut wr) = tokio::io::split(server_end);
            let mut rd = BufReader::new(rd);
            let mut line = String::new();
            rd.read_line(&mut line).await.unwrap();
            wr.write_all(b"ERROR Cannot open file for writing\n").await.unwrap();
        });

        let opts = ClientOptions {
            upload_ack: true,
            ..ClientOptions::default()
        };
        let mut client = Client::new(client_end, opts);
        match client.upload(&src).await {
            Err(e @ ProtocolError::UploadRejected(_)) => assert!(e.is_fatal()),
            other => panic!("unexpected: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_hangup_before_response() {
        let (client_end, server_end) = tokio::io::duplex(64);
        drop(server_end);
        let mut client = Client::new(client_end, ClientOptions::default());
        let mut sink = Vec::new();
        assert!(client.download_to("x", &mut sink).await.is_err());
    }
}

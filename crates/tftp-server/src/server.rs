//! The TFTP serve loop and per-transfer sessions.

use crate::error::TftpError;
use crate::packet::{Packet, ERR_ACCESS_VIOLATION, ERR_ILLEGAL_OPERATION, ERR_NOT_FOUND};
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const DEFAULT_SCRIPT_NAME: &str = "default";
/// Minimal iPXE script for hosts with nothing better to do yet.
pub const DEFAULT_SCRIPT: &str = "#!ipxe\nreboot\n";

const DEFAULT_BLOCK_SIZE: usize = 512;
/// blksize negotiation bounds; the ceiling keeps datagrams under typical MTU.
const MIN_BLOCK_SIZE: usize = 8;
const MAX_BLOCK_SIZE: usize = 1428;

const RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_RETRANSMITS: u32 = 5;

type Source = Box<dyn AsyncRead + Send + Unpin>;

/// TFTP server over a pre-curated directory.
///
/// No path sanitization beyond the filesystem's own resolution happens
/// here; the directory must contain exactly what should be served.
pub struct TftpServer {
    directory: PathBuf,
    port: u16,
    single_port: bool,
}

impl TftpServer {
    pub fn new(directory: impl Into<PathBuf>, port: u16, single_port: bool) -> Self {
        Self {
            directory: directory.into(),
            port,
            single_port,
        }
    }

    pub async fn run(self) -> Result<(), TftpError> {
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", self.port)).await?);
        info!(
            "TFTP server listening on port {} with directory {} (single_port={})",
            self.port,
            self.directory.display(),
            self.single_port
        );

        // live transfers, only used in single-port mode
        let sessions: Arc<Mutex<HashMap<SocketAddr, mpsc::Sender<Packet>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut buf = [0u8; 2048];
        loop {
            let (len, peer) = socket.recv_from(&mut buf).await?;
            let packet = match Packet::parse(&buf[..len]) {
                Ok(packet) => packet,
                Err(err) => {
                    debug!("ignoring malformed packet from {peer}: {err}");
                    continue;
                }
            };

            match packet {
                Packet::ReadRequest {
                    filename,
                    mode,
                    options,
                } => {
                    let source = match self.open_source(&filename, peer).await {
                        Ok(source) => source,
                        Err(err) => {
                            debug!("cannot serve {filename} to {peer}: {err}");
                            let nack = Packet::Error {
                                code: ERR_NOT_FOUND,
                                message: "File not found".to_string(),
                            };
                            socket.send_to(&nack.encode(), peer).await?;
                            continue;
                        }
                    };
                    let source = match mode.as_str() {
                        "netascii" => match netascii_source(source).await {
                            Ok(source) => source,
                            Err(err) => {
                                warn!("netascii conversion for {filename} failed: {err}");
                                let nack = Packet::Error {
                                    code: ERR_NOT_FOUND,
                                    message: "File not readable".to_string(),
                                };
                                socket.send_to(&nack.encode(), peer).await?;
                                continue;
                            }
                        },
                        _ => source,
                    };
                    self.spawn_transfer(&socket, &sessions, peer, source, options)
                        .await;
                }
                Packet::WriteRequest { filename } => {
                    info!("refusing write request for {filename} from {peer}");
                    let nack = Packet::Error {
                        code: ERR_ACCESS_VIOLATION,
                        message: "Server is read-only".to_string(),
                    };
                    socket.send_to(&nack.encode(), peer).await?;
                }
                Packet::Ack { .. } | Packet::Error { .. } if self.single_port => {
                    // route to the transfer this peer belongs to
                    let sender = sessions.lock().unwrap().get(&peer).cloned();
                    match sender {
                        Some(sender) => {
                            let _ = sender.send(packet).await;
                        }
                        None => debug!("no transfer in progress for {peer}"),
                    }
                }
                other => {
                    debug!("unexpected packet {other:?} from {peer}");
                    let nack = Packet::Error {
                        code: ERR_ILLEGAL_OPERATION,
                        message: "Illegal TFTP operation".to_string(),
                    };
                    socket.send_to(&nack.encode(), peer).await?;
                }
            }
        }
    }

    /// Resolve a filename to a byte source plus its size when known.
    async fn open_source(
        &self,
        filename: &str,
        peer: SocketAddr,
    ) -> Result<(Source, Option<u64>), TftpError> {
        if filename == DEFAULT_SCRIPT_NAME {
            info!("tftp: {peer} requested default script");
            let bytes = DEFAULT_SCRIPT.as_bytes().to_vec();
            let size = bytes.len() as u64;
            return Ok((Box::new(Cursor::new(bytes)), Some(size)));
        }
        info!("tftp: {peer} requested file {filename}");
        let path = self.directory.join(filename);
        let file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await.ok().map(|m| m.len());
        Ok((Box::new(file), size))
    }

    async fn spawn_transfer(
        &self,
        socket: &Arc<UdpSocket>,
        sessions: &Arc<Mutex<HashMap<SocketAddr, mpsc::Sender<Packet>>>>,
        peer: SocketAddr,
        source: (Source, Option<u64>),
        options: Vec<(String, String)>,
    ) {
        let (reader, size) = source;
        if self.single_port {
            let (tx, rx) = mpsc::channel(8);
            sessions.lock().unwrap().insert(peer, tx);
            let socket = socket.clone();
            let sessions = sessions.clone();
            tokio::spawn(async move {
                let sock = TransferSocket::Shared {
                    socket,
                    peer,
                    inbox: rx,
                };
                finish_transfer(sock, peer, reader, size, options).await;
                sessions.lock().unwrap().remove(&peer);
            });
        } else {
            tokio::spawn(async move {
                // classic mode answers from a fresh ephemeral port
                let owned = match UdpSocket::bind(("0.0.0.0", 0)).await {
                    Ok(socket) => socket,
                    Err(err) => {
                        error!("cannot bind transfer socket for {peer}: {err}");
                        return;
                    }
                };
                if let Err(err) = owned.connect(peer).await {
                    error!("cannot connect transfer socket to {peer}: {err}");
                    return;
                }
                let sock = TransferSocket::Owned(owned);
                finish_transfer(sock, peer, reader, size, options).await;
            });
        }
    }
}

async fn finish_transfer(
    mut sock: TransferSocket,
    peer: SocketAddr,
    reader: Source,
    size: Option<u64>,
    options: Vec<(String, String)>,
) {
    match run_transfer(&mut sock, reader, size, options).await {
        Ok(sent) => info!("tftp: sent {sent} bytes to {peer}"),
        Err(err) => {
            warn!("tftp: transfer to {peer} failed: {err}");
            let abort = Packet::Error {
                code: 0,
                message: err.to_string(),
            };
            let _ = sock.send(&abort).await;
        }
    }
}

/// Where a transfer's packets travel: an owned per-transfer socket, or the
/// shared listen socket with replies routed in via a channel.
enum TransferSocket {
    Owned(UdpSocket),
    Shared {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        inbox: mpsc::Receiver<Packet>,
    },
}

impl TransferSocket {
    async fn send(&mut self, packet: &Packet) -> Result<(), TftpError> {
        match self {
            TransferSocket::Owned(socket) => {
                socket.send(&packet.encode()).await?;
            }
            TransferSocket::Shared { socket, peer, .. } => {
                socket.send_to(&packet.encode(), *peer).await?;
            }
        }
        Ok(())
    }

    /// Next packet from the peer, or None on timeout.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<Packet>, TftpError> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        match self {
            TransferSocket::Owned(socket) => {
                let mut buf = [0u8; 2048];
                tokio::select! {
                    result = socket.recv(&mut buf) => {
                        let len = result?;
                        Ok(Packet::parse(&buf[..len]).ok())
                    }
                    _ = &mut deadline => Ok(None),
                }
            }
            TransferSocket::Shared { inbox, .. } => {
                tokio::select! {
                    packet = inbox.recv() => Ok(packet),
                    _ = &mut deadline => Ok(None),
                }
            }
        }
    }
}

/// Convert a source to netascii line endings (LF becomes CRLF, a bare CR
/// becomes CR NUL). The whole source is converted up front; netascii is
/// only ever used for the small script files.
async fn netascii_source(source: (Source, Option<u64>)) -> Result<(Source, Option<u64>), TftpError>
{
    let (mut reader, _) = source;
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw).await?;

    let mut converted = Vec::with_capacity(raw.len() + raw.len() / 8);
    for byte in raw {
        match byte {
            b'\n' => converted.extend_from_slice(b"\r\n"),
            b'\r' => converted.extend_from_slice(b"\r\0"),
            byte => converted.push(byte),
        }
    }
    let size = converted.len() as u64;
    Ok((Box::new(Cursor::new(converted)), Some(size)))
}

/// Negotiate options, then walk the file block by block.
async fn run_transfer(
    sock: &mut TransferSocket,
    mut reader: Source,
    size: Option<u64>,
    options: Vec<(String, String)>,
) -> Result<u64, TftpError> {
    let mut blksize = DEFAULT_BLOCK_SIZE;
    let mut timeout = RETRANSMIT_TIMEOUT;
    let mut reply_options = Vec::new();
    for (key, value) in &options {
        match key.as_str() {
            "blksize" => {
                if let Ok(wanted) = value.parse::<usize>() {
                    blksize = wanted.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE);
                    reply_options.push(("blksize".to_string(), blksize.to_string()));
                }
            }
            "timeout" => {
                // RFC 2349 allows 1-255 seconds
                if let Ok(secs @ 1..=255) = value.parse::<u64>() {
                    timeout = Duration::from_secs(secs);
                    reply_options.push(("timeout".to_string(), secs.to_string()));
                }
            }
            "tsize" => {
                if let Some(size) = size {
                    reply_options.push(("tsize".to_string(), size.to_string()));
                }
            }
            _ => {}
        }
    }

    if !reply_options.is_empty() {
        exchange(
            sock,
            &Packet::Oack {
                options: reply_options,
            },
            0,
            timeout,
        )
        .await?;
    }

    let mut block: u16 = 1;
    let mut sent: u64 = 0;
    loop {
        let chunk = read_block(&mut reader, blksize).await?;
        let last = chunk.len() < blksize;
        sent += chunk.len() as u64;
        exchange(
            sock,
            &Packet::Data {
                block,
                data: chunk,
            },
            block,
            timeout,
        )
        .await?;
        if last {
            return Ok(sent);
        }
        // block numbers wrap for files past 65535 blocks
        block = block.wrapping_add(1);
    }
}

/// Send a packet and wait for the matching ACK, retransmitting as needed.
async fn exchange(
    sock: &mut TransferSocket,
    packet: &Packet,
    expected_block: u16,
    timeout: Duration,
) -> Result<(), TftpError> {
    for _ in 0..=MAX_RETRANSMITS {
        sock.send(packet).await?;
        loop {
            match sock.recv(timeout).await? {
                Some(Packet::Ack { block }) if block == expected_block => return Ok(()),
                Some(Packet::Ack { block }) => {
                    debug!("stale ACK for block {block}, expecting {expected_block}");
                }
                Some(Packet::Error { code, message }) => {
                    return Err(TftpError::PeerError { code, message });
                }
                Some(other) => debug!("unexpected packet mid-transfer: {other:?}"),
                None => break, // timeout: retransmit
            }
        }
    }
    Err(TftpError::Timeout {
        block: expected_block,
    })
}

/// Fill one block, tolerating short reads from the source.
async fn read_block(reader: &mut Source, blksize: usize) -> Result<Vec<u8>, TftpError> {
    let mut chunk = vec![0u8; blksize];
    let mut filled = 0;
    while filled < blksize {
        let n = reader.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn start_server(dir: &TempDir, single_port: bool) -> (u16, tokio::task::JoinHandle<()>) {
        // grab a free port, then hand it to the server
        let probe = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let server = TftpServer::new(dir.path(), port, single_port);
        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        (port, handle)
    }

    async fn fetch(port: u16, filename: &str) -> Result<Vec<u8>, Packet> {
        let client = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server = SocketAddr::from(([127, 0, 0, 1], port));
        let rrq = Packet::ReadRequest {
            filename: filename.to_string(),
            mode: "octet".to_string(),
            options: vec![],
        };
        client.send_to(&rrq.encode(), server).await.unwrap();

        let mut content = Vec::new();
        let mut buf = [0u8; 2048];
        loop {
            let (len, from) = client.recv_from(&mut buf).await.unwrap();
            match Packet::parse(&buf[..len]).unwrap() {
                Packet::Data { block, data } => {
                    let done = data.len() < DEFAULT_BLOCK_SIZE;
                    content.extend_from_slice(&data);
                    let ack = Packet::Ack { block };
                    client.send_to(&ack.encode(), from).await.unwrap();
                    if done {
                        return Ok(content);
                    }
                }
                other => return Err(other),
            }
        }
    }

    #[tokio::test]
    async fn serves_files_from_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("boot.efi"), b"efi-bytes").unwrap();
        let (port, handle) = start_server(&dir, false).await;

        let content = fetch(port, "boot.efi").await.unwrap();
        assert_eq!(content, b"efi-bytes");
        handle.abort();
    }

    #[tokio::test]
    async fn serves_builtin_default_script() {
        let dir = TempDir::new().unwrap();
        let (port, handle) = start_server(&dir, false).await;

        let content = fetch(port, DEFAULT_SCRIPT_NAME).await.unwrap();
        assert_eq!(content, DEFAULT_SCRIPT.as_bytes());
        handle.abort();
    }

    #[tokio::test]
    async fn missing_file_yields_not_found() {
        let dir = TempDir::new().unwrap();
        let (port, handle) = start_server(&dir, false).await;

        match fetch(port, "nope.efi").await.unwrap_err() {
            Packet::Error { code, .. } => assert_eq!(code, ERR_NOT_FOUND),
            other => panic!("unexpected packet {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn single_port_mode_answers_from_listen_port() {
        let dir = TempDir::new().unwrap();
        // two blocks worth of content to force a mid-transfer ACK
        let payload = vec![0xabu8; DEFAULT_BLOCK_SIZE + 100];
        std::fs::write(dir.path().join("big.bin"), &payload).unwrap();
        let (port, handle) = start_server(&dir, true).await;

        let client = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server = SocketAddr::from(([127, 0, 0, 1], port));
        let rrq = Packet::ReadRequest {
            filename: "big.bin".to_string(),
            mode: "octet".to_string(),
            options: vec![],
        };
        client.send_to(&rrq.encode(), server).await.unwrap();

        let mut content = Vec::new();
        let mut buf = [0u8; 2048];
        loop {
            let (len, from) = client.recv_from(&mut buf).await.unwrap();
            // every packet must come from the listen port itself
            assert_eq!(from, server);
            match Packet::parse(&buf[..len]).unwrap() {
                Packet::Data { block, data } => {
                    let done = data.len() < DEFAULT_BLOCK_SIZE;
                    content.extend_from_slice(&data);
                    client
                        .send_to(&Packet::Ack { block }.encode(), server)
                        .await
                        .unwrap();
                    if done {
                        break;
                    }
                }
                other => panic!("unexpected packet {other:?}"),
            }
        }
        assert_eq!(content, payload);
        handle.abort();
    }

    #[tokio::test]
    async fn netascii_mode_converts_line_endings() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("script.ipxe"), b"#!ipxe\nreboot\n").unwrap();
        let (port, handle) = start_server(&dir, false).await;

        let client = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server = SocketAddr::from(([127, 0, 0, 1], port));
        let rrq = Packet::ReadRequest {
            filename: "script.ipxe".to_string(),
            mode: "netascii".to_string(),
            options: vec![],
        };
        client.send_to(&rrq.encode(), server).await.unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        match Packet::parse(&buf[..len]).unwrap() {
            Packet::Data { data, .. } => assert_eq!(data, b"#!ipxe\r\nreboot\r\n"),
            other => panic!("unexpected packet {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn timeout_option_is_acknowledged() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("boot.efi"), b"bytes").unwrap();
        let (port, handle) = start_server(&dir, false).await;

        let client = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server = SocketAddr::from(([127, 0, 0, 1], port));
        let rrq = Packet::ReadRequest {
            filename: "boot.efi".to_string(),
            mode: "octet".to_string(),
            options: vec![("timeout".to_string(), "2".to_string())],
        };
        client.send_to(&rrq.encode(), server).await.unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        match Packet::parse(&buf[..len]).unwrap() {
            Packet::Oack { options } => {
                assert_eq!(options, vec![("timeout".to_string(), "2".to_string())]);
            }
            other => panic!("expected OACK, got {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn write_requests_are_refused() {
        let dir = TempDir::new().unwrap();
        let (port, handle) = start_server(&dir, false).await;

        let client = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server = SocketAddr::from(([127, 0, 0, 1], port));
        let wrq = Packet::WriteRequest {
            filename: "evil.bin".to_string(),
        };
        client.send_to(&wrq.encode(), server).await.unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        match Packet::parse(&buf[..len]).unwrap() {
            Packet::Error { code, .. } => assert_eq!(code, ERR_ACCESS_VIOLATION),
            other => panic!("unexpected packet {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn unacked_data_is_retransmitted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("boot.efi"), b"retry me").unwrap();
        let (port, handle) = start_server(&dir, false).await;

        let client = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server = SocketAddr::from(([127, 0, 0, 1], port));
        let rrq = Packet::ReadRequest {
            filename: "boot.efi".to_string(),
            mode: "octet".to_string(),
            // shrink the retransmit timer so the test stays quick
            options: vec![("timeout".to_string(), "1".to_string())],
        };
        client.send_to(&rrq.encode(), server).await.unwrap();

        let mut buf = [0u8; 2048];
        let (len, from) = client.recv_from(&mut buf).await.unwrap();
        assert!(matches!(
            Packet::parse(&buf[..len]).unwrap(),
            Packet::Oack { .. }
        ));
        client
            .send_to(&Packet::Ack { block: 0 }.encode(), from)
            .await
            .unwrap();

        // take the first DATA but withhold the ACK; it must come again
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        let first = Packet::parse(&buf[..len]).unwrap();
        let (len, from) = client.recv_from(&mut buf).await.unwrap();
        let second = Packet::parse(&buf[..len]).unwrap();
        assert_eq!(first, second);
        match second {
            Packet::Data { block, data } => {
                assert_eq!(block, 1);
                assert_eq!(data, b"retry me");
                client
                    .send_to(&Packet::Ack { block }.encode(), from)
                    .await
                    .unwrap();
            }
            other => panic!("unexpected packet {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn blksize_option_is_negotiated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("boot.efi"), vec![1u8; 2000]).unwrap();
        let (port, handle) = start_server(&dir, false).await;

        let client = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server = SocketAddr::from(([127, 0, 0, 1], port));
        let rrq = Packet::ReadRequest {
            filename: "boot.efi".to_string(),
            mode: "octet".to_string(),
            options: vec![
                ("blksize".to_string(), "1024".to_string()),
                ("tsize".to_string(), "0".to_string()),
            ],
        };
        client.send_to(&rrq.encode(), server).await.unwrap();

        let mut buf = [0u8; 2048];
        let (len, from) = client.recv_from(&mut buf).await.unwrap();
        match Packet::parse(&buf[..len]).unwrap() {
            Packet::Oack { options } => {
                assert!(options.contains(&("blksize".to_string(), "1024".to_string())));
                assert!(options.contains(&("tsize".to_string(), "2000".to_string())));
            }
            other => panic!("expected OACK, got {other:?}"),
        }

        // ACK the OACK, then the first data block arrives at the new size
        client
            .send_to(&Packet::Ack { block: 0 }.encode(), from)
            .await
            .unwrap();
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        match Packet::parse(&buf[..len]).unwrap() {
            Packet::Data { block, data } => {
                assert_eq!(block, 1);
                assert_eq!(data.len(), 1024);
            }
            other => panic!("unexpected packet {other:?}"),
        }
        handle.abort();
    }
}

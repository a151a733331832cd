//! UDP and TCP serve loops for the DNS handler.
//!
//! Decode, hand to the handler chain, transmit. When no handler answers,
//! the server responds NXDOMAIN itself so dumb resolvers move on quickly.
//! TCP uses the standard two-byte length framing and an idle timeout on
//! each connection.

use crate::error::DnsError;
use crate::handler::ServeDns;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, error, info};

/// Largest plain-UDP DNS message we accept.
const MAX_UDP_MESSAGE: usize = 4096;

/// How long a TCP connection may sit idle between queries.
const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// DNS serve loop over both transports.
pub struct DnsServer {
    socket: Arc<UdpSocket>,
    listener: TcpListener,
    handler: Arc<dyn ServeDns>,
}

impl DnsServer {
    pub async fn bind(listen: SocketAddr, handler: Arc<dyn ServeDns>) -> Result<Self, DnsError> {
        let socket = UdpSocket::bind(listen).await?;
        // TCP rides on whatever port UDP actually got (matters with port 0)
        let bound = socket.local_addr()?;
        let listener = TcpListener::bind(bound).await?;
        info!("DNS server listening on {bound} (udp and tcp)");
        Ok(Self {
            socket: Arc::new(socket),
            listener,
            handler,
        })
    }

    /// The address the server actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, DnsError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self) -> Result<(), DnsError> {
        let mut buf = [0u8; MAX_UDP_MESSAGE];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = received?;
                    let packet = buf[..len].to_vec();
                    let socket = self.socket.clone();
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(err) = process_udp(socket, handler, packet, peer).await {
                            error!("failed to process DNS query from {peer}: {err}");
                        }
                    });
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(err) = process_tcp(stream, handler, peer).await {
                            debug!("DNS TCP connection from {peer} ended: {err}");
                        }
                    });
                }
            }
        }
    }
}

async fn answer(handler: &dyn ServeDns, req: &Message) -> Message {
    match handler.serve(req).await {
        Some(resp) => resp,
        None => {
            debug!("no handler answered, returning NXDOMAIN");
            nxdomain_for(req)
        }
    }
}

async fn process_udp(
    socket: Arc<UdpSocket>,
    handler: Arc<dyn ServeDns>,
    packet: Vec<u8>,
    peer: SocketAddr,
) -> Result<(), DnsError> {
    let req = Message::from_vec(&packet)?;
    let resp = answer(handler.as_ref(), &req).await;
    socket.send_to(&resp.to_vec()?, peer).await?;
    Ok(())
}

/// Serve length-framed queries until the peer closes or goes idle.
async fn process_tcp(
    mut stream: TcpStream,
    handler: Arc<dyn ServeDns>,
    peer: SocketAddr,
) -> Result<(), DnsError> {
    loop {
        let mut len_buf = [0u8; 2];
        match tokio::time::timeout(TCP_IDLE_TIMEOUT, stream.read_exact(&mut len_buf)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => return Ok(()), // closed or idle
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut packet = vec![0u8; len];
        stream.read_exact(&mut packet).await?;

        let req = Message::from_vec(&packet)?;
        debug!("DNS TCP query from {peer}");
        let resp = answer(handler.as_ref(), &req).await;

        let body = resp.to_vec()?;
        stream
            .write_all(&(body.len() as u16).to_be_bytes())
            .await?;
        stream.write_all(&body).await?;
    }
}

/// The answer of last resort.
fn nxdomain_for(req: &Message) -> Message {
    let mut resp = Message::new();
    resp.set_id(req.id())
        .set_message_type(MessageType::Response)
        .set_recursion_desired(req.recursion_desired())
        .set_response_code(ResponseCode::NXDomain);
    if let Some(query) = req.queries().first() {
        resp.add_query(query.clone());
    }
    resp
}

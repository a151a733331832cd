//! UDP serve loops for DHCPv4 and DHCPv6.
//!
//! Thin host layer: decode, build the base reply, walk the handler chain,
//! transmit. Each packet is processed on its own task so a slow lease write
//! never blocks the receive loop.

use crate::error::DhcpError;
use crate::handler::{Handler4, Handler6, Outcome};
use dhcproto::{v4, v6, Decodable, Decoder, Encodable, Encoder};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

/// Anything shorter than a BOOTP header cannot be a DHCP message.
const MINIMUM_DHCP_PKT_SIZE: usize = 236;

const DHCPV4_CLIENT_PORT: u16 = 68;
const DHCPV4_SERVER_PORT: u16 = 67;

/// All-DHCP-relay-agents-and-servers multicast group.
const DHCPV6_MULTICAST: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0x0001, 0x0002);

/// Build the base v4 reply for a request the server answers at all.
///
/// Discover begets Offer, Request (and Inform) beget Ack; everything else
/// is dropped before the handler chain runs.
pub fn reply_skeleton(req: &v4::Message, server_ip: Ipv4Addr) -> Option<v4::Message> {
    let req_type = match req.opts().get(v4::OptionCode::MessageType) {
        Some(v4::DhcpOption::MessageType(t)) => *t,
        _ => return None,
    };
    let reply_type = match req_type {
        v4::MessageType::Discover => v4::MessageType::Offer,
        v4::MessageType::Request | v4::MessageType::Inform => v4::MessageType::Ack,
        _ => return None,
    };

    let mut resp = v4::Message::default();
    resp.set_opcode(v4::Opcode::BootReply);
    resp.set_xid(req.xid());
    resp.set_flags(req.flags());
    resp.set_giaddr(req.giaddr());
    resp.set_chaddr(req.chaddr());
    resp.set_siaddr(server_ip);
    resp.opts_mut()
        .insert(v4::DhcpOption::MessageType(reply_type));
    resp.opts_mut()
        .insert(v4::DhcpOption::ServerIdentifier(server_ip));
    // relay agent information must travel back unchanged (RFC 3046)
    if let Some(relay @ v4::DhcpOption::RelayAgentInformation(_)) =
        req.opts().get(v4::OptionCode::RelayAgentInformation)
    {
        resp.opts_mut().insert(relay.clone());
    }
    Some(resp)
}

/// Where a v4 reply goes: relay first, then a client that already has an
/// address, then broadcast for fresh clients.
fn reply_destination(req: &v4::Message, peer: SocketAddr) -> SocketAddr {
    if !req.giaddr().is_unspecified() {
        return SocketAddr::new(IpAddr::V4(req.giaddr()), DHCPV4_SERVER_PORT);
    }
    if !req.ciaddr().is_unspecified() {
        return SocketAddr::new(IpAddr::V4(req.ciaddr()), DHCPV4_CLIENT_PORT);
    }
    if let IpAddr::V4(peer_ip) = peer.ip() {
        if !peer_ip.is_unspecified() {
            return SocketAddr::new(IpAddr::V4(peer_ip), peer.port());
        }
    }
    SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DHCPV4_CLIENT_PORT)
}

/// DHCPv4 serve loop over a handler chain.
pub struct Dhcpv4Server {
    socket: Arc<UdpSocket>,
    server_ip: Ipv4Addr,
    chain: Arc<Vec<Arc<dyn Handler4>>>,
}

impl Dhcpv4Server {
    pub async fn bind(
        listen: SocketAddr,
        server_ip: Ipv4Addr,
        chain: Vec<Arc<dyn Handler4>>,
    ) -> Result<Self, DhcpError> {
        let socket = UdpSocket::bind(listen).await?;
        socket.set_broadcast(true)?;
        info!("DHCPv4 server listening on {listen}, serving as {server_ip}");
        Ok(Self {
            socket: Arc::new(socket),
            server_ip,
            chain: Arc::new(chain),
        })
    }

    /// The address the server actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, DhcpError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self) -> Result<(), DhcpError> {
        let mut buf = [0u8; 1500];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            if len < MINIMUM_DHCP_PKT_SIZE {
                debug!("dropping {len}-byte packet from {peer}, smaller than minimum");
                continue;
            }
            let packet = buf[..len].to_vec();
            let socket = self.socket.clone();
            let chain = self.chain.clone();
            let server_ip = self.server_ip;
            tokio::spawn(async move {
                if let Err(err) = process_v4(socket, chain, server_ip, packet, peer).await {
                    error!("failed to process DHCPv4 packet from {peer}: {err}");
                }
            });
        }
    }
}

async fn process_v4(
    socket: Arc<UdpSocket>,
    chain: Arc<Vec<Arc<dyn Handler4>>>,
    server_ip: Ipv4Addr,
    packet: Vec<u8>,
    peer: SocketAddr,
) -> Result<(), DhcpError> {
    let req = v4::Message::decode(&mut Decoder::new(&packet))?;
    debug!("DHCPv4 request from {peer}: xid {:#x}", req.xid());

    // a Request addressed to a different server means the client took
    // someone else's offer
    if let Some(addressed) = crate::options::server_identifier(&req) {
        if addressed != server_ip {
            debug!("request from {peer} is for server {addressed}, ignoring");
            return Ok(());
        }
    }

    let Some(mut resp) = reply_skeleton(&req, server_ip) else {
        debug!("no reply built for message from {peer}, ignoring");
        return Ok(());
    };

    for handler in chain.iter() {
        match handler.handle(&req, resp).await {
            Outcome::Respond(done) => {
                let dest = reply_destination(&req, peer);
                let mut out = Vec::with_capacity(512);
                done.encode(&mut Encoder::new(&mut out))?;
                socket.send_to(&out, dest).await?;
                debug!("DHCPv4 reply sent to {dest}");
                return Ok(());
            }
            Outcome::Pass(untouched) => resp = untouched,
            Outcome::Drop => return Ok(()),
        }
    }

    debug!("no handler placed the client, not responding");
    Ok(())
}

/// Build the base v6 reply: Solicit begets Advertise, Request/Renew/Rebind
/// beget Reply. The client id is echoed and the server id attached.
pub fn reply_skeleton_v6(req: &v6::Message, server_duid: &[u8]) -> Option<v6::Message> {
    let reply_type = match req.msg_type() {
        v6::MessageType::Solicit => v6::MessageType::Advertise,
        v6::MessageType::Request | v6::MessageType::Renew | v6::MessageType::Rebind => {
            v6::MessageType::Reply
        }
        _ => return None,
    };

    let mut resp = v6::Message::new(reply_type);
    resp.set_xid(req.xid());
    if let Some(v6::DhcpOption::ClientId(id)) = req.opts().get(v6::OptionCode::ClientId) {
        resp.opts_mut().insert(v6::DhcpOption::ClientId(id.clone()));
    }
    resp.opts_mut()
        .insert(v6::DhcpOption::ServerId(server_duid.to_vec()));
    Some(resp)
}

/// A stable server DUID (DUID-EN form) derived from the serving address.
pub fn server_duid(server_ip: Ipv6Addr) -> Vec<u8> {
    let mut duid = vec![0x00, 0x02, 0x00, 0x00, 0x00, 0x00];
    duid.extend_from_slice(&server_ip.octets());
    duid
}

/// DHCPv6 serve loop over a handler chain.
pub struct Dhcpv6Server {
    socket: Arc<UdpSocket>,
    duid: Arc<Vec<u8>>,
    chain: Arc<Vec<Arc<dyn Handler6>>>,
}

impl Dhcpv6Server {
    pub async fn bind(
        listen: SocketAddr,
        server_ip: Ipv6Addr,
        chain: Vec<Arc<dyn Handler6>>,
    ) -> Result<Self, DhcpError> {
        let socket = UdpSocket::bind(listen).await?;
        if let Err(err) = socket.join_multicast_v6(&DHCPV6_MULTICAST, 0) {
            warn!("could not join {DHCPV6_MULTICAST}: {err}; serving unicast only");
        }
        info!("DHCPv6 server listening on {listen}, serving as {server_ip}");
        Ok(Self {
            socket: Arc::new(socket),
            duid: Arc::new(server_duid(server_ip)),
            chain: Arc::new(chain),
        })
    }

    /// The address the server actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, DhcpError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self) -> Result<(), DhcpError> {
        let mut buf = [0u8; 1500];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let packet = buf[..len].to_vec();
            let socket = self.socket.clone();
            let duid = self.duid.clone();
            let chain = self.chain.clone();
            tokio::spawn(async move {
                if let Err(err) = process_v6(socket, chain, duid, packet, peer).await {
                    error!("failed to process DHCPv6 packet from {peer}: {err}");
                }
            });
        }
    }
}

async fn process_v6(
    socket: Arc<UdpSocket>,
    chain: Arc<Vec<Arc<dyn Handler6>>>,
    duid: Arc<Vec<u8>>,
    packet: Vec<u8>,
    peer: SocketAddr,
) -> Result<(), DhcpError> {
    let req = v6::Message::decode(&mut Decoder::new(&packet))?;

    let Some(mut resp) = reply_skeleton_v6(&req, &duid) else {
        debug!("no reply built for v6 message from {peer}, ignoring");
        return Ok(());
    };

    for handler in chain.iter() {
        match handler.handle(&req, resp).await {
            Outcome::Respond(done) => {
                let mut out = Vec::with_capacity(512);
                done.encode(&mut Encoder::new(&mut out))?;
                socket.send_to(&out, peer).await?;
                debug!("DHCPv6 reply sent to {peer}");
                return Ok(());
            }
            Outcome::Pass(untouched) => resp = untouched,
            Outcome::Drop => return Ok(()),
        }
    }

    debug!("no handler placed the client, not responding");
    Ok(())
}

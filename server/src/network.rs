//! Server network layer handling UDP communications and shutdown coordination

use crate::clock::Tick;
use crate::context::ServerContext;
use crate::error::ZoneError;
use crate::export::{export_zones, ExportReport};
use crate::shutdown::{shutdown_channel, ShutdownHandle, ShutdownReason};
use crate::token::Token;
use crate::zone::{DrawRequest, Zone};
use log::{debug, error, info, warn};
use shared::{Color, Packet, Point, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    MalformedPacket { addr: SocketAddr },
}

/// Reply queued for the sender task
#[derive(Debug)]
pub struct OutboundPacket {
    pub packet: Packet,
    pub addr: SocketAddr,
}

/// Why a packet was refused. Suspicious rejections cost the sender a challenge.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("max challenges")]
    Exhausted,
    #[error("unauthorized")]
    Unauthorized,
    #[error("unknown zone {0}")]
    UnknownZone(u32),
    #[error("unknown token")]
    UnknownToken,
    #[error("unexpected packet")]
    UnexpectedPacket,
    #[error(transparent)]
    Zone(#[from] ZoneError),
}

impl Rejection {
    pub fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Rejection::Unauthorized
                | Rejection::UnknownZone(_)
                | Rejection::UnknownToken
                | Rejection::UnexpectedPacket
        )
    }
}

/// Turns decoded packets into operations on the server context.
#[derive(Clone)]
pub struct PacketHandler {
    context: Arc<ServerContext>,
    shutdown: ShutdownHandle,
}

impl PacketHandler {
    pub fn new(context: Arc<ServerContext>, shutdown: ShutdownHandle) -> Self {
        Self { context, shutdown }
    }

    /// Handles one packet and returns the reply, if any. Draws produce no
    /// reply when accepted.
    pub async fn handle(&self, packet: Packet, addr: SocketAddr) -> Option<Packet> {
        let result = match packet {
            Packet::Draw {
                token,
                zone,
                point,
                color,
            } => self.handle_draw(&token, zone, point, color).await,
            Packet::CreateZone {
                token,
                width,
                height,
                freeze,
            } => self.handle_create_zone(&token, width, height, freeze).await,
            Packet::IssueToken { token, zone } => self.handle_issue_token(&token, zone).await,
            Packet::RevokeToken { token, zone, target } => {
                self.handle_revoke_token(&token, zone, target).await
            }
            Packet::Info => self.handle_info().await,
            Packet::Stop { token } => self.handle_stop(&token),
            _ => Err(Rejection::UnexpectedPacket),
        };

        match result {
            Ok(reply) => reply,
            Err(rejection) => {
                if rejection.is_suspicious() {
                    self.context.rate_limiter.penalize(addr.ip()).await;
                }
                debug!("Rejected packet from {}: {}", addr, rejection);
                Some(Packet::Rejected {
                    reason: rejection.to_string(),
                })
            }
        }
    }

    async fn zone(&self, zone_id: u32) -> Result<Arc<Zone>, Rejection> {
        self.context
            .lookup_zone(zone_id as usize)
            .await
            .ok_or(Rejection::UnknownZone(zone_id))
    }

    async fn handle_draw(
        &self,
        token: &str,
        zone_id: u32,
        point: Point,
        color: Color,
    ) -> Result<Option<Packet>, Rejection> {
        let zone = self.zone(zone_id).await?;

        let request = if self.context.can_administer(&zone, token) {
            DrawRequest::new(point, color)
        } else {
            let token = Token::from(token);
            if !zone.has_token(&token) {
                return Err(Rejection::UnknownToken);
            }
            DrawRequest::with_token(point, color, token)
        };

        zone.submit(request).await?;
        Ok(None)
    }

    async fn handle_create_zone(
        &self,
        token: &str,
        width: i32,
        height: i32,
        freeze: u64,
    ) -> Result<Option<Packet>, Rejection> {
        if !self.context.tokens.master_auth(token) {
            return Err(Rejection::Unauthorized);
        }

        let zone = self
            .context
            .create_zone(Point::new(width, height), Tick(freeze))
            .await?;
        let privileged_token = zone
            .privileged_token()
            .map(|t| t.to_string())
            .unwrap_or_default();
        info!(
            "Zone {} privileged token: {}",
            zone.id(),
            privileged_token
        );

        Ok(Some(Packet::ZoneCreated {
            zone: zone.id() as u32,
            privileged_token,
        }))
    }

    async fn handle_issue_token(&self, token: &str, zone_id: u32) -> Result<Option<Packet>, Rejection> {
        let zone = self.zone(zone_id).await?;
        if !self.context.can_administer(&zone, token) {
            return Err(Rejection::Unauthorized);
        }
        if zone.is_closed() {
            return Err(ZoneError::Closed.into());
        }

        let issued = self.context.issue_token(&zone);
        Ok(Some(Packet::TokenIssued {
            zone: zone_id,
            token: issued.to_string(),
        }))
    }

    async fn handle_revoke_token(
        &self,
        token: &str,
        zone_id: u32,
        target: String,
    ) -> Result<Option<Packet>, Rejection> {
        let zone = self.zone(zone_id).await?;
        if !self.context.can_administer(&zone, token) {
            return Err(Rejection::Unauthorized);
        }

        if !zone.delete_token(&Token::from(target)) {
            return Err(Rejection::UnknownToken);
        }
        info!("Revoked token for zone {}", zone_id);
        Ok(Some(Packet::TokenRevoked { zone: zone_id }))
    }

    async fn handle_info(&self) -> Result<Option<Packet>, Rejection> {
        Ok(Some(Packet::ServerInfo {
            tick: self.context.clock.now().0,
            zones: self.context.zones.len().await as u32,
        }))
    }

    fn handle_stop(&self, token: &str) -> Result<Option<Packet>, Rejection> {
        if !self.context.tokens.master_auth(token) {
            return Err(Rejection::Unauthorized);
        }

        info!("Stop requested");
        self.shutdown.trigger(ShutdownReason::StopRequested);
        Ok(Some(Packet::Stopping))
    }
}

/// Main server coordinating networking, zones and shutdown export
pub struct Server {
    socket: Arc<UdpSocket>,
    context: Arc<ServerContext>,
    handler: PacketHandler,
    work_dir: PathBuf,
    receiver_task: Option<JoinHandle<()>>,
    sender_task: Option<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundPacket>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundPacket>,
    shutdown: ShutdownHandle,
    shutdown_rx: mpsc::UnboundedReceiver<ShutdownReason>,
}

impl Server {
    pub async fn new(
        addr: &str,
        context: Arc<ServerContext>,
        work_dir: PathBuf,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = shutdown_channel();

        Ok(Server {
            socket,
            handler: PacketHandler::new(Arc::clone(&context), shutdown.clone()),
            context,
            work_dir,
            receiver_task: None,
            sender_task: None,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx,
            shutdown,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.context)
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        self.receiver_task = Some(tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let message = match Packet::decode(&buffer[0..len]) {
                            Ok(packet) => ServerMessage::PacketReceived { packet, addr },
                            Err(_) => {
                                warn!("Failed to deserialize packet from {}", addr);
                                ServerMessage::MalformedPacket { addr }
                            }
                        };

                        if let Err(e) = server_tx.send(message) {
                            error!("Failed to send packet to main loop: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut outbound_rx = std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        self.sender_task = Some(tokio::spawn(async move {
            while let Some(OutboundPacket { packet, addr }) = outbound_rx.recv().await {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        }));
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = packet.encode()?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Checks admission for the sender, then handles the packet on its own
    /// task so a full zone queue cannot stall the receive loop.
    async fn dispatch(&self, packet: Packet, addr: SocketAddr) {
        if !self.context.rate_limiter.admit(addr.ip()).await {
            debug!("Refusing packet from exhausted address {}", addr);
            let _ = self.outbound_tx.send(OutboundPacket {
                packet: Packet::Rejected {
                    reason: Rejection::Exhausted.to_string(),
                },
                addr,
            });
            return;
        }

        let handler = self.handler.clone();
        let outbound_tx = self.outbound_tx.clone();
        tokio::spawn(async move {
            if let Some(reply) = handler.handle(packet, addr).await {
                if let Err(e) = outbound_tx.send(OutboundPacket { packet: reply, addr }) {
                    error!("Failed to queue reply for {}: {}", addr, e);
                }
            }
        });
    }

    /// Main server loop. Returns after the shutdown signal fired and every
    /// zone has been closed and exported.
    pub async fn run(&mut self) -> Result<ExportReport, Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;

        info!("Server started successfully");

        let reason = loop {
            tokio::select! {
                reason = self.shutdown_rx.recv() => {
                    break reason.unwrap_or(ShutdownReason::Interrupted);
                },

                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.dispatch(packet, addr).await;
                        },
                        Some(ServerMessage::MalformedPacket { addr }) => {
                            self.context.rate_limiter.penalize(addr.ip()).await;
                        },
                        None => break ShutdownReason::Interrupted,
                    }
                },
            }
        };

        info!("Server shutting down: {}", reason);
        self.context.zones.close_all().await;

        let zones = self.context.zones.zones().await;
        let work_dir = self.work_dir.clone();
        let report = tokio::task::spawn_blocking(move || export_zones(&work_dir, &zones)).await?;
        info!(
            "Exported {} zones, {} failed",
            report.exported.len(),
            report.failed.len()
        );

        // Let queued replies go out before the socket tasks stop.
        drop(std::mem::replace(&mut self.outbound_tx, mpsc::unbounded_channel().0));
        if let Some(sender) = self.sender_task.take() {
            if tokio::time::timeout(Duration::from_millis(500), sender).await.is_err() {
                warn!("Pending replies were dropped");
            }
        }
        if let Some(receiver) = self.receiver_task.take() {
            receiver.abort();
        }

        info!("Exiting.");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenAuthority;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080)
    }

    fn test_handler() -> (PacketHandler, mpsc::UnboundedReceiver<ShutdownReason>) {
        let context = Arc::new(ServerContext::new(TokenAuthority::new(true), 3));
        let (shutdown, rx) = shutdown_channel();
        (PacketHandler::new(context, shutdown), rx)
    }

    async fn create_zone(handler: &PacketHandler, width: i32, height: i32, freeze: u64) -> u32 {
        let reply = handler
            .handle(
                Packet::CreateZone {
                    token: "M".to_string(),
                    width,
                    height,
                    freeze,
                },
                test_addr(),
            )
            .await;

        match reply {
            Some(Packet::ZoneCreated {
                zone,
                privileged_token,
            }) => {
                assert_eq!(privileged_token, "A");
                zone
            }
            other => panic!("Unexpected reply: {:?}", other),
        }
    }

    async fn challenges(handler: &PacketHandler) -> i32 {
        handler
            .context
            .rate_limiter
            .record(test_addr().ip())
            .await
            .get_challenges()
    }

    #[tokio::test]
    async fn test_create_zone_requires_master_token() {
        let (handler, _rx) = test_handler();

        let reply = handler
            .handle(
                Packet::CreateZone {
                    token: "A".to_string(),
                    width: 10,
                    height: 10,
                    freeze: 0,
                },
                test_addr(),
            )
            .await;

        assert_eq!(
            reply,
            Some(Packet::Rejected {
                reason: "unauthorized".to_string()
            })
        );
        assert_eq!(handler.context.zones.len().await, 0);
        assert_eq!(challenges(&handler).await, 2);
    }

    #[tokio::test]
    async fn test_create_zone_assigns_sequential_ids() {
        let (handler, _rx) = test_handler();

        assert_eq!(create_zone(&handler, 10, 10, 5).await, 0);
        assert_eq!(create_zone(&handler, 10, 10, 5).await, 1);

        handler.context.zones.close_all().await;
    }

    #[tokio::test]
    async fn test_invalid_zone_size_is_not_suspicious() {
        let (handler, _rx) = test_handler();

        let reply = handler
            .handle(
                Packet::CreateZone {
                    token: "M".to_string(),
                    width: 0,
                    height: 10,
                    freeze: 0,
                },
                test_addr(),
            )
            .await;

        assert!(matches!(reply, Some(Packet::Rejected { .. })));
        assert_eq!(challenges(&handler).await, 3);
    }

    #[tokio::test]
    async fn test_oversized_zone_is_rejected() {
        let (handler, _rx) = test_handler();

        let reply = handler
            .handle(
                Packet::CreateZone {
                    token: "M".to_string(),
                    width: i32::MAX,
                    height: i32::MAX,
                    freeze: 0,
                },
                test_addr(),
            )
            .await;

        assert!(matches!(reply, Some(Packet::Rejected { .. })));
        assert_eq!(handler.context.zones.len().await, 0);
        assert_eq!(challenges(&handler).await, 3);
    }

    #[tokio::test]
    async fn test_create_zone_after_shutdown_is_rejected() {
        let (handler, _rx) = test_handler();
        handler.context.zones.close_all().await;

        let reply = handler
            .handle(
                Packet::CreateZone {
                    token: "M".to_string(),
                    width: 2,
                    height: 2,
                    freeze: 0,
                },
                test_addr(),
            )
            .await;

        assert_eq!(
            reply,
            Some(Packet::Rejected {
                reason: "zone is closed".to_string()
            })
        );
        assert_eq!(handler.context.zones.len().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_packets_stop_at_zero() {
        let (handler, _rx) = test_handler();

        for _ in 0..10 {
            handler.handle(Packet::Stopping, test_addr()).await;
        }

        assert_eq!(challenges(&handler).await, 0);
    }

    #[tokio::test]
    async fn test_privileged_draw_is_applied() {
        let (handler, _rx) = test_handler();
        let zone_id = create_zone(&handler, 2, 2, 0).await;

        let reply = handler
            .handle(
                Packet::Draw {
                    token: "A".to_string(),
                    zone: zone_id,
                    point: Point::new(1, 1),
                    color: Color::new(255, 0, 0, 255),
                },
                test_addr(),
            )
            .await;
        assert_eq!(reply, None);

        handler.context.zones.close_all().await;
        let zone = handler.context.lookup_zone(0).await.unwrap();
        assert_eq!(zone.pixel(Point::new(1, 1)), Some(Color::new(255, 0, 0, 255)));
    }

    #[tokio::test]
    async fn test_draw_with_unknown_token_is_rejected() {
        let (handler, _rx) = test_handler();
        let zone_id = create_zone(&handler, 2, 2, 0).await;

        let reply = handler
            .handle(
                Packet::Draw {
                    token: "stranger".to_string(),
                    zone: zone_id,
                    point: Point::new(0, 0),
                    color: Color::new(1, 1, 1, 255),
                },
                test_addr(),
            )
            .await;

        assert_eq!(
            reply,
            Some(Packet::Rejected {
                reason: "unknown token".to_string()
            })
        );
        assert_eq!(challenges(&handler).await, 2);
        handler.context.zones.close_all().await;
    }

    #[tokio::test]
    async fn test_draw_to_unknown_zone_is_rejected() {
        let (handler, _rx) = test_handler();

        let reply = handler
            .handle(
                Packet::Draw {
                    token: "M".to_string(),
                    zone: 7,
                    point: Point::new(0, 0),
                    color: Color::new(1, 1, 1, 255),
                },
                test_addr(),
            )
            .await;

        assert_eq!(
            reply,
            Some(Packet::Rejected {
                reason: "unknown zone 7".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_issued_token_can_draw_and_revoke() {
        let (handler, _rx) = test_handler();
        let zone_id = create_zone(&handler, 2, 2, 0).await;

        let issued = match handler
            .handle(
                Packet::IssueToken {
                    token: "A".to_string(),
                    zone: zone_id,
                },
                test_addr(),
            )
            .await
        {
            Some(Packet::TokenIssued { zone, token }) => {
                assert_eq!(zone, zone_id);
                token
            }
            other => panic!("Unexpected reply: {:?}", other),
        };

        let reply = handler
            .handle(
                Packet::Draw {
                    token: issued.clone(),
                    zone: zone_id,
                    point: Point::new(0, 1),
                    color: Color::new(0, 0, 255, 255),
                },
                test_addr(),
            )
            .await;
        assert_eq!(reply, None);

        let reply = handler
            .handle(
                Packet::RevokeToken {
                    token: "A".to_string(),
                    zone: zone_id,
                    target: issued.clone(),
                },
                test_addr(),
            )
            .await;
        assert_eq!(reply, Some(Packet::TokenRevoked { zone: zone_id }));

        let zone = handler.context.lookup_zone(zone_id as usize).await.unwrap();
        assert!(!zone.has_token(&Token::from(issued)));

        handler.context.zones.close_all().await;
        assert_eq!(zone.pixel(Point::new(0, 1)), Some(Color::new(0, 0, 255, 255)));
    }

    #[tokio::test]
    async fn test_painter_cannot_issue_tokens() {
        let (handler, _rx) = test_handler();
        let zone_id = create_zone(&handler, 2, 2, 0).await;
        let zone = handler.context.lookup_zone(zone_id as usize).await.unwrap();
        let painter = handler.context.issue_token(&zone);

        let reply = handler
            .handle(
                Packet::IssueToken {
                    token: painter.to_string(),
                    zone: zone_id,
                },
                test_addr(),
            )
            .await;

        assert_eq!(
            reply,
            Some(Packet::Rejected {
                reason: "unauthorized".to_string()
            })
        );
        handler.context.zones.close_all().await;
    }

    #[tokio::test]
    async fn test_info_reports_tick_and_zones() {
        let (handler, _rx) = test_handler();
        create_zone(&handler, 2, 2, 0).await;
        handler.context.clock.advance();

        let reply = handler.handle(Packet::Info, test_addr()).await;

        assert_eq!(reply, Some(Packet::ServerInfo { tick: 1, zones: 1 }));
        handler.context.zones.close_all().await;
    }

    #[tokio::test]
    async fn test_stop_fires_shutdown() {
        let (handler, mut rx) = test_handler();

        let reply = handler
            .handle(
                Packet::Stop {
                    token: "nope".to_string(),
                },
                test_addr(),
            )
            .await;
        assert!(matches!(reply, Some(Packet::Rejected { .. })));
        assert!(rx.try_recv().is_err());

        let reply = handler
            .handle(
                Packet::Stop {
                    token: "M".to_string(),
                },
                test_addr(),
            )
            .await;
        assert_eq!(reply, Some(Packet::Stopping));
        assert_eq!(rx.try_recv().unwrap(), ShutdownReason::StopRequested);
    }

    #[tokio::test]
    async fn test_server_replies_are_unexpected_from_clients() {
        let (handler, _rx) = test_handler();

        let reply = handler.handle(Packet::Stopping, test_addr()).await;

        assert_eq!(
            reply,
            Some(Packet::Rejected {
                reason: "unexpected packet".to_string()
            })
        );
        assert_eq!(challenges(&handler).await, 2);
    }

    #[test]
    fn test_rejection_suspicion() {
        assert!(Rejection::Unauthorized.is_suspicious());
        assert!(Rejection::UnknownZone(1).is_suspicious());
        assert!(Rejection::UnknownToken.is_suspicious());
        assert!(!Rejection::Exhausted.is_suspicious());
        assert!(!Rejection::Zone(ZoneError::Closed).is_suspicious());
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

        let msg = ServerMessage::PacketReceived {
            packet: Packet::Info,
            addr: test_addr(),
        };
        assert!(tx.send(msg).is_ok());

        match rx.try_recv().unwrap() {
            ServerMessage::PacketReceived { packet, addr } => {
                assert_eq!(addr, test_addr());
                assert_eq!(packet, Packet::Info);
            }
            _ => panic!("Unexpected message type"),
        }
    }
}

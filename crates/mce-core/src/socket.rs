//! Lifecycle socket client (C2, spec §4.2). Talks the DSME datagram protocol
//! defined in `mce-proto` over a `UnixDatagram`, answers the process
//! watchdog, and republishes system-state/heartbeat/shutdown events for the
//! rest of the crate to consume.
//!
//! Reconnection follows `mce-dsme.c`'s behavior rather than spec.md's
//! one-line "reconnect attempted automatically": registration with the
//! process watchdog retries on a bounded exponential backoff instead of
//! giving up after one failure (SPEC_FULL.md, "Supplemented features").

use crate::error::SocketError;
use bytes::BytesMut;
use mce_proto::{DsmeCodec, IncomingMessage, OutgoingMessage, SystemState};
use mce_runtime::codec::Decode;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixDatagram;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Cap on the registration backoff (spec §9 supplement: "cap at the
/// heartbeat-equivalent interval").
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const BACKOFF_INITIAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A `PROCESSWD_PING`/`PROCESSWD_PONG` round happened. Published even if
    /// the pong send itself failed (spec §4.2 item 3).
    Heartbeat,
    SystemState(SystemState),
    Connected,
    Disconnected,
}

pub struct LifecycleSocketClient {
    socket_path: PathBuf,
    pid: u32,
    events: mpsc::Sender<SocketEvent>,
}

impl LifecycleSocketClient {
    pub fn new(socket_path: impl Into<PathBuf>, events: mpsc::Sender<SocketEvent>) -> Self {
        Self {
            socket_path: socket_path.into(),
            pid: std::process::id(),
            events,
        }
    }

    /// Drives the client for the process lifetime. `service_available`
    /// tracks whether the device-state manager currently owns its well-known
    /// bus name; `update_mode` gates outgoing shutdown/reboot/powerup
    /// requests per spec §4.2 ("rejected while update-mode is true, logged,
    /// not an error"); `outgoing` carries requests from the rest of the
    /// crate (DSM teardown, compositor escalation, bus method handlers).
    pub async fn run(
        mut self,
        mut service_available: watch::Receiver<bool>,
        update_mode: watch::Receiver<bool>,
        mut outgoing: mpsc::Receiver<OutgoingMessage>,
    ) {
        loop {
            if !*service_available.borrow() {
                if service_available.changed().await.is_err() {
                    return;
                }
                continue;
            }

            match self.connect_and_register().await {
                Ok(socket) => {
                    let _ = self.events.send(SocketEvent::Connected).await;
                    self.drive_session(socket, &mut service_available, &update_mode, &mut outgoing)
                        .await;
                    let _ = self.events.send(SocketEvent::Disconnected).await;
                }
                Err(err) => {
                    warn!(?err, "device-state manager registration failed, backing off");
                    self.backoff_until_available(&mut service_available).await;
                }
            }
        }
    }

    async fn backoff_until_available(&self, service_available: &mut watch::Receiver<bool>) {
        let mut delay = BACKOFF_INITIAL;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => return,
                changed = service_available.changed() => {
                    if changed.is_err() || !*service_available.borrow() {
                        return;
                    }
                }
            }
            delay = (delay * 2).min(BACKOFF_CAP);
        }
    }

    async fn connect_and_register(&self) -> Result<UnixDatagram, SocketError> {
        let socket = UnixDatagram::unbound().map_err(SocketError::Open)?;
        socket
            .connect(&self.socket_path)
            .map_err(SocketError::Open)?;
        self.send(&socket, OutgoingMessage::ProcesswdCreate { pid: self.pid })
            .await
            .map_err(SocketError::WatchdogRegister)?;
        self.send(&socket, OutgoingMessage::StateQuery)
            .await
            .map_err(SocketError::Send)?;
        info!(path = %self.socket_path.display(), "registered with device-state manager");
        Ok(socket)
    }

    async fn send(&self, socket: &UnixDatagram, msg: OutgoingMessage) -> std::io::Result<()> {
        let bytes = msg
            .encode()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        socket.send(&bytes).await?;
        Ok(())
    }

    async fn drive_session(
        &mut self,
        socket: UnixDatagram,
        service_available: &mut watch::Receiver<bool>,
        update_mode: &watch::Receiver<bool>,
        outgoing: &mut mpsc::Receiver<OutgoingMessage>,
    ) {
        let mut recv_buf = [0u8; 512];
        loop {
            tokio::select! {
                changed = service_available.changed() => {
                    if changed.is_err() || !*service_available.borrow() {
                        debug!("device-state manager no longer available, disconnecting");
                        return;
                    }
                }
                readable = socket.readable() => {
                    if readable.is_err() {
                        warn!("lifecycle socket I/O error, disconnecting");
                        return;
                    }
                    match socket.try_recv(&mut recv_buf) {
                        Ok(0) => {
                            debug!("peer closed lifecycle socket");
                            return;
                        }
                        Ok(n) => {
                            if !self.handle_datagram(&socket, &recv_buf[..n]).await {
                                return;
                            }
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                        Err(err) => {
                            warn!(?err, "lifecycle socket read error");
                            return;
                        }
                    }
                }
                Some(msg) = outgoing.recv() => {
                    if Self::blocked_by_update_mode(&msg, update_mode) {
                        debug!(?msg, "outgoing request rejected, update-mode is active");
                        continue;
                    }
                    if self.send(&socket, msg).await.is_err() {
                        warn!("send failed, disconnecting and will reconnect");
                        return;
                    }
                }
            }
        }
    }

    fn blocked_by_update_mode(msg: &OutgoingMessage, update_mode: &watch::Receiver<bool>) -> bool {
        matches!(
            msg,
            OutgoingMessage::ShutdownReq | OutgoingMessage::RebootReq | OutgoingMessage::PowerupReq
        ) && *update_mode.borrow()
    }

    /// Returns `false` if the session should be torn down.
    async fn handle_datagram(&self, socket: &UnixDatagram, datagram: &[u8]) -> bool {
        let mut buf = BytesMut::from(datagram);
        let frame = match DsmeCodec::default().decode(&mut buf) {
            Ok(Some(frame)) => frame,
            Ok(None) => return true,
            Err(err) => {
                warn!(?err, "malformed frame from device-state manager");
                return true;
            }
        };
        match IncomingMessage::from_frame(&frame) {
            Some(IncomingMessage::Close) => {
                debug!("received CLOSE from device-state manager");
                false
            }
            Some(IncomingMessage::ProcesswdPing) => {
                trace!("received process watchdog ping");
                // Heartbeat fires even if the pong send fails (spec §4.2 item 3).
                let sent = self.send(socket, OutgoingMessage::ProcesswdPong { pid: self.pid }).await;
                if sent.is_err() {
                    warn!("failed to send process watchdog pong");
                }
                let _ = self.events.send(SocketEvent::Heartbeat).await;
                true
            }
            Some(IncomingMessage::StateChangeInd(state)) => {
                let _ = self.events.send(SocketEvent::SystemState(state)).await;
                true
            }
            None => true,
        }
    }
}

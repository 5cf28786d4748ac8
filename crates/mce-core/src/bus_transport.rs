//! Bus transport (spec §1 out-of-scope collaborator, §6 external interfaces):
//! remote-method invocation and signal routing with asynchronous replies,
//! name-ownership tracking, and pending-call cancellation. `zbus` is the
//! Linux analogue of the teacher's `StatusHandle`/SCM RPC surface — both are
//! "register a handler, get called back, reply through a handle".
//!
//! Kept trait-based (rather than exposing `zbus` types directly to callers)
//! so the compositor mediator and inbound-method dispatch can be exercised
//! under `mockall` without a real session bus, matching the out-of-scope
//! collaborator list in spec §1.

use crate::error::CompositorError;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use std::sync::Mutex;
use tracing::{debug, warn};
use zbus::Connection;

pub const COMPOSITOR_SERVICE: &str = "org.nemomobile.compositor";
pub const COMPOSITOR_PATH: &str = "/org/nemomobile/compositor";
pub const COMPOSITOR_INTERFACE: &str = "org.nemomobile.compositor";

pub const MCE_SERVICE: &str = "org.nemomobile.mce";
pub const MCE_SIGNAL_PATH: &str = "/org/nemomobile/mce/signal";
pub const MCE_SIGNAL_INTERFACE: &str = "org.nemomobile.mce.signal";

/// An in-flight `setUpdatesEnabled` call the mediator can cancel
/// client-side when superseded (spec §5 "Cancellation": the wire call has
/// already been sent, only the caller's interest in the reply is dropped).
pub struct PendingCall {
    abort: AbortHandle,
}

impl PendingCall {
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

pub trait BusTransport: Send + Sync {
    /// Start `setUpdatesEnabled(enabled)` against the compositor. Returns a
    /// handle to cancel client-side interest plus the reply future.
    fn call_set_updates_enabled(
        &self,
        enabled: bool,
    ) -> (PendingCall, BoxFuture<'static, Result<(), CompositorError>>);

    /// Best-effort pid of the current compositor bus-name owner. `None`
    /// until resolved or if the peer is not currently a bus name owner
    /// (spec §4.6: "Pid lookup is asynchronous and may not have resolved").
    fn compositor_pid(&self) -> Option<u32>;

    /// Whether the compositor is currently a known bus peer.
    fn compositor_present(&self) -> bool;

    fn emit_display_status_ind(&self, collapsed_state: &str);
    fn emit_fader_opacity_ind(&self, percent: u8, duration_ms: u32);
}

/// `zbus`-backed transport. Method timeout is the spec §5-mandated 120 s
/// (deliberately generous; liveness is enforced by the escalation chain in
/// `compositor.rs`, not by this call timing out).
pub struct ZbusTransport {
    connection: Connection,
    compositor_pid: Mutex<Option<u32>>,
}

impl ZbusTransport {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            compositor_pid: Mutex::new(None),
        }
    }

    /// Refresh the cached compositor pid. Called opportunistically by
    /// whatever drives the bus event loop; failures just leave the cache
    /// stale; `compositor_pid()` callers already tolerate `None`.
    pub async fn refresh_compositor_pid(&self) {
        let proxy = match zbus::fdo::DBusProxy::new(&self.connection).await {
            Ok(proxy) => proxy,
            Err(err) => {
                warn!(?err, "failed to build DBus proxy for pid lookup");
                return;
            }
        };
        match proxy
            .get_connection_unix_process_id(
                zbus::names::BusName::try_from(COMPOSITOR_SERVICE).unwrap(),
            )
            .await
        {
            Ok(pid) => *self.compositor_pid.lock().unwrap() = Some(pid),
            Err(_) => *self.compositor_pid.lock().unwrap() = None,
        }
    }
}

impl BusTransport for ZbusTransport {
    fn call_set_updates_enabled(
        &self,
        enabled: bool,
    ) -> (PendingCall, BoxFuture<'static, Result<(), CompositorError>>) {
        let (abort, registration) = AbortHandle::new_pair();
        let connection = self.connection.clone();
        let fut = Box::pin(async move {
            let proxy = match zbus::Proxy::new(
                &connection,
                COMPOSITOR_SERVICE,
                COMPOSITOR_PATH,
                COMPOSITOR_INTERFACE,
            )
            .await
            {
                Ok(proxy) => proxy,
                Err(_) => return Err(CompositorError::NoPeer),
            };
            let call = proxy.call_method("setUpdatesEnabled", &(enabled,));
            match Abortable::new(call, registration).await {
                Ok(Ok(_reply)) => Ok(()),
                Ok(Err(err)) => Err(CompositorError::MethodFailed(err.to_string())),
                Err(_aborted) => Err(CompositorError::Cancelled),
            }
        });
        (PendingCall { abort }, fut)
    }

    fn compositor_pid(&self) -> Option<u32> {
        *self.compositor_pid.lock().unwrap()
    }

    fn compositor_present(&self) -> bool {
        self.compositor_pid.lock().unwrap().is_some()
    }

    fn emit_display_status_ind(&self, collapsed_state: &str) {
        let connection = self.connection.clone();
        let state = collapsed_state.to_string();
        tokio::spawn(async move {
            let result = connection
                .emit_signal(
                    None::<()>,
                    MCE_SIGNAL_PATH,
                    MCE_SIGNAL_INTERFACE,
                    "display_status_ind",
                    &(state,),
                )
                .await;
            if let Err(err) = result {
                warn!(?err, "failed to emit display_status_ind");
            }
        });
    }

    fn emit_fader_opacity_ind(&self, percent: u8, duration_ms: u32) {
        let connection = self.connection.clone();
        tokio::spawn(async move {
            let result = connection
                .emit_signal(
                    None::<()>,
                    MCE_SIGNAL_PATH,
                    MCE_SIGNAL_INTERFACE,
                    "fader_opacity_ind",
                    &(percent as i32, duration_ms as i32),
                )
                .await;
            if let Err(err) = result {
                debug!(?err, "failed to emit fader_opacity_ind");
            }
        });
    }
}

//! In-process command channel.
//!
//! Routes remote method calls from the escalation handlers to the agent
//! bound to the target device, using bounded `embassy-sync` channels as
//! the per-device inbox and a `Signal` for the status reply.
//!
//! ```text
//! ┌──────────────┐  MethodRequest  ┌───────────────┐
//! │ MethodRouter │────────────────▶│ DeviceBinding │──▶ DeviceAgent
//! │  (handlers)  │◀────────────────│  (agent side) │
//! └──────────────┘   Signal<u16>   └───────────────┘
//! ```
//!
//! A caller that times out drops its end of the signal; a late reply is
//! then discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use log::{debug, info, warn};

use crate::app::ports::{CommandChannel, MethodCall, MethodInbox};
use crate::error::CommandError;
use crate::scheduler::with_timeout;

/// Pending calls per device before new calls are refused.
const INBOX_DEPTH: usize = 8;

type Reply = Signal<CriticalSectionRawMutex, u16>;

/// One call on its way to a device.
struct MethodRequest {
    method: String,
    reply: Arc<Reply>,
}

type Inbox = Channel<CriticalSectionRawMutex, MethodRequest, INBOX_DEPTH>;

/// Cloud-side end: implements [`CommandChannel`].
#[derive(Default)]
pub struct MethodRouter {
    bindings: Mutex<HashMap<String, Arc<Inbox>>>,
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `device_id` and return its inbox.  A later bind for the same
    /// device replaces this one.
    pub fn bind(&self, device_id: &str) -> DeviceBinding {
        let inbox = Arc::new(Inbox::new());
        self.lock().insert(device_id.to_string(), inbox.clone());
        info!("router: {} bound", device_id);
        DeviceBinding {
            device_id: device_id.to_string(),
            inbox,
        }
    }

    /// Drop the binding for `device_id`; later calls fail as not connected.
    pub fn unbind(&self, device_id: &str) {
        if self.lock().remove(device_id).is_some() {
            info!("router: {} unbound", device_id);
        }
    }

    pub fn is_bound(&self, device_id: &str) -> bool {
        self.lock().contains_key(device_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Inbox>>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CommandChannel for MethodRouter {
    async fn invoke(
        &self,
        device_id: &str,
        method: &str,
        timeout: Duration,
    ) -> Result<u16, CommandError> {
        let inbox = self
            .lock()
            .get(device_id)
            .cloned()
            .ok_or_else(|| CommandError::NotConnected(device_id.to_string()))?;

        let reply = Arc::new(Reply::new());
        let request = MethodRequest {
            method: method.to_string(),
            reply: reply.clone(),
        };
        if inbox.try_send(request).is_err() {
            warn!("router: inbox of {} full, {} refused", device_id, method);
            return Err(CommandError::Transport(format!("inbox of {device_id} full")));
        }
        debug!("router: {} → {}", method, device_id);

        with_timeout(timeout, reply.wait())
            .await
            .map_err(|_| CommandError::Timeout(timeout))
    }
}

/// Device-side end: implements [`MethodInbox`] for one device.
pub struct DeviceBinding {
    device_id: String,
    inbox: Arc<Inbox>,
}

impl DeviceBinding {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl MethodInbox for DeviceBinding {
    async fn next_call(&self) -> Option<MethodCall> {
        let MethodRequest { method, reply } = self.inbox.receive().await;
        Some(MethodCall::new(method, move |status| reply.signal(status)))
    }
}

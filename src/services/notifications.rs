//! Desktop notification server.
//!
//! Owns `org.freedesktop.Notifications` on the session bus. Incoming
//! notifications become `NotificationPosted` events; panels answer with
//! `closed` and `action`, which are turned back into the bus signals
//! applications listen for.

use crate::config::TimeoutConfig;
use crate::error::{CommandError, HostError};
use crate::event_bus::EventSender;
use crate::services::retry_until;
use capy_events::{Event, EventPayload, Notification, NotificationAction, NotificationClosed};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use zbus::object_server::SignalContext;
use zbus::zvariant::{OwnedValue, Value};
use zbus::{Connection, fdo};

pub const BUS_NAME: &str = "org.freedesktop.Notifications";
const OBJECT_PATH: &str = "/org/freedesktop/Notifications";

/// Close reason: closed by a call to CloseNotification.
pub const REASON_CLOSED: u32 = 3;

const DEFAULT_URGENCY: u8 = 1;

struct NotificationServer {
    events: EventSender,
    next_id: AtomicU32,
}

impl NotificationServer {
    fn new(events: EventSender) -> Self {
        Self {
            events,
            next_id: AtomicU32::new(1),
        }
    }

    async fn submit(&self, payload: EventPayload) {
        if self.events.submit(Event::new(payload)).await.is_err() {
            debug!("Notification event dropped, multiplexer closed");
        }
    }
}

#[zbus::interface(name = "org.freedesktop.Notifications")]
impl NotificationServer {
    fn get_capabilities(&self) -> Vec<String> {
        vec!["body".to_string(), "actions".to_string()]
    }

    #[allow(clippy::too_many_arguments)]
    async fn notify(
        &self,
        app_name: String,
        replaces_id: u32,
        app_icon: String,
        summary: String,
        body: String,
        actions: Vec<String>,
        hints: HashMap<String, OwnedValue>,
        expire_timeout: i32,
    ) -> u32 {
        let id = if replaces_id != 0 {
            replaces_id
        } else {
            self.next_id.fetch_add(1, Ordering::SeqCst)
        };

        debug!("Notification {} from {}: {}", id, app_name, summary);

        let notification = Notification {
            id,
            app_name,
            app_icon,
            summary,
            body,
            actions: parse_actions(&actions),
            urgency: urgency(hints.get("urgency").map(|v| &**v)),
            expire_timeout_ms: expire_timeout,
            received_at: chrono::Local::now().timestamp(),
        };
        self.submit(EventPayload::NotificationPosted(notification))
            .await;
        id
    }

    async fn close_notification(
        &self,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
        id: u32,
    ) -> fdo::Result<()> {
        self.submit(EventPayload::NotificationClosed(NotificationClosed {
            id,
            reason: REASON_CLOSED,
        }))
        .await;
        Self::notification_closed(&ctxt, id, REASON_CLOSED).await?;
        Ok(())
    }

    fn get_server_information(&self) -> (String, String, String, String) {
        (
            "CapyHost".to_string(),
            "capyshell".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
            "1.2".to_string(),
        )
    }

    #[zbus(signal)]
    async fn notification_closed(ctxt: &SignalContext<'_>, id: u32, reason: u32)
    -> zbus::Result<()>;

    #[zbus(signal)]
    async fn action_invoked(ctxt: &SignalContext<'_>, id: u32, action_key: &str)
    -> zbus::Result<()>;
}

pub struct NotificationService {
    conn: Connection,
    events: EventSender,
}

impl NotificationService {
    pub async fn start(timeouts: &TimeoutConfig, events: EventSender) -> Result<Self, HostError> {
        info!("Starting notification server...");

        let conn = retry_until(
            "notifications",
            timeouts.connect(),
            timeouts.connect_retry(),
            || {
                let server = NotificationServer::new(events.clone());
                async move {
                    zbus::connection::Builder::session()?
                        .name(BUS_NAME)?
                        .serve_at(OBJECT_PATH, server)?
                        .build()
                        .await
                }
            },
        )
        .await?;

        info!("Notification server owns {}", BUS_NAME);
        Ok(Self { conn, events })
    }

    /// A panel dismissed a notification.
    pub async fn closed(&self, id: u32, reason: u32) -> Result<(), CommandError> {
        let ctxt = SignalContext::new(&self.conn, OBJECT_PATH)?;
        NotificationServer::notification_closed(&ctxt, id, reason).await?;

        let closed = NotificationClosed { id, reason };
        self.events
            .submit(Event::new(EventPayload::NotificationClosed(closed)))
            .await
            .map_err(CommandError::failed)
    }

    /// A panel invoked one of the notification's actions.
    pub async fn action(&self, id: u32, key: &str) -> Result<(), CommandError> {
        let ctxt = SignalContext::new(&self.conn, OBJECT_PATH)?;
        NotificationServer::action_invoked(&ctxt, id, key).await?;
        Ok(())
    }

    /// Give the bus name back so the next cycle can claim it.
    pub async fn close(&self) {
        if let Err(e) = self.conn.release_name(BUS_NAME).await {
            warn!("Failed to release {}: {}", BUS_NAME, e);
        }
        let _ = self
            .conn
            .object_server()
            .remove::<NotificationServer, _>(OBJECT_PATH)
            .await;
    }
}

/// Actions arrive as a flat `[key, label, key, label, ...]` list.
fn parse_actions(actions: &[String]) -> Vec<NotificationAction> {
    actions
        .chunks_exact(2)
        .map(|pair| NotificationAction {
            key: pair[0].clone(),
            label: pair[1].clone(),
        })
        .collect()
}

fn urgency(hint: Option<&Value<'_>>) -> u8 {
    match hint {
        Some(Value::U8(level)) => (*level).min(2),
        Some(Value::U32(level)) => (*level).min(2) as u8,
        Some(Value::I32(level)) => (*level).clamp(0, 2) as u8,
        _ => DEFAULT_URGENCY,
    }
}

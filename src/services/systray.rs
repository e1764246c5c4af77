//! System tray (StatusNotifierItem) adapter.
//!
//! Hosts `org.kde.StatusNotifierWatcher` on the session bus. Applications
//! register their items with us; we fetch each item's properties, follow its
//! change signals and report it gone when its owner leaves the bus.

use crate::config::TimeoutConfig;
use crate::error::{CommandError, HostError};
use crate::event_bus::EventSender;
use crate::services::{Tasks, retry_until};
use capy_events::{Event, EventPayload, MenuEventData, SystrayItem, SystrayItemRemoved};
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use zbus::message::Header;
use zbus::object_server::SignalContext;
use zbus::zvariant::{OwnedObjectPath, Value};
use zbus::{Connection, fdo};

pub const BUS_NAME: &str = "org.kde.StatusNotifierWatcher";
const WATCHER_PATH: &str = "/StatusNotifierWatcher";
const DEFAULT_ITEM_PATH: &str = "/StatusNotifierItem";

#[zbus::proxy(interface = "org.kde.StatusNotifierItem", gen_blocking = false)]
trait StatusNotifierItem {
    fn activate(&self, x: i32, y: i32) -> zbus::Result<()>;
    fn secondary_activate(&self, x: i32, y: i32) -> zbus::Result<()>;
    fn context_menu(&self, x: i32, y: i32) -> zbus::Result<()>;
    fn scroll(&self, delta: i32, orientation: &str) -> zbus::Result<()>;

    #[zbus(property)]
    fn id(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn title(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn status(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn icon_name(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn menu(&self) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(interface = "com.canonical.dbusmenu", gen_blocking = false)]
trait DBusMenu {
    fn about_to_show(&self, id: i32) -> zbus::Result<bool>;
    fn event(&self, id: i32, event_id: &str, data: &Value<'_>, timestamp: u32)
    -> zbus::Result<()>;
}

/// Registered items: bus name to object path.
type Registry = Arc<Mutex<HashMap<String, String>>>;

enum TrayChange {
    Registered { bus_name: String, path: String },
    Vanished(String),
}

struct Watcher {
    registry: Registry,
    changes: mpsc::UnboundedSender<TrayChange>,
}

#[zbus::interface(name = "org.kde.StatusNotifierWatcher")]
impl Watcher {
    async fn register_status_notifier_item(
        &self,
        #[zbus(header)] header: Header<'_>,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
        service: &str,
    ) -> fdo::Result<()> {
        let sender = header.sender().map(|s| s.to_string());
        let (bus_name, path) = resolve_item(service, sender.as_deref())
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("cannot resolve item {}", service)))?;

        debug!("Systray item registered: {}{}", bus_name, path);
        let key = format!("{}{}", bus_name, path);
        let _ = self
            .changes
            .send(TrayChange::Registered { bus_name, path });
        Self::status_notifier_item_registered(&ctxt, &key).await?;
        Ok(())
    }

    async fn register_status_notifier_host(&self, service: &str) {
        debug!("Systray host registered: {}", service);
    }

    #[zbus(property)]
    fn registered_status_notifier_items(&self) -> Vec<String> {
        self.registry
            .lock()
            .map(|items| {
                items
                    .iter()
                    .map(|(bus, path)| format!("{}{}", bus, path))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[zbus(property)]
    fn is_status_notifier_host_registered(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn protocol_version(&self) -> i32 {
        0
    }

    #[zbus(signal)]
    async fn status_notifier_item_registered(ctxt: &SignalContext<'_>, service: &str)
    -> zbus::Result<()>;

    #[zbus(signal)]
    async fn status_notifier_item_unregistered(
        ctxt: &SignalContext<'_>,
        service: &str,
    ) -> zbus::Result<()>;
}

pub struct SystrayService {
    conn: Connection,
    registry: Registry,
    tasks: Tasks,
}

impl SystrayService {
    pub async fn start(timeouts: &TimeoutConfig, events: EventSender) -> Result<Self, HostError> {
        info!("Starting systray watcher...");

        let registry: Registry = Arc::default();
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();

        let conn = retry_until(
            "systray",
            timeouts.connect(),
            timeouts.connect_retry(),
            || {
                let watcher = Watcher {
                    registry: Arc::clone(&registry),
                    changes: changes_tx.clone(),
                };
                async move {
                    zbus::connection::Builder::session()?
                        .name(BUS_NAME)?
                        .serve_at(WATCHER_PATH, watcher)?
                        .build()
                        .await
                }
            },
        )
        .await?;

        let tasks = Tasks::default();
        tasks.spawn(track_items(
            conn.clone(),
            Arc::clone(&registry),
            changes_rx,
            events,
        ));
        tasks.spawn(watch_owners(conn.clone(), changes_tx));

        info!("Systray watcher owns {}", BUS_NAME);
        Ok(Self {
            conn,
            registry,
            tasks,
        })
    }

    pub async fn activate(&self, bus_name: &str, x: i32, y: i32) -> Result<(), CommandError> {
        self.item(bus_name).await?.activate(x, y).await?;
        Ok(())
    }

    pub async fn secondary_activate(&self, bus_name: &str, x: i32, y: i32) -> Result<(), CommandError> {
        self.item(bus_name).await?.secondary_activate(x, y).await?;
        Ok(())
    }

    pub async fn context_menu(&self, bus_name: &str, x: i32, y: i32) -> Result<(), CommandError> {
        self.item(bus_name).await?.context_menu(x, y).await?;
        Ok(())
    }

    pub async fn scroll(
        &self,
        bus_name: &str,
        delta: i32,
        orientation: &str,
    ) -> Result<(), CommandError> {
        let orientation = scroll_orientation(orientation)?;
        self.item(bus_name).await?.scroll(delta, orientation).await?;
        Ok(())
    }

    /// Returns whether the menu needs to be refetched.
    pub async fn menu_about_to_show(&self, bus_name: &str, id: i32) -> Result<bool, CommandError> {
        Ok(self.menu(bus_name).await?.about_to_show(id).await?)
    }

    pub async fn menu_event(
        &self,
        bus_name: &str,
        id: i32,
        event_id: &str,
        data: MenuEventData,
        timestamp: u32,
    ) -> Result<(), CommandError> {
        let value = menu_data_value(&data);
        self.menu(bus_name)
            .await?
            .event(id, event_id, &value, timestamp)
            .await?;
        Ok(())
    }

    async fn item(&self, bus_name: &str) -> Result<StatusNotifierItemProxy<'static>, CommandError> {
        let path = self
            .registry
            .lock()
            .ok()
            .and_then(|items| items.get(bus_name).cloned())
            .ok_or_else(|| CommandError::Failed(format!("unknown systray item {}", bus_name)))?;
        Ok(item_proxy(&self.conn, bus_name.to_string(), path).await?)
    }

    async fn menu(&self, bus_name: &str) -> Result<DBusMenuProxy<'static>, CommandError> {
        let menu_path = self.item(bus_name).await?.menu().await?;
        Ok(DBusMenuProxy::builder(&self.conn)
            .destination(bus_name.to_string())?
            .path(menu_path)?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?)
    }

    pub async fn close(&self) {
        self.tasks.abort_all();
        if let Err(e) = self.conn.release_name(BUS_NAME).await {
            warn!("Failed to release {}: {}", BUS_NAME, e);
        }
        let _ = self
            .conn
            .object_server()
            .remove::<Watcher, _>(WATCHER_PATH)
            .await;
    }
}

async fn item_proxy(
    conn: &Connection,
    bus_name: String,
    path: String,
) -> zbus::Result<StatusNotifierItemProxy<'static>> {
    StatusNotifierItemProxy::builder(conn)
        .destination(bus_name)?
        .path(path)?
        .cache_properties(zbus::proxy::CacheProperties::No)
        .build()
        .await
}

async fn fetch_item(proxy: &StatusNotifierItemProxy<'_>, bus_name: &str, path: &str) -> SystrayItem {
    SystrayItem {
        bus_name: bus_name.to_string(),
        object_path: path.to_string(),
        id: proxy.id().await.unwrap_or_default(),
        title: proxy.title().await.unwrap_or_default(),
        status: proxy.status().await.unwrap_or_default(),
        icon_name: proxy.icon_name().await.unwrap_or_default(),
        menu_path: proxy.menu().await.ok().map(|p| p.to_string()),
    }
}

async fn submit_item(events: &EventSender, item: SystrayItem) {
    if events
        .submit(Event::new(EventPayload::SystrayItemUpdated(item)))
        .await
        .is_err()
    {
        debug!("Systray update dropped, multiplexer closed");
    }
}

/// Owns the registry. One follower task per item re-fetches properties
/// whenever the item signals a change.
async fn track_items(
    conn: Connection,
    registry: Registry,
    mut changes: mpsc::UnboundedReceiver<TrayChange>,
    events: EventSender,
) {
    let mut followers = JoinSet::new();
    let mut handles = HashMap::new();

    while let Some(change) = changes.recv().await {
        match change {
            TrayChange::Registered { bus_name, path } => {
                let proxy = match item_proxy(&conn, bus_name.clone(), path.clone()).await {
                    Ok(proxy) => proxy,
                    Err(e) => {
                        warn!("Cannot reach systray item {}: {}", bus_name, e);
                        continue;
                    }
                };
                if let Ok(mut items) = registry.lock() {
                    items.insert(bus_name.clone(), path.clone());
                }

                submit_item(&events, fetch_item(&proxy, &bus_name, &path).await).await;

                let handle = followers.spawn(follow_item(proxy, bus_name.clone(), path, events.clone()));
                if let Some(previous) = handles.insert(bus_name, handle) {
                    previous.abort();
                }
            }
            TrayChange::Vanished(bus_name) => {
                let known = registry
                    .lock()
                    .map(|mut items| items.remove(&bus_name))
                    .ok()
                    .flatten();
                let Some(path) = known else {
                    continue;
                };
                if let Some(handle) = handles.remove(&bus_name) {
                    handle.abort();
                }

                debug!("Systray item gone: {}", bus_name);
                if let Ok(ctxt) = SignalContext::new(&conn, WATCHER_PATH) {
                    let key = format!("{}{}", bus_name, path);
                    let _ = Watcher::status_notifier_item_unregistered(&ctxt, &key).await;
                }
                let removed = SystrayItemRemoved { bus_name };
                if events
                    .submit(Event::new(EventPayload::SystrayItemRemoved(removed)))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }

        // Reap finished followers.
        while followers.try_join_next().is_some() {}
    }
}

async fn follow_item(
    proxy: StatusNotifierItemProxy<'static>,
    bus_name: String,
    path: String,
    events: EventSender,
) {
    let mut signals = match proxy.inner().receive_all_signals().await {
        Ok(signals) => signals,
        Err(e) => {
            debug!("Not following {}: {}", bus_name, e);
            return;
        }
    };
    while signals.next().await.is_some() {
        submit_item(&events, fetch_item(&proxy, &bus_name, &path).await).await;
    }
}

/// Report items whose owner left the bus.
async fn watch_owners(conn: Connection, changes: mpsc::UnboundedSender<TrayChange>) {
    let dbus = match fdo::DBusProxy::new(&conn).await {
        Ok(dbus) => dbus,
        Err(e) => {
            warn!("Cannot watch systray item owners: {}", e);
            return;
        }
    };
    let mut owners = match dbus.receive_name_owner_changed().await {
        Ok(owners) => owners,
        Err(e) => {
            warn!("Cannot watch systray item owners: {}", e);
            return;
        }
    };

    while let Some(signal) = owners.next().await {
        let Ok(args) = signal.args() else {
            continue;
        };
        if args.new_owner().is_none() {
            let name = args.name().to_string();
            if changes.send(TrayChange::Vanished(name)).is_err() {
                return;
            }
        }
    }
}

/// Items register either a bus name (with the default object path) or just
/// an object path on the caller's own connection.
fn resolve_item(service: &str, sender: Option<&str>) -> Option<(String, String)> {
    if service.starts_with('/') {
        return sender.map(|sender| (sender.to_string(), service.to_string()));
    }
    if service.is_empty() {
        return None;
    }
    Some((service.to_string(), DEFAULT_ITEM_PATH.to_string()))
}

fn scroll_orientation(orientation: &str) -> Result<&'static str, CommandError> {
    match orientation.to_ascii_lowercase().as_str() {
        "vertical" => Ok("vertical"),
        "horizontal" => Ok("horizontal"),
        other => Err(CommandError::Failed(format!(
            "invalid scroll orientation {:?}",
            other
        ))),
    }
}

fn menu_data_value(data: &MenuEventData) -> Value<'_> {
    match data {
        MenuEventData::Empty => Value::I32(0),
        MenuEventData::Int(v) => Value::I32(*v),
        MenuEventData::Bool(v) => Value::Bool(*v),
        MenuEventData::Text(v) => Value::from(v.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_resolve_by_name_or_path() {
        assert_eq!(
            resolve_item("org.kde.StatusNotifierItem-42-1", Some(":1.9")),
            Some((
                "org.kde.StatusNotifierItem-42-1".to_string(),
                "/StatusNotifierItem".to_string()
            ))
        );
        assert_eq!(
            resolve_item("/org/ayatana/NotificationItem/nm", Some(":1.50")),
            Some((
                ":1.50".to_string(),
                "/org/ayatana/NotificationItem/nm".to_string()
            ))
        );
        assert_eq!(resolve_item("/path/without/sender", None), None);
        assert_eq!(resolve_item("", Some(":1.2")), None);
    }

    #[test]
    fn orientation_is_validated() {
        assert_eq!(scroll_orientation("Vertical").unwrap(), "vertical");
        assert_eq!(scroll_orientation("horizontal").unwrap(), "horizontal");
        assert!(scroll_orientation("diagonal").is_err());
    }

    #[test]
    fn menu_data_maps_to_variants() {
        assert_eq!(menu_data_value(&MenuEventData::Empty), Value::I32(0));
        assert_eq!(menu_data_value(&MenuEventData::Bool(true)), Value::Bool(true));
        assert_eq!(
            menu_data_value(&MenuEventData::Text("x".to_string())),
            Value::from("x")
        );
    }
}

//! Audio adapter using PulseAudio/PipeWire.
//!
//! A single thread owns the libpulse mainloop. It mirrors sinks and sources,
//! emits change/removed events, and serves volume and mute commands that
//! arrive over a crossbeam channel.
//!
//! Uses libpulse-binding which works with both PulseAudio and PipeWire
//! (via pipewire-pulse compatibility layer).

use crate::config::{AudioConfig, TimeoutConfig};
use crate::error::{CommandError, HostError};
use crate::event_bus::EventSender;
use capy_events::{AdjustDirection, AudioDevice, AudioDeviceRemoved, Event, EventPayload};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::introspect::{Introspector, SinkInfo, SourceInfo};
use libpulse_binding::context::subscribe::{Facility, InterestMaskSet, Operation};
use libpulse_binding::context::{Context, FlagSet, State as ContextState};
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::volume::{ChannelVolumes, Volume};
use log::{debug, error, info, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// How long the mainloop thread waits for a command between iterations.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Sink,
    Source,
}

impl DeviceKind {
    /// Server alias for the default device of this kind.
    fn default_alias(self) -> &'static str {
        match self {
            DeviceKind::Sink => "@DEFAULT_SINK@",
            DeviceKind::Source => "@DEFAULT_SOURCE@",
        }
    }

    fn device_name(self, id: &str) -> String {
        if id.is_empty() {
            self.default_alias().to_string()
        } else {
            id.to_string()
        }
    }
}

type Reply = oneshot::Sender<Result<(), CommandError>>;

enum AudioCommand {
    AdjustVolume {
        kind: DeviceKind,
        id: String,
        direction: AdjustDirection,
        reply: Reply,
    },
    ToggleMute {
        kind: DeviceKind,
        id: String,
        reply: Reply,
    },
    Shutdown,
}

pub struct AudioService {
    commands: Sender<AudioCommand>,
}

impl AudioService {
    /// Start the mainloop thread and wait until the server accepted us or
    /// the connect deadline passed.
    pub async fn start(
        config: &AudioConfig,
        timeouts: &TimeoutConfig,
        events: EventSender,
    ) -> Result<Self, HostError> {
        info!("Starting audio service...");

        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = oneshot::channel();
        let limits = Limits {
            step: config.step_percent as i32,
            max: config.max_percent as i32,
        };
        let deadline = Instant::now() + timeouts.connect();
        let retry = timeouts.connect_retry();

        thread::Builder::new()
            .name("capyhost-audio".to_string())
            .spawn(move || {
                let (mut ml, mut ctx) = match connect(deadline, retry) {
                    Ok(connected) => {
                        let _ = ready_tx.send(Ok(()));
                        connected
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = run_mainloop(&mut ml, &mut ctx, command_rx, events, limits) {
                    error!("Audio mainloop failed: {}", e);
                }
                ctx.disconnect();
                info!("Audio service stopped");
            })?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self { commands }),
            Ok(Err(reason)) => Err(HostError::ConnectFailed {
                service: "audio",
                reason,
            }),
            Err(_) => Err(HostError::ConnectFailed {
                service: "audio",
                reason: "audio thread exited".to_string(),
            }),
        }
    }

    /// Step the volume of a device by the configured amount. An empty id
    /// targets the default device.
    pub async fn adjust_volume(
        &self,
        kind: DeviceKind,
        id: &str,
        direction: AdjustDirection,
    ) -> Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(AudioCommand::AdjustVolume {
            kind,
            id: id.to_string(),
            direction,
            reply,
        })?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn toggle_mute(&self, kind: DeviceKind, id: &str) -> Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(AudioCommand::ToggleMute {
            kind,
            id: id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| stopped())?
    }

    fn send(&self, command: AudioCommand) -> Result<(), CommandError> {
        self.commands.send(command).map_err(|_| stopped())
    }

    pub fn close(&self) {
        let _ = self.commands.send(AudioCommand::Shutdown);
    }
}

impl Drop for AudioService {
    fn drop(&mut self) {
        self.close();
    }
}

fn stopped() -> CommandError {
    CommandError::Failed("audio service stopped".to_string())
}

#[derive(Clone, Copy, Debug)]
struct Limits {
    step: i32,
    max: i32,
}

// === Internal implementation ===

fn connect(deadline: Instant, retry: Duration) -> Result<(Mainloop, Context), String> {
    loop {
        match try_connect() {
            Ok(connected) => {
                info!("Connected to PulseAudio/PipeWire");
                return Ok(connected);
            }
            Err(e) if Instant::now() + retry >= deadline => return Err(e),
            Err(e) => {
                debug!("Audio server not reachable yet: {}", e);
                thread::sleep(retry);
            }
        }
    }
}

fn try_connect() -> Result<(Mainloop, Context), String> {
    let mut ml = Mainloop::new().ok_or("Failed to create mainloop")?;
    let mut ctx = Context::new(&ml, "CapyHost Audio").ok_or("Failed to create context")?;

    ctx.connect(None, FlagSet::NOFLAGS, None)
        .map_err(|e| format!("Failed to connect: {:?}", e))?;

    // Wait for context to be ready
    loop {
        match ml.iterate(true) {
            IterateResult::Quit(_) => return Err("Mainloop quit during connect".into()),
            IterateResult::Err(e) => return Err(format!("Mainloop error: {:?}", e)),
            IterateResult::Success(_) => {}
        }

        match ctx.get_state() {
            ContextState::Ready => return Ok((ml, ctx)),
            ContextState::Failed | ContextState::Terminated => {
                return Err("Context connection failed".into());
            }
            _ => continue,
        }
    }
}

/// Last state sent to panels, keyed by server index.
#[derive(Default)]
struct Mirror {
    default_sink: String,
    default_source: String,
    sinks: HashMap<u32, AudioDevice>,
    sources: HashMap<u32, AudioDevice>,
}

impl Mirror {
    fn devices(&mut self, kind: DeviceKind) -> &mut HashMap<u32, AudioDevice> {
        match kind {
            DeviceKind::Sink => &mut self.sinks,
            DeviceKind::Source => &mut self.sources,
        }
    }

    fn default_name(&self, kind: DeviceKind) -> &str {
        match kind {
            DeviceKind::Sink => &self.default_sink,
            DeviceKind::Source => &self.default_source,
        }
    }

    /// Record `device` and report whether it differs from what we last sent.
    fn update(&mut self, kind: DeviceKind, index: u32, mut device: AudioDevice) -> Option<AudioDevice> {
        device.is_default = device.id == self.default_name(kind);
        let devices = self.devices(kind);
        if devices.get(&index) == Some(&device) {
            return None;
        }
        devices.insert(index, device.clone());
        Some(device)
    }
}

fn run_mainloop(
    ml: &mut Mainloop,
    ctx: &mut Context,
    commands: Receiver<AudioCommand>,
    events: EventSender,
    limits: Limits,
) -> Result<(), String> {
    let mirror = Rc::new(RefCell::new(Mirror::default()));

    // Subscribe to sink, source and server events
    ctx.subscribe(
        InterestMaskSet::SINK | InterestMaskSet::SOURCE | InterestMaskSet::SERVER,
        |success| {
            if !success {
                warn!("Failed to subscribe to PulseAudio events");
            }
        },
    );

    // Start with an initial query
    let needs_query = Rc::new(RefCell::new(true));
    let needs_query_cb = Rc::clone(&needs_query);
    let mirror_cb = Rc::clone(&mirror);
    let events_cb = events.clone();

    ctx.set_subscribe_callback(Some(Box::new(move |facility, operation, index| {
        let kind = match facility {
            Some(Facility::Sink) => DeviceKind::Sink,
            Some(Facility::Source) => DeviceKind::Source,
            Some(Facility::Server) => {
                *needs_query_cb.borrow_mut() = true;
                return;
            }
            _ => return,
        };
        match operation {
            Some(Operation::Removed) => {
                let removed = mirror_cb.borrow_mut().devices(kind).remove(&index);
                if let Some(device) = removed {
                    send_removed(&events_cb, kind, device.id);
                }
            }
            Some(Operation::New | Operation::Changed) => {
                *needs_query_cb.borrow_mut() = true;
            }
            None => {}
        }
    })));

    info!("Audio service listening for changes...");

    loop {
        match ml.iterate(false) {
            IterateResult::Quit(_) => break,
            IterateResult::Err(e) => return Err(format!("Mainloop error: {:?}", e)),
            IterateResult::Success(_) => {}
        }

        // Query outside of callbacks
        if *needs_query.borrow() {
            *needs_query.borrow_mut() = false;
            query_all(ctx, &mirror, &events);
        }

        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(AudioCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => run_command(ctx, command, limits),
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    Ok(())
}

/// Refresh defaults then every device. Requests complete in order, so the
/// device lists see the new default names.
fn query_all(ctx: &Context, mirror: &Rc<RefCell<Mirror>>, events: &EventSender) {
    let introspect = ctx.introspect();

    let mirror_server = Rc::clone(mirror);
    introspect.get_server_info(move |info| {
        let mut mirror = mirror_server.borrow_mut();
        mirror.default_sink = info
            .default_sink_name
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_default();
        mirror.default_source = info
            .default_source_name
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_default();
    });

    let mirror_sinks = Rc::clone(mirror);
    let events_sinks = events.clone();
    introspect.get_sink_info_list(move |result| {
        if let ListResult::Item(info) = result {
            let (index, device) = sink_device(info);
            if let Some(device) = mirror_sinks.borrow_mut().update(DeviceKind::Sink, index, device) {
                debug!(
                    "Sink update: {} {}% (muted: {})",
                    device.id, device.volume_percent, device.muted
                );
                send_changed(&events_sinks, DeviceKind::Sink, device);
            }
        }
    });

    let mirror_sources = Rc::clone(mirror);
    let events_sources = events.clone();
    introspect.get_source_info_list(move |result| {
        if let ListResult::Item(info) = result {
            // Monitor sources mirror a sink; panels only care about inputs.
            if info.monitor_of_sink.is_some() {
                return;
            }
            let (index, device) = source_device(info);
            if let Some(device) = mirror_sources
                .borrow_mut()
                .update(DeviceKind::Source, index, device)
            {
                send_changed(&events_sources, DeviceKind::Source, device);
            }
        }
    });
}

/// What a command needs to know about one device.
struct Snapshot {
    name: String,
    volume: ChannelVolumes,
    muted: bool,
}

fn run_command(ctx: &Context, command: AudioCommand, limits: Limits) {
    match command {
        AudioCommand::AdjustVolume {
            kind,
            id,
            direction,
            reply,
        } => {
            let mut setter = ctx.introspect();
            let apply = with_device(reply, move |snapshot, reply| {
                let current = volume_to_percent(snapshot.volume.avg());
                let target = step_percent(current, direction, limits);
                let mut volumes = snapshot.volume;
                let channels = volumes.len();
                volumes.set(channels, percent_to_volume(target));
                debug!("Volume {} {}% -> {}%", snapshot.name, current, target);
                let done = completion(reply);
                match kind {
                    DeviceKind::Sink => {
                        setter.set_sink_volume_by_name(&snapshot.name, &volumes, Some(done));
                    }
                    DeviceKind::Source => {
                        setter.set_source_volume_by_name(&snapshot.name, &volumes, Some(done));
                    }
                }
            });
            lookup(ctx.introspect(), kind, &kind.device_name(&id), apply);
        }
        AudioCommand::ToggleMute { kind, id, reply } => {
            let mut setter = ctx.introspect();
            let apply = with_device(reply, move |snapshot, reply| {
                let done = completion(reply);
                match kind {
                    DeviceKind::Sink => {
                        setter.set_sink_mute_by_name(&snapshot.name, !snapshot.muted, Some(done));
                    }
                    DeviceKind::Source => {
                        setter.set_source_mute_by_name(&snapshot.name, !snapshot.muted, Some(done));
                    }
                }
            });
            lookup(ctx.introspect(), kind, &kind.device_name(&id), apply);
        }
        AudioCommand::Shutdown => {}
    }
}

/// Wrap a device action so the reply is answered exactly once, with a
/// failure when the lookup ends without a device.
fn with_device<F>(reply: Reply, mut action: F) -> impl FnMut(Option<Snapshot>) + 'static
where
    F: FnMut(Snapshot, Reply) + 'static,
{
    let mut reply = Some(reply);
    move |snapshot| {
        let Some(reply) = reply.take() else {
            return;
        };
        match snapshot {
            Some(snapshot) => action(snapshot, reply),
            None => {
                let _ = reply.send(Err(CommandError::Failed("no such audio device".to_string())));
            }
        }
    }
}

fn completion(reply: Reply) -> Box<dyn FnMut(bool) + 'static> {
    let mut reply = Some(reply);
    Box::new(move |success| {
        if let Some(reply) = reply.take() {
            let result = if success {
                Ok(())
            } else {
                Err(CommandError::Failed("audio server rejected the change".to_string()))
            };
            let _ = reply.send(result);
        }
    })
}

fn lookup<F>(introspect: Introspector, kind: DeviceKind, name: &str, mut apply: F)
where
    F: FnMut(Option<Snapshot>) + 'static,
{
    match kind {
        DeviceKind::Sink => {
            introspect.get_sink_info_by_name(name, move |result| match result {
                ListResult::Item(info) => apply(Some(Snapshot {
                    name: optional_string(&info.name),
                    volume: info.volume,
                    muted: info.mute,
                })),
                ListResult::End | ListResult::Error => apply(None),
            });
        }
        DeviceKind::Source => {
            introspect.get_source_info_by_name(name, move |result| match result {
                ListResult::Item(info) => apply(Some(Snapshot {
                    name: optional_string(&info.name),
                    volume: info.volume,
                    muted: info.mute,
                })),
                ListResult::End | ListResult::Error => apply(None),
            });
        }
    }
}

fn optional_string(value: &Option<std::borrow::Cow<'_, str>>) -> String {
    value.as_ref().map(|s| s.to_string()).unwrap_or_default()
}

fn sink_device(info: &SinkInfo) -> (u32, AudioDevice) {
    (
        info.index,
        AudioDevice {
            id: optional_string(&info.name),
            description: optional_string(&info.description),
            volume_percent: volume_to_percent(info.volume.avg()),
            muted: info.mute,
            is_default: false,
        },
    )
}

fn source_device(info: &SourceInfo) -> (u32, AudioDevice) {
    (
        info.index,
        AudioDevice {
            id: optional_string(&info.name),
            description: optional_string(&info.description),
            volume_percent: volume_to_percent(info.volume.avg()),
            muted: info.mute,
            is_default: false,
        },
    )
}

fn volume_to_percent(volume: Volume) -> i32 {
    let normal = Volume::NORMAL.0 as f64;
    let current = volume.0 as f64;
    ((current / normal) * 100.0).round() as i32
}

fn percent_to_volume(percent: i32) -> Volume {
    let normal = Volume::NORMAL.0 as f64;
    Volume((percent.max(0) as f64 / 100.0 * normal).round() as u32)
}

/// Next volume after one step, clamped to `0..=max`.
fn step_percent(current: i32, direction: AdjustDirection, limits: Limits) -> i32 {
    (current + direction.as_sign() * limits.step).clamp(0, limits.max.max(0))
}

/// Send device state to the multiplexer. Called on the mainloop thread.
fn send_changed(events: &EventSender, kind: DeviceKind, device: AudioDevice) {
    let payload = match kind {
        DeviceKind::Sink => EventPayload::AudioSinkChanged(device),
        DeviceKind::Source => EventPayload::AudioSourceChanged(device),
    };
    if events.blocking_submit(Event::new(payload)).is_err() {
        debug!("Audio update dropped, multiplexer closed");
    }
}

fn send_removed(events: &EventSender, kind: DeviceKind, id: String) {
    let removed = AudioDeviceRemoved { id };
    let payload = match kind {
        DeviceKind::Sink => EventPayload::AudioSinkRemoved(removed),
        DeviceKind::Source => EventPayload::AudioSourceRemoved(removed),
    };
    if events.blocking_submit(Event::new(payload)).is_err() {
        debug!("Audio removal dropped, multiplexer closed");
    }
}

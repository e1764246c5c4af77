//! Event envelope, kind tags and typed payload access.

use crate::error::EventError;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Declares the closed set of kinds together with the payload each one carries.
macro_rules! event_kinds {
    ($($kind:ident($ty:ty)),* $(,)?) => {
        /// Tag identifying an event's payload type.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum EventKind {
            $($kind),*
        }

        /// Payload union keyed by [`EventKind`].
        #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
        pub enum EventPayload {
            $($kind($ty)),*
        }

        impl EventPayload {
            pub fn kind(&self) -> EventKind {
                match self {
                    $(EventPayload::$kind(_) => EventKind::$kind),*
                }
            }
        }
    };
}

event_kinds! {
    WorkspaceChanged(WorkspaceChange),
    ActiveWindowChanged(ActiveWindow),
    MonitorAdded(MonitorChange),
    MonitorRemoved(MonitorChange),
    AudioSinkChanged(AudioDevice),
    AudioSinkRemoved(AudioDeviceRemoved),
    AudioSourceChanged(AudioDevice),
    AudioSourceRemoved(AudioDeviceRemoved),
    NotificationPosted(Notification),
    NotificationClosed(NotificationClosed),
    SystrayItemUpdated(SystrayItem),
    SystrayItemRemoved(SystrayItemRemoved),
    BrightnessChanged(Brightness),
    Hud(Hud),
    ExecRequested(ExecRequest),
    AudioSinkVolumeAdjustRequested(VolumeAdjustRequest),
    AudioSinkMuteToggleRequested(MuteToggleRequest),
    AudioSourceVolumeAdjustRequested(VolumeAdjustRequest),
    AudioSourceMuteToggleRequested(MuteToggleRequest),
    BrightnessAdjustRequested(BrightnessAdjustRequest),
}

impl EventKind {
    /// Request-for-action kinds. These terminate at another integration and
    /// are never delivered to panels.
    pub fn is_command(self) -> bool {
        matches!(
            self,
            EventKind::ExecRequested
                | EventKind::AudioSinkVolumeAdjustRequested
                | EventKind::AudioSinkMuteToggleRequested
                | EventKind::AudioSourceVolumeAdjustRequested
                | EventKind::AudioSourceMuteToggleRequested
                | EventKind::BrightnessAdjustRequested
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A payload type that can be read out of an [`Event`].
pub trait Payload: Sized {
    /// Type name used in mismatch errors.
    const NAME: &'static str;

    fn extract(payload: &EventPayload) -> Option<&Self>;
}

macro_rules! payload {
    ($ty:ident => $($kind:ident),+) => {
        impl Payload for $ty {
            const NAME: &'static str = stringify!($ty);

            fn extract(payload: &EventPayload) -> Option<&Self> {
                match payload {
                    $(EventPayload::$kind(p) => Some(p),)+
                    _ => None,
                }
            }
        }
    };
}

payload!(WorkspaceChange => WorkspaceChanged);
payload!(ActiveWindow => ActiveWindowChanged);
payload!(MonitorChange => MonitorAdded, MonitorRemoved);
payload!(AudioDevice => AudioSinkChanged, AudioSourceChanged);
payload!(AudioDeviceRemoved => AudioSinkRemoved, AudioSourceRemoved);
payload!(Notification => NotificationPosted);
payload!(NotificationClosed => NotificationClosed);
payload!(SystrayItem => SystrayItemUpdated);
payload!(SystrayItemRemoved => SystrayItemRemoved);
payload!(Brightness => BrightnessChanged);
payload!(Hud => Hud);
payload!(ExecRequest => ExecRequested);
payload!(VolumeAdjustRequest => AudioSinkVolumeAdjustRequested, AudioSourceVolumeAdjustRequested);
payload!(MuteToggleRequest => AudioSinkMuteToggleRequested, AudioSourceMuteToggleRequested);
payload!(BrightnessAdjustRequest => BrightnessAdjustRequested);

/// Immutable event envelope. Share it as `Arc<Event>` across receivers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent")]
pub struct Event {
    kind: EventKind,
    payload: EventPayload,
}

#[derive(Deserialize)]
struct WireEvent {
    kind: EventKind,
    payload: EventPayload,
}

impl TryFrom<WireEvent> for Event {
    type Error = EventError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let actual = wire.payload.kind();
        if actual != wire.kind {
            return Err(EventError::KindMismatch {
                tagged: wire.kind,
                actual,
            });
        }
        Ok(Event {
            kind: wire.kind,
            payload: wire.payload,
        })
    }
}

impl Event {
    /// Build an event; the kind always follows the payload.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            kind: payload.kind(),
            payload,
        }
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[inline]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Read the payload as `P`. Asking for a type that does not belong to
    /// this event's kind is an error, never a default value.
    pub fn decode<P: Payload>(&self) -> Result<&P, EventError> {
        P::extract(&self.payload).ok_or(EventError::PayloadMismatch {
            expected: P::NAME,
            found: self.kind,
        })
    }

    pub fn to_wire(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_wire(s: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn workspace(name: &str) -> Event {
        Event::new(EventPayload::WorkspaceChanged(WorkspaceChange {
            id: 2,
            name: name.to_string(),
            monitor: "DP-1".to_string(),
        }))
    }

    #[test]
    fn kind_follows_payload() {
        assert_eq!(workspace("2").kind(), EventKind::WorkspaceChanged);
    }

    #[test]
    fn decode_matching_payload() {
        let event = workspace("2");
        let ws = event.decode::<WorkspaceChange>().unwrap();
        assert_eq!(ws.name, "2");
    }

    #[test]
    fn decode_wrong_payload_fails() {
        let event = workspace("2");
        let err = event.decode::<AudioDevice>().unwrap_err();
        assert!(matches!(
            err,
            EventError::PayloadMismatch {
                expected: "AudioDevice",
                found: EventKind::WorkspaceChanged
            }
        ));
    }

    #[test]
    fn shared_payload_type_decodes_for_both_kinds() {
        let device = AudioDevice {
            id: "mic".to_string(),
            ..Default::default()
        };
        let sink = Event::new(EventPayload::AudioSinkChanged(device.clone()));
        let source = Event::new(EventPayload::AudioSourceChanged(device));
        assert!(sink.decode::<AudioDevice>().is_ok());
        assert!(source.decode::<AudioDevice>().is_ok());
    }

    #[test]
    fn wire_round_trip_keeps_kind() {
        let event = workspace("3");
        let decoded = Event::from_wire(&event.to_wire().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn wire_rejects_kind_payload_disagreement() {
        let wire = r#"{"kind":"Hud","payload":{"MonitorAdded":{"name":"HDMI-A-1"}}}"#;
        let err = Event::from_wire(wire).unwrap_err();
        assert!(err.to_string().contains("kind mismatch"));
    }

    #[test]
    fn command_kinds() {
        assert!(EventKind::ExecRequested.is_command());
        assert!(EventKind::BrightnessAdjustRequested.is_command());
        assert!(!EventKind::BrightnessChanged.is_command());
        assert!(!EventKind::Hud.is_command());
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Filter preset applied to a whole bus.
///
/// Unknown names map to [`Effect::Normal`] so callers can pass free-form strings
/// from game scripts without checking them first.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Low-pass fully open; effectively transparent.
    #[default]
    Normal,
    /// Low-pass around 600 Hz (dampened / underwater).
    Muffled,
    /// Band-pass around 2 kHz (radio / telephone).
    Radio,
}

impl Effect {
    /// Every known effect, in declaration order.
    pub const ALL: [Effect; 3] = [Effect::Normal, Effect::Muffled, Effect::Radio];

    /// Stable lowercase name used in logs and persisted snapshots.
    pub fn name(self) -> &'static str {
        match self {
            Effect::Normal => "normal",
            Effect::Muffled => "muffled",
            Effect::Radio => "radio",
        }
    }

    /// Parse an effect name (case-insensitive), falling back to `Normal`.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|effect| effect.name().eq_ignore_ascii_case(name))
            .unwrap_or(Effect::Normal)
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for Effect {
    fn from(name: &str) -> Self {
        Effect::from_name(name)
    }
}

/// Run state of the output context.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    /// Output is open but not pulling audio; the clock does not advance.
    #[default]
    Suspended,
    /// Output is pulling audio.
    Running,
    /// Output has been torn down.
    Closed,
}

/// Autoplay unlock progress.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnlockState {
    /// Waiting for a user gesture; gesture listeners are armed.
    #[default]
    Locked,
    /// A gesture arrived and the context is being resumed.
    Unlocking,
    /// The context resumed; listeners were torn down.
    Unlocked,
}

/// Reason why a playback instance left the active set.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The buffer played to its end (or reached a scheduled stop time).
    Ended,
    /// The instance was stopped explicitly.
    Stopped,
}

/// Per-bus mixing state.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BusStatus {
    /// Bus name (`sfx`, `music`, or a custom bus).
    pub name: String,
    /// Stored volume preference for this bus.
    pub volume: f32,
    /// Current bus gain as rendered.
    pub gain: f32,
    /// Active effect preset.
    pub effect: Effect,
    /// Playback-rate multiplier applied to new instances on this bus.
    pub playback_rate: f32,
}

/// One sound in flight.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceStatus {
    /// Opaque instance handle.
    pub id: u64,
    /// Logical buffer key.
    pub key: String,
    /// Owning bus.
    pub bus: String,
    /// Whether the instance loops.
    pub looping: bool,
    /// Current per-instance gain.
    pub gain: f32,
    /// Current playback rate.
    pub playback_rate: f32,
    /// Whether a spatial follow task is attached.
    pub following: bool,
}

/// Engine snapshot for debug overlays and host UIs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineStatus {
    /// `true` once the output context exists.
    pub initialized: bool,
    /// Output context state.
    pub context_state: ContextState,
    /// Autoplay unlock state.
    pub unlock_state: UnlockState,
    /// Context sample rate (Hz).
    pub sample_rate: Option<u32>,
    /// Context clock in seconds.
    pub current_time: f64,
    /// Master volume preference.
    pub master_volume: f32,
    /// Bus states, ordered by creation.
    pub buses: Vec<BusStatus>,
    /// Active instances, ordered by id.
    pub instances: Vec<InstanceStatus>,
    /// Handle of the instance designated as current music.
    pub current_music: Option<u64>,
    /// Keys of loaded buffers, sorted.
    pub loaded: Vec<String>,
}

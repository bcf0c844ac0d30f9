//! Real-time game audio engine.
//!
//! Buffers are decoded once and cached by key; sounds play as instances routed
//! through named buses (`sfx`, `music`, custom) into a master gain. Every gain,
//! playback rate and filter frequency is an automatable [`param::AudioParam`]
//! evaluated by the [`mixer::Mixer`] on the output thread.
//!
//! The usual entry point is [`AudioEngine`], built with an
//! [`backend::OutputBackend`] and a [`prefs::PreferenceStore`].

pub mod analyser;
pub mod backend;
pub mod buffer;
pub mod config;
pub mod decode;
pub mod device;
pub mod engine;
pub mod filter;
pub mod frame;
pub mod mixer;
pub mod param;
pub mod prefs;
pub mod resample;
pub mod spatial;
pub mod unlock;

pub use backend::{CpalBackend, OfflineBackend, OfflineDriver, OutputBackend, OutputInfo};
pub use buffer::AudioBuffer;
pub use config::EngineConfig;
pub use engine::{
    AudioEngine, FadeTarget, MASTER, MUSIC_BUS, MusicOptions, PendingLoad, PlayOptions,
    PlaybackInstance, SFX_BUS,
};
pub use mixer::InstanceId;
pub use orka_audio_types::{ContextState, Effect, EndReason, EngineStatus, UnlockState};
pub use prefs::{FileStore, MemoryStore, PreferenceStore};
pub use spatial::{Point, PositionFn, PositionSource};
pub use unlock::Gesture;

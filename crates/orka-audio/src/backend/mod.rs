//! Output backends that pull samples from the shared mixer.
//!
//! - [`CpalBackend`] renders into a real device stream.
//! - [`OfflineBackend`] renders on demand through an [`OfflineDriver`], with an
//!   optional autoplay policy that keeps it suspended until a user activation.

mod offline;
mod stream;

pub use offline::{OfflineBackend, OfflineDriver};
pub use stream::CpalBackend;

use anyhow::Result;
use orka_audio_types::ContextState;

use crate::mixer::SharedMixer;

/// Format negotiated with the output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputInfo {
    pub sample_rate: u32,
    pub channels: usize,
    pub device: Option<String>,
}

/// Destination for mixed audio.
///
/// Lifecycle: `open` once, `connect` the mixer, then `resume`/`suspend` freely.
/// A backend starts out suspended after `connect`.
pub trait OutputBackend {
    /// Acquire the output and report its format.
    fn open(&mut self) -> Result<OutputInfo>;

    /// Attach the mixer that the backend renders from.
    fn connect(&mut self, mixer: SharedMixer) -> Result<()>;

    /// Start (or continue) pulling audio. May be refused, e.g. by an autoplay policy.
    fn resume(&mut self) -> Result<()>;

    fn suspend(&mut self) -> Result<()>;

    fn state(&self) -> ContextState;
}

//! Autoplay unlock state machine.
//!
//! ```text
//! Locked ──gesture──▶ Unlocking ──resume ok──▶ Unlocked
//!    ▲                    │
//!    └────resume failed───┘
//! ```
//!
//! Gesture listeners are armed only while `Locked` and are torn down exactly
//! once, on entering `Unlocked`.

use anyhow::Result;
use orka_audio_types::UnlockState;

/// User interaction that may unlock audio output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gesture {
    Click,
    Touch,
    Key,
}

#[derive(Debug, Default)]
pub struct Unlock {
    state: UnlockState,
    listeners_armed: bool,
    teardowns: u32,
}

impl Unlock {
    /// State after the first resume attempt at init.
    pub fn after_init(resumed: bool) -> Self {
        if resumed {
            Self {
                state: UnlockState::Unlocked,
                listeners_armed: false,
                teardowns: 0,
            }
        } else {
            Self {
                state: UnlockState::Locked,
                listeners_armed: true,
                teardowns: 0,
            }
        }
    }

    pub fn state(&self) -> UnlockState {
        self.state
    }

    pub fn listeners_armed(&self) -> bool {
        self.listeners_armed
    }

    /// How many times listeners were torn down (0 or 1).
    pub fn teardowns(&self) -> u32 {
        self.teardowns
    }

    /// Feed a gesture; `resume` is only invoked while `Locked`.
    ///
    /// Returns `true` when this gesture completed the unlock.
    pub fn on_gesture(&mut self, gesture: Gesture, resume: impl FnOnce() -> Result<()>) -> bool {
        if self.state != UnlockState::Locked || !self.listeners_armed {
            return false;
        }
        self.state = UnlockState::Unlocking;
        match resume() {
            Ok(()) => {
                self.state = UnlockState::Unlocked;
                self.listeners_armed = false;
                self.teardowns += 1;
                tracing::info!(?gesture, "audio unlocked");
                true
            }
            Err(e) => {
                self.state = UnlockState::Locked;
                tracing::debug!(?gesture, "resume after gesture failed: {e:#}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn resumed_at_init_needs_no_listeners() {
        let unlock = Unlock::after_init(true);
        assert_eq!(unlock.state(), UnlockState::Unlocked);
        assert!(!unlock.listeners_armed());
    }

    #[test]
    fn first_successful_gesture_unlocks_once() {
        let mut unlock = Unlock::after_init(false);
        assert_eq!(unlock.state(), UnlockState::Locked);
        assert!(unlock.listeners_armed());

        assert!(unlock.on_gesture(Gesture::Click, || Ok(())));
        assert_eq!(unlock.state(), UnlockState::Unlocked);
        assert!(!unlock.listeners_armed());

        let mut called = false;
        assert!(!unlock.on_gesture(Gesture::Touch, || {
            called = true;
            Ok(())
        }));
        assert!(!called);
        assert_eq!(unlock.teardowns(), 1);
    }

    #[test]
    fn failed_resume_returns_to_locked() {
        let mut unlock = Unlock::after_init(false);
        assert!(!unlock.on_gesture(Gesture::Touch, || Err(anyhow!("blocked"))));
        assert_eq!(unlock.state(), UnlockState::Locked);
        assert!(unlock.listeners_armed());
        assert!(unlock.on_gesture(Gesture::Click, || Ok(())));
        assert_eq!(unlock.teardowns(), 1);
    }
}

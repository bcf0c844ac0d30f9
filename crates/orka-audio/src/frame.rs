//! Per-frame tasks.
//!
//! The host drives [`crate::AudioEngine::tick`] from its display refresh; every
//! scheduled task runs once per tick until it is cancelled. Cancelling through a
//! [`TaskHandle`] is the only way a task stops.

use std::collections::BTreeMap;

use crate::mixer::Mixer;

/// Work run once per display frame with the locked mixer and the context time.
pub type FrameTask = Box<dyn FnMut(&mut Mixer, f64) + Send>;

/// Handle used to cancel a scheduled task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

#[derive(Default)]
pub struct FrameScheduler {
    next: u64,
    tasks: BTreeMap<u64, FrameTask>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, task: FrameTask) -> TaskHandle {
        self.next += 1;
        self.tasks.insert(self.next, task);
        TaskHandle(self.next)
    }

    /// Remove a task. Returns `false` if it was already gone.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        self.tasks.remove(&handle.0).is_some()
    }

    pub fn is_scheduled(&self, handle: TaskHandle) -> bool {
        self.tasks.contains_key(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every task in scheduling order.
    pub fn run(&mut self, mixer: &mut Mixer, now: f64) {
        for task in self.tasks.values_mut() {
            task(mixer, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::MixerSpec;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mixer() -> Mixer {
        let (tx, _rx) = crossbeam_channel::unbounded();
        Mixer::new(
            MixerSpec {
                sample_rate: 8_000,
                channels: 1,
                quantum: 64,
                fft_size: 64,
                smoothing: 0.0,
            },
            tx,
        )
    }

    #[test]
    fn tasks_run_every_frame_until_cancelled() {
        let mut sched = FrameScheduler::new();
        let mut m = mixer();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handle = sched.schedule(Box::new(move |_, _| {
            seen.fetch_add(1, Ordering::Relaxed);
        }));

        sched.run(&mut m, 0.0);
        sched.run(&mut m, 0.016);
        assert_eq!(count.load(Ordering::Relaxed), 2);

        assert!(sched.cancel(handle));
        assert!(!sched.cancel(handle));
        sched.run(&mut m, 0.033);
        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert!(sched.is_empty());
    }

    #[test]
    fn handles_are_unique() {
        let mut sched = FrameScheduler::new();
        let a = sched.schedule(Box::new(|_, _| {}));
        let b = sched.schedule(Box::new(|_, _| {}));
        assert_ne!(a, b);
        assert!(sched.is_scheduled(a));
        sched.cancel(a);
        assert!(!sched.is_scheduled(a));
        assert!(sched.is_scheduled(b));
        assert_eq!(sched.len(), 1);
    }
}

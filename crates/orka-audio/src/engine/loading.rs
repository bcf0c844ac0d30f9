//! Buffer loading.
//!
//! `load`/`load_all` decode on the caller's thread and return once the buffer
//! is stored. `load_async`/`load_all_async` hand the fetch, decode and resample
//! to a worker thread; the worker sends the finished buffer back over a channel
//! and [`AudioEngine::tick`] stores it, so the game loop keeps running while an
//! asset is in flight.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::AudioEngine;
use crate::buffer::AudioBuffer;
use crate::decode;
use crate::resample::resample_buffer;

/// Worker output waiting to be stored by the engine.
pub(super) struct FinishedLoad {
    key: String,
    path: String,
    result: Result<AudioBuffer>,
    reply: Sender<bool>,
}

/// Handle to a background load, resolved once a `tick` stores the buffer.
#[derive(Debug)]
pub struct PendingLoad {
    key: String,
    rx: Receiver<bool>,
    result: Option<bool>,
}

impl PendingLoad {
    fn resolved(key: &str, ok: bool) -> Self {
        let (_tx, rx) = crossbeam_channel::bounded(1);
        Self {
            key: key.to_string(),
            rx,
            result: Some(ok),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `Some(success)` once the load is settled, `None` while it is in flight.
    ///
    /// A worker that dies or an engine that is dropped settles as a failure.
    pub fn poll(&mut self) -> Option<bool> {
        if self.result.is_none() {
            match self.rx.try_recv() {
                Ok(ok) => self.result = Some(ok),
                Err(TryRecvError::Disconnected) => self.result = Some(false),
                Err(TryRecvError::Empty) => {}
            }
        }
        self.result
    }

    pub fn is_pending(&mut self) -> bool {
        self.poll().is_none()
    }
}

impl AudioEngine {
    /// Fetch, decode and store `path` under `key`. Self-initializes.
    ///
    /// Returns `false` (and logs) on any fetch or decode failure.
    pub fn load(&mut self, key: &str, path: &str) -> bool {
        self.ensure_init();
        let result = prepare_buffer(path, self.sample_rate());
        self.finish_load(key, path, result)
    }

    /// Load every `(key, path)` pair concurrently; individual failures do not
    /// affect the others. Returns the success flag per key.
    pub fn load_all<I, K, P>(&mut self, assets: I) -> BTreeMap<String, bool>
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<String>,
    {
        self.ensure_init();
        let rate = self.sample_rate();
        let assets: Vec<(String, String)> = assets
            .into_iter()
            .map(|(k, p)| (k.into(), p.into()))
            .collect();

        let decoded: Vec<(String, String, Result<AudioBuffer>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = assets
                .into_iter()
                .map(|(key, path)| {
                    scope.spawn(move || {
                        let result = prepare_buffer(&path, rate);
                        (key, path, result)
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|h| match h.join() {
                    Ok(done) => Some(done),
                    Err(_) => {
                        tracing::warn!("loader thread panicked");
                        None
                    }
                })
                .collect()
        });

        let mut results = BTreeMap::new();
        for (key, path, result) in decoded {
            let ok = self.finish_load(&key, &path, result);
            results.insert(key, ok);
        }
        results
    }

    /// Start loading `path` under `key` on a worker thread and return at once.
    ///
    /// The buffer becomes playable on the first `tick` (or `poll_loads`) after
    /// the worker finishes. Self-initializes.
    pub fn load_async(&mut self, key: &str, path: &str) -> PendingLoad {
        self.ensure_init();
        let rate = self.sample_rate();
        let (reply, rx) = crossbeam_channel::bounded(1);
        let tx = self.loaded_tx.clone();
        let job_key = key.to_string();
        let job_path = path.to_string();

        let spawned = std::thread::Builder::new()
            .name("orka-loader".to_string())
            .spawn(move || {
                let result = prepare_buffer(&job_path, rate);
                let _ = tx.send(FinishedLoad {
                    key: job_key,
                    path: job_path,
                    result,
                    reply,
                });
            });
        if let Err(e) = spawned {
            tracing::warn!(key, path, "failed to start loader thread: {e}");
            return PendingLoad::resolved(key, false);
        }
        tracing::debug!(key, path, "background load started");
        PendingLoad {
            key: key.to_string(),
            rx,
            result: None,
        }
    }

    /// [`AudioEngine::load_async`] for every `(key, path)` pair.
    pub fn load_all_async<I, K, P>(&mut self, assets: I) -> Vec<PendingLoad>
    where
        I: IntoIterator<Item = (K, P)>,
        K: AsRef<str>,
        P: AsRef<str>,
    {
        assets
            .into_iter()
            .map(|(key, path)| self.load_async(key.as_ref(), path.as_ref()))
            .collect()
    }

    /// Store buffers whose background load has finished. Returns the success
    /// flag per key settled by this call.
    pub fn poll_loads(&mut self) -> BTreeMap<String, bool> {
        let finished: Vec<FinishedLoad> = self.loaded_rx.try_iter().collect();
        let mut settled = BTreeMap::new();
        for done in finished {
            let ok = self.finish_load(&done.key, &done.path, done.result);
            let _ = done.reply.send(ok);
            settled.insert(done.key, ok);
        }
        settled
    }

    /// Register an already-decoded buffer, resampling it to the context rate.
    pub fn insert_buffer(&mut self, key: &str, buffer: AudioBuffer) -> bool {
        let buffer = match self.sample_rate() {
            Some(rate) => match resample_buffer(&buffer, rate) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(key, "resample failed: {e:#}");
                    return false;
                }
            },
            None => buffer,
        };
        self.store_buffer(key, buffer);
        true
    }

    fn finish_load(&mut self, key: &str, path: &str, result: Result<AudioBuffer>) -> bool {
        match result {
            Ok(buffer) => {
                self.store_buffer(key, buffer);
                true
            }
            Err(e) => {
                tracing::warn!(key, path, "load failed: {e:#}");
                false
            }
        }
    }

    fn store_buffer(&mut self, key: &str, buffer: AudioBuffer) {
        tracing::info!(
            key,
            frames = buffer.frames(),
            channels = buffer.channels(),
            rate = buffer.sample_rate(),
            "buffer loaded"
        );
        self.buffers.insert(key, buffer);
    }
}

/// Decode `path` and bring it to the context rate when one is known.
fn prepare_buffer(path: &str, rate: Option<u32>) -> Result<AudioBuffer> {
    let buffer = decode::load_buffer(path)?;
    match rate {
        Some(rate) => resample_buffer(&buffer, rate).with_context(|| format!("resample {path}")),
        None => Ok(buffer),
    }
}

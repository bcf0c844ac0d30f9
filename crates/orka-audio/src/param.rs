//! Automatable parameters.
//!
//! An [`AudioParam`] is a base value plus a time-ordered list of automation
//! events. The mixer evaluates it at the context time of every frame, so the
//! control side only ever schedules events and never touches samples.
//!
//! Automation that replaces an in-flight curve must follow the
//! cancel → anchor → ramp order; [`AudioParam::cancel_and_hold_at_time`] does
//! the first two steps in one call.

/// Values closer than this to their target are treated as converged.
const CONVERGED_EPSILON: f32 = 1e-4;

/// One scheduled automation step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamEvent {
    /// Jump to `value` at `time`.
    SetValue { time: f64, value: f32 },
    /// Reach `value` at `time`, moving linearly from the previous event.
    LinearRamp { time: f64, value: f32 },
    /// From `time` on, approach `target` exponentially with `time_constant`.
    SetTarget {
        time: f64,
        target: f32,
        time_constant: f64,
    },
}

impl ParamEvent {
    pub fn time(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { time, .. }
            | ParamEvent::LinearRamp { time, .. }
            | ParamEvent::SetTarget { time, .. } => time,
        }
    }
}

/// Active exponential approach while walking the event list.
#[derive(Clone, Copy)]
struct TargetCurve {
    start: f64,
    from: f32,
    target: f32,
    time_constant: f64,
}

impl TargetCurve {
    fn eval(&self, t: f64) -> f32 {
        if t <= self.start {
            return self.from;
        }
        let decay = (-(t - self.start) / self.time_constant).exp() as f32;
        self.target + (self.from - self.target) * decay
    }
}

/// Automatable value evaluated against the context clock.
#[derive(Clone, Debug)]
pub struct AudioParam {
    value: f32,
    events: Vec<ParamEvent>,
}

impl AudioParam {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            events: Vec::new(),
        }
    }

    /// Set the value immediately, dropping all automation.
    pub fn set_value(&mut self, value: f32) {
        self.value = value;
        self.events.clear();
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent::SetValue { time, value });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent::LinearRamp { time, value });
    }

    /// Exponentially approach `target` starting at `time`.
    ///
    /// A non-positive `time_constant` degrades to an immediate jump.
    pub fn set_target_at_time(&mut self, target: f32, time: f64, time_constant: f64) {
        if time_constant > 0.0 {
            self.insert(ParamEvent::SetTarget {
                time,
                target,
                time_constant,
            });
        } else {
            self.set_value_at_time(target, time);
        }
    }

    /// Drop every event scheduled at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|ev| ev.time() < time);
    }

    /// Freeze the current value at `time`: evaluate, cancel, then anchor.
    pub fn cancel_and_hold_at_time(&mut self, time: f64) -> f32 {
        let held = self.value_at(time);
        self.cancel_scheduled_values(time);
        self.set_value_at_time(held, time);
        held
    }

    /// Value at context time `t`.
    pub fn value_at(&self, t: f64) -> f32 {
        evaluate(&self.events, self.value, t)
    }

    /// Number of pending events (history included until pruned).
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Collapse history that can no longer influence values at or after `now`.
    pub fn prune(&mut self, now: f64) {
        let Some(k) = self.events.iter().rposition(|ev| ev.time() <= now) else {
            return;
        };
        let is_last = k + 1 == self.events.len();
        match self.events[k] {
            ParamEvent::SetValue { value, .. } | ParamEvent::LinearRamp { value, .. } => {
                if is_last {
                    self.set_value(value);
                } else {
                    self.events.drain(..k);
                }
            }
            ParamEvent::SetTarget { time, target, .. } => {
                if is_last && (self.value_at(now) - target).abs() < CONVERGED_EPSILON {
                    self.set_value(target);
                } else if k > 0 {
                    let from = evaluate(&self.events[..k], self.value, time);
                    self.events.drain(..k);
                    self.events.insert(0, ParamEvent::SetValue { time, value: from });
                }
            }
        }
    }

    fn insert(&mut self, event: ParamEvent) {
        // Equal times keep insertion order.
        let at = self
            .events
            .iter()
            .position(|ev| ev.time() > event.time())
            .unwrap_or(self.events.len());
        self.events.insert(at, event);
    }
}

fn evaluate(events: &[ParamEvent], base: f32, t: f64) -> f32 {
    let mut value = base;
    let mut prev_time = 0.0f64;
    let mut curve: Option<TargetCurve> = None;

    for ev in events {
        let time = ev.time();
        if time > t {
            if let ParamEvent::LinearRamp { time, value: end } = *ev {
                let span = time - prev_time;
                if span <= 0.0 {
                    return end;
                }
                let frac = ((t - prev_time) / span).clamp(0.0, 1.0) as f32;
                return value + (end - value) * frac;
            }
            break;
        }
        if let Some(c) = curve.take() {
            value = c.eval(time);
        }
        match *ev {
            ParamEvent::SetValue { value: v, .. } | ParamEvent::LinearRamp { value: v, .. } => {
                value = v;
            }
            ParamEvent::SetTarget {
                target,
                time_constant,
                ..
            } => {
                curve = Some(TargetCurve {
                    start: time,
                    from: value,
                    target,
                    time_constant,
                });
            }
        }
        prev_time = time;
    }

    match curve {
        Some(c) => c.eval(t),
        None => value,
    }
}

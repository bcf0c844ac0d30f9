//! Distance attenuation for sounds that follow a moving source.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::frame::FrameTask;
use crate::mixer::InstanceId;

/// 2D position in game units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Externally owned position read once per frame.
pub trait PositionSource: Send {
    fn position(&self) -> Point;
}

impl PositionSource for Arc<Mutex<Point>> {
    fn position(&self) -> Point {
        *self.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PositionSource for Arc<RwLock<Point>> {
    fn position(&self) -> Point {
        *self.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A position that never moves (e.g. a fixed listener).
impl PositionSource for Point {
    fn position(&self) -> Point {
        *self
    }
}

/// Adapter for positions computed by a closure.
pub struct PositionFn<F>(pub F);

impl<F> PositionSource for PositionFn<F>
where
    F: Fn() -> Point + Send,
{
    fn position(&self) -> Point {
        (self.0)()
    }
}

pub fn distance(a: Point, b: Point) -> f32 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Linear falloff: 1 at distance 0, 0 at `max_distance` and beyond.
pub fn attenuation(distance: f32, max_distance: f32) -> f32 {
    if !(max_distance > 0.0) {
        return if distance <= 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - distance / max_distance).clamp(0.0, 1.0)
}

/// Frame task that drives `id`'s attenuation from the distance between two
/// positions. Fades on the voice's gain are left alone.
pub(crate) fn follow_task(
    id: InstanceId,
    source: Box<dyn PositionSource>,
    listener: Box<dyn PositionSource>,
    max_distance: f32,
    time_constant: f64,
) -> FrameTask {
    Box::new(move |mixer, now| {
        let volume = attenuation(
            distance(source.position(), listener.position()),
            max_distance,
        );
        if let Some(voice) = mixer.voice_mut(id) {
            voice.attenuation.cancel_and_hold_at_time(now);
            voice.attenuation.set_target_at_time(volume, now, time_constant);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        assert!((distance(Point::new(0.0, 0.0), Point::new(3.0, 4.0)) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn attenuation_is_linear_and_clamped() {
        assert_eq!(attenuation(0.0, 100.0), 1.0);
        assert!((attenuation(25.0, 100.0) - 0.75).abs() < 1e-6);
        assert_eq!(attenuation(100.0, 100.0), 0.0);
        assert_eq!(attenuation(250.0, 100.0), 0.0);
    }

    #[test]
    fn attenuation_with_zero_range_is_binary() {
        assert_eq!(attenuation(0.0, 0.0), 1.0);
        assert_eq!(attenuation(0.1, 0.0), 0.0);
    }

    #[test]
    fn shared_positions_are_read_live() {
        let p = Arc::new(Mutex::new(Point::new(1.0, 2.0)));
        let src: Box<dyn PositionSource> = Box::new(p.clone());
        *p.lock().unwrap() = Point::new(5.0, 6.0);
        assert_eq!(src.position(), Point::new(5.0, 6.0));

        let closure: Box<dyn PositionSource> = Box::new(PositionFn(|| Point::new(9.0, 9.0)));
        assert_eq!(closure.position(), Point::new(9.0, 9.0));

        let fixed: Box<dyn PositionSource> = Box::new(Point::new(1.0, 1.0));
        assert_eq!(fixed.position(), Point::new(1.0, 1.0));
    }
}

//! Linear volume ramp.
//!
//! A [`Ramp`] is a pure description of a fade leg: given a clock reading it
//! reports the volume the leg should be at, leaving all side effects to the
//! [`engine`](crate::engine) tick that samples it. Working off `Instant`
//! rather than counting ticks keeps fades wall-clock accurate even when the
//! tick interval drifts under load.

use std::time::Duration;

use tokio::time::Instant;

/// One fade leg from a start volume to a target volume.
#[derive(Clone, Copy, Debug)]
pub struct Ramp {
    start: Instant,
    from: f32,
    to: f32,
    duration: Duration,
}

impl Ramp {
    #[must_use]
    pub fn new(start: Instant, from: f32, to: f32, duration: Duration) -> Self {
        Self {
            start,
            from: from.clamp(0.0, 1.0),
            to: to.clamp(0.0, 1.0),
            duration,
        }
    }

    /// Target volume once the ramp completes.
    #[must_use]
    pub fn target(&self) -> f32 {
        self.to
    }

    /// Samples the ramp at `now`.
    ///
    /// Returns the interpolated volume and whether the ramp has run to
    /// completion. Before `start` the ramp holds its starting volume; a
    /// zero-duration ramp is complete immediately.
    #[must_use]
    pub fn value_at(&self, now: Instant) -> (f32, bool) {
        if self.duration.is_zero() {
            return (self.to, true);
        }

        let elapsed = now.saturating_duration_since(self.start);
        if elapsed >= self.duration {
            return (self.to, true);
        }

        #[expect(clippy::cast_possible_truncation)]
        let progress = (elapsed.as_secs_f64() / self.duration.as_secs_f64()) as f32;
        (self.from + (self.to - self.from) * progress, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FADE: Duration = Duration::from_millis(900);

    #[tokio::test(start_paused = true)]
    async fn interpolates_linearly() {
        let start = Instant::now();
        let ramp = Ramp::new(start, 0.0, 1.0, FADE);

        let (volume, done) = ramp.value_at(start);
        assert!(volume.abs() < f32::EPSILON);
        assert!(!done);

        let (volume, done) = ramp.value_at(start + FADE / 2);
        assert!((volume - 0.5).abs() < 0.01);
        assert!(!done);

        let (volume, done) = ramp.value_at(start + FADE);
        assert!((volume - 1.0).abs() < f32::EPSILON);
        assert!(done);
    }

    #[tokio::test(start_paused = true)]
    async fn descending_ramp_reaches_silence() {
        let start = Instant::now();
        let ramp = Ramp::new(start, 1.0, 0.0, FADE);

        let (volume, _) = ramp.value_at(start + FADE / 3);
        assert!((volume - (2.0 / 3.0)).abs() < 0.01);

        let (volume, done) = ramp.value_at(start + FADE * 2);
        assert!(volume.abs() < f32::EPSILON);
        assert!(done);
    }

    #[tokio::test(start_paused = true)]
    async fn holds_before_start_and_clamps_inputs() {
        let start = Instant::now() + Duration::from_secs(1);
        let ramp = Ramp::new(start, 2.0, -1.0, FADE);

        // Out-of-range endpoints are clamped to the unit interval.
        let (volume, done) = ramp.value_at(Instant::now());
        assert!((volume - 1.0).abs() < f32::EPSILON);
        assert!(!done);
        assert!(ramp.target().abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_completes_immediately() {
        let start = Instant::now();
        let ramp = Ramp::new(start, 0.0, 1.0, Duration::ZERO);
        assert_eq!(ramp.value_at(start), (1.0, true));
    }
}

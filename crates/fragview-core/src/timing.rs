// SPDX-License-Identifier: CEPL-1.0
//! Frame timing and the frame-rate limiter.
//!
//! Both types take `now` as an argument instead of reading the clock
//! themselves, so the render loop decides what "now" is for a frame.

use std::time::{Duration, Instant};

/// Wall-clock state fed to the shader every frame.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    elapsed: f32,
    delta: f32,
    frame: u32,
    paused: bool,
}

impl FrameClock {
    pub fn new(now: Instant, paused: bool) -> Self {
        Self {
            last: now,
            elapsed: 0.0,
            delta: 0.0,
            frame: 0,
            paused,
        }
    }

    /// Advances elapsed/delta to `now`. While paused the interval is
    /// swallowed, so resuming does not produce a jump.
    pub fn tick(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;
        if self.paused {
            self.delta = 0.0;
            return;
        }
        self.delta = dt;
        self.elapsed += dt;
    }

    pub fn advance_frame(&mut self) {
        self.frame = self.frame.wrapping_add(1);
    }

    /// Returns the new pause state.
    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed
    }

    pub fn delta_secs(&self) -> f32 {
        self.delta
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Draw now.
    Ready,
    /// Too early; sleep until the deadline.
    WaitUntil(Instant),
}

/// Caps the draw rate to a target budget.
///
/// Deadlines are chained from the previous pacing point rather than from
/// when the frame started. If the loop falls more than one budget behind,
/// the chain restarts from `now` instead of bursting to catch up.
#[derive(Debug, Clone)]
pub struct FramePacer {
    budget: Option<Duration>,
    deadline: Option<Instant>,
}

impl FramePacer {
    /// `fps <= 0` (or not finite) means unlimited.
    pub fn from_fps(fps: f32) -> Self {
        let budget = (fps.is_finite() && fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps as f64));
        Self {
            budget,
            deadline: None,
        }
    }

    pub fn poll(&mut self, now: Instant) -> Pace {
        let Some(budget) = self.budget else {
            return Pace::Ready;
        };

        match self.deadline {
            Some(deadline) if now < deadline => Pace::WaitUntil(deadline),
            Some(deadline) => {
                let next = deadline + budget;
                self.deadline = Some(if next <= now { now + budget } else { next });
                Pace::Ready
            }
            None => {
                self.deadline = Some(now + budget);
                Pace::Ready
            }
        }
    }

    /// Forget the current deadline, e.g. after the window was minimised.
    pub fn reset(&mut self) {
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn clock_accumulates_elapsed_and_delta() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(t0, false);

        clock.tick(t0 + ms(16));
        assert!((clock.delta_secs() - 0.016).abs() < 1e-4);

        clock.tick(t0 + ms(48));
        assert!((clock.delta_secs() - 0.032).abs() < 1e-4);
        assert!((clock.elapsed_secs() - 0.048).abs() < 1e-4);
    }

    #[test]
    fn paused_clock_does_not_advance_and_resumes_without_jump() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(t0, false);
        clock.tick(t0 + ms(100));

        assert!(clock.toggle_pause());
        clock.tick(t0 + ms(1100));
        assert_eq!(clock.delta_secs(), 0.0);
        assert!((clock.elapsed_secs() - 0.1).abs() < 1e-4);

        assert!(!clock.toggle_pause());
        clock.tick(t0 + ms(1110));
        assert!((clock.delta_secs() - 0.010).abs() < 1e-4);
        assert!((clock.elapsed_secs() - 0.110).abs() < 1e-4);
    }

    #[test]
    fn frame_counter_is_independent_of_pause() {
        let mut clock = FrameClock::new(Instant::now(), true);
        clock.advance_frame();
        clock.advance_frame();
        assert_eq!(clock.frame(), 2);
        assert!(!clock.toggle_pause());
    }

    #[test]
    fn unlimited_pacer_is_always_ready() {
        for fps in [0.0, -5.0, f32::NAN, f32::INFINITY] {
            let mut pacer = FramePacer::from_fps(fps);
            let now = Instant::now();
            assert_eq!(pacer.poll(now), Pace::Ready);
            assert_eq!(pacer.poll(now), Pace::Ready);
        }
    }

    #[test]
    fn pacer_waits_until_budget_elapsed() {
        let t0 = Instant::now();
        let mut pacer = FramePacer::from_fps(10.0);

        assert_eq!(pacer.poll(t0), Pace::Ready);
        assert_eq!(pacer.poll(t0 + ms(40)), Pace::WaitUntil(t0 + ms(100)));
        assert_eq!(pacer.poll(t0 + ms(100)), Pace::Ready);
        assert_eq!(pacer.poll(t0 + ms(150)), Pace::WaitUntil(t0 + ms(200)));
    }

    #[test]
    fn pacer_chains_from_previous_deadline_without_drift() {
        let t0 = Instant::now();
        let mut pacer = FramePacer::from_fps(10.0);
        pacer.poll(t0);

        // Woken 5ms late: next deadline still lands on the 100ms grid.
        assert_eq!(pacer.poll(t0 + ms(105)), Pace::Ready);
        assert_eq!(pacer.poll(t0 + ms(120)), Pace::WaitUntil(t0 + ms(200)));
    }

    #[test]
    fn pacer_resyncs_after_falling_behind() {
        let t0 = Instant::now();
        let mut pacer = FramePacer::from_fps(10.0);
        pacer.poll(t0);

        // A 1s stall must not cause a burst of catch-up frames.
        assert_eq!(pacer.poll(t0 + ms(1000)), Pace::Ready);
        assert_eq!(pacer.poll(t0 + ms(1001)), Pace::WaitUntil(t0 + ms(1100)));
    }
}

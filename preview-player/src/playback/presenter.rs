//! Frame selection for the presentation loop
//!
//! Pure functions so the timing rule can be checked without a running engine.

use std::time::Duration;

/// Number of queued frames to discard before displaying.
///
/// Leading frames whose time is already behind `clock` are too late to
/// show; at least one frame is always kept so something is displayed.
pub fn frames_to_drop<I>(times: I, clock: f64) -> usize
where
    I: ExactSizeIterator<Item = f64>,
{
    let keep_one = times.len().saturating_sub(1);
    times.take(keep_one).take_while(|&t| t < clock).count()
}

/// Delay until the next candidate frame is due.
///
/// `max(0, min(next - clock, 2 / frame_rate))`, so the loop never sleeps
/// much longer than two frame periods even when decoding falls behind.
/// Without a next frame the loop re-checks after one frame period.
pub fn next_delay(next: Option<f64>, clock: f64, frame_rate: f64) -> Duration {
    let period = frame_period(frame_rate);
    let secs = match next {
        Some(time) => (time - clock).min(2.0 * period).max(0.0),
        None => period,
    };
    Duration::from_secs_f64(secs)
}

/// One frame period in seconds; falls back to 25 fps for a bogus rate
pub fn frame_period(frame_rate: f64) -> f64 {
    if frame_rate > 0.0 {
        1.0 / frame_rate
    } else {
        1.0 / 25.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Duration, secs: f64) -> bool {
        (a.as_secs_f64() - secs).abs() < 1e-9
    }

    #[test]
    fn test_steady_playback_selection() {
        let queue = [9.98, 10.02, 10.06];
        let clock = 10.0;

        let dropped = frames_to_drop(queue.iter().copied(), clock);
        assert_eq!(dropped, 1);
        let shown = queue[dropped];
        assert_eq!(shown, 10.02);

        let delay = next_delay(queue.get(dropped + 1).copied(), clock, 24.0);
        assert!(close(delay, 0.06));
    }

    #[test]
    fn test_keeps_last_late_frame() {
        let queue = [1.0, 1.04, 1.08];
        assert_eq!(frames_to_drop(queue.iter().copied(), 5.0), 2);
        assert_eq!(frames_to_drop(std::iter::once(1.0), 5.0), 0);
        assert_eq!(frames_to_drop(std::iter::empty(), 5.0), 0);
    }

    #[test]
    fn test_delay_is_clamped() {
        // Next frame far ahead: at most two periods
        assert!(close(next_delay(Some(12.0), 10.0, 25.0), 0.08));
        // Next frame already late: no negative sleep
        assert_eq!(next_delay(Some(9.0), 10.0, 25.0), Duration::ZERO);
        assert!(close(next_delay(None, 10.0, 25.0), 0.04));
    }
}

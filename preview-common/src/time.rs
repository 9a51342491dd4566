//! Time and frame-index conversions

/// Frame index at or after `time`.
///
/// Rounds up so that seeking to a time never lands on a frame that starts
/// before it (a subtitle beginning at `time` stays visible).
pub fn time_to_frame_ceil(time: f64, frame_rate: f64) -> u64 {
    if time <= 0.0 || frame_rate <= 0.0 {
        return 0;
    }
    // Guard against 3.0000000004 * 25 style float noise pushing one frame over
    let exact = time * frame_rate;
    let rounded = exact.round();
    if (exact - rounded).abs() < 1e-6 {
        rounded as u64
    } else {
        exact.ceil() as u64
    }
}

/// Frame index at or before `time`
pub fn time_to_frame_floor(time: f64, frame_rate: f64) -> u64 {
    if time <= 0.0 || frame_rate <= 0.0 {
        return 0;
    }
    let exact = time * frame_rate;
    let rounded = exact.round();
    if (exact - rounded).abs() < 1e-6 {
        rounded as u64
    } else {
        exact.floor() as u64
    }
}

/// Presentation time of frame `index`
pub fn frame_to_time(index: u64, frame_rate: f64) -> f64 {
    if frame_rate <= 0.0 {
        return 0.0;
    }
    index as f64 / frame_rate
}

/// Clamp a seek target into `[0, duration]`
pub fn clamp_time(time: f64, duration: f64) -> f64 {
    if time.is_nan() || time < 0.0 {
        0.0
    } else if time > duration {
        duration.max(0.0)
    } else {
        time
    }
}

/// Format seconds as `M:SS.mmm` for log lines
pub fn format_timestamp(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let total_ms = (seconds.abs() * 1000.0).round() as u64;
    let minutes = total_ms / 60_000;
    let secs = (total_ms / 1000) % 60;
    let ms = total_ms % 1000;
    format!("{}{}:{:02}.{:03}", sign, minutes, secs, ms)
}

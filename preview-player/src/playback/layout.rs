//! Fitting the video into the display area

use serde::Serialize;

/// Where and how large the video is drawn, and what size to decode at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputLayout {
    /// Top-left corner of the picture inside the display
    pub offset: (i32, i32),
    /// Size the picture occupies on screen
    pub display_size: (u32, u32),
    /// Size frames should be decoded at (capped by the frame-size limit)
    pub decode_size: (u32, u32),
}

impl OutputLayout {
    /// Layout that draws frames unscaled at the origin
    pub fn identity(size: (u32, u32)) -> Self {
        Self {
            offset: (0, 0),
            display_size: size,
            decode_size: size,
        }
    }
}

/// Fit a `video_size` picture with `sample_aspect_ratio` into `display`.
///
/// The picture keeps its aspect ratio and is centred. When its RGBA size
/// would exceed `limit_mib`, the decode size is reduced to fit the limit
/// while the display size stays; limits of half a MiB or less disable the
/// cap.
pub fn fit_output_size(
    display: (u32, u32),
    video_size: (u32, u32),
    sample_aspect_ratio: f64,
    limit_mib: f64,
) -> OutputLayout {
    let (w, h) = (f64::from(display.0.max(1)), f64::from(display.1.max(1)));
    let sar = if sample_aspect_ratio > 0.0 { sample_aspect_ratio } else { 1.0 };
    let ratio = f64::from(video_size.0.max(1)) * sar / f64::from(video_size.1.max(1));

    let (ow, oh) = if w / h < ratio {
        (w, w / ratio)
    } else {
        (h * ratio, h)
    };
    let offset = (((w - ow) / 2.0).round() as i32, ((h - oh) / 2.0).round() as i32);
    let display_size = (round_size(ow), round_size(oh));

    let mut decode_size = display_size;
    let bytes = f64::from(display_size.0) * f64::from(display_size.1) * 4.0;
    if limit_mib > 0.5 && bytes > limit_mib * 1024.0 * 1024.0 {
        let capped_h = (limit_mib / 4.0 / ratio).sqrt() * 1024.0;
        decode_size = (round_size(capped_h * ratio), round_size(capped_h));
    }

    OutputLayout {
        offset,
        display_size,
        decode_size,
    }
}

fn round_size(v: f64) -> u32 {
    v.round().max(1.0) as u32
}

/// RGBA bytes of one frame at `size`
pub fn frame_bytes(size: (u32, u32)) -> usize {
    size.0 as usize * size.1 as usize * 4
}

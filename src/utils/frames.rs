/// Seconds shown per image when there is no narration to time against.
pub const SECONDS_PER_IMAGE: u64 = 3;
/// Length of a composition with neither narration nor images.
pub const DEFAULT_COMPOSITION_SECS: u64 = 10;

/// `ceil(seconds * fps)`, ignoring float noise below a microframe.
///
/// `0.1 + 0.2` seconds at 30 fps must give 9 frames, not 10.
pub fn seconds_to_frames(seconds: f64, fps: u32) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    let exact = seconds * fps as f64;
    let cleaned = (exact * 1e6).round() / 1e6;
    cleaned.ceil() as u64
}

/// Splits `total` frames across `count` slots as evenly as possible.
/// The first `total % count` slots get one extra frame.
pub fn distribute_frames(total: u64, count: usize) -> Vec<u64> {
    if count == 0 {
        return Vec::new();
    }
    let base = total / count as u64;
    let remainder = (total % count as u64) as usize;
    (0..count)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

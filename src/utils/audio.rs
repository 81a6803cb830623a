use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, warn};

/// Silent WAV used as a stand-in before real narration exists.
pub const SILENT_WAV_DATA_URI: &str =
    "data:audio/wav;base64,UklGRiQAAABXQVZFZm10IBAAAAABAAEARKwAAIhYAQACABAAZGF0YQAAAAA=";

/// Returned when a payload can't be estimated at all.
pub const FALLBACK_DURATION_SECS: f64 = 30.0;
pub const MIN_DURATION_SECS: f64 = 1.0;

/// Payloads smaller than this are treated as effectively empty.
const MIN_PAYLOAD_BYTES: usize = 1000;
const MP3_BYTES_PER_SEC: f64 = 128_000.0 / 8.0;
/// 24 kHz mono 16-bit PCM, used when a WAV header can't be read.
const WAV_FALLBACK_BYTES_PER_SEC: f64 = 48_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMime {
    Mpeg,
    Wav,
}

impl AudioMime {
    pub fn parse(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "audio/mpeg" | "audio/mp3" => Some(Self::Mpeg),
            "audio/wav" | "audio/wave" | "audio/x-wav" => Some(Self::Wav),
            _ => None,
        }
    }
}

/// Estimates the duration in seconds of a base64 `data:` URI.
///
/// This never fails: anything it can't make sense of comes back as
/// [`FALLBACK_DURATION_SECS`]. The result is never below one second.
pub fn estimate_duration(data_uri: &str) -> f64 {
    if data_uri == SILENT_WAV_DATA_URI {
        return MIN_DURATION_SECS;
    }
    match try_estimate_data_uri(data_uri) {
        Ok(secs) => secs,
        Err(e) => {
            warn!("Audio duration estimate failed, using fallback: {:#}", e);
            FALLBACK_DURATION_SECS
        }
    }
}

/// Estimates the duration of an already-decoded payload.
pub fn estimate_duration_bytes(mime: AudioMime, bytes: &[u8]) -> f64 {
    if bytes.len() < MIN_PAYLOAD_BYTES {
        return MIN_DURATION_SECS;
    }

    let secs = match mime {
        AudioMime::Mpeg => bytes.len() as f64 / MP3_BYTES_PER_SEC,
        AudioMime::Wav => match parse_wav_header(bytes) {
            Ok(info) if info.byte_rate > 0 => {
                // The declared size can overrun a truncated payload.
                let available = bytes.len().saturating_sub(info.data_offset);
                let data_len = (info.data_size as usize).min(available);
                data_len as f64 / info.byte_rate as f64
            }
            Ok(_) | Err(_) => {
                debug!("No usable WAV header, assuming constant byte rate");
                bytes.len() as f64 / WAV_FALLBACK_BYTES_PER_SEC
            }
        },
    };

    if secs.is_finite() {
        secs.max(MIN_DURATION_SECS)
    } else {
        FALLBACK_DURATION_SECS
    }
}

fn try_estimate_data_uri(data_uri: &str) -> Result<f64> {
    let rest = data_uri
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("Not a data URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("Data URI has no payload"))?;
    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default();
    if !parts.any(|p| p.eq_ignore_ascii_case("base64")) {
        return Err(anyhow!("Data URI is not base64 encoded"));
    }

    let Some(mime) = AudioMime::parse(mime) else {
        debug!("Unsupported audio format {:?}", mime);
        return Ok(FALLBACK_DURATION_SECS);
    };

    let bytes = STANDARD.decode(payload.trim())?;
    Ok(estimate_duration_bytes(mime, &bytes))
}

#[derive(Debug)]
struct WavInfo {
    byte_rate: u32,
    data_offset: usize,
    data_size: u32,
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    let slice = bytes
        .get(at..at + 4)
        .ok_or_else(|| anyhow!("Unexpected end of WAV header"))?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// Walks the RIFF chunks until the data chunk.
fn parse_wav_header(bytes: &[u8]) -> Result<WavInfo> {
    if bytes.get(0..4) != Some(&b"RIFF"[..]) {
        return Err(anyhow!("Not a RIFF file"));
    }
    if bytes.get(8..12) != Some(&b"WAVE"[..]) {
        return Err(anyhow!("Not a WAVE file"));
    }

    let mut pos = 12;
    let mut byte_rate: Option<u32> = None;

    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size = read_u32(bytes, pos + 4)?;
        let body = pos + 8;

        if chunk_id == b"fmt " {
            // fmt layout: format(2) channels(2) sample_rate(4) byte_rate(4)
            byte_rate = Some(read_u32(bytes, body + 8)?);
        } else if chunk_id == b"data" {
            return Ok(WavInfo {
                byte_rate: byte_rate.ok_or_else(|| anyhow!("data chunk before fmt chunk"))?,
                data_offset: body,
                data_size: chunk_size,
            });
        }

        // Chunks are word aligned
        pos = body + chunk_size as usize + (chunk_size as usize & 1);
    }

    Err(anyhow!("Missing data chunk"))
}

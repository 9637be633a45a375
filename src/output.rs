use std::fmt::Write;

use crate::CaptionEvent;

/// Download formats; anything unrecognized is served as the raw text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitleFormat {
    Txt,
    Srt,
    Vtt,
    Other(String),
}

impl SubtitleFormat {
    pub fn parse(name: &str) -> Self {
        match name {
            "txt" => SubtitleFormat::Txt,
            "srt" => SubtitleFormat::Srt,
            "vtt" => SubtitleFormat::Vtt,
            other => SubtitleFormat::Other(other.to_string()),
        }
    }

    /// Extension for the attachment name; unsafe names degrade to `txt`
    pub fn extension(&self) -> &str {
        match self {
            SubtitleFormat::Txt => "txt",
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
            SubtitleFormat::Other(name)
                if (1..=10).contains(&name.len())
                    && name.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                name.as_str()
            }
            SubtitleFormat::Other(_) => "txt",
        }
    }

    pub fn file_name(&self) -> String {
        format!("transcript.{}", self.extension())
    }
}

/// SRT and VTT are built from `events`; other formats pass `text` through
pub fn render(format: &SubtitleFormat, text: &str, events: &[CaptionEvent]) -> String {
    match format {
        SubtitleFormat::Srt => render_srt(events),
        SubtitleFormat::Vtt => render_vtt(events),
        SubtitleFormat::Txt | SubtitleFormat::Other(_) => text.to_string(),
    }
}

/// Render transcript as plain text (one event per line, no timestamps)
pub fn render_text(events: &[CaptionEvent]) -> String {
    events
        .iter()
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_srt(events: &[CaptionEvent]) -> String {
    let mut out = String::new();
    for (i, event) in events.iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            srt_time(event.start),
            srt_time(event.end()),
            event.text
        );
    }
    out
}

pub fn render_vtt(events: &[CaptionEvent]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for event in events {
        let _ = write!(
            out,
            "{} --> {}\n{}\n\n",
            vtt_time(event.start),
            vtt_time(event.end()),
            event.text
        );
    }
    out
}

/// `HH:MM:SS,mmm`
pub fn srt_time(t: f64) -> String {
    let (h, m, s, ms) = split_time(t);
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// `HH:MM:SS.mmm`
pub fn vtt_time(t: f64) -> String {
    let (h, m, s, ms) = split_time(t);
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

/// Hours, minutes, seconds and milliseconds of `t` seconds.
///
/// Milliseconds are the fractional second scaled by 1000 and truncated, not
/// rounded, so 3.3 gives 299 (3.3 - 3 is 0.29999... in binary).
fn split_time(t: f64) -> (u64, u64, u64, u64) {
    let t = if t.is_finite() && t > 0.0 { t } else { 0.0 };
    let total_minutes = floor_div(t, 60.0) as u64;
    let (h, m) = (total_minutes / 60, total_minutes % 60);
    let s = (t % 60.0) as u64;
    let ms = ((t - t.trunc()) * 1000.0) as u64;
    (h, m, s, ms)
}

/// Float floor division that agrees with the remainder `t % d`, so minutes
/// and seconds never disagree at a boundary
fn floor_div(t: f64, d: f64) -> f64 {
    let rem = t % d;
    let div = (t - rem) / d;
    let q = div.floor();
    if div - q > 0.5 { q + 1.0 } else { q }
}

//! Markdown note generation from transcript and keyframe data.

use std::path::{Path, PathBuf};

use crate::transcribe::{Transcript, TranscriptSegment};
use crate::utils::sanitize_filename;

pub mod organizer;

pub use organizer::{extract_content, OrganizeError, Organizer};

/// Segments closer together than this stay in one paragraph.
const GROUP_GAP_SECS: f64 = 2.5;
/// A paragraph never spans more than this much audio.
const GROUP_WINDOW_SECS: f64 = 60.0;

/// Render a transcript into the note document.
///
/// Keyframe results (cloud) become image sections in extraction order, each
/// followed by its description. Transcript segments become timestamped
/// paragraphs. A transcript with neither falls back to the plain text.
pub fn render_markdown(title: &str, transcript: &Transcript) -> String {
    let mut doc = String::new();
    doc.push_str(&format!("# {}\n", title.trim()));

    for (index, frame) in transcript.keyframes.iter().enumerate() {
        let label = frame
            .start_secs
            .map(clock)
            .unwrap_or_else(|| format!("Slide {}", index + 1));
        doc.push('\n');
        doc.push_str(&format!("![{}]({})\n", label, frame.image_url));
        if let Some(description) = frame
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
        {
            doc.push('\n');
            doc.push_str(description.trim());
            doc.push('\n');
        }
    }

    if !transcript.segments.is_empty() {
        for group in group_segments(&transcript.segments) {
            doc.push('\n');
            doc.push_str(&format!("**[{}]** {}\n", clock(group.start_secs), group.text));
        }
    } else if transcript.keyframes.is_empty() && !transcript.text.trim().is_empty() {
        doc.push('\n');
        doc.push_str(transcript.text.trim());
        doc.push('\n');
    }

    doc
}

/// Write the note document to disk, deriving the filename from the title.
/// Returns the written path.
pub fn write_note(title: &str, markdown: &str, output_dir: Option<&Path>) -> crate::Result<PathBuf> {
    let dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    fs_err::create_dir_all(&dir)?;

    let mut stem = sanitize_filename(title);
    if stem.is_empty() {
        stem = "note".to_string();
    }
    let path = dir.join(format!("{}.md", stem));
    fs_err::write(&path, markdown)?;
    Ok(path)
}

struct SegmentGroup {
    start_secs: f64,
    text: String,
}

/// Merge consecutive segments into readable paragraphs, splitting on long
/// pauses and when a paragraph covers too much audio.
fn group_segments(segments: &[TranscriptSegment]) -> Vec<SegmentGroup> {
    let mut groups: Vec<SegmentGroup> = Vec::new();
    let mut current: Option<(f64, f64, String)> = None;

    for segment in segments {
        match current.as_mut() {
            Some((start, last_end, text))
                if segment.start_secs - *last_end <= GROUP_GAP_SECS
                    && segment.end_secs - *start <= GROUP_WINDOW_SECS =>
            {
                text.push(' ');
                text.push_str(segment.text.trim());
                *last_end = segment.end_secs;
            }
            _ => {
                if let Some((start, _, text)) = current.take() {
                    groups.push(SegmentGroup {
                        start_secs: start,
                        text,
                    });
                }
                current = Some((
                    segment.start_secs,
                    segment.end_secs,
                    segment.text.trim().to_string(),
                ));
            }
        }
    }
    if let Some((start, _, text)) = current.take() {
        groups.push(SegmentGroup {
            start_secs: start,
            text,
        });
    }
    groups
}

fn clock(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::Keyframe;

    fn segment(start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start_secs: start,
            end_secs: end,
            text: text.to_string(),
        }
    }

    #[test]
    fn keyframe_note_renders_images_with_descriptions() {
        let transcript = Transcript {
            text: String::new(),
            segments: vec![],
            keyframes: vec![
                Keyframe {
                    image_url: "https://img.example/a.png".to_string(),
                    description: Some("Agenda overview".to_string()),
                    start_secs: Some(12.0),
                },
                Keyframe {
                    image_url: "https://img.example/b.png".to_string(),
                    description: None,
                    start_secs: None,
                },
            ],
            language: None,
        };

        let doc = render_markdown("Rust in Action", &transcript);
        assert!(doc.starts_with("# Rust in Action\n"));
        assert!(doc.contains("![00:12](https://img.example/a.png)\n\nAgenda overview\n"));
        assert!(doc.contains("![Slide 2](https://img.example/b.png)\n"));
    }

    #[test]
    fn segment_note_renders_timestamped_paragraphs() {
        let transcript = Transcript {
            text: String::new(),
            segments: vec![
                segment(0.0, 3.0, "Welcome back."),
                segment(3.5, 6.0, "Today we cover ownership."),
                // A long pause starts a new paragraph.
                segment(70.0, 73.0, "Next, borrowing."),
            ],
            keyframes: vec![],
            language: None,
        };

        let doc = render_markdown("Ownership", &transcript);
        assert!(doc.contains("**[00:00]** Welcome back. Today we cover ownership.\n"));
        assert!(doc.contains("**[01:10]** Next, borrowing.\n"));
    }

    #[test]
    fn paragraphs_split_once_they_cover_a_minute() {
        let segments: Vec<TranscriptSegment> = (0..8)
            .map(|i| segment(i as f64 * 10.0, i as f64 * 10.0 + 9.0, "tick"))
            .collect();

        let doc = render_markdown("Long", &Transcript {
            text: String::new(),
            segments,
            keyframes: vec![],
            language: None,
        });
        assert!(doc.contains("**[00:00]**"));
        assert!(doc.contains("**[01:00]**"));
    }

    #[test]
    fn bare_text_transcript_falls_back_to_a_single_block() {
        let transcript = Transcript {
            text: "  Just one paragraph of text.  ".to_string(),
            segments: vec![],
            keyframes: vec![],
            language: None,
        };
        let doc = render_markdown("Plain", &transcript);
        assert_eq!(doc, "# Plain\n\nJust one paragraph of text.\n");
    }

    #[test]
    fn clock_rolls_minutes_past_an_hour() {
        assert_eq!(clock(0.0), "00:00");
        assert_eq!(clock(72.4), "01:12");
        assert_eq!(clock(4505.0), "75:05");
    }

    #[test]
    fn note_filename_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_note("Intro: Part 1/3", "# x\n", Some(dir.path())).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "Intro_ Part 1_3.md"
        );
        assert_eq!(fs_err::read_to_string(&path).unwrap(), "# x\n");
    }
}

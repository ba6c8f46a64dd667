// src/process/sniff.rs
use super::chunk::parse_line;

/// Delimiters considered when sniffing, in tie-break order.
pub const CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Bytes read from the head of a source to sniff its delimiter.
pub const SAMPLE_BYTES: usize = 64 * 1024;

const SAMPLE_LINES: usize = 20;

/// Pick the delimiter that splits the sampled lines into the most fields
/// with the least variation between lines.
///
/// Each line is parsed on its own, quote-aware, so a stray quote only
/// disturbs the line it sits on. Falls back to comma when no candidate
/// splits anything.
pub fn sniff_delimiter(sample: &[u8]) -> u8 {
    let lines = sample_lines(sample);

    let mut best_delimiter = b',';
    let mut best_score = 0.0f32;

    for &delimiter in &CANDIDATES {
        let counts: Vec<usize> = lines
            .iter()
            .filter_map(|line| parse_line(line, delimiter).ok()?.first().map(|r| r.len()))
            .collect();
        if counts.is_empty() {
            continue;
        }

        let n = counts.len() as f32;
        let avg = counts.iter().sum::<usize>() as f32 / n;
        if avg <= 1.0 {
            continue;
        }
        let variance = counts
            .iter()
            .map(|&c| (c as f32 - avg).powi(2))
            .sum::<f32>()
            / n;

        // extra fields per line, penalised by inconsistency
        let score = (avg - 1.0) / (1.0 + variance.sqrt());
        if score > best_score {
            best_score = score;
            best_delimiter = delimiter;
        }
    }

    best_delimiter
}

/// Non-blank physical lines from the sample, without a trailing partial line.
fn sample_lines(sample: &[u8]) -> Vec<&[u8]> {
    let complete = match sample.iter().rposition(|&b| b == b'\n') {
        Some(pos) if sample.len() == SAMPLE_BYTES => &sample[..=pos],
        _ => sample,
    };
    complete
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .take(SAMPLE_LINES)
        .collect()
}

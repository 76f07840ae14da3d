use std::fmt::Write;
use std::time::Duration;

/// A single line of lyrics with its start time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    pub start_time: Duration,
    pub text: String,
}

impl LyricLine {
    #[must_use]
    pub fn new(start_time: Duration, text: impl Into<String>) -> Self {
        Self {
            start_time,
            text: text.into(),
        }
    }
}

/// Parsed LRC document.
///
/// Lines are always sorted ascending by start time. Lines sharing a timestamp
/// keep the order in which they appeared in the source text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricDocument {
    lines: Vec<LyricLine>,
}

impl LyricDocument {
    /// An empty document, used whenever a track has no lyrics
    #[must_use]
    pub const fn empty() -> Self {
        Self { lines: Vec::new() }
    }

    /// Parse LRC text into a document.
    ///
    /// Never fails: text without any time tags simply yields an empty document.
    /// ID tags such as `[ti:...]` or `[ar:...]` are recognized and dropped.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        let mut lines = Vec::new();

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (timestamps, residual) = split_time_tags(line);
            let text = residual.trim();

            // Anything still shaped like a tag is metadata, not lyrics
            if looks_like_id_tag(text) {
                continue;
            }

            // One line per timestamp (handles multi-timestamp lines)
            for timestamp in timestamps {
                lines.push(LyricLine::new(timestamp, text));
            }
        }

        // Stable sort keeps source order for equal timestamps
        lines.sort_by_key(|l| l.start_time);

        Self { lines }
    }

    #[must_use]
    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&LyricLine> {
        self.lines.get(index)
    }

    /// Index of the greatest line whose start time is at or before `position`.
    ///
    /// With duplicate timestamps this is the last of the duplicates.
    #[must_use]
    pub fn current_line_index(&self, position: Duration) -> Option<usize> {
        let started = self.lines.partition_point(|l| l.start_time <= position);
        started.checked_sub(1)
    }

    /// The line active at `position`, if any
    #[must_use]
    pub fn current_line(&self, position: Duration) -> Option<&LyricLine> {
        self.current_line_index(position)
            .and_then(|i| self.lines.get(i))
    }

    /// Serialize back to LRC text, one `[mm:ss.xx]` tagged line per entry
    #[must_use]
    pub fn to_lrc(&self) -> String {
        let mut output = String::new();
        for line in &self.lines {
            let _ = writeln!(output, "[{}]{}", format_timestamp(line.start_time), line.text);
        }
        output
    }
}

/// Format a duration as an LRC timestamp.
///
/// Uses hundredths when no precision is lost, milliseconds otherwise.
fn format_timestamp(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    let millis = duration.subsec_millis();

    if millis % 10 == 0 {
        format!("{minutes:02}:{seconds:02}.{:02}", millis / 10)
    } else {
        format!("{minutes:02}:{seconds:02}.{millis:03}")
    }
}

/// Pull every time tag out of a line, wherever it appears.
/// Returns the timestamps in order and the text left over.
fn split_time_tags(line: &str) -> (Vec<Duration>, String) {
    let mut timestamps = Vec::new();
    let mut residual = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(open) = rest.find('[') {
        residual.push_str(&rest[..open]);
        let candidate = &rest[open..];

        if let Some((timestamp, consumed)) = parse_time_tag(candidate) {
            timestamps.push(timestamp);
            rest = &candidate[consumed..];
        } else {
            residual.push('[');
            rest = &candidate[1..];
        }
    }
    residual.push_str(rest);

    (timestamps, residual)
}

/// Parse a tag like `[mm:ss]`, `[mm:ss.cc]` or `[mm:ss.mmm]` at the start of `s`.
/// Returns the timestamp and the number of bytes consumed.
fn parse_time_tag(s: &str) -> Option<(Duration, usize)> {
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'[') {
        return None;
    }

    let mut pos = 1;
    let minutes = take_digits(bytes, &mut pos, 1, 3)?;
    if bytes.get(pos) != Some(&b':') {
        return None;
    }
    pos += 1;
    let seconds = take_digits(bytes, &mut pos, 2, 2)?;

    let mut millis = 0;
    if bytes.get(pos) == Some(&b'.') {
        pos += 1;
        let start = pos;
        let fraction = take_digits(bytes, &mut pos, 2, 3)?;
        // Two digits are hundredths, three are milliseconds
        millis = if pos - start == 2 { fraction * 10 } else { fraction };
    }

    if bytes.get(pos) != Some(&b']') {
        return None;
    }
    pos += 1;

    let total = (minutes * 60 + seconds) * 1000 + millis;
    Some((Duration::from_millis(total), pos))
}

/// Read between `min` and `max` ASCII digits starting at `pos`
fn take_digits(bytes: &[u8], pos: &mut usize, min: usize, max: usize) -> Option<u64> {
    let start = *pos;
    let mut value = 0u64;

    while *pos - start < max {
        match bytes.get(*pos) {
            Some(b) if b.is_ascii_digit() => {
                value = value * 10 + u64::from(b - b'0');
                *pos += 1;
            }
            _ => break,
        }
    }

    (*pos - start >= min).then_some(value)
}

/// ID tags like [ti:Title] or [ar:Artist]
fn looks_like_id_tag(text: &str) -> bool {
    text.starts_with('[') && text.contains(':')
}

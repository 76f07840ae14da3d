//! Position-to-line resolution for the active lyric document.

use crate::lrc::{LyricDocument, LyricLine};
use std::sync::Arc;
use std::time::Duration;

/// The lines surrounding the active one, as shown by a three-line display
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineWindow {
    /// Index of the active line, `None` before the first timestamp
    pub index: Option<usize>,
    pub previous: Option<LyricLine>,
    pub current: Option<LyricLine>,
    pub next: Option<LyricLine>,
}

impl LineWindow {
    fn around(document: &LyricDocument, index: Option<usize>) -> Self {
        let Some(i) = index else {
            return Self::default();
        };
        Self {
            index,
            previous: i.checked_sub(1).and_then(|p| document.get(p)).cloned(),
            current: document.get(i).cloned(),
            next: document.get(i + 1).cloned(),
        }
    }

    /// True when no line is active
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.index.is_none()
    }
}

/// Tracks which line of a document is active as playback moves.
///
/// The remembered index only suppresses repeated notifications; it can always
/// be recomputed from the document and a position.
#[derive(Debug, Clone, Default)]
pub struct LyricCursor {
    document: Arc<LyricDocument>,
    last_index: Option<usize>,
}

impl LyricCursor {
    #[must_use]
    pub fn new(document: Arc<LyricDocument>) -> Self {
        Self {
            document,
            last_index: None,
        }
    }

    /// Replace the document wholesale and forget the last resolved line
    pub fn set_document(&mut self, document: Arc<LyricDocument>) {
        self.document = document;
        self.last_index = None;
    }

    /// Drop the current document, leaving an empty one
    pub fn clear(&mut self) {
        self.set_document(Arc::new(LyricDocument::empty()));
    }

    #[must_use]
    pub fn document(&self) -> &Arc<LyricDocument> {
        &self.document
    }

    #[must_use]
    pub const fn last_index(&self) -> Option<usize> {
        self.last_index
    }

    /// Compute the window for `position` without touching cursor state
    #[must_use]
    pub fn window_at(&self, position: Duration) -> LineWindow {
        LineWindow::around(&self.document, self.document.current_line_index(position))
    }

    /// Resolve the active line for `position`.
    ///
    /// Returns `Some` only when the active index differs from the previously
    /// resolved one (including a change to "no active line"), so callers can
    /// push display updates only when something actually moved.
    pub fn resolve(&mut self, position: Duration) -> Option<LineWindow> {
        let index = self.document.current_line_index(position);
        if index == self.last_index {
            return None;
        }
        self.last_index = index;
        Some(LineWindow::around(&self.document, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(input: &str) -> LyricCursor {
        LyricCursor::new(Arc::new(LyricDocument::parse(input)))
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    const SONG: &str = "[00:05.00]First\n[00:10.00]Second\n[00:15.00]Third";

    #[test]
    fn test_empty_document_has_no_active_line() {
        let c = LyricCursor::default();
        assert!(c.window_at(secs(100)).is_idle());
    }

    #[test]
    fn test_before_first_timestamp() {
        let c = cursor(SONG);
        let window = c.window_at(Duration::from_millis(4_999));
        assert!(window.is_idle());
        assert!(window.current.is_none());
    }

    #[test]
    fn test_window_in_the_middle() {
        let c = cursor(SONG);
        let window = c.window_at(secs(11));
        assert_eq!(window.index, Some(1));
        assert_eq!(window.previous.map(|l| l.text), Some("First".to_string()));
        assert_eq!(window.current.map(|l| l.text), Some("Second".to_string()));
        assert_eq!(window.next.map(|l| l.text), Some("Third".to_string()));
    }

    #[test]
    fn test_at_and_after_last_line() {
        let c = cursor(SONG);
        for position in [secs(15), secs(600)] {
            let window = c.window_at(position);
            assert_eq!(window.current.map(|l| l.text), Some("Third".to_string()));
            assert!(window.next.is_none());
        }
    }

    #[test]
    fn test_first_line_has_no_previous() {
        let c = cursor(SONG);
        let window = c.window_at(secs(5));
        assert_eq!(window.index, Some(0));
        assert!(window.previous.is_none());
    }

    #[test]
    fn test_resolve_only_reports_changes() {
        let mut c = cursor(SONG);
        // Still before the first line: nothing changed from the initial state
        assert!(c.resolve(secs(1)).is_none());

        assert_eq!(c.resolve(secs(5)).and_then(|w| w.index), Some(0));
        assert!(c.resolve(secs(6)).is_none());
        assert!(c.resolve(secs(9)).is_none());
        assert_eq!(c.resolve(secs(10)).and_then(|w| w.index), Some(1));
    }

    #[test]
    fn test_backward_seek_is_honored() {
        let mut c = cursor(SONG);
        assert_eq!(c.resolve(secs(16)).and_then(|w| w.index), Some(2));
        assert_eq!(c.resolve(secs(6)).and_then(|w| w.index), Some(0));

        let back_to_start = c.resolve(secs(0));
        assert!(back_to_start.is_some_and(|w| w.is_idle()));
        assert_eq!(c.last_index(), None);
    }

    #[test]
    fn test_duplicate_timestamps_resolve_to_last() {
        let mut c = cursor("[00:05.00]a\n[00:05.00]b\n[00:08.00]c");
        let window = c.resolve(secs(5));
        assert_eq!(window.and_then(|w| w.current).map(|l| l.text), Some("b".to_string()));
    }

    #[test]
    fn test_set_document_resets_state() {
        let mut c = cursor(SONG);
        assert!(c.resolve(secs(12)).is_some());
        c.set_document(Arc::new(LyricDocument::parse("[00:01.00]New")));
        assert_eq!(c.last_index(), None);
        assert_eq!(c.resolve(secs(12)).and_then(|w| w.index), Some(0));

        c.clear();
        assert!(c.document().is_empty());
        assert!(c.resolve(secs(12)).is_none());
    }
}

//! Session transcript reconciliation
//!
//! A session's transcript is confirmed text plus one volatile tail. How
//! results fold into it depends on the backend, because the two engines
//! report text with different shapes:
//!
//! * the remote service emits sentence fragments: an interim result replaces
//!   the volatile tail, a final result is appended to the confirmed text
//!   verbatim, exactly as the service segmented it;
//! * a local recognizer task reports its entire output since the task began,
//!   so interim results replace the tail wholesale and finals (which only
//!   occur at task boundaries) are joined onto the confirmed text with a
//!   single space.
//!
//! The two modes must not be unified; folding local task text with the remote
//! rule duplicates everything said so far on every report.

use crate::asr::BackendKind;

#[derive(Debug)]
pub struct TranscriptAggregator {
    backend: BackendKind,
    confirmed: String,
    volatile: String,
}

impl TranscriptAggregator {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            confirmed: String::new(),
            volatile: String::new(),
        }
    }

    /// Fold one recognition result into the transcript.
    pub fn apply(&mut self, text: &str, is_final: bool) {
        match (self.backend, is_final) {
            (_, false) => {
                self.volatile = text.to_string();
            }
            (BackendKind::Remote, true) => {
                self.confirmed.push_str(text);
                self.volatile.clear();
            }
            (BackendKind::Local, true) => {
                if !text.is_empty() {
                    if !self.confirmed.is_empty() {
                        self.confirmed.push(' ');
                    }
                    self.confirmed.push_str(text);
                }
                self.volatile.clear();
            }
        }
    }

    /// Text built solely from final results.
    pub fn confirmed(&self) -> &str {
        &self.confirmed
    }

    /// Confirmed text plus the volatile tail, the text shown live.
    pub fn current(&self) -> String {
        if self.volatile.is_empty() {
            return self.confirmed.clone();
        }
        if self.confirmed.is_empty() {
            return self.volatile.clone();
        }
        match self.backend {
            // Remote fragments carry their own spacing and punctuation.
            BackendKind::Remote => format!("{}{}", self.confirmed, self.volatile),
            BackendKind::Local => format!("{} {}", self.confirmed, self.volatile),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.volatile.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_finals_append_verbatim() {
        let mut t = TranscriptAggregator::new(BackendKind::Remote);
        t.apply("hello ", true);
        t.apply("world.", true);
        assert_eq!(t.confirmed(), "hello world.");
        assert_eq!(t.current(), "hello world.");
    }

    #[test]
    fn remote_interim_replaces_tail_without_touching_confirmed() {
        let mut t = TranscriptAggregator::new(BackendKind::Remote);
        t.apply("hello ", true);
        t.apply("wor", false);
        assert_eq!(t.current(), "hello wor");
        t.apply("worl", false);
        assert_eq!(t.current(), "hello worl");
        assert_eq!(t.confirmed(), "hello ");
        t.apply("world.", true);
        assert_eq!(t.current(), "hello world.");
    }

    #[test]
    fn local_interim_is_whole_task_output() {
        let mut t = TranscriptAggregator::new(BackendKind::Local);
        t.apply("one", false);
        t.apply("one two", false);
        // Cumulative task text replaces the tail, it never stacks.
        assert_eq!(t.current(), "one two");
    }

    #[test]
    fn local_finals_join_task_boundaries_with_single_space() {
        let mut t = TranscriptAggregator::new(BackendKind::Local);
        t.apply("first task", true);
        t.apply("second", false);
        assert_eq!(t.current(), "first task second");
        t.apply("second task", true);
        assert_eq!(t.confirmed(), "first task second task");
        assert_eq!(t.current(), "first task second task");
    }

    #[test]
    fn local_empty_final_adds_no_separator() {
        let mut t = TranscriptAggregator::new(BackendKind::Local);
        t.apply("kept", true);
        t.apply("", true);
        assert_eq!(t.confirmed(), "kept");
    }

    #[test]
    fn untouched_transcript_is_empty() {
        let t = TranscriptAggregator::new(BackendKind::Remote);
        assert!(t.is_empty());
        assert_eq!(t.current(), "");
    }
}

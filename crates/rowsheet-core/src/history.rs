//! Undo/redo over the raw table text, with coalesced draft edits.
//!
//! While a draft is open (between [`EditHistory::start_draft`] and
//! [`EditHistory::commit_draft`]) edits replace `present` without touching
//! `past`; committing records the pre-draft text as a single undo step.

use std::collections::VecDeque;

/// Default cap on retained undo entries.
pub const DEFAULT_MAX_UNDO: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryOptions {
    /// Oldest entries are dropped beyond this many. `0` means unbounded.
    pub max_undo: usize,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            max_undo: DEFAULT_MAX_UNDO,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EditHistory {
    past: VecDeque<String>,
    present: String,
    future: VecDeque<String>,
    draft_anchor: Option<String>,
    options: HistoryOptions,
}

impl EditHistory {
    pub fn new(initial: impl Into<String>) -> Self {
        Self::with_options(initial, HistoryOptions::default())
    }

    pub fn with_options(initial: impl Into<String>, options: HistoryOptions) -> Self {
        Self {
            present: initial.into(),
            options,
            ..Self::default()
        }
    }

    pub fn present(&self) -> &str {
        &self.present
    }

    pub fn past(&self) -> impl Iterator<Item = &str> {
        self.past.iter().map(String::as_str)
    }

    pub fn future(&self) -> impl Iterator<Item = &str> {
        self.future.iter().map(String::as_str)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn is_drafting(&self) -> bool {
        self.draft_anchor.is_some()
    }

    fn push_past(&mut self, text: String) {
        self.past.push_back(text);
        if self.options.max_undo > 0 {
            while self.past.len() > self.options.max_undo {
                self.past.pop_front();
            }
        }
    }

    /// Apply `updater` to the present text. Returns whether anything changed.
    pub fn edit(&mut self, updater: impl FnOnce(&str) -> String) -> bool {
        let next = updater(&self.present);
        if next == self.present {
            return false;
        }
        let previous = std::mem::replace(&mut self.present, next);
        if self.draft_anchor.is_none() {
            self.push_past(previous);
        }
        self.future.clear();
        true
    }

    pub fn set(&mut self, text: impl Into<String>) -> bool {
        let text = text.into();
        self.edit(|_| text)
    }

    /// Open a draft. No-op if one is already open.
    pub fn start_draft(&mut self) {
        if self.draft_anchor.is_none() {
            self.draft_anchor = Some(self.present.clone());
        }
    }

    /// Close the draft, recording one undo step if the text changed.
    pub fn commit_draft(&mut self) {
        let Some(anchor) = self.draft_anchor.take() else {
            return;
        };
        if anchor == self.present {
            return;
        }
        self.push_past(anchor);
        self.future.clear();
    }

    /// Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.past.pop_back() else {
            return false;
        };
        let current = std::mem::replace(&mut self.present, previous);
        self.future.push_front(current);
        self.draft_anchor = None;
        true
    }

    /// Returns `false` when there is nothing to redo.
    pub fn redo(&mut self) -> bool {
        let Some(next) = self.future.pop_front() else {
            return false;
        };
        let current = std::mem::replace(&mut self.present, next);
        self.push_past(current);
        self.draft_anchor = None;
        true
    }

    /// Forget all history and start over from `text`.
    pub fn reset(&mut self, text: impl Into<String>) {
        self.past.clear();
        self.future.clear();
        self.draft_anchor = None;
        self.present = text.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_then_undo_is_noop() {
        let mut h = EditHistory::new("a");
        h.set("b");
        h.reset("x");
        assert!(!h.undo());
        assert_eq!(h.present(), "x");
        assert!(!h.can_redo());
    }

    #[test]
    fn test_edit_then_undo_restores() {
        let mut h = EditHistory::new("a");
        assert!(h.edit(|s| format!("{}b", s)));
        assert_eq!(h.present(), "ab");
        assert!(h.undo());
        assert_eq!(h.present(), "a");
        assert!(h.redo());
        assert_eq!(h.present(), "ab");
    }

    #[test]
    fn test_identical_edit_is_noop() {
        let mut h = EditHistory::new("a");
        assert!(!h.set("a"));
        assert!(!h.can_undo());
    }

    #[test]
    fn test_edit_clears_future() {
        let mut h = EditHistory::new("a");
        h.set("b");
        h.undo();
        assert!(h.can_redo());
        h.set("c");
        assert!(!h.can_redo());
        assert_eq!(h.past().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_commit_without_start_is_noop() {
        let mut h = EditHistory::new("a");
        h.commit_draft();
        assert!(!h.can_undo());
        assert_eq!(h.present(), "a");
    }

    #[test]
    fn test_empty_draft_adds_nothing() {
        let mut h = EditHistory::new("a");
        h.start_draft();
        h.set("b");
        h.set("a");
        h.commit_draft();
        assert!(!h.can_undo());
        assert!(!h.is_drafting());
    }

    #[test]
    fn test_draft_coalesces_into_one_entry() {
        let mut h = EditHistory::new("a");
        h.start_draft();
        h.set("ab");
        h.start_draft();
        h.set("abc");
        h.commit_draft();
        assert_eq!(h.past().collect::<Vec<_>>(), vec!["a"]);
        assert!(h.undo());
        assert_eq!(h.present(), "a");
        assert_eq!(h.future().collect::<Vec<_>>(), vec!["abc"]);
    }

    #[test]
    fn test_undo_cancels_open_draft() {
        let mut h = EditHistory::new("a");
        h.set("b");
        h.start_draft();
        h.set("bc");
        assert!(h.undo());
        assert_eq!(h.present(), "a");
        assert!(!h.is_drafting());
        h.commit_draft();
        assert!(!h.can_undo());
    }

    #[test]
    fn test_max_undo_drops_oldest() {
        let mut h = EditHistory::with_options("0", HistoryOptions { max_undo: 2 });
        h.set("1");
        h.set("2");
        h.set("3");
        assert_eq!(h.past().collect::<Vec<_>>(), vec!["1", "2"]);
    }
}

//! Reassembly of streamed speech fragments into whole utterances.
//!
//! The service delivers avatar speech as small text fragments followed by
//! up to two independent termination signals (stop-talking and
//! end-message), in either order. The buffer reconstructs exactly one
//! clean message per utterance and finalizes it exactly once, however
//! many end signals arrive.

use once_cell::sync::Lazy;
use regex::Regex;

static WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static LEADING_ARTIFACT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s,]+").unwrap());

/// Punctuation that glues to the text before it
const NO_SPACE_BEFORE: &[char] = &[
    ',', '.', '!', '?', ';', ':', '%', ')', ']', '}', '›', '»', '"', '\'',
];
/// Openers that glue to the text after them
const NO_SPACE_AFTER: &[char] = &['(', '[', '{', '‹', '«', '"', '\''];

fn is_dash(c: char) -> bool {
    c == '\u{2014}' || c == '\u{2013}'
}

/// Decide spacing and append `token` to `buffer`.
///
/// `word_boundary` says whether the caller knows a word break belongs
/// here; the punctuation rules are consulted first, in order, and win
/// over it either way.
fn join_token(buffer: &mut String, token: &str, word_boundary: bool) {
    let token = token.trim_start();
    if token.is_empty() {
        return;
    }
    if buffer.is_empty() {
        buffer.push_str(token);
        return;
    }

    let first = token.chars().next().unwrap();
    let last = buffer.chars().next_back().unwrap();

    let insert = if NO_SPACE_BEFORE.contains(&first) {
        false
    } else if NO_SPACE_AFTER.contains(&last) {
        false
    } else if is_dash(first) || is_dash(last) {
        // Em-dashes glue on both sides: "wait—for it"
        false
    } else if first == '\'' {
        false
    } else {
        word_boundary
    };

    if insert && !buffer.ends_with(' ') {
        buffer.push(' ');
    }
    // A closing mark never follows a space the stream left behind
    if !insert && buffer.ends_with(' ') && NO_SPACE_BEFORE.contains(&first) {
        buffer.pop();
    }
    buffer.push_str(token);
}

/// Normalize `fragment` and join it onto `buffer` as a word token.
///
/// This is the spacing primitive for text whose word boundaries are not
/// carried in the fragments themselves (a boundary is assumed): internal
/// whitespace runs collapse to one space, a lone `-`/`–` becomes an
/// em-dash, and the punctuation rules above decide the rest.
pub fn smart_append(buffer: &str, fragment: &str) -> String {
    let mut token = WS_RUN.replace_all(fragment, " ").into_owned();
    if buffer.is_empty() {
        token = LEADING_ARTIFACT.replace(&token, "").into_owned();
    }
    if matches!(token.trim(), "-" | "\u{2013}") {
        token = "\u{2014}".to_string();
    }
    if token.trim().is_empty() {
        return buffer.to_string();
    }
    let mut out = buffer.to_string();
    join_token(&mut out, &token, true);
    out
}

/// One logical avatar speech turn being reconstructed.
///
/// At most one utterance is open at a time. `has_flushed` is false
/// whenever `is_open` is true and flips true exactly once per
/// open/close cycle, before the next open.
#[derive(Debug, Default)]
pub struct UtteranceBuffer {
    is_open: bool,
    has_flushed: bool,
    buffer: String,
}

impl UtteranceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw fragment from the event feed.
    ///
    /// Opens a new utterance on the first real fragment after a flush or
    /// reset. Fragments carry their own word boundaries as leading
    /// whitespace; a fragment without one is a direct continuation of
    /// the previous fragment ("Wel" + "come" is "Welcome"). Whitespace-only
    /// input changes nothing.
    pub fn on_fragment(&mut self, raw: &str) {
        let mut token = WS_RUN.replace_all(raw, " ").into_owned();
        if !self.is_open {
            // First fragment of the turn: drop leading space/comma artifacts
            token = LEADING_ARTIFACT.replace(&token, "").into_owned();
        }
        if matches!(token.trim(), "-" | "\u{2013}") {
            token = "\u{2014}".to_string();
        }
        if token.trim().is_empty() {
            return;
        }

        if !self.is_open {
            self.is_open = true;
            self.has_flushed = false;
            self.buffer.clear();
        }

        let word_boundary = token.starts_with(' ');
        join_token(&mut self.buffer, &token, word_boundary);
    }

    /// Finalize the open utterance, once.
    ///
    /// Both termination signals funnel here; whichever arrives first
    /// wins and the other is absorbed. Returns the trimmed text when a
    /// flush actually happened and produced something.
    pub fn on_utterance_end(&mut self) -> Option<String> {
        if !self.is_open || self.has_flushed {
            return None;
        }
        self.has_flushed = true;
        self.is_open = false;

        let text = self.buffer.trim().to_string();
        self.buffer.clear();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Discard any in-flight utterance without emitting it. Used on
    /// disconnect and teardown: partial speech is not transcribed.
    pub fn on_reset(&mut self) {
        self.is_open = false;
        self.has_flushed = false;
        self.buffer.clear();
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// The in-progress text. Observable for live rendering, but never
    /// enters the transcript before finalization.
    pub fn partial(&self) -> &str {
        &self.buffer
    }
}

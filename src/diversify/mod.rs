//! Emoji diversification for streamed assistant output.
//!
//! Models repeat themselves: the same emoji tends to show up every few
//! sentences. The diversifier tracks recently emitted glyphs and swaps a
//! repeat for a different glyph from an emotion pool matching the
//! surrounding text.
//!
//! History is owned by the diversifier instance and scoped to one output
//! stream, so concurrent streams never interfere. The transformation is
//! deterministic given the injected RNG.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Maximum glyphs remembered.
const HISTORY_CAP: usize = 10;

/// A glyph repeated within this many recent glyphs gets replaced.
const REPEAT_WINDOW: usize = 5;

/// Characters inspected on each side of a glyph for emotion keywords.
const CONTEXT_WINDOW: usize = 20;

// ============================================================================
// Emotion Categories
// ============================================================================

/// Emotion category inferred from the text around a repeated glyph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emotion {
    Joy,
    Contemplation,
    Excitement,
    Affection,
    Sadness,
    Playfulness,
}

impl Emotion {
    /// Replacement glyphs for this category.
    pub fn pool(self) -> &'static [char] {
        match self {
            Emotion::Joy => &['😊', '😃', '😄', '😁', '🙂', '😌', '🤗', '🥰', '✨', '💫', '🌟'],
            Emotion::Contemplation => &['🤔', '🧐', '💭', '🤨', '😯', '😮'],
            Emotion::Excitement => &['🤩', '😍', '🎉', '🎊', '⭐', '💫', '✨', '🌟'],
            Emotion::Affection => &['😍', '🥰', '😘', '💕', '💖', '💗', '💝'],
            Emotion::Sadness => &['😔', '😕', '🙁', '😢', '😥'],
            Emotion::Playfulness => &['😏', '😜', '😝', '😛', '🤪', '😋'],
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Emotion::Contemplation => &["think", "wonder", "hmm", "consider", "ponder"],
            Emotion::Joy => &["glad", "happy", "great", "wonderful", "nice", "delight"],
            Emotion::Excitement => &["wow", "amazing", "incredible", "excit", "fantastic"],
            Emotion::Affection => &["love", "ador", "cute", "sweet", "darling"],
            Emotion::Sadness => &["sad", "sorry", "unfortunat", "worri", "regret"],
            Emotion::Playfulness => &["fun", "joke", "haha", "lol", "teas"],
        }
    }

    /// Classify a lowercased context window. Keyword order matters: the
    /// first matching category wins, joy is the fallback.
    fn classify(context: &str) -> Emotion {
        const ORDER: [Emotion; 6] = [
            Emotion::Contemplation,
            Emotion::Joy,
            Emotion::Excitement,
            Emotion::Affection,
            Emotion::Sadness,
            Emotion::Playfulness,
        ];

        for emotion in ORDER {
            if emotion.keywords().iter().any(|kw| context.contains(kw)) {
                return emotion;
            }
        }
        Emotion::Joy
    }
}

// ============================================================================
// Diversifier
// ============================================================================

/// Stateful emoji filter for one output stream.
pub struct EmojiDiversifier<R> {
    history: Vec<char>,
    rng: R,
}

impl EmojiDiversifier<StdRng> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }
}

impl Default for EmojiDiversifier<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> EmojiDiversifier<R> {
    /// Create a diversifier with an injected RNG (seeded in tests).
    #[must_use]
    pub fn with_rng(rng: R) -> Self {
        Self {
            history: Vec::with_capacity(HISTORY_CAP),
            rng,
        }
    }

    /// Pre-load history, as if the glyphs had already been emitted.
    pub fn seed_history(&mut self, glyphs: impl IntoIterator<Item = char>) {
        for g in glyphs {
            self.record(g);
        }
    }

    /// Glyphs emitted so far, oldest first.
    pub fn history(&self) -> &[char] {
        &self.history
    }

    /// Apply diversification to a text fragment, updating history.
    pub fn apply(&mut self, text: &str) -> String {
        if !text.chars().any(is_emoji) {
            return text.to_string();
        }

        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());

        for (i, &c) in chars.iter().enumerate() {
            if is_emoji(c) {
                out.push(self.process_glyph(c, &chars, i));
            } else {
                out.push(c);
            }
        }

        out
    }

    fn process_glyph(&mut self, glyph: char, chars: &[char], index: usize) -> char {
        if !self.recent().contains(&glyph) {
            self.record(glyph);
            return glyph;
        }

        let context = context_window(chars, index);
        let pool = Emotion::classify(&context).pool();

        let candidates: Vec<char> = pool
            .iter()
            .copied()
            .filter(|g| !self.recent().contains(g))
            .collect();
        let candidates = if candidates.is_empty() {
            pool.to_vec()
        } else {
            candidates
        };

        let replacement = candidates[self.rng.random_range(0..candidates.len())];
        self.record(replacement);
        replacement
    }

    /// The repeat-detection window: the last `REPEAT_WINDOW` glyphs emitted.
    fn recent(&self) -> &[char] {
        let start = self.history.len().saturating_sub(REPEAT_WINDOW);
        &self.history[start..]
    }

    fn record(&mut self, glyph: char) {
        self.history.push(glyph);
        if self.history.len() > HISTORY_CAP {
            self.history.remove(0);
        }
    }
}

/// Lowercased text within `CONTEXT_WINDOW` characters of `index`.
fn context_window(chars: &[char], index: usize) -> String {
    let start = index.saturating_sub(CONTEXT_WINDOW);
    let end = (index + CONTEXT_WINDOW + 1).min(chars.len());
    chars[start..end].iter().collect::<String>().to_lowercase()
}

/// Whether a scalar falls in one of the emoji code-point blocks
/// (pictographs, emoticons, transport, flags, symbols).
pub fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F300..=0x1F5FF
        | 0x1F600..=0x1F64F
        | 0x1F680..=0x1F6FF
        | 0x1F900..=0x1F9FF
        | 0x1FA70..=0x1FAFF
        | 0x1F1E6..=0x1F1FF
        | 0x2600..=0x26FF
        | 0x2700..=0x27BF
        | 0x2B00..=0x2BFF)
}

// ============================================================================
// Tests
// ============================================================================

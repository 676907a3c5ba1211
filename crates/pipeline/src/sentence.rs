//! Sentence assembly from streamed deltas
//!
//! Response tokens arrive a few characters at a time. Synthesis wants
//! whole sentences, so deltas accumulate until terminal punctuation
//! (or a hard cap on buffered length, so a rambling unpunctuated
//! response still flows). The first sentence has a minimum length to
//! keep openers like "Dr." or "Ok." from producing a tiny clip.

/// Sentence-terminal punctuation, Latin and CJK
const TERMINATORS: &[char] = &['.', '!', '?', '\u{2026}', '\u{3002}', '\u{FF01}', '\u{FF1F}'];

/// Characters that stay attached to the sentence they close
const TRAILERS: &[char] = &['"', '\u{2019}', '\u{201D}', '\'', ')', ']', '\u{00BB}'];

#[derive(Debug, Clone)]
pub struct SplitterConfig {
    /// Minimum length of the first emitted sentence
    pub min_first_chars: usize,
    /// Force a flush once this much is buffered without a boundary
    pub max_buffer_chars: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        use voice_call_config::constants::sentence;
        Self {
            min_first_chars: sentence::MIN_FIRST_SENTENCE_CHARS,
            max_buffer_chars: sentence::MAX_BUFFER_CHARS,
        }
    }
}

/// Incremental splitter feeding the synthesis queue
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    config: SplitterConfig,
    buffer: String,
    emitted: usize,
}

impl SentenceSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            emitted: 0,
        }
    }

    /// Feed one delta; returns any sentences completed by it
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let mut out = Vec::new();

        loop {
            match self.find_boundary() {
                Some(end) => {
                    let sentence: String = self.buffer.drain(..end).collect();
                    let lead = self.buffer.len() - self.buffer.trim_start().len();
                    if lead > 0 {
                        self.buffer.drain(..lead);
                    }
                    let sentence = sentence.trim();
                    if !sentence.is_empty() {
                        self.emitted += 1;
                        out.push(sentence.to_string());
                    }
                }
                None => {
                    if self.buffer.chars().count() >= self.config.max_buffer_chars {
                        let overflow = std::mem::take(&mut self.buffer);
                        let overflow = overflow.trim();
                        if !overflow.is_empty() {
                            self.emitted += 1;
                            out.push(overflow.to_string());
                        }
                    }
                    break;
                }
            }
        }

        out
    }

    /// Emit whatever is left, terminated or not
    ///
    /// Called once the delta stream completes.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            self.emitted += 1;
            Some(rest.to_string())
        }
    }

    /// Unemitted text still buffered
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Byte offset one past the end of the first complete sentence
    fn find_boundary(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();

        while let Some((idx, ch)) = chars.next() {
            if !TERMINATORS.contains(&ch) {
                continue;
            }

            let next = chars.peek().map(|&(_, c)| c);
            if ch == '.' && !self.is_period_boundary(idx, next) {
                continue;
            }

            // Swallow runs like "..." or "?!" and closing quotes
            let base = idx + ch.len_utf8();
            let mut end = base;
            for (t_idx, t_ch) in self.buffer[base..].char_indices() {
                if TERMINATORS.contains(&t_ch) || TRAILERS.contains(&t_ch) {
                    end = base + t_idx + t_ch.len_utf8();
                } else {
                    break;
                }
            }

            if self.emitted == 0 {
                let len = self.buffer[..end].trim().chars().count();
                if len < self.config.min_first_chars {
                    continue;
                }
            }

            return Some(end);
        }

        None
    }

    /// A period inside a number ("3.14") or dangling after a digit at
    /// the buffer edge (more digits may still stream in) is not a
    /// sentence boundary.
    fn is_period_boundary(&self, idx: usize, next: Option<char>) -> bool {
        let prev_is_digit = self.buffer[..idx]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_digit());

        match next {
            Some(c) if c.is_ascii_digit() => false,
            Some(_) => true,
            None => !prev_is_digit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter() -> SentenceSplitter {
        SentenceSplitter::new(SplitterConfig {
            min_first_chars: 8,
            max_buffer_chars: 40,
        })
    }

    #[test]
    fn test_sentence_completes_across_deltas() {
        let mut s = splitter();
        assert!(s.push("Hello th").is_empty());
        assert!(s.push("ere, how are").is_empty());
        let out = s.push(" you? I am fine.");
        assert_eq!(out, vec!["Hello there, how are you?", "I am fine."]);
        assert!(s.pending().is_empty());
    }

    #[test]
    fn test_first_sentence_minimum_holds_short_opener() {
        let mut s = splitter();
        // "Ok." is under the 8-char minimum, so it rides along
        assert!(s.push("Ok. ").is_empty());
        let out = s.push("Let me check that for you. More");
        assert_eq!(out, vec!["Ok. Let me check that for you."]);
        assert_eq!(s.pending(), "More");
    }

    #[test]
    fn test_decimal_is_not_a_boundary() {
        let mut s = splitter();
        assert!(s.push("The total is 3.").is_empty());
        let out = s.push("14 dollars today. Next");
        assert_eq!(out, vec!["The total is 3.14 dollars today."]);
    }

    #[test]
    fn test_ellipsis_and_quotes_stay_attached() {
        let mut s = splitter();
        let out = s.push("She said \"wait here...\" Then left.");
        assert_eq!(out, vec!["She said \"wait here...\"", "Then left."]);
    }

    #[test]
    fn test_overflow_forces_flush() {
        let mut s = splitter();
        let out = s.push("one two three four five six seven eight nine");
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("one two"));
        assert!(s.pending().is_empty());
    }

    #[test]
    fn test_flush_drains_remainder() {
        let mut s = splitter();
        assert!(s.push("Sure thing").is_empty());
        assert_eq!(s.flush(), Some("Sure thing".to_string()));
        assert_eq!(s.flush(), None);
    }

    #[test]
    fn test_cjk_terminators() {
        let mut s = splitter();
        let out = s.push("\u{3053}\u{3093}\u{306B}\u{3061}\u{306F}\u{3001}\u{5143}\u{6C17}\u{3067}\u{3059}\u{3002}next");
        assert_eq!(out.len(), 1);
        assert!(out[0].ends_with('\u{3002}'));
    }
}

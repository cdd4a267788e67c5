//! Bounded output capture
//!
//! [`OutputCapture`] is a text sink with a hard UTF-8 byte budget.
//! [`LineFramer`] cuts a raw pipe into lines without ever buffering more than
//! a fixed amount, so that a worker printing megabytes without a newline
//! cannot grow the parent's memory.

/// Longest line the framer keeps before flushing it as a fragment
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Text sink that never holds more than `max_bytes` UTF-8 bytes
#[derive(Debug)]
pub struct OutputCapture {
    buf: String,
    max_bytes: usize,
    dropped: bool,
}

impl OutputCapture {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buf: String::new(),
            max_bytes,
            dropped: false,
        }
    }

    /// Append `s`, cutting it to the remaining budget.
    ///
    /// Returns the number of bytes accepted. The cut lands on a char boundary,
    /// so a partial write can stop up to three bytes short of the budget.
    pub fn write(&mut self, s: &str) -> usize {
        if s.is_empty() {
            return 0;
        }
        let remaining = self.remaining();
        if remaining == 0 {
            self.dropped = true;
            return 0;
        }

        let take = if s.len() <= remaining {
            s.len()
        } else {
            self.dropped = true;
            floor_char_boundary(s, remaining)
        };
        self.buf.push_str(&s[..take]);
        take
    }

    /// Lossily decode `bytes` and append them
    pub fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        self.write(&String::from_utf8_lossy(bytes))
    }

    /// True once the budget is used up or anything was dropped
    pub fn truncated(&self) -> bool {
        self.dropped || self.buf.len() >= self.max_bytes
    }

    pub fn remaining(&self) -> usize {
        self.max_bytes.saturating_sub(self.buf.len())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn contents(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// A piece of a byte stream produced by [`LineFramer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// A whole line, newline included (absent only on the final line)
    Line(&'a [u8]),
    /// Part of a line that was too long to buffer
    Fragment(&'a [u8]),
}

impl<'a> Frame<'a> {
    pub fn bytes(&self) -> &'a [u8] {
        match self {
            Frame::Line(b) | Frame::Fragment(b) => b,
        }
    }
}

/// Splits a byte stream into lines with a bounded pending buffer
#[derive(Debug)]
pub struct LineFramer {
    pending: Vec<u8>,
    max_line: usize,
    /// The pending bytes continue a line that was already partly flushed
    continuation: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineFramer {
    pub fn new(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line: max_line.max(4),
            continuation: false,
        }
    }

    /// Feed a chunk, calling `emit` for every frame it completes
    pub fn push(&mut self, mut chunk: &[u8], mut emit: impl FnMut(Frame<'_>)) {
        while !chunk.is_empty() {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let (line, rest) = chunk.split_at(pos + 1);
                    self.pending.extend_from_slice(line);
                    chunk = rest;
                    self.flush_line(&mut emit);
                }
                None => {
                    self.pending.extend_from_slice(chunk);
                    chunk = &[];
                }
            }
            while self.pending.len() > self.max_line {
                self.flush_fragment(&mut emit);
            }
        }
    }

    /// Emit whatever is left once the stream hits EOF
    pub fn finish(&mut self, mut emit: impl FnMut(Frame<'_>)) {
        if !self.pending.is_empty() {
            self.flush_line(&mut emit);
        }
    }

    fn flush_line(&mut self, emit: &mut impl FnMut(Frame<'_>)) {
        if self.continuation {
            emit(Frame::Fragment(&self.pending));
        } else {
            emit(Frame::Line(&self.pending));
        }
        self.pending.clear();
        self.continuation = false;
    }

    fn flush_fragment(&mut self, emit: &mut impl FnMut(Frame<'_>)) {
        // Do not split a UTF-8 sequence across two fragments
        let mut cut = self.max_line;
        while cut > 0 && (self.pending[cut] & 0xC0) == 0x80 {
            cut -= 1;
        }
        if cut == 0 {
            cut = self.max_line;
        }
        emit(Frame::Fragment(&self.pending[..cut]));
        self.pending.drain(..cut);
        self.continuation = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(framer: &mut LineFramer, chunks: &[&[u8]]) -> Vec<(bool, Vec<u8>)> {
        let mut frames = Vec::new();
        for chunk in chunks {
            framer.push(chunk, |f| {
                frames.push((matches!(f, Frame::Line(_)), f.bytes().to_vec()))
            });
        }
        framer.finish(|f| frames.push((matches!(f, Frame::Line(_)), f.bytes().to_vec())));
        frames
    }

    #[test]
    fn test_capture_within_budget() {
        let mut capture = OutputCapture::new(16);
        assert_eq!(capture.write("hello "), 6);
        assert_eq!(capture.write("world"), 5);
        assert_eq!(capture.contents(), "hello world");
        assert!(!capture.truncated());
    }

    #[test]
    fn test_capture_cuts_to_remaining_budget() {
        let mut capture = OutputCapture::new(8);
        assert_eq!(capture.write("12345"), 5);
        assert_eq!(capture.write("6789"), 3);
        assert_eq!(capture.contents(), "12345678");
        assert!(capture.truncated());
        assert_eq!(capture.write("more"), 0);
        assert_eq!(capture.len(), 8);
    }

    #[test]
    fn test_single_oversized_write() {
        let mut capture = OutputCapture::new(10);
        let big = "x".repeat(1000);
        assert_eq!(capture.write(&big), 10);
        assert_eq!(capture.len(), 10);
        assert!(capture.truncated());
    }

    #[test]
    fn test_counts_utf8_bytes_not_chars() {
        // Each 'é' is two bytes
        let mut capture = OutputCapture::new(5);
        let accepted = capture.write("ééé");
        assert_eq!(accepted, 4);
        assert_eq!(capture.contents(), "éé");
        assert!(capture.truncated());
        assert!(capture.len() <= capture.max_bytes());
    }

    #[test]
    fn test_exact_fill_is_truncated() {
        let mut capture = OutputCapture::new(3);
        capture.write("abc");
        assert!(capture.truncated());
        assert_eq!(capture.remaining(), 0);
    }

    #[test]
    fn test_budget_never_exceeded_for_mixed_writes() {
        let writes = ["a", "ßß", "", "日本語", "\n", "🎉🎉", "tail"];
        for budget in 1..24 {
            let mut capture = OutputCapture::new(budget);
            for w in writes.iter().cycle().take(40) {
                capture.write(w);
                assert!(capture.len() <= budget);
            }
        }
    }

    #[test]
    fn test_framer_splits_lines_across_chunks() {
        let mut framer = LineFramer::new(64);
        let frames = collect(&mut framer, &[b"ab", b"c\nde", b"f\n"]);
        assert_eq!(
            frames,
            vec![(true, b"abc\n".to_vec()), (true, b"def\n".to_vec())]
        );
    }

    #[test]
    fn test_framer_final_line_without_newline() {
        let mut framer = LineFramer::new(64);
        let frames = collect(&mut framer, &[b"one\ntwo"]);
        assert_eq!(frames.last(), Some(&(true, b"two".to_vec())));
    }

    #[test]
    fn test_framer_bounds_long_lines() {
        let mut framer = LineFramer::new(8);
        let long = vec![b'z'; 30];
        let frames = collect(&mut framer, &[long.as_slice(), b"\nok\n"]);

        assert!(frames.iter().all(|(_, bytes)| bytes.len() <= 9));
        // Every piece of the long line is a fragment, the next line is whole
        assert!(frames[..frames.len() - 1].iter().all(|(line, _)| !line));
        assert_eq!(frames.last(), Some(&(true, b"ok\n".to_vec())));
        let total: usize = frames.iter().map(|(_, b)| b.len()).sum();
        assert_eq!(total, 30 + 1 + 3);
    }

    #[test]
    fn test_framer_keeps_utf8_sequences_together() {
        let mut framer = LineFramer::new(5);
        let text = "ééééé\n".as_bytes();
        let frames = collect(&mut framer, &[text]);
        for (_, bytes) in &frames {
            assert!(std::str::from_utf8(bytes).is_ok());
        }
    }
}

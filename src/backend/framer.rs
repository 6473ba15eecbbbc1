//! Line framing for the raw serial byte stream
//!
//! The controller emits newline-terminated ASCII lines, but the
//! transport hands us arbitrary byte chunks: partial lines, several
//! lines at once, garbage from a noisy link. [`LineFramer`] turns that
//! stream into complete, cleaned-up lines while bounding memory:
//!
//! - a line is emitted only once its `\n` arrives; partial data is
//!   carried over between [`LineFramer::feed`] calls
//! - if the carry-over buffer grows past [`MAX_BUFFER_BYTES`] without a
//!   terminator, it is cut back to the bytes after the last seen
//!   terminator (or cleared if there is none)
//! - an individual line longer than [`MAX_LINE_BYTES`] keeps only its
//!   trailing bytes
//! - non-ASCII bytes are dropped, `\r` and surrounding whitespace are
//!   stripped, and empty lines are swallowed
//!
//! The output is identical no matter how the byte stream is chunked.

/// Maximum bytes buffered while waiting for a terminator (64 KiB)
pub const MAX_BUFFER_BYTES: usize = 64 * 1024;

/// Maximum bytes of a single logical line (4 KiB); longer lines keep
/// their tail
pub const MAX_LINE_BYTES: usize = 4 * 1024;

/// Stateful splitter from byte chunks to complete text lines
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently buffered waiting for a terminator
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Feed a chunk of bytes, returning every line completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        // Guard against runaway growth if '\n' never arrives
        if self.buf.len() > MAX_BUFFER_BYTES {
            match self.buf.iter().rposition(|&b| b == b'\n') {
                Some(last_nl) => {
                    self.buf.drain(..=last_nl);
                }
                None => self.buf.clear(),
            }
        }

        let mut lines = Vec::new();
        while let Some(nl_idx) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line_bytes: Vec<u8> = self.buf.drain(..=nl_idx).collect();
            line_bytes.pop(); // the '\n' itself

            // Oversized frame: keep the tail so parsing can resynchronize
            if line_bytes.len() > MAX_LINE_BYTES {
                line_bytes.drain(..line_bytes.len() - MAX_LINE_BYTES);
            }

            if let Some(line) = decode_line(&line_bytes) {
                lines.push(line);
            }
        }
        lines
    }
}

/// Decode line bytes as ASCII, dropping invalid bytes and stripping
/// `\r` and whitespace; `None` when nothing printable remains
fn decode_line(bytes: &[u8]) -> Option<String> {
    let text: String = bytes
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect();
    let trimmed = text.trim_matches('\r').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_complete_line() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"ADC:1.234\n"), vec!["ADC:1.234"]);
    }

    #[test]
    fn test_partial_line_carried_over() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"ADC:1.2").is_empty());
        assert_eq!(framer.feed(b"34\nPOS"), vec!["ADC:1.234"]);
        assert_eq!(framer.feed(b"ITION:5\n"), vec!["POSITION:5"]);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"A\nB\nC\n");
        assert_eq!(lines, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_crlf_and_whitespace_stripped() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"  D:1:2 \r\n"), vec!["D:1:2"]);
    }

    #[test]
    fn test_empty_lines_swallowed() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"\n\r\n   \n").is_empty());
    }

    #[test]
    fn test_non_ascii_bytes_dropped() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"AD\xffC:1\xfe.5\n"), vec!["ADC:1.5"]);
    }

    #[test]
    fn test_oversized_line_keeps_tail() {
        let mut framer = LineFramer::new();
        let mut data = vec![b'x'; MAX_LINE_BYTES + 100];
        data.extend_from_slice(b"TAIL\n");
        let lines = framer.feed(&data);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
        assert!(lines[0].ends_with("TAIL"));
    }

    #[test]
    fn test_unterminated_buffer_never_exceeds_ceiling() {
        let mut framer = LineFramer::new();
        for _ in 0..10 {
            assert!(framer.feed(&vec![b'y'; 20_000]).is_empty());
            assert!(framer.pending_len() <= MAX_BUFFER_BYTES);
        }
        // After a ceiling-triggered clear, only bytes after the
        // truncation point survive into the next line.
        let lines = framer.feed(b"!END\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("!END"));
        assert!(lines[0].len() <= MAX_LINE_BYTES);
    }

    #[test]
    fn test_ceiling_truncation_keeps_bytes_after_last_newline() {
        let mut framer = LineFramer::new();
        let mut data = vec![b'a'; MAX_BUFFER_BYTES];
        data.extend_from_slice(b"\nkeep-me");
        // One oversized chunk: the ceiling cut runs before line
        // extraction, so the 'a' flood is dropped wholesale.
        assert!(framer.feed(&data).is_empty());
        assert_eq!(framer.feed(b"\n"), vec!["keep-me"]);
    }

    proptest! {
        /// Feeding a stream in arbitrary chunk sizes yields exactly the
        /// same lines as feeding it in one block.
        #[test]
        fn prop_chunk_size_independence(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            splits in proptest::collection::vec(0usize..2048, 0..8),
        ) {
            let mut whole = LineFramer::new();
            let expected = whole.feed(&data);

            let mut cuts: Vec<usize> =
                splits.iter().map(|&s| s % (data.len() + 1)).collect();
            cuts.sort_unstable();
            let mut chunked = LineFramer::new();
            let mut got = Vec::new();
            let mut start = 0;
            for cut in cuts {
                got.extend(chunked.feed(&data[start..cut.max(start)]));
                start = cut.max(start);
            }
            got.extend(chunked.feed(&data[start..]));

            prop_assert_eq!(got, expected);
        }

        /// The carry-over buffer never grows past the ceiling, whatever
        /// terminator-free garbage arrives.
        #[test]
        fn prop_buffer_bounded(
            chunks in proptest::collection::vec(
                proptest::collection::vec(1u8..=b'z', 1..4096), 1..40)
        ) {
            let mut framer = LineFramer::new();
            for chunk in &chunks {
                let cleaned: Vec<u8> =
                    chunk.iter().copied().filter(|&b| b != b'\n').collect();
                framer.feed(&cleaned);
                prop_assert!(framer.pending_len() <= MAX_BUFFER_BYTES);
            }
        }
    }
}

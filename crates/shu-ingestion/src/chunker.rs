use shu_core::IngestionSettings;

const DEFAULT_CHUNK_SIZE: usize = 1000;
const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Fixed-window text splitter. Sizes count characters, never bytes, so
/// multi-byte text is never cut inside a code point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl Chunker {
    /// `size` is at least 1 and `overlap` always smaller than `size`.
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            overlap: overlap.min(size - 1),
        }
    }

    pub fn from_settings(settings: &IngestionSettings) -> Self {
        Self::new(settings.chunk_size, settings.chunk_overlap)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Consecutive windows of `size` chars, each starting `size - overlap`
    /// after the previous one. Whitespace-only windows are dropped.
    pub fn split(&self, text: &str) -> Vec<String> {
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_count = bounds.len() - 1;
        let step = self.size - self.overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < char_count {
            let end = (start + self.size).min(char_count);
            let chunk = &text[bounds[start]..bounds[end]];
            if !chunk.trim().is_empty() {
                chunks.push(chunk.to_string());
            }
            if end == char_count {
                break;
            }
            start += step;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunker = Chunker::default();
        assert_eq!(chunker.split("hello world"), vec!["hello world".to_string()]);
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("   \n ").is_empty());
    }

    #[test]
    fn test_windows_overlap() {
        let chunker = Chunker::new(4, 2);
        assert_eq!(chunker.split("abcdefgh"), vec!["abcd", "cdef", "efgh"]);
    }

    #[test]
    fn test_tail_window_is_kept() {
        let chunker = Chunker::new(4, 1);
        assert_eq!(chunker.split("abcdefghij"), vec!["abcd", "defg", "ghij"]);
        assert_eq!(chunker.split("abcdefgh"), vec!["abcd", "defg", "gh"]);
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let chunker = Chunker::new(3, 1);
        let chunks = chunker.split("日本語のテキスト");
        assert_eq!(chunks[0], "日本語");
        assert_eq!(chunks[1], "語のテ");
        assert!(chunks.iter().all(|c| c.chars().count() <= 3));
    }

    #[test]
    fn test_overlap_is_clamped() {
        let chunker = Chunker::new(3, 10);
        assert_eq!(chunker.overlap(), 2);
        assert_eq!(chunker.split("abcde"), vec!["abc", "bcd", "cde"]);

        let chunker = Chunker::new(0, 0);
        assert_eq!(chunker.size(), 1);
    }

    #[test]
    fn test_from_settings() {
        let settings = IngestionSettings::default();
        let chunker = Chunker::from_settings(&settings);
        assert_eq!(chunker, Chunker::default());
        assert_eq!(chunker.size(), 1000);
        assert_eq!(chunker.overlap(), 200);
    }
}

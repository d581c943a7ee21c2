use crate::error::CoreError;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_000,
            overlap_chars: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_chars == 0 {
            return Err(CoreError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(CoreError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: u32,
    pub text: String,
}

/// Collapses whitespace runs inside paragraphs while keeping the blank-line
/// paragraph separators that chunk boundaries prefer to cut at.
pub fn normalize_whitespace(text: &str) -> String {
    text.split("\n\n")
        .map(|paragraph| paragraph.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Splits text into ordered, overlapping spans. Deterministic for identical
/// input and config. Empty input yields an empty sequence; input shorter than
/// `max_chars` yields exactly one span. Offsets are char-indexed so multibyte
/// text is never split inside a code point.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<ChunkSpan>, CoreError> {
    config.validate()?;

    let cleaned = normalize_whitespace(text);
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = cleaned.chars().collect();
    if chars.len() <= config.max_chars {
        return Ok(vec![ChunkSpan {
            index: 0,
            text: cleaned,
        }]);
    }

    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut index = 0u32;

    loop {
        let hard_end = (start + config.max_chars).min(chars.len());
        let mut end = hard_end;

        if hard_end < chars.len() {
            // Prefer a paragraph break, then a sentence break, as long as the
            // cut lands past the midpoint of the window.
            if let Some(cut) = preferred_break(&chars[start..hard_end], config.max_chars / 2) {
                end = start + cut;
            }
        }

        spans.push(ChunkSpan {
            index,
            text: chars[start..end].iter().collect(),
        });
        index = index.saturating_add(1);

        if end == chars.len() {
            break;
        }
        // Overlap with the previous span, but always advance.
        start = end.saturating_sub(config.overlap_chars).max(start + 1);
    }

    Ok(spans)
}

fn preferred_break(window: &[char], min_pos: usize) -> Option<usize> {
    if let Some(pos) = find_last_pair(window, '\n', '\n') {
        if pos > min_pos {
            return Some(pos);
        }
    }
    if let Some(pos) = find_last_pair(window, '.', ' ') {
        if pos > min_pos {
            // Keep the period with the chunk it closes.
            return Some(pos + 1);
        }
    }
    None
}

fn find_last_pair(window: &[char], first: char, second: char) -> Option<usize> {
    (0..window.len().saturating_sub(1))
        .rev()
        .find(|&position| window[position] == first && window[position + 1] == second)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_chars: usize, overlap_chars: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chars,
            overlap_chars,
        }
    }

    #[test]
    fn whitespace_collapses_but_paragraph_breaks_survive() {
        let input = "A  \t lot\nof   spacing\n\n  second   paragraph ";
        assert_eq!(
            normalize_whitespace(input),
            "A lot of spacing\n\nsecond paragraph"
        );
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let spans = chunk_text("", &ChunkingConfig::default()).unwrap();
        assert!(spans.is_empty());

        let spans = chunk_text("   \n\n \t ", &ChunkingConfig::default()).unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let spans = chunk_text("incident response checklist", &ChunkingConfig::default()).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].index, 0);
        assert_eq!(spans[0].text, "incident response checklist");
    }

    #[test]
    fn overlap_at_least_max_is_a_config_error() {
        let result = chunk_text("anything", &config(100, 100));
        assert!(matches!(result, Err(CoreError::InvalidChunkConfig(_))));
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "Recovery steps. ".repeat(300);
        let first = chunk_text(&text, &ChunkingConfig::default()).unwrap();
        let second = chunk_text(&text, &ChunkingConfig::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn indices_are_contiguous_from_zero() {
        let text = "failover ".repeat(500);
        let spans = chunk_text(&text, &config(100, 20)).unwrap();
        assert!(spans.len() > 1);
        for (expected, span) in spans.iter().enumerate() {
            assert_eq!(span.index as usize, expected);
        }
    }

    #[test]
    fn consecutive_chunks_share_the_overlap() {
        // No sentence or paragraph breaks, so every cut is a hard cut.
        let text: String = ('a'..='z').cycle().take(2_500).collect();
        let spans = chunk_text(&text, &config(1_000, 200)).unwrap();
        assert!(spans.len() > 1);
        for pair in spans.windows(2) {
            let previous = &pair[0].text;
            let tail = &previous[previous.len() - 200..];
            assert!(pair[1].text.starts_with(tail));
        }
    }

    #[test]
    fn cuts_prefer_sentence_boundaries() {
        let sentence = "The generator takes over within thirty seconds. ";
        let text = sentence.repeat(60);
        let spans = chunk_text(&text, &config(200, 40)).unwrap();
        assert!(spans.len() > 1);
        assert!(spans[0].text.ends_with('.'));
        assert!(spans[0].text.chars().count() <= 200);
    }

    #[test]
    fn cuts_prefer_paragraph_boundaries_over_sentences() {
        let paragraph = "Power fails. Switch to backup feed.";
        let text = vec![paragraph; 20].join("\n\n");
        let spans = chunk_text(&text, &config(150, 30)).unwrap();
        assert!(spans.len() > 1);
        assert!(spans[0].text.ends_with("feed."));
    }

    #[test]
    fn multibyte_text_is_never_split_inside_a_code_point() {
        let text: String = "é".repeat(1_500);
        let spans = chunk_text(&text, &config(1_000, 100)).unwrap();
        assert!(spans.len() > 1);
        assert_eq!(spans[0].text.chars().count(), 1_000);
    }
}

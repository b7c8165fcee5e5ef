//! Word-budgeted text chunking with unit overlap.
//!
//! Extracted text is split into retrieval units: paragraphs when the text
//! has blank-line structure, sentences otherwise. Units are accumulated
//! into chunks under a word budget, and each chunk seeds its successor with
//! its trailing units so context survives the boundary.

use std::sync::LazyLock;

use regex::Regex;

static HORIZONTAL_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("static regex"));
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("static regex"));

/// Chunking parameters.
///
/// `min_words` is a soft floor: a chunk that would close under it instead
/// absorbs the overflowing unit, accepting a temporary overshoot past
/// `max_words`. This bias toward oversized over undersized chunks is a
/// deliberate retrieval-granularity choice.
#[derive(Clone, Copy, Debug)]
pub struct ChunkerConfig {
    pub min_words: usize,
    pub max_words: usize,
    /// Number of trailing units carried into the next chunk.
    pub overlap_units: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_words: 200,
            max_words: 400,
            overlap_units: 1,
        }
    }
}

/// Splits raw text into overlapping retrieval chunks.
#[derive(Clone, Copy, Debug, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Splits `text` into chunk strings.
    ///
    /// Empty or whitespace-only input yields an empty vec. A single unit
    /// longer than `max_words` is emitted as its own chunk; units are never
    /// split internally.
    pub fn split(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let paragraphs: Vec<&str> = normalized
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let (units, joiner) = if paragraphs.len() > 1 {
            (paragraphs, "\n\n")
        } else {
            (split_sentences(&normalized), " ")
        };
        if units.is_empty() {
            return Vec::new();
        }

        let overlap = self.config.overlap_units;
        let mut acc = Accumulator {
            chunks: Vec::new(),
            current: Vec::new(),
            current_words: 0,
            fresh: 0,
        };

        for unit in units {
            let unit_words = count_words(unit);

            if acc.current.is_empty() {
                acc.append(unit, unit_words);
                continue;
            }

            if acc.current_words + unit_words <= self.config.max_words {
                acc.append(unit, unit_words);
                continue;
            }

            if acc.current_words < self.config.min_words {
                // Undersized chunk absorbs the overflow and closes.
                acc.append(unit, unit_words);
                acc.close(joiner, overlap);
                continue;
            }

            acc.close(joiner, overlap);
            acc.current.push(unit);
            // The word budget restarts at the carried unit; the overlap
            // seed rides along uncounted.
            acc.current_words = unit_words;
            acc.fresh += 1;
        }

        if acc.fresh > 0 && !acc.current.is_empty() {
            acc.chunks.push(acc.current.join(joiner));
        }

        acc.chunks
    }
}

struct Accumulator<'a> {
    chunks: Vec<String>,
    current: Vec<&'a str>,
    current_words: usize,
    /// Units appended since the last close; the overlap seed alone never
    /// forms a chunk.
    fresh: usize,
}

impl<'a> Accumulator<'a> {
    fn append(&mut self, unit: &'a str, unit_words: usize) {
        if self.current.is_empty() {
            self.current_words = unit_words;
        } else {
            self.current_words += unit_words;
        }
        self.current.push(unit);
        self.fresh += 1;
    }

    /// Emits the current chunk and seeds the next one with the trailing
    /// `overlap` units, recounting the word baseline from the seed.
    fn close(&mut self, joiner: &str, overlap: usize) {
        if self.current.is_empty() {
            return;
        }
        self.chunks.push(self.current.join(joiner));
        if overlap > 0 {
            let keep_from = self.current.len().saturating_sub(overlap);
            self.current.drain(..keep_from);
            self.current_words = self.current.iter().map(|u| count_words(u)).sum();
        } else {
            self.current.clear();
            self.current_words = 0;
        }
        self.fresh = 0;
    }
}

fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    HORIZONTAL_WS.replace_all(&unified, " ").trim().to_string()
}

/// A sentence unit ends at `.`, `!`, or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0;
    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        // The terminator is a single ASCII byte; keep it with the unit.
        let end = boundary.start() + 1;
        let unit = text[start..end].trim();
        if !unit.is_empty() {
            units.push(unit);
        }
        start = boundary.end();
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        units.push(tail);
    }
    units
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn para(tag: &str, words: usize) -> String {
        (0..words)
            .map(|i| format!("{tag}{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn chunker(min_words: usize, max_words: usize, overlap_units: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            min_words,
            max_words,
            overlap_units,
        })
    }

    #[test]
    fn empty_and_whitespace_input_yield_nothing() {
        let c = Chunker::default();
        assert!(c.split("").is_empty());
        assert!(c.split("   \n\t \r\n ").is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let c = Chunker::default();
        let chunks = c.split("Uma frase curta. Outra frase curta.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Uma frase curta. Outra frase curta.");
    }

    #[test]
    fn paragraphs_are_preferred_units_and_rejoined_with_blank_lines() {
        let text = format!("{}\n\n{}", para("alpha", 20), para("beta", 20));
        let chunks = chunker(10, 200, 0).split(&text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("\n\n"));
    }

    #[test]
    fn single_paragraph_falls_back_to_sentences() {
        let text = "Primeira frase aqui. Segunda frase aqui! Terceira frase aqui?";
        let chunks = chunker(2, 6, 1).split(text);
        assert!(chunks.len() > 1, "expected sentence-level splitting");
        assert!(chunks[0].starts_with("Primeira frase aqui."));
        // Sentence units rejoin with a single space, never a blank line.
        assert!(chunks.iter().all(|c| !c.contains("\n\n")));
    }

    #[test]
    fn undersized_chunk_force_merges_the_overflowing_paragraph() {
        // First paragraph under min_words, pair over max_words: both land
        // in one chunk, and the carried overlap seed emits nothing extra.
        let text = format!("{}\n\n{}", para("a", 70), para("b", 100));
        let chunks = chunker(80, 150, 1).split(&text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("a0"));
        assert!(chunks[0].contains("b99"));
    }

    #[test]
    fn overlap_repeats_the_last_unit_at_the_next_chunk_start() {
        let paragraphs: Vec<String> = (0..8).map(|i| para(&format!("p{i}x"), 120)).collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunker(200, 400, 1).split(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_unit = pair[0].split("\n\n").last().unwrap();
            let first_unit = pair[1].split("\n\n").next().unwrap();
            assert_eq!(last_unit, first_unit);
        }
    }

    #[test]
    fn no_overlap_means_disjoint_chunks() {
        let paragraphs: Vec<String> = (0..6).map(|i| para(&format!("q{i}x"), 120)).collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunker(200, 400, 0).split(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_unit = pair[0].split("\n\n").last().unwrap();
            let first_unit = pair[1].split("\n\n").next().unwrap();
            assert_ne!(last_unit, first_unit);
        }
    }

    #[test]
    fn a_run_on_unit_longer_than_max_is_emitted_whole() {
        // No sentence terminators and no blank lines: one giant unit.
        let text = para("longrun", 500);
        let chunks = chunker(200, 400, 1).split(&text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(count_words(&chunks[0]), 500);
    }

    #[test]
    fn every_chunk_meets_the_floor_unless_final_or_oversized_unit() {
        let paragraphs: Vec<String> = (0..12)
            .map(|i| para(&format!("w{i}n"), 90 + (i * 37) % 120))
            .collect();
        let text = paragraphs.join("\n\n");
        let cfg = ChunkerConfig {
            min_words: 200,
            max_words: 400,
            overlap_units: 1,
        };
        let chunks = Chunker::new(cfg).split(&text);
        assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            let words = count_words(chunk);
            let is_final = i == chunks.len() - 1;
            let is_single_oversized_unit =
                chunk.split("\n\n").count() == 1 && words > cfg.max_words;
            assert!(
                words >= cfg.min_words || is_final || is_single_oversized_unit,
                "chunk {i} has {words} words"
            );
        }
    }

    #[test]
    fn windows_line_endings_are_normalized() {
        let text = format!("{}\r\n\r\n{}", para("r", 30), para("s", 30));
        let chunks = chunker(10, 200, 1).split(&text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("\n\n"));
        assert!(!chunks[0].contains('\r'));
    }
}

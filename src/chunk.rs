//! Row serialization and recursive character chunking.
//!
//! Each table row becomes one document of newline-joined `"column: value"`
//! pairs. Documents are then split into windows of at most `chunk_size`
//! characters with `chunk_overlap` characters carried between neighbours.
//!
//! # Algorithm
//!
//! 1. Pick the first separator (paragraph break, line break, period, comma,
//!    space, then the empty string) that occurs in the text.
//! 2. Cut the text in front of every occurrence, so the separator stays at
//!    the start of the following piece.
//! 3. Greedily merge pieces shorter than `chunk_size` into windows. When a
//!    window is flushed, pieces are dropped from its front until at most
//!    `chunk_overlap` characters remain to seed the next window.
//! 4. Pieces that are themselves too long are split again with the
//!    remaining, finer separators. The empty separator splits into single
//!    characters, so no window ever exceeds `chunk_size`.
//!
//! Lengths are counted in Unicode scalar values. Window text is trimmed and
//! empty windows are dropped.
//!
//! Each chunk gets a deterministic UUIDv5 derived from its row, position
//! and the SHA-256 of its text, so the same table always yields the same
//! chunk sequence.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::models::{Chunk, Table};

/// Separators tried in order: paragraph, line, sentence, clause, word, character.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ".", ",", " ", ""];

/// One serialized table row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDocument {
    pub row_index: i64,
    pub text: String,
}

/// Serialize every row as `"column: value"` lines in column order.
pub fn row_documents(table: &Table) -> Result<Vec<RowDocument>> {
    if table.is_empty() {
        return Err(RagError::EmptyInput(
            "table has no rows; provide a file with at least one data row".to_string(),
        ));
    }

    Ok(table
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| RowDocument {
            row_index: i as i64,
            text: table
                .columns
                .iter()
                .zip(row.iter())
                .map(|(col, cell)| format!("{}: {}", col, cell))
                .collect::<Vec<_>>()
                .join("\n"),
        })
        .collect())
}

/// Recursive character splitter with overlap.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split `text` into trimmed, non-empty windows.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];
        for (i, s) in separators.iter().enumerate() {
            if s.is_empty() {
                separator = "";
                break;
            }
            if text.contains(s.as_str()) {
                separator = s.as_str();
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting));
                fitting.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }
        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut windows = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                if let Some(window) = join_trimmed(&current) {
                    windows.push(window);
                }
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(dropped) => total -= char_len(dropped),
                        None => break,
                    }
                }
            }
            current.push_back(piece);
            total += len;
        }

        if let Some(window) = join_trimmed(&current) {
            windows.push(window);
        }
        windows
    }
}

/// Cut `text` in front of every occurrence of `separator`. The empty
/// separator yields single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn join_trimmed(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Serialize and split a whole table into chunks, in row order.
pub fn chunk_table(table: &Table, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    let splitter = TextSplitter::from_config(config);
    let mut chunks = Vec::new();

    for doc in row_documents(table)? {
        for (i, text) in splitter.split(&doc.text).into_iter().enumerate() {
            chunks.push(make_chunk(doc.row_index, i as i64, text));
        }
    }

    if chunks.is_empty() {
        return Err(RagError::EmptyInput(
            "table rows produced no text to index".to_string(),
        ));
    }

    tracing::debug!(chunks = chunks.len(), rows = table.row_count(), "chunked table");
    Ok(chunks)
}

fn make_chunk(row_index: i64, chunk_index: i64, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}:{}", row_index, chunk_index, hash).as_bytes(),
    );

    Chunk {
        id: id.to_string(),
        row_index,
        chunk_index,
        text,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;

    fn scores() -> Table {
        Table {
            columns: vec!["name".into(), "score".into()],
            rows: vec![
                vec![Cell::Text("A".into()), Cell::Number(10.0)],
                vec![Cell::Text("B".into()), Cell::Number(20.0)],
            ],
        }
    }

    #[test]
    fn test_rows_serialize_in_column_order() {
        let docs = row_documents(&scores()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "name: A\nscore: 10");
        assert_eq!(docs[1].text, "name: B\nscore: 20");
    }

    #[test]
    fn test_empty_table_is_empty_input() {
        let table = Table {
            columns: vec!["name".into()],
            rows: vec![],
        };
        assert!(matches!(
            row_documents(&table),
            Err(RagError::EmptyInput(_))
        ));
        assert!(matches!(
            chunk_table(&table, &ChunkingConfig::default()),
            Err(RagError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_small_rows_one_chunk_each() {
        let chunks = chunk_table(&scores(), &ChunkingConfig::default()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].row_index, 1);
        assert_eq!(chunks[1].chunk_index, 0);
        assert!(chunks[1].text.contains("20"));
    }

    #[test]
    fn test_separator_kept_at_start_of_next_piece() {
        assert_eq!(
            split_keeping_separator("a\nb\nc", "\n"),
            vec!["a", "\nb", "\nc"]
        );
        assert_eq!(split_keeping_separator("\n\nx", "\n\n"), vec!["\n\nx"]);
        assert_eq!(split_keeping_separator("héj", ""), vec!["h", "é", "j"]);
    }

    #[test]
    fn test_prefers_line_breaks() {
        let splitter = TextSplitter::new(12, 0);
        let chunks = splitter.split("alpha: 1\nbeta: 2\ngamma: 3");
        assert_eq!(chunks, vec!["alpha: 1", "beta: 2", "gamma: 3"]);
    }

    #[test]
    fn test_word_boundaries_before_characters() {
        let splitter = TextSplitter::new(11, 0);
        let chunks = splitter.split("one two three four");
        assert_eq!(chunks, vec!["one two", "three four"]);
    }

    #[test]
    fn test_overlap_carries_trailing_words() {
        let splitter = TextSplitter::new(10, 5);
        let chunks = splitter.split("aa bb cc dd ee");
        assert_eq!(chunks, vec!["aa bb cc", "cc dd ee"]);
    }

    #[test]
    fn test_indivisible_word_falls_back_to_characters() {
        let splitter = TextSplitter::new(4, 0);
        let chunks = splitter.split("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_no_chunk_exceeds_window() {
        let text = (0..200)
            .map(|i| format!("field_{}: value number {}, more text. end", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let splitter = TextSplitter::new(500, 50);
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 500, "chunk too long: {}", c.len());
            assert!(!c.is_empty());
        }
    }

    #[test]
    fn test_multibyte_lengths_counted_in_chars() {
        let splitter = TextSplitter::new(5, 0);
        let chunks = splitter.split("ééééééé");
        assert_eq!(chunks, vec!["ééééé", "éé"]);
    }

    #[test]
    fn test_long_row_splits_with_contiguous_indices() {
        let table = Table {
            columns: vec!["notes".into()],
            rows: vec![vec![Cell::Text("word ".repeat(300))]],
        };
        let chunks = chunk_table(&table, &ChunkingConfig::default()).unwrap();
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.row_index, 0);
            assert!(c.text.chars().count() <= 500);
        }
    }

    #[test]
    fn test_deterministic() {
        let c1 = chunk_table(&scores(), &ChunkingConfig::default()).unwrap();
        let c2 = chunk_table(&scores(), &ChunkingConfig::default()).unwrap();
        assert_eq!(c1, c2);
    }
}

//! Core data models used throughout sheet-rag.
//!
//! These types represent the tables, chunks, retrieval hits and chat
//! entries that flow through the load → chunk → index → answer pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single scalar value from a CSV or spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Bool(true) => f.write_str("TRUE"),
            Cell::Bool(false) => f.write_str("FALSE"),
        }
    }
}

/// An in-memory table: named columns plus rows of equal width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A bounded-length piece of a serialized row.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    /// 0-based source row.
    pub row_index: i64,
    /// Position of this chunk within its row.
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// One question/answer exchange in a user's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Local time, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    pub question: String,
    pub answer: String,
}

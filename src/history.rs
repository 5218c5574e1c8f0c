//! Per-user chat transcripts stored as JSON.
//!
//! Each user has one file, `<dir>/<user>_chat_history.json`, holding a
//! pretty-printed array of [`ChatEntry`] in the order they were asked.
//! An exact `(question, answer)` pair is stored at most once per user.
//!
//! Writes go through a temporary file and a rename while an advisory lock
//! on the sibling `.lock` file is held, so two processes never interleave
//! partial writes.

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};
use crate::lock::FileLock;
use crate::models::ChatEntry;

/// Format of [`ChatEntry::timestamp`] and export dates.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// One page of a longer listing. Pages are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    /// 0-based offset of the first item in the full listing.
    pub start: usize,
}

/// Shape of `history export` output.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryExport {
    pub user: String,
    pub export_date: String,
    pub total_conversations: usize,
    pub conversations: Vec<ChatEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStats {
    pub total: usize,
    /// `YYYY-MM-DD` of the earliest entry.
    pub first_chat: Option<String>,
    pub latest_chat: Option<String>,
}

/// Directory holding every user's history file.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File backing `user`'s history.
    pub fn path_for(&self, user: &str) -> Result<PathBuf> {
        validate_user(user)?;
        Ok(self.dir.join(format!("{}_chat_history.json", user)))
    }

    /// Read `user`'s history; a missing file is an empty history.
    pub fn load(&self, user: &str) -> Result<ChatHistory> {
        let path = self.path_for(user)?;
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| RagError::PersistenceError(format!("{}: {}", path.display(), e)))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    RagError::PersistenceError(format!("{}: {}", path.display(), e))
                })?
            }
        } else {
            Vec::new()
        };

        tracing::debug!(user, entries = entries.len(), "loaded chat history");
        Ok(ChatHistory {
            user: user.to_string(),
            path,
            entries,
        })
    }
}

fn validate_user(user: &str) -> Result<()> {
    let valid = !user.is_empty()
        && !user.starts_with('.')
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RagError::InvalidUser(user.to_string()))
    }
}

/// One user's transcript, bound to its file.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    user: String,
    path: PathBuf,
    entries: Vec<ChatEntry>,
}

impl ChatHistory {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append the pair unless it is already present, then persist.
    ///
    /// Returns `false` (and writes nothing) for an exact duplicate.
    pub fn record(&mut self, question: &str, answer: &str) -> Result<bool> {
        let duplicate = self
            .entries
            .iter()
            .any(|e| e.question == question && e.answer == answer);
        if duplicate {
            tracing::debug!(user = %self.user, "skipping duplicate chat entry");
            return Ok(false);
        }

        let mut updated = self.entries.clone();
        updated.push(ChatEntry {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
        });
        self.write(&updated)?;
        self.entries = updated;
        Ok(true)
    }

    /// Write every entry to the user's file.
    pub fn persist(&self) -> Result<()> {
        self.write(&self.entries)
    }

    /// Write `entries` to the user's file. In-memory state is only replaced
    /// by callers once this succeeds.
    fn write(&self, entries: &[ChatEntry]) -> Result<()> {
        let _lock = FileLock::acquire(&self.path)?;

        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| RagError::PersistenceError(e.to_string()))?;

        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        fs::write(&tmp, json)
            .map_err(|e| RagError::PersistenceError(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| RagError::PersistenceError(format!("{}: {}", self.path.display(), e)))?;

        tracing::debug!(user = %self.user, entries = entries.len(), "persisted chat history");
        Ok(())
    }

    /// Remove the entry at `index` (oldest-first position) and persist.
    pub fn delete(&mut self, index: usize) -> Result<ChatEntry> {
        if index >= self.entries.len() {
            return Err(RagError::HistoryIndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        let mut updated = self.entries.clone();
        let removed = updated.remove(index);
        self.write(&updated)?;
        self.entries = updated;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.write(&[])?;
        self.entries.clear();
        Ok(())
    }

    /// Entries whose question or answer contains `term`, ignoring case.
    /// Each hit carries its position in [`entries`](Self::entries).
    pub fn search(&self, term: &str) -> Vec<(usize, &ChatEntry)> {
        let needle = term.to_lowercase();
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.question.to_lowercase().contains(&needle)
                    || e.answer.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// All entries with their positions, in the requested order.
    pub fn sorted(&self, order: SortOrder) -> Vec<(usize, &ChatEntry)> {
        let mut all: Vec<_> = self.entries.iter().enumerate().collect();
        if order == SortOrder::NewestFirst {
            all.reverse();
        }
        all
    }

    pub fn export(&self) -> HistoryExport {
        HistoryExport {
            user: self.user.clone(),
            export_date: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            total_conversations: self.entries.len(),
            conversations: self.entries.clone(),
        }
    }

    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.export())
            .map_err(|e| RagError::PersistenceError(e.to_string()))
    }

    pub fn stats(&self) -> HistoryStats {
        let dates: Vec<NaiveDateTime> = self
            .entries
            .iter()
            .filter_map(|e| NaiveDateTime::parse_from_str(&e.timestamp, TIMESTAMP_FORMAT).ok())
            .collect();
        let day = |d: &NaiveDateTime| d.format("%Y-%m-%d").to_string();

        HistoryStats {
            total: self.entries.len(),
            first_chat: dates.iter().min().map(day),
            latest_chat: dates.iter().max().map(day),
        }
    }
}

/// Slice `items` into the 1-based `page` of size `per_page`.
///
/// Out-of-range pages are clamped to the nearest valid page; an empty
/// listing has a single empty page.
pub fn paginate<T>(items: Vec<T>, page: usize, per_page: usize) -> Page<T> {
    let per_page = per_page.max(1);
    let total_items = items.len();
    let total_pages = if total_items == 0 {
        1
    } else {
        (total_items - 1) / per_page + 1
    };
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * per_page;

    Page {
        items: items.into_iter().skip(start).take(per_page).collect(),
        page,
        total_pages,
        total_items,
        start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(ts: &str, q: &str, a: &str) -> ChatEntry {
        ChatEntry {
            timestamp: ts.into(),
            question: q.into(),
            answer: a.into(),
        }
    }

    #[test]
    fn test_user_names() {
        let store = HistoryStore::new("chat_history");
        assert_eq!(
            store.path_for("alice").unwrap(),
            PathBuf::from("chat_history/alice_chat_history.json")
        );
        assert!(store.path_for("bob.smith-2").is_ok());
        for bad in ["", "../etc", ".hidden", "a/b", "with space"] {
            assert!(
                matches!(store.path_for(bad), Err(RagError::InvalidUser(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_load_missing_is_empty() {
        let tmp = TempDir::new().unwrap();
        let history = HistoryStore::new(tmp.path()).load("alice").unwrap();
        assert!(history.is_empty());
        assert!(!history.path().exists());
    }

    #[test]
    fn test_record_deduplicates_and_persists() {
        let tmp = TempDir::new().unwrap();
        let store = HistoryStore::new(tmp.path().join("chat_history"));
        let mut history = store.load("alice").unwrap();

        assert!(history.record("q", "a").unwrap());
        assert!(!history.record("q", "a").unwrap());
        assert!(history.record("q", "b").unwrap());
        assert_eq!(history.len(), 2);

        let reloaded = store.load("alice").unwrap();
        assert_eq!(reloaded.entries(), history.entries());
        assert_eq!(reloaded.entries()[1].answer, "b");

        let raw = fs::read_to_string(history.path()).unwrap();
        assert!(raw.starts_with("[\n  {"));
    }

    #[test]
    fn test_delete_and_clear() {
        let tmp = TempDir::new().unwrap();
        let store = HistoryStore::new(tmp.path());
        let mut history = store.load("bob").unwrap();
        history.record("q1", "a1").unwrap();
        history.record("q2", "a2").unwrap();

        assert!(matches!(
            history.delete(5),
            Err(RagError::HistoryIndexOutOfRange { index: 5, len: 2 })
        ));
        let removed = history.delete(0).unwrap();
        assert_eq!(removed.question, "q1");
        assert_eq!(store.load("bob").unwrap().len(), 1);

        history.clear().unwrap();
        assert!(store.load("bob").unwrap().is_empty());
    }

    #[test]
    fn test_delete_middle_entry_preserves_order() {
        let tmp = TempDir::new().unwrap();
        let store = HistoryStore::new(tmp.path());
        let mut history = store.load("dana").unwrap();
        for i in 0..4 {
            history.record(&format!("q{}", i), &format!("a{}", i)).unwrap();
        }
        let before = history.entries().to_vec();

        let removed = history.delete(1).unwrap();
        assert_eq!(removed, before[1]);

        let reloaded = store.load("dana").unwrap();
        assert_eq!(
            reloaded.entries(),
            &[before[0].clone(), before[2].clone(), before[3].clone()]
        );
        assert_eq!(reloaded.entries(), history.entries());
    }

    #[test]
    fn test_failed_write_leaves_history_unchanged() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        fs::write(&blocker, "plain file").unwrap();
        let store = HistoryStore::new(blocker.join("chat_history"));
        let mut history = store.load("erin").unwrap();

        assert!(matches!(
            history.record("q", "a"),
            Err(RagError::PersistenceError(_))
        ));
        assert!(history.is_empty());
        assert!(matches!(
            history.record("q", "a"),
            Err(RagError::PersistenceError(_))
        ));
        assert!(history.is_empty());

        fs::remove_file(&blocker).unwrap();
        assert!(history.record("q", "a").unwrap());
        assert_eq!(store.load("erin").unwrap().len(), 1);

        fs::remove_dir_all(&blocker).unwrap();
        fs::write(&blocker, "plain file").unwrap();
        assert!(history.delete(0).is_err());
        assert!(history.clear().is_err());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let history = ChatHistory {
            user: "u".into(),
            path: PathBuf::from("unused.json"),
            entries: vec![
                entry("2024-01-01 10:00:00", "Who scored 20?", "B did."),
                entry("2024-01-02 10:00:00", "Average score?", "15"),
                entry("2024-01-03 10:00:00", "Top player", "Player b"),
            ],
        };
        let hits: Vec<usize> = history.search("b").iter().map(|(i, _)| *i).collect();
        assert_eq!(hits, vec![0, 2]);
        assert!(history.search("missing").is_empty());
    }

    #[test]
    fn test_sorted_keeps_original_positions() {
        let history = ChatHistory {
            user: "u".into(),
            path: PathBuf::from("unused.json"),
            entries: vec![
                entry("2024-01-01 10:00:00", "first", "1"),
                entry("2024-01-02 10:00:00", "second", "2"),
            ],
        };
        let newest = history.sorted(SortOrder::NewestFirst);
        assert_eq!(newest[0].0, 1);
        assert_eq!(newest[0].1.question, "second");
        let oldest = history.sorted(SortOrder::OldestFirst);
        assert_eq!(oldest[0].0, 0);
    }

    #[test]
    fn test_paginate() {
        let page = paginate((0..12).collect::<Vec<_>>(), 2, 5);
        assert_eq!(page.items, vec![5, 6, 7, 8, 9]);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.start, 5);

        let last = paginate((0..12).collect::<Vec<_>>(), 99, 5);
        assert_eq!(last.page, 3);
        assert_eq!(last.items, vec![10, 11]);

        let empty = paginate(Vec::<u8>::new(), 1, 10);
        assert_eq!(empty.total_pages, 1);
        assert!(empty.items.is_empty());
    }

    #[test]
    fn test_stats_and_export() {
        let history = ChatHistory {
            user: "carol".into(),
            path: PathBuf::from("unused.json"),
            entries: vec![
                entry("2024-03-05 09:00:00", "q1", "a1"),
                entry("2024-01-02 18:30:00", "q2", "a2"),
            ],
        };
        let stats = history.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.first_chat.as_deref(), Some("2024-01-02"));
        assert_eq!(stats.latest_chat.as_deref(), Some("2024-03-05"));

        let json: serde_json::Value = serde_json::from_str(&history.export_json().unwrap()).unwrap();
        assert_eq!(json["user"], "carol");
        assert_eq!(json["total_conversations"], 2);
        assert_eq!(json["conversations"][1]["question"], "q2");
    }
}

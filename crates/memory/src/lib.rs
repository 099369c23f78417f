//! Flat-file memory store.
//!
//! Layout under the configured memory directory:
//!
//! ```text
//! memory/
//!   YYYY-MM-DD.md       # daily notes, one per day
//! MEMORY.md             # long-term memory
//! ```
//!
//! Daily appends carry an `### HH:MM:SS` heading; long-term appends carry
//! an HTML-comment timestamp. No file may exceed `max_file_size` bytes —
//! violating writes error and leave the file unchanged.

use chrono::{Duration, Local, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use relayclaw_core::error::MemoryError;

const LONGTERM_FILE: &str = "MEMORY.md";
const DAILY_DIR: &str = "memory";

/// Which document a search hit came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteRef {
    Daily(String),
    LongTerm,
}

impl std::fmt::Display for NoteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoteRef::Daily(date) => write!(f, "[Daily Note {date}]"),
            NoteRef::LongTerm => write!(f, "[Long-term Memory]"),
        }
    }
}

/// The flat-file note store. A disabled store answers every read with
/// empty content and refuses writes.
pub struct MemoryStore {
    /// None = memory disabled.
    memory_dir: Option<PathBuf>,
    max_file_size: usize,
}

impl MemoryStore {
    /// Create the store, making the directory layout if enabled.
    pub fn new(
        enabled: bool,
        memory_dir: impl Into<PathBuf>,
        max_file_size: usize,
    ) -> Result<Self, MemoryError> {
        if !enabled {
            return Ok(Self {
                memory_dir: None,
                max_file_size,
            });
        }

        let dir = memory_dir.into();
        std::fs::create_dir_all(dir.join(DAILY_DIR))
            .map_err(|e| MemoryError::Storage(format!("failed to create memory dir: {e}")))?;

        debug!(dir = %dir.display(), "memory store ready");
        Ok(Self {
            memory_dir: Some(dir),
            max_file_size,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.memory_dir.is_some()
    }

    fn dir(&self) -> Result<&Path, MemoryError> {
        self.memory_dir.as_deref().ok_or(MemoryError::Disabled)
    }

    fn daily_path(&self, date: &str) -> Result<PathBuf, MemoryError> {
        Ok(self.dir()?.join(DAILY_DIR).join(format!("{date}.md")))
    }

    /// Today's date in the local timezone, `YYYY-MM-DD`.
    pub fn today() -> String {
        Local::now().format("%Y-%m-%d").to_string()
    }

    /// Read one day's note. Missing file reads as empty.
    pub fn read_daily(&self, date: &str) -> Result<String, MemoryError> {
        let path = self.daily_path(date)?;
        read_or_empty(&path)
    }

    /// Append a timestamped section to one day's note. Errors if the
    /// existing file already exceeds the size cap, leaving it unchanged.
    pub fn write_daily(&self, date: &str, content: &str) -> Result<(), MemoryError> {
        let path = self.daily_path(date)?;

        if let Ok(meta) = std::fs::metadata(&path) {
            if meta.len() as usize > self.max_file_size {
                return Err(MemoryError::TooLarge {
                    max: self.max_file_size,
                });
            }
        }

        let stamp = Local::now().format("%H:%M:%S");
        let entry = format!("\n### {stamp}\n\n{content}\n");

        let mut existing = read_or_empty(&path)?;
        existing.push_str(&entry);
        std::fs::write(&path, existing)
            .map_err(|e| MemoryError::Storage(format!("failed to write daily note: {e}")))?;

        info!(date, "daily note written");
        Ok(())
    }

    /// Concatenate the last N days' notes, newest first, with date headings
    /// and horizontal-rule separators.
    pub fn daily_notes(&self, days: u32) -> String {
        if self.memory_dir.is_none() {
            return String::new();
        }

        let mut out = String::new();
        let today = Local::now().date_naive();
        for i in 0..days {
            let date = (today - Duration::days(i as i64))
                .format("%Y-%m-%d")
                .to_string();
            if let Ok(content) = self.read_daily(&date) {
                if !content.is_empty() {
                    if !out.is_empty() {
                        out.push_str("\n\n---\n\n");
                    }
                    out.push_str(&format!("## {date}\n\n{content}"));
                }
            }
        }
        out
    }

    /// Read the long-term note. Missing file reads as empty.
    pub fn read_longterm(&self) -> Result<String, MemoryError> {
        let path = self.dir()?.join(LONGTERM_FILE);
        read_or_empty(&path)
    }

    /// Replace the long-term note, size-capped.
    pub fn write_longterm(&self, content: &str) -> Result<(), MemoryError> {
        if content.len() > self.max_file_size {
            return Err(MemoryError::TooLarge {
                max: self.max_file_size,
            });
        }
        let path = self.dir()?.join(LONGTERM_FILE);
        std::fs::write(&path, content)
            .map_err(|e| MemoryError::Storage(format!("failed to write memory file: {e}")))?;
        info!("long-term memory written");
        Ok(())
    }

    /// Append to the long-term note with an HTML-comment timestamp.
    pub fn append_longterm(&self, content: &str) -> Result<(), MemoryError> {
        let existing = self.read_longterm()?;

        let mut combined = String::new();
        if !existing.is_empty() {
            combined.push_str(&existing);
            combined.push_str("\n\n");
        }
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        combined.push_str(&format!("<!-- {stamp} -->\n"));
        combined.push_str(content);

        self.write_longterm(&combined)
    }

    /// Case-insensitive substring scan over daily notes and the long-term
    /// note. Returns which documents matched, not the matching lines.
    pub fn search(&self, keyword: &str) -> Result<Vec<NoteRef>, MemoryError> {
        let dir = match self.memory_dir.as_deref() {
            Some(d) => d,
            None => return Ok(vec![]),
        };
        let needle = keyword.to_lowercase();
        let mut results = Vec::new();

        for date in self.list_daily_notes()? {
            let content = self.read_daily(&date)?;
            if content.to_lowercase().contains(&needle) {
                results.push(NoteRef::Daily(date));
            }
        }

        let longterm = read_or_empty(&dir.join(LONGTERM_FILE))?;
        if !longterm.is_empty() && longterm.to_lowercase().contains(&needle) {
            results.push(NoteRef::LongTerm);
        }

        Ok(results)
    }

    /// The preface prepended to the system prompt: long-term body plus the
    /// last two days of daily notes.
    pub fn memory_context(&self) -> String {
        if self.memory_dir.is_none() {
            return String::new();
        }

        let mut context = String::new();

        if let Ok(longterm) = self.read_longterm() {
            if !longterm.is_empty() {
                context.push_str("## Long-term Memory\n\n");
                context.push_str(&longterm);
                context.push_str("\n\n");
            }
        }

        let recent = self.daily_notes(2);
        if !recent.is_empty() {
            context.push_str("## Recent Daily Notes\n\n");
            context.push_str(&recent);
        }

        context
    }

    /// All daily-note dates, newest first. Filenames that are not
    /// `YYYY-MM-DD.md` are ignored.
    pub fn list_daily_notes(&self) -> Result<Vec<String>, MemoryError> {
        let dir = match self.memory_dir.as_deref() {
            Some(d) => d.join(DAILY_DIR),
            None => return Ok(vec![]),
        };
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => return Ok(vec![]),
        };

        let date_re = regex::Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex");
        let mut dates: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let date = name.strip_suffix(".md")?;
                if date_re.is_match(date) {
                    Some(date.to_string())
                } else {
                    None
                }
            })
            .collect();

        dates.sort_by(|a, b| b.cmp(a));
        Ok(dates)
    }

    /// Delete daily notes beyond the most recent `keep_days`.
    pub fn clean_old_notes(&self, keep_days: usize) -> Result<usize, MemoryError> {
        let dates = self.list_daily_notes()?;
        if dates.len() <= keep_days {
            return Ok(0);
        }

        let mut removed = 0;
        for date in &dates[keep_days..] {
            let path = self.daily_path(date)?;
            if std::fs::remove_file(&path).is_ok() {
                info!(date, "old note removed");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn read_or_empty(path: &Path) -> Result<String, MemoryError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(MemoryError::Storage(e.to_string())),
    }
}

/// Validate a user-supplied `YYYY-MM-DD` date string.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn enabled_store(max: usize) -> (MemoryStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new(true, tmp.path(), max).unwrap();
        (store, tmp)
    }

    #[test]
    fn disabled_store_reads_empty_and_refuses_writes() {
        let store = MemoryStore::new(false, "/nonexistent", 1024).unwrap();
        assert!(!store.is_enabled());
        assert!(matches!(
            store.write_longterm("x"),
            Err(MemoryError::Disabled)
        ));
        assert!(store.memory_context().is_empty());
        assert!(store.search("x").unwrap().is_empty());
    }

    #[test]
    fn longterm_write_read_roundtrip() {
        let (store, _tmp) = enabled_store(4096);
        store.write_longterm("The user's name is Ada.").unwrap();
        assert_eq!(store.read_longterm().unwrap(), "The user's name is Ada.");
    }

    #[test]
    fn longterm_replace_not_append() {
        let (store, _tmp) = enabled_store(4096);
        store.write_longterm("first").unwrap();
        store.write_longterm("second").unwrap();
        assert_eq!(store.read_longterm().unwrap(), "second");
    }

    #[test]
    fn longterm_append_carries_timestamp_comment() {
        let (store, _tmp) = enabled_store(4096);
        store.append_longterm("remember this").unwrap();
        let content = store.read_longterm().unwrap();
        assert!(content.contains("<!-- "));
        assert!(content.contains("remember this"));
    }

    #[test]
    fn longterm_size_cap_enforced_and_file_unchanged() {
        let (store, _tmp) = enabled_store(16);
        store.write_longterm("short").unwrap();
        let err = store.write_longterm(&"x".repeat(64)).unwrap_err();
        assert!(matches!(err, MemoryError::TooLarge { max: 16 }));
        assert_eq!(store.read_longterm().unwrap(), "short");
    }

    #[test]
    fn daily_write_appends_sections() {
        let (store, _tmp) = enabled_store(4096);
        store.write_daily("2026-08-01", "morning entry").unwrap();
        store.write_daily("2026-08-01", "evening entry").unwrap();

        let content = store.read_daily("2026-08-01").unwrap();
        assert!(content.contains("morning entry"));
        assert!(content.contains("evening entry"));
        assert_eq!(content.matches("### ").count(), 2);
    }

    #[test]
    fn daily_cap_checked_against_existing_file() {
        let (store, _tmp) = enabled_store(8);
        store.write_daily("2026-08-01", "seed").unwrap();
        // File now exceeds 8 bytes, so further appends must fail.
        let err = store.write_daily("2026-08-01", "more").unwrap_err();
        assert!(matches!(err, MemoryError::TooLarge { .. }));
    }

    #[test]
    fn missing_daily_reads_empty() {
        let (store, _tmp) = enabled_store(4096);
        assert_eq!(store.read_daily("1999-01-01").unwrap(), "");
    }

    #[test]
    fn search_finds_documents_case_insensitively() {
        let (store, _tmp) = enabled_store(4096);
        store.write_daily("2026-07-30", "Deployed the Rust gateway").unwrap();
        store.write_longterm("likes RUST").unwrap();

        let hits = store.search("rust").unwrap();
        assert!(hits.contains(&NoteRef::Daily("2026-07-30".into())));
        assert!(hits.contains(&NoteRef::LongTerm));

        assert!(store.search("golang").unwrap().is_empty());
    }

    #[test]
    fn list_daily_notes_newest_first_ignores_junk() {
        let (store, tmp) = enabled_store(4096);
        store.write_daily("2026-07-29", "a").unwrap();
        store.write_daily("2026-07-31", "b").unwrap();
        store.write_daily("2026-07-30", "c").unwrap();
        std::fs::write(tmp.path().join("memory/notadate.md"), "junk").unwrap();

        let dates = store.list_daily_notes().unwrap();
        assert_eq!(dates, vec!["2026-07-31", "2026-07-30", "2026-07-29"]);
    }

    #[test]
    fn memory_context_combines_longterm_and_recent() {
        let (store, _tmp) = enabled_store(8192);
        store.write_longterm("Ada prefers terse answers.").unwrap();
        store.write_daily(&MemoryStore::today(), "note for today").unwrap();

        let ctx = store.memory_context();
        assert!(ctx.contains("## Long-term Memory"));
        assert!(ctx.contains("Ada prefers terse answers."));
        assert!(ctx.contains("## Recent Daily Notes"));
        assert!(ctx.contains("note for today"));
    }

    #[test]
    fn clean_old_notes_keeps_newest() {
        let (store, _tmp) = enabled_store(4096);
        for d in ["2026-07-01", "2026-07-02", "2026-07-03", "2026-07-04"] {
            store.write_daily(d, "x").unwrap();
        }
        let removed = store.clean_old_notes(2).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            store.list_daily_notes().unwrap(),
            vec!["2026-07-04", "2026-07-03"]
        );
    }
}

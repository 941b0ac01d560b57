//! Feedback Store
//!
//! Append-only JSON stores for answer feedback and the golden question
//! set. Neither affects query correctness; both can be disabled by the
//! feedback_capture feature flag. Files hold one JSON array each and are
//! rewritten wholesale on append, matching their small expected size.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::models::{FeedbackEntry, GoldenExample};

const FEEDBACK_FILE: &str = "feedback_data.json";
const GOLDEN_FILE: &str = "golden_questions.json";

pub struct FeedbackStore {
    dir: PathBuf,
    enabled: bool,
    // Serializes read-modify-write cycles on the files
    write_lock: Mutex<()>,
}

impl FeedbackStore {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        let dir = dir.into();
        if enabled && let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!("Could not create feedback directory {:?}: {}", dir, e);
        }
        Self { dir, enabled, write_lock: Mutex::new(()) }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append one feedback entry
    pub fn capture_feedback(&self, entry: FeedbackEntry) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let _guard = self.write_lock.lock().expect("feedback lock poisoned");
        append_to_array(&self.dir.join(FEEDBACK_FILE), entry)
    }

    /// Append one golden example
    pub fn add_golden_example(&self, example: GoldenExample) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let _guard = self.write_lock.lock().expect("feedback lock poisoned");
        append_to_array(&self.dir.join(GOLDEN_FILE), example)
    }

    /// All stored golden examples, optionally filtered by category
    pub fn golden_examples(&self, category: Option<&str>) -> Vec<GoldenExample> {
        if !self.enabled {
            return Vec::new();
        }
        let examples: Vec<GoldenExample> = read_array(&self.dir.join(GOLDEN_FILE));
        match category {
            Some(category) => examples
                .into_iter()
                .filter(|e| e.category == category)
                .collect(),
            None => examples,
        }
    }

    /// All stored feedback entries
    pub fn feedback_entries(&self) -> Vec<FeedbackEntry> {
        if !self.enabled {
            return Vec::new();
        }
        read_array(&self.dir.join(FEEDBACK_FILE))
    }
}

fn read_array<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    if !path.exists() {
        return Vec::new();
    }
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Corrupt store file {:?}: {}", path, e);
            Vec::new()
        }),
        Err(e) => {
            tracing::warn!("Could not read store file {:?}: {}", path, e);
            Vec::new()
        },
    }
}

fn append_to_array<T: serde::Serialize + serde::de::DeserializeOwned>(
    path: &Path,
    item: T,
) -> anyhow::Result<()> {
    let mut items: Vec<T> = read_array(path);
    items.push(item);
    let json = serde_json::to_string_pretty(&items)?;
    fs::write(path, json)?;
    Ok(())
}

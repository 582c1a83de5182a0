use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::HiveResult;
use crate::types::ActivityRecord;

/// JSONL audit trail of activity records, one record per line
pub struct ActivityJournal {
    path: PathBuf,
    /// Serializes appends so concurrent writers never interleave lines
    lane: Mutex<()>,
}

impl ActivityJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lane: Mutex::new(()),
        }
    }

    pub async fn append(&self, record: &ActivityRecord) -> HiveResult<()> {
        let line = serde_json::to_string(record)? + "\n";
        let _guard = self.lane.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Load every record; malformed lines are skipped
    pub async fn load(&self) -> HiveResult<Vec<ActivityRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let records = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::Utc;

    fn record(bot: u64, action: ActionType) -> ActivityRecord {
        let now = Utc::now();
        ActivityRecord::new(
            BotId(bot),
            action,
            TargetRef::Post("p1".into()),
            now,
            now,
            Outcome::Success,
        )
    }

    #[tokio::test]
    async fn append_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ActivityJournal::new(dir.path().join("nested/activity.jsonl"));

        journal.append(&record(1, ActionType::Like)).await.unwrap();
        journal.append(&record(2, ActionType::Comment)).await.unwrap();

        let loaded = journal.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].bot_id, BotId(1));
        assert_eq!(loaded[1].action, ActionType::Comment);
    }

    #[tokio::test]
    async fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ActivityJournal::new(dir.path().join("none.jsonl"));
        assert!(journal.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let journal = ActivityJournal::new(&path);
        journal.append(&record(1, ActionType::Follow)).await.unwrap();
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json}\n\n");
        std::fs::write(&path, content).unwrap();
        journal.append(&record(3, ActionType::Post)).await.unwrap();

        let loaded = journal.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].bot_id, BotId(3));
    }
}

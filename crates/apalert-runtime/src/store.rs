//! JSON state files under the state directory.
//!
//! Every write goes to a sibling temp file first and is renamed into place,
//! so a crash mid-write leaves the previous document intact.

use std::path::{Path, PathBuf};

use anyhow::Context;
use apalert_core::ClassificationBook;
use apalert_session::SessionRegistry;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::player::TrackerState;

const TRACKERS: &str = "trackers.json";
const SESSIONS: &str = "sessions.json";
const CLASSIFICATIONS: &str = "classifications.json";

#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    /// Open (and create if needed) the state directory.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create state dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ─── Trackers ────────────────────────────────────────────────────

    /// Players and tracked slots. A corrupt file is an error: it holds the
    /// only copy of every cursor.
    pub fn load_trackers(&self) -> anyhow::Result<TrackerState> {
        Ok(self.read(TRACKERS)?.unwrap_or_default())
    }

    pub fn save_trackers(&self, state: &TrackerState) -> anyhow::Result<()> {
        self.write(TRACKERS, state)
    }

    // ─── Sessions ────────────────────────────────────────────────────

    /// Session registry. A corrupt file is logged and dropped; sessions are
    /// rediscovered from the trackers on the next cycle.
    pub fn load_sessions(&self) -> SessionRegistry {
        match self.read(SESSIONS) {
            Ok(registry) => registry.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable session cache");
                SessionRegistry::default()
            }
        }
    }

    pub fn save_sessions(&self, registry: &SessionRegistry) -> anyhow::Result<()> {
        self.write(SESSIONS, registry)
    }

    // ─── Classifications ─────────────────────────────────────────────

    pub fn load_classifications(&self) -> anyhow::Result<ClassificationBook> {
        Ok(self.read(CLASSIFICATIONS)?.unwrap_or_default())
    }

    /// Writes only when the book changed since the last save.
    pub fn save_classifications(&self, book: &mut ClassificationBook) -> anyhow::Result<()> {
        if !book.is_dirty() {
            return Ok(());
        }
        self.write(CLASSIFICATIONS, &*book)?;
        book.mark_clean();
        Ok(())
    }

    // ─── Files ───────────────────────────────────────────────────────

    fn read<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        let path = self.dir.join(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> anyhow::Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("failed to serialize {name}"))?;
        std::fs::write(&tmp, bytes)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        tracing::debug!(file = %path.display(), "state written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apalert_core::slot::TrackedSlot;
    use apalert_core::{Classification, KnowledgeBase};
    use apalert_sources::SessionLocator;

    use crate::player::Player;

    #[test]
    fn missing_files_load_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::open(dir.path().join("state")).expect("open");
        assert_eq!(store.load_trackers().expect("trackers"), TrackerState::default());
        assert!(store.load_sessions().is_empty());
        assert!(store.load_classifications().expect("book").is_empty());
    }

    #[test]
    fn trackers_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::open(dir.path()).expect("open");
        let mut player = Player::new("u1");
        let mut slot = TrackedSlot::new("https://archipelago.gg/tracker/abc/0/2", 2);
        slot.latest_item = 14;
        player.slots.push(slot);
        let mut state = TrackerState::default();
        state.players.insert(player.id.clone(), player);

        store.save_trackers(&state).expect("save");
        assert_eq!(store.load_trackers().expect("load"), state);
        assert!(!dir.path().join("trackers.json.tmp").exists());
    }

    #[test]
    fn corrupt_sessions_are_discarded_but_corrupt_trackers_fail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::open(dir.path()).expect("open");
        std::fs::write(dir.path().join(SESSIONS), b"{not json").expect("write");
        std::fs::write(dir.path().join(TRACKERS), b"{not json").expect("write");

        assert!(store.load_sessions().is_empty());
        assert!(store.load_trackers().is_err());
    }

    #[test]
    fn sessions_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::open(dir.path()).expect("open");
        let mut registry = SessionRegistry::new();
        let locator = SessionLocator::Aggregator {
            tracker_id: "agg-1".into(),
        };
        let id = registry.resolve(&locator);
        store.save_sessions(&registry).expect("save");
        assert_eq!(store.load_sessions().lookup(&locator), Some(id));
    }

    #[test]
    fn classifications_only_written_when_dirty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::open(dir.path()).expect("open");
        let mut book = ClassificationBook::new();
        store.save_classifications(&mut book).expect("save clean");
        assert!(!dir.path().join(CLASSIFICATIONS).exists());

        book.record("Clique", "Button", Classification::Progression);
        store.save_classifications(&mut book).expect("save dirty");
        assert!(!book.is_dirty());
        let loaded = store.load_classifications().expect("load");
        assert_eq!(loaded.get("Clique", "Button"), Some(Classification::Progression));
    }
}

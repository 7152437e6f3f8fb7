//! On-disk episodes and checkpoints (JSON).
//!
//! Layout under a run directory:
//!
//! ```text
//! <logdir>/latest_model.json
//! <logdir>/train_eps/<stamp>-<seq>-<length>.json
//! <logdir>/eval_eps/<stamp>-<seq>-<length>.json
//! ```
//!
//! Absence is never an error here: a missing episode directory loads as an
//! empty cache and a missing checkpoint loads as `None` (cold start).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::{BoundedEpisodeCache, EpisodeId, EpisodeRecord, Mode, Result};

const CHECKPOINT_FILE: &str = "latest_model.json";
const EPISODE_EXT: &str = "json";

/// Persisted control-loop state.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Checkpoint {
    /// Agent step at save time.
    pub step: u64,
    /// Whether the one-time pretraining burst has already run.
    pub pretrained: bool,
    /// Opaque trainer snapshot (parameters and optimizer state).
    pub trainer_state: Vec<u8>,
}

/// Episode and checkpoint files for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeArchive {
    logdir: PathBuf,
    traindir: PathBuf,
    evaldir: PathBuf,
}

impl EpisodeArchive {
    /// Default layout under `logdir`.
    pub fn new(logdir: impl Into<PathBuf>) -> Self {
        let logdir = logdir.into();
        Self {
            traindir: logdir.join("train_eps"),
            evaldir: logdir.join("eval_eps"),
            logdir,
        }
    }

    /// Override the episode directories (e.g. offline datasets).
    pub fn with_dirs(mut self, traindir: impl Into<PathBuf>, evaldir: impl Into<PathBuf>) -> Self {
        self.traindir = traindir.into();
        self.evaldir = evaldir.into();
        self
    }

    pub fn logdir(&self) -> &Path {
        &self.logdir
    }

    /// Episode directory for `mode`.
    pub fn dir(&self, mode: Mode) -> &Path {
        match mode {
            Mode::Train => &self.traindir,
            Mode::Eval => &self.evaldir,
        }
    }

    /// Create every directory of the layout.
    pub fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.logdir)?;
        fs::create_dir_all(&self.traindir)?;
        fs::create_dir_all(&self.evaldir)?;
        Ok(())
    }

    /// Write one episode; returns its path.
    pub fn save(&self, mode: Mode, id: &EpisodeId, record: &EpisodeRecord) -> Result<PathBuf> {
        let dir = self.dir(mode);
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{id}.{EPISODE_EXT}"));
        fs::write(&path, serde_json::to_string(record)?)?;
        Ok(path)
    }

    /// Load the episodes of `mode`, newest first, until `limit` steps are covered.
    pub fn load(&self, mode: Mode, limit: usize) -> Result<BoundedEpisodeCache> {
        load_episodes(self.dir(mode), limit)
    }

    /// Steps already recorded for `mode`.
    pub fn count_steps(&self, mode: Mode) -> Result<u64> {
        count_steps(self.dir(mode))
    }

    /// Identifier of the newest episode file for `mode`, readable or not.
    pub fn newest_id(&self, mode: Mode) -> Result<Option<EpisodeId>> {
        Ok(episode_files(self.dir(mode))?.pop().map(|(id, _)| id))
    }

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.logdir)?;
        let path = self.logdir.join(CHECKPOINT_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string(checkpoint)?)?;
        fs::rename(&tmp, &path)?;
        log::debug!("saved checkpoint at step {} to {}", checkpoint.step, path.display());
        Ok(())
    }

    /// `Ok(None)` when no checkpoint exists.
    pub fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let path = self.logdir.join(CHECKPOINT_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;
        log::info!("loaded checkpoint from step {}", checkpoint.step);
        Ok(Some(checkpoint))
    }
}

/// Episode files in `dir` with their identifiers, oldest first.
fn episode_files(dir: &Path) -> Result<Vec<(EpisodeId, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(EPISODE_EXT) {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(EpisodeId::parse) else {
            continue;
        };
        files.push((id, path));
    }
    files.sort();
    Ok(files)
}

/// Load episodes from `dir`, newest first, stopping once `limit` steps are
/// covered (`limit == 0` loads everything).
///
/// Unreadable files are skipped with a warning.
pub fn load_episodes(dir: &Path, limit: usize) -> Result<BoundedEpisodeCache> {
    let mut cache = BoundedEpisodeCache::new();
    let mut total = 0usize;
    for (id, path) in episode_files(dir)?.into_iter().rev() {
        let record: EpisodeRecord = match fs::read_to_string(&path)
            .map_err(crate::Error::from)
            .and_then(|s| serde_json::from_str(&s).map_err(crate::Error::from))
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("could not load episode {}: {e}", path.display());
                continue;
            }
        };
        total += record.length();
        cache.insert(id, record);
        if limit > 0 && total >= limit {
            break;
        }
    }
    Ok(cache)
}

/// Sum of the lengths encoded in the episode file names of `dir`.
pub fn count_steps(dir: &Path) -> Result<u64> {
    Ok(episode_files(dir)?
        .iter()
        .map(|(id, _)| id.length() as u64)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transition;
    use chrono::{TimeZone, Utc};

    fn record(length: usize) -> EpisodeRecord {
        EpisodeRecord::new(vec![
            Transition {
                observation: vec![1.0, 2.0],
                action: vec![0.0],
                reward: 1.0,
                cost: 0.0,
                switched: false,
            };
            length + 1
        ])
    }

    fn id(seq: u64, length: usize) -> EpisodeId {
        EpisodeId::new(Utc.with_ymd_and_hms(2024, 2, 2, 8, 0, 0).unwrap(), seq, length)
    }

    #[test]
    fn missing_dirs_are_empty_not_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = EpisodeArchive::new(tmp.path().join("nope"));
        assert!(archive.load(Mode::Train, 0).unwrap().is_empty());
        assert_eq!(archive.count_steps(Mode::Train).unwrap(), 0);
        assert_eq!(archive.load_checkpoint().unwrap(), None);
    }

    #[test]
    fn load_walks_newest_first_until_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = EpisodeArchive::new(tmp.path());
        for seq in 0..4 {
            archive.save(Mode::Train, &id(seq, 10), &record(10)).unwrap();
        }
        assert_eq!(archive.count_steps(Mode::Train).unwrap(), 40);

        let cache = archive.load(Mode::Train, 15).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&id(3, 10)) && cache.contains(&id(2, 10)));

        assert_eq!(archive.load(Mode::Train, 0).unwrap().len(), 4);
    }

    #[test]
    fn newest_id_includes_unreadable_files() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = EpisodeArchive::new(tmp.path());
        archive.create_dirs().unwrap();
        assert_eq!(archive.newest_id(Mode::Eval).unwrap(), None);
        archive.save(Mode::Eval, &id(0, 3), &record(3)).unwrap();
        fs::write(archive.dir(Mode::Eval).join(format!("{}.json", id(1, 5))), "{not json").unwrap();
        assert_eq!(archive.newest_id(Mode::Eval).unwrap(), Some(id(1, 5)));
    }

    #[test]
    fn corrupt_files_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = EpisodeArchive::new(tmp.path());
        archive.save(Mode::Eval, &id(0, 3), &record(3)).unwrap();
        fs::write(archive.dir(Mode::Eval).join(format!("{}.json", id(1, 5))), "{not json").unwrap();
        fs::write(archive.dir(Mode::Eval).join("notes.txt"), "ignored").unwrap();
        let cache = archive.load(Mode::Eval, 0).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&id(0, 3)), Some(&record(3)));
    }

    #[test]
    fn checkpoint_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = EpisodeArchive::new(tmp.path());
        let ckpt = Checkpoint {
            step: 1234,
            pretrained: true,
            trainer_state: vec![1, 2, 3],
        };
        archive.save_checkpoint(&ckpt).unwrap();
        assert_eq!(archive.load_checkpoint().unwrap(), Some(ckpt));
    }
}

//! Stimulus sound enumeration and load-time validation.
//!
//! The sounds directory holds one WAV per stimulus: `low_tone-<rate>.wav`
//! (standard), `high_tone-<rate>.wav` (target) and any number of novel
//! sounds named `wav*-<rate>.wav`. Files are opened and checked with
//! `hound` before the run starts - a missing or wrong-rate file aborts at
//! load time, never mid-trial.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::trials::{TrialKind, TrialList};

/// Handle identifying one loaded stimulus (`standard`, `target` or a novel
/// identifier such as `wav1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SoundId(String);

impl SoundId {
    pub fn standard() -> Self {
        Self("standard".to_string())
    }

    pub fn target() -> Self {
        Self("target".to_string())
    }

    pub fn novel(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sound loading faults. Fatal at load time.
#[derive(Debug, Error)]
pub enum SoundError {
    #[error("failed to read sounds directory {path}: {source}")]
    SoundsDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("stimulus file for {sound} not found at {path}")]
    Missing { sound: SoundId, path: PathBuf },

    #[error("stimulus file {path} is not a readable WAV: {message}")]
    Wav { path: PathBuf, message: String },

    #[error("stimulus file {path} has sample rate {found}, expected {expected}")]
    SampleRate {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

/// Enumerate the novel-sound identifiers available in `dir`.
///
/// A novel sound is a `.wav` file whose name starts with `wav`; the
/// identifier is the stem before the first `-`. Stray non-wav files get a
/// warning and are skipped.
pub fn list_novel_sounds(dir: &Path) -> Result<Vec<String>, SoundError> {
    let entries = std::fs::read_dir(dir).map_err(|source| SoundError::SoundsDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SoundError::SoundsDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.extension().and_then(|e| e.to_str()) != Some("wav") {
            warn!(file = name, "non-wav file in the sounds directory");
            continue;
        }
        if let Some(stem) = name.strip_suffix(".wav") {
            if stem.starts_with("wav") {
                let id = stem.split('-').next().unwrap_or(stem);
                ids.push(id.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

/// Validated mapping from sound handle to WAV file.
#[derive(Debug, Clone)]
pub struct SoundBank {
    files: HashMap<SoundId, PathBuf>,
}

impl SoundBank {
    /// Resolve and validate every sound the trial list needs.
    ///
    /// Standard and target are always loaded; novels only as the list
    /// references them. Each file must exist, parse as WAV and match the
    /// expected sample rate.
    pub fn load(dir: &Path, trials: &TrialList, sample_rate: u32) -> Result<Self, SoundError> {
        let mut files = HashMap::new();
        files.insert(
            SoundId::standard(),
            dir.join(format!("low_tone-{sample_rate}.wav")),
        );
        files.insert(
            SoundId::target(),
            dir.join(format!("high_tone-{sample_rate}.wav")),
        );
        for trial in trials {
            if let TrialKind::Novel(id) = &trial.kind {
                files
                    .entry(SoundId::novel(id))
                    .or_insert_with(|| dir.join(format!("{id}-{sample_rate}.wav")));
            }
        }
        for (sound, path) in &files {
            validate_wav(sound, path, sample_rate)?;
        }
        Ok(Self { files })
    }

    pub fn path(&self, sound: &SoundId) -> Option<&Path> {
        self.files.get(sound).map(PathBuf::as_path)
    }

    pub fn contains(&self, sound: &SoundId) -> bool {
        self.files.contains_key(sound)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn validate_wav(sound: &SoundId, path: &Path, expected: u32) -> Result<(), SoundError> {
    if !path.is_file() {
        return Err(SoundError::Missing {
            sound: sound.clone(),
            path: path.to_path_buf(),
        });
    }
    let reader = hound::WavReader::open(path).map_err(|e| SoundError::Wav {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let found = reader.spec().sample_rate;
    if found != expected {
        return Err(SoundError::SampleRate {
            path: path.to_path_buf(),
            found,
            expected,
        });
    }
    Ok(())
}

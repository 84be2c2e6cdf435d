//! Trigger and audio device seams.
//!
//! Both devices are external, single-owner resources with a narrow
//! contract: the trigger takes a code and emits it immediately
//! (fire-and-forget, no acknowledgment); the player takes a sound handle
//! and a playback deadline and renders it starting at that deadline.
//! Any failure from either is fatal to a run - an experiment cannot
//! safely continue with silent or misaligned trials.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::sounds::SoundId;

/// Device faults. Always fatal once the loop is running.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open trigger port {path}: {source}")]
    TriggerOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to emit trigger code {code}: {source}")]
    TriggerWrite { code: u8, source: std::io::Error },

    #[error("playback of {sound} failed: {message}")]
    Playback { sound: SoundId, message: String },
}

/// Hardware synchronization output.
pub trait TriggerDevice {
    /// Emit `code` immediately. Fire-and-forget.
    fn signal(&mut self, code: u8) -> Result<(), DeviceError>;
}

/// Audio playback collaborator.
pub trait AudioPlayer {
    /// Request playback of `sound` with its onset `onset_in_secs` from now.
    ///
    /// The player must render the sound starting at (or before) that
    /// deadline; the scheduler fires the trigger once the deadline elapses.
    fn play(&mut self, sound: &SoundId, onset_in_secs: f64) -> Result<(), DeviceError>;
}

/// No-op trigger for development runs without the recording hardware.
#[derive(Debug, Default)]
pub struct MockTrigger;

impl TriggerDevice for MockTrigger {
    fn signal(&mut self, code: u8) -> Result<(), DeviceError> {
        info!(code, "mock trigger");
        Ok(())
    }
}

/// Parallel-port trigger writing the code byte to a character device.
///
/// Acquired once at engine start, released on drop.
#[derive(Debug)]
pub struct ParallelPortTrigger {
    port: File,
}

impl ParallelPortTrigger {
    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        let port = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| DeviceError::TriggerOpen {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), "parallel port trigger opened");
        Ok(Self { port })
    }
}

impl TriggerDevice for ParallelPortTrigger {
    fn signal(&mut self, code: u8) -> Result<(), DeviceError> {
        self.port
            .write_all(&[code])
            .and_then(|()| self.port.flush())
            .map_err(|source| DeviceError::TriggerWrite { code, source })?;
        debug!(code, "trigger emitted");
        Ok(())
    }
}

/// Player that logs playback requests without rendering audio.
///
/// Stands in for the real player during development and in tests; the
/// scheduler's timing contract is identical either way.
#[derive(Debug, Default)]
pub struct NullPlayer;

impl AudioPlayer for NullPlayer {
    fn play(&mut self, sound: &SoundId, onset_in_secs: f64) -> Result<(), DeviceError> {
        debug!(%sound, onset_in_secs, "playback requested");
        Ok(())
    }
}

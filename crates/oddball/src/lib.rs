//! Oddball: auditory stimulus engine for behavioral experiments.
//!
//! Sequences a predefined list of audio probe trials, fires a hardware
//! trigger pulse locked to each stimulus onset, and can be held or resumed
//! by a remote controller mid-run over a ZMQ request/acknowledge channel.
//!
//! The core is single-threaded and cooperative: one control loop, one
//! bounded remote poll per cycle, high-precision waits in between. The
//! audio player and trigger device are narrow capability seams - the
//! engine schedules onsets and codes, collaborators render them.
//!
//! - [`clock`]: monotonic nanosecond clock and busy/sleep hybrid wait
//! - [`trials`]: trial model and trial-list parsing
//! - [`sounds`]: stimulus enumeration and WAV validation
//! - [`device`]: trigger and audio player seams
//! - [`remote`]: hold/continue REP endpoint
//! - [`monitor`]: participant response polling during inter-trial waits
//! - [`scheduler`]: the trial-scheduling state machine
//! - [`force`]: force-sensor UDP forwarding (independent utility)

pub mod clock;
pub mod device;
pub mod force;
pub mod monitor;
pub mod remote;
pub mod scheduler;
pub mod sounds;
pub mod trials;

pub use clock::{sleep, Clock, SPIN_THRESHOLD_NS};
pub use device::{
    AudioPlayer, DeviceError, MockTrigger, NullPlayer, ParallelPortTrigger, TriggerDevice,
};
pub use force::{ForceError, ForceForwarder, ForceSensor, LineSensor};
pub use monitor::{KeyEvent, KeySource, MonitorError, NullKeys, Response, ResponseMonitor};
pub use remote::{CommandSource, RemoteCommand, RemoteControl, ACK};
pub use scheduler::{SchedulerError, SchedulerState, TrialScheduler};
pub use sounds::{list_novel_sounds, SoundBank, SoundError, SoundId};
pub use trials::{parse_trial_list, Trial, TrialKind, TrialList, TrialListError};

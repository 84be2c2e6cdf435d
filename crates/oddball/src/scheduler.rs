//! Trial scheduler: the state machine that drives a run.
//!
//! One single-threaded cooperative loop. Each cycle polls the remote
//! channel (bounded, 10 ms by default), then either replays the hold
//! filler or presents the current trial. The inter-trial interval is
//! deliberately split: playback is requested with its onset one stimulus
//! duration ahead, the engine waits out that segment, and only then fires
//! the trigger - the pulse is temporally locked to (never preceding) the
//! audible event. The post-trigger segment absorbs the rest of the
//! interval, optionally interleaving response polling after novel trials.
//!
//! A hold received mid-wait takes effect at the next cycle boundary; once
//! a cycle begins it runs to completion. Held cycles mirror the running
//! cadence exactly (standard stimulus, hold code, same split waits) so the
//! resume latency is bounded by one trial period.

use thiserror::Error;
use tracing::info;

use oddconf::{ConfigError, OddballConfig, TimingConfig};

use crate::clock::sleep;
use crate::device::{AudioPlayer, DeviceError, TriggerDevice};
use crate::monitor::{KeySource, MonitorError, Response, ResponseMonitor};
use crate::remote::{CommandSource, RemoteCommand};
use crate::sounds::SoundId;
use crate::trials::{TrialKind, TrialList};

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Created, waiting for the operator to confirm start.
    Idle,
    /// Advancing through trials.
    Running,
    /// Replaying the hold filler, cursor frozen.
    Held,
    /// Trial list exhausted.
    Finished,
}

/// Scheduler faults. Construction errors are raised before any trial runs;
/// everything raised mid-loop is fatal to the run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("trial {index} is fixation-only ({kind}) and cannot be scheduled for playback")]
    Unplayable { index: u32, kind: String },

    #[error("scheduler must be started before running")]
    NotStarted,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("remote control failed: {0}")]
    Remote(anyhow::Error),
}

/// A trial resolved to everything the loop needs, computed up front so an
/// out-of-vocabulary entry fails before the first stimulus plays.
#[derive(Debug, Clone)]
struct Slot {
    index: u32,
    label: String,
    sound: SoundId,
    code: u8,
    novel: bool,
}

/// The trial-scheduling engine.
///
/// Exclusively owns its state and cursor; the remote channel is queried,
/// never mutated by anyone else. Devices are acquired by the caller and
/// handed over for the lifetime of the run.
pub struct TrialScheduler<C: CommandSource> {
    timing: TimingConfig,
    hold_code: u8,
    poll_timeout_ms: i64,
    slots: Vec<Slot>,
    last_index: u32,
    remote: C,
    player: Box<dyn AudioPlayer>,
    trigger: Box<dyn TriggerDevice>,
    monitor: Option<ResponseMonitor<Box<dyn KeySource>>>,
    responses: Vec<Response>,
    state: SchedulerState,
    cursor: usize,
}

impl<C: CommandSource> std::fmt::Debug for TrialScheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialScheduler")
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl<C: CommandSource> TrialScheduler<C> {
    /// Build a scheduler, fail-fast.
    ///
    /// Validates the configuration invariants and resolves every trial to
    /// a (sound, trigger code) slot. `Cross` entries are rejected here:
    /// fixation filler has no sound and no code, and an unplayable entry
    /// must surface before the loop, not in it.
    pub fn new(
        config: &OddballConfig,
        trials: &TrialList,
        remote: C,
        player: Box<dyn AudioPlayer>,
        trigger: Box<dyn TriggerDevice>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let mut slots = Vec::with_capacity(trials.len());
        for trial in trials {
            let (sound, code) = match &trial.kind {
                TrialKind::Standard => (SoundId::standard(), config.triggers.standard),
                TrialKind::Target => (SoundId::target(), config.triggers.target),
                TrialKind::Novel(id) => (SoundId::novel(id), config.triggers.novel),
                TrialKind::Cross => {
                    return Err(SchedulerError::Unplayable {
                        index: trial.index,
                        kind: trial.kind.to_string(),
                    })
                }
            };
            slots.push(Slot {
                index: trial.index,
                label: trial.kind.to_string(),
                sound,
                code,
                novel: trial.kind.is_novel(),
            });
        }
        Ok(Self {
            timing: config.timing.clone(),
            hold_code: config.triggers.hold,
            poll_timeout_ms: config.remote.poll_timeout_ms,
            slots,
            last_index: trials.last_index(),
            remote,
            player,
            trigger,
            monitor: None,
            responses: Vec::new(),
            state: SchedulerState::Idle,
            cursor: 0,
        })
    }

    /// Attach a key source; responses are then collected during the
    /// post-trigger wait of novel trials.
    pub fn with_key_source(mut self, source: Box<dyn KeySource>) -> Self {
        self.monitor = Some(ResponseMonitor::new(source));
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Responses logged so far.
    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    /// Operator confirmed start: `Idle -> Running`.
    pub fn start(&mut self) {
        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::Running;
            info!(trials = self.slots.len(), "run started");
        }
    }

    /// Drive cycles until the trial list is exhausted.
    pub fn run(&mut self) -> Result<(), SchedulerError> {
        if self.state == SchedulerState::Idle {
            return Err(SchedulerError::NotStarted);
        }
        while self.state != SchedulerState::Finished {
            self.cycle()?;
        }
        Ok(())
    }

    /// One trial slot: remote poll, then hold filler or trial presentation.
    fn cycle(&mut self) -> Result<(), SchedulerError> {
        if self.cursor >= self.slots.len() {
            self.state = SchedulerState::Finished;
            info!("trial list exhausted");
            return Ok(());
        }

        // Commands apply at the cycle boundary, before any playback or
        // trigger action. Repeated hold while held (or continue while
        // running) is a no-op.
        match self
            .remote
            .poll(self.poll_timeout_ms)
            .map_err(SchedulerError::Remote)?
        {
            Some(RemoteCommand::Hold) => {
                if self.state == SchedulerState::Running {
                    self.state = SchedulerState::Held;
                }
            }
            Some(RemoteCommand::Continue) => {
                if self.state == SchedulerState::Held {
                    self.state = SchedulerState::Running;
                }
            }
            None => {}
        }

        let stim = self.timing.stim_secs;
        let post = self.timing.post_stim_secs();

        if self.state == SchedulerState::Held {
            let index = self.slots[self.cursor].index;
            info!(trial = index, last = self.last_index, "holding");
            self.player.play(&SoundId::standard(), stim)?;
            sleep(stim);
            self.trigger.signal(self.hold_code)?;
            sleep(post);
            return Ok(());
        }

        let slot = self.slots[self.cursor].clone();
        info!(trial = slot.index, last = self.last_index, kind = %slot.label, "trial");
        self.player.play(&slot.sound, stim)?;
        sleep(stim);
        self.trigger.signal(slot.code)?;
        self.cursor += 1;

        if slot.novel {
            if let Some(monitor) = &mut self.monitor {
                let responses = monitor.run(post)?;
                self.responses.extend(responses);
            } else {
                sleep(post);
            }
        } else {
            sleep(post);
        }

        if self.cursor >= self.slots.len() {
            self.state = SchedulerState::Finished;
            info!("trial list exhausted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MockTrigger, NullPlayer};
    use crate::trials::parse_trial_list;
    use std::sync::Mutex;

    /// Replays a scripted command per poll, then yields nothing.
    struct ScriptedCommands {
        commands: Mutex<Vec<Option<RemoteCommand>>>,
    }

    impl ScriptedCommands {
        fn new(commands: Vec<Option<RemoteCommand>>) -> Self {
            Self {
                commands: Mutex::new(commands),
            }
        }
    }

    impl CommandSource for ScriptedCommands {
        fn poll(&self, _timeout_ms: i64) -> anyhow::Result<Option<RemoteCommand>> {
            let mut commands = self.commands.lock().unwrap();
            if commands.is_empty() {
                Ok(None)
            } else {
                Ok(commands.remove(0))
            }
        }
    }

    fn fast_config() -> OddballConfig {
        let mut config = OddballConfig::default();
        // shortest cycle the trigger-spacing invariant allows
        config.timing.stim_secs = 0.05;
        config.timing.iti_secs = 0.4;
        config
    }

    fn scheduler(
        text: &str,
        commands: Vec<Option<RemoteCommand>>,
    ) -> Result<TrialScheduler<ScriptedCommands>, SchedulerError> {
        let vocab = vec!["wav1".to_string()];
        let trials = parse_trial_list(text, &vocab).unwrap();
        TrialScheduler::new(
            &fast_config(),
            &trials,
            ScriptedCommands::new(commands),
            Box::new(NullPlayer),
            Box::new(MockTrigger),
        )
    }

    #[test]
    fn starts_idle_and_requires_start() {
        let mut sched = scheduler("1, standard\n", vec![]).unwrap();
        assert_eq!(sched.state(), SchedulerState::Idle);
        assert!(matches!(sched.run(), Err(SchedulerError::NotStarted)));
    }

    #[test]
    fn runs_to_finished() {
        let mut sched = scheduler("1, standard\n2, target\n", vec![]).unwrap();
        sched.start();
        assert_eq!(sched.state(), SchedulerState::Running);
        sched.run().unwrap();
        assert_eq!(sched.state(), SchedulerState::Finished);
    }

    #[test]
    fn cross_trial_is_rejected_at_construction() {
        let err = scheduler("1, standard\n2, cross\n", vec![]).unwrap_err();
        match err {
            SchedulerError::Unplayable { index, kind } => {
                assert_eq!(index, 2);
                assert_eq!(kind, "cross");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_timing_is_rejected_at_construction() {
        let mut config = fast_config();
        config.timing.iti_secs = 0.1;
        let trials = parse_trial_list("1, standard\n", &[]).unwrap();
        let result = TrialScheduler::new(
            &config,
            &trials,
            ScriptedCommands::new(vec![]),
            Box::new(NullPlayer),
            Box::new(MockTrigger),
        );
        assert!(matches!(result, Err(SchedulerError::Config(_))));
    }

    #[test]
    fn repeated_hold_and_continue_are_idempotent() {
        // hold twice, then continue twice: the extra commands change nothing
        // and the run still finishes
        let mut sched = scheduler(
            "1, standard\n2, target\n",
            vec![
                Some(RemoteCommand::Hold),
                Some(RemoteCommand::Hold),
                Some(RemoteCommand::Continue),
                Some(RemoteCommand::Continue),
            ],
        )
        .unwrap();
        sched.start();
        sched.run().unwrap();
        assert_eq!(sched.state(), SchedulerState::Finished);
    }

    #[test]
    fn continue_while_running_is_a_no_op() {
        let mut sched = scheduler("1, standard\n", vec![Some(RemoteCommand::Continue)]).unwrap();
        sched.start();
        sched.run().unwrap();
        assert_eq!(sched.state(), SchedulerState::Finished);
    }

    #[test]
    fn playback_failure_is_fatal() {
        struct FailingPlayer;
        impl AudioPlayer for FailingPlayer {
            fn play(&mut self, sound: &SoundId, _onset_in_secs: f64) -> Result<(), DeviceError> {
                Err(DeviceError::Playback {
                    sound: sound.clone(),
                    message: "no output device".to_string(),
                })
            }
        }

        let trials = parse_trial_list("1, standard\n", &[]).unwrap();
        let mut sched = TrialScheduler::new(
            &fast_config(),
            &trials,
            ScriptedCommands::new(vec![]),
            Box::new(FailingPlayer),
            Box::new(MockTrigger),
        )
        .unwrap();
        sched.start();
        assert!(matches!(sched.run(), Err(SchedulerError::Device(_))));
    }
}

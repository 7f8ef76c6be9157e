//! Action sequencing
//!
//! An action is a list of button presses. Each press is queued on the panel,
//! sent with the next acknowledgment, and then confirmed by a [`Signal`] the
//! panel fires when the controller's response shows the press took effect.
//!
//! Every panel has one [`ActionSequencer`] worker, so at most one sequence is
//! in flight per panel and a new request waits for the current one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::panel::{Button, Panel, Signal};

/// Default time to wait for a step's completion signal
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);
/// Default pause after a step that needs the controller to settle
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

const QUEUE_DEPTH: usize = 16;

/// Errors from requesting or running an action
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// A step's completion signal did not fire in time; the rest of the
    /// sequence was abandoned
    #[error("{action}: no '{signal}' after pressing {button} (step {step})")]
    StepTimeout {
        /// Action name
        action: String,
        /// Button that was pressed
        button: &'static str,
        /// Signal that never fired
        signal: &'static str,
        /// Zero based step index
        step: usize,
    },

    /// The panel has no button sequence for this equipment
    #[error("{equipment} has no button binding on panel {panel}")]
    Unbound {
        /// Equipment name
        equipment: String,
        /// Panel name
        panel: String,
    },

    /// The equipment is not attached to any panel
    #[error("{0} is not attached to a panel")]
    NoPanel(String),

    /// The panel cannot edit the controller clock
    #[error("Panel {0} cannot set the controller clock")]
    ClockUnsupported(String),

    /// The sequencer worker has stopped
    #[error("Action sequencer stopped")]
    SequencerClosed,

    /// The panel's link went away before the step was confirmed
    #[error("{action}: link closed while pressing {button}")]
    LinkClosed {
        /// Action name
        action: String,
        /// Button that was pending
        button: &'static str,
    },
}

/// One button press and the signal that confirms it
#[derive(Clone)]
pub struct ActionStep {
    button: Button,
    signal: Arc<Signal>,
    settle: bool,
}

impl ActionStep {
    /// Press `button` and wait for `signal`
    pub fn new(button: Button, signal: Arc<Signal>) -> Self {
        Self {
            button,
            signal,
            settle: false,
        }
    }

    /// Pause for the settle delay after the signal fires
    pub fn settled(mut self) -> Self {
        self.settle = true;
        self
    }

    /// Button pressed by this step
    pub fn button(&self) -> Button {
        self.button
    }

    /// Signal that completes this step
    pub fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }

    /// Whether the step waits for the settle delay
    pub fn settles(&self) -> bool {
        self.settle
    }
}

impl fmt::Debug for ActionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionStep")
            .field("button", &self.button.name)
            .field("signal", &self.signal.name())
            .field("settle", &self.settle)
            .finish()
    }
}

/// Ordered button presses, fixed once built
#[derive(Debug, Clone, Default)]
pub struct ActionSequence {
    steps: Vec<ActionStep>,
}

impl ActionSequence {
    /// Sequence of `steps`
    pub fn new(steps: Vec<ActionStep>) -> Self {
        Self { steps }
    }

    /// Sequence of a single step
    pub fn single(step: ActionStep) -> Self {
        Self { steps: vec![step] }
    }

    /// This sequence followed by `next`
    pub fn then(mut self, next: ActionSequence) -> Self {
        self.steps.extend(next.steps);
        self
    }

    /// Steps in order
    pub fn steps(&self) -> &[ActionStep] {
        &self.steps
    }

    /// Buttons in the order they are pressed
    pub fn buttons(&self) -> Vec<Button> {
        self.steps.iter().map(|s| s.button).collect()
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether there are no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromIterator<ActionStep> for ActionSequence {
    fn from_iter<I: IntoIterator<Item = ActionStep>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Timing for an [`ActionSequencer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerConfig {
    /// How long a step waits for its signal
    pub step_timeout: Duration,
    /// Pause after a settling step
    pub settle_delay: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

struct Job {
    name: String,
    sequence: ActionSequence,
    reply: oneshot::Sender<Result<(), ActionError>>,
}

/// Handle to a panel's action worker
///
/// Cheap to clone; all clones feed the same queue.
#[derive(Clone)]
pub struct ActionSequencer {
    panel: Arc<dyn Panel>,
    tx: mpsc::Sender<Job>,
}

impl fmt::Debug for ActionSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSequencer")
            .field("panel", &self.panel.core().name())
            .finish()
    }
}

impl ActionSequencer {
    /// Start the worker for `panel`; it stops when `shutdown` is cancelled
    pub fn spawn(panel: Arc<dyn Panel>, config: SequencerConfig, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(worker(panel.clone(), config, rx, shutdown));
        Self { panel, tx }
    }

    /// Panel the sequencer drives
    pub fn panel(&self) -> &Arc<dyn Panel> {
        &self.panel
    }

    /// Queue a sequence; resolves once queued, not once complete
    pub async fn submit(
        &self,
        name: impl Into<String>,
        sequence: ActionSequence,
    ) -> Result<ActionHandle, ActionError> {
        let name = name.into();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job {
                name: name.clone(),
                sequence,
                reply,
            })
            .await
            .map_err(|_| ActionError::SequencerClosed)?;
        Ok(ActionHandle { name, rx })
    }

    /// Queue a sequence and wait for it to finish
    pub async fn run(&self, name: impl Into<String>, sequence: ActionSequence) -> Result<(), ActionError> {
        self.submit(name, sequence).await?.wait().await
    }
}

/// Completion of a queued action
#[derive(Debug)]
pub struct ActionHandle {
    name: String,
    rx: oneshot::Receiver<Result<(), ActionError>>,
}

impl ActionHandle {
    /// Action name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the action to finish
    pub async fn wait(self) -> Result<(), ActionError> {
        self.rx.await.map_err(|_| ActionError::SequencerClosed)?
    }
}

async fn worker(
    panel: Arc<dyn Panel>,
    config: SequencerConfig,
    mut rx: mpsc::Receiver<Job>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let result = execute(panel.as_ref(), &config, &job.name, &job.sequence, &shutdown).await;
        if let Err(e) = &result {
            warn!(panel = panel.core().name(), action = %job.name, error = %e, "Action failed");
        }
        // the requester may not be waiting
        let _ = job.reply.send(result);
    }
    debug!(panel = panel.core().name(), "Action sequencer stopped");
}

async fn execute(
    panel: &dyn Panel,
    config: &SequencerConfig,
    name: &str,
    sequence: &ActionSequence,
    shutdown: &CancellationToken,
) -> Result<(), ActionError> {
    let core = panel.core();
    info!(panel = core.name(), action = name, steps = sequence.len(), "Action started");

    for (index, step) in sequence.steps().iter().enumerate() {
        // clear before queueing the press so a stale set cannot complete the step
        step.signal.clear();
        core.set_pending_button(step.button);
        let link_closed = || {
            core.clear_pending_button();
            ActionError::LinkClosed {
                action: name.to_string(),
                button: step.button.name,
            }
        };
        if core.is_released() {
            return Err(link_closed());
        }

        let completed = tokio::select! {
            _ = shutdown.cancelled() => {
                core.clear_pending_button();
                debug!(panel = core.name(), action = name, "Action abandoned at shutdown");
                return Ok(());
            }
            done = step.signal.wait_timeout(config.step_timeout) => done,
        };
        // a released panel sets its signals without the controller seeing the press
        if core.is_released() {
            return Err(link_closed());
        }
        if !completed {
            core.clear_pending_button();
            return Err(ActionError::StepTimeout {
                action: name.to_string(),
                button: step.button.name,
                signal: step.signal.name(),
                step: index,
            });
        }
        debug!(panel = core.name(), action = name, button = step.button.name, "Step complete");

        if step.settle {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(config.settle_delay) => {}
            }
        }
    }

    info!(panel = core.name(), action = name, "Action complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::PanelCore;
    use std::sync::Mutex;

    const PRESS: Button = Button::new("press", 0x42);
    const OTHER: Button = Button::new("other", 0x17);

    struct Fake {
        core: PanelCore,
        done: Arc<Signal>,
    }

    impl Panel for Fake {
        fn core(&self) -> &PanelCore {
            &self.core
        }

        fn parse_message(&self, _command: u8, _args: &[u8]) {}

        fn signals(&self) -> Vec<Arc<Signal>> {
            vec![self.done.clone()]
        }
    }

    fn fake() -> Arc<Fake> {
        Arc::new(Fake {
            core: PanelCore::new("fake", 0x09, 0x00),
            done: Arc::new(Signal::new("done")),
        })
    }

    /// Plays the controller: acknowledges presses and fires the signal
    fn controller(panel: Arc<Fake>, presses: Arc<Mutex<Vec<u8>>>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let code = panel.core.take_pending_button();
                if code != 0 {
                    presses.lock().unwrap().push(code);
                    panel.done.set();
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_run_in_order() {
        let panel = fake();
        let presses = Arc::new(Mutex::new(Vec::new()));
        let ctl = controller(panel.clone(), presses.clone());
        let sequencer = ActionSequencer::spawn(panel.clone(), SequencerConfig::default(), CancellationToken::new());

        let sequence: ActionSequence = [PRESS, OTHER, PRESS]
            .into_iter()
            .map(|b| ActionStep::new(b, panel.done.clone()))
            .collect();
        sequencer.run("three presses", sequence).await.unwrap();

        assert_eq!(*presses.lock().unwrap(), vec![0x42, 0x17, 0x42]);
        ctl.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_abandons_sequence() {
        let panel = fake();
        let sequencer = ActionSequencer::spawn(panel.clone(), SequencerConfig::default(), CancellationToken::new());
        let sequence = ActionSequence::new(vec![
            ActionStep::new(PRESS, panel.done.clone()),
            ActionStep::new(OTHER, panel.done.clone()),
        ]);

        let err = sequencer.run("stuck", sequence).await.unwrap_err();
        assert_eq!(
            err,
            ActionError::StepTimeout {
                action: "stuck".to_string(),
                button: "press",
                signal: "done",
                step: 0,
            }
        );
        assert_eq!(panel.core.pending_button(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_signal_does_not_complete_step() {
        let panel = fake();
        panel.done.set();
        let sequencer = ActionSequencer::spawn(panel.clone(), SequencerConfig::default(), CancellationToken::new());
        let result = sequencer
            .run("stale", ActionSequence::single(ActionStep::new(PRESS, panel.done.clone())))
            .await;
        assert!(matches!(result, Err(ActionError::StepTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_without_error() {
        let panel = fake();
        let shutdown = CancellationToken::new();
        let sequencer = ActionSequencer::spawn(panel.clone(), SequencerConfig::default(), shutdown.clone());
        let handle = sequencer
            .submit("pending", ActionSequence::single(ActionStep::new(PRESS, panel.done.clone())))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        assert_eq!(handle.wait().await, Ok(()));
        assert_eq!(panel.core.pending_button(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_fails_step() {
        let panel = fake();
        let sequencer = ActionSequencer::spawn(panel.clone(), SequencerConfig::default(), CancellationToken::new());
        let handle = sequencer
            .submit("cut off", ActionSequence::single(ActionStep::new(PRESS, panel.done.clone())))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        panel.release();
        assert_eq!(
            handle.wait().await,
            Err(ActionError::LinkClosed {
                action: "cut off".to_string(),
                button: "press",
            })
        );
        assert_eq!(panel.core.pending_button(), 0);

        // later requests fail at once until a link attaches the panel again
        let started = tokio::time::Instant::now();
        let result = sequencer
            .run("late", ActionSequence::single(ActionStep::new(OTHER, panel.done.clone())))
            .await;
        assert!(matches!(result, Err(ActionError::LinkClosed { button: "other", .. })));
        assert!(started.elapsed() < DEFAULT_STEP_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_serialized() {
        let panel = fake();
        let presses = Arc::new(Mutex::new(Vec::new()));
        let ctl = controller(panel.clone(), presses.clone());
        let sequencer = ActionSequencer::spawn(panel.clone(), SequencerConfig::default(), CancellationToken::new());

        let first = sequencer
            .submit(
                "first",
                ActionSequence::new(vec![
                    ActionStep::new(PRESS, panel.done.clone()).settled(),
                    ActionStep::new(PRESS, panel.done.clone()),
                ]),
            )
            .await
            .unwrap();
        let second = sequencer
            .submit("second", ActionSequence::single(ActionStep::new(OTHER, panel.done.clone())))
            .await
            .unwrap();

        first.wait().await.unwrap();
        second.wait().await.unwrap();
        assert_eq!(*presses.lock().unwrap(), vec![0x42, 0x42, 0x17]);
        ctl.abort();
    }
}

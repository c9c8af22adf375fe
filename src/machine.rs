//! Generic state machine contract and the serialized worker that runs it
//!
//! Every machine owns a private mailbox drained by one dedicated thread.
//! `send` only enqueues; `transition` only ever runs on that thread, so a
//! machine's state and resources need no locking. Other threads observe the
//! state through a `watch` snapshot that the worker republishes after every move.

use crate::errors::PipelineError;
use crate::host::Host;
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// A state variant that can describe itself for logging and UI reflection
pub trait MachineState: Clone + fmt::Debug + Send + Sync + 'static {
    /// Short name of the current phase
    fn phase(&self) -> &'static str;

    /// Whether the machine holds no resources in this state
    fn is_idle(&self) -> bool;
}

/// Transition logic of one machine.
///
/// Implementations pattern-match on `(state, action)`. A pair without a rule
/// returns `Ok(None)` and leaves the state untouched.
pub trait Machine: Send + 'static {
    type State: MachineState;
    type Action: fmt::Debug + Send + 'static;

    /// Used for the worker thread name and log lines
    const NAME: &'static str;

    fn initial_state(&self) -> Self::State;

    fn transition(
        &mut self,
        state: &Self::State,
        action: Self::Action,
        mailbox: &Mailbox<Self::Action>,
    ) -> Result<Option<Self::State>, PipelineError>;
}

/// Public face of a running machine
pub trait StateMachine {
    type State;
    type Action;

    /// Latest published state. Meant for UI reflection only.
    fn state(&self) -> Self::State;

    /// Enqueue an action. Never blocks.
    fn send(&self, action: Self::Action);
}

enum Envelope<A> {
    Action(A),
    Barrier(Sender<()>),
    Shutdown,
}

/// Cloneable handle for enqueueing actions on a machine.
///
/// Collaborator callbacks capture a mailbox and turn each asynchronous
/// completion into an action on the owning machine.
pub struct Mailbox<A> {
    name: &'static str,
    tx: Sender<Envelope<A>>,
}

impl<A> Clone for Mailbox<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<A: fmt::Debug + Send + 'static> Mailbox<A> {
    /// Enqueue an action, returning false when the worker has exited
    pub fn send(&self, action: A) -> bool {
        match self.tx.send(Envelope::Action(action)) {
            Ok(()) => true,
            Err(err) => {
                if let Envelope::Action(action) = err.into_inner() {
                    log::debug!("{}: dropped {:?}, worker has exited", self.name, action);
                }
                false
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<A> fmt::Debug for Mailbox<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox").field("name", &self.name).finish()
    }
}

/// A machine running on its own thread
pub struct Worker<M: Machine> {
    mailbox: Mailbox<M::Action>,
    state: watch::Receiver<M::State>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Machine> Worker<M> {
    /// Start the machine's worker thread
    pub fn spawn(machine: M, host: Arc<dyn Host>) -> Result<Self, PipelineError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mailbox = Mailbox { name: M::NAME, tx };
        let (state_tx, state_rx) = watch::channel(machine.initial_state());

        let loop_mailbox = mailbox.clone();
        let handle = std::thread::Builder::new()
            .name(format!("crabsurface-{}", M::NAME))
            .spawn(move || run(machine, rx, loop_mailbox, state_tx, host))
            .map_err(|e| PipelineError::WorkerSpawn(format!("{}: {}", M::NAME, e)))?;

        log::debug!("{}: worker started", M::NAME);

        Ok(Self {
            mailbox,
            state: state_rx,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn mailbox(&self) -> Mailbox<M::Action> {
        self.mailbox.clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<M::State> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Block until every action enqueued before this call has been processed.
    ///
    /// Returns false on timeout or if the worker has exited. Actions that
    /// collaborator callbacks enqueue later are not covered.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.mailbox.tx.send(Envelope::Barrier(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    /// Poll the published state until `predicate` holds or `timeout` elapses
    pub fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&M::State) -> bool,
    {
        let start = Instant::now();
        loop {
            if predicate(&self.state.borrow()) {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Stop the worker after it drains the actions already queued.
    ///
    /// Does not release the machine's resources; send the machine's stop
    /// action first.
    pub fn shutdown(&self, join_timeout: Duration) -> Result<(), PipelineError> {
        let _ = self.mailbox.tx.send(Envelope::Shutdown);

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(handle) = handle else {
            return Ok(());
        };

        if handle.thread().id() == std::thread::current().id() {
            // Dropped from inside its own transition; the loop exits on its own.
            return Ok(());
        }

        let start = Instant::now();
        while !handle.is_finished() {
            if start.elapsed() >= join_timeout {
                log::warn!("{}: worker did not exit within {:?}", M::NAME, join_timeout);
                *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                return Err(PipelineError::WorkerGone(M::NAME));
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        if handle.join().is_err() {
            log::error!("{}: worker panicked", M::NAME);
        }
        Ok(())
    }
}

impl<M: Machine> StateMachine for Worker<M> {
    type State = M::State;
    type Action = M::Action;

    fn state(&self) -> M::State {
        self.state.borrow().clone()
    }

    fn send(&self, action: M::Action) {
        self.mailbox.send(action);
    }
}

impl<M: Machine> Drop for Worker<M> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown(Duration::from_millis(500)) {
            log::warn!("Error shutting down worker in drop: {}", e);
        }
    }
}

fn run<M: Machine>(
    mut machine: M,
    rx: Receiver<Envelope<M::Action>>,
    mailbox: Mailbox<M::Action>,
    state_tx: watch::Sender<M::State>,
    host: Arc<dyn Host>,
) {
    let mut state = machine.initial_state();

    for envelope in rx.iter() {
        let action = match envelope {
            Envelope::Action(action) => action,
            Envelope::Barrier(ack) => {
                let _ = ack.send(());
                continue;
            }
            Envelope::Shutdown => break,
        };

        let label = format!("{:?}", action);
        match machine.transition(&state, action, &mailbox) {
            Ok(Some(next)) => {
                log::debug!("{}: {} -> {} on {}", M::NAME, state.phase(), next.phase(), label);
                state = next;
                state_tx.send_replace(state.clone());
            }
            Ok(None) => {
                log::trace!("{}: ignored {} in {}", M::NAME, label, state.phase());
            }
            Err(e) if e.is_fatal() => {
                log::error!("{}: fatal error on {}: {}", M::NAME, label, e);
                host.on_fatal(M::NAME, e);
                break;
            }
            Err(e) => {
                log::warn!("{}: {} failed in {}: {}", M::NAME, label, state.phase(), e);
            }
        }
    }

    log::debug!("{}: worker exiting in {}", M::NAME, state.phase());
}

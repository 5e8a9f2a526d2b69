//! Cross-thread call-and-wait onto the authoritative host thread.
//!
//! Callers on any thread hand a closure to [`CommandBridge`]; the thread that
//! owns the host state drains the matching [`BridgeReceiver`] from its own
//! loop, runs each closure against `&mut S`, and sends the outcome back on a
//! per-call reply channel. Callers wait at most the configured timeout.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, warn};
use webgate_runtime::CommandResult;

static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

fn next_correlation_id() -> u64 {
    NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("timed out after {}ms waiting for the host thread", .0.as_millis())]
    TimedOut(Duration),
    #[error("host thread is not accepting work")]
    Unavailable,
    #[error("host work queue is full")]
    QueueFull,
    #[error("{0}")]
    Failed(String),
    #[error("host work panicked: {0}")]
    Panicked(String),
}

impl BridgeError {
    /// True when the failure came from the bridge or host rather than from the
    /// work itself rejecting its input.
    pub fn is_internal(&self) -> bool {
        !matches!(self, BridgeError::Failed(_))
    }
}

/// Error returned by a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WorkError {
    message: String,
}

impl WorkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type UnitOfWork<S> = Box<dyn FnOnce(&mut S) -> Result<String, WorkError> + Send>;

/// A unit of work together with the id reported back in its [`CommandResult`].
pub struct CommandRequest<S> {
    pub correlation_id: u64,
    pub work: UnitOfWork<S>,
}

impl<S> CommandRequest<S> {
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&mut S) -> Result<String, WorkError> + Send + 'static,
    {
        Self {
            correlation_id: next_correlation_id(),
            work: Box::new(work),
        }
    }
}

struct Job<S> {
    correlation_id: u64,
    abandoned: Arc<AtomicBool>,
    run: Box<dyn FnOnce(&mut S) + Send>,
}

/// Submitting half, cheap to clone into every worker.
pub struct CommandBridge<S> {
    sender: Sender<Job<S>>,
    timeout: Duration,
}

impl<S> Clone for CommandBridge<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            timeout: self.timeout,
        }
    }
}

/// Executing half, owned by the authoritative thread.
pub struct BridgeReceiver<S> {
    receiver: Receiver<Job<S>>,
}

/// Create a bridge whose queue holds at most `capacity` pending units of work.
pub fn command_bridge<S: 'static>(
    capacity: usize,
    timeout: Duration,
) -> (CommandBridge<S>, BridgeReceiver<S>) {
    let (sender, receiver) = bounded(capacity.max(1));
    (
        CommandBridge { sender, timeout },
        BridgeReceiver { receiver },
    )
}

impl<S: 'static> CommandBridge<S> {
    /// Run `work` on the host thread and wait for its typed result.
    pub fn call<T, F>(&self, work: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> Result<T, WorkError> + Send + 'static,
    {
        self.call_with_id(next_correlation_id(), work)
    }

    /// Run a text-producing unit of work, folding every failure into the result.
    pub fn submit(&self, request: CommandRequest<S>) -> CommandResult {
        let CommandRequest {
            correlation_id,
            work,
        } = request;
        match self.call_with_id(correlation_id, work) {
            Ok(output) => CommandResult::succeeded(correlation_id, output),
            Err(err) => CommandResult::failed(correlation_id, err.to_string()),
        }
    }

    fn call_with_id<T, F>(&self, correlation_id: u64, work: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> Result<T, WorkError> + Send + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let (reply_tx, reply_rx) = bounded::<Result<T, BridgeError>>(1);
        let abandoned = Arc::new(AtomicBool::new(false));

        let job = Job {
            correlation_id,
            abandoned: Arc::clone(&abandoned),
            run: Box::new(move |state: &mut S| {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(state)));
                let result = match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(BridgeError::Failed(err.to_string())),
                    Err(payload) => Err(BridgeError::Panicked(panic_message(payload.as_ref()))),
                };
                if reply_tx.send(result).is_err() {
                    debug!(
                        target: "webgate::bridge",
                        correlation_id,
                        "bridge.result_discarded=caller_gone"
                    );
                }
            }),
        };

        match self.sender.send_timeout(job, self.timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(target: "webgate::bridge", correlation_id, "bridge.rejected=queue_full");
                return Err(BridgeError::QueueFull);
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(BridgeError::Unavailable);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match reply_rx.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                abandoned.store(true, Ordering::SeqCst);
                warn!(
                    target: "webgate::bridge",
                    correlation_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "bridge.timeout"
                );
                Err(BridgeError::TimedOut(self.timeout))
            }
            // job dropped unexecuted: the host loop went away
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Unavailable),
        }
    }
}

impl<S> BridgeReceiver<S> {
    /// Execute up to `budget` queued units of work without blocking.
    pub fn drain(&self, state: &mut S, budget: usize) -> usize {
        let mut ran = 0;
        while ran < budget {
            match self.receiver.try_recv() {
                Ok(job) => {
                    if self.execute(job, state) {
                        ran += 1;
                    }
                }
                Err(_) => break,
            }
        }
        ran
    }

    /// Execute units of work as they arrive until `deadline` or `budget` is reached.
    pub fn serve_until(&self, state: &mut S, deadline: Instant, budget: usize) -> usize {
        let mut ran = 0;
        while ran < budget {
            match self.receiver.recv_deadline(deadline) {
                Ok(job) => {
                    if self.execute(job, state) {
                        ran += 1;
                    }
                }
                Err(_) => break,
            }
        }
        ran
    }

    fn execute(&self, job: Job<S>, state: &mut S) -> bool {
        if job.abandoned.load(Ordering::SeqCst) {
            debug!(
                target: "webgate::bridge",
                correlation_id = job.correlation_id,
                "bridge.skipped=caller_gone"
            );
            return false;
        }
        (job.run)(state);
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spawn_host(
        receiver: BridgeReceiver<Vec<String>>,
        stop: Arc<AtomicBool>,
    ) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let mut state = Vec::new();
            while !stop.load(Ordering::SeqCst) {
                let deadline = Instant::now() + Duration::from_millis(5);
                receiver.serve_until(&mut state, deadline, 16);
            }
            state
        })
    }

    #[test]
    fn call_round_trips_through_host_thread() {
        let (bridge, receiver) = command_bridge::<Vec<String>>(8, Duration::from_secs(2));
        let stop = Arc::new(AtomicBool::new(false));
        let host = spawn_host(receiver, Arc::clone(&stop));

        let len = bridge
            .call(|state: &mut Vec<String>| {
                state.push("first".into());
                Ok(state.len())
            })
            .unwrap();
        assert_eq!(len, 1);

        stop.store(true, Ordering::SeqCst);
        assert_eq!(host.join().unwrap(), vec!["first".to_string()]);
    }

    #[test]
    fn failing_work_becomes_failed_result() {
        let (bridge, receiver) = command_bridge::<Vec<String>>(8, Duration::from_secs(2));
        let stop = Arc::new(AtomicBool::new(false));
        let host = spawn_host(receiver, Arc::clone(&stop));

        let result = bridge.submit(CommandRequest::new(|_: &mut Vec<String>| {
            Err(WorkError::new("no such player"))
        }));
        assert!(!result.success);
        assert_eq!(result.error_message(), "no such player");

        let ok = bridge.submit(CommandRequest::new(|_: &mut Vec<String>| Ok("fine".into())));
        assert!(ok.success);
        assert_eq!(ok.output, "fine");

        stop.store(true, Ordering::SeqCst);
        host.join().unwrap();
    }

    #[test]
    fn panicking_work_does_not_kill_host_thread() {
        let (bridge, receiver) = command_bridge::<Vec<String>>(8, Duration::from_secs(2));
        let stop = Arc::new(AtomicBool::new(false));
        let host = spawn_host(receiver, Arc::clone(&stop));

        let err = bridge
            .call(|_: &mut Vec<String>| -> Result<(), WorkError> { panic!("host exploded") })
            .unwrap_err();
        assert_eq!(err, BridgeError::Panicked("host exploded".into()));
        assert!(err.is_internal());

        let after = bridge.call(|state: &mut Vec<String>| Ok(state.len()));
        assert_eq!(after, Ok(0));

        stop.store(true, Ordering::SeqCst);
        host.join().unwrap();
    }

    #[test]
    fn stalled_host_times_out_within_bound() {
        let timeout = Duration::from_millis(100);
        let (bridge, receiver) = command_bridge::<Vec<String>>(8, timeout);

        let started = Instant::now();
        let result = bridge.submit(CommandRequest::new(|_: &mut Vec<String>| Ok("late".into())));
        let elapsed = started.elapsed();

        assert!(!result.success);
        assert!(result.error_message().contains("timed out"));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_secs(1));

        // the host wakes up later; the abandoned job must not run
        let mut state = Vec::new();
        assert_eq!(receiver.drain(&mut state, 16), 0);
        assert!(state.is_empty());
    }

    #[test]
    fn slow_work_result_is_discarded_after_timeout() {
        let (bridge, receiver) = command_bridge::<Vec<String>>(8, Duration::from_millis(200));
        let stop = Arc::new(AtomicBool::new(false));
        let host = spawn_host(receiver, Arc::clone(&stop));

        let err = bridge
            .call(|state: &mut Vec<String>| {
                thread::sleep(Duration::from_millis(400));
                state.push("slow".into());
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, BridgeError::TimedOut(_)));
        thread::sleep(Duration::from_millis(400));

        // the next caller sees its own result, never the stale one
        let len = bridge.call(|state: &mut Vec<String>| Ok(state.len())).unwrap();
        assert_eq!(len, 1);

        stop.store(true, Ordering::SeqCst);
        host.join().unwrap();
    }

    #[test]
    fn dropped_receiver_reports_unavailable() {
        let (bridge, receiver) = command_bridge::<Vec<String>>(8, Duration::from_secs(5));
        drop(receiver);

        let started = Instant::now();
        let err = bridge.call(|_: &mut Vec<String>| Ok(())).unwrap_err();
        assert_eq!(err, BridgeError::Unavailable);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn full_queue_rejects_after_timeout() {
        let (bridge, _receiver) = command_bridge::<Vec<String>>(1, Duration::from_millis(50));
        let filler = bridge.clone();
        let first = thread::spawn(move || filler.call(|_: &mut Vec<String>| Ok(())));
        thread::sleep(Duration::from_millis(10));

        let err = bridge.call(|_: &mut Vec<String>| Ok(())).unwrap_err();
        assert_eq!(err, BridgeError::QueueFull);
        assert!(matches!(first.join().unwrap(), Err(BridgeError::TimedOut(_))));
    }

    #[test]
    fn concurrent_callers_each_get_their_own_result() {
        let (bridge, receiver) = command_bridge::<Vec<String>>(64, Duration::from_secs(5));
        let stop = Arc::new(AtomicBool::new(false));
        let host = spawn_host(receiver, Arc::clone(&stop));

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let bridge = bridge.clone();
                thread::spawn(move || {
                    bridge
                        .call(move |state: &mut Vec<String>| {
                            state.push(format!("worker-{n}"));
                            Ok(n)
                        })
                        .unwrap()
                })
            })
            .collect();
        let mut answers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        answers.sort_unstable();
        assert_eq!(answers, (0..8).collect::<Vec<_>>());

        stop.store(true, Ordering::SeqCst);
        assert_eq!(host.join().unwrap().len(), 8);
    }
}

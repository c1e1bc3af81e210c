//! Runs operations under a command's deadline, admission pool and circuit.
//!
//! Every call spawns two tasks. The worker checks the circuit, takes a
//! ticket and runs the operation; the deadline task waits for the worker
//! or for the command's timeout, whichever comes first. Both may try to
//! resolve the call, but only the first one to claim it reports an outcome
//! and runs the fallback.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::circuit::CircuitBreaker;
use crate::config::{CommandConfig, ExecutorBuilder};
use crate::error::{BoxError, CommandError, CommandResult};
use crate::event::EventKind;
use crate::pool::{AdmissionPool, Ticket};
use crate::registry::{Command, CommandRegistry};

type Operation = BoxFuture<'static, Result<(), BoxError>>;
type FallbackFn = Box<dyn FnOnce(CommandError) -> Operation + Send>;

/// Substitute behavior run when a call is short-circuited, rejected, times
/// out or fails. It receives the error that triggered it.
pub struct Fallback {
    run: FallbackFn,
}

impl Fallback {
    /// Wraps an async closure as a fallback.
    pub fn new<F, Fut, E>(f: F) -> Self
    where
        F: FnOnce(CommandError) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self {
            run: Box::new(move |cause| {
                async move { f(cause).await.map_err(Into::<BoxError>::into) }.boxed()
            }),
        }
    }

    fn call(self, cause: CommandError) -> Operation {
        (self.run)(cause)
    }
}

impl fmt::Debug for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fallback")
    }
}

/// Receives the outcome of an asynchronous execution.
///
/// Resolves to `Ok(())` when the call was resolved without an error and to
/// `Err` when exactly one error was delivered.
#[derive(Debug)]
#[must_use = "the outcome of the call is only observable through the handle"]
pub struct ResultHandle {
    rx: oneshot::Receiver<CommandError>,
}

impl ResultHandle {
    fn failed(err: CommandError) -> Self {
        let (tx, rx) = oneshot::channel();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(err);
        Self { rx }
    }

    /// Returns the outcome if the call has been resolved, without waiting.
    pub fn try_result(&mut self) -> Option<CommandResult> {
        match self.rx.try_recv() {
            Ok(err) => Some(Err(err)),
            Err(oneshot::error::TryRecvError::Closed) => Some(Ok(())),
            Err(oneshot::error::TryRecvError::Empty) => None,
        }
    }
}

impl Future for ResultHandle {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(err)) => Poll::Ready(Err(err)),
            Poll::Ready(Err(_closed)) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

enum TicketSlot {
    Empty,
    Held(Ticket),
    Closed,
}

enum Admission {
    Granted,
    Full,
    Abandoned,
}

/// Bookkeeping of one in-flight call, shared by its worker and deadline tasks.
struct Call {
    circuit: CircuitBreaker,
    start: Instant,
    resolved: Mutex<bool>,
    fallback_claimed: AtomicBool,
    fallback: Mutex<Option<Fallback>>,
    result_tx: Mutex<Option<oneshot::Sender<CommandError>>>,
    ticket: Mutex<TicketSlot>,
}

impl Call {
    fn name(&self) -> &str {
        self.circuit.name()
    }

    fn is_resolved(&self) -> bool {
        *self.resolved.lock()
    }

    /// Marks the call resolved. Only the first caller gets true.
    fn claim(&self) -> bool {
        let mut resolved = self.resolved.lock();
        if *resolved {
            return false;
        }
        *resolved = true;
        true
    }

    fn report(&self, kind: EventKind, run_duration: Duration) {
        self.circuit.report_event(kind, self.start, run_duration);
    }

    fn acquire_ticket(&self, pool: &AdmissionPool) -> Admission {
        let mut slot = self.ticket.lock();
        if matches!(*slot, TicketSlot::Closed) {
            return Admission::Abandoned;
        }
        match pool.try_acquire() {
            Some(ticket) => {
                *slot = TicketSlot::Held(ticket);
                Admission::Granted
            }
            None => Admission::Full,
        }
    }

    /// Returns the ticket, if any, and keeps the worker from taking one later.
    fn release_ticket(&self) {
        let previous = std::mem::replace(&mut *self.ticket.lock(), TicketSlot::Closed);
        drop(previous);
    }

    /// Runs the fallback at most once and delivers the outcome.
    async fn resolve_with_fallback(&self, cause: CommandError, run_duration: Duration) {
        if self.fallback_claimed.swap(true, Ordering::AcqRel) {
            return;
        }

        let fallback = self.fallback.lock().take();
        let outcome = match fallback {
            None => Err(cause),
            Some(fallback) => {
                let run = fallback.call(cause.clone());
                match guarded(self.name(), "fallback", run).await {
                    Ok(()) => {
                        self.report(EventKind::FallbackSuccess, run_duration);
                        Ok(())
                    }
                    Err(fallback_err) => {
                        self.report(EventKind::FallbackFailure, run_duration);
                        Err(CommandError::fallback(cause, fallback_err))
                    }
                }
            }
        };
        self.deliver(outcome);
    }

    /// Sends the error, if any, and closes the result channel.
    fn deliver(&self, outcome: CommandResult) {
        let Some(tx) = self.result_tx.lock().take() else {
            return;
        };
        if let Err(err) = outcome {
            // The caller may have dropped its handle.
            let _ = tx.send(err);
        }
    }
}

/// Executes operations as named commands.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct CommandExecutor {
    registry: Arc<CommandRegistry>,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor {
    /// Creates an executor with default settings and an empty registry.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(CommandRegistry::default()))
    }

    /// Creates an executor on top of an existing registry.
    pub fn with_registry(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    /// Creates a builder for customizing an executor.
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// The registry holding this executor's commands.
    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Configures a command. Has no effect on a command already in use.
    pub fn configure(&self, name: impl Into<String>, config: CommandConfig) {
        self.registry.settings().configure(name, config);
    }

    /// The circuit of `name`, creating the command if needed.
    pub fn circuit(&self, name: &str) -> Result<CircuitBreaker, CommandError> {
        Ok(self.registry.get_or_create(name)?.circuit().clone())
    }

    /// Starts `run` as command `name` and returns immediately.
    ///
    /// Outside a Tokio runtime the handle resolves to
    /// [`CommandError::NoRuntime`] without running anything. The operation is never
    /// cancelled: if the deadline fires first it keeps running in the
    /// background, but its result is ignored.
    pub fn execute<Fut, E>(&self, name: &str, run: Fut, fallback: Option<Fallback>) -> ResultHandle
    where
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return ResultHandle::failed(CommandError::NoRuntime);
        };
        let command = match self.registry.get_or_create(name) {
            Ok(command) => command,
            Err(err) => return ResultHandle::failed(err.into()),
        };

        let (result_tx, rx) = oneshot::channel();
        let call = Arc::new(Call {
            circuit: command.circuit().clone(),
            start: Instant::now(),
            resolved: Mutex::new(false),
            fallback_claimed: AtomicBool::new(false),
            fallback: Mutex::new(fallback),
            result_tx: Mutex::new(Some(result_tx)),
            ticket: Mutex::new(TicketSlot::Empty),
        });

        let run: Operation = async move { run.await.map_err(Into::<BoxError>::into) }.boxed();
        let (finished_tx, finished_rx) = oneshot::channel::<()>();
        runtime.spawn(run_worker(Arc::clone(&call), command.clone(), run, finished_tx));
        runtime.spawn(run_deadline(call, command.settings().timeout, finished_rx));

        ResultHandle { rx }
    }

    /// Runs `run` as command `name` and waits for the call to be resolved.
    ///
    /// A resolution without error closes the result channel, which is what
    /// wakes the caller on success; by then the outcome has been reported to
    /// the circuit.
    pub async fn execute_sync<Fut, E>(
        &self,
        name: &str,
        run: Fut,
        fallback: Option<Fallback>,
    ) -> CommandResult
    where
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.execute(name, run, fallback).await
    }
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("commands", &self.registry.len())
            .finish()
    }
}

async fn run_worker(
    call: Arc<Call>,
    command: Arc<Command>,
    run: Operation,
    finished: oneshot::Sender<()>,
) {
    // The deadline may have resolved the call before this task got scheduled.
    if call.is_resolved() {
        return;
    }

    if !call.circuit.allow_request() {
        drop(finished);
        if call.claim() {
            debug!(command = call.name(), "short-circuited");
            call.report(EventKind::ShortCircuited, Duration::ZERO);
            call.resolve_with_fallback(CommandError::CircuitOpen, Duration::ZERO)
                .await;
        }
        return;
    }

    match call.acquire_ticket(command.pool()) {
        Admission::Granted => {}
        Admission::Full => {
            drop(finished);
            if call.claim() {
                debug!(command = call.name(), "rejected, no free ticket");
                call.report(EventKind::Rejected, Duration::ZERO);
                call.resolve_with_fallback(CommandError::MaxConcurrency, Duration::ZERO)
                    .await;
            }
            return;
        }
        Admission::Abandoned => return,
    }

    let run_start = Instant::now();
    let result = guarded(call.name(), "operation", run).await;
    let run_duration = run_start.elapsed();
    drop(finished);

    if !call.claim() {
        if let Err(err) = result {
            debug!(command = call.name(), error = %err, "operation failed after its deadline");
        }
        return;
    }

    match result {
        Ok(()) => {
            call.report(EventKind::Success, run_duration);
            call.deliver(Ok(()));
        }
        Err(err) => {
            call.report(EventKind::Failure, run_duration);
            call.resolve_with_fallback(CommandError::operation(err), run_duration)
                .await;
        }
    }
}

/// Runs `fut`, turning a panic into an error so the call still resolves.
async fn guarded(command: &str, stage: &str, fut: Operation) -> Result<(), BoxError> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(command, stage, panic_message = %message, "panic caught");
            Err(format!("{stage} panicked: {message}").into())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}

async fn run_deadline(call: Arc<Call>, timeout: Duration, finished: oneshot::Receiver<()>) {
    let timed_out = tokio::select! {
        _ = finished => false,
        _ = tokio::time::sleep(timeout) => true,
    };
    call.release_ticket();

    if timed_out && call.claim() {
        debug!(command = call.name(), ?timeout, "deadline exceeded");
        call.report(EventKind::Timeout, Duration::ZERO);
        call.resolve_with_fallback(CommandError::Timeout, Duration::ZERO)
            .await;
    }
}

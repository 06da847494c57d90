//! Periodic change detection over a set of registered device targets. One
//! background worker per monitor polls every target each cycle, diffs the
//! values against the last observed snapshot and dispatches user callbacks.

use crate::client::PlcClient;
use crate::device::{DeviceType, Value};
use crate::error::{PlcError, PlcResult};
use crate::logging::{self, debug, error, warn, Logger};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Read access to device points, the seam between the monitor and the
/// session. The returned vector holds exactly `count` values.
pub trait DeviceReader {
    fn read_points(&mut self, device: DeviceType, number: u32, count: u16) -> PlcResult<Vec<Value>>;
}

impl DeviceReader for PlcClient {
    #[inline]
    fn read_points(&mut self, device: DeviceType, number: u32, count: u16) -> PlcResult<Vec<Value>> {
        PlcClient::read_points(self, device, number, count)
    }
}

/// Invoked with (class, number, old, new) for every detected transition.
pub type ChangeCallback = Box<dyn Fn(DeviceType, u32, Value, Value) + Send>;
/// Invoked with the target identity and the error when a poll fails.
pub type ErrorCallback = Box<dyn Fn(DeviceType, &TargetId, &PlcError) + Send>;

/// Identifies a registration in error callbacks and log lines.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TargetId {
    Point(u32),
    Range { start: u32, count: u16 },
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TargetId::Point(number) => write!(f, "{}", number),
            TargetId::Range { start, count } => {
                write!(f, "{}-{}", start, start + u32::from(*count).saturating_sub(1))
            }
        }
    }
}

/// Opaque identifier assigned to each registration.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TargetHandle(u64);

impl fmt::Display for TargetHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

struct PointTarget {
    handle: TargetHandle,
    device: DeviceType,
    number: u32,
    last: Option<Value>,
    on_change: ChangeCallback,
    on_error: ErrorCallback,
}

impl PointTarget {
    /// Stores the new value and dispatches the change callback when a
    /// previous observation exists and differs. The first successful read
    /// only seeds the snapshot.
    fn update(&mut self, value: Value, log: &Logger) {
        let previous = self.last.replace(value);

        if let Some(old) = previous {
            if old != value {
                dispatch_change(&self.on_change, self.device, self.number, old, value, log);
            }
        }
    }

    fn dispatch_error(&self, error: &PlcError, log: &Logger) {
        let id = TargetId::Point(self.number);
        dispatch_error(&self.on_error, self.device, &id, error, log);
    }
}

struct RangeTarget {
    handle: TargetHandle,
    device: DeviceType,
    start: u32,
    count: u16,
    last: Option<Vec<Value>>,
    on_change: ChangeCallback,
    on_error: ErrorCallback,
}

impl RangeTarget {
    /// Replaces the snapshot with the new vector, dispatching one change
    /// callback per differing position in ascending order.
    fn update(&mut self, values: Vec<Value>, log: &Logger) {
        if let Some(old_values) = self.last.take() {
            for (index, (old, new)) in old_values.iter().zip(values.iter()).enumerate() {
                if old != new {
                    let number = self.start + index as u32;
                    dispatch_change(&self.on_change, self.device, number, *old, *new, log);
                }
            }
        }

        self.last = Some(values);
    }

    fn dispatch_error(&self, error: &PlcError, log: &Logger) {
        let id = TargetId::Range {
            start: self.start,
            count: self.count,
        };
        dispatch_error(&self.on_error, self.device, &id, error, log);
    }
}

/// Runs a user change callback inside a panic guard. A misbehaving callback
/// is logged and never unwinds into the worker.
fn dispatch_change(
    callback: &ChangeCallback,
    device: DeviceType,
    number: u32,
    old: Value,
    new: Value,
    log: &Logger,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| callback(device, number, old, new)));

    if outcome.is_err() {
        error!(log, "change callback panicked";
               "context" => "dispatch",
               "device" => %device,
               "number" => number);
    }
}

fn dispatch_error(
    callback: &ErrorCallback,
    device: DeviceType,
    id: &TargetId,
    error: &PlcError,
    log: &Logger,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| callback(device, id, error)));

    if outcome.is_err() {
        error!(log, "error callback panicked";
               "context" => "dispatch",
               "device" => %device,
               "target" => %id);
    }
}

#[derive(Default)]
struct Targets {
    points: Vec<PointTarget>,
    ranges: Vec<RangeTarget>,
}

struct MonitorInner<R> {
    reader: Mutex<R>,
    targets: Mutex<Targets>,
    interval: Mutex<Duration>,
    running: AtomicBool,
    next_handle: AtomicU64,
}

/// Locks a mutex, recovering the guard from a poisoned lock. A panic inside
/// a lock scope cannot leave the target lists half-updated in a way that
/// matters to the next cycle.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One polling pass over every registered target, points first, in insertion
/// order. The reader lock is held per read only, never across a callback.
fn run_cycle<R: DeviceReader>(
    reader: &Mutex<R>,
    targets: &mut Targets,
    running: &AtomicBool,
    log: &Logger,
) {
    for target in &mut targets.points {
        if !running.load(Ordering::SeqCst) {
            return;
        }

        let result = lock(reader).read_points(target.device, target.number, 1);

        match result {
            Ok(values) => {
                if let Some(value) = values.into_iter().next() {
                    target.update(value, log);
                }
            }
            Err(err) => {
                error!(log, "failed to read device";
                       "context" => "cycle",
                       "device" => %target.device,
                       "number" => target.number,
                       "error" => %err);
                target.dispatch_error(&err, log);
            }
        }
    }

    for target in &mut targets.ranges {
        if !running.load(Ordering::SeqCst) {
            return;
        }

        let result = lock(reader).read_points(target.device, target.start, target.count);

        match result {
            Ok(values) => target.update(values, log),
            Err(err) => {
                error!(log, "failed to read device range";
                       "context" => "cycle",
                       "device" => %target.device,
                       "start" => target.start,
                       "count" => target.count,
                       "error" => %err);
                target.dispatch_error(&err, log);
            }
        }
    }
}

fn worker_loop<R: DeviceReader>(inner: Arc<MonitorInner<R>>, log: Logger) {
    debug!(log, "monitor worker running"; "context" => "worker");

    while inner.running.load(Ordering::SeqCst) {
        let cycle_start = Instant::now();

        {
            let mut targets = lock(&inner.targets);
            run_cycle(&inner.reader, &mut targets, &inner.running, &log);
        }

        let interval = *lock(&inner.interval);
        let elapsed = cycle_start.elapsed();

        if !inner.running.load(Ordering::SeqCst) {
            break;
        }

        if elapsed < interval {
            thread::sleep(interval - elapsed);
        } else {
            warn!(log, "monitoring cycle exceeded the interval";
                  "context" => "worker",
                  "elapsed_ms" => elapsed.as_millis() as u64,
                  "interval_ms" => interval.as_millis() as u64);
        }
    }

    debug!(log, "monitor worker exiting"; "context" => "worker");
}

/// Polls registered targets through a [`DeviceReader`] on a dedicated worker
/// and dispatches change and error callbacks.
///
/// Target mutations (`add_*`, `remove_*`, `clear`) are permitted in any
/// state and take effect at the next cycle boundary. Callbacks run on the
/// worker and must not call back into the monitor.
pub struct PlcMonitor<R: DeviceReader = PlcClient> {
    inner: Arc<MonitorInner<R>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    log: Logger,
}

impl<R: DeviceReader + Send + 'static> PlcMonitor<R> {
    /// Creates an idle monitor polling through `reader` every `interval`.
    pub fn new<'a, L: Into<Option<&'a Logger>>>(
        reader: R,
        interval: Duration,
        log: L,
    ) -> PlcMonitor<R> {
        PlcMonitor {
            inner: Arc::new(MonitorInner {
                reader: Mutex::new(reader),
                targets: Mutex::new(Targets::default()),
                interval: Mutex::new(interval),
                running: AtomicBool::new(false),
                next_handle: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
            log: logging::unwrap_or_discard(log.into()),
        }
    }

    /// Creates a monitor and starts it immediately.
    pub fn started<'a, L: Into<Option<&'a Logger>>>(
        reader: R,
        interval: Duration,
        log: L,
    ) -> PlcMonitor<R> {
        let monitor = PlcMonitor::new(reader, interval, log);
        monitor.start(None);
        monitor
    }

    /// Registers a single point. The value is read immediately to seed the
    /// snapshot; a failure routes to `on_error` but does not prevent the
    /// registration, subsequent cycles will retry.
    pub fn add_point<C, E>(
        &self,
        device: DeviceType,
        number: u32,
        on_change: C,
        on_error: E,
    ) -> TargetHandle
    where
        C: Fn(DeviceType, u32, Value, Value) + Send + 'static,
        E: Fn(DeviceType, &TargetId, &PlcError) + Send + 'static,
    {
        let mut target = PointTarget {
            handle: self.next_handle(),
            device,
            number,
            last: None,
            on_change: Box::new(on_change),
            on_error: Box::new(on_error),
        };

        let seed = lock(&self.inner.reader).read_points(device, number, 1);
        match seed {
            Ok(values) => target.last = values.into_iter().next(),
            Err(err) => {
                warn!(self.log, "failed to read initial value";
                      "context" => "add_point",
                      "device" => %device,
                      "number" => number,
                      "error" => %err);
                target.dispatch_error(&err, &self.log);
            }
        }

        let handle = target.handle;
        lock(&self.inner.targets).points.push(target);

        debug!(self.log, "point registered";
               "context" => "add_point",
               "handle" => %handle,
               "device" => %device,
               "number" => number);

        handle
    }

    /// Registers a contiguous range read as one batch per cycle.
    pub fn add_range<C, E>(
        &self,
        device: DeviceType,
        start: u32,
        count: u16,
        on_change: C,
        on_error: E,
    ) -> TargetHandle
    where
        C: Fn(DeviceType, u32, Value, Value) + Send + 'static,
        E: Fn(DeviceType, &TargetId, &PlcError) + Send + 'static,
    {
        let mut target = RangeTarget {
            handle: self.next_handle(),
            device,
            start,
            count,
            last: None,
            on_change: Box::new(on_change),
            on_error: Box::new(on_error),
        };

        let seed = lock(&self.inner.reader).read_points(device, start, count);
        match seed {
            Ok(values) => target.last = Some(values),
            Err(err) => {
                warn!(self.log, "failed to read initial values";
                      "context" => "add_range",
                      "device" => %device,
                      "start" => start,
                      "count" => count,
                      "error" => %err);
                target.dispatch_error(&err, &self.log);
            }
        }

        let handle = target.handle;
        lock(&self.inner.targets).ranges.push(target);

        debug!(self.log, "range registered";
               "context" => "add_range",
               "handle" => %handle,
               "device" => %device,
               "start" => start,
               "count" => count);

        handle
    }

    /// Removes the first point registration matching (class, number).
    /// Returns whether one existed.
    pub fn remove_point(&self, device: DeviceType, number: u32) -> bool {
        let mut targets = lock(&self.inner.targets);

        match targets
            .points
            .iter()
            .position(|target| target.device == device && target.number == number)
        {
            Some(index) => {
                targets.points.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes the first range registration matching (class, start, count).
    /// Returns whether one existed.
    pub fn remove_range(&self, device: DeviceType, start: u32, count: u16) -> bool {
        let mut targets = lock(&self.inner.targets);

        match targets.ranges.iter().position(|target| {
            target.device == device && target.start == start && target.count == count
        }) {
            Some(index) => {
                targets.ranges.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes every registration. Safe while running.
    pub fn clear(&self) {
        let mut targets = lock(&self.inner.targets);
        targets.points.clear();
        targets.ranges.clear();
    }

    /// Starts the worker. Idempotent; when already running only the interval
    /// is updated.
    pub fn start(&self, interval: Option<Duration>) {
        if let Some(interval) = interval {
            *lock(&self.inner.interval) = interval;
        }

        let mut worker = lock(&self.worker);

        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!(self.log, "monitor already running"; "context" => "start");
            return;
        }

        let inner = self.inner.clone();
        let log = self.log.clone();
        *worker = Some(thread::spawn(move || worker_loop(inner, log)));

        debug!(self.log, "monitor started"; "context" => "start");
    }

    /// Stops the worker, waiting for it to exit for at most twice the
    /// polling interval. The in-flight read completes before exit.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);

        let handle = lock(&self.worker).take();

        if let Some(handle) = handle {
            let deadline = Instant::now() + *lock(&self.inner.interval) * 2;

            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }

            if handle.is_finished() {
                if handle.join().is_err() {
                    error!(self.log, "monitor worker panicked"; "context" => "stop");
                }
            } else {
                warn!(self.log, "monitor worker did not stop within the join deadline";
                      "context" => "stop");
            }
        }

        debug!(self.log, "monitor stopped"; "context" => "stop");
    }

    /// Whether the worker is currently running.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn next_handle(&self) -> TargetHandle {
        TargetHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed))
    }
}

//! Timer-driven sampling of the registered sensor tasks.
//!
//! One [`Scheduler::run`] future (an embassy task on the board) ticks every
//! `period_ms` while armed and runs every registered task to completion, each
//! writing into its own slot of the caller's buffer. After the last task it
//! raises a single-slot "cycle ready" signal that [`Scheduler::wait_for_cycle`]
//! consumes. A slow consumer sees the latest cycle, never a backlog.
//!
//! The task table, the bus and the buffer sit behind one async mutex that a
//! cycle holds from start to end. Registration and teardown take the same
//! lock, so they never interleave with a running cycle.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Instant, Ticker};
use embedded_hal::i2c::I2c;
use heapless::Vec;

use crate::config::{OrientationConfig, CYCLE_WAIT_PERIODS, MAX_TASKS};
use crate::error::SchedulerError;
use crate::tasks::sensor::{SensorTask, TaskDescriptor, TaskKind, TaskSlot};

// ── State ────────────────────────────────────────────────────────────────────

struct Armed<'b> {
    period_ms: u32,
    buffer: &'b mut [u8],
    tasks: Vec<TaskDescriptor, MAX_TASKS>,
}

struct Inner<'b, I2C> {
    bus: I2C,
    armed: Option<Armed<'b>>,
}

/// A rejected [`Scheduler::init`]. The buffer comes back untouched.
#[derive(Debug, PartialEq, Eq)]
pub struct InitError<'b> {
    pub error: SchedulerError,
    pub buffer: &'b mut [u8],
}

pub struct Scheduler<'b, I2C> {
    inner: Mutex<CriticalSectionRawMutex, Inner<'b, I2C>>,
    orientation: OrientationConfig,
    /// Rendezvous with the consumer, set once per completed cycle.
    cycle_ready: Signal<CriticalSectionRawMutex, ()>,
    /// Wakes `run()` with a new period.
    arm: Signal<CriticalSectionRawMutex, u32>,
    /// 0 while disarmed.
    period_ms: AtomicU32,
    cycle_count: AtomicU32,
    max_cycle_us: AtomicU32,
}

impl<'b, I2C: I2c> Scheduler<'b, I2C> {
    pub fn new(bus: I2C) -> Self {
        Self::with_config(bus, OrientationConfig::default())
    }

    /// `orientation` applies to every Orientation task registered later.
    pub fn with_config(bus: I2C, orientation: OrientationConfig) -> Self {
        Self {
            inner: Mutex::new(Inner { bus, armed: None }),
            orientation,
            cycle_ready: Signal::new(),
            arm: Signal::new(),
            period_ms: AtomicU32::new(0),
            cycle_count: AtomicU32::new(0),
            max_cycle_us: AtomicU32::new(0),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Arm the timer with `period_ms` and bind the output buffer.
    ///
    /// Resets the cycle counter and the worst-case duration.
    pub async fn init(&self, period_ms: u32, buffer: &'b mut [u8]) -> Result<(), InitError<'b>> {
        let mut inner = self.inner.lock().await;
        let rejected = if inner.armed.is_some() {
            Some(SchedulerError::AlreadyInitialized)
        } else if period_ms == 0 {
            Some(SchedulerError::InvalidPeriod)
        } else if buffer.is_empty() {
            Some(SchedulerError::BufferTooSmall)
        } else {
            None
        };
        if let Some(error) = rejected {
            return Err(InitError { error, buffer });
        }

        let len = buffer.len();
        inner.armed = Some(Armed {
            period_ms,
            buffer,
            tasks: Vec::new(),
        });
        self.cycle_count.store(0, Ordering::Relaxed);
        self.max_cycle_us.store(0, Ordering::Relaxed);
        self.cycle_ready.reset();
        self.period_ms.store(period_ms, Ordering::Relaxed);
        self.arm.signal(period_ms);

        log_info!("scheduler: armed, period {} ms, buffer {} bytes", period_ms, len);
        Ok(())
    }

    /// Stop the timer, tear down every task and hand the buffer back.
    ///
    /// Waits for a cycle in flight to finish first. Returns `None` if the
    /// scheduler was not armed.
    pub async fn deinit(&self) -> Option<&'b mut [u8]> {
        self.arm.reset();
        self.period_ms.store(0, Ordering::Relaxed);

        let mut inner = self.inner.lock().await;
        let Armed { buffer, tasks, .. } = inner.armed.take()?;
        let count = tasks.len();
        for descriptor in tasks {
            descriptor.task.teardown();
        }

        log_info!(
            "scheduler: disarmed after {} cycles, {} tasks released",
            self.cycle_count(),
            count
        );
        Some(buffer)
    }

    /// Consume the scheduler and return the bus.
    pub fn release(self) -> I2C {
        self.inner.into_inner().bus
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Set up a `kind` device at `address` and give it the slot at `offset`.
    pub async fn register_task(
        &self,
        kind: TaskKind,
        address: u8,
        offset: usize,
    ) -> Result<TaskSlot, SchedulerError> {
        let mut inner = self.inner.lock().await;
        let Inner { bus, armed } = &mut *inner;
        let armed = armed.as_mut().ok_or(SchedulerError::NotInitialized)?;

        if armed.tasks.is_full() {
            return Err(SchedulerError::CapacityExceeded);
        }

        let slot = TaskSlot {
            offset,
            len: kind.buffer_len(),
        };
        let fits = offset
            .checked_add(slot.len)
            .is_some_and(|end| end <= armed.buffer.len());
        if !fits || armed.tasks.iter().any(|t| t.slot.overlaps(&slot)) {
            return Err(SchedulerError::BufferOverlapOrOverflow);
        }

        let task = SensorTask::setup(kind, bus, address, armed.period_ms, &self.orientation)
            .await
            .map_err(|err| {
                log_warn!("scheduler: {:?} @0x{:x} setup failed: {:?}", kind, address, err);
                SchedulerError::TaskSetupFailed(err)
            })?;

        armed
            .tasks
            .push(TaskDescriptor { slot, task })
            .map_err(|_| SchedulerError::CapacityExceeded)?;

        log_info!(
            "scheduler: {:?} @0x{:x} -> [{}..{}]",
            kind,
            address,
            slot.offset,
            slot.end()
        );
        Ok(slot)
    }

    /// Same as [`Scheduler::register_task`] with the kind given by its id.
    pub async fn register_task_id(
        &self,
        kind_id: u8,
        address: u8,
        offset: usize,
    ) -> Result<TaskSlot, SchedulerError> {
        let kind = TaskKind::try_from(kind_id)?;
        self.register_task(kind, address, offset).await
    }

    pub async fn task_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .armed
            .as_ref()
            .map_or(0, |armed| armed.tasks.len())
    }

    // ── Cycle ────────────────────────────────────────────────────────────────

    /// Timer loop. Never returns; idles while disarmed and picks up the new
    /// period on every `init`.
    pub async fn run(&self) -> ! {
        loop {
            let period_ms = self.arm.wait().await;
            let mut ticker = Ticker::every(Duration::from_millis(period_ms as u64));

            loop {
                ticker.next().await;
                // Re-armed since the last tick: restart with the new period
                if self.arm.signaled() || !self.run_cycle().await {
                    break;
                }
            }
        }
    }

    /// One timer tick: sample every task into its slot, then signal the
    /// consumer. Returns `false` if disarmed.
    pub async fn run_cycle(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let Inner { bus, armed } = &mut *inner;
        let Some(Armed { buffer, tasks, .. }) = armed.as_mut() else {
            return false;
        };

        let started = Instant::now();
        let cycle = self.cycle_count.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        for descriptor in tasks.iter_mut() {
            let slot = descriptor.slot;
            let out = &mut buffer[slot.offset..slot.end()];
            if let Err(err) = descriptor.task.sample(bus, out) {
                log_warn!(
                    "scheduler: cycle {}: {:?} @0x{:x} failed: {:?}",
                    cycle,
                    descriptor.task.kind(),
                    descriptor.task.address(),
                    err
                );
            }
        }

        let elapsed_us = u32::try_from(started.elapsed().as_micros()).unwrap_or(u32::MAX);
        self.max_cycle_us.fetch_max(elapsed_us, Ordering::Relaxed);
        drop(inner);

        self.cycle_ready.signal(());
        true
    }

    // ── Consumer side ────────────────────────────────────────────────────────

    /// Wait for the next completed cycle, at most 10 periods.
    ///
    /// Returns `false` on timeout or if the scheduler is not armed.
    pub async fn wait_for_cycle(&self) -> bool {
        let period_ms = self.period_ms.load(Ordering::Relaxed);
        if period_ms == 0 {
            return false;
        }
        let timeout = Duration::from_millis(period_ms as u64 * CYCLE_WAIT_PERIODS);
        with_timeout(timeout, self.cycle_ready.wait()).await.is_ok()
    }

    /// Run `f` on the shared buffer with no cycle in progress.
    pub async fn with_buffer<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let inner = self.inner.lock().await;
        inner.armed.as_ref().map(|armed| f(&*armed.buffer))
    }

    pub fn is_armed(&self) -> bool {
        self.period_ms.load(Ordering::Relaxed) != 0
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    /// Longest cycle since `init`.
    pub fn max_cycle_duration(&self) -> Duration {
        Duration::from_micros(self.max_cycle_us.load(Ordering::Relaxed) as u64)
    }
}

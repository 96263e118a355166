//! Ranking worker thread.
//!
//! The single consumer of the event queue. It owns the registry (and through
//! it the ranking), applies every event in arrival order, and periodically
//! recomputes the hot threshold for the configured fast-tier capacity share.
//! The recomputed value is published through the atomic threshold cell; no
//! other state crosses back to the allocation path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::api::stats::EngineCounters;
use crate::core::events::{Event, EventConsumer};
use crate::core::registry::TypeRegistry;

/// Worker cadence and the capacity share it ranks against.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Recompute the threshold after this many processed events.
    pub refresh_events: u64,
    /// Recompute the threshold at least this often.
    pub refresh_interval: Duration,
    /// Sleep when the queue is empty.
    pub idle_sleep: Duration,
    /// Fast-tier share of total capacity, in `[0, 1]`.
    pub fast_tier_fraction: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            refresh_events: 4096,
            refresh_interval: Duration::from_millis(100),
            idle_sleep: Duration::from_micros(100),
            fast_tier_fraction: 0.5,
        }
    }
}

/// The consumer loop state.
pub struct RankingWorker {
    consumer: EventConsumer,
    registry: TypeRegistry,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
    counters: Arc<EngineCounters>,
}

impl RankingWorker {
    /// Spawn the worker thread. The returned handle drains and joins it on
    /// shutdown (or on drop).
    pub fn spawn(
        consumer: EventConsumer,
        registry: TypeRegistry,
        config: WorkerConfig,
        counters: Arc<EngineCounters>,
    ) -> std::io::Result<WorkerHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = RankingWorker {
            consumer,
            registry,
            config,
            shutdown: shutdown.clone(),
            counters,
        };
        let thread = thread::Builder::new()
            .name("tieralloc-ranking".into())
            .spawn(move || worker.run())?;
        Ok(WorkerHandle {
            shutdown,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        log::debug!(
            "ranking worker started (refresh every {} events / {:?})",
            self.config.refresh_events,
            self.config.refresh_interval
        );
        let mut since_refresh = 0u64;
        let mut last_refresh = Instant::now();
        loop {
            match self.consumer.pop() {
                Some(event) => {
                    self.dispatch(event);
                    since_refresh += 1;
                }
                None => {
                    if self.shutdown.load(Ordering::Acquire) {
                        self.drain();
                        break;
                    }
                    thread::sleep(self.config.idle_sleep);
                }
            }
            if since_refresh >= self.config.refresh_events
                || last_refresh.elapsed() >= self.config.refresh_interval
            {
                self.refresh_threshold();
                since_refresh = 0;
                last_refresh = Instant::now();
            }
        }
        self.refresh_threshold();
        log::debug!(
            "ranking worker exiting ({} events processed)",
            self.counters.processed()
        );
    }

    /// Consume whatever is still in the ring. A slot can transiently read as
    /// unready while its producer finishes writing, so emptiness is judged by
    /// the occupancy count, not by a single failed pop.
    fn drain(&mut self) {
        loop {
            match self.consumer.pop() {
                Some(event) => self.dispatch(event),
                None => {
                    if self.consumer.is_empty() {
                        return;
                    }
                    std::hint::spin_loop();
                }
            }
        }
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::CreateAdd {
                fingerprint,
                address,
                size,
            } => self.registry.on_create(fingerprint, address, size),
            Event::DestroyRemove { address } => self.registry.on_destroy(address),
            Event::Realloc {
                old_address,
                new_address,
                size,
            } => self.registry.on_realloc(old_address, new_address, size),
            Event::Touch { address, timestamp } => self.registry.on_touch(address, timestamp),
            Event::SetTouchCallback { address, callback } => {
                self.registry.on_set_touch_callback(address, callback)
            }
        }
        self.counters.record_processed();
    }

    fn refresh_threshold(&self) {
        self.registry
            .ranking()
            .threshold_by_total_fraction(self.config.fast_tier_fraction);
        self.counters.record_refresh();
    }
}

/// Owner handle of a running worker.
pub struct WorkerHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal shutdown, wait for the queue to drain and the thread to exit.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("ranking worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

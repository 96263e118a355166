//! Bounded lock-free event queue.
//!
//! A fixed-capacity multi-producer single-consumer ring that carries
//! allocation lifecycle and access notifications from the allocation fast
//! path and the sampler to the ranking worker. Producers never block and
//! never wait for the consumer; a full ring fails the push and the caller
//! drops the event (the estimator is approximate by design, see the crate
//! docs).
//!
//! The ring reserves occupancy with a `fetch_add` that is backed out on
//! overflow, claims slots through a monotonic write index, and marks each
//! slot EMPTY → WRITING → READY so the consumer never observes a partially
//! written record. FIFO holds between any single producer and the consumer.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Callback attached to a group for touch diagnostics.
pub type TouchCallback = Box<dyn FnMut() + Send>;

/// A notification handed to the ranking worker.
pub enum Event {
    /// A new region was handed out by a backend.
    CreateAdd {
        fingerprint: u64,
        address: usize,
        size: usize,
    },
    /// A region was returned to its backend.
    DestroyRemove { address: usize },
    /// A region moved (or resized) in place of an old one.
    Realloc {
        old_address: usize,
        new_address: usize,
        size: usize,
    },
    /// The sampler observed an access. `timestamp` is monotonic nanoseconds.
    Touch { address: usize, timestamp: u64 },
    /// Attach a diagnostic callback to the group owning `address`.
    SetTouchCallback {
        address: usize,
        callback: TouchCallback,
    },
}

/// Discriminant of an [`Event`], used for per-class statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CreateAdd,
    DestroyRemove,
    Realloc,
    Touch,
    SetTouchCallback,
}

impl Event {
    /// The event's class.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::CreateAdd { .. } => EventKind::CreateAdd,
            Event::DestroyRemove { .. } => EventKind::DestroyRemove,
            Event::Realloc { .. } => EventKind::Realloc,
            Event::Touch { .. } => EventKind::Touch,
            Event::SetTouchCallback { .. } => EventKind::SetTouchCallback,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::CreateAdd {
                fingerprint,
                address,
                size,
            } => f
                .debug_struct("CreateAdd")
                .field("fingerprint", &format_args!("{:#018x}", fingerprint))
                .field("address", &format_args!("{:#x}", address))
                .field("size", size)
                .finish(),
            Event::DestroyRemove { address } => f
                .debug_struct("DestroyRemove")
                .field("address", &format_args!("{:#x}", address))
                .finish(),
            Event::Realloc {
                old_address,
                new_address,
                size,
            } => f
                .debug_struct("Realloc")
                .field("old_address", &format_args!("{:#x}", old_address))
                .field("new_address", &format_args!("{:#x}", new_address))
                .field("size", size)
                .finish(),
            Event::Touch { address, timestamp } => f
                .debug_struct("Touch")
                .field("address", &format_args!("{:#x}", address))
                .field("timestamp", timestamp)
                .finish(),
            Event::SetTouchCallback { address, .. } => f
                .debug_struct("SetTouchCallback")
                .field("address", &format_args!("{:#x}", address))
                .finish(),
        }
    }
}

const SLOT_EMPTY: u8 = 0;
const SLOT_WRITING: u8 = 1;
const SLOT_READY: u8 = 2;

struct Slot {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<Event>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SLOT_EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

struct Ring {
    slots: Box<[Slot]>,
    capacity: usize,
    /// Entries reserved by producers and not yet consumed.
    occupied: AtomicUsize,
    /// Monotonic producer index; slot = index % capacity.
    write_index: AtomicUsize,
}

// The ring hands each slot to exactly one writer at a time (occupancy
// reservation plus the monotonic index) and payloads move to the single
// consumer through the READY release/acquire edge.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Drop for Ring {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            if slot.state.load(Ordering::Acquire) == SLOT_READY {
                unsafe { (*slot.value.get()).assume_init_drop() };
            }
        }
    }
}

/// Producer half of the queue; clone freely across threads.
#[derive(Clone)]
pub struct EventProducer {
    ring: Arc<Ring>,
}

/// Consumer half of the queue. Deliberately not `Clone`: only one thread may
/// pop.
pub struct EventConsumer {
    ring: Arc<Ring>,
    read_index: usize,
}

/// Create a bounded queue with room for `capacity` events.
///
/// A power-of-two capacity keeps the slot mapping a single mask; other sizes
/// work but pay a division per operation.
pub fn bounded(capacity: usize) -> (EventProducer, EventConsumer) {
    assert!(capacity > 0, "event queue capacity must be non-zero");
    let slots = (0..capacity).map(|_| Slot::new()).collect::<Vec<_>>();
    let ring = Arc::new(Ring {
        slots: slots.into_boxed_slice(),
        capacity,
        occupied: AtomicUsize::new(0),
        write_index: AtomicUsize::new(0),
    });
    (
        EventProducer { ring: ring.clone() },
        EventConsumer {
            ring,
            read_index: 0,
        },
    )
}

impl EventProducer {
    /// Copy `event` into the ring. Returns `false` when the ring is full;
    /// the event is dropped and the caller accounts the loss.
    pub fn push(&self, event: Event) -> bool {
        let ring = &*self.ring;
        // Reserve occupancy first; the slot a producer lands on was freed by
        // the consumer at least `capacity` pops ago, so it is EMPTY.
        let previous = ring.occupied.fetch_add(1, Ordering::AcqRel);
        if previous >= ring.capacity {
            ring.occupied.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        // AcqRel chains claims together: a producer reusing a slot observes
        // the consumer's EMPTY store through the reservation and claim RMWs
        // of whoever claimed between the slot's last tenant and it.
        let index = ring.write_index.fetch_add(1, Ordering::AcqRel) % ring.capacity;
        let slot = &ring.slots[index];
        slot.state.store(SLOT_WRITING, Ordering::Relaxed);
        unsafe { (*slot.value.get()).write(event) };
        slot.state.store(SLOT_READY, Ordering::Release);
        true
    }

    /// Entries currently reserved in the ring (approximate under contention).
    pub fn len(&self) -> usize {
        self.ring.occupied.load(Ordering::Relaxed)
    }

    /// Whether the ring currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }
}

impl EventConsumer {
    /// Entries currently reserved in the ring, including ones still being
    /// written. Used by the drain loop on shutdown.
    pub fn len(&self) -> usize {
        self.ring.occupied.load(Ordering::Relaxed)
    }

    /// Whether the ring currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the next event, or `None` when the ring is empty (or the next
    /// slot is still being written).
    pub fn pop(&mut self) -> Option<Event> {
        let ring = &*self.ring;
        let slot = &ring.slots[self.read_index % ring.capacity];
        if slot.state.load(Ordering::Acquire) != SLOT_READY {
            return None;
        }
        let event = unsafe { (*slot.value.get()).assume_init_read() };
        slot.state.store(SLOT_EMPTY, Ordering::Relaxed);
        self.read_index = self.read_index.wrapping_add(1);
        // The release pairs with the producer-side fetch_add so the EMPTY
        // store above is visible before the slot can be reused.
        ring.occupied.fetch_sub(1, Ordering::Release);
        Some(event)
    }
}

//! Notification Bridge
//!
//! Turns raw characteristic values into [`Reading`]s and fans them out to the
//! registered listeners, synchronously and in delivery order.
use crate::core::constants::SCRATCH_BUFFER_CAPACITY;
use crate::core::events::AppEvent;
use crate::model::reading::Reading;
use log::{trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast::Sender;

/// Callback invoked for every decoded reading.
pub type ReadingListener = Arc<dyn Fn(&Reading) + Send + Sync>;

/// Single-slot pool holding the reusable scratch buffer.
///
/// The slot is only locked to move the buffer in or out. A lease that finds
/// the slot empty or contended gets a freshly allocated buffer instead.
#[derive(Debug)]
struct ScratchPool {
    slot: Mutex<Option<Vec<u8>>>,
}

impl ScratchPool {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Some(Vec::with_capacity(SCRATCH_BUFFER_CAPACITY))),
        }
    }

    fn lease(&self) -> ScratchLease<'_> {
        let pooled = self.slot.try_lock().ok().and_then(|mut slot| slot.take());
        match pooled {
            Some(buf) => ScratchLease {
                pool: self,
                buf: Some(buf),
                pooled: true,
            },
            None => ScratchLease {
                pool: self,
                buf: Some(Vec::with_capacity(SCRATCH_BUFFER_CAPACITY)),
                pooled: false,
            },
        }
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

/// Exclusive ownership of a scratch buffer for one decode.
struct ScratchLease<'a> {
    pool: &'a ScratchPool,
    buf: Option<Vec<u8>>,
    pooled: bool,
}

impl ScratchLease<'_> {
    fn fill(&mut self, data: &[u8]) -> &[u8] {
        let buf = self.buf.get_or_insert_with(Vec::new);
        buf.clear();
        buf.extend_from_slice(data);
        buf.as_slice()
    }
}

impl Drop for ScratchLease<'_> {
    fn drop(&mut self) {
        if !self.pooled {
            return;
        }
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            buf.shrink_to(SCRATCH_BUFFER_CAPACITY);
            let mut slot = match self.pool.slot.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot = Some(buf);
        }
    }
}

/// Delivery counters, for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub delivered: u64,
    pub published: u64,
    pub discarded: u64,
    pub fallback_allocations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    published: AtomicU64,
    discarded: AtomicU64,
    fallback_allocations: AtomicU64,
}

/// Adapts raw notification buffers into readings.
pub struct NotificationBridge {
    scratch: ScratchPool,
    listeners: RwLock<Vec<ReadingListener>>,
    counters: Counters,
}

impl Default for NotificationBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotificationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBridge")
            .field("stats", &self.stats())
            .finish()
    }
}

impl NotificationBridge {
    pub fn new() -> Self {
        Self {
            scratch: ScratchPool::new(),
            listeners: RwLock::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    /// Registers a listener for every future reading.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&Reading) + Send + Sync + 'static,
    {
        let mut listeners = match self.listeners.write() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.push(Arc::new(listener));
    }

    /// Republishes every reading on the application bus.
    pub fn forward_to(&self, tx: Sender<AppEvent>) {
        self.subscribe(move |reading| {
            // no receivers is not an error for the bridge
            let _ = tx.send(AppEvent::ReadingUpdated(reading.clone()));
        });
    }

    /// Handles one raw value from the transport.
    pub fn deliver(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);

        let mut lease = self.scratch.lease();
        if !lease.pooled {
            self.counters
                .fallback_allocations
                .fetch_add(1, Ordering::Relaxed);
        }

        let reading = match Reading::decode(lease.fill(data)) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("discarding heart rate notification {:02x?}: {}", data, e);
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        trace!("decoded reading: {} bpm", reading.beats_per_minute());

        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for listener in listeners.iter() {
            listener(&reading);
        }
        self.counters.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            fallback_allocations: self.counters.fallback_allocations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::broadcast;

    fn collecting_bridge() -> (NotificationBridge, Arc<Mutex<Vec<u16>>>) {
        let bridge = NotificationBridge::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bridge.subscribe(move |r| sink.lock().unwrap().push(r.beats_per_minute()));
        (bridge, seen)
    }

    #[test]
    fn test_publishes_in_delivery_order() {
        let (bridge, seen) = collecting_bridge();
        for bpm in [60u8, 61, 62, 63] {
            bridge.deliver(&[0x00, bpm]);
        }
        assert_eq!(*seen.lock().unwrap(), vec![60, 61, 62, 63]);
        assert_eq!(bridge.stats().published, 4);
        assert_eq!(bridge.stats().fallback_allocations, 0);
        assert!(bridge.scratch.is_idle());
    }

    #[test]
    fn test_empty_and_short_buffers_are_discarded() {
        let (bridge, seen) = collecting_bridge();
        bridge.deliver(&[]);
        bridge.deliver(&[0x01, 0x50]);
        assert!(seen.lock().unwrap().is_empty());
        let stats = bridge.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.discarded, 1);
        assert!(bridge.scratch.is_idle());
    }

    #[test]
    fn test_all_listeners_receive_each_reading() {
        let bridge = NotificationBridge::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            bridge.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        bridge.deliver(&[0x00, 70]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_concurrent_delivery_falls_back_to_fresh_buffer() {
        let bridge = Arc::new(NotificationBridge::new());
        let inner = bridge.clone();
        let nested = Arc::new(AtomicUsize::new(0));
        let nested_count = nested.clone();
        bridge.subscribe(move |r| {
            // re-entrant delivery while the outer decode still holds the lease
            if r.beats_per_minute() == 100 {
                inner.deliver(&[0x00, 101]);
            } else {
                nested_count.fetch_add(1, Ordering::SeqCst);
            }
        });
        bridge.deliver(&[0x00, 100]);
        assert_eq!(nested.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.stats().fallback_allocations, 1);
        assert!(bridge.scratch.is_idle());
    }

    #[test]
    fn test_buffer_returned_when_listener_panics() {
        let bridge = NotificationBridge::new();
        bridge.subscribe(|_| panic!("listener failure"));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            bridge.deliver(&[0x00, 90]);
        }));
        assert!(result.is_err());
        assert!(bridge.scratch.is_idle());
    }

    #[test]
    fn test_oversized_payload_is_decoded_and_buffer_kept_small() {
        let (bridge, seen) = collecting_bridge();
        let mut data = vec![0b10000, 75];
        data.extend(std::iter::repeat(0x01).take(SCRATCH_BUFFER_CAPACITY * 2));
        bridge.deliver(&data);
        assert_eq!(*seen.lock().unwrap(), vec![75]);
        let capacity = bridge
            .scratch
            .slot
            .lock()
            .unwrap()
            .as_ref()
            .map(|b| b.capacity())
            .unwrap();
        assert!(capacity < data.len());
    }

    #[tokio::test]
    async fn test_forward_to_event_bus() {
        let (tx, mut rx) = broadcast::channel(16);
        let bridge = NotificationBridge::new();
        bridge.forward_to(tx);
        bridge.deliver(&[0x00, 58]);
        match rx.recv().await.unwrap() {
            AppEvent::ReadingUpdated(reading) => assert_eq!(reading.beats_per_minute(), 58),
            other => panic!("unexpected event {:?}", other),
        }
    }
}

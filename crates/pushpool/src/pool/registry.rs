//! Per-worker connection clones.
//!
//! The [`Registry`] owns one slot per worker. A slot is filled the first time
//! its worker asks for a connection, by copying the prototype, and then kept
//! for the lifetime of the pool. Because the pool size is fixed the slots are
//! a plain array indexed by [`WorkerId`], which doubles as the record of every
//! clone ever created.
//!
//! Each slot has its own lock, so workers only ever contend with themselves
//! on the lookup path. The clone inside a slot sits behind a second lock that
//! its worker holds for the duration of a send; other threads only take it for
//! the cross-cutting operations ([`Registry::for_each_clone`] and
//! [`Registry::close_all`]).
//!
//! Closing never waits past its deadline for a busy clone. A clone still
//! sending at that point is closed by its own worker as soon as the send
//! returns, so every clone is closed exactly once either way.

use crate::{Connection, Error, Result, WorkerId};
use core::ops::{Deref, DerefMut};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

/// A connection clone pinned to one worker.
pub struct Pinned<C> {
    conn: C,
    closed: bool,
}

impl<C: Connection> Pinned<C> {
    /// Closes the clone unless it already was.
    fn close_once(&mut self) -> core::result::Result<(), C::Error> {
        if core::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.conn.close()
    }

    /// Closes a clone that `close_all` skipped while it was sending.
    fn close_late(&mut self, worker: WorkerId) {
        if self.closed {
            return;
        }
        tracing::debug!("Worker {worker} closing its connection after its last send");
        if let Err(e) = self.close_once() {
            tracing::warn!("Failed to close connection of worker {worker}: {e}");
        }
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<C> Deref for Pinned<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for Pinned<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

type Shared<C> = Arc<Mutex<Pinned<C>>>;

#[cfg(feature = "cache-padded")]
type Slot<C> = crossbeam_utils::CachePadded<Mutex<Option<Shared<C>>>>;
#[cfg(not(feature = "cache-padded"))]
type Slot<C> = Mutex<Option<Shared<C>>>;

/// Lazily populated, worker-indexed set of connection clones.
pub struct Registry<C: Connection> {
    prototype: Arc<Mutex<C>>,
    slots: Box<[Slot<C>]>,
    closed: AtomicBool,
}

impl<C: Connection> Registry<C> {
    /// Creates an empty registry with one slot per worker.
    pub fn new(prototype: Arc<Mutex<C>>, capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Slot::<C>::default()).collect();
        Self {
            prototype,
            slots,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns `worker`'s clone, copying the prototype the first time the
    /// worker asks.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownWorker`] if `worker` is outside the pool capacity.
    /// - [`Error::PoolClosed`] if the registry was closed before `worker`
    ///   created its clone.
    pub fn get_or_create(&self, worker: WorkerId) -> Result<Arc<Mutex<Pinned<C>>>, C::Error> {
        let slot = self
            .slots
            .get(worker.index())
            .ok_or(Error::UnknownWorker(worker))?;
        let mut slot = slot.lock();

        if let Some(conn) = slot.as_ref() {
            return Ok(Arc::clone(conn));
        }

        // Checked under the slot lock: `close_all` raises the flag before it
        // visits any slot, so either it sees this clone or we see the flag.
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PoolClosed);
        }

        let conn = Arc::new(Mutex::new(Pinned {
            conn: self.prototype.lock().copy(),
            closed: false,
        }));
        *slot = Some(Arc::clone(&conn));
        tracing::debug!("Worker {worker} created its connection");
        Ok(conn)
    }

    /// Sends `message` over `worker`'s clone, creating it if needed.
    ///
    /// Once the registry is closed nothing more goes out: the message is
    /// refused, and a clone that [`Registry::close_all`] had to skip because
    /// it was busy is closed here, after its last send returns.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolClosed`] if the registry is closed.
    /// - [`Error::Connection`] if the clone fails to send.
    /// - Anything [`Registry::get_or_create`] returns.
    pub fn send(&self, worker: WorkerId, message: C::Message) -> Result<(), C::Error> {
        let conn = self.get_or_create(worker)?;
        let mut conn = conn.lock();

        // Both checks run under the clone lock, which `close_all` holds while
        // it closes the clone.
        if self.is_closed() {
            conn.close_late(worker);
            return Err(Error::PoolClosed);
        }
        let sent = conn.conn.send_message(message).map_err(Error::Connection);
        if self.is_closed() {
            conn.close_late(worker);
        }
        sent
    }

    /// Applies `f` to every clone registered so far, in worker order.
    ///
    /// Clones created while this runs may or may not be visited. Each clone is
    /// locked while `f` runs on it, which waits out a send in progress on that
    /// clone.
    pub fn for_each_clone(&self, mut f: impl FnMut(WorkerId, &mut C)) {
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(conn) = slot.lock().clone() else {
                continue;
            };
            f(WorkerId::new(index), &mut conn.lock().conn);
        }
    }

    /// Returns the first registered clone, if any.
    pub fn any_clone(&self) -> Option<Arc<Mutex<Pinned<C>>>> {
        self.slots.iter().find_map(|slot| slot.lock().clone())
    }

    /// Returns the number of clones created so far.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.lock().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes every registered clone and refuses to create new ones.
    ///
    /// With a `deadline`, a clone whose worker is still sending when the
    /// deadline passes is skipped and left for [`Registry::send`] to close.
    /// Without one, this waits for every send in progress.
    ///
    /// Every clone is closed even if an earlier one fails. Returns the
    /// failures, tagged with the worker that owned the clone. Calling this
    /// again closes nothing.
    pub fn close_all(&self, deadline: Option<Instant>) -> Vec<(WorkerId, C::Error)> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }

        let mut failures = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(conn) = slot.lock().clone() else {
                continue;
            };
            let worker = WorkerId::new(index);
            let guard = match deadline {
                Some(deadline) => conn.try_lock_until(deadline),
                None => Some(conn.lock()),
            };
            let Some(mut conn) = guard else {
                tracing::warn!("Worker {worker} is still sending, its connection closes once the send returns");
                continue;
            };
            if let Err(e) = conn.close_once() {
                tracing::warn!("Failed to close connection of worker {worker}: {e}");
                failures.push((worker, e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use std::{sync::atomic::AtomicUsize, thread};

    #[derive(Debug, thiserror::Error)]
    #[error("unreachable")]
    struct Never;

    struct Counted {
        id: usize,
        copies: Arc<AtomicUsize>,
        sent: usize,
        closes: usize,
    }

    impl Connection for Counted {
        type Message = ();
        type Error = Never;

        fn send_message(&mut self, (): ()) -> core::result::Result<(), Never> {
            self.sent += 1;
            Ok(())
        }

        fn copy(&self) -> Self {
            Self {
                id: self.copies.fetch_add(1, Ordering::SeqCst) + 1,
                copies: Arc::clone(&self.copies),
                sent: 0,
                closes: 0,
            }
        }

        fn close(&mut self) -> core::result::Result<(), Never> {
            self.closes += 1;
            Ok(())
        }

        fn test_connection(&mut self) -> core::result::Result<(), Never> {
            Ok(())
        }

        fn set_cache_length(&mut self, _cache_length: usize) {}

        fn cache_length(&self) -> core::result::Result<usize, Never> {
            Ok(0)
        }
    }

    fn registry(capacity: usize) -> (Registry<Counted>, Arc<AtomicUsize>) {
        let copies = Arc::new(AtomicUsize::new(0));
        let prototype = Counted {
            id: 0,
            copies: Arc::clone(&copies),
            sent: 0,
            closes: 0,
        };
        (Registry::new(Arc::new(Mutex::new(prototype)), capacity), copies)
    }

    #[test]
    fn returns_the_same_clone_to_the_same_worker() {
        let (registry, copies) = registry(2);
        let first = registry.get_or_create(WorkerId::new(1)).unwrap();
        let second = registry.get_or_create(WorkerId::new(1)).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(copies.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_workers_each_get_their_own_clone() {
        let (registry, copies) = registry(8);
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|index| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| registry.get_or_create(WorkerId::new(index)).unwrap().lock().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut owned = Vec::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            assert!(ids.iter().all(|id| *id == ids[0]));
            owned.push(ids[0]);
        }
        owned.sort_unstable();
        owned.dedup();

        assert_eq!(owned.len(), 8);
        assert_eq!(copies.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn visits_every_registered_clone_once() {
        let (registry, _copies) = registry(4);
        registry.get_or_create(WorkerId::new(3)).unwrap();
        registry.get_or_create(WorkerId::new(0)).unwrap();

        let mut visited = Vec::new();
        registry.for_each_clone(|worker, _| visited.push(worker));
        assert_eq!(visited, vec![WorkerId::new(0), WorkerId::new(3)]);
    }

    #[test]
    fn rejects_workers_outside_capacity() {
        let (registry, _copies) = registry(2);
        assert!(matches!(
            registry.get_or_create(WorkerId::new(2)),
            Err(Error::UnknownWorker(worker)) if worker == WorkerId::new(2)
        ));
    }

    #[test]
    fn close_all_closes_and_seals() {
        let (registry, copies) = registry(2);
        let conn = registry.get_or_create(WorkerId::new(0)).unwrap();

        assert!(registry.close_all(None).is_empty());
        assert!(conn.lock().is_closed());
        assert_eq!(conn.lock().closes, 1);
        assert!(registry.is_closed());

        // Existing clones are still handed out, new ones are refused.
        assert!(registry.get_or_create(WorkerId::new(0)).is_ok());
        assert!(matches!(
            registry.get_or_create(WorkerId::new(1)),
            Err(Error::PoolClosed)
        ));
        assert_eq!(copies.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sends_go_over_the_workers_clone() {
        let (registry, _copies) = registry(2);
        registry.send(WorkerId::new(1), ()).unwrap();
        registry.send(WorkerId::new(1), ()).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_or_create(WorkerId::new(1)).unwrap().lock().sent, 2);
    }

    #[test]
    fn sends_after_close_are_refused() {
        let (registry, _copies) = registry(1);
        let conn = registry.get_or_create(WorkerId::new(0)).unwrap();
        assert!(registry.close_all(None).is_empty());

        assert!(matches!(
            registry.send(WorkerId::new(0), ()),
            Err(Error::PoolClosed)
        ));
        let conn = conn.lock();
        assert_eq!(conn.sent, 0);
        assert_eq!(conn.closes, 1);
    }

    #[test]
    fn close_all_skips_a_busy_clone_past_the_deadline() {
        let (registry, _copies) = registry(2);
        let busy = registry.get_or_create(WorkerId::new(0)).unwrap();
        let idle = registry.get_or_create(WorkerId::new(1)).unwrap();

        // Stands in for a send in progress on worker 0.
        let held = busy.lock();
        let start = Instant::now();
        assert!(registry.close_all(Some(start + Duration::from_millis(20))).is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!held.is_closed());
        assert!(idle.lock().is_closed());
        drop(held);

        // The worker's next turn closes the clone instead of sending.
        assert!(matches!(
            registry.send(WorkerId::new(0), ()),
            Err(Error::PoolClosed)
        ));
        let busy = busy.lock();
        assert_eq!(busy.closes, 1);
        assert_eq!(busy.sent, 0);
    }

    #[test]
    fn any_clone_is_none_while_empty() {
        let (registry, _copies) = registry(3);
        assert!(registry.is_empty());
        assert!(registry.any_clone().is_none());

        registry.get_or_create(WorkerId::new(2)).unwrap();
        assert_eq!(registry.any_clone().unwrap().lock().id, 1);
    }
}

//! Fixed-size pool of execution tickets.

use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded set of tickets, one per concurrently running call.
///
/// Acquisition never waits: a full pool rejects immediately so the caller
/// sheds load instead of queueing.
#[derive(Clone)]
pub struct AdmissionPool {
    tickets: Arc<Semaphore>,
    capacity: usize,
}

/// Permission to run one call. Returned to the pool when dropped.
pub struct Ticket {
    _permit: OwnedSemaphorePermit,
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ticket")
    }
}

impl AdmissionPool {
    /// Creates a pool holding `capacity` tickets.
    pub fn new(capacity: usize) -> Self {
        Self {
            tickets: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Takes a ticket if one is free.
    pub fn try_acquire(&self) -> Option<Ticket> {
        Arc::clone(&self.tickets)
            .try_acquire_owned()
            .ok()
            .map(|permit| Ticket { _permit: permit })
    }

    /// Returns a ticket to the pool.
    ///
    /// Equivalent to dropping it; ownership guarantees a ticket comes back once.
    pub fn release(&self, ticket: Ticket) {
        drop(ticket);
    }

    /// Total number of tickets.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tickets currently free.
    pub fn available(&self) -> usize {
        self.tickets.available_permits()
    }

    /// Tickets currently held.
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

impl fmt::Debug for AdmissionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPool")
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_when_exhausted() {
        let pool = AdmissionPool::new(2);
        let a = pool.try_acquire();
        let b = pool.try_acquire();
        assert!(a.is_some() && b.is_some());
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn release_makes_a_ticket_available() {
        let pool = AdmissionPool::new(1);
        let ticket = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        pool.release(ticket);
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn clones_share_tickets() {
        let pool = AdmissionPool::new(1);
        let other = pool.clone();
        let _held = pool.try_acquire().unwrap();
        assert!(other.try_acquire().is_none());
    }
}

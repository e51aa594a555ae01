use super::*;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cluster-level events a client may watch for.
#[derive(Clone, Debug, PartialEq)]
pub enum ClusterEvent {
    LeaderChanged {
        leader: Option<NodeId>,
        term: u64,
    },
    ConfigurationChanged {
        voters: Vec<NodeId>,
        observers: Vec<NodeId>,
    },
    WriteGateChanged {
        disabled: bool,
    },
}

pub struct Inner {
    ring: spin::Mutex<VecDeque<(u64, ClusterEvent)>>,
    next_seq: AtomicU64,
    capacity: usize,
}

/// Bounded ring of recent events, each tagged with a dense sequence number.
/// Watchers poll with the last sequence they have seen.
#[derive(shrinkwraprs::Shrinkwrap, Clone)]
pub struct EventBus(Arc<Inner>);

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let inner = Inner {
            ring: spin::Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(1),
            capacity,
        };
        Self(Arc::new(inner))
    }

    pub fn emit(&self, ev: ClusterEvent) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut ring = self.ring.lock();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back((seq, ev));
    }

    /// Events with sequence number greater than `since`, and the highest
    /// sequence number handed out so far.
    pub fn since(&self, since: u64) -> (Vec<(u64, ClusterEvent)>, u64) {
        let ring = self.ring.lock();
        let out = ring
            .iter()
            .filter(|(seq, _)| *seq > since)
            .cloned()
            .collect();
        let head = self.next_seq.load(Ordering::SeqCst) - 1;
        (out, head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ring_drops_oldest() {
        let bus = EventBus::new(2);
        bus.emit(ClusterEvent::WriteGateChanged { disabled: true });
        bus.emit(ClusterEvent::WriteGateChanged { disabled: false });
        bus.emit(ClusterEvent::WriteGateChanged { disabled: true });

        let (evs, head) = bus.since(0);
        assert_eq!(head, 3);
        assert_eq!(evs.len(), 2);
        assert_eq!(evs[0].0, 2);

        let (evs, _) = bus.since(3);
        assert!(evs.is_empty());
    }
}

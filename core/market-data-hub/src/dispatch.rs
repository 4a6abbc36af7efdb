//! Dispatch table: event type -> live subscriber channels
//!
//! Each [`DataType`] has its own copy-on-write route list. Publishing takes a
//! read lock just long enough to clone an `Arc` to the current snapshot, then
//! pushes without holding any lock. Subscribe/unsubscribe replace the
//! snapshot under a write lock on that one type only.

use crate::channel::SubscriberChannel;
use crate::events::DataType;
use crate::handler::Payload;
use parking_lot::RwLock;
use std::sync::Arc;

/// Opaque subscription identifier, unique for a hub's lifetime
pub type SubscriptionId = u64;

/// One subscriber's entry in the table
pub struct Route {
    pub id: SubscriptionId,
    pub channel: Arc<SubscriberChannel<Payload>>,
}

type Snapshot = Arc<[Arc<Route>]>;

pub struct DispatchTable {
    routes: [RwLock<Snapshot>; DataType::COUNT],
}

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            routes: std::array::from_fn(|_| RwLock::new(Arc::from(Vec::new()))),
        }
    }

    /// Current subscribers for `data_type`
    #[inline]
    pub fn snapshot(&self, data_type: DataType) -> Snapshot {
        Arc::clone(&self.routes[data_type.index()].read())
    }

    pub fn insert(&self, data_type: DataType, route: Arc<Route>) {
        let mut slot = self.routes[data_type.index()].write();
        let mut next: Vec<Arc<Route>> = slot.iter().cloned().collect();
        next.push(route);
        *slot = Arc::from(next);
    }

    /// Remove `id` from `data_type`; returns the route if it was present
    pub fn remove(&self, data_type: DataType, id: SubscriptionId) -> Option<Arc<Route>> {
        let mut slot = self.routes[data_type.index()].write();
        let position = slot.iter().position(|r| r.id == id)?;

        let mut next: Vec<Arc<Route>> = slot.iter().cloned().collect();
        let removed = next.remove(position);
        *slot = Arc::from(next);
        Some(removed)
    }

    /// Empty every route list, returning what was registered
    pub fn clear(&self) -> Vec<Arc<Route>> {
        let mut removed = Vec::new();
        for slot in &self.routes {
            let mut slot = slot.write();
            removed.extend(slot.iter().cloned());
            *slot = Arc::from(Vec::new());
        }
        removed
    }

    pub fn len(&self, data_type: DataType) -> usize {
        self.routes[data_type.index()].read().len()
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OverflowPolicy;

    fn route(id: SubscriptionId) -> Arc<Route> {
        let (channel, _rx) = SubscriberChannel::bounded(4, OverflowPolicy::DropOldest);
        Arc::new(Route { id, channel })
    }

    #[test]
    fn test_routes_are_per_type() {
        let table = DispatchTable::new();
        table.insert(DataType::Trade, route(0));
        table.insert(DataType::Trade, route(1));
        table.insert(DataType::Kline, route(2));

        assert_eq!(table.len(DataType::Trade), 2);
        assert_eq!(table.len(DataType::Kline), 1);
        assert_eq!(table.len(DataType::BookL1), 0);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_removal() {
        let table = DispatchTable::new();
        table.insert(DataType::Trade, route(0));
        table.insert(DataType::Trade, route(1));

        let before = table.snapshot(DataType::Trade);
        assert!(table.remove(DataType::Trade, 0).is_some());

        assert_eq!(before.len(), 2);
        let after: Vec<_> = table.snapshot(DataType::Trade).iter().map(|r| r.id).collect();
        assert_eq!(after, vec![1]);
    }

    #[test]
    fn test_remove_unknown_is_none() {
        let table = DispatchTable::new();
        table.insert(DataType::Trade, route(0));
        assert!(table.remove(DataType::Trade, 7).is_none());
        assert!(table.remove(DataType::Kline, 0).is_none());
    }

    #[test]
    fn test_clear_returns_everything() {
        let table = DispatchTable::new();
        for (id, dt) in DataType::ALL.iter().enumerate() {
            table.insert(*dt, route(id as u64));
        }

        assert_eq!(table.clear().len(), 3);
        for dt in DataType::ALL {
            assert_eq!(table.len(dt), 0);
        }
    }
}

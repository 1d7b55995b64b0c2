use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// One exclusive lock per user id
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn handle(&self, user_id: u64) -> Arc<Mutex<()>> {
        self.locks.entry(user_id).or_default().value().clone()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

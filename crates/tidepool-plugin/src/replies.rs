//! Reply references handed out with comments.
//!
//! A comment's reply context is whatever the plugin put there; the consumer
//! only ever sees an opaque [`ReferenceId`]. The table is bounded, oldest
//! references expire first.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use uuid::Uuid;

use crate::content::{Comment, ReferenceId};

pub const DEFAULT_REPLY_CAPACITY: usize = 4096;

/// What a plugin needs to page a comment's replies.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyContext {
    pub comment: Comment,
    pub context: Value,
}

#[derive(Debug, Default)]
struct Entries {
    by_id: HashMap<ReferenceId, ReplyContext>,
    order: VecDeque<ReferenceId>,
}

#[derive(Debug)]
pub struct ReplyTable {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl Default for ReplyTable {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_CAPACITY)
    }
}

impl ReplyTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn register(&self, comment: Comment, context: Value) -> ReferenceId {
        let id = ReferenceId(Uuid::new_v4().to_string());
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.order.len() >= self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.by_id.remove(&oldest);
            }
        }
        entries.order.push_back(id.clone());
        entries
            .by_id
            .insert(id.clone(), ReplyContext { comment, context });
        id
    }

    pub fn get(&self, id: &ReferenceId) -> Option<ReplyContext> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::Skeleton;
    use serde_json::json;

    #[test]
    fn test_register_and_resolve() {
        let table = ReplyTable::new(8);
        let id = table.register(Comment::skeleton(0), json!({"thread": 1}));
        let ctx = table.get(&id).unwrap();
        assert_eq!(ctx.context, json!({"thread": 1}));
        assert!(table.get(&ReferenceId("nope".into())).is_none());
    }

    #[test]
    fn test_oldest_reference_expires() {
        let table = ReplyTable::new(2);
        let first = table.register(Comment::skeleton(0), json!(1));
        let second = table.register(Comment::skeleton(1), json!(2));
        let third = table.register(Comment::skeleton(2), json!(3));

        assert!(table.get(&first).is_none());
        assert!(table.get(&second).is_some());
        assert!(table.get(&third).is_some());
        assert_eq!(table.len(), 2);
    }
}

use std::collections::{HashMap, VecDeque};

/// Completed responses by request id, evicted oldest-first.
#[derive(Debug)]
pub(crate) struct ResponseCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, String>,
}

impl ResponseCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, request_id: &str) -> Option<String> {
        self.entries.get(request_id).cloned()
    }

    pub(crate) fn insert(&mut self, request_id: String, response: String) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(request_id.clone(), response).is_some() {
            return;
        }
        self.order.push_back(request_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

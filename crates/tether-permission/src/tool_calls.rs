use serde_json::Value;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: Value,
    /// Already claimed by a permission request or finished
    pub used: bool,
}

/// Recent tool calls, used to find the id of the call a permission request is about.
#[derive(Debug)]
pub struct ToolCallBuffer {
    capacity: usize,
    records: VecDeque<ToolCallRecord>,
}

impl ToolCallBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: VecDeque::new(),
        }
    }

    pub fn push(&mut self, id: String, name: String, input: Value) {
        self.records.push_back(ToolCallRecord {
            id,
            name,
            input,
            used: false,
        });
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    pub fn mark_used(&mut self, id: &str) {
        if let Some(record) = self.records.iter_mut().find(|r| r.id == id) {
            record.used = true;
        }
    }

    /// Claim the newest unused call with this name and input.
    pub fn claim(&mut self, name: &str, input: &Value) -> Option<String> {
        let record = self
            .records
            .iter_mut()
            .rev()
            .find(|r| !r.used && r.name == name && &r.input == input)?;
        record.used = true;
        Some(record.id.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

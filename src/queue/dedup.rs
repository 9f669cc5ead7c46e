use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Remembers recently seen ids for a fixed window.
#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    seen: HashMap<String, Instant>,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Record `id` and return true unless it was already seen inside the window.
    pub fn admit(&mut self, id: &str) -> bool {
        let now = Instant::now();
        let window = self.window;
        self.seen.retain(|_, at| now.duration_since(*at) < window);
        if self.seen.contains_key(id) {
            return false;
        }
        self.seen.insert(id.to_string(), now);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Escape user-provided strings for HTML parse mode.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Bounded per-chat registry of recently sent bot message ids, backing the
/// `/clear` sweep. Owned by the app state so tests can construct isolated
/// instances; eviction drops the oldest id once a chat hits the cap.
#[derive(Debug)]
pub struct MessageLog {
    inner: Mutex<HashMap<i64, VecDeque<i32>>>,
    cap: usize,
}

impl MessageLog {
    pub const DEFAULT_CAP: usize = 50;

    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            cap: cap.max(1),
        }
    }

    pub fn record(&self, chat_id: i64, message_id: i32) {
        let mut map = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = map.entry(chat_id).or_default();
        if window.len() == self.cap {
            window.pop_front();
        }
        window.push_back(message_id);
    }

    /// Take every tracked id for a chat, oldest first.
    pub fn drain(&self, chat_id: i64) -> Vec<i32> {
        let mut map = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.remove(&chat_id)
            .map(|w| w.into_iter().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html_meta_characters() {
        assert_eq!(escape_html("<b>&x</b>"), "&lt;b&gt;&amp;x&lt;/b&gt;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn message_log_keeps_insertion_order() {
        let log = MessageLog::new(10);
        log.record(1, 100);
        log.record(1, 101);
        log.record(2, 200);
        assert_eq!(log.drain(1), vec![100, 101]);
        assert_eq!(log.drain(2), vec![200]);
    }

    #[test]
    fn message_log_evicts_oldest_at_cap() {
        let log = MessageLog::new(3);
        for id in 1..=5 {
            log.record(7, id);
        }
        assert_eq!(log.drain(7), vec![3, 4, 5]);
    }

    #[test]
    fn drain_empties_the_window() {
        let log = MessageLog::new(3);
        log.record(7, 1);
        assert_eq!(log.drain(7), vec![1]);
        assert!(log.drain(7).is_empty());
    }
}

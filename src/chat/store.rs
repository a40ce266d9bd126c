// Ordered message log for a single conversation
// History seeds and live pushes both go through here, so a conversation is never
// rendered from two separately concatenated lists.

use log::debug;
use std::collections::HashSet;

use crate::models::{DeliveryStatus, Message, MessageKey};

#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    seen: HashSet<MessageKey>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole log with `history`, sorted by `created_at`.
    ///
    /// The sort is stable, so messages sharing a timestamp keep the order the
    /// backend returned them in. Duplicates inside `history` collapse to the
    /// first occurrence.
    pub fn seed(&mut self, history: Vec<Message>) {
        self.messages.clear();
        self.seen.clear();

        let total = history.len();
        for message in history {
            if self.seen.insert(message.key()) {
                self.messages.push(message);
            }
        }
        self.messages.sort_by_key(|m| m.created_at);

        debug!("Seeded store with {} messages ({} duplicates dropped)", self.messages.len(), total - self.messages.len());
    }

    /// Insert `message` keeping the log sorted. Returns false when an identical
    /// message is already present.
    ///
    /// Ties go after every existing message with the same timestamp, which keeps
    /// arrival order for same-instant messages.
    pub fn append(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.key()) {
            debug!("Dropping duplicate message from {} at {}", message.sender_id, message.created_at);
            return false;
        }
        let at = self.messages.partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        true
    }

    /// Update the delivery status of a locally sent message.
    pub fn set_status(&mut self, key: &MessageKey, status: DeliveryStatus) -> bool {
        match self.messages.iter_mut().find(|m| &m.key() == key) {
            Some(message) => {
                message.delivery_status = status;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(from: &str, to: &str, secs: i64, body: &str) -> Message {
        Message::new(from, to, body, Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn bodies(store: &MessageStore) -> Vec<&str> {
        store.snapshot().iter().map(|m| m.body.as_str()).collect()
    }

    #[test]
    fn test_seed_sorts_history() {
        let mut store = MessageStore::new();
        store.seed(vec![msg("a", "b", 3, "third"), msg("b", "a", 1, "first"), msg("a", "b", 2, "second")]);

        assert_eq!(bodies(&store), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_seed_replaces_previous_contents() {
        let mut store = MessageStore::new();
        store.append(msg("a", "b", 9, "stale"));
        store.seed(vec![msg("a", "b", 1, "fresh")]);

        assert_eq!(bodies(&store), vec!["fresh"]);
        // The replaced message is no longer considered seen
        assert!(store.append(msg("a", "b", 9, "stale")));
    }

    #[test]
    fn test_append_is_idempotent() {
        let mut store = MessageStore::new();
        assert!(store.append(msg("a", "b", 1, "hi")));
        assert!(!store.append(msg("a", "b", 1, "hi")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_append_out_of_order_lands_sorted() {
        let mut store = MessageStore::new();
        store.seed(vec![msg("a", "b", 1, "one"), msg("a", "b", 5, "five")]);
        store.append(msg("b", "a", 3, "three"));
        store.append(msg("b", "a", 0, "zero"));
        store.append(msg("b", "a", 7, "seven"));

        assert_eq!(bodies(&store), vec!["zero", "one", "three", "five", "seven"]);
    }

    #[test]
    fn test_same_timestamp_keeps_arrival_order() {
        let mut store = MessageStore::new();
        store.append(msg("a", "b", 4, "first"));
        store.append(msg("b", "a", 4, "second"));
        store.append(msg("a", "b", 4, "third"));

        assert_eq!(bodies(&store), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_interleaved_seed_and_append_stay_sorted() {
        let mut store = MessageStore::new();
        let times = [8, 2, 6, 2, 9, 1, 5, 3, 7, 4];
        for (round, secs) in times.iter().enumerate() {
            if round % 4 == 0 {
                let history = times[..round].iter().map(|s| msg("a", "b", *s, &format!("h{}", s))).collect();
                store.seed(history);
            }
            store.append(msg("b", "a", *secs, &format!("p{}", round)));

            let snapshot = store.snapshot();
            assert!(snapshot.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        }
    }

    #[test]
    fn test_set_status() {
        let mut store = MessageStore::new();
        let mut sent = msg("a", "b", 1, "hi");
        sent.delivery_status = DeliveryStatus::Sending;
        let key = sent.key();
        store.append(sent);

        assert!(store.set_status(&key, DeliveryStatus::Stored));
        assert_eq!(store.snapshot()[0].delivery_status, DeliveryStatus::Stored);
        assert!(!store.set_status(&msg("a", "b", 2, "nope").key(), DeliveryStatus::Failed));
    }
}

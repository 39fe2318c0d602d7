// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stanza id generation and request/response correlation for IQs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use sha1::{Digest, Sha1};

use crate::handlers::IqHandler;

/// Generator of stream-unique stanza ids.
///
/// The base is the SHA-1 of startup time and fresh random bytes; each id
/// appends a monotonically increasing 32-bit counter in hex. Ids never
/// repeat within a run.
pub struct IdGenerator {
    base: String,
    counter: AtomicU32,
}

impl IdGenerator {
    /// Create a generator with a fresh base.
    pub fn new() -> IdGenerator {
        let mut hasher = Sha1::new();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        hasher.update(now.to_be_bytes());
        let mut random = [0u8; 8];
        if getrandom::getrandom(&mut random).is_ok() {
            hasher.update(random);
        }
        let digest = hasher.finalize();
        let mut base = String::with_capacity(40);
        for byte in digest {
            base.push_str(&format!("{:02x}", byte));
        }
        IdGenerator {
            base,
            counter: AtomicU32::new(0),
        }
    }

    /// Produce the next id.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        format!("{}{:08x}", self.base, n)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct TrackEntry {
    pub handler: Arc<dyn IqHandler>,
    pub context: u32,
}

/// Correlates IQ responses with the handler registered for the request id.
///
/// An entry lives until the response arrives or the connection goes down,
/// whichever comes first; either way it leaves the map exactly once.
pub struct IqTracker {
    map: Mutex<HashMap<String, TrackEntry>>,
}

impl IqTracker {
    pub(crate) fn new() -> IqTracker {
        IqTracker {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn track(&self, id: String, handler: Arc<dyn IqHandler>, context: u32) {
        self.map
            .lock()
            .unwrap()
            .insert(id, TrackEntry { handler, context });
    }

    /// Remove and return the entry for a response id.
    pub(crate) fn take(&self, id: &str) -> Option<TrackEntry> {
        self.map.lock().unwrap().remove(id)
    }

    /// Remove every entry pointing at `handler`.
    pub fn remove_handler(&self, handler: &Arc<dyn IqHandler>) {
        self.map
            .lock()
            .unwrap()
            .retain(|_, entry| !Arc::ptr_eq(&entry.handler, handler));
    }

    /// Drop all entries; used on disconnect.
    pub(crate) fn clear(&self) {
        self.map.lock().unwrap().clear();
    }

    /// Number of pending request ids.
    pub fn pending(&self) -> usize {
        self.map.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Context;
    use crate::stanza::Stanza;

    #[test]
    fn ids_never_repeat() {
        let ids = IdGenerator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(ids.next_id()));
        }
    }

    #[test]
    fn ids_have_stable_base() {
        let ids = IdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!(a.len(), 48);
        assert_eq!(a[..40], b[..40]);
        assert_ne!(a, b);
    }

    struct Nop;
    impl IqHandler for Nop {
        fn handle_iq(&self, _ctx: &mut Context<'_>, _iq: &Stanza) -> bool {
            false
        }
    }

    #[test]
    fn take_is_one_shot() {
        let tracker = IqTracker::new();
        let handler: Arc<dyn IqHandler> = Arc::new(Nop);
        tracker.track("id1".to_string(), handler.clone(), 7);
        assert_eq!(tracker.pending(), 1);
        let entry = tracker.take("id1").unwrap();
        assert_eq!(entry.context, 7);
        assert!(tracker.take("id1").is_none());
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn remove_by_identity() {
        let tracker = IqTracker::new();
        let a: Arc<dyn IqHandler> = Arc::new(Nop);
        let b: Arc<dyn IqHandler> = Arc::new(Nop);
        tracker.track("a1".to_string(), a.clone(), 0);
        tracker.track("a2".to_string(), a.clone(), 0);
        tracker.track("b1".to_string(), b.clone(), 0);
        tracker.remove_handler(&a);
        assert_eq!(tracker.pending(), 1);
        assert!(tracker.take("b1").is_some());
    }
}

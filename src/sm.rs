// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XEP-0198 stream management: acknowledged delivery and resumption.

use std::collections::VecDeque;
use std::sync::Mutex;

use minidom::Element;

/// Where the stream-management negotiation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmContext {
    /// Not negotiated.
    Invalid,
    /// `<enable/>` sent, no answer yet.
    Requested,
    /// `<enabled/>` received; counting and queueing are live.
    Enabled,
    /// `<resume/>` sent, no answer yet.
    Resuming,
    /// `<resumed/>` received; the previous session continues.
    Resumed,
    /// The server answered `<failed/>`.
    Failed,
}

impl SmContext {
    /// Whether stanzas are being counted and queued.
    pub fn active(self) -> bool {
        matches!(self, Self::Enabled | Self::Resuming | Self::Resumed)
    }
}

/// Stream-management state: counters, resumption identity and the queue of
/// sent-but-unacknowledged stanzas.
///
/// The queue holds `(outbound index, stanza clone)` pairs; indexes are
/// contiguous from the last acknowledged index + 1 up to [`sent`]. The
/// queue carries its own lock so snapshots can be taken from any thread.
///
/// [`sent`]: Self::sent
pub(crate) struct SmState {
    pub context: SmContext,
    /// Index of the last queued outbound stanza (wrapping).
    pub sent: u32,
    /// Count of handled inbound stanzas (wrapping).
    pub handled: u32,
    /// Resumption id from `<enabled resume='true'/>`.
    pub id: Option<String>,
    /// Whether the server allows resumption.
    pub resume: bool,
    /// Preferred reconnect location announced by the server.
    pub location: Option<String>,
    queue: Mutex<VecDeque<(u32, Element)>>,
}

impl SmState {
    pub fn new() -> SmState {
        SmState {
            context: SmContext::Invalid,
            sent: 0,
            handled: 0,
            id: None,
            resume: false,
            location: None,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Clone an outgoing stanza into the queue under the next index.
    pub fn enqueue(&mut self, tag: &Element) {
        self.sent = self.sent.wrapping_add(1);
        let mut queue = self.queue.lock().unwrap();
        queue.push_back((self.sent, tag.clone()));
        log::trace!("stream management queue holds {} stanzas", queue.len());
    }

    /// Count one handled inbound stanza.
    pub fn count_handled(&mut self) {
        self.handled = self.handled.wrapping_add(1);
    }

    /// Apply a server acknowledgement: drop every entry with index up to
    /// and including `handled`. With `resend`, the surviving entries are
    /// returned (in index order) for retransmission; they stay queued
    /// until a later acknowledgement covers them.
    pub fn check_queue(&self, handled: u32, resend: bool) -> Vec<Element> {
        let mut queue = self.queue.lock().unwrap();
        queue.retain(|(index, _)| *index > handled);
        if resend {
            queue.iter().map(|(_, tag)| tag.clone()).collect()
        } else {
            Vec::new()
        }
    }

    /// Deep clones of all unacknowledged stanzas, in index order.
    pub fn send_queue(&self) -> Vec<Element> {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .map(|(_, tag)| tag.clone())
            .collect()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Whether the state allows resuming a previous session.
    pub fn resumable(&self) -> bool {
        self.resume && self.id.is_some()
    }

    /// Reset after a disconnect. A resumable session keeps its identity,
    /// counters and queue so `<resume/>` can pick them up; everything else
    /// is dropped.
    pub fn reset(&mut self, keep_session: bool) {
        if keep_session && self.resumable() {
            return;
        }
        self.context = SmContext::Invalid;
        self.sent = 0;
        self.handled = 0;
        self.id = None;
        self.resume = false;
        self.location = None;
        self.queue.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stanza(n: u32) -> Element {
        Element::builder("message", "jabber:client")
            .attr("id", format!("m{}", n))
            .build()
    }

    fn filled(n: u32) -> SmState {
        let mut sm = SmState::new();
        sm.context = SmContext::Enabled;
        for i in 1..=n {
            sm.enqueue(&stanza(i));
        }
        sm
    }

    #[test]
    fn ack_trims_up_to_watermark() {
        let sm = filled(5);
        sm.check_queue(2, false);
        let left = sm.send_queue();
        assert_eq!(left.len(), 3);
        assert_eq!(left[0].attr("id"), Some("m3"));
        assert_eq!(left[2].attr("id"), Some("m5"));
    }

    #[test]
    fn ack_is_idempotent() {
        let sm = filled(3);
        sm.check_queue(3, false);
        sm.check_queue(3, false);
        assert_eq!(sm.queue_len(), 0);
    }

    #[test]
    fn resume_returns_survivors_in_order_and_keeps_them() {
        let sm = filled(5);
        sm.check_queue(2, false);
        let resent = sm.check_queue(3, true);
        assert_eq!(resent.len(), 2);
        assert_eq!(resent[0].attr("id"), Some("m4"));
        assert_eq!(resent[1].attr("id"), Some("m5"));
        // Retained until a later ack covers them.
        assert_eq!(sm.queue_len(), 2);
        sm.check_queue(5, false);
        assert_eq!(sm.queue_len(), 0);
    }

    #[test]
    fn indexes_are_contiguous() {
        let sm = filled(100);
        sm.check_queue(57, false);
        let queue = sm.queue.lock().unwrap();
        let mut expected = 58;
        for (index, _) in queue.iter() {
            assert_eq!(*index, expected);
            expected += 1;
        }
        assert_eq!(expected, 101);
    }

    #[test]
    fn handled_counter_wraps() {
        let mut sm = SmState::new();
        sm.handled = u32::MAX;
        sm.count_handled();
        assert_eq!(sm.handled, 0);
    }

    #[test]
    fn reset_keeps_resumable_session() {
        let mut sm = filled(2);
        sm.id = Some("resume-token".to_string());
        sm.resume = true;
        sm.reset(true);
        assert_eq!(sm.queue_len(), 2);
        assert_eq!(sm.id.as_deref(), Some("resume-token"));
        sm.reset(false);
        assert_eq!(sm.queue_len(), 0);
        assert_eq!(sm.context, SmContext::Invalid);
        assert_eq!(sm.sent, 0);
        assert!(sm.id.is_none());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Handler traits and the thread-safe registries they live in.
//!
//! Handlers are held as `Arc`s and removed by pointer identity; every
//! table carries its own lock and lists are snapshotted before invocation,
//! so a handler may re-register or remove handlers while it runs. All
//! callbacks receive a [`Context`] for sending; they run inline on the
//! receive loop and must not block.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use jid::{BareJid, Jid};
use minidom::Element;

use crate::client::Context;
use crate::error::ConnectionError;
use crate::extension::ExtensionType;
use crate::stanza::{MessageType, Stanza};
use crate::transport::CertInfo;

/// Aggregated transfer statistics, pushed to the
/// [`StatisticsHandler`] after every handled stanza.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStatistics {
    /// Bytes received on the transport.
    pub total_bytes_received: u64,
    /// Bytes sent on the transport.
    pub total_bytes_sent: u64,
    /// Top-level elements received.
    pub total_stanzas_received: u32,
    /// Stanzas sent.
    pub total_stanzas_sent: u32,
    /// IQs received.
    pub iq_stanzas_received: u32,
    /// IQs sent.
    pub iq_stanzas_sent: u32,
    /// Messages received.
    pub message_stanzas_received: u32,
    /// Messages sent.
    pub message_stanzas_sent: u32,
    /// Presences received.
    pub presence_stanzas_received: u32,
    /// Presences sent.
    pub presence_stanzas_sent: u32,
    /// Subscription stanzas received.
    pub subscription_stanzas_received: u32,
    /// Subscription stanzas sent.
    pub subscription_stanzas_sent: u32,
    /// Whether the stream is currently encrypted.
    pub encryption: bool,
}

/// A mediated MUC invitation, as routed to the
/// [`MucInvitationHandler`].
#[derive(Debug, Clone)]
pub struct MucInvitation {
    /// The room the invitation points at.
    pub room: Option<Jid>,
    /// The inviting entity, if stated inside the invitation.
    pub from: Option<Jid>,
    /// Invitation reason.
    pub reason: Option<String>,
    /// Message body accompanying the invitation.
    pub body: Option<String>,
    /// Room password.
    pub password: Option<String>,
    /// Whether the invitation continues a one-to-one conversation.
    pub continued: bool,
    /// Thread of the continued conversation.
    pub thread: Option<String>,
}

/// Observer of connection lifecycle events.
pub trait ConnectionListener: Send + Sync {
    /// The transport came up.
    fn on_connect(&self, _ctx: &mut Context<'_>) {}

    /// The session ended, with the reason.
    fn on_disconnect(&self, _error: &ConnectionError) {}

    /// The TLS handshake concluded; return `false` to reject the
    /// certificate and fail the connection.
    fn on_tls_connect(&self, _info: &CertInfo) -> bool {
        true
    }

    /// A resource was bound.
    fn on_resource_bound(&self, _ctx: &mut Context<'_>, _jid: &Jid) {}

    /// Resource binding failed.
    fn on_resource_bind_error(&self, _error: &Stanza) {}
}

/// Receiver of message stanzas.
pub trait MessageHandler: Send + Sync {
    /// A message arrived.
    fn handle_message(&self, ctx: &mut Context<'_>, message: &Stanza);
}

/// Receiver of presence stanzas.
pub trait PresenceHandler: Send + Sync {
    /// A presence arrived.
    fn handle_presence(&self, ctx: &mut Context<'_>, presence: &Stanza);
}

/// Receiver of subscription stanzas.
pub trait SubscriptionHandler: Send + Sync {
    /// A subscription stanza arrived.
    fn handle_subscription(&self, ctx: &mut Context<'_>, subscription: &Stanza);
}

/// IQ handler: extension-routed requests and id-routed responses.
pub trait IqHandler: Send + Sync {
    /// An IQ Get/Set carrying a registered extension arrived. Return
    /// `true` if the request was handled; the first handler returning
    /// `true` stops the walk.
    fn handle_iq(&self, _ctx: &mut Context<'_>, _iq: &Stanza) -> bool {
        false
    }

    /// The response to an IQ tracked with this handler arrived.
    fn handle_iq_id(&self, _ctx: &mut Context<'_>, _iq: &Stanza, _context: u32) {}
}

/// Catch-all handler for unknown top-level elements.
pub trait TagHandler: Send + Sync {
    /// A matching element arrived.
    fn handle_tag(&self, ctx: &mut Context<'_>, tag: &Element);
}

/// Receiver of MUC invitations.
pub trait MucInvitationHandler: Send + Sync {
    /// An invitation arrived.
    fn handle_invitation(&self, ctx: &mut Context<'_>, invitation: &MucInvitation);
}

/// Receiver of per-stanza statistics updates. Invoked synchronously on
/// the receive loop.
pub trait StatisticsHandler: Send + Sync {
    /// Fresh statistics after a handled stanza.
    fn handle_statistics(&self, statistics: &StreamStatistics);
}

/// Factory callback for message sessions created on inbound messages.
pub trait MessageSessionHandler: Send + Sync {
    /// A session was created for a message that matched no existing
    /// session. Attach a [`MessageHandler`] to receive its traffic,
    /// starting with the triggering message.
    fn handle_session(&self, ctx: &mut Context<'_>, session: &Arc<MessageSession>);
}

/// A live one-to-one (or room) dialog, matched by target JID, thread and
/// message subtypes.
pub struct MessageSession {
    target: Jid,
    types: u8,
    honor_thread: bool,
    thread: Mutex<Option<String>>,
    handler: Mutex<Option<Arc<dyn MessageHandler>>>,
}

impl MessageSession {
    /// Create a session for `target`, receiving the subtypes in the
    /// `types` bitmask (0 means all), optionally bound to a thread.
    pub fn new(target: Jid, types: u8, thread: Option<String>) -> Arc<MessageSession> {
        Arc::new(MessageSession {
            target,
            types,
            honor_thread: thread.is_some(),
            thread: Mutex::new(thread),
            handler: Mutex::new(None),
        })
    }

    pub(crate) fn adopting(target: Jid, types: u8) -> Arc<MessageSession> {
        Arc::new(MessageSession {
            target,
            types,
            honor_thread: false,
            thread: Mutex::new(None),
            handler: Mutex::new(None),
        })
    }

    /// The JID this session talks to.
    pub fn target(&self) -> &Jid {
        &self.target
    }

    /// The subtype bitmask this session accepts.
    pub fn types(&self) -> u8 {
        self.types
    }

    /// The session thread, if one is established.
    pub fn thread(&self) -> Option<String> {
        self.thread.lock().unwrap().clone()
    }

    /// Attach the receiver for this session's messages.
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    /// Build an outgoing message addressed to the session target,
    /// carrying the session thread if one is established.
    pub fn build_message<S: AsRef<str>>(&self, body: S) -> Stanza {
        let subtype = if self.types & MessageType::Chat.bit() != 0 || self.types == 0 {
            MessageType::Chat
        } else if self.types & MessageType::Groupchat.bit() != 0 {
            MessageType::Groupchat
        } else {
            MessageType::Normal
        };
        let mut message = Stanza::message(subtype)
            .with_to(&self.target)
            .with_body(body.as_ref());
        if let Some(thread) = self.thread() {
            message = message.with_thread(thread);
        }
        message
    }

    pub(crate) fn matches(
        &self,
        from: &Jid,
        thread: Option<&str>,
        type_bit: u8,
        full: bool,
    ) -> bool {
        let jid_match = if full {
            self.target == *from
        } else {
            self.target.to_bare() == from.to_bare()
        };
        if !jid_match {
            return false;
        }
        let thread_match = match thread {
            None => true,
            Some(t) => {
                !self.honor_thread || self.thread.lock().unwrap().as_deref() == Some(t)
            }
        };
        thread_match && (self.types & type_bit != 0 || self.types == 0)
    }

    pub(crate) fn handle_message(&self, ctx: &mut Context<'_>, message: &Stanza) {
        {
            let mut thread = self.thread.lock().unwrap();
            if thread.is_none() {
                *thread = message.thread();
            }
        }
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler.handle_message(ctx, message);
        }
    }
}

fn remove_by_identity<T: ?Sized>(list: &mut Vec<Arc<T>>, target: &Arc<T>) {
    list.retain(|h| !Arc::ptr_eq(h, target));
}

pub(crate) fn session_slot(subtype: MessageType) -> Option<usize> {
    match subtype {
        MessageType::Chat => Some(0),
        MessageType::Normal => Some(1),
        MessageType::Groupchat => Some(2),
        MessageType::Headline => Some(3),
        MessageType::Error => None,
    }
}

/// All handler registries of a client. Cheap to share; every table has
/// its own lock, and registration is safe from any thread, including from
/// inside running handlers.
pub struct Handlers {
    pub(crate) connection: Mutex<Vec<Arc<dyn ConnectionListener>>>,
    pub(crate) presence: Mutex<Vec<Arc<dyn PresenceHandler>>>,
    pub(crate) presence_by_jid: Mutex<Vec<(BareJid, Arc<dyn PresenceHandler>)>>,
    pub(crate) message: Mutex<Vec<Arc<dyn MessageHandler>>>,
    pub(crate) subscription: Mutex<Vec<Arc<dyn SubscriptionHandler>>>,
    pub(crate) sessions: Mutex<Vec<Arc<MessageSession>>>,
    pub(crate) session_handlers: Mutex<[Option<Arc<dyn MessageSessionHandler>>; 4]>,
    pub(crate) iq_ext: Mutex<Vec<(ExtensionType, Arc<dyn IqHandler>)>>,
    pub(crate) tag: Mutex<Vec<(String, String, Arc<dyn TagHandler>)>>,
    pub(crate) muc_invitation: Mutex<Option<Arc<dyn MucInvitationHandler>>>,
    pub(crate) statistics: Mutex<Option<Arc<dyn StatisticsHandler>>>,
    pub(crate) disco_features: Mutex<BTreeSet<String>>,
}

impl Default for Handlers {
    fn default() -> Handlers {
        Handlers {
            connection: Mutex::new(Vec::new()),
            presence: Mutex::new(Vec::new()),
            presence_by_jid: Mutex::new(Vec::new()),
            message: Mutex::new(Vec::new()),
            subscription: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            session_handlers: Mutex::new([None, None, None, None]),
            iq_ext: Mutex::new(Vec::new()),
            tag: Mutex::new(Vec::new()),
            muc_invitation: Mutex::new(None),
            statistics: Mutex::new(None),
            disco_features: Mutex::new(BTreeSet::new()),
        }
    }
}

impl Handlers {
    pub(crate) fn new() -> Arc<Handlers> {
        Arc::new(Handlers::default())
    }

    /// Register a connection listener.
    pub fn register_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.connection.lock().unwrap().push(listener);
    }

    /// Remove a connection listener by identity.
    pub fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        remove_by_identity(&mut self.connection.lock().unwrap(), listener);
    }

    /// Register a global presence handler.
    pub fn register_presence_handler(&self, handler: Arc<dyn PresenceHandler>) {
        self.presence.lock().unwrap().push(handler);
    }

    /// Remove a global presence handler by identity.
    pub fn remove_presence_handler(&self, handler: &Arc<dyn PresenceHandler>) {
        remove_by_identity(&mut self.presence.lock().unwrap(), handler);
    }

    /// Register a presence handler for one bare JID. JID-bound handlers
    /// shadow the global ones for their JID.
    pub fn register_presence_handler_for(&self, jid: &Jid, handler: Arc<dyn PresenceHandler>) {
        self.presence_by_jid
            .lock()
            .unwrap()
            .push((jid.to_bare(), handler));
    }

    /// Remove JID-bound presence handlers. With `None`, every handler for
    /// the JID is removed.
    pub fn remove_presence_handler_for(&self, jid: &Jid, handler: Option<&Arc<dyn PresenceHandler>>) {
        let bare = jid.to_bare();
        self.presence_by_jid.lock().unwrap().retain(|(j, h)| {
            *j != bare || handler.map(|target| !Arc::ptr_eq(h, target)).unwrap_or(false)
        });
    }

    /// Register a message handler.
    pub fn register_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.message.lock().unwrap().push(handler);
    }

    /// Remove a message handler by identity.
    pub fn remove_message_handler(&self, handler: &Arc<dyn MessageHandler>) {
        remove_by_identity(&mut self.message.lock().unwrap(), handler);
    }

    /// Register a subscription handler.
    pub fn register_subscription_handler(&self, handler: Arc<dyn SubscriptionHandler>) {
        self.subscription.lock().unwrap().push(handler);
    }

    /// Remove a subscription handler by identity.
    pub fn remove_subscription_handler(&self, handler: &Arc<dyn SubscriptionHandler>) {
        remove_by_identity(&mut self.subscription.lock().unwrap(), handler);
    }

    /// Register a live message session.
    pub fn register_message_session(&self, session: Arc<MessageSession>) {
        self.sessions.lock().unwrap().push(session);
    }

    /// Remove a message session by identity.
    pub fn dispose_message_session(&self, session: &Arc<MessageSession>) {
        self.sessions
            .lock()
            .unwrap()
            .retain(|s| !Arc::ptr_eq(s, session));
    }

    /// Register the session factory for the subtypes in `types` (0 means
    /// all subtypes).
    pub fn register_message_session_handler(
        &self,
        handler: Arc<dyn MessageSessionHandler>,
        types: u8,
    ) {
        let mut slots = self.session_handlers.lock().unwrap();
        for subtype in [
            MessageType::Chat,
            MessageType::Normal,
            MessageType::Groupchat,
            MessageType::Headline,
        ] {
            if types == 0 || types & subtype.bit() != 0 {
                if let Some(i) = session_slot(subtype) {
                    slots[i] = Some(handler.clone());
                }
            }
        }
    }

    /// Register an IQ handler for an extension type. Registration is
    /// idempotent per (type, handler) pair.
    pub fn register_iq_handler(&self, handler: Arc<dyn IqHandler>, ext: ExtensionType) {
        let mut table = self.iq_ext.lock().unwrap();
        if table
            .iter()
            .any(|(e, h)| *e == ext && Arc::ptr_eq(h, &handler))
        {
            return;
        }
        table.push((ext, handler));
    }

    /// Remove an IQ handler for an extension type, by identity.
    pub fn remove_iq_handler(&self, handler: &Arc<dyn IqHandler>, ext: ExtensionType) {
        self.iq_ext
            .lock()
            .unwrap()
            .retain(|(e, h)| *e != ext || !Arc::ptr_eq(h, handler));
    }

    /// Register a catch-all handler for `(tag, xmlns)`.
    pub fn register_tag_handler(&self, handler: Arc<dyn TagHandler>, tag: &str, xmlns: &str) {
        if tag.is_empty() {
            return;
        }
        self.tag
            .lock()
            .unwrap()
            .push((tag.to_string(), xmlns.to_string(), handler));
    }

    /// Remove a catch-all handler registration.
    pub fn remove_tag_handler(&self, handler: &Arc<dyn TagHandler>, tag: &str, xmlns: &str) {
        self.tag
            .lock()
            .unwrap()
            .retain(|(t, x, h)| t != tag || x != xmlns || !Arc::ptr_eq(h, handler));
    }

    /// Install the MUC invitation handler and advertise the MUC feature.
    pub fn register_muc_invitation_handler(&self, handler: Arc<dyn MucInvitationHandler>) {
        *self.muc_invitation.lock().unwrap() = Some(handler);
        self.disco_features
            .lock()
            .unwrap()
            .insert(crate::ns::MUC.to_string());
    }

    /// Remove the MUC invitation handler and stop advertising the MUC
    /// feature.
    pub fn remove_muc_invitation_handler(&self) {
        *self.muc_invitation.lock().unwrap() = None;
        self.disco_features.lock().unwrap().remove(crate::ns::MUC);
    }

    /// Install the statistics handler.
    pub fn register_statistics_handler(&self, handler: Arc<dyn StatisticsHandler>) {
        *self.statistics.lock().unwrap() = Some(handler);
    }

    /// Remove the statistics handler.
    pub fn remove_statistics_handler(&self) {
        *self.statistics.lock().unwrap() = None;
    }

    /// The features to announce through service discovery.
    pub fn disco_features(&self) -> BTreeSet<String> {
        self.disco_features.lock().unwrap().clone()
    }
}

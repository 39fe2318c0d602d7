// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Routing of framed stream items: negotiation elements to the state
//! machine, stanzas to the registered handlers, everything else to the
//! catch-all table.

use minidom::Element;

use super::{notify_statistics, Client, ConnectionState, Context};
use crate::error::ConnectionError;
use crate::extension::types;
use crate::extensions::MucUser;
use crate::handlers::{session_slot, MessageSession, MucInvitation};
use crate::ns;
use crate::stanza::{
    ErrorType, IqType, Stanza, StanzaError, StanzaErrorCondition, StanzaKind,
};
use crate::stream_error::StreamError;
use crate::xmlstream::{StreamHeader, StreamItem};

/// The stream version is acceptable when its major component does not
/// exceed the 1.0 this engine implements. A header without a version is
/// pre-RFC and rejected.
fn version_supported(version: Option<&str>) -> bool {
    let Some(version) = version else {
        return false;
    };
    version
        .split('.')
        .next()
        .and_then(|major| major.parse::<u32>().ok())
        .map(|major| major <= 1)
        .unwrap_or(false)
}

impl Client {
    pub(crate) fn handle_item(&mut self, item: StreamItem) -> Result<(), ConnectionError> {
        match item {
            StreamItem::Header(header) => self.handle_header(header),
            StreamItem::Footer => {
                log::debug!("stream closed by peer");
                Err(self.shutdown(ConnectionError::StreamClosed))
            }
            StreamItem::Tag(tag) => self.handle_tag(tag),
        }
    }

    fn handle_header(&mut self, header: StreamHeader) -> Result<(), ConnectionError> {
        if !version_supported(header.version.as_deref()) {
            log::warn!(
                "server stream version {:?} is not supported",
                header.version
            );
            return Err(self.shutdown(ConnectionError::StreamVersion));
        }
        self.core.stream_id = header.id;
        if self.core.state < ConnectionState::StreamOpen {
            self.core.state = ConnectionState::StreamOpen;
        }
        Ok(())
    }

    fn handle_tag(&mut self, tag: Element) -> Result<(), ConnectionError> {
        log::debug!("RECV: {}", String::from(&tag));
        self.core.stats.total_stanzas_received =
            self.core.stats.total_stanzas_received.wrapping_add(1);

        let name = tag.name().to_string();
        let tag_ns = tag.ns();
        match (name.as_str(), tag_ns.as_str()) {
            ("error", ns::STREAM) => {
                let error = StreamError::from_element(&tag);
                log::warn!("stream error: {}", error);
                self.core.stream_error = Some(error.clone());
                Err(self.shutdown(ConnectionError::Stream(error)))
            }
            ("features", ns::STREAM) => self.handle_features(tag),

            ("proceed", ns::TLS) => self.handle_proceed(),
            ("failure", ns::TLS) => Err(self.shutdown(ConnectionError::TlsFailed)),

            ("challenge", ns::SASL) => self.handle_challenge(&tag),
            ("success", ns::SASL) => self.handle_sasl_success(&tag),
            ("failure", ns::SASL) => self.handle_sasl_failure(&tag),

            ("compressed", ns::COMPRESS) => self.handle_compressed(),
            ("failure", ns::COMPRESS) => self.handle_compression_failure(),

            ("enabled", ns::SM) => {
                self.handle_sm_enabled(&tag);
                Ok(())
            }
            ("resumed", ns::SM) => self.handle_sm_resumed(&tag),
            ("failed", ns::SM) => self.handle_sm_failed(),
            ("a", ns::SM) => {
                self.handle_sm_ack(&tag);
                Ok(())
            }
            ("r", ns::SM) => self.handle_sm_req(),

            ("iq", ns::CLIENT) | ("message", ns::CLIENT) | ("presence", ns::CLIENT) => {
                match Stanza::parse(tag) {
                    Ok(stanza) => self.dispatch_stanza(stanza),
                    Err(element) => {
                        log::warn!("invalid stanza received: {}", element.name());
                        Ok(())
                    }
                }
            }

            _ => {
                self.notify_tag_handlers(&tag);
                notify_statistics(&mut self.core, &self.handlers);
                Ok(())
            }
        }
    }

    fn dispatch_stanza(&mut self, mut stanza: Stanza) -> Result<(), ConnectionError> {
        self.core.factory.add_extensions(&mut stanza);

        // The bind reply is part of negotiation, not application traffic.
        if matches!(
            stanza.kind(),
            StanzaKind::Iq(IqType::Result) | StanzaKind::Iq(IqType::Error)
        ) && self.core.bind_id.is_some()
            && stanza.id() == self.core.bind_id.as_deref()
        {
            self.core.stats.iq_stanzas_received += 1;
            let result = self.handle_bind_result(&stanza);
            notify_statistics(&mut self.core, &self.handlers);
            return result;
        }

        match stanza.kind() {
            StanzaKind::Iq(_) => {
                self.core.stats.iq_stanzas_received += 1;
                self.notify_iq_handlers(&stanza);
            }
            StanzaKind::Message(_) => {
                self.core.stats.message_stanzas_received += 1;
                self.notify_message_handlers(&stanza);
            }
            StanzaKind::Presence(_) => {
                self.core.stats.presence_stanzas_received += 1;
                self.notify_presence_handlers(&stanza);
            }
            StanzaKind::Subscription(_) => {
                self.core.stats.subscription_stanzas_received += 1;
                self.notify_subscription_handlers(&stanza);
            }
        }

        if self.core.sm.context.active() {
            self.core.sm.count_handled();
        }
        notify_statistics(&mut self.core, &self.handlers);
        Ok(())
    }

    /// Send an automatic error reply; failures end the session soon
    /// enough through the receive loop, so they are only logged here.
    fn send_reply(&mut self, reply: Stanza) {
        if let Err(e) = self.core.send_stanza(reply) {
            log::warn!("failed to send error reply: {}", e);
        }
        notify_statistics(&mut self.core, &self.handlers);
    }

    fn notify_iq_handlers(&mut self, iq: &Stanza) {
        let subtype = match iq.kind() {
            StanzaKind::Iq(subtype) => subtype,
            _ => return,
        };

        // Id-tracked responses take precedence; the entry is consumed.
        if matches!(subtype, IqType::Result | IqType::Error) {
            if let Some(entry) = iq.id().and_then(|id| self.core.tracker.take(id)) {
                let mut ctx = Context {
                    core: &mut self.core,
                    handlers: &self.handlers,
                };
                entry.handler.handle_iq_id(&mut ctx, iq, entry.context);
                return;
            }
        }

        if iq.extensions().is_empty() {
            if matches!(subtype, IqType::Get | IqType::Set) {
                self.send_reply(iq.error_reply(StanzaError::new(
                    ErrorType::Cancel,
                    StanzaErrorCondition::FeatureNotImplemented,
                )));
            }
            return;
        }

        let table = self.handlers.iq_ext.lock().unwrap().clone();
        let mut handled = false;
        'extensions: for ext in iq.extensions() {
            for (ext_type, handler) in &table {
                if *ext_type != ext.extension_type() {
                    continue;
                }
                let mut ctx = Context {
                    core: &mut self.core,
                    handlers: &self.handlers,
                };
                if handler.handle_iq(&mut ctx, iq) {
                    handled = true;
                    break 'extensions;
                }
            }
        }

        if !handled && matches!(subtype, IqType::Get | IqType::Set) {
            self.send_reply(iq.error_reply(StanzaError::new(
                ErrorType::Cancel,
                StanzaErrorCondition::ServiceUnavailable,
            )));
        }
    }

    fn notify_message_handlers(&mut self, message: &Stanza) {
        let subtype = match message.kind() {
            StanzaKind::Message(subtype) => subtype,
            _ => return,
        };

        // MUC invitations bypass sessions and plain message handlers.
        let invitation_handler = self.handlers.muc_invitation.lock().unwrap().clone();
        if let Some(handler) = invitation_handler {
            let invitation = message.extension::<MucUser>(types::MUC_USER).and_then(|mu| {
                mu.invite.as_ref().map(|invite| MucInvitation {
                    room: message.from(),
                    from: invite.jid.clone(),
                    reason: invite.reason.clone(),
                    body: message.body(),
                    password: mu.password.clone(),
                    continued: mu.continued,
                    thread: mu.thread.clone(),
                })
            });
            if let Some(invitation) = invitation {
                let mut ctx = Context {
                    core: &mut self.core,
                    handlers: &self.handlers,
                };
                handler.handle_invitation(&mut ctx, &invitation);
                return;
            }
        }

        let from = match message.from() {
            Some(from) => from,
            None => {
                // No sender to match sessions on; broadcast.
                let table = self.handlers.message.lock().unwrap().clone();
                let mut ctx = Context {
                    core: &mut self.core,
                    handlers: &self.handlers,
                };
                for handler in table {
                    handler.handle_message(&mut ctx, message);
                }
                return;
            }
        };
        let thread = message.thread();
        let bit = subtype.bit();

        // Full-JID sessions win over bare-JID sessions.
        let sessions = self.handlers.sessions.lock().unwrap().clone();
        for full in [true, false] {
            for session in &sessions {
                if session.matches(&from, thread.as_deref(), bit, full) {
                    let mut ctx = Context {
                        core: &mut self.core,
                        handlers: &self.handlers,
                    };
                    session.handle_message(&mut ctx, message);
                    return;
                }
            }
        }

        // No session matched: maybe the embedder wants one created.
        if let Some(slot) = session_slot(subtype) {
            let factory = self.handlers.session_handlers.lock().unwrap()[slot].clone();
            if let Some(factory) = factory {
                let session = MessageSession::adopting(from, bit);
                self.handlers.register_message_session(session.clone());
                let mut ctx = Context {
                    core: &mut self.core,
                    handlers: &self.handlers,
                };
                factory.handle_session(&mut ctx, &session);
                session.handle_message(&mut ctx, message);
                return;
            }
        }

        let table = self.handlers.message.lock().unwrap().clone();
        let mut ctx = Context {
            core: &mut self.core,
            handlers: &self.handlers,
        };
        for handler in table {
            handler.handle_message(&mut ctx, message);
        }
    }

    fn notify_presence_handlers(&mut self, presence: &Stanza) {
        let mut matched = false;
        if let Some(from) = presence.from() {
            let bare = from.to_bare();
            let table = self.handlers.presence_by_jid.lock().unwrap().clone();
            for (jid, handler) in table {
                if jid == bare {
                    let mut ctx = Context {
                        core: &mut self.core,
                        handlers: &self.handlers,
                    };
                    handler.handle_presence(&mut ctx, presence);
                    matched = true;
                }
            }
        }
        if matched {
            return;
        }
        let table = self.handlers.presence.lock().unwrap().clone();
        let mut ctx = Context {
            core: &mut self.core,
            handlers: &self.handlers,
        };
        for handler in table {
            handler.handle_presence(&mut ctx, presence);
        }
    }

    fn notify_subscription_handlers(&mut self, subscription: &Stanza) {
        let table = self.handlers.subscription.lock().unwrap().clone();
        let mut ctx = Context {
            core: &mut self.core,
            handlers: &self.handlers,
        };
        for handler in table {
            handler.handle_subscription(&mut ctx, subscription);
        }
    }

    fn notify_tag_handlers(&mut self, tag: &Element) {
        let table = self.handlers.tag.lock().unwrap().clone();
        let tag_ns = tag.ns();
        for (name, xmlns, handler) in table {
            if name == tag.name() && xmlns == tag_ns {
                let mut ctx = Context {
                    core: &mut self.core,
                    handlers: &self.handlers,
                };
                handler.handle_tag(&mut ctx, tag);
            }
        }
    }
}

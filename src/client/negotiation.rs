// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Feature-driven stream negotiation: STARTTLS, compression, SASL,
//! resource binding and stream management.

use minidom::Element;

use super::{Client, ConnectionState, Context, TlsPolicy};
use crate::error::{AuthError, ConnectionError};
use crate::ns;
use crate::sasl::{
    self, Anonymous, ChannelBinding, Condition, DigestMd5, External, Mechanism, MechanismError,
    MechanismKind, Plain, Scram,
};
use crate::sm::SmContext;
use crate::stanza::{IqType, Stanza, StanzaKind};

fn sasl_mechanisms(features: &Element) -> Vec<String> {
    features
        .get_child("mechanisms", ns::SASL)
        .map(|m| {
            m.children()
                .filter(|c| c.is("mechanism", ns::SASL))
                .map(|c| c.text())
                .collect()
        })
        .unwrap_or_default()
}

fn compression_methods(features: &Element) -> Vec<String> {
    features
        .get_child("compression", ns::COMPRESS_FEATURE)
        .map(|c| {
            c.children()
                .filter(|m| m.is("method", ns::COMPRESS_FEATURE))
                .map(|m| m.text())
                .collect()
        })
        .unwrap_or_default()
}

impl Client {
    /// Decide the next negotiation step from a `<stream:features/>`.
    ///
    /// Order per RFC 6120 and XEP-0138: TLS first, then compression, then
    /// SASL; once authenticated, resumption or binding, then stream
    /// management.
    pub(crate) fn handle_features(&mut self, features: Element) -> Result<(), ConnectionError> {
        let tls_offered = features.get_child("starttls", ns::TLS).is_some();
        let tls_required = features
            .get_child("starttls", ns::TLS)
            .map(|o| o.get_child("required", ns::TLS).is_some())
            .unwrap_or(false);
        if !self.core.tls_active && self.core.config.tls != TlsPolicy::Disabled {
            if tls_offered && self.core.tls.is_some() {
                self.core.last_features = Some(features);
                return self
                    .core
                    .send_element(&Element::bare("starttls", ns::TLS), false);
            }
            // Offered without a channel installed, or not offered at all.
            if (tls_offered && tls_required) || self.core.config.tls == TlsPolicy::Required {
                return Err(self.shutdown(ConnectionError::TlsFailed));
            }
        }

        if !self.core.compression_active
            && self.core.config.compression
            && self.core.compressor.is_some()
        {
            let methods = compression_methods(&features);
            let method = self
                .core
                .compressor
                .as_ref()
                .map(|c| c.method().to_string())
                .filter(|m| methods.iter().any(|offered| offered == m));
            if let Some(method) = method {
                self.core.last_features = Some(features);
                let compress = Element::builder("compress", ns::COMPRESS)
                    .append(
                        Element::builder("method", ns::COMPRESS)
                            .append(method.as_str())
                            .build(),
                    )
                    .build();
                return self.core.send_element(&compress, false);
            }
        }

        if !self.core.authed {
            let offered = sasl_mechanisms(&features);
            self.core.last_features = Some(features);
            return self.start_sasl(offered);
        }

        let has_sm = features.get_child("sm", ns::SM).is_some();
        let has_bind = features.get_child("bind", ns::BIND).is_some();
        self.core.last_features = Some(features);

        if has_sm && self.core.config.sm_resume && self.core.sm.resumable() {
            let resume = Element::builder("resume", ns::SM)
                .attr("h", self.core.sm.handled.to_string())
                .attr("previd", self.core.sm.id.clone().unwrap_or_default())
                .build();
            self.core.sm.context = SmContext::Resuming;
            return self.core.send_element(&resume, false);
        }

        if has_bind {
            return self.send_bind();
        }
        Ok(())
    }

    /// `<proceed/>`: hand the socket to the TLS channel, verify the
    /// certificate with the listeners, re-open the stream on top.
    pub(crate) fn handle_proceed(&mut self) -> Result<(), ConnectionError> {
        let handshake = {
            let core = &mut self.core;
            match (core.tls.as_mut(), core.transport.as_mut()) {
                (Some(tls), Some(transport)) => Some(tls.handshake(&mut **transport)),
                _ => None,
            }
        };
        let info = match handshake {
            Some(Ok(info)) => info,
            Some(Err(e)) => {
                log::warn!("TLS handshake failed: {}", e);
                return Err(self.shutdown(ConnectionError::TlsFailed));
            }
            None => return Err(self.shutdown(ConnectionError::TlsFailed)),
        };

        let listeners = self.handlers.connection.lock().unwrap().clone();
        let accepted = listeners.iter().all(|l| l.on_tls_connect(&info));
        if !accepted {
            log::warn!("server certificate rejected");
            return Err(self.shutdown(ConnectionError::TlsFailed));
        }

        self.core.tls_active = true;
        self.core.stats.encryption = true;
        self.core.reader.reset();
        self.core.send_header()?;
        self.core.state = ConnectionState::StreamOpen;
        Ok(())
    }

    /// `<compressed/>`: activate the compression layer and re-open the
    /// stream.
    pub(crate) fn handle_compressed(&mut self) -> Result<(), ConnectionError> {
        self.core.compression_active = true;
        self.core.reader.reset();
        self.core.send_header()?;
        self.core.state = ConnectionState::StreamOpen;
        Ok(())
    }

    /// Compression `<failure/>`: carry on over the uncompressed stream.
    pub(crate) fn handle_compression_failure(&mut self) -> Result<(), ConnectionError> {
        log::warn!("compression negotiation failed, continuing uncompressed");
        let features = self.core.last_features.take();
        if let Some(features) = features {
            if !self.core.authed {
                let offered = sasl_mechanisms(&features);
                self.core.last_features = Some(features);
                return self.start_sasl(offered);
            }
            self.core.last_features = Some(features);
        }
        Ok(())
    }

    fn start_sasl(&mut self, offered: Vec<String>) -> Result<(), ConnectionError> {
        let channel_binding = self.core.tls_active
            && self
                .core
                .tls
                .as_ref()
                .map(|t| t.channel_binding_type().is_some() && t.channel_binding().is_some())
                .unwrap_or(false);

        let kind = match sasl::select(&offered, &self.core.config.sasl_mechanisms, channel_binding)
        {
            Some(kind) => kind,
            None => return Err(self.shutdown(ConnectionError::Auth(AuthError::NoMechanism))),
        };
        log::debug!("selected SASL mechanism {}", kind);

        let built = build_mechanism(&self.core, kind, &offered);
        let mut mechanism = match built {
            Ok(m) => m,
            Err(e) => return Err(self.shutdown(ConnectionError::Auth(AuthError::Mechanism(e)))),
        };
        let initial = match mechanism.initial() {
            Ok(data) => data,
            Err(e) => return Err(self.shutdown(ConnectionError::Auth(AuthError::Mechanism(e)))),
        };

        self.core.selected_mech = Some(kind);
        self.core.sasl = Some(mechanism);
        self.core
            .send_element(&sasl::auth_element(kind.name(), &initial), false)
    }

    /// `<challenge/>`: let the active mechanism answer.
    pub(crate) fn handle_challenge(&mut self, challenge: &Element) -> Result<(), ConnectionError> {
        let data = match sasl::decode_payload(challenge) {
            Some(data) => data,
            None => {
                self.core.sasl = None;
                return Err(self.shutdown(ConnectionError::Auth(AuthError::Mechanism(
                    MechanismError::MalformedChallenge,
                ))));
            }
        };
        let response = match self.core.sasl.as_mut() {
            Some(mechanism) => mechanism.response(&data),
            None => {
                log::warn!("unsolicited SASL challenge");
                return Ok(());
            }
        };
        match response {
            Ok(data) => self
                .core
                .send_element(&sasl::response_element(&data), false),
            Err(e) => {
                self.core.sasl = None;
                Err(self.shutdown(ConnectionError::Auth(AuthError::Mechanism(e))))
            }
        }
    }

    /// `<success/>`: verify the additional data, then re-open the stream
    /// as authenticated.
    pub(crate) fn handle_sasl_success(&mut self, success: &Element) -> Result<(), ConnectionError> {
        let data = sasl::decode_payload(success).unwrap_or_default();
        let verdict = match self.core.sasl.as_mut() {
            Some(mechanism) => mechanism.success(&data),
            None => Ok(()),
        };
        self.core.sasl = None;
        self.core.selected_mech = None;
        if verdict.is_err() {
            return Err(self.shutdown(ConnectionError::Auth(AuthError::Fail(
                Condition::NotAuthorized,
            ))));
        }
        log::debug!("authentication successful");
        self.core.authed = true;
        self.core.reader.reset();
        self.core.send_header()?;
        self.core.state = ConnectionState::Authenticated;
        Ok(())
    }

    /// SASL `<failure/>`.
    pub(crate) fn handle_sasl_failure(&mut self, failure: &Element) -> Result<(), ConnectionError> {
        let condition = Condition::from_failure(failure);
        self.core.sasl = None;
        self.core.selected_mech = None;
        Err(self.shutdown(ConnectionError::Auth(AuthError::Fail(condition))))
    }

    fn send_bind(&mut self) -> Result<(), ConnectionError> {
        let id = self.core.ids.next_id();
        self.core.bind_id = Some(id.clone());
        let mut bind = Element::builder("bind", ns::BIND);
        if let Some(resource) = self.core.config.resource.clone() {
            bind = bind.append(
                Element::builder("resource", ns::BIND)
                    .append(resource.as_str())
                    .build(),
            );
        }
        let iq = Stanza::iq(IqType::Set).with_id(id).with_payload(bind.build());
        self.core.send_stanza(iq)
    }

    /// The reply to our bind request.
    pub(crate) fn handle_bind_result(&mut self, iq: &Stanza) -> Result<(), ConnectionError> {
        self.core.bind_id = None;
        match iq.kind() {
            StanzaKind::Iq(IqType::Result) => {
                let jid = iq
                    .element()
                    .get_child("bind", ns::BIND)
                    .and_then(|b| b.get_child("jid", ns::BIND))
                    .and_then(|j| j.text().parse().ok());
                let jid = match jid {
                    Some(jid) => jid,
                    None => {
                        log::warn!("bind result without a parseable JID");
                        return Ok(());
                    }
                };
                log::debug!("resource bound as {}", jid);
                self.core.bound = Some(jid);
                self.core.state = ConnectionState::Bound;

                let bound = self.core.bound.clone();
                let listeners = self.handlers.connection.lock().unwrap().clone();
                let mut ctx = Context {
                    core: &mut self.core,
                    handlers: &self.handlers,
                };
                if let Some(ref jid) = bound {
                    for listener in listeners {
                        listener.on_resource_bound(&mut ctx, jid);
                    }
                }

                self.maybe_enable_sm()
            }
            StanzaKind::Iq(IqType::Error) => {
                log::warn!("resource binding failed");
                let listeners = self.handlers.connection.lock().unwrap().clone();
                for listener in listeners {
                    listener.on_resource_bind_error(iq);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn maybe_enable_sm(&mut self) -> Result<(), ConnectionError> {
        if !self.core.config.stream_management || self.core.sm.context.active() {
            return Ok(());
        }
        let offered = self
            .core
            .last_features
            .as_ref()
            .map(|f| f.get_child("sm", ns::SM).is_some())
            .unwrap_or(false);
        if !offered {
            return Ok(());
        }
        let mut enable = Element::builder("enable", ns::SM);
        if self.core.config.sm_resume {
            enable = enable.attr("resume", "true");
        }
        self.core.sm.context = SmContext::Requested;
        self.core.send_element(&enable.build(), false)
    }

    /// `<enabled/>`.
    pub(crate) fn handle_sm_enabled(&mut self, enabled: &Element) {
        let sm = &mut self.core.sm;
        sm.context = SmContext::Enabled;
        sm.sent = 0;
        sm.handled = 0;
        sm.id = enabled.attr("id").map(String::from);
        sm.resume = matches!(enabled.attr("resume"), Some("true") | Some("1"));
        sm.location = enabled.attr("location").map(String::from);
        log::debug!(
            "stream management enabled (resumable: {})",
            sm.resumable()
        );
    }

    /// `<resumed/>`: trim the queue to the server's counter and resend
    /// what it has not seen, in order.
    pub(crate) fn handle_sm_resumed(&mut self, resumed: &Element) -> Result<(), ConnectionError> {
        let h = match resumed.attr("h").and_then(|h| h.parse::<u32>().ok()) {
            Some(h) => h,
            None => return Ok(()),
        };
        self.core.sm.context = SmContext::Resumed;
        self.core.state = ConnectionState::Bound;
        let resend = self.core.sm.check_queue(h, true);
        log::debug!("stream resumed, retransmitting {} stanzas", resend.len());
        for tag in resend {
            self.core.send_element(&tag, false)?;
        }
        Ok(())
    }

    /// SM `<failed/>`: fall back to a fresh session.
    pub(crate) fn handle_sm_failed(&mut self) -> Result<(), ConnectionError> {
        let was_resuming = self.core.sm.context == SmContext::Resuming;
        self.core.sm.context = SmContext::Failed;
        if !was_resuming {
            log::warn!("stream management could not be enabled");
            return Ok(());
        }
        log::warn!(
            "stream resumption failed, dropping {} queued stanzas",
            self.core.sm.queue_len()
        );
        self.core.sm.reset(false);
        self.core.bound = None;
        let has_bind = self
            .core
            .last_features
            .as_ref()
            .map(|f| f.get_child("bind", ns::BIND).is_some())
            .unwrap_or(false);
        if has_bind {
            return self.send_bind();
        }
        Ok(())
    }

    /// `<a/>` from the server.
    pub(crate) fn handle_sm_ack(&mut self, ack: &Element) {
        if let Some(h) = ack.attr("h").and_then(|h| h.parse::<u32>().ok()) {
            self.core.sm.check_queue(h, false);
        }
    }

    /// `<r/>` from the server: answer with our handled counter.
    pub(crate) fn handle_sm_req(&mut self) -> Result<(), ConnectionError> {
        if !self.core.sm.context.active() {
            return Ok(());
        }
        let ack = Element::builder("a", ns::SM)
            .attr("h", self.core.sm.handled.to_string())
            .build();
        self.core.send_element(&ack, false)
    }
}

fn build_mechanism(
    core: &super::Core,
    kind: MechanismKind,
    offered: &[String],
) -> Result<Box<dyn Mechanism>, MechanismError> {
    let config = &core.config;
    let authzid = config.authzid.as_ref().map(|j| j.to_bare().to_string());
    let authcid = || -> Result<String, MechanismError> {
        match config.authcid.clone() {
            Some(a) if !a.is_empty() => Ok(a),
            _ => config
                .jid
                .node()
                .map(|n| n.to_string())
                .ok_or(MechanismError::NoUsername),
        }
    };

    Ok(match kind {
        MechanismKind::External => Box::new(External::new(authzid.as_deref())),
        MechanismKind::Anonymous => Box::new(Anonymous::new()),
        MechanismKind::Plain => Box::new(Plain::new(
            authzid.as_deref(),
            &authcid()?,
            &config.password,
        )?),
        MechanismKind::DigestMd5 => Box::new(DigestMd5::new(
            &authcid()?,
            &config.password,
            config.jid.domain().as_str(),
            authzid.as_deref(),
        )),
        MechanismKind::ScramSha1 => {
            let cb = if offered.iter().any(|m| m == "SCRAM-SHA-1-PLUS") {
                ChannelBinding::Unused
            } else {
                ChannelBinding::Unsupported
            };
            Box::new(Scram::new(&authcid()?, &config.password, authzid.as_deref(), cb)?)
        }
        MechanismKind::ScramSha1Plus => {
            let cb = match core.tls.as_ref() {
                Some(tls) => match (tls.channel_binding_type(), tls.channel_binding()) {
                    (Some(kind), Some(data)) => ChannelBinding::TlsBinding {
                        kind: kind.to_string(),
                        data,
                    },
                    _ => return Err(MechanismError::MalformedChallenge),
                },
                None => return Err(MechanismError::MalformedChallenge),
            };
            Box::new(Scram::new(&authcid()?, &config.password, authzid.as_deref(), cb)?)
        }
    })
}

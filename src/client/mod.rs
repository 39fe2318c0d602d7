// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The stream engine: connection lifecycle, layer pipeline and the
//! public sending API.
//!
//! A [`Client`] owns its collaborators (transport, TLS, compression), the
//! framing reader, the negotiation state and the stream-management queue.
//! One thread drives [`Client::recv`]; handlers run inline on that thread
//! and reach the send path through the [`Context`] they are given.

mod dispatch;
mod negotiation;

use std::sync::Arc;
use std::time::Duration;

use jid::Jid;
use minidom::Element;

use crate::error::ConnectionError;
use crate::extension::{types, ExtensionFactory, ExtensionType, StanzaExtension};
use crate::extensions::Ping;
use crate::handlers::{Handlers, IqHandler, StreamStatistics};
use crate::idgen::{IdGenerator, IqTracker};
use crate::ns;
use crate::sasl::{Mechanism, MechanismKind};
use crate::sm::SmState;
use crate::stanza::{IqType, Stanza, StanzaKind};
use crate::stream_error::StreamError;
use crate::transport::{Compressor, Received, TlsChannel, Transport, TransportState};
use crate::xmlstream::XmlReader;

/// Whether and how eagerly to upgrade the stream to TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Never negotiate TLS.
    Disabled,
    /// Use TLS when the server offers it (the default).
    Optional,
    /// Fail the connection unless TLS can be negotiated.
    Required,
}

/// Static configuration of a [`Client`].
#[derive(Clone)]
pub struct Config {
    /// The account JID. Its node is the default authentication identity,
    /// its domain the stream target.
    pub jid: Jid,
    /// The account password.
    pub password: String,
    /// Authorization identity, when acting on behalf of another account.
    pub authzid: Option<Jid>,
    /// Authentication identity override; defaults to the JID node.
    pub authcid: Option<String>,
    /// Resource to request at bind time; the server picks one if absent.
    pub resource: Option<String>,
    /// TLS negotiation policy.
    pub tls: TlsPolicy,
    /// Whether to negotiate stream compression when available.
    pub compression: bool,
    /// The SASL mechanisms the client may use.
    pub sasl_mechanisms: Vec<MechanismKind>,
    /// Whether to request stream management after binding.
    pub stream_management: bool,
    /// Whether to ask for (and attempt) stream resumption.
    pub sm_resume: bool,
    /// Stream language, advertised as `xml:lang`.
    pub lang: String,
}

impl Config {
    /// Configuration with defaults: optional TLS, no compression, all
    /// portable SASL mechanisms, stream management with resumption.
    pub fn new(jid: Jid, password: impl Into<String>) -> Config {
        Config {
            jid,
            password: password.into(),
            authzid: None,
            authcid: None,
            resource: None,
            tls: TlsPolicy::Optional,
            compression: false,
            sasl_mechanisms: MechanismKind::all().to_vec(),
            stream_management: true,
            sm_resume: true,
            lang: "en".to_string(),
        }
    }
}

/// Lifecycle of the XML stream, from socket to bound resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// No transport connection.
    Disconnected,
    /// The transport is connecting.
    Connecting,
    /// The transport is up, the stream header not yet sent.
    Connected,
    /// The stream is open and negotiating.
    StreamOpen,
    /// SASL concluded successfully.
    Authenticated,
    /// A resource is bound; the session is ready.
    Bound,
}

/// Send-path state of the engine, shared between the public API and the
/// dispatcher via [`Context`].
pub(crate) struct Core {
    pub(crate) config: Config,
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub(crate) tls: Option<Box<dyn TlsChannel>>,
    pub(crate) compressor: Option<Box<dyn Compressor>>,
    pub(crate) tls_active: bool,
    pub(crate) compression_active: bool,
    pub(crate) reader: XmlReader,
    pub(crate) state: ConnectionState,
    pub(crate) stream_id: Option<String>,
    pub(crate) stream_error: Option<StreamError>,
    pub(crate) last_features: Option<Element>,
    pub(crate) sasl: Option<Box<dyn Mechanism>>,
    pub(crate) selected_mech: Option<MechanismKind>,
    pub(crate) bind_id: Option<String>,
    pub(crate) sm: SmState,
    pub(crate) ids: Arc<IdGenerator>,
    pub(crate) tracker: Arc<IqTracker>,
    pub(crate) factory: Arc<ExtensionFactory>,
    pub(crate) stats: StreamStatistics,
    pub(crate) bound: Option<Jid>,
    pub(crate) authed: bool,
    pub(crate) presence_extensions: Vec<Box<dyn StanzaExtension>>,
}

impl Core {
    fn new(config: Config) -> Core {
        Core {
            config,
            transport: None,
            tls: None,
            compressor: None,
            tls_active: false,
            compression_active: false,
            reader: XmlReader::new(ns::CLIENT),
            state: ConnectionState::Disconnected,
            stream_id: None,
            stream_error: None,
            last_features: None,
            sasl: None,
            selected_mech: None,
            bind_id: None,
            sm: SmState::new(),
            ids: Arc::new(IdGenerator::new()),
            tracker: Arc::new(IqTracker::new()),
            factory: Arc::new(ExtensionFactory::new()),
            stats: StreamStatistics::default(),
            bound: None,
            authed: false,
            presence_extensions: Vec::new(),
        }
    }

    /// Serialise and transmit raw XML through the active layers:
    /// compression first, then encryption, then the socket.
    pub(crate) fn send_raw(&mut self, xml: &str) -> Result<(), ConnectionError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ConnectionError::NotConnected)?;
        if transport.state() != TransportState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        log::debug!("SEND: {}", xml);
        let mut data = xml.as_bytes().to_vec();
        if self.compression_active {
            match self.compressor.as_mut() {
                Some(compressor) => data = compressor.compress(&data)?,
                None => return Err(ConnectionError::CompressionFailed),
            }
        }
        if self.tls_active {
            match self.tls.as_mut() {
                Some(tls) => data = tls.encrypt(&data)?,
                None => return Err(ConnectionError::TlsFailed),
            }
        }
        transport.send(&data)
    }

    /// Send a top-level element. With `queue`, the element is retained in
    /// the stream-management queue (when enabled) before transmission, so
    /// a transport failure cannot lose it.
    pub(crate) fn send_element(&mut self, tag: &Element, queue: bool) -> Result<(), ConnectionError> {
        if queue && self.sm.context.active() {
            self.sm.enqueue(tag);
        }
        let xml = String::from(tag);
        self.send_raw(&xml)?;
        self.stats.total_stanzas_sent = self.stats.total_stanzas_sent.wrapping_add(1);
        Ok(())
    }

    /// Send a stanza: inject `from` once bound, append the standing
    /// presence extensions, count it, queue it.
    pub(crate) fn send_stanza(&mut self, mut stanza: Stanza) -> Result<(), ConnectionError> {
        if self.authed {
            if let Some(bound) = self.bound.clone() {
                stanza.set_attr_if_absent("from", &bound.to_string());
            }
        }
        if matches!(stanza.kind(), StanzaKind::Presence(_)) {
            for ext in &self.presence_extensions {
                stanza.append_payload(ext.to_element());
            }
        }
        match stanza.kind() {
            StanzaKind::Iq(_) => self.stats.iq_stanzas_sent += 1,
            StanzaKind::Message(_) => self.stats.message_stanzas_sent += 1,
            StanzaKind::Presence(_) => self.stats.presence_stanzas_sent += 1,
            StanzaKind::Subscription(_) => self.stats.subscription_stanzas_sent += 1,
        }
        self.send_element(stanza.element(), true)
    }

    /// Open (or re-open) the stream towards the configured domain.
    pub(crate) fn send_header(&mut self) -> Result<(), ConnectionError> {
        let header = format!(
            "<?xml version='1.0'?><stream:stream to='{}' xmlns='{}' \
             xmlns:stream='{}' xml:lang='{}' version='1.0'>",
            self.config.jid.domain(),
            ns::CLIENT,
            ns::STREAM,
            self.config.lang,
        );
        self.send_raw(&header)
    }

    /// Track an IQ Get/Set and send it, assigning an id when absent.
    /// Returns the id under which the response will be correlated.
    pub(crate) fn send_iq(
        &mut self,
        mut iq: Stanza,
        handler: Arc<dyn IqHandler>,
        context: u32,
    ) -> Result<String, ConnectionError> {
        let id = match iq.id() {
            Some(id) => id.to_string(),
            None => {
                let id = self.ids.next_id();
                iq.set_attr_if_absent("id", &id);
                id
            }
        };
        if matches!(iq.kind(), StanzaKind::Iq(IqType::Get) | StanzaKind::Iq(IqType::Set)) {
            self.tracker.track(id.clone(), handler, context);
        }
        self.send_stanza(iq)?;
        Ok(id)
    }

    /// Current statistics, with byte counters refreshed from the
    /// transport.
    pub(crate) fn statistics(&mut self) -> StreamStatistics {
        if let Some(transport) = self.transport.as_ref() {
            let (rx, tx) = transport.statistics();
            self.stats.total_bytes_received = rx;
            self.stats.total_bytes_sent = tx;
        }
        self.stats
    }
}

/// Notify the statistics handler, if one is installed.
pub(crate) fn notify_statistics(core: &mut Core, handlers: &Handlers) {
    let handler = handlers.statistics.lock().unwrap().clone();
    if let Some(handler) = handler {
        let stats = core.statistics();
        handler.handle_statistics(&stats);
    }
}

/// Handle onto the engine passed to every callback: the send path and the
/// registries, without the receive loop.
pub struct Context<'a> {
    pub(crate) core: &'a mut Core,
    pub(crate) handlers: &'a Arc<Handlers>,
}

impl Context<'_> {
    /// Send a stanza.
    pub fn send(&mut self, stanza: Stanza) -> Result<(), ConnectionError> {
        let result = self.core.send_stanza(stanza);
        notify_statistics(self.core, self.handlers);
        result
    }

    /// Send an IQ Get/Set and register `handler` for its response.
    /// Returns the correlation id.
    pub fn send_iq(
        &mut self,
        iq: Stanza,
        handler: Arc<dyn IqHandler>,
        context: u32,
    ) -> Result<String, ConnectionError> {
        let result = self.core.send_iq(iq, handler, context);
        notify_statistics(self.core, self.handlers);
        result
    }

    /// Send a raw top-level element, bypassing stanza bookkeeping.
    pub fn send_element(&mut self, element: &Element) -> Result<(), ConnectionError> {
        self.core.send_element(element, false)
    }

    /// A fresh stream-unique id.
    pub fn new_id(&self) -> String {
        self.core.ids.next_id()
    }

    /// The bound JID, once a resource is bound.
    pub fn bound_jid(&self) -> Option<&Jid> {
        self.core.bound.as_ref()
    }

    /// The handler registries, for (de)registration from inside a
    /// callback.
    pub fn handlers(&self) -> &Arc<Handlers> {
        self.handlers
    }
}

/// Answers inbound XEP-0199 pings with an empty result.
struct PingResponder;

impl IqHandler for PingResponder {
    fn handle_iq(&self, ctx: &mut Context<'_>, iq: &Stanza) -> bool {
        if iq.kind() != StanzaKind::Iq(IqType::Get) || iq.find_extension(types::PING).is_none() {
            return false;
        }
        let mut reply = Stanza::iq(IqType::Result);
        if let Some(from) = iq.from() {
            reply = reply.with_to(&from);
        }
        if let Some(id) = iq.id() {
            reply = reply.with_id(id);
        }
        let _ = ctx.send(reply);
        true
    }
}

/// The XMPP client stream engine.
pub struct Client {
    core: Core,
    handlers: Arc<Handlers>,
}

impl Client {
    /// Create an engine for the given configuration. The transport (and
    /// optionally TLS and compression channels) must be installed before
    /// [`connect`][`Self::connect`].
    pub fn new(config: Config) -> Client {
        let client = Client {
            core: Core::new(config),
            handlers: Handlers::new(),
        };
        client.core.factory.register(Box::new(Ping::new()));
        client
            .core
            .factory
            .register(Box::new(crate::extensions::Delay::default()));
        client
            .core
            .factory
            .register(Box::new(crate::extensions::MucUser::new()));
        client
            .handlers
            .register_iq_handler(Arc::new(PingResponder), types::PING);
        client
            .handlers
            .disco_features
            .lock()
            .unwrap()
            .insert(ns::PING.to_string());
        client
    }

    /// Install the transport. Replaces any previous one.
    pub fn set_transport(&mut self, transport: Box<dyn Transport>) {
        self.core.transport = Some(transport);
    }

    /// Install the TLS channel. Without one, STARTTLS is not offered to
    /// the server even under [`TlsPolicy::Optional`].
    pub fn set_tls(&mut self, tls: Box<dyn TlsChannel>) {
        self.core.tls = Some(tls);
    }

    /// Install the compression channel.
    pub fn set_compressor(&mut self, compressor: Box<dyn Compressor>) {
        self.core.compressor = Some(compressor);
    }

    /// The handler registries. The returned handle can be cloned and used
    /// from any thread.
    pub fn handlers(&self) -> &Arc<Handlers> {
        &self.handlers
    }

    /// Register a stanza-extension prototype with the factory.
    pub fn register_stanza_extension(&self, ext: Box<dyn StanzaExtension>) {
        self.core.factory.register(ext);
    }

    /// Remove a stanza-extension prototype.
    pub fn remove_stanza_extension(&self, ext: ExtensionType) -> bool {
        self.core.factory.remove(ext)
    }

    /// Connect the transport and open the stream.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.core.transport.is_none() {
            return Err(ConnectionError::NotConnected);
        }
        if self.core.state != ConnectionState::Disconnected {
            return Ok(());
        }
        self.core.state = ConnectionState::Connecting;
        let result = self
            .core
            .transport
            .as_mut()
            .map(|t| t.connect())
            .unwrap_or(Err(ConnectionError::NotConnected));
        if let Err(e) = result {
            self.core.state = ConnectionState::Disconnected;
            return Err(e);
        }
        self.core.state = ConnectionState::Connected;
        log::debug!("transport up, opening stream to {}", self.core.config.jid.domain());

        let listeners = self.handlers.connection.lock().unwrap().clone();
        let mut ctx = Context {
            core: &mut self.core,
            handlers: &self.handlers,
        };
        for listener in listeners {
            listener.on_connect(&mut ctx);
        }

        self.core.send_header()?;
        self.core.state = ConnectionState::StreamOpen;
        Ok(())
    }

    /// Receive and dispatch inbound traffic, blocking up to `timeout`.
    ///
    /// `Ok(())` covers both "stanzas were handled" and "the timeout
    /// elapsed". Errors report why the session is over; the disconnect
    /// listeners have been notified by the time this returns.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<(), ConnectionError> {
        let received = {
            let transport = match self.core.transport.as_mut() {
                Some(t) => t,
                None => return Err(ConnectionError::NotConnected),
            };
            if transport.state() != TransportState::Connected {
                return Err(ConnectionError::NotConnected);
            }
            transport.recv(timeout)
        };
        match received {
            Ok(Received::Timeout) => Ok(()),
            // shutdown() is idempotent, so wrapping an error which already
            // tore the session down does not notify listeners twice.
            Ok(Received::Data(data)) => match self.ingest(&data) {
                Ok(()) => Ok(()),
                Err(e) => Err(self.shutdown(e)),
            },
            Ok(Received::Closed) => Err(self.shutdown(ConnectionError::StreamClosed)),
            Err(e) => Err(self.shutdown(e)),
        }
    }

    /// Feed received wire bytes through the inbound layer chain and
    /// dispatch every completed item.
    fn ingest(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        let mut data = data.to_vec();
        if self.core.tls_active {
            data = match self.core.tls.as_mut() {
                Some(tls) => match tls.decrypt(&data) {
                    Ok(plain) => plain,
                    Err(_) => return Err(self.shutdown(ConnectionError::TlsFailed)),
                },
                None => return Err(self.shutdown(ConnectionError::TlsFailed)),
            };
        }
        if self.core.compression_active {
            data = match self.core.compressor.as_mut() {
                Some(compressor) => match compressor.decompress(&data) {
                    Ok(plain) => plain,
                    Err(_) => return Err(self.shutdown(ConnectionError::CompressionFailed)),
                },
                None => return Err(self.shutdown(ConnectionError::CompressionFailed)),
            };
        }
        self.core.reader.feed(&data);
        loop {
            match self.core.reader.next() {
                Ok(Some(item)) => self.handle_item(item)?,
                Ok(None) => return Ok(()),
                Err(_) => {
                    let _ = self.core.send_raw(&format!(
                        "<stream:error><restricted-xml xmlns='{}'/></stream:error>",
                        ns::XMPP_STREAMS
                    ));
                    return Err(self.shutdown(ConnectionError::Parse));
                }
            }
        }
    }

    /// Close the stream and the transport on user request.
    pub fn disconnect(&mut self) {
        self.disconnect_internal(&ConnectionError::UserDisconnected);
    }

    /// Tear the session down for `reason` and hand the reason back.
    pub(crate) fn shutdown(&mut self, reason: ConnectionError) -> ConnectionError {
        self.disconnect_internal(&reason);
        reason
    }

    fn disconnect_internal(&mut self, reason: &ConnectionError) {
        if self.core.state == ConnectionState::Disconnected {
            return;
        }
        log::debug!("disconnecting: {}", reason);
        // A failed TLS layer cannot carry the closing tag any more.
        if !matches!(reason, ConnectionError::TlsFailed) {
            let _ = self.core.send_raw("</stream:stream>");
        }
        if let Some(transport) = self.core.transport.as_mut() {
            transport.disconnect();
            transport.cleanup();
        }
        if let Some(tls) = self.core.tls.as_mut() {
            tls.cleanup();
        }
        if let Some(compressor) = self.core.compressor.as_mut() {
            compressor.cleanup();
        }
        self.core.tls_active = false;
        self.core.compression_active = false;
        self.core.stats.encryption = false;
        self.core.reader.reset();
        self.core.sasl = None;
        self.core.selected_mech = None;
        self.core.authed = false;
        self.core.state = ConnectionState::Disconnected;
        self.core.stream_id = None;
        self.core.bind_id = None;
        self.core.last_features = None;

        // A resumable session keeps its SM identity, queue and bound JID
        // so the next connect can pick the session up again.
        let keep_session = !matches!(reason, ConnectionError::UserDisconnected)
            && self.core.config.sm_resume;
        self.core.sm.reset(keep_session);
        if !self.core.sm.resumable() {
            self.core.bound = None;
        }
        self.core.tracker.clear();

        let listeners = self.handlers.connection.lock().unwrap().clone();
        for listener in listeners {
            listener.on_disconnect(reason);
        }
    }

    /// Send a stanza.
    pub fn send(&mut self, stanza: Stanza) -> Result<(), ConnectionError> {
        let result = self.core.send_stanza(stanza);
        notify_statistics(&mut self.core, &self.handlers);
        result
    }

    /// Send an IQ Get/Set and register `handler` for its response, under
    /// `context`. Returns the correlation id.
    pub fn send_iq(
        &mut self,
        iq: Stanza,
        handler: Arc<dyn IqHandler>,
        context: u32,
    ) -> Result<String, ConnectionError> {
        let result = self.core.send_iq(iq, handler, context);
        notify_statistics(&mut self.core, &self.handlers);
        result
    }

    /// Send a single space as a whitespace keepalive. Never queued.
    pub fn whitespace_ping(&mut self) -> Result<(), ConnectionError> {
        self.core.send_raw(" ")
    }

    /// Send a XEP-0199 ping to `to` and track the reply with `handler`.
    pub fn xmpp_ping(
        &mut self,
        to: &Jid,
        handler: Arc<dyn IqHandler>,
        context: u32,
    ) -> Result<String, ConnectionError> {
        let iq = Stanza::iq(IqType::Get)
            .with_to(to)
            .with_extension(Box::new(Ping::new()));
        self.send_iq(iq, handler, context)
    }

    /// Ask the server to acknowledge the stream (XEP-0198 `<r/>`).
    pub fn request_ack(&mut self) -> Result<(), ConnectionError> {
        if !self.core.sm.context.active() {
            return Ok(());
        }
        self.core
            .send_element(&Element::bare("r", ns::SM), false)
    }

    /// Deep clones of the unacknowledged outgoing stanzas.
    pub fn send_queue(&self) -> Vec<Element> {
        self.core.sm.send_queue()
    }

    /// The engine's connection state.
    pub fn state(&self) -> ConnectionState {
        self.core.state
    }

    /// The stream id assigned by the server, if a stream is open.
    pub fn stream_id(&self) -> Option<&str> {
        self.core.stream_id.as_deref()
    }

    /// The last stream error received from the server.
    pub fn stream_error(&self) -> Option<&StreamError> {
        self.core.stream_error.as_ref()
    }

    /// The JID bound to this session, once bound.
    pub fn bound_jid(&self) -> Option<&Jid> {
        self.core.bound.as_ref()
    }

    /// A fresh stream-unique id.
    pub fn new_id(&self) -> String {
        self.core.ids.next_id()
    }

    /// The IQ response tracker.
    pub fn iq_tracker(&self) -> &Arc<IqTracker> {
        &self.core.tracker
    }

    /// Current transfer statistics.
    pub fn statistics(&mut self) -> StreamStatistics {
        self.core.statistics()
    }

    /// Attach an extension to every outgoing presence. An extension of
    /// the same type is replaced.
    pub fn add_presence_extension(&mut self, ext: Box<dyn StanzaExtension>) {
        self.remove_presence_extension(ext.extension_type());
        self.core.presence_extensions.push(ext);
    }

    /// Remove the standing presence extension of the given type.
    pub fn remove_presence_extension(&mut self, ext: ExtensionType) -> bool {
        let before = self.core.presence_extensions.len();
        self.core
            .presence_extensions
            .retain(|e| e.extension_type() != ext);
        self.core.presence_extensions.len() != before
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end engine tests against a scripted in-memory transport.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blocking_xmpp::jid::Jid;
use blocking_xmpp::minidom::Element;
use blocking_xmpp::stanza::{IqType, MessageType, StanzaKind};
use blocking_xmpp::stream_error;
use blocking_xmpp::{
    CertInfo, Client, Compressor, Config, ConnectionError, ConnectionListener, ConnectionState,
    Context, IqHandler, MessageHandler, MessageSession, MessageSessionHandler, PresenceHandler,
    Received, Stanza, StanzaExtension, SubscriptionHandler, TlsChannel, TlsPolicy, Transport,
    TransportState,
};

const TIMEOUT: Option<Duration> = Some(Duration::from_millis(10));

#[derive(Default)]
struct TransportInner {
    connected: bool,
    inbound: VecDeque<Vec<u8>>,
    outbound: Vec<u8>,
    rx_bytes: u64,
    tx_bytes: u64,
    close_next: bool,
}

/// In-memory transport; the test plays the server by pushing chunks and
/// inspecting what the client wrote.
#[derive(Clone, Default)]
struct MockTransport {
    inner: Arc<Mutex<TransportInner>>,
}

impl MockTransport {
    fn new() -> MockTransport {
        MockTransport::default()
    }

    fn push(&self, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.rx_bytes += data.len() as u64;
        inner.inbound.push_back(data.to_vec());
    }

    fn push_str(&self, data: &str) {
        self.push(data.as_bytes());
    }

    fn close_from_server(&self) {
        self.inner.lock().unwrap().close_next = true;
    }

    fn take_sent(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().unwrap().outbound)
    }

    fn take_sent_str(&self) -> String {
        String::from_utf8(self.take_sent()).unwrap()
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> Result<(), ConnectionError> {
        self.inner.lock().unwrap().connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.inner.lock().unwrap().connected = false;
    }

    fn send(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.tx_bytes += data.len() as u64;
        inner.outbound.extend_from_slice(data);
        Ok(())
    }

    fn recv(&mut self, _timeout: Option<Duration>) -> Result<Received, ConnectionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.close_next {
            inner.close_next = false;
            return Ok(Received::Closed);
        }
        Ok(match inner.inbound.pop_front() {
            Some(data) => Received::Data(data),
            None => Received::Timeout,
        })
    }

    fn state(&self) -> TransportState {
        if self.inner.lock().unwrap().connected {
            TransportState::Connected
        } else {
            TransportState::Disconnected
        }
    }

    fn statistics(&self) -> (u64, u64) {
        let inner = self.inner.lock().unwrap();
        (inner.rx_bytes, inner.tx_bytes)
    }
}

#[derive(Default)]
struct Events {
    log: Mutex<Vec<String>>,
}

impl Events {
    fn contains(&self, needle: &str) -> bool {
        self.log.lock().unwrap().iter().any(|e| e.contains(needle))
    }
}

impl ConnectionListener for Events {
    fn on_connect(&self, _ctx: &mut Context<'_>) {
        self.log.lock().unwrap().push("connect".to_string());
    }

    fn on_disconnect(&self, error: &ConnectionError) {
        self.log
            .lock()
            .unwrap()
            .push(format!("disconnect: {}", error));
    }

    fn on_resource_bound(&self, _ctx: &mut Context<'_>, jid: &Jid) {
        self.log.lock().unwrap().push(format!("bound: {}", jid));
    }
}

fn parse(xml: &str) -> Element {
    xml.parse()
        .unwrap_or_else(|e| panic!("unparseable client output {:?}: {}", xml, e))
}

fn new_client(mock: &MockTransport) -> Client {
    let jid: Jid = "juliet@capulet.example".parse().unwrap();
    let mut config = Config::new(jid, "secret");
    config.tls = TlsPolicy::Disabled;
    let mut client = Client::new(config);
    client.set_transport(Box::new(mock.clone()));
    client
}

const SERVER_HEADER: &str = "<?xml version='1.0'?><stream:stream xmlns='jabber:client' \
     xmlns:stream='http://etherx.jabber.org/streams' from='capulet.example' id='s1' \
     version='1.0'>";

fn open_stream(client: &mut Client, mock: &MockTransport) {
    client.connect().unwrap();
    let header = mock.take_sent_str();
    assert!(header.starts_with("<?xml version='1.0'?>"));
    assert!(header.contains("<stream:stream"));
    assert!(header.contains("version='1.0'"));
    mock.push_str(SERVER_HEADER);
    client.recv(TIMEOUT).unwrap();
    assert_eq!(client.stream_id(), Some("s1"));
}

fn authenticate_plain(client: &mut Client, mock: &MockTransport) {
    mock.push_str(
        "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
         <mechanism>PLAIN</mechanism></mechanisms></stream:features>",
    );
    client.recv(TIMEOUT).unwrap();
    let auth = parse(&mock.take_sent_str());
    assert_eq!(auth.name(), "auth");
    assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
    // base64 of "\0juliet\0secret"
    assert_eq!(auth.text(), "AGp1bGlldABzZWNyZXQ=");

    mock.push_str("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>");
    client.recv(TIMEOUT).unwrap();
    let reopened = mock.take_sent_str();
    assert!(reopened.contains("<stream:stream"));
    assert_eq!(client.state(), ConnectionState::Authenticated);
    mock.push_str(SERVER_HEADER);
    client.recv(TIMEOUT).unwrap();
}

/// Features after authentication; lets the client bind and enable stream
/// management.
fn bind_and_enable_sm(client: &mut Client, mock: &MockTransport) {
    mock.push_str(
        "<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
         <sm xmlns='urn:xmpp:sm:3'/></stream:features>",
    );
    client.recv(TIMEOUT).unwrap();
    let bind = parse(&mock.take_sent_str());
    assert_eq!(bind.name(), "iq");
    assert_eq!(bind.attr("type"), Some("set"));
    let id = bind.attr("id").unwrap().to_string();

    mock.push_str(&format!(
        "<iq type='result' id='{}'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
         <jid>juliet@capulet.example/balcony</jid></bind></iq>",
        id
    ));
    client.recv(TIMEOUT).unwrap();
    assert_eq!(client.state(), ConnectionState::Bound);
    let enable = parse(&mock.take_sent_str());
    assert_eq!(enable.name(), "enable");
    assert_eq!(enable.attr("resume"), Some("true"));

    mock.push_str("<enabled xmlns='urn:xmpp:sm:3' id='sm-token' resume='true'/>");
    client.recv(TIMEOUT).unwrap();
}

fn establish_session(client: &mut Client, mock: &MockTransport) {
    open_stream(client, mock);
    authenticate_plain(client, mock);
    bind_and_enable_sm(client, mock);
}

fn chat_to(body: &str) -> Stanza {
    let to: Jid = "romeo@montague.example".parse().unwrap();
    Stanza::message(MessageType::Chat).with_to(&to).with_body(body)
}

#[test]
fn plain_negotiation_to_bound_session() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    let events = Arc::new(Events::default());
    client
        .handlers()
        .register_connection_listener(events.clone());

    establish_session(&mut client, &mock);

    assert_eq!(
        client.bound_jid().map(|j| j.to_string()),
        Some("juliet@capulet.example/balcony".to_string())
    );
    assert!(events.contains("connect"));
    assert!(events.contains("bound: juliet@capulet.example/balcony"));

    let stats = client.statistics();
    assert!(stats.total_stanzas_received > 0);
    assert_eq!(stats.iq_stanzas_received, 1);
}

#[test]
fn outgoing_stanzas_are_queued_until_acked() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    establish_session(&mut client, &mock);
    mock.take_sent();

    for n in 1..=3 {
        client.send(chat_to(&format!("m{}", n))).unwrap();
    }
    let sent = mock.take_sent_str();
    assert!(sent.contains("m1") && sent.contains("m2") && sent.contains("m3"));
    assert_eq!(client.send_queue().len(), 3);

    mock.push_str("<a xmlns='urn:xmpp:sm:3' h='2'/>");
    client.recv(TIMEOUT).unwrap();
    let queue = client.send_queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].get_child("body", "jabber:client").unwrap().text(), "m3");

    mock.push_str("<a xmlns='urn:xmpp:sm:3' h='3'/>");
    client.recv(TIMEOUT).unwrap();
    assert!(client.send_queue().is_empty());
}

#[test]
fn server_ack_request_is_answered() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    establish_session(&mut client, &mock);
    mock.take_sent();

    // Two inbound stanzas, then the server asks for our counter.
    mock.push_str("<message from='romeo@montague.example/garden'><body>a</body></message>");
    mock.push_str("<presence from='romeo@montague.example/garden'/>");
    mock.push_str("<r xmlns='urn:xmpp:sm:3'/>");
    client.recv(TIMEOUT).unwrap();
    client.recv(TIMEOUT).unwrap();
    mock.take_sent();
    client.recv(TIMEOUT).unwrap();
    let ack = parse(&mock.take_sent_str());
    assert_eq!(ack.name(), "a");
    assert_eq!(ack.attr("h"), Some("2"));
}

#[test]
fn resume_retransmits_unacked_stanzas_in_order() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    establish_session(&mut client, &mock);
    mock.take_sent();

    for n in 1..=5 {
        client.send(chat_to(&format!("m{}", n))).unwrap();
    }
    mock.push_str("<a xmlns='urn:xmpp:sm:3' h='2'/>");
    client.recv(TIMEOUT).unwrap();
    assert_eq!(client.send_queue().len(), 3);

    // The connection dies; the resumable session state survives.
    mock.close_from_server();
    match client.recv(TIMEOUT) {
        Err(ConnectionError::StreamClosed) => (),
        other => panic!("expected StreamClosed, got {:?}", other.err()),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.send_queue().len(), 3);
    mock.take_sent();

    // Reconnect, authenticate, then resume instead of binding.
    open_stream(&mut client, &mock);
    authenticate_plain(&mut client, &mock);
    mock.push_str(
        "<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
         <sm xmlns='urn:xmpp:sm:3'/></stream:features>",
    );
    client.recv(TIMEOUT).unwrap();
    let resume = parse(&mock.take_sent_str());
    assert_eq!(resume.name(), "resume");
    assert_eq!(resume.attr("previd"), Some("sm-token"));
    assert_eq!(resume.attr("h"), Some("0"));

    mock.push_str("<resumed xmlns='urn:xmpp:sm:3' h='3' previd='sm-token'/>");
    client.recv(TIMEOUT).unwrap();
    assert_eq!(client.state(), ConnectionState::Bound);

    // Stanzas 4 and 5 went out again, in order, and stay queued until a
    // later ack covers them.
    let resent = mock.take_sent_str();
    let pos4 = resent.find("m4").expect("m4 resent");
    let pos5 = resent.find("m5").expect("m5 resent");
    assert!(pos4 < pos5);
    assert!(!resent.contains("m1") && !resent.contains("m3"));
    assert_eq!(client.send_queue().len(), 2);

    mock.push_str("<a xmlns='urn:xmpp:sm:3' h='5'/>");
    client.recv(TIMEOUT).unwrap();
    assert!(client.send_queue().is_empty());
}

#[derive(Default)]
struct TrackingIq {
    calls: Mutex<Vec<(u32, bool)>>,
}

impl IqHandler for TrackingIq {
    fn handle_iq_id(&self, _ctx: &mut Context<'_>, iq: &Stanza, context: u32) {
        let is_result = iq.kind() == StanzaKind::Iq(IqType::Result);
        self.calls.lock().unwrap().push((context, is_result));
    }
}

#[test]
fn iq_tracker_invokes_handler_exactly_once() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    establish_session(&mut client, &mock);
    mock.take_sent();

    let handler = Arc::new(TrackingIq::default());
    let to: Jid = "capulet.example".parse().unwrap();
    let id = client.xmpp_ping(&to, handler.clone(), 42).unwrap();
    let ping = parse(&mock.take_sent_str());
    assert!(ping.get_child("ping", "urn:xmpp:ping").is_some());
    assert_eq!(client.iq_tracker().pending(), 1);

    mock.push_str(&format!(
        "<iq type='result' id='{}' from='capulet.example'/>",
        id
    ));
    client.recv(TIMEOUT).unwrap();
    assert_eq!(handler.calls.lock().unwrap().as_slice(), &[(42, true)]);
    assert_eq!(client.iq_tracker().pending(), 0);

    // A duplicate response finds no tracker entry and is dropped.
    mock.push_str(&format!(
        "<iq type='result' id='{}' from='capulet.example'/>",
        id
    ));
    client.recv(TIMEOUT).unwrap();
    assert_eq!(handler.calls.lock().unwrap().len(), 1);
}

#[test]
fn pending_iq_entries_are_dropped_on_disconnect() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    establish_session(&mut client, &mock);

    let handler = Arc::new(TrackingIq::default());
    let to: Jid = "capulet.example".parse().unwrap();
    client.xmpp_ping(&to, handler.clone(), 1).unwrap();
    assert_eq!(client.iq_tracker().pending(), 1);

    client.disconnect();
    assert_eq!(client.iq_tracker().pending(), 0);
    assert!(handler.calls.lock().unwrap().is_empty());
}

#[test]
fn inbound_ping_is_answered_with_empty_result() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    establish_session(&mut client, &mock);
    mock.take_sent();

    mock.push_str(
        "<iq type='get' id='p1' from='romeo@montague.example/garden'>\
         <ping xmlns='urn:xmpp:ping'/></iq>",
    );
    client.recv(TIMEOUT).unwrap();
    let reply = parse(&mock.take_sent_str());
    assert_eq!(reply.name(), "iq");
    assert_eq!(reply.attr("type"), Some("result"));
    assert_eq!(reply.attr("id"), Some("p1"));
    assert_eq!(reply.attr("to"), Some("romeo@montague.example/garden"));
    assert_eq!(reply.attr("from"), Some("juliet@capulet.example/balcony"));
}

#[test]
fn iq_get_without_extensions_is_rejected() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    establish_session(&mut client, &mock);
    mock.take_sent();

    mock.push_str(
        "<iq type='get' id='q1' from='romeo@montague.example/garden'>\
         <query xmlns='urn:example:unknown'/></iq>",
    );
    client.recv(TIMEOUT).unwrap();
    let reply = parse(&mock.take_sent_str());
    assert_eq!(reply.attr("type"), Some("error"));
    assert_eq!(reply.attr("id"), Some("q1"));
    let error = reply.get_child("error", "jabber:client").unwrap();
    assert_eq!(error.attr("type"), Some("cancel"));
    assert!(error
        .get_child(
            "feature-not-implemented",
            "urn:ietf:params:xml:ns:xmpp-stanzas"
        )
        .is_some());
}

/// Extension with no registered IQ handler, to provoke
/// service-unavailable.
#[derive(Debug, Clone, Default)]
struct Probe;

impl StanzaExtension for Probe {
    fn extension_type(&self) -> u16 {
        blocking_xmpp::extension::types::USER
    }

    fn filter_string(&self) -> &'static str {
        "/iq/probe[@xmlns='urn:example:probe']"
    }

    fn parse(&self, _element: &Element) -> Option<Box<dyn StanzaExtension>> {
        Some(Box::new(Probe))
    }

    fn to_element(&self) -> Element {
        Element::bare("probe", "urn:example:probe")
    }

    fn boxed_clone(&self) -> Box<dyn StanzaExtension> {
        Box::new(Probe)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn unhandled_iq_extension_is_service_unavailable() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    client.register_stanza_extension(Box::new(Probe));
    establish_session(&mut client, &mock);
    mock.take_sent();

    mock.push_str(
        "<iq type='set' id='q2' from='romeo@montague.example/garden'>\
         <probe xmlns='urn:example:probe'/></iq>",
    );
    client.recv(TIMEOUT).unwrap();
    let reply = parse(&mock.take_sent_str());
    assert_eq!(reply.attr("type"), Some("error"));
    let error = reply.get_child("error", "jabber:client").unwrap();
    assert!(error
        .get_child("service-unavailable", "urn:ietf:params:xml:ns:xmpp-stanzas")
        .is_some());
}

#[test]
fn stream_error_surfaces_and_disconnects() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    let events = Arc::new(Events::default());
    client
        .handlers()
        .register_connection_listener(events.clone());
    establish_session(&mut client, &mock);

    mock.push_str(
        "<stream:error><conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/>\
         <text xmlns='urn:ietf:params:xml:ns:xmpp-streams' xml:lang='en'>dup</text>\
         </stream:error>",
    );
    match client.recv(TIMEOUT) {
        Err(ConnectionError::Stream(e)) => {
            assert_eq!(e.condition, stream_error::DefinedCondition::Conflict);
        }
        other => panic!("expected stream error, got {:?}", other.err()),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
    let stored = client.stream_error().unwrap();
    assert_eq!(stored.condition, stream_error::DefinedCondition::Conflict);
    assert_eq!(stored.text("en"), Some("dup"));
    assert!(events.contains("disconnect: stream error"));
}

#[test]
fn unsupported_stream_version_fails() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    client.connect().unwrap();
    mock.take_sent();
    mock.push_str(
        "<?xml version='1.0'?><stream:stream xmlns='jabber:client' \
         xmlns:stream='http://etherx.jabber.org/streams' id='s2' version='2.0'>",
    );
    match client.recv(TIMEOUT) {
        Err(ConnectionError::StreamVersion) => (),
        other => panic!("expected StreamVersion, got {:?}", other.err()),
    }
}

#[derive(Default)]
struct Recorder {
    stanzas: Mutex<Vec<String>>,
}

impl Recorder {
    fn count(&self) -> usize {
        self.stanzas.lock().unwrap().len()
    }
}

impl MessageHandler for Recorder {
    fn handle_message(&self, _ctx: &mut Context<'_>, message: &Stanza) {
        self.stanzas
            .lock()
            .unwrap()
            .push(message.body().unwrap_or_default());
    }
}

impl PresenceHandler for Recorder {
    fn handle_presence(&self, _ctx: &mut Context<'_>, presence: &Stanza) {
        self.stanzas
            .lock()
            .unwrap()
            .push(presence.from().map(|j| j.to_string()).unwrap_or_default());
    }
}

impl SubscriptionHandler for Recorder {
    fn handle_subscription(&self, _ctx: &mut Context<'_>, subscription: &Stanza) {
        self.stanzas
            .lock()
            .unwrap()
            .push(format!("{:?}", subscription.kind()));
    }
}

#[test]
fn subscription_presence_routes_to_subscription_handlers() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    let presences = Arc::new(Recorder::default());
    let subscriptions = Arc::new(Recorder::default());
    client
        .handlers()
        .register_presence_handler(presences.clone());
    client
        .handlers()
        .register_subscription_handler(subscriptions.clone());
    establish_session(&mut client, &mock);

    mock.push_str("<presence type='subscribe' from='romeo@montague.example'/>");
    client.recv(TIMEOUT).unwrap();
    assert_eq!(subscriptions.count(), 1);
    assert_eq!(presences.count(), 0);

    mock.push_str("<presence from='romeo@montague.example/garden'/>");
    client.recv(TIMEOUT).unwrap();
    assert_eq!(presences.count(), 1);
}

#[test]
fn jid_bound_presence_handlers_shadow_global_ones() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    let global = Arc::new(Recorder::default());
    let bound = Arc::new(Recorder::default());
    client.handlers().register_presence_handler(global.clone());
    let watched: Jid = "romeo@montague.example".parse().unwrap();
    client
        .handlers()
        .register_presence_handler_for(&watched, bound.clone());
    establish_session(&mut client, &mock);

    mock.push_str("<presence from='romeo@montague.example/garden'/>");
    client.recv(TIMEOUT).unwrap();
    assert_eq!(bound.count(), 1);
    assert_eq!(global.count(), 0);

    mock.push_str("<presence from='mercutio@montague.example/street'/>");
    client.recv(TIMEOUT).unwrap();
    assert_eq!(bound.count(), 1);
    assert_eq!(global.count(), 1);
}

struct SessionFactory {
    recorder: Arc<Recorder>,
    created: Mutex<Vec<Arc<MessageSession>>>,
}

impl MessageSessionHandler for SessionFactory {
    fn handle_session(&self, _ctx: &mut Context<'_>, session: &Arc<MessageSession>) {
        session.set_handler(self.recorder.clone());
        self.created.lock().unwrap().push(session.clone());
    }
}

#[test]
fn message_sessions_are_created_and_matched() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    let recorder = Arc::new(Recorder::default());
    let factory = Arc::new(SessionFactory {
        recorder: recorder.clone(),
        created: Mutex::new(Vec::new()),
    });
    client
        .handlers()
        .register_message_session_handler(factory.clone(), MessageType::Chat.bit());
    establish_session(&mut client, &mock);

    mock.push_str(
        "<message type='chat' from='romeo@montague.example/garden'>\
         <thread>t1</thread><body>hello</body></message>",
    );
    client.recv(TIMEOUT).unwrap();
    assert_eq!(factory.created.lock().unwrap().len(), 1);
    assert_eq!(recorder.count(), 1);
    {
        let created = factory.created.lock().unwrap();
        assert_eq!(
            created[0].target().to_string(),
            "romeo@montague.example/garden"
        );
        // The session adopted the thread of the first message.
        assert_eq!(created[0].thread(), Some("t1".to_string()));
    }

    // Same full JID: routed to the existing session, no new one created.
    mock.push_str(
        "<message type='chat' from='romeo@montague.example/garden'>\
         <thread>t1</thread><body>again</body></message>",
    );
    client.recv(TIMEOUT).unwrap();
    assert_eq!(factory.created.lock().unwrap().len(), 1);
    assert_eq!(recorder.count(), 2);

    // Different resource: the bare-JID pass still matches the session.
    mock.push_str(
        "<message type='chat' from='romeo@montague.example/tavern'>\
         <body>moved</body></message>",
    );
    client.recv(TIMEOUT).unwrap();
    assert_eq!(factory.created.lock().unwrap().len(), 1);
    assert_eq!(recorder.count(), 3);
}

#[test]
fn whitespace_ping_is_not_queued() {
    let mock = MockTransport::new();
    let mut client = new_client(&mock);
    establish_session(&mut client, &mock);
    mock.take_sent();

    client.whitespace_ping().unwrap();
    assert_eq!(mock.take_sent_str(), " ");
    assert!(client.send_queue().is_empty());
}

const XOR_KEY: u8 = 0x5a;

fn xor(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b ^ XOR_KEY).collect()
}

/// Byte-flipping stand-in for a TLS channel.
struct FakeTls;

impl TlsChannel for FakeTls {
    fn handshake(
        &mut self,
        _transport: &mut dyn Transport,
    ) -> Result<CertInfo, ConnectionError> {
        Ok(CertInfo {
            chain_valid: true,
            ..CertInfo::default()
        })
    }

    fn encrypt(&mut self, plain: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        Ok(xor(plain))
    }

    fn decrypt(&mut self, wire: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        Ok(xor(wire))
    }
}

/// Marker-prefix stand-in for a DEFLATE channel.
struct FakeCompressor;

impl Compressor for FakeCompressor {
    fn method(&self) -> &str {
        "zlib"
    }

    fn compress(&mut self, plain: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        let mut out = vec![b'Z'];
        out.extend_from_slice(plain);
        Ok(out)
    }

    fn decompress(&mut self, wire: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        match wire.split_first() {
            Some((b'Z', rest)) => Ok(rest.to_vec()),
            _ => Err(ConnectionError::CompressionFailed),
        }
    }
}

/// Drives TLS then compression activation and checks the layer ordering:
/// outbound compress-then-encrypt, inbound decrypt-then-decompress.
#[test]
fn tls_and_compression_layer_ordering() {
    let mock = MockTransport::new();
    let jid: Jid = "juliet@capulet.example".parse().unwrap();
    let mut config = Config::new(jid, "secret");
    config.compression = true;
    config.stream_management = false;
    let mut client = Client::new(config);
    client.set_transport(Box::new(mock.clone()));
    client.set_tls(Box::new(FakeTls));
    client.set_compressor(Box::new(FakeCompressor));

    client.connect().unwrap();
    mock.take_sent();
    mock.push_str(SERVER_HEADER);
    mock.push_str(
        "<stream:features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>\
         </stream:features>",
    );
    client.recv(TIMEOUT).unwrap();
    client.recv(TIMEOUT).unwrap();
    let starttls = parse(&mock.take_sent_str());
    assert_eq!(starttls.name(), "starttls");

    mock.push_str("<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>");
    client.recv(TIMEOUT).unwrap();
    // The re-opened stream header is encrypted now.
    let header = String::from_utf8(xor(&mock.take_sent())).unwrap();
    assert!(header.contains("<stream:stream"));
    assert!(client.statistics().encryption);

    mock.push(&xor(SERVER_HEADER.as_bytes()));
    mock.push(&xor(
        b"<stream:features><compression xmlns='http://jabber.org/features/compress'>\
          <method>zlib</method></compression></stream:features>",
    ));
    client.recv(TIMEOUT).unwrap();
    client.recv(TIMEOUT).unwrap();
    let compress = parse(&String::from_utf8(xor(&mock.take_sent())).unwrap());
    assert_eq!(compress.name(), "compress");
    assert_eq!(
        compress
            .get_child("method", "http://jabber.org/protocol/compress")
            .unwrap()
            .text(),
        "zlib"
    );

    mock.push(&xor(
        b"<compressed xmlns='http://jabber.org/protocol/compress'/>",
    ));
    client.recv(TIMEOUT).unwrap();
    // Outbound is now compress-then-encrypt.
    let wire = mock.take_sent();
    let decrypted = xor(&wire);
    assert_eq!(decrypted[0], b'Z');
    let header = String::from_utf8(decrypted[1..].to_vec()).unwrap();
    assert!(header.contains("<stream:stream"));

    // Inbound is decrypt-then-decompress.
    let mut compressed_header = vec![b'Z'];
    compressed_header.extend_from_slice(SERVER_HEADER.as_bytes());
    compressed_header.extend_from_slice(
        b"<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
          <mechanism>PLAIN</mechanism></mechanisms></stream:features>",
    );
    mock.push(&xor(&compressed_header));
    client.recv(TIMEOUT).unwrap();
    let auth = parse(&String::from_utf8(xor(&mock.take_sent())[1..].to_vec()).unwrap());
    assert_eq!(auth.name(), "auth");
    assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
}

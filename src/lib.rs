// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synchronous [XMPP](https://xmpp.org/) client stream engine.
//!
//! This crate implements the core of an RFC 6120/6121 client runtime: the
//! connection lifecycle from plaintext handshake through STARTTLS,
//! optional stream compression and SASL authentication to a bound
//! session, demultiplexing of inbound stanzas to registered handlers, and
//! the XEP-0198 acknowledged-delivery queue with stream resumption.
//!
//! I/O, TLS and DEFLATE are pluggable: the engine orders bytes through
//! the [`Transport`], [`TlsChannel`] and [`Compressor`] contracts in
//! [`transport`] and performs neither networking nor cryptographic
//! session handling itself. One thread drives [`Client::recv`]; handlers
//! run inline and talk back through the [`Context`] they receive.
//!
//! # Getting started
//!
//! Build a [`Config`] from a JID and password, install a transport,
//! register handlers, then loop over [`Client::recv`]:
//!
//! ```no_run
//! use blocking_xmpp::{Client, Config};
//!
//! let jid = "juliet@capulet.example".parse().unwrap();
//! let mut client = Client::new(Config::new(jid, "secret"));
//! // client.set_transport(Box::new(my_tcp_transport));
//! client.connect().unwrap();
//! while client.recv(None).is_ok() {}
//! ```

#![deny(unsafe_code, bare_trait_objects)]
#![warn(missing_docs)]

pub use jid;
pub use minidom;

pub mod client;
pub mod error;
pub mod extension;
pub mod extensions;
pub mod handlers;
mod idgen;
pub mod ns;
pub mod sasl;
mod sm;
pub mod stanza;
pub mod stream_error;
pub mod transport;
mod xmlstream;

pub use client::{Client, Config, ConnectionState, Context, TlsPolicy};
pub use error::{AuthError, ConnectionError};
pub use extension::{ExtensionType, StanzaExtension};
pub use handlers::{
    ConnectionListener, Handlers, IqHandler, MessageHandler, MessageSession,
    MessageSessionHandler, MucInvitation, MucInvitationHandler, PresenceHandler,
    StatisticsHandler, StreamStatistics, SubscriptionHandler, TagHandler,
};
pub use idgen::{IdGenerator, IqTracker};
pub use sm::SmContext;
pub use stanza::{
    IqType, MessageType, PresenceType, Stanza, StanzaError, StanzaKind, SubscriptionType,
};
pub use stream_error::StreamError;
pub use transport::{CertInfo, Compressor, Received, TlsChannel, Transport, TransportState};

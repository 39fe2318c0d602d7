// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Contracts for the external collaborators of the engine: the byte
//! transport, the TLS channel and the compression channel.
//!
//! The engine never performs I/O or cryptography itself; it orders bytes
//! through whichever of these collaborators are installed and active.
//! Collaborators return their output instead of calling back into the
//! engine, which keeps the layering explicit and the implementations
//! trivially testable.

use std::time::Duration;

use crate::error::ConnectionError;

/// Connection state of a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportState {
    /// No connection attempt in progress.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The transport is ready to carry bytes.
    Connected,
}

/// Outcome of a [`Transport::recv`] call.
#[derive(Debug)]
pub enum Received {
    /// Bytes arrived.
    Data(Vec<u8>),
    /// The timeout elapsed without data; not an error.
    Timeout,
    /// The peer closed the connection.
    Closed,
}

/// A byte-duplex connection primitive (C1).
///
/// Implementations are expected to be blocking; [`recv`][`Self::recv`] is
/// the engine's only suspension point.
pub trait Transport: Send {
    /// Establish the connection.
    fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Close the connection.
    fn disconnect(&mut self);

    /// Queue bytes for transmission.
    fn send(&mut self, data: &[u8]) -> Result<(), ConnectionError>;

    /// Wait up to `timeout` (forever if `None`) for inbound bytes.
    fn recv(&mut self, timeout: Option<Duration>) -> Result<Received, ConnectionError>;

    /// The current connection state.
    fn state(&self) -> TransportState;

    /// Total bytes received and sent over the lifetime of this transport.
    fn statistics(&self) -> (u64, u64);

    /// Release per-connection resources after a disconnect.
    fn cleanup(&mut self) {}
}

/// Information about the peer certificate presented during the TLS
/// handshake, handed to
/// [`ConnectionListener::on_tls_connect`][`crate::ConnectionListener::on_tls_connect`]
/// for acceptance.
#[derive(Debug, Clone, Default)]
pub struct CertInfo {
    /// Whether the provider considers the chain valid for the server name.
    pub chain_valid: bool,
    /// The certificate issuer, if available.
    pub issuer: Option<String>,
    /// The subject the certificate was issued for, if available.
    pub subject: Option<String>,
    /// Negotiated protocol version, e.g. `TLSv1.3`.
    pub protocol: Option<String>,
    /// Negotiated cipher suite.
    pub cipher: Option<String>,
}

/// An encrypting byte channel (C2).
pub trait TlsChannel: Send {
    /// Run the TLS handshake over `transport`, blocking until it concludes.
    fn handshake(&mut self, transport: &mut dyn Transport) -> Result<CertInfo, ConnectionError>;

    /// Encrypt plaintext into wire bytes.
    fn encrypt(&mut self, plain: &[u8]) -> Result<Vec<u8>, ConnectionError>;

    /// Decrypt wire bytes into plaintext.
    fn decrypt(&mut self, wire: &[u8]) -> Result<Vec<u8>, ConnectionError>;

    /// The channel-binding type this channel can provide (e.g.
    /// `tls-exporter` or `tls-unique`), if any.
    fn channel_binding_type(&self) -> Option<&str> {
        None
    }

    /// The channel-binding bytes for the established session.
    fn channel_binding(&self) -> Option<Vec<u8>> {
        None
    }

    /// Release session state after a disconnect.
    fn cleanup(&mut self) {}
}

/// A compressing byte channel (C3), typically DEFLATE per XEP-0138.
pub trait Compressor: Send {
    /// The XEP-0138 method name, e.g. `zlib`.
    fn method(&self) -> &str;

    /// Compress outbound bytes.
    fn compress(&mut self, plain: &[u8]) -> Result<Vec<u8>, ConnectionError>;

    /// Decompress inbound bytes.
    fn decompress(&mut self, wire: &[u8]) -> Result<Vec<u8>, ConnectionError>;

    /// Release state after a disconnect.
    fn cleanup(&mut self) {}
}

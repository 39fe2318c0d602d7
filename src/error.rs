// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Detailed error types.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::sasl::{Condition as SaslCondition, MechanismError};
use crate::stream_error::StreamError;

/// Reasons for a connection to be unusable or to have been closed.
///
/// This is both the error type of the engine's fallible operations and the
/// disconnect reason reported to
/// [`ConnectionListener::on_disconnect`][`crate::ConnectionListener::on_disconnect`].
#[derive(Debug)]
pub enum ConnectionError {
    /// An operation required an established connection and there was none.
    NotConnected,

    /// The remote endpoint refused the connection.
    Refused,

    /// The server's hostname could not be resolved.
    Dns,

    /// An I/O error on the underlying transport.
    Io(io::Error),

    /// The remote closed the XML stream (`</stream:stream>`).
    StreamClosed,

    /// The server's advertised stream version is newer than what this
    /// engine implements.
    StreamVersion,

    /// The server closed the stream with a `<stream:error/>`.
    Stream(StreamError),

    /// The inbound byte stream was not well-formed XML.
    Parse,

    /// The TLS handshake failed, or the certificate was rejected by the
    /// connection listener.
    TlsFailed,

    /// Stream compression could not be negotiated or broke mid-stream.
    CompressionFailed,

    /// SASL authentication failed.
    Auth(AuthError),

    /// The local side requested the disconnect.
    UserDisconnected,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionError::NotConnected => write!(f, "not connected"),
            ConnectionError::Refused => write!(f, "connection refused"),
            ConnectionError::Dns => write!(f, "hostname resolution failed"),
            ConnectionError::Io(e) => write!(f, "I/O error: {}", e),
            ConnectionError::StreamClosed => write!(f, "stream closed by peer"),
            ConnectionError::StreamVersion => write!(f, "unsupported stream version"),
            ConnectionError::Stream(e) => write!(f, "stream error: {}", e),
            ConnectionError::Parse => write!(f, "XML parse error"),
            ConnectionError::TlsFailed => write!(f, "TLS negotiation failed"),
            ConnectionError::CompressionFailed => write!(f, "compression negotiation failed"),
            ConnectionError::Auth(e) => write!(f, "authentication error: {}", e),
            ConnectionError::UserDisconnected => write!(f, "disconnected on user request"),
        }
    }
}

impl StdError for ConnectionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConnectionError::Io(e) => Some(e),
            ConnectionError::Auth(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => ConnectionError::Refused,
            _ => ConnectionError::Io(e),
        }
    }
}

impl From<StreamError> for ConnectionError {
    fn from(e: StreamError) -> Self {
        ConnectionError::Stream(e)
    }
}

impl From<AuthError> for ConnectionError {
    fn from(e: AuthError) -> Self {
        ConnectionError::Auth(e)
    }
}

/// Authentication error.
#[derive(Debug)]
pub enum AuthError {
    /// The intersection of the server's mechanism list and the locally
    /// enabled mechanisms is empty.
    NoMechanism,

    /// The local mechanism implementation could not produce a response.
    Mechanism(MechanismError),

    /// `<failure/>` received from the server.
    Fail(SaslCondition),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::NoMechanism => write!(f, "no matching SASL mechanism available"),
            AuthError::Mechanism(e) => write!(f, "local SASL mechanism error: {}", e),
            AuthError::Fail(c) => write!(f, "failure from the server: {}", c),
        }
    }
}

impl StdError for AuthError {}

impl From<MechanismError> for AuthError {
    fn from(e: MechanismError) -> Self {
        AuthError::Mechanism(e)
    }
}

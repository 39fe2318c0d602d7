// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SASL authentication (RFC 4422).
//!
//! Mechanism implementations produce and consume raw (pre-base64) exchange
//! payloads; the engine wraps them into `<auth/>`, `<response/>` and
//! friends. Credentials are SASLprepped at construction time, so a
//! prohibited codepoint aborts authentication before any bytes are
//! produced, and the prepared copies are overwritten on drop.

mod anonymous;
mod digest_md5;
mod external;
mod plain;
mod scram;

use std::fmt;

use minidom::Element;

use crate::ns;

pub use anonymous::Anonymous;
pub use digest_md5::DigestMd5;
pub use external::External;
pub use plain::Plain;
pub use scram::{ChannelBinding, Scram};

/// The SASL mechanisms this engine can perform, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismKind {
    /// RFC 4422 EXTERNAL (authentication established out of band, e.g. by
    /// a TLS client certificate).
    External,
    /// RFC 5802 SCRAM-SHA-1-PLUS (with TLS channel binding).
    ScramSha1Plus,
    /// RFC 5802 SCRAM-SHA-1.
    ScramSha1,
    /// RFC 2831 DIGEST-MD5.
    DigestMd5,
    /// RFC 4616 PLAIN.
    Plain,
    /// RFC 4505 ANONYMOUS.
    Anonymous,
}

impl MechanismKind {
    /// The IANA-registered mechanism name.
    pub fn name(self) -> &'static str {
        match self {
            Self::External => "EXTERNAL",
            Self::ScramSha1Plus => "SCRAM-SHA-1-PLUS",
            Self::ScramSha1 => "SCRAM-SHA-1",
            Self::DigestMd5 => "DIGEST-MD5",
            Self::Plain => "PLAIN",
            Self::Anonymous => "ANONYMOUS",
        }
    }

    /// All mechanisms, in preference order (strongest first).
    pub fn all() -> &'static [MechanismKind] {
        &[
            Self::External,
            Self::ScramSha1Plus,
            Self::ScramSha1,
            Self::DigestMd5,
            Self::Plain,
            Self::Anonymous,
        ]
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick the strongest mechanism offered by the server, enabled locally and
/// usable in the current stream.
///
/// `channel_binding` states whether the TLS layer can provide channel
/// binding data; without it SCRAM-SHA-1-PLUS is not eligible.
pub(crate) fn select(
    offered: &[String],
    enabled: &[MechanismKind],
    channel_binding: bool,
) -> Option<MechanismKind> {
    MechanismKind::all()
        .iter()
        .filter(|m| enabled.contains(m))
        .filter(|m| channel_binding || **m != MechanismKind::ScramSha1Plus)
        .find(|m| offered.iter().any(|o| o == m.name()))
        .copied()
}

/// An in-flight SASL exchange. Exactly one exists at a time.
pub trait Mechanism: Send {
    /// The mechanism name for the `<auth/>` element.
    fn name(&self) -> &'static str;

    /// The initial response, possibly empty.
    fn initial(&mut self) -> Result<Vec<u8>, MechanismError>;

    /// React to a server challenge.
    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError>;

    /// Verify the additional data carried by `<success/>`.
    fn success(&mut self, _data: &[u8]) -> Result<(), MechanismError> {
        Ok(())
    }
}

/// Local mechanism failure; nothing was or will be sent for this exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MechanismError {
    /// A credential contains a codepoint prohibited by SASLprep.
    Saslprep,
    /// The account JID has no node part to authenticate as.
    NoUsername,
    /// The server challenge could not be parsed.
    MalformedChallenge,
    /// The server nonce does not extend the client nonce.
    NonceMismatch,
    /// The server signature did not match the expected value.
    ServerSignature,
    /// The OS randomness source failed.
    Random,
}

impl fmt::Display for MechanismError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Saslprep => write!(f, "credential contains prohibited codepoints"),
            Self::NoUsername => write!(f, "no username available for authentication"),
            Self::MalformedChallenge => write!(f, "malformed server challenge"),
            Self::NonceMismatch => write!(f, "server nonce does not extend client nonce"),
            Self::ServerSignature => write!(f, "server signature verification failed"),
            Self::Random => write!(f, "random generator unavailable"),
        }
    }
}

impl std::error::Error for MechanismError {}

/// `<failure/>` conditions (RFC 6120 §6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// The exchange was aborted by the client.
    Aborted,
    /// The response was not valid base64.
    IncorrectEncoding,
    /// The authzid was invalid.
    InvalidAuthzid,
    /// The mechanism was invalid or missing.
    InvalidMechanism,
    /// The request violated the mechanism syntax.
    MalformedRequest,
    /// The mechanism is weaker than the server allows.
    MechanismTooWeak,
    /// The credentials were wrong, or verification failed locally.
    NotAuthorized,
    /// Transient server-side failure; retrying may help.
    TemporaryAuthFailure,
}

impl Condition {
    /// Map a `<failure/>` element to a condition.
    ///
    /// Unknown children map to [`Condition::NotAuthorized`], the least
    /// specific refusal.
    pub(crate) fn from_failure(failure: &Element) -> Condition {
        for child in failure.children() {
            let cond = match child.name() {
                "aborted" => Self::Aborted,
                "incorrect-encoding" => Self::IncorrectEncoding,
                "invalid-authzid" => Self::InvalidAuthzid,
                "invalid-mechanism" => Self::InvalidMechanism,
                "malformed-request" => Self::MalformedRequest,
                "mechanism-too-weak" => Self::MechanismTooWeak,
                "not-authorized" => Self::NotAuthorized,
                "temporary-auth-failure" => Self::TemporaryAuthFailure,
                _ => continue,
            };
            return cond;
        }
        Self::NotAuthorized
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Aborted => "aborted",
            Self::IncorrectEncoding => "incorrect-encoding",
            Self::InvalidAuthzid => "invalid-authzid",
            Self::InvalidMechanism => "invalid-mechanism",
            Self::MalformedRequest => "malformed-request",
            Self::MechanismTooWeak => "mechanism-too-weak",
            Self::NotAuthorized => "not-authorized",
            Self::TemporaryAuthFailure => "temporary-auth-failure",
        };
        f.write_str(s)
    }
}

/// Run SASLprep over a credential, refusing prohibited input.
pub(crate) fn saslprep(input: &str) -> Result<String, MechanismError> {
    stringprep::saslprep(input)
        .map(|c| c.into_owned())
        .map_err(|_| MechanismError::Saslprep)
}

/// Lowercase hex encoding.
pub(crate) fn hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// 32 hex characters from the OS CSPRNG.
pub(crate) fn random_nonce() -> Result<String, MechanismError> {
    let mut buf = [0u8; 16];
    getrandom::getrandom(&mut buf).map_err(|_| MechanismError::Random)?;
    Ok(hex(&buf))
}

/// Overwrite a credential buffer before releasing it.
pub(crate) fn wipe(buf: &mut Vec<u8>) {
    for b in buf.iter_mut() {
        *b = 0;
    }
    buf.clear();
}

/// Build an `<auth/>` element. Empty initial data is encoded as `=` per
/// RFC 6120 §6.4.2.
pub(crate) fn auth_element(mechanism: &str, data: &[u8]) -> Element {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let text = if data.is_empty() {
        "=".to_string()
    } else {
        STANDARD.encode(data)
    };
    Element::builder("auth", ns::SASL)
        .attr("mechanism", mechanism)
        .append(text.as_str())
        .build()
}

/// Build a `<response/>` element.
pub(crate) fn response_element(data: &[u8]) -> Element {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let mut builder = Element::builder("response", ns::SASL);
    if !data.is_empty() {
        builder = builder.append(STANDARD.encode(data).as_str());
    }
    builder.build()
}

/// Decode the base64 payload of a `<challenge/>` or `<success/>`. The
/// single `=` spelling of "empty" is honoured.
pub(crate) fn decode_payload(element: &Element) -> Option<Vec<u8>> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let text = element.text();
    let text = text.trim();
    if text.is_empty() || text == "=" {
        return Some(Vec::new());
    }
    STANDARD.decode(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offered(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn selection_prefers_scram_over_plain() {
        let offered = offered(&["PLAIN", "SCRAM-SHA-1", "DIGEST-MD5"]);
        assert_eq!(
            select(&offered, MechanismKind::all(), false),
            Some(MechanismKind::ScramSha1)
        );
    }

    #[test]
    fn plus_requires_channel_binding() {
        let offered = offered(&["SCRAM-SHA-1-PLUS", "SCRAM-SHA-1"]);
        assert_eq!(
            select(&offered, MechanismKind::all(), false),
            Some(MechanismKind::ScramSha1)
        );
        assert_eq!(
            select(&offered, MechanismKind::all(), true),
            Some(MechanismKind::ScramSha1Plus)
        );
    }

    #[test]
    fn selection_respects_enabled_set() {
        let offered = offered(&["SCRAM-SHA-1", "PLAIN"]);
        assert_eq!(
            select(&offered, &[MechanismKind::Plain], false),
            Some(MechanismKind::Plain)
        );
        assert_eq!(select(&offered, &[MechanismKind::DigestMd5], false), None);
    }

    #[test]
    fn failure_condition_mapping() {
        let elem: Element =
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism-too-weak/></failure>"
                .parse()
                .unwrap();
        assert_eq!(Condition::from_failure(&elem), Condition::MechanismTooWeak);
    }

    #[test]
    fn empty_auth_data_is_encoded_as_equals() {
        let elem = auth_element("ANONYMOUS", b"");
        assert_eq!(elem.text(), "=");
        assert_eq!(decode_payload(&elem), Some(Vec::new()));
    }

    #[test]
    fn saslprep_is_identity_on_ascii() {
        for input in ["user", "Pencil1", "a.b-c_d"] {
            assert_eq!(saslprep(input).unwrap(), input);
        }
    }

    #[test]
    fn saslprep_rejects_prohibited_codepoints() {
        assert_eq!(saslprep("bad\u{0000}input"), Err(MechanismError::Saslprep));
    }
}

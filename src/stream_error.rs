// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream-level errors as defined in RFC 6120 §4.9.

use std::collections::BTreeMap;
use std::fmt;

use minidom::Element;

use crate::ns;

/// Enumeration of the stream error conditions of RFC 6120 §4.9.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinedCondition {
    /// The entity has sent XML that cannot be processed.
    BadFormat,
    /// Unsupported or missing namespace prefix.
    BadNamespacePrefix,
    /// The stream conflicts with another stream for the same entity.
    Conflict,
    /// The peer has not responded to traffic over the stream.
    ConnectionTimeout,
    /// The addressed FQDN is no longer serviced by this entity.
    HostGone,
    /// The addressed FQDN is not serviced by this entity.
    HostUnknown,
    /// A stanza between servers lacked or misused addressing attributes.
    ImproperAddressing,
    /// Internal misconfiguration or failure on the server.
    InternalServerError,
    /// The `from` attribute does not match an authorized JID.
    InvalidFrom,
    /// The stream `id` is invalid.
    InvalidId,
    /// The stream or content namespace is not supported.
    InvalidNamespace,
    /// The entity has sent invalid XML to a validating server.
    InvalidXml,
    /// Data was sent before the stream was authorized to carry it.
    NotAuthorized,
    /// A local service policy was violated.
    PolicyViolation,
    /// A remote entity needed for auth could not be reached.
    RemoteConnectionFailed,
    /// The server lacks resources to service the stream.
    ResourceConstraint,
    /// Restricted XML features (comments, PIs, DTDs, entity refs) were sent.
    RestrictedXml,
    /// Redirect to another host; the CDATA carries `host[:port]`.
    SeeOtherHost(String),
    /// The server is being shut down.
    SystemShutdown,
    /// None of the defined conditions applies.
    UndefinedCondition,
    /// The stream encoding is unsupported or broken.
    UnsupportedEncoding,
    /// A first-level stream child was not understood.
    UnsupportedStanzaType,
    /// The requested stream version is unsupported.
    UnsupportedVersion,
    /// The stream violated XML well-formedness rules.
    XmlNotWellFormed,
}

impl DefinedCondition {
    fn from_name(name: &str, text: &str) -> Option<DefinedCondition> {
        Some(match name {
            "bad-format" => Self::BadFormat,
            "bad-namespace-prefix" => Self::BadNamespacePrefix,
            "conflict" => Self::Conflict,
            "connection-timeout" => Self::ConnectionTimeout,
            "host-gone" => Self::HostGone,
            "host-unknown" => Self::HostUnknown,
            "improper-addressing" => Self::ImproperAddressing,
            "internal-server-error" => Self::InternalServerError,
            "invalid-from" => Self::InvalidFrom,
            "invalid-id" => Self::InvalidId,
            "invalid-namespace" => Self::InvalidNamespace,
            "invalid-xml" => Self::InvalidXml,
            "not-authorized" => Self::NotAuthorized,
            "policy-violation" => Self::PolicyViolation,
            "remote-connection-failed" => Self::RemoteConnectionFailed,
            "resource-constraint" => Self::ResourceConstraint,
            "restricted-xml" => Self::RestrictedXml,
            "see-other-host" => Self::SeeOtherHost(text.to_string()),
            "system-shutdown" => Self::SystemShutdown,
            "undefined-condition" => Self::UndefinedCondition,
            "unsupported-encoding" => Self::UnsupportedEncoding,
            "unsupported-stanza-type" => Self::UnsupportedStanzaType,
            "unsupported-version" => Self::UnsupportedVersion,
            "not-well-formed" => Self::XmlNotWellFormed,
            _ => return None,
        })
    }
}

impl fmt::Display for DefinedCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::BadFormat => "bad-format",
            Self::BadNamespacePrefix => "bad-namespace-prefix",
            Self::Conflict => "conflict",
            Self::ConnectionTimeout => "connection-timeout",
            Self::HostGone => "host-gone",
            Self::HostUnknown => "host-unknown",
            Self::ImproperAddressing => "improper-addressing",
            Self::InternalServerError => "internal-server-error",
            Self::InvalidFrom => "invalid-from",
            Self::InvalidId => "invalid-id",
            Self::InvalidNamespace => "invalid-namespace",
            Self::InvalidXml => "invalid-xml",
            Self::NotAuthorized => "not-authorized",
            Self::PolicyViolation => "policy-violation",
            Self::RemoteConnectionFailed => "remote-connection-failed",
            Self::ResourceConstraint => "resource-constraint",
            Self::RestrictedXml => "restricted-xml",
            Self::SeeOtherHost(ref host) => return write!(f, "see-other-host: {}", host),
            Self::SystemShutdown => "system-shutdown",
            Self::UndefinedCondition => "undefined-condition",
            Self::UnsupportedEncoding => "unsupported-encoding",
            Self::UnsupportedStanzaType => "unsupported-stanza-type",
            Self::UnsupportedVersion => "unsupported-version",
            Self::XmlNotWellFormed => "not-well-formed",
        };
        f.write_str(s)
    }
}

/// A received `<stream:error/>`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamError {
    /// The defined condition which triggered this stream error.
    pub condition: DefinedCondition,

    /// Human-readable `<text/>` children, keyed by `xml:lang`. Text without
    /// a language tag is stored under the empty string.
    pub texts: BTreeMap<String, String>,

    /// Optional application-specific condition element.
    pub application_specific: Option<Element>,
}

impl StreamError {
    /// Build a stream error from the children of a `<stream:error/>`
    /// element.
    ///
    /// Unknown children in the streams-error namespace fall back to
    /// [`DefinedCondition::UndefinedCondition`]; children in other
    /// namespaces are retained as the application-specific condition.
    pub fn from_element(error: &Element) -> StreamError {
        let mut condition = DefinedCondition::UndefinedCondition;
        let mut texts = BTreeMap::new();
        let mut application_specific = None;

        for child in error.children() {
            if child.ns() != ns::XMPP_STREAMS {
                application_specific = Some(child.clone());
                continue;
            }
            if child.name() == "text" {
                let lang = child.attr("xml:lang").unwrap_or("").to_string();
                texts.insert(lang, child.text());
            } else if let Some(cond) = DefinedCondition::from_name(child.name(), &child.text()) {
                condition = cond;
            }
        }

        StreamError {
            condition,
            texts,
            application_specific,
        }
    }

    /// Return the error text for the given language, falling back to the
    /// untagged text.
    pub fn text(&self, lang: &str) -> Option<&str> {
        self.texts
            .get(lang)
            .or_else(|| self.texts.get(""))
            .map(|s| s.as_str())
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.condition.fmt(f)?;
        if let Some((_, text)) = self.texts.iter().next() {
            write!(f, " ({:?})", text)?;
        }
        Ok(())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stanza-level errors as defined in RFC 6120 §8.3.

use std::fmt;

use minidom::Element;

use crate::ns;

/// The action the sender should take, from RFC 6120 §8.3.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Retry after providing credentials.
    Auth,
    /// Do not retry; the error cannot be remedied.
    Cancel,
    /// The condition is only a warning.
    Continue,
    /// Retry after changing the data sent.
    Modify,
    /// Retry after waiting.
    Wait,
}

impl ErrorType {
    fn attr(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Cancel => "cancel",
            Self::Continue => "continue",
            Self::Modify => "modify",
            Self::Wait => "wait",
        }
    }

    fn from_attr(s: &str) -> Option<ErrorType> {
        Some(match s {
            "auth" => Self::Auth,
            "cancel" => Self::Cancel,
            "continue" => Self::Continue,
            "modify" => Self::Modify,
            "wait" => Self::Wait,
            _ => return None,
        })
    }
}

/// The defined stanza error conditions of RFC 6120 §8.3.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinedCondition {
    /// Malformed or unprocessable request.
    BadRequest,
    /// A resource or session with the same identity already exists.
    Conflict,
    /// The requested feature is not implemented by the recipient.
    FeatureNotImplemented,
    /// The sender lacks the authorization to perform the action.
    Forbidden,
    /// The recipient is gone and left no forwarding address.
    Gone,
    /// The server misbehaved internally.
    InternalServerError,
    /// The addressed item was not found.
    ItemNotFound,
    /// The addressed JID cannot be parsed.
    JidMalformed,
    /// The request does not meet criteria defined by the recipient.
    NotAcceptable,
    /// The recipient does not allow any entity to perform the action.
    NotAllowed,
    /// The sender must authenticate first.
    NotAuthorized,
    /// A local policy was violated.
    PolicyViolation,
    /// The intended recipient is temporarily unavailable.
    RecipientUnavailable,
    /// The recipient is redirecting the request.
    Redirect,
    /// Prior registration is required.
    RegistrationRequired,
    /// The remote server does not exist.
    RemoteServerNotFound,
    /// The remote server could not be contacted in time.
    RemoteServerTimeout,
    /// The recipient lacks the resources to service the request.
    ResourceConstraint,
    /// The service is not provided (also used to hide existence).
    ServiceUnavailable,
    /// A prior subscription is required.
    SubscriptionRequired,
    /// No other condition applies.
    UndefinedCondition,
    /// The request was out of order.
    UnexpectedRequest,
}

impl DefinedCondition {
    fn element_name(self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::Conflict => "conflict",
            Self::FeatureNotImplemented => "feature-not-implemented",
            Self::Forbidden => "forbidden",
            Self::Gone => "gone",
            Self::InternalServerError => "internal-server-error",
            Self::ItemNotFound => "item-not-found",
            Self::JidMalformed => "jid-malformed",
            Self::NotAcceptable => "not-acceptable",
            Self::NotAllowed => "not-allowed",
            Self::NotAuthorized => "not-authorized",
            Self::PolicyViolation => "policy-violation",
            Self::RecipientUnavailable => "recipient-unavailable",
            Self::Redirect => "redirect",
            Self::RegistrationRequired => "registration-required",
            Self::RemoteServerNotFound => "remote-server-not-found",
            Self::RemoteServerTimeout => "remote-server-timeout",
            Self::ResourceConstraint => "resource-constraint",
            Self::ServiceUnavailable => "service-unavailable",
            Self::SubscriptionRequired => "subscription-required",
            Self::UndefinedCondition => "undefined-condition",
            Self::UnexpectedRequest => "unexpected-request",
        }
    }

    fn from_name(name: &str) -> Option<DefinedCondition> {
        Some(match name {
            "bad-request" => Self::BadRequest,
            "conflict" => Self::Conflict,
            "feature-not-implemented" => Self::FeatureNotImplemented,
            "forbidden" => Self::Forbidden,
            "gone" => Self::Gone,
            "internal-server-error" => Self::InternalServerError,
            "item-not-found" => Self::ItemNotFound,
            "jid-malformed" => Self::JidMalformed,
            "not-acceptable" => Self::NotAcceptable,
            "not-allowed" => Self::NotAllowed,
            "not-authorized" => Self::NotAuthorized,
            "policy-violation" => Self::PolicyViolation,
            "recipient-unavailable" => Self::RecipientUnavailable,
            "redirect" => Self::Redirect,
            "registration-required" => Self::RegistrationRequired,
            "remote-server-not-found" => Self::RemoteServerNotFound,
            "remote-server-timeout" => Self::RemoteServerTimeout,
            "resource-constraint" => Self::ResourceConstraint,
            "service-unavailable" => Self::ServiceUnavailable,
            "subscription-required" => Self::SubscriptionRequired,
            "undefined-condition" => Self::UndefinedCondition,
            "unexpected-request" => Self::UnexpectedRequest,
            _ => return None,
        })
    }
}

impl fmt::Display for DefinedCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

/// An `<error/>` child of a stanza.
#[derive(Debug, Clone, PartialEq)]
pub struct StanzaError {
    /// The error type attribute.
    pub error_type: ErrorType,

    /// The defined condition child.
    pub condition: DefinedCondition,

    /// Optional human-readable text.
    pub text: Option<String>,
}

impl StanzaError {
    /// Create an error with the given type and condition.
    pub fn new(error_type: ErrorType, condition: DefinedCondition) -> StanzaError {
        StanzaError {
            error_type,
            condition,
            text: None,
        }
    }

    /// Attach a human-readable description.
    pub fn with_text<S: Into<String>>(mut self, text: S) -> StanzaError {
        self.text = Some(text.into());
        self
    }

    /// Parse an `<error/>` child element.
    pub fn from_element(error: &Element) -> Option<StanzaError> {
        let error_type = ErrorType::from_attr(error.attr("type")?)?;
        let mut condition = None;
        let mut text = None;
        for child in error.children() {
            if child.ns() != ns::XMPP_STANZAS {
                continue;
            }
            if child.name() == "text" {
                text = Some(child.text());
            } else if condition.is_none() {
                condition = DefinedCondition::from_name(child.name());
            }
        }
        Some(StanzaError {
            error_type,
            condition: condition.unwrap_or(DefinedCondition::UndefinedCondition),
            text,
        })
    }

    /// Serialise into an `<error/>` element in the client namespace.
    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("error", ns::CLIENT)
            .attr("type", self.error_type.attr())
            .append(Element::bare(self.condition.element_name(), ns::XMPP_STANZAS));
        if let Some(ref text) = self.text {
            builder = builder.append(
                Element::builder("text", ns::XMPP_STANZAS)
                    .append(text.as_str())
                    .build(),
            );
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let err = StanzaError::new(ErrorType::Cancel, DefinedCondition::ServiceUnavailable)
            .with_text("try later");
        let elem = err.to_element();
        assert_eq!(StanzaError::from_element(&elem), Some(err));
    }

    #[test]
    fn parse_feature_not_implemented() {
        let elem: Element = "<error xmlns='jabber:client' type='cancel'><feature-not-implemented xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>"
            .parse()
            .unwrap();
        let err = StanzaError::from_element(&elem).unwrap();
        assert_eq!(err.error_type, ErrorType::Cancel);
        assert_eq!(err.condition, DefinedCondition::FeatureNotImplemented);
        assert_eq!(err.text, None);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let elem: Element = "<error xmlns='jabber:client' type='fatal'><forbidden xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>"
            .parse()
            .unwrap();
        assert_eq!(StanzaError::from_element(&elem), None);
    }
}

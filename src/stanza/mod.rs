// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The stanza data model.
//!
//! A [`Stanza`] owns the raw element tree it was parsed from (or built
//! into) plus a parsed header: the routable kind and subtype, and the list
//! of typed extensions the factory attached. Per-variant behaviour is
//! expressed by matching on [`StanzaKind`] rather than through inheritance.

pub mod error;

use std::any::Any;

use jid::Jid;
use minidom::Element;

use crate::extension::{ExtensionType, StanzaExtension};
use crate::ns;

pub use error::{DefinedCondition as StanzaErrorCondition, ErrorType, StanzaError};

/// IQ subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqType {
    /// Request for information.
    Get,
    /// Request to change state.
    Set,
    /// Successful response.
    Result,
    /// Error response.
    Error,
}

impl IqType {
    fn attr(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Result => "result",
            Self::Error => "error",
        }
    }
}

/// Message subtypes. The discriminant values form a bitmask so message
/// sessions can subscribe to several subtypes at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// One-to-one chat message.
    Chat,
    /// Message delivery error.
    Error,
    /// Message in a multi-user chat room.
    Groupchat,
    /// Automated broadcast without conversational context.
    Headline,
    /// Standalone message (the default).
    Normal,
}

impl MessageType {
    /// The bitmask value of this subtype.
    pub fn bit(self) -> u8 {
        match self {
            Self::Chat => 1,
            Self::Error => 2,
            Self::Groupchat => 4,
            Self::Headline => 8,
            Self::Normal => 16,
        }
    }

    fn attr(self) -> Option<&'static str> {
        match self {
            Self::Chat => Some("chat"),
            Self::Error => Some("error"),
            Self::Groupchat => Some("groupchat"),
            Self::Headline => Some("headline"),
            Self::Normal => None,
        }
    }
}

/// Presence subtypes (excluding the subscription ones, which form their own
/// stanza variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceType {
    /// The sender is available (no `type` attribute).
    Available,
    /// The sender is no longer available.
    Unavailable,
    /// Request for the current presence of the target.
    Probe,
    /// Presence delivery error.
    Error,
}

impl PresenceType {
    fn attr(self) -> Option<&'static str> {
        match self {
            Self::Available => None,
            Self::Unavailable => Some("unavailable"),
            Self::Probe => Some("probe"),
            Self::Error => Some("error"),
        }
    }
}

/// Presence subscription subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionType {
    /// Request to subscribe to the target's presence.
    Subscribe,
    /// Grant of a subscription request.
    Subscribed,
    /// Cancellation of a subscription.
    Unsubscribe,
    /// Revocation or denial of a subscription.
    Unsubscribed,
}

impl SubscriptionType {
    fn attr(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Subscribed => "subscribed",
            Self::Unsubscribe => "unsubscribe",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

/// The routable stanza kind with its subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaKind {
    /// `<iq/>`
    Iq(IqType),
    /// `<message/>`
    Message(MessageType),
    /// `<presence/>` (excluding subscription management)
    Presence(PresenceType),
    /// `<presence/>` with a subscription subtype
    Subscription(SubscriptionType),
}

/// A top-level routable XMPP element.
pub struct Stanza {
    element: Element,
    kind: StanzaKind,
    extensions: Vec<Box<dyn StanzaExtension>>,
    embedded: Option<Box<Stanza>>,
}

impl Clone for Stanza {
    fn clone(&self) -> Self {
        Stanza {
            element: self.element.clone(),
            kind: self.kind,
            extensions: self.extensions.clone(),
            embedded: self.embedded.clone(),
        }
    }
}

impl std::fmt::Debug for Stanza {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Stanza")
            .field("kind", &self.kind)
            .field("element", &String::from(&self.element))
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

fn parse_kind(element: &Element) -> Option<StanzaKind> {
    let type_attr = element.attr("type");
    match element.name() {
        "iq" => Some(StanzaKind::Iq(match type_attr? {
            "get" => IqType::Get,
            "set" => IqType::Set,
            "result" => IqType::Result,
            "error" => IqType::Error,
            _ => return None,
        })),
        "message" => Some(StanzaKind::Message(match type_attr {
            None | Some("normal") => MessageType::Normal,
            Some("chat") => MessageType::Chat,
            Some("error") => MessageType::Error,
            Some("groupchat") => MessageType::Groupchat,
            Some("headline") => MessageType::Headline,
            Some(_) => return None,
        })),
        "presence" => Some(match type_attr {
            None => StanzaKind::Presence(PresenceType::Available),
            Some("unavailable") => StanzaKind::Presence(PresenceType::Unavailable),
            Some("probe") => StanzaKind::Presence(PresenceType::Probe),
            Some("error") => StanzaKind::Presence(PresenceType::Error),
            Some("subscribe") => StanzaKind::Subscription(SubscriptionType::Subscribe),
            Some("subscribed") => StanzaKind::Subscription(SubscriptionType::Subscribed),
            Some("unsubscribe") => StanzaKind::Subscription(SubscriptionType::Unsubscribe),
            Some("unsubscribed") => StanzaKind::Subscription(SubscriptionType::Unsubscribed),
            Some(_) => return None,
        }),
        _ => None,
    }
}

fn find_embedded(element: &Element) -> Option<Box<Stanza>> {
    let forwarded = element
        .children()
        .find(|c| c.is("forwarded", ns::FORWARD))
        .or_else(|| {
            // Carbons wrap the <forwarded/> one level deeper.
            element
                .children()
                .filter(|c| c.name() == "received" || c.name() == "sent")
                .filter_map(|c| c.get_child("forwarded", ns::FORWARD))
                .next()
        })?;
    let inner = forwarded
        .children()
        .find(|c| matches!(c.name(), "message" | "presence" | "iq"))?;
    Stanza::parse(inner.clone()).ok().map(Box::new)
}

impl Stanza {
    /// Parse a top-level element into a stanza.
    ///
    /// The element is handed back unchanged if it is not a well-formed
    /// iq/message/presence.
    pub fn parse(element: Element) -> Result<Stanza, Element> {
        let kind = match parse_kind(&element) {
            Some(kind) => kind,
            None => return Err(element),
        };
        let embedded = find_embedded(&element);
        Ok(Stanza {
            element,
            kind,
            extensions: Vec::new(),
            embedded,
        })
    }

    fn build(kind: StanzaKind, name: &str, type_attr: Option<&str>) -> Stanza {
        let mut element = Element::bare(name, ns::CLIENT);
        if let Some(t) = type_attr {
            element.set_attr("type", t);
        }
        Stanza {
            element,
            kind,
            extensions: Vec::new(),
            embedded: None,
        }
    }

    /// Create an `<iq/>` stanza.
    pub fn iq(subtype: IqType) -> Stanza {
        Stanza::build(StanzaKind::Iq(subtype), "iq", Some(subtype.attr()))
    }

    /// Create a `<message/>` stanza.
    pub fn message(subtype: MessageType) -> Stanza {
        Stanza::build(StanzaKind::Message(subtype), "message", subtype.attr())
    }

    /// Create a `<presence/>` stanza.
    pub fn presence(subtype: PresenceType) -> Stanza {
        Stanza::build(StanzaKind::Presence(subtype), "presence", subtype.attr())
    }

    /// Create a subscription-management `<presence/>` stanza.
    pub fn subscription(subtype: SubscriptionType) -> Stanza {
        Stanza::build(
            StanzaKind::Subscription(subtype),
            "presence",
            Some(subtype.attr()),
        )
    }

    /// Set the `to` attribute.
    pub fn with_to(mut self, to: &Jid) -> Stanza {
        self.element.set_attr("to", to.to_string());
        self
    }

    /// Set the `id` attribute.
    pub fn with_id<S: Into<String>>(mut self, id: S) -> Stanza {
        self.element.set_attr("id", id.into());
        self
    }

    /// Append a `<body/>` (messages).
    pub fn with_body<S: AsRef<str>>(mut self, body: S) -> Stanza {
        self.element.append_child(
            Element::builder("body", ns::CLIENT)
                .append(body.as_ref())
                .build(),
        );
        self
    }

    /// Append a `<thread/>` (messages).
    pub fn with_thread<S: AsRef<str>>(mut self, thread: S) -> Stanza {
        self.element.append_child(
            Element::builder("thread", ns::CLIENT)
                .append(thread.as_ref())
                .build(),
        );
        self
    }

    /// Append a raw payload element.
    pub fn with_payload(mut self, payload: Element) -> Stanza {
        self.element.append_child(payload);
        self
    }

    /// Attach an extension, serialising it into the element tree.
    pub fn with_extension(mut self, ext: Box<dyn StanzaExtension>) -> Stanza {
        self.element.append_child(ext.to_element());
        self.extensions.push(ext);
        self
    }

    /// The kind and subtype of this stanza.
    pub fn kind(&self) -> StanzaKind {
        self.kind
    }

    /// The sender address, if present and well-formed.
    pub fn from(&self) -> Option<Jid> {
        self.element.attr("from").and_then(|s| s.parse().ok())
    }

    /// The recipient address, if present and well-formed.
    pub fn to(&self) -> Option<Jid> {
        self.element.attr("to").and_then(|s| s.parse().ok())
    }

    /// The stanza id, if any.
    pub fn id(&self) -> Option<&str> {
        self.element.attr("id")
    }

    /// The `xml:lang` of the stanza, if any.
    pub fn lang(&self) -> Option<&str> {
        self.element.attr("xml:lang")
    }

    /// The `<body/>` text (messages).
    pub fn body(&self) -> Option<String> {
        self.element.get_child("body", ns::CLIENT).map(|c| c.text())
    }

    /// The `<thread/>` text (messages).
    pub fn thread(&self) -> Option<String> {
        self.element
            .get_child("thread", ns::CLIENT)
            .map(|c| c.text())
    }

    /// The `<error/>` child, parsed (stanzas of type error).
    pub fn error(&self) -> Option<StanzaError> {
        self.element
            .get_child("error", ns::CLIENT)
            .and_then(StanzaError::from_element)
    }

    /// The raw element tree.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Consume the stanza, yielding the raw element tree.
    pub fn into_element(self) -> Element {
        self.element
    }

    /// The embedded (forwarded/carbons) stanza, if any.
    pub fn embedded(&self) -> Option<&Stanza> {
        self.embedded.as_deref()
    }

    pub(crate) fn embedded_mut(&mut self) -> Option<&mut Stanza> {
        self.embedded.as_deref_mut()
    }

    /// The typed extensions attached to this stanza.
    pub fn extensions(&self) -> &[Box<dyn StanzaExtension>] {
        &self.extensions
    }

    /// The first attached extension with the given type.
    pub fn find_extension(&self, ext: ExtensionType) -> Option<&dyn StanzaExtension> {
        self.extensions
            .iter()
            .find(|e| e.extension_type() == ext)
            .map(|e| &**e)
    }

    /// Typed access to the first attached extension with the given type.
    pub fn extension<T: Any>(&self, ext: ExtensionType) -> Option<&T> {
        self.find_extension(ext).and_then(|e| e.as_any().downcast_ref())
    }

    /// Attach an already-parsed extension without touching the element
    /// tree. Used by the extension factory on inbound stanzas.
    pub(crate) fn attach(&mut self, ext: Box<dyn StanzaExtension>) {
        self.extensions.push(ext);
    }

    pub(crate) fn append_payload(&mut self, payload: Element) {
        self.element.append_child(payload);
    }

    pub(crate) fn set_attr_if_absent(&mut self, name: &str, value: &str) {
        if self.element.attr(name).is_none() {
            self.element.set_attr(name, value);
        }
    }

    /// Build the error reply for this stanza: addressed back to the
    /// sender, same id, subtype error, carrying `error`.
    pub fn error_reply(&self, error: StanzaError) -> Stanza {
        let mut reply = match self.kind {
            StanzaKind::Iq(_) => Stanza::iq(IqType::Error),
            StanzaKind::Message(_) => Stanza::message(MessageType::Error),
            StanzaKind::Presence(_) | StanzaKind::Subscription(_) => {
                Stanza::presence(PresenceType::Error)
            }
        };
        if let Some(from) = self.from() {
            reply = reply.with_to(&from);
        }
        if let Some(id) = self.id() {
            reply = reply.with_id(id);
        }
        reply.with_payload(error.to_element())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_iq() {
        let elem: Element = "<iq xmlns='jabber:client' type='get' id='x1' from='a@b/r' to='b'/>"
            .parse()
            .unwrap();
        let stanza = Stanza::parse(elem).unwrap();
        assert_eq!(stanza.kind(), StanzaKind::Iq(IqType::Get));
        assert_eq!(stanza.id(), Some("x1"));
        assert_eq!(stanza.from().unwrap().to_string(), "a@b/r");
    }

    #[test]
    fn iq_without_type_is_rejected() {
        let elem: Element = "<iq xmlns='jabber:client' id='x1'/>".parse().unwrap();
        assert!(Stanza::parse(elem).is_err());
    }

    #[test]
    fn message_defaults_to_normal() {
        let elem: Element = "<message xmlns='jabber:client'><body>hi</body></message>"
            .parse()
            .unwrap();
        let stanza = Stanza::parse(elem).unwrap();
        assert_eq!(stanza.kind(), StanzaKind::Message(MessageType::Normal));
        assert_eq!(stanza.body().as_deref(), Some("hi"));
    }

    #[test]
    fn subscription_presence_is_its_own_kind() {
        let elem: Element = "<presence xmlns='jabber:client' type='subscribe' from='a@b'/>"
            .parse()
            .unwrap();
        let stanza = Stanza::parse(elem).unwrap();
        assert_eq!(
            stanza.kind(),
            StanzaKind::Subscription(SubscriptionType::Subscribe)
        );
    }

    #[test]
    fn serialisation_roundtrip() {
        let jid: Jid = "juliet@capulet.example".parse().unwrap();
        let stanza = Stanza::message(MessageType::Chat)
            .with_to(&jid)
            .with_id("m1")
            .with_body("wherefore art thou")
            .with_thread("t1");
        let xml = String::from(stanza.element());
        let reparsed: Element = xml.parse().unwrap();
        assert_eq!(&reparsed, stanza.element());
        let reparsed = Stanza::parse(reparsed).unwrap();
        assert_eq!(reparsed.kind(), StanzaKind::Message(MessageType::Chat));
        assert_eq!(reparsed.thread().as_deref(), Some("t1"));
    }

    #[test]
    fn error_reply_swaps_addressing() {
        let elem: Element =
            "<iq xmlns='jabber:client' type='get' id='q7' from='romeo@montague.example/home'/>"
                .parse()
                .unwrap();
        let stanza = Stanza::parse(elem).unwrap();
        let reply = stanza.error_reply(StanzaError::new(
            ErrorType::Cancel,
            StanzaErrorCondition::ServiceUnavailable,
        ));
        assert_eq!(reply.kind(), StanzaKind::Iq(IqType::Error));
        assert_eq!(reply.id(), Some("q7"));
        assert_eq!(
            reply.to().unwrap().to_string(),
            "romeo@montague.example/home"
        );
        assert_eq!(
            reply.error().unwrap().condition,
            StanzaErrorCondition::ServiceUnavailable
        );
    }

    #[test]
    fn embedded_stanza_is_found() {
        let elem: Element = "<message xmlns='jabber:client' from='romeo@montague.example'><forwarded xmlns='urn:xmpp:forward:0'><message xmlns='jabber:client' type='chat' from='juliet@capulet.example/balcony'><body>hello</body></message></forwarded></message>"
            .parse()
            .unwrap();
        let stanza = Stanza::parse(elem).unwrap();
        let embedded = stanza.embedded().unwrap();
        assert_eq!(embedded.kind(), StanzaKind::Message(MessageType::Chat));
        assert_eq!(embedded.body().as_deref(), Some("hello"));
    }
}

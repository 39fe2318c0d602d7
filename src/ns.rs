// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XML namespace constants used by the stream engine.

/// RFC 6120: `<stream:stream>` and its direct children.
pub const STREAM: &str = "http://etherx.jabber.org/streams";

/// RFC 6120: default namespace for client streams.
pub const CLIENT: &str = "jabber:client";

/// RFC 6120: STARTTLS negotiation.
pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";

/// RFC 6120: SASL negotiation.
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

/// RFC 6120: stream error conditions.
pub const XMPP_STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";

/// RFC 6120: stanza error conditions.
pub const XMPP_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// RFC 6120: resource binding.
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";

/// XEP-0138: compression feature announcement in `<stream:features/>`.
pub const COMPRESS_FEATURE: &str = "http://jabber.org/features/compress";

/// XEP-0138: compression negotiation elements.
pub const COMPRESS: &str = "http://jabber.org/protocol/compress";

/// XEP-0198: stream management.
pub const SM: &str = "urn:xmpp:sm:3";

/// XEP-0199: XMPP ping.
pub const PING: &str = "urn:xmpp:ping";

/// XEP-0203: delayed delivery.
pub const DELAY: &str = "urn:xmpp:delay";

/// XEP-0297: stanza forwarding (also used by carbons).
pub const FORWARD: &str = "urn:xmpp:forward:0";

/// XEP-0045: multi-user chat.
pub const MUC: &str = "http://jabber.org/protocol/muc";

/// XEP-0045: MUC user payloads (invitations among them).
pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::any::Any;

use jid::Jid;
use minidom::Element;

use crate::extension::{types, ExtensionType, StanzaExtension};
use crate::ns;

/// A mediated MUC invitation inside an `<x/>` payload.
#[derive(Debug, Clone)]
pub struct Invite {
    /// The inviting occupant or the invited entity, depending on
    /// direction.
    pub jid: Option<Jid>,
    /// Free-form invitation reason.
    pub reason: Option<String>,
}

/// XEP-0045 `<x xmlns='…muc#user'/>` payload, reduced to the parts the
/// engine routes on: invitations, the room password and the continued
/// thread.
#[derive(Debug, Clone, Default)]
pub struct MucUser {
    /// A mediated invitation, if present.
    pub invite: Option<Invite>,
    /// Password required to enter the room.
    pub password: Option<String>,
    /// Whether the invitation continues a one-to-one chat, and the thread
    /// being continued.
    pub continued: bool,
    /// The thread of the continued one-to-one chat.
    pub thread: Option<String>,
}

impl MucUser {
    /// Create an empty payload, usable as a parsing prototype.
    pub fn new() -> MucUser {
        MucUser::default()
    }

    /// Whether this payload is an invitation.
    pub fn is_invitation(&self) -> bool {
        self.invite.is_some()
    }
}

impl StanzaExtension for MucUser {
    fn extension_type(&self) -> ExtensionType {
        types::MUC_USER
    }

    fn filter_string(&self) -> &'static str {
        "/message/x[@xmlns='http://jabber.org/protocol/muc#user']|/presence/x[@xmlns='http://jabber.org/protocol/muc#user']"
    }

    fn parse(&self, element: &Element) -> Option<Box<dyn StanzaExtension>> {
        let mut user = MucUser::default();
        if let Some(invite) = element.get_child("invite", ns::MUC_USER) {
            user.invite = Some(Invite {
                jid: invite.attr("from").or(invite.attr("to")).and_then(|s| s.parse().ok()),
                reason: invite
                    .get_child("reason", ns::MUC_USER)
                    .map(|r| r.text()),
            });
            if let Some(continued) = invite.get_child("continue", ns::MUC_USER) {
                user.continued = true;
                user.thread = continued.attr("thread").map(String::from);
            }
        }
        user.password = element
            .get_child("password", ns::MUC_USER)
            .map(|p| p.text());
        Some(Box::new(user))
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("x", ns::MUC_USER);
        if let Some(ref invite) = self.invite {
            let mut inner = Element::builder("invite", ns::MUC_USER);
            if let Some(ref jid) = invite.jid {
                inner = inner.attr("to", jid.to_string());
            }
            if let Some(ref reason) = invite.reason {
                inner = inner.append(
                    Element::builder("reason", ns::MUC_USER)
                        .append(reason.as_str())
                        .build(),
                );
            }
            if self.continued {
                let mut cont = Element::builder("continue", ns::MUC_USER);
                if let Some(ref thread) = self.thread {
                    cont = cont.attr("thread", thread.as_str());
                }
                inner = inner.append(cont.build());
            }
            builder = builder.append(inner.build());
        }
        if let Some(ref password) = self.password {
            builder = builder.append(
                Element::builder("password", ns::MUC_USER)
                    .append(password.as_str())
                    .build(),
            );
        }
        builder.build()
    }

    fn boxed_clone(&self) -> Box<dyn StanzaExtension> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_invitation() {
        let elem: Element = "<x xmlns='http://jabber.org/protocol/muc#user'><invite from='crone1@shakespeare.lit/desktop'><reason>Hey Hecate</reason></invite><password>cauldronburn</password></x>"
            .parse()
            .unwrap();
        let user = MucUser::new().parse(&elem).unwrap();
        let user: &MucUser = user.as_any().downcast_ref().unwrap();
        assert!(user.is_invitation());
        let invite = user.invite.as_ref().unwrap();
        assert_eq!(
            invite.jid.as_ref().unwrap().to_string(),
            "crone1@shakespeare.lit/desktop"
        );
        assert_eq!(invite.reason.as_deref(), Some("Hey Hecate"));
        assert_eq!(user.password.as_deref(), Some("cauldronburn"));
        assert!(!user.continued);
    }

    #[test]
    fn plain_x_is_not_an_invitation() {
        let elem: Element = "<x xmlns='http://jabber.org/protocol/muc#user'/>"
            .parse()
            .unwrap();
        let user = MucUser::new().parse(&elem).unwrap();
        let user: &MucUser = user.as_any().downcast_ref().unwrap();
        assert!(!user.is_invitation());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::any::Any;

use minidom::Element;

use crate::extension::{types, ExtensionType, StanzaExtension};
use crate::ns;

/// XEP-0203 delayed delivery timestamp.
#[derive(Debug, Clone, Default)]
pub struct Delay {
    /// The entity which delayed the stanza, if stated.
    pub from: Option<String>,
    /// The moment the stanza was originally sent (XEP-0082 DateTime).
    pub stamp: String,
    /// Free-form reason for the delay.
    pub reason: Option<String>,
}

impl StanzaExtension for Delay {
    fn extension_type(&self) -> ExtensionType {
        types::DELAY
    }

    fn filter_string(&self) -> &'static str {
        "/message/delay[@xmlns='urn:xmpp:delay']|/presence/delay[@xmlns='urn:xmpp:delay']"
    }

    fn parse(&self, element: &Element) -> Option<Box<dyn StanzaExtension>> {
        let stamp = element.attr("stamp")?.to_string();
        Some(Box::new(Delay {
            from: element.attr("from").map(String::from),
            stamp,
            reason: match element.text() {
                t if t.is_empty() => None,
                t => Some(t),
            },
        }))
    }

    fn to_element(&self) -> Element {
        let mut builder = Element::builder("delay", ns::DELAY).attr("stamp", self.stamp.as_str());
        if let Some(ref from) = self.from {
            builder = builder.attr("from", from.as_str());
        }
        if let Some(ref reason) = self.reason {
            builder = builder.append(reason.as_str());
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

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::any::Any;

use minidom::Element;

use crate::extension::{types, ExtensionType, StanzaExtension};
use crate::ns;

/// XEP-0199 ping payload. A ping Get must be answered with an empty result
/// or an error; the engine answers it itself.
#[derive(Debug, Clone, Default)]
pub struct Ping;

impl Ping {
    /// Create a ping payload.
    pub fn new() -> Ping {
        Ping
    }
}

impl StanzaExtension for Ping {
    fn extension_type(&self) -> ExtensionType {
        types::PING
    }

    fn filter_string(&self) -> &'static str {
        "/iq/ping[@xmlns='urn:xmpp:ping']"
    }

    fn parse(&self, _element: &Element) -> Option<Box<dyn StanzaExtension>> {
        Some(Box::new(Ping))
    }

    fn to_element(&self) -> Element {
        Element::bare("ping", ns::PING)
    }

    fn boxed_clone(&self) -> Box<dyn StanzaExtension> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Typed stanza payloads and the factory which attaches them.
//!
//! A [`StanzaExtension`] is both a parsed payload instance and its own
//! prototype: the engine keeps one registered instance per extension type
//! and asks it to construct new instances from matching child subtrees.

use std::any::Any;
use std::sync::Mutex;

use minidom::Element;

use crate::stanza::Stanza;

/// Numeric key identifying an extension kind inside the engine.
pub type ExtensionType = u16;

/// Extension type codes for the extensions shipped with this crate.
pub mod types {
    /// XEP-0199 ping payload.
    pub const PING: super::ExtensionType = 1;
    /// XEP-0203 delayed delivery timestamp.
    pub const DELAY: super::ExtensionType = 2;
    /// XEP-0045 MUC user payload.
    pub const MUC_USER: super::ExtensionType = 3;
    /// First code free for embedder-defined extensions.
    pub const USER: super::ExtensionType = 1000;
}

/// A typed XML child payload carried by a stanza.
pub trait StanzaExtension: Send + Sync {
    /// The numeric key this extension kind is addressed by.
    fn extension_type(&self) -> ExtensionType;

    /// The path predicate selecting the subtrees this extension is built
    /// from, e.g. `/iq/ping[@xmlns='urn:xmpp:ping']`. Alternatives are
    /// separated by `|`.
    fn filter_string(&self) -> &'static str;

    /// Construct a new instance from a matching child subtree.
    fn parse(&self, element: &Element) -> Option<Box<dyn StanzaExtension>>;

    /// Serialise this instance back into an element.
    fn to_element(&self) -> Element;

    /// Clone into a new boxed instance.
    fn boxed_clone(&self) -> Box<dyn StanzaExtension>;

    /// Downcasting hook for typed access via [`Stanza::extension`].
    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn StanzaExtension> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// A parsed filter predicate.
///
/// Supported grammar: `/`-separated element names, each optionally followed
/// by `[@xmlns='…']`, with `|` between whole alternatives. The first
/// segment names the stanza itself.
#[derive(Debug, Clone)]
pub(crate) struct FilterPath {
    alternatives: Vec<Vec<Segment>>,
}

#[derive(Debug, Clone)]
struct Segment {
    name: String,
    xmlns: Option<String>,
}

fn parse_segment(raw: &str) -> Segment {
    match raw.find("[@xmlns='") {
        Some(pos) => {
            let name = raw[..pos].to_string();
            let rest = &raw[pos + 9..];
            let xmlns = rest.strip_suffix("']").unwrap_or(rest).to_string();
            Segment {
                name,
                xmlns: Some(xmlns),
            }
        }
        None => Segment {
            name: raw.to_string(),
            xmlns: None,
        },
    }
}

impl FilterPath {
    pub(crate) fn parse(filter: &str) -> FilterPath {
        let alternatives = filter
            .split('|')
            .map(|alt| {
                alt.trim_start_matches('/')
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(parse_segment)
                    .collect()
            })
            .collect();
        FilterPath { alternatives }
    }

    /// All subtrees of `stanza` selected by this filter.
    pub(crate) fn matches<'a>(&self, stanza: &'a Element) -> Vec<&'a Element> {
        let mut found = Vec::new();
        for alt in &self.alternatives {
            let Some((root, rest)) = alt.split_first() else {
                continue;
            };
            if root.name != stanza.name() {
                continue;
            }
            if rest.is_empty() {
                found.push(stanza);
                continue;
            }
            collect(stanza, rest, &mut found);
        }
        found
    }
}

fn collect<'a>(parent: &'a Element, path: &[Segment], found: &mut Vec<&'a Element>) {
    let (seg, rest) = match path.split_first() {
        Some(v) => v,
        None => return,
    };
    for child in parent.children() {
        if child.name() != seg.name {
            continue;
        }
        if let Some(ref xmlns) = seg.xmlns {
            if child.ns() != *xmlns {
                continue;
            }
        }
        if rest.is_empty() {
            found.push(child);
        } else {
            collect(child, rest, found);
        }
    }
}

struct Prototype {
    filter: FilterPath,
    proto: Box<dyn StanzaExtension>,
}

/// Registry of extension prototypes, attaching typed payloads to parsed
/// stanzas.
pub struct ExtensionFactory {
    prototypes: Mutex<Vec<Prototype>>,
}

impl ExtensionFactory {
    /// Create an empty factory.
    pub fn new() -> ExtensionFactory {
        ExtensionFactory {
            prototypes: Mutex::new(Vec::new()),
        }
    }

    /// Register a prototype. A prototype with the same extension type is
    /// replaced.
    pub fn register(&self, proto: Box<dyn StanzaExtension>) {
        let mut protos = self.prototypes.lock().unwrap();
        let filter = FilterPath::parse(proto.filter_string());
        match protos
            .iter_mut()
            .find(|p| p.proto.extension_type() == proto.extension_type())
        {
            Some(slot) => *slot = Prototype { filter, proto },
            None => protos.push(Prototype { filter, proto }),
        }
    }

    /// Remove the prototype for the given extension type. Returns whether
    /// one was registered.
    pub fn remove(&self, ext: ExtensionType) -> bool {
        let mut protos = self.prototypes.lock().unwrap();
        let before = protos.len();
        protos.retain(|p| p.proto.extension_type() != ext);
        protos.len() != before
    }

    /// Attach typed extensions to `stanza` and, once, to its embedded
    /// stanza (forwarded/carbons payloads).
    pub fn add_extensions(&self, stanza: &mut Stanza) {
        self.attach_to(stanza);
        if let Some(embedded) = stanza.embedded_mut() {
            self.attach_to(embedded);
        }
    }

    fn attach_to(&self, stanza: &mut Stanza) {
        let protos = self.prototypes.lock().unwrap();
        let mut parsed = Vec::new();
        for p in protos.iter() {
            for subtree in p.filter.matches(stanza.element()) {
                if let Some(ext) = p.proto.parse(subtree) {
                    parsed.push(ext);
                }
            }
        }
        drop(protos);
        for ext in parsed {
            stanza.attach(ext);
        }
    }
}

impl Default for ExtensionFactory {
    fn default() -> Self {
        Self::new()
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Incremental framing of an XMPP byte stream into whole stanza trees.
//!
//! Bytes are accumulated into a buffer; [`XmlReader::next`] extracts one
//! complete top-level element at a time by running a depth-tracking scan
//! over the buffer. A scan hitting the end of the buffer mid-element means
//! "need more data", any other scanner error is fatal to the stream.
//! Complete slices are parsed into [`minidom::Element`] trees with the
//! stream prefixes pre-declared, since an extracted stanza is not a
//! standalone XML document.

use bytes::{Buf, BytesMut};
use minidom::Element;
use quick_xml::errors::SyntaxError;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ConnectionError;
use crate::ns;

/// The attributes of the server's `<stream:stream>` header this engine
/// cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StreamHeader {
    pub id: Option<String>,
    pub from: Option<String>,
    pub version: Option<String>,
}

/// One framed unit of the inbound stream.
#[derive(Debug)]
pub(crate) enum StreamItem {
    /// The opening `<stream:stream …>` of a (re-)opened stream.
    Header(StreamHeader),
    /// A complete top-level element.
    Tag(Element),
    /// The closing `</stream:stream>`.
    Footer,
}

pub(crate) struct XmlReader {
    buf: BytesMut,
    default_ns: &'static str,
}

const STREAM_CLOSE: &[u8] = b"</stream:stream>";

impl XmlReader {
    pub(crate) fn new(default_ns: &'static str) -> XmlReader {
        XmlReader {
            buf: BytesMut::new(),
            default_ns,
        }
    }

    /// Drop all buffered state. Required when the byte layer changes
    /// underneath the stream (TLS upgrade, compression activation) and
    /// after SASL, when the stream is re-opened.
    pub(crate) fn reset(&mut self) {
        self.buf.clear();
    }

    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete item, or `None` if the buffer holds no
    /// complete item yet.
    pub(crate) fn next(&mut self) -> Result<Option<StreamItem>, ConnectionError> {
        loop {
            self.skip_whitespace();
            if self.buf.is_empty() {
                return Ok(None);
            }

            if self.buf.starts_with(b"<?") {
                // XML declaration; consume and go around.
                match find(&self.buf, b"?>") {
                    Some(end) => {
                        self.buf.advance(end + 2);
                        continue;
                    }
                    None => return Ok(None),
                }
            }

            if self.buf.starts_with(STREAM_CLOSE) {
                self.buf.advance(STREAM_CLOSE.len());
                return Ok(Some(StreamItem::Footer));
            }

            if self.buf.starts_with(b"<stream:stream") {
                let end = match find(&self.buf, b">") {
                    Some(end) => end,
                    None => return Ok(None),
                };
                let header = parse_stream_header(&self.buf[..end + 1])?;
                self.buf.advance(end + 1);
                return Ok(Some(StreamItem::Header(header)));
            }

            return match scan_element(&self.buf)? {
                Scan::Complete(len) => {
                    let element = self.parse_tree(len)?;
                    self.buf.advance(len);
                    Ok(Some(StreamItem::Tag(element)))
                }
                Scan::Footer(len) => {
                    self.buf.advance(len);
                    Ok(Some(StreamItem::Footer))
                }
                Scan::Incomplete => Ok(None),
            };
        }
    }

    fn skip_whitespace(&mut self) {
        let n = self
            .buf
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
            .count();
        self.buf.advance(n);
    }

    /// Parse the first `len` buffered bytes into an element tree, with the
    /// stream prefixes declared on a synthetic wrapper.
    fn parse_tree(&self, len: usize) -> Result<Element, ConnectionError> {
        let slice =
            std::str::from_utf8(&self.buf[..len]).map_err(|_| ConnectionError::Parse)?;
        let wrapped = format!(
            "<wrap xmlns='{}' xmlns:stream='{}'>{}</wrap>",
            self.default_ns,
            ns::STREAM,
            slice
        );
        let wrap: Element = wrapped.parse().map_err(|e| {
            log::warn!("discarding unparseable stanza: {}", e);
            ConnectionError::Parse
        })?;
        wrap.children()
            .next()
            .cloned()
            .ok_or(ConnectionError::Parse)
    }
}

enum Scan {
    /// A complete element occupies this many leading bytes.
    Complete(usize),
    /// The buffer starts with `</stream:stream>` in some spelling.
    Footer(usize),
    /// No complete element buffered yet.
    Incomplete,
}

/// Depth-tracking scan for one complete top-level element.
fn scan_element(buf: &[u8]) -> Result<Scan, ConnectionError> {
    let mut reader = Reader::from_reader(buf);
    reader.config_mut().check_end_names = false;

    let mut depth: u32 = 0;
    loop {
        match reader.read_event() {
            Ok(Event::Decl(_)) | Ok(Event::Text(_)) | Ok(Event::CData(_)) => (),
            Ok(Event::PI(_)) | Ok(Event::Comment(_)) | Ok(Event::DocType(_)) => {
                // Restricted XML at the stream level (RFC 6120 §11.1).
                return Err(ConnectionError::Parse);
            }
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    return Ok(Scan::Complete(reader.buffer_position() as usize));
                }
            }
            Ok(Event::End(e)) => {
                if depth == 0 {
                    // Unbalanced close at the top level: only the stream
                    // footer is legal here.
                    return if e.name().as_ref() == b"stream:stream" {
                        Ok(Scan::Footer(reader.buffer_position() as usize))
                    } else {
                        Err(ConnectionError::Parse)
                    };
                }
                depth -= 1;
                if depth == 0 {
                    return Ok(Scan::Complete(reader.buffer_position() as usize));
                }
            }
            Ok(Event::Eof) => return Ok(Scan::Incomplete),
            Err(quick_xml::Error::Syntax(SyntaxError::UnclosedTag)) => {
                return Ok(Scan::Incomplete);
            }
            Err(e) => {
                log::warn!("XML scan error: {}", e);
                return Err(ConnectionError::Parse);
            }
        }
    }
}

/// Pull `id`, `from` and `version` out of a raw `<stream:stream …>` header.
fn parse_stream_header(raw: &[u8]) -> Result<StreamHeader, ConnectionError> {
    let text = std::str::from_utf8(raw).map_err(|_| ConnectionError::Parse)?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().check_end_names = false;

    let event = reader.read_event();
    let attrs = match &event {
        Ok(Event::Start(e)) | Ok(Event::Empty(e)) => e.attributes(),
        _ => return Err(ConnectionError::Parse),
    };

    let mut header = StreamHeader::default();
    for attr in attrs.flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        match key.as_str() {
            "id" => header.id = Some(value),
            "from" => header.from = Some(value),
            "version" => header.version = Some(value),
            _ => (),
        }
    }
    Ok(header)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

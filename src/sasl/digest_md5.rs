// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use md5::{Digest, Md5};

use super::{hex, random_nonce, wipe, Mechanism, MechanismError};

/// RFC 2831 DIGEST-MD5.
///
/// The client sends no initial response; the server challenge carries the
/// realm and nonce, the response carries the digest, and the second server
/// message (`rspauth=…`) is answered with an empty response.
pub struct DigestMd5 {
    username: Vec<u8>,
    password: Vec<u8>,
    server: String,
    authzid: Option<String>,
    cnonce: Option<String>,
}

impl DigestMd5 {
    /// Prepare an exchange for `username@server`.
    pub fn new(username: &str, password: &str, server: &str, authzid: Option<&str>) -> DigestMd5 {
        DigestMd5 {
            username: username.as_bytes().to_vec(),
            password: password.as_bytes().to_vec(),
            server: server.to_string(),
            authzid: authzid.map(String::from),
            cnonce: None,
        }
    }

    /// Fix the client nonce instead of drawing a fresh one. Exchanges are
    /// only reproducible with a fixed nonce.
    pub fn with_cnonce<S: Into<String>>(mut self, cnonce: S) -> DigestMd5 {
        self.cnonce = Some(cnonce.into());
        self
    }

    fn compute(&self, realm: &str, nonce: &str, cnonce: &str) -> String {
        let mut md5 = Md5::new();
        md5.update(&self.username);
        md5.update(b":");
        md5.update(realm.as_bytes());
        md5.update(b":");
        md5.update(&self.password);
        let a1_bin = md5.finalize_reset();

        md5.update(a1_bin);
        md5.update(b":");
        md5.update(nonce.as_bytes());
        md5.update(b":");
        md5.update(cnonce.as_bytes());
        let a1 = hex(&md5.finalize_reset());

        md5.update(b"AUTHENTICATE:xmpp/");
        md5.update(self.server.as_bytes());
        let a2 = hex(&md5.finalize_reset());

        md5.update(a1.as_bytes());
        md5.update(b":");
        md5.update(nonce.as_bytes());
        md5.update(b":00000001:");
        md5.update(cnonce.as_bytes());
        md5.update(b":auth:");
        md5.update(a2.as_bytes());
        hex(&md5.finalize())
    }
}

impl Mechanism for DigestMd5 {
    fn name(&self) -> &'static str {
        "DIGEST-MD5"
    }

    fn initial(&mut self) -> Result<Vec<u8>, MechanismError> {
        Ok(Vec::new())
    }

    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        let challenge =
            std::str::from_utf8(challenge).map_err(|_| MechanismError::MalformedChallenge)?;

        if challenge.starts_with("rspauth") {
            return Ok(Vec::new());
        }

        let realm = quoted_value(challenge, "realm=")
            .unwrap_or_else(|| self.server.clone());
        let nonce =
            quoted_value(challenge, "nonce=").ok_or(MechanismError::MalformedChallenge)?;
        let cnonce = match self.cnonce {
            Some(ref c) => c.clone(),
            None => random_nonce()?,
        };

        let digest = self.compute(&realm, &nonce, &cnonce);

        let mut out = String::new();
        out.push_str("username=\"");
        out.push_str(&String::from_utf8_lossy(&self.username));
        out.push_str("\",realm=\"");
        out.push_str(&realm);
        out.push_str("\",nonce=\"");
        out.push_str(&nonce);
        out.push_str("\",cnonce=\"");
        out.push_str(&cnonce);
        out.push_str("\",nc=00000001,qop=auth,digest-uri=\"xmpp/");
        out.push_str(&self.server);
        out.push_str("\",response=");
        out.push_str(&digest);
        out.push_str(",charset=utf-8");
        if let Some(ref authzid) = self.authzid {
            out.push_str(",authzid=");
            out.push_str(authzid);
        }
        Ok(out.into_bytes())
    }
}

impl Drop for DigestMd5 {
    fn drop(&mut self) {
        wipe(&mut self.password);
        wipe(&mut self.username);
    }
}

/// Extract a quoted challenge value, honouring backslash-escaped quotes.
fn quoted_value(challenge: &str, key: &str) -> Option<String> {
    let pos = challenge.find(key)?;
    let rest = &challenge[pos + key.len()..];
    let rest = rest.strip_prefix('"')?;
    let bytes = rest.as_bytes();
    let mut end = 0;
    while end < bytes.len() {
        if bytes[end] == b'"' && (end == 0 || bytes[end - 1] != b'\\') {
            return Some(rest[..end].to_string());
        }
        end += 1;
    }
    None
}

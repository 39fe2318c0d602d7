// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

use super::{random_nonce, saslprep, wipe, Mechanism, MechanismError};

type HmacSha1 = Hmac<Sha1>;

/// How the SCRAM exchange is tied to the TLS channel.
#[derive(Debug, Clone)]
pub enum ChannelBinding {
    /// No channel binding; GS2 flag `n`.
    Unsupported,
    /// The server offered SCRAM-SHA-1-PLUS but the plain variant was
    /// selected; GS2 flag `y` protects against downgrade.
    Unused,
    /// Channel binding data from the TLS layer; GS2 flag `p=<kind>`.
    TlsBinding {
        /// The binding type, e.g. `tls-exporter`.
        kind: String,
        /// The binding bytes for the established TLS session.
        data: Vec<u8>,
    },
}

impl ChannelBinding {
    fn gs2_flag(&self) -> String {
        match self {
            Self::Unsupported => "n,".to_string(),
            Self::Unused => "y,".to_string(),
            Self::TlsBinding { kind, .. } => format!("p={},", kind),
        }
    }

    fn data(&self) -> &[u8] {
        match self {
            Self::TlsBinding { data, .. } => data,
            _ => &[],
        }
    }
}

/// RFC 5802 SCRAM-SHA-1 and SCRAM-SHA-1-PLUS.
pub struct Scram {
    username: String,
    password: Vec<u8>,
    authzid: Option<String>,
    cb: ChannelBinding,
    nonce: Option<String>,
    gs2_header: String,
    client_first_bare: String,
    server_signature: Vec<u8>,
}

impl Scram {
    /// Prepare an exchange. Username, password and authzid are SASLprepped
    /// here; prohibited codepoints abort before anything is sent.
    pub fn new(
        username: &str,
        password: &str,
        authzid: Option<&str>,
        cb: ChannelBinding,
    ) -> Result<Scram, MechanismError> {
        Ok(Scram {
            username: saslprep(username)?,
            password: saslprep(password)?.into_bytes(),
            authzid: match authzid {
                Some(a) => Some(saslprep(a)?),
                None => None,
            },
            cb,
            nonce: None,
            gs2_header: String::new(),
            client_first_bare: String::new(),
            server_signature: Vec::new(),
        })
    }

    /// Fix the client nonce instead of drawing a fresh one. Exchanges are
    /// only reproducible with a fixed nonce.
    pub fn with_nonce<S: Into<String>>(mut self, nonce: S) -> Scram {
        self.nonce = Some(nonce.into());
        self
    }
}

impl Mechanism for Scram {
    fn name(&self) -> &'static str {
        match self.cb {
            ChannelBinding::TlsBinding { .. } => "SCRAM-SHA-1-PLUS",
            _ => "SCRAM-SHA-1",
        }
    }

    fn initial(&mut self) -> Result<Vec<u8>, MechanismError> {
        let nonce = match self.nonce.take() {
            Some(n) => n,
            None => random_nonce()?,
        };

        self.gs2_header = self.cb.gs2_flag();
        if let Some(ref a) = self.authzid {
            self.gs2_header.push_str("a=");
            self.gs2_header.push_str(a);
        }
        self.gs2_header.push(',');

        self.client_first_bare = format!("n={},r={}", self.username, nonce);
        self.nonce = Some(nonce);

        Ok(format!("{}{}", self.gs2_header, self.client_first_bare).into_bytes())
    }

    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        let server_first =
            std::str::from_utf8(challenge).map_err(|_| MechanismError::MalformedChallenge)?;

        let mut snonce = None;
        let mut salt = None;
        let mut iterations = None;
        for field in server_first.split(',') {
            if let Some(v) = field.strip_prefix("r=") {
                snonce = Some(v.to_string());
            } else if let Some(v) = field.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(v)
                        .map_err(|_| MechanismError::MalformedChallenge)?,
                );
            } else if let Some(v) = field.strip_prefix("i=") {
                iterations = Some(
                    v.parse::<u32>()
                        .map_err(|_| MechanismError::MalformedChallenge)?,
                );
            }
        }
        let snonce = snonce.ok_or(MechanismError::MalformedChallenge)?;
        let salt = salt.ok_or(MechanismError::MalformedChallenge)?;
        let iterations = iterations.ok_or(MechanismError::MalformedChallenge)?;

        let client_nonce = self.nonce.as_deref().unwrap_or("");
        if !snonce.starts_with(client_nonce) || snonce.len() <= client_nonce.len() {
            return Err(MechanismError::NonceMismatch);
        }

        let mut salted_password = hi(&self.password, &salt, iterations);
        let client_key = hmac_sha1(&salted_password, b"Client Key");
        let stored_key: [u8; 20] = Sha1::digest(client_key).into();

        let mut cb_input = self.gs2_header.clone().into_bytes();
        cb_input.extend_from_slice(self.cb.data());
        let client_final_without_proof =
            format!("c={},r={}", BASE64.encode(&cb_input), snonce);

        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = hmac_sha1(&stored_key, auth_message.as_bytes());
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature.iter()) {
            *p ^= s;
        }

        let server_key = hmac_sha1(&salted_password, b"Server Key");
        self.server_signature = hmac_sha1(&server_key, auth_message.as_bytes()).to_vec();
        wipe(&mut salted_password);

        Ok(format!("{},p={}", client_final_without_proof, BASE64.encode(proof)).into_bytes())
    }

    fn success(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        let text = std::str::from_utf8(data).map_err(|_| MechanismError::ServerSignature)?;
        let encoded = text
            .strip_prefix("v=")
            .ok_or(MechanismError::ServerSignature)?;
        let signature = BASE64
            .decode(encoded.trim_end())
            .map_err(|_| MechanismError::ServerSignature)?;
        if !self.server_signature.is_empty() && signature == self.server_signature {
            Ok(())
        } else {
            Err(MechanismError::ServerSignature)
        }
    }
}

impl Drop for Scram {
    fn drop(&mut self) {
        wipe(&mut self.password);
    }
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// `Hi(str, salt, i)`: PBKDF2-HMAC-SHA-1 with a single block, truncated to
/// the SHA-1 output size.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut block = salt.to_vec();
    block.extend_from_slice(&[0, 0, 0, 1]);
    let mut u = hmac_sha1(password, &block);
    let mut out = u;
    for _ in 1..iterations {
        u = hmac_sha1(password, &u);
        for (o, b) in out.iter_mut().zip(u.iter()) {
            *o ^= b;
        }
    }
    out.to_vec()
}

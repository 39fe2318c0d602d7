// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::{saslprep, wipe, Mechanism, MechanismError};

/// RFC 4616 PLAIN: `authzid NUL authcid NUL password` in a single step.
pub struct Plain {
    authzid: Vec<u8>,
    authcid: Vec<u8>,
    password: Vec<u8>,
}

impl Plain {
    /// Prepare a PLAIN exchange. Credentials are SASLprepped here; the
    /// authzid is a JID and is taken verbatim.
    pub fn new(
        authzid: Option<&str>,
        authcid: &str,
        password: &str,
    ) -> Result<Plain, MechanismError> {
        Ok(Plain {
            authzid: authzid.unwrap_or("").as_bytes().to_vec(),
            authcid: saslprep(authcid)?.into_bytes(),
            password: saslprep(password)?.into_bytes(),
        })
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn initial(&mut self) -> Result<Vec<u8>, MechanismError> {
        let mut out =
            Vec::with_capacity(self.authzid.len() + self.authcid.len() + self.password.len() + 2);
        out.extend_from_slice(&self.authzid);
        out.push(0);
        out.extend_from_slice(&self.authcid);
        out.push(0);
        out.extend_from_slice(&self.password);
        Ok(out)
    }

    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        Err(MechanismError::MalformedChallenge)
    }
}

impl Drop for Plain {
    fn drop(&mut self) {
        wipe(&mut self.password);
        wipe(&mut self.authcid);
    }
}

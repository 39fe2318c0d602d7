// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::{Mechanism, MechanismError};

/// RFC 4422 EXTERNAL: authentication was established outside SASL, e.g.
/// via a TLS client certificate. The payload is the bare authzid, or
/// nothing (wire `=`) to request the identity from the credential.
pub struct External {
    authzid: Vec<u8>,
}

impl External {
    /// Create the exchange for an optional authorization identity (bare
    /// JID form).
    pub fn new(authzid: Option<&str>) -> External {
        External {
            authzid: authzid.unwrap_or("").as_bytes().to_vec(),
        }
    }
}

impl Mechanism for External {
    fn name(&self) -> &'static str {
        "EXTERNAL"
    }

    fn initial(&mut self) -> Result<Vec<u8>, MechanismError> {
        Ok(self.authzid.clone())
    }

    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        Ok(Vec::new())
    }
}

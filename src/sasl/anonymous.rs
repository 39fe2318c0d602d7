// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::{Mechanism, MechanismError};

/// RFC 4505 ANONYMOUS: the server assigns a throwaway identity.
#[derive(Default)]
pub struct Anonymous;

impl Anonymous {
    /// Create the (stateless) exchange.
    pub fn new() -> Anonymous {
        Anonymous
    }
}

impl Mechanism for Anonymous {
    fn name(&self) -> &'static str {
        "ANONYMOUS"
    }

    fn initial(&mut self) -> Result<Vec<u8>, MechanismError> {
        Ok(Vec::new())
    }

    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        Ok(Vec::new())
    }
}

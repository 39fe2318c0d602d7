// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stanza extensions shipped with the engine.

mod delay;
mod muc_user;
mod ping;

pub use delay::Delay;
pub use muc_user::{Invite, MucUser};
pub use ping::Ping;

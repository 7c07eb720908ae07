// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Meridian Contributors. All rights reserved.
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Connection state shared between the RPC engine and its transports.

use strum::{AsRefStr, Display, EnumString};

/// Connection state of an RPC engine.
///
/// Transitions are driven by transport events (connected, disconnected) and by explicit
/// connect/disconnect requests.
#[derive(Clone, Copy, Debug, Default, Display, Hash, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ConnectionState {
    #[default]
    /// No connection is open and none is being opened.
    Disconnected,
    /// A connection attempt is in progress (initial connect or reconnect).
    Connecting,
    /// The transport reported an established connection.
    Connected,
    /// A caller requested the connection be closed; waiting for the transport to confirm.
    Disconnecting,
}

impl ConnectionState {
    #[inline]
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    #[inline]
    #[must_use]
    pub const fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    #[inline]
    #[must_use]
    pub const fn is_disconnecting(&self) -> bool {
        matches!(self, Self::Disconnecting)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_default_is_disconnected() {
        assert!(ConnectionState::default().is_disconnected());
    }

    #[rstest]
    #[case("DISCONNECTED", ConnectionState::Disconnected)]
    #[case("CONNECTING", ConnectionState::Connecting)]
    #[case("CONNECTED", ConnectionState::Connected)]
    #[case("DISCONNECTING", ConnectionState::Disconnecting)]
    fn test_display_and_parse(#[case] text: &str, #[case] state: ConnectionState) {
        assert_eq!(state.to_string(), text);
        assert_eq!(ConnectionState::from_str(text).unwrap(), state);
    }
}

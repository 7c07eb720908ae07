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

//! TLS provider setup shared by the WebSocket and HTTP transports.

use std::sync::Once;

use rustls::crypto::{CryptoProvider, aws_lc_rs};

static INSTALL_PROVIDER: Once = Once::new();

/// Installs the aws-lc-rs provider as the process default unless one is already set.
pub fn install_crypto_provider() {
    INSTALL_PROVIDER.call_once(|| {
        if CryptoProvider::get_default().is_some() {
            return;
        }

        match aws_lc_rs::default_provider().install_default() {
            Ok(()) => tracing::debug!("Installed aws-lc-rs crypto provider"),
            // Lost a race with another installer, which is fine
            Err(e) => tracing::debug!("Crypto provider already installed: {e:?}"),
        }
    });
}

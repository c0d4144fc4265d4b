// Copyright 2022 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Path subsystem configuration.

use crate::core::{crypto, PublicKey, RouterId, SecretKey, ACK_TIMEOUT_MS, DEFAULT_PATH_LIFETIME_MS};

/// Configuration data for a router's path subsystem.
#[derive(Clone)]
pub struct Config {
	/// Long-term DH secret for this router; commit frames addressed to us
	/// decrypt under this key.
	pub secret_key: SecretKey,
	/// DH public key for this router, published in our router contact.
	pub public_key: PublicKey,
	/// Local router identity.
	pub local_id: RouterId,
	/// Lifetime of own paths and of transit state installed by our commits,
	/// in milliseconds.
	pub path_lifetime_ms: u64,
	/// How long a build waits for the farthest hop's ack before the path is
	/// marked timed out, in milliseconds.
	pub ack_timeout_ms: u64,
	/// Whether this router installs transit state for paths it did not
	/// initiate. Commits addressed to us as the terminus are honoured
	/// regardless.
	pub allow_transit: bool,
}

impl Config {
	pub fn new(id: RouterId) -> Self {
		let (secret_key, public_key) = crypto::generate_encryption_keypair(&mut rand::thread_rng());
		Self::new_with_keys(id, public_key, secret_key)
	}

	pub fn new_with_keys(id: RouterId, public_key: PublicKey, secret_key: SecretKey) -> Self {
		Self {
			secret_key,
			public_key,
			local_id: id,
			path_lifetime_ms: DEFAULT_PATH_LIFETIME_MS,
			ack_timeout_ms: ACK_TIMEOUT_MS,
			allow_transit: true,
		}
	}
}

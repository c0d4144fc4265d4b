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

// Path and transit core logic. This module tries to be network agnostic.

pub mod build;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod path;
pub mod transit;
pub mod wire;

use std::fmt::Write;

/// Router long-term DH secret key.
pub type SecretKey = x25519_dalek::StaticSecret;
/// Router long-term DH public key.
pub type PublicKey = x25519_dalek::PublicKey;

/// Length of an encoded [`PublicKey`].
pub const PUBLIC_KEY_LEN: usize = 32;

pub const ROUTER_ID_SIZE: usize = 32;
/// Public identity of a router.
pub type RouterId = [u8; ROUTER_ID_SIZE];

pub const PATH_ID_SIZE: usize = 16;
/// Identifier of a path, the routing key on transit relays. Unique per
/// (upstream, downstream) router pair.
pub type PathId = [u8; PATH_ID_SIZE];

pub const TUNNEL_NONCE_SIZE: usize = 24;
/// Per-hop nonce, randomised at build time and bound into the hop's path key.
pub type TunnelNonce = [u8; TUNNEL_NONCE_SIZE];

/// Maximum hops a path may traverse; commit messages always carry this many
/// frames so the real hop count is not visible on the wire.
pub const MAX_HOPS: usize = 8;

/// Size of every frame on the wire.
pub const FRAME_SIZE: usize = 256;

/// Lifetime of a path and of relay-side transit state.
pub const DEFAULT_PATH_LIFETIME_MS: u64 = 600_000;

/// How long a build waits for the farthest hop's ack.
pub const ACK_TIMEOUT_MS: u64 = 30_000;

/// Protocol version carried by every record and message.
pub const VERSION: u64 = 0;

/// Contact information for a single router: its identity and the long-term
/// encryption key used to address commit frames to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterContact {
	/// Public identity.
	pub pubkey: RouterId,
	/// Long-term DH encryption key.
	pub enckey: PublicKey,
}

/// Abbreviated hex rendering of an identifier for log output.
pub(crate) fn short_id(id: &[u8]) -> String {
	let mut out = String::with_capacity(16);
	for b in id.iter().take(8) {
		write!(out, "{:02x}", b).expect("writing to a String cannot fail");
	}
	out
}

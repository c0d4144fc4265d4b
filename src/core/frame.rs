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

//! Fixed-size encrypted frame.
//!
//! Every frame on the wire is [`FRAME_SIZE`] bytes. Two views exist over the
//! same buffer:
//!
//! - Data frames: `[nonce 24][counter 8][body 224]`. The header is chosen by
//!   the originator and left untouched by relays; each hop applies one
//!   XChaCha20 keystream to the body, keyed by its path key, with the counter
//!   folded into the nonce. The body carries a length-prefixed payload padded
//!   with random bytes.
//! - Commit frames: `[commkey 32][mac 16][ciphertext 208]`. The ephemeral
//!   key travels in the clear so the addressed hop can run its side of the
//!   key exchange before decrypting. The frame key is used exactly once, so a
//!   fixed stream nonce is fine.

use crate::core::{
	crypto::{self, DerivedKeys, SharedSecret, MAC_SIZE},
	error::Error,
	PublicKey, TunnelNonce, FRAME_SIZE, PUBLIC_KEY_LEN, TUNNEL_NONCE_SIZE,
};
use arrayref::array_ref;
use rand::{CryptoRng, Rng};

pub const FRAME_COUNTER_SIZE: usize = 8;
/// Cleartext header of a data frame.
pub const FRAME_HEADER_SIZE: usize = TUNNEL_NONCE_SIZE + FRAME_COUNTER_SIZE;
/// Body region of a data frame, covered by the onion layers.
pub const DATA_BODY_SIZE: usize = FRAME_SIZE - FRAME_HEADER_SIZE;
const DATA_LEN_PREFIX_SIZE: usize = 2;
/// Largest payload a single data frame can carry.
pub const MAX_DATA_PAYLOAD: usize = DATA_BODY_SIZE - DATA_LEN_PREFIX_SIZE;

const COMMIT_MAC_OFFSET: usize = PUBLIC_KEY_LEN;
const COMMIT_CIPHERTEXT_OFFSET: usize = COMMIT_MAC_OFFSET + MAC_SIZE;
/// Capacity available to an encoded commit record.
pub const COMMIT_CIPHERTEXT_SIZE: usize = FRAME_SIZE - COMMIT_CIPHERTEXT_OFFSET;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EncryptedFrame([u8; FRAME_SIZE]);

impl EncryptedFrame {
	pub fn from_bytes(bytes: [u8; FRAME_SIZE]) -> Self {
		EncryptedFrame(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
		&self.0
	}

	/// A frame of uniform random bytes, indistinguishable from ciphertext.
	pub fn random(rng: &mut (impl Rng + CryptoRng)) -> Self {
		let mut frame = EncryptedFrame([0u8; FRAME_SIZE]);
		frame.randomize(rng);
		frame
	}

	pub fn randomize(&mut self, rng: &mut (impl Rng + CryptoRng)) {
		rng.fill_bytes(&mut self.0);
	}

	////////////////////////////////////////////////////////////////////////
	// Data-frame view
	////////////////////////////////////////////////////////////////////////

	pub fn nonce(&self) -> TunnelNonce {
		*array_ref![self.0, 0, TUNNEL_NONCE_SIZE]
	}

	pub fn set_nonce(&mut self, nonce: &TunnelNonce) {
		self.0[..TUNNEL_NONCE_SIZE].copy_from_slice(nonce);
	}

	pub fn counter(&self) -> u64 {
		u64::from_be_bytes(*array_ref![self.0, TUNNEL_NONCE_SIZE, FRAME_COUNTER_SIZE])
	}

	pub fn set_counter(&mut self, counter: u64) {
		self.0[TUNNEL_NONCE_SIZE..FRAME_HEADER_SIZE].copy_from_slice(&counter.to_be_bytes());
	}

	/// Write a length-prefixed payload into the body, random-padding the
	/// rest so the frame length reveals nothing.
	pub fn write_payload(
		&mut self,
		payload: &[u8],
		rng: &mut (impl Rng + CryptoRng),
	) -> Result<(), Error> {
		if payload.len() > MAX_DATA_PAYLOAD {
			return Err(Error::MessageTooLarge)
		}
		let body = &mut self.0[FRAME_HEADER_SIZE..];
		body[..DATA_LEN_PREFIX_SIZE].copy_from_slice(&(payload.len() as u16).to_be_bytes());
		body[DATA_LEN_PREFIX_SIZE..DATA_LEN_PREFIX_SIZE + payload.len()].copy_from_slice(payload);
		rng.fill_bytes(&mut body[DATA_LEN_PREFIX_SIZE + payload.len()..]);
		Ok(())
	}

	/// Read the payload back out of a fully peeled body.
	pub fn read_payload(&self) -> Result<&[u8], Error> {
		let body = &self.0[FRAME_HEADER_SIZE..];
		let len = u16::from_be_bytes(*array_ref![body, 0, DATA_LEN_PREFIX_SIZE]) as usize;
		if len > MAX_DATA_PAYLOAD {
			return Err(Error::Codec)
		}
		Ok(&body[DATA_LEN_PREFIX_SIZE..DATA_LEN_PREFIX_SIZE + len])
	}

	/// Apply one onion layer to the body: the XChaCha20 keystream for the
	/// given path key under this frame's header nonce and counter.
	pub fn apply_layer(&mut self, key: &SharedSecret) {
		let nonce = self.nonce();
		let counter = self.counter();
		crypto::stream_xor(&mut self.0[FRAME_HEADER_SIZE..], key.as_bytes(), &nonce, counter);
	}

	////////////////////////////////////////////////////////////////////////
	// Commit-frame view
	////////////////////////////////////////////////////////////////////////

	/// The ephemeral key carried in the clear header region.
	pub fn commit_key(&self) -> PublicKey {
		PublicKey::from(*array_ref![self.0, 0, PUBLIC_KEY_LEN])
	}

	/// The region an encoded commit record occupies. Only meaningful after
	/// [`decrypt_commit_in_place`](Self::decrypt_commit_in_place), or before
	/// [`encrypt_commit_in_place`](Self::encrypt_commit_in_place) on the
	/// build side.
	pub fn commit_body(&self) -> &[u8] {
		&self.0[COMMIT_CIPHERTEXT_OFFSET..]
	}

	pub fn commit_body_mut(&mut self) -> &mut [u8] {
		&mut self.0[COMMIT_CIPHERTEXT_OFFSET..]
	}

	/// Seal the record region to the addressed hop: stamp the ephemeral key,
	/// encrypt, MAC over the key and ciphertext.
	pub fn encrypt_commit_in_place(&mut self, commkey: &PublicKey, keys: &DerivedKeys) {
		self.0[..PUBLIC_KEY_LEN].copy_from_slice(commkey.as_bytes());
		crypto::stream_xor(
			&mut self.0[COMMIT_CIPHERTEXT_OFFSET..],
			keys.cipher_key(),
			&FRAME_KX_NONCE,
			0,
		);
		let mac = crypto::compute_mac(
			keys.frame_mac_key(),
			&[&self.0[..PUBLIC_KEY_LEN], &self.0[COMMIT_CIPHERTEXT_OFFSET..]],
		);
		self.0[COMMIT_MAC_OFFSET..COMMIT_CIPHERTEXT_OFFSET].copy_from_slice(&mac);
	}

	/// Open a commit frame with the keys derived on the receiving side.
	/// Fails without touching the body unless the MAC verifies, so probing a
	/// frame with the wrong keys is side-effect free.
	pub fn decrypt_commit_in_place(&mut self, keys: &DerivedKeys) -> Result<(), Error> {
		let mac = *array_ref![self.0, COMMIT_MAC_OFFSET, MAC_SIZE];
		if !crypto::mac_ok(
			&mac,
			keys.frame_mac_key(),
			&[&self.0[..PUBLIC_KEY_LEN], &self.0[COMMIT_CIPHERTEXT_OFFSET..]],
		) {
			return Err(Error::Codec)
		}
		crypto::stream_xor(
			&mut self.0[COMMIT_CIPHERTEXT_OFFSET..],
			keys.cipher_key(),
			&FRAME_KX_NONCE,
			0,
		);
		Ok(())
	}
}

/// The commit-frame key is fresh for every frame, so a fixed stream nonce is
/// fine.
pub const FRAME_KX_NONCE: TunnelNonce = [0u8; TUNNEL_NONCE_SIZE];

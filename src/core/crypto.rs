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

//! Key exchange, secret derivation, MAC computation, and encryption.

use crate::core::{error::Error, PublicKey, SecretKey, TunnelNonce};
use arrayref::array_refs;
use blake2::{
	digest::{
		consts::{U16, U32, U64},
		generic_array::GenericArray,
		FixedOutput, Mac as DigestMac,
	},
	Blake2bMac,
};
use c2_chacha::{
	stream_cipher::{NewStreamCipher, SyncStreamCipher},
	XChaCha20,
};
use rand::{CryptoRng, Rng};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

const DH_DERIVE_PERSONAL: &[u8; 16] = b"tunnel-dh-derive";
const DERIVED_SECRETS_PERSONAL: &[u8; 16] = b"tunnel-derived-s";

/// Size in bytes of a [`SharedSecret`].
pub const SHARED_SECRET_SIZE: usize = 32;

pub const CIPHER_KEY_SIZE: usize = 32;
pub type CipherKey = [u8; CIPHER_KEY_SIZE];

pub const MAC_KEY_SIZE: usize = 16;
pub type MacKey = [u8; MAC_KEY_SIZE];

pub const MAC_SIZE: usize = 16;
pub type Mac = [u8; MAC_SIZE];

/// Per-hop secret produced by the tunnel key exchange. Doubles as the path
/// key applied to frame bodies on the data plane. Wiped on drop.
#[derive(Clone)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
	pub fn from_bytes(bytes: [u8; SHARED_SECRET_SIZE]) -> Self {
		SharedSecret(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
		&self.0
	}
}

impl Drop for SharedSecret {
	fn drop(&mut self) {
		self.0.zeroize();
	}
}

/// Generate a fresh DH keypair.
pub fn generate_encryption_keypair(rng: &mut (impl Rng + CryptoRng)) -> (SecretKey, PublicKey) {
	let mut raw_key = [0u8; 32];
	rng.fill_bytes(&mut raw_key);
	let secret = SecretKey::from(raw_key);
	let public = PublicKey::from(&secret);
	(secret, public)
}

fn dh(their_public: &PublicKey, our_secret: &SecretKey, nonce: &TunnelNonce) -> Result<SharedSecret, Error> {
	let raw = our_secret.diffie_hellman(their_public);
	// A low-order public key contributes nothing; the exchange has failed.
	if raw.as_bytes().ct_eq(&[0u8; 32]).into() {
		return Err(Error::CryptoFailure)
	}
	let h = Blake2bMac::<U32>::new_with_salt_and_personal(raw.as_bytes(), b"", DH_DERIVE_PERSONAL)
		.expect("Key, salt, and personalisation sizes are fixed and small enough");
	let h = h.chain_update(nonce);
	Ok(SharedSecret(h.finalize().into_bytes().into()))
}

/// Client side of the tunnel key exchange: derive the shared secret for a hop
/// from its long-term public key, our ephemeral secret, and the hop nonce.
pub fn dh_client(
	their_public: &PublicKey,
	our_secret: &SecretKey,
	nonce: &TunnelNonce,
) -> Result<SharedSecret, Error> {
	dh(their_public, our_secret, nonce)
}

/// Server side of the tunnel key exchange. Agrees with [`dh_client`] run on
/// the opposite side with the same nonce.
pub fn dh_server(
	their_public: &PublicKey,
	our_secret: &SecretKey,
	nonce: &TunnelNonce,
) -> Result<SharedSecret, Error> {
	dh(their_public, our_secret, nonce)
}

fn derive_secret(derived: &mut [u8], shared: &SharedSecret, personal: &[u8; 16]) {
	for (i, chunk) in derived.chunks_mut(64).enumerate() {
		// This is the construction libsodium uses for crypto_kdf_derive_from_key; see
		// https://doc.libsodium.org/key_derivation/
		let h = Blake2bMac::<U64>::new_with_salt_and_personal(
			shared.as_bytes(),
			&i.to_le_bytes(),
			personal,
		)
		.expect("Key, salt, and personalisation sizes are fixed and small enough");
		h.finalize_into(GenericArray::from_mut_slice(chunk));
	}
}

const DERIVED_SECRETS_SIZE: usize = CIPHER_KEY_SIZE + MAC_KEY_SIZE + MAC_KEY_SIZE;

/// Subkeys derived from one shared secret: frame encryption key, frame MAC
/// key, and ack MAC key.
pub struct DerivedKeys([u8; DERIVED_SECRETS_SIZE]);

impl DerivedKeys {
	pub fn new(shared: &SharedSecret) -> Self {
		let mut derived = [0; DERIVED_SECRETS_SIZE];
		derive_secret(&mut derived, shared, DERIVED_SECRETS_PERSONAL);
		Self(derived)
	}

	fn split(&self) -> (&CipherKey, &MacKey, &MacKey) {
		array_refs![&self.0, CIPHER_KEY_SIZE, MAC_KEY_SIZE, MAC_KEY_SIZE]
	}

	pub fn cipher_key(&self) -> &CipherKey {
		self.split().0
	}

	pub fn frame_mac_key(&self) -> &MacKey {
		self.split().1
	}

	pub fn ack_mac_key(&self) -> &MacKey {
		self.split().2
	}
}

impl Drop for DerivedKeys {
	fn drop(&mut self) {
		self.0.zeroize();
	}
}

/// Apply the XChaCha20 keystream for `(key, nonce, counter)` to `data` in
/// place. Folding the frame counter into the nonce keeps every (key, nonce)
/// pair unique across the frames of one path.
pub fn stream_xor(data: &mut [u8], key: &CipherKey, nonce: &TunnelNonce, counter: u64) {
	let mut iv = *nonce;
	for (b, c) in iv[16..].iter_mut().zip(counter.to_le_bytes()) {
		*b ^= c;
	}
	let mut cipher = XChaCha20::new(key.into(), (&iv).into());
	cipher.apply_keystream(data);
}

pub fn compute_mac(key: &MacKey, parts: &[&[u8]]) -> Mac {
	let mut h = Blake2bMac::<U16>::new_from_slice(key).expect("Key size is fixed and small enough");
	for part in parts {
		h.update(part);
	}
	h.finalize().into_bytes().into()
}

pub fn mac_ok(mac: &Mac, key: &MacKey, parts: &[&[u8]]) -> bool {
	compute_mac(key, parts).ct_eq(mac).into()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn key_exchange_agrees() {
		let mut rng = rand::thread_rng();
		let (client_secret, client_public) = generate_encryption_keypair(&mut rng);
		let (server_secret, server_public) = generate_encryption_keypair(&mut rng);
		let nonce = rng.gen::<TunnelNonce>();

		let client = dh_client(&server_public, &client_secret, &nonce).unwrap();
		let server = dh_server(&client_public, &server_secret, &nonce).unwrap();
		assert_eq!(client.as_bytes(), server.as_bytes());

		let other_nonce = rng.gen::<TunnelNonce>();
		let skewed = dh_client(&server_public, &client_secret, &other_nonce).unwrap();
		assert_ne!(client.as_bytes(), skewed.as_bytes());
	}

	#[test]
	fn low_order_public_key_is_rejected() {
		let mut rng = rand::thread_rng();
		let (secret, _) = generate_encryption_keypair(&mut rng);
		let zero = PublicKey::from([0u8; 32]);
		assert!(matches!(dh_client(&zero, &secret, &[0; 24]), Err(Error::CryptoFailure)));
	}

	#[test]
	fn keystream_round_trips_and_depends_on_counter() {
		let mut rng = rand::thread_rng();
		let key = rng.gen::<CipherKey>();
		let nonce = rng.gen::<TunnelNonce>();
		let plaintext = b"frame body bytes".to_vec();

		let mut buf = plaintext.clone();
		stream_xor(&mut buf, &key, &nonce, 7);
		assert_ne!(buf, plaintext);
		stream_xor(&mut buf, &key, &nonce, 7);
		assert_eq!(buf, plaintext);

		let mut other = plaintext.clone();
		stream_xor(&mut other, &key, &nonce, 8);
		stream_xor(&mut buf, &key, &nonce, 7);
		assert_ne!(buf, other);
	}

	#[test]
	fn mac_rejects_tampering() {
		let mut rng = rand::thread_rng();
		let key = rng.gen::<MacKey>();
		let mac = compute_mac(&key, &[b"header", b"body"]);
		assert!(mac_ok(&mac, &key, &[b"header", b"body"]));
		assert!(!mac_ok(&mac, &key, &[b"header", b"tampered"]));
		let other_key = rng.gen::<MacKey>();
		assert!(!mac_ok(&mac, &other_key, &[b"header", b"body"]));
	}
}

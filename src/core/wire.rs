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

//! Wire record codec.
//!
//! Records and messages are self-describing dictionaries in a bencode-style
//! binary format: `d` ... `e` wrapping length-prefixed byte-string keys (all
//! single ASCII letters, written in sorted order) with byte-string or integer
//! values. The key letters are part of the wire format and must be preserved
//! byte for byte.
//!
//! Three message kinds exist, tagged by the `a` entry:
//!
//! - `c`: a commit message carrying [`MAX_HOPS`] concatenated frames.
//! - `a`: an ack from the farthest hop of a path, relayed downstream.
//! - `u` / `d`: a data frame travelling upstream or downstream.

use crate::core::{
	crypto::{Mac, MAC_SIZE},
	error::Error,
	frame::EncryptedFrame,
	short_id, PathId, PublicKey, RouterContact, RouterId, TunnelNonce, FRAME_SIZE, MAX_HOPS,
	PATH_ID_SIZE, PUBLIC_KEY_LEN, ROUTER_ID_SIZE, TUNNEL_NONCE_SIZE,
};

pub const MSG_COMMIT: u8 = b'c';
pub const MSG_ACK: u8 = b'a';
pub const MSG_DATA_UPSTREAM: u8 = b'u';
pub const MSG_DATA_DOWNSTREAM: u8 = b'd';

const RC_WIRE_SIZE: usize = ROUTER_ID_SIZE + PUBLIC_KEY_LEN;

////////////////////////////////////////////////////////////////////////////////
// Encoding primitives
////////////////////////////////////////////////////////////////////////////////

fn write_key(out: &mut Vec<u8>, key: u8) {
	out.extend_from_slice(b"1:");
	out.push(key);
}

fn write_bytes(out: &mut Vec<u8>, val: &[u8]) {
	out.extend_from_slice(val.len().to_string().as_bytes());
	out.push(b':');
	out.extend_from_slice(val);
}

fn write_int(out: &mut Vec<u8>, val: u64) {
	out.push(b'i');
	out.extend_from_slice(val.to_string().as_bytes());
	out.push(b'e');
}

////////////////////////////////////////////////////////////////////////////////
// Decoding primitives
////////////////////////////////////////////////////////////////////////////////

enum Value<'a> {
	Bytes(&'a [u8]),
	Int(u64),
}

impl<'a> Value<'a> {
	fn bytes(&self) -> Result<&'a [u8], Error> {
		match self {
			Value::Bytes(b) => Ok(b),
			Value::Int(_) => Err(Error::Codec),
		}
	}

	fn fixed<const N: usize>(&self) -> Result<[u8; N], Error> {
		let b = self.bytes()?;
		b.try_into().map_err(|_| Error::Codec)
	}

	fn int(&self) -> Result<u64, Error> {
		match self {
			Value::Bytes(_) => Err(Error::Codec),
			Value::Int(i) => Ok(*i),
		}
	}
}

struct Reader<'a> {
	input: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn new(input: &'a [u8]) -> Self {
		Reader { input, pos: 0 }
	}

	fn peek(&self) -> Result<u8, Error> {
		self.input.get(self.pos).copied().ok_or(Error::Codec)
	}

	fn take(&mut self) -> Result<u8, Error> {
		let b = self.peek()?;
		self.pos += 1;
		Ok(b)
	}

	fn expect(&mut self, b: u8) -> Result<(), Error> {
		if self.take()? == b {
			Ok(())
		} else {
			Err(Error::Codec)
		}
	}

	/// Decimal digits up to (and consuming) the given terminator.
	fn read_decimal(&mut self, until: u8) -> Result<u64, Error> {
		let mut val: u64 = 0;
		let mut digits = 0;
		loop {
			let b = self.take()?;
			if b == until {
				break
			}
			if !b.is_ascii_digit() || digits >= 19 {
				return Err(Error::Codec)
			}
			val = val * 10 + u64::from(b - b'0');
			digits += 1;
		}
		if digits == 0 {
			return Err(Error::Codec)
		}
		Ok(val)
	}

	fn read_string(&mut self) -> Result<&'a [u8], Error> {
		let len = self.read_decimal(b':')? as usize;
		let end = self.pos.checked_add(len).ok_or(Error::Codec)?;
		if end > self.input.len() {
			return Err(Error::Codec)
		}
		let s = &self.input[self.pos..end];
		self.pos = end;
		Ok(s)
	}

	fn read_value(&mut self) -> Result<Value<'a>, Error> {
		if self.peek()? == b'i' {
			self.pos += 1;
			Ok(Value::Int(self.read_decimal(b'e')?))
		} else {
			Ok(Value::Bytes(self.read_string()?))
		}
	}

	/// Read the next dictionary entry, or `None` at the dictionary end.
	fn read_entry(&mut self) -> Result<Option<(u8, Value<'a>)>, Error> {
		if self.peek()? == b'e' {
			self.pos += 1;
			return Ok(None)
		}
		let key = self.read_string()?;
		if key.len() != 1 {
			return Err(Error::Codec)
		}
		Ok(Some((key[0], self.read_value()?)))
	}
}

////////////////////////////////////////////////////////////////////////////////
// Commit record
////////////////////////////////////////////////////////////////////////////////

/// Per-hop contents of a commit frame, cleartext only to the addressed hop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRecord {
	/// Ephemeral key the initiator generated for this hop (key `c`).
	pub commkey: PublicKey,
	/// The hop's own long-term encryption key, echoed for validation (`e`).
	pub enckey: PublicKey,
	/// Router id of the next hop; our own id marks the terminus (`i`).
	pub next_hop: RouterId,
	/// Transit state lifetime in milliseconds (`l`).
	pub lifetime_ms: u64,
	/// Hop nonce bound into the path key (`n`).
	pub nonce: TunnelNonce,
	/// Path id, the transit routing key (`p`).
	pub path_id: PathId,
	/// Contact for the next hop, when the sender chooses to supply it (`r`).
	pub next_rc: Option<RouterContact>,
	/// Protocol version (`v`).
	pub version: u64,
}

/// Decoded view of a record's next-hop field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextHop {
	Router(RouterId),
	Terminus,
}

impl CommitRecord {
	/// Whether the record names `whoami` as its own next hop, marking the
	/// end of the path.
	pub fn next(&self, whoami: &RouterId) -> NextHop {
		if &self.next_hop == whoami {
			NextHop::Terminus
		} else {
			NextHop::Router(self.next_hop)
		}
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(192);
		out.push(b'd');
		write_key(&mut out, b'c');
		write_bytes(&mut out, self.commkey.as_bytes());
		write_key(&mut out, b'e');
		write_bytes(&mut out, self.enckey.as_bytes());
		write_key(&mut out, b'i');
		write_bytes(&mut out, &self.next_hop);
		write_key(&mut out, b'l');
		write_int(&mut out, self.lifetime_ms);
		write_key(&mut out, b'n');
		write_bytes(&mut out, &self.nonce);
		write_key(&mut out, b'p');
		write_bytes(&mut out, &self.path_id);
		if let Some(rc) = &self.next_rc {
			let mut raw = [0u8; RC_WIRE_SIZE];
			raw[..ROUTER_ID_SIZE].copy_from_slice(&rc.pubkey);
			raw[ROUTER_ID_SIZE..].copy_from_slice(rc.enckey.as_bytes());
			write_key(&mut out, b'r');
			write_bytes(&mut out, &raw);
		}
		write_key(&mut out, b'v');
		write_int(&mut out, self.version);
		out.push(b'e');
		out
	}

	/// Encode into the front of `out`, failing if the record does not fit.
	pub fn encode_into(&self, out: &mut [u8]) -> Result<usize, Error> {
		let encoded = self.encode();
		if encoded.len() > out.len() {
			log::debug!(target: "pathnet", "Commit record too large: {} > {}", encoded.len(), out.len());
			return Err(Error::Codec)
		}
		out[..encoded.len()].copy_from_slice(&encoded);
		Ok(encoded.len())
	}

	/// Decode from a buffer; trailing bytes after the dictionary are ignored
	/// (commit frames are padded with random bytes).
	pub fn decode(input: &[u8]) -> Result<Self, Error> {
		let mut r = Reader::new(input);
		r.expect(b'd')?;
		let mut commkey = None;
		let mut enckey = None;
		let mut next_hop = None;
		let mut lifetime_ms = None;
		let mut nonce = None;
		let mut path_id = None;
		let mut next_rc = None;
		let mut version = None;
		while let Some((key, value)) = r.read_entry()? {
			match key {
				b'c' => commkey = Some(PublicKey::from(value.fixed::<PUBLIC_KEY_LEN>()?)),
				b'e' => enckey = Some(PublicKey::from(value.fixed::<PUBLIC_KEY_LEN>()?)),
				b'i' => next_hop = Some(value.fixed::<ROUTER_ID_SIZE>()?),
				b'l' => lifetime_ms = Some(value.int()?),
				b'n' => nonce = Some(value.fixed::<TUNNEL_NONCE_SIZE>()?),
				b'p' => path_id = Some(value.fixed::<PATH_ID_SIZE>()?),
				b'r' => {
					let raw = value.fixed::<RC_WIRE_SIZE>()?;
					let mut pubkey = [0u8; ROUTER_ID_SIZE];
					pubkey.copy_from_slice(&raw[..ROUTER_ID_SIZE]);
					let mut enc = [0u8; PUBLIC_KEY_LEN];
					enc.copy_from_slice(&raw[ROUTER_ID_SIZE..]);
					next_rc = Some(RouterContact { pubkey, enckey: PublicKey::from(enc) });
				},
				b'v' => version = Some(value.int()?),
				_ => return Err(Error::Codec),
			}
		}
		Ok(CommitRecord {
			commkey: commkey.ok_or(Error::Codec)?,
			enckey: enckey.ok_or(Error::Codec)?,
			next_hop: next_hop.ok_or(Error::Codec)?,
			lifetime_ms: lifetime_ms.ok_or(Error::Codec)?,
			nonce: nonce.ok_or(Error::Codec)?,
			path_id: path_id.ok_or(Error::Codec)?,
			next_rc,
			version: version.ok_or(Error::Codec)?,
		})
	}
}

////////////////////////////////////////////////////////////////////////////////
// Messages
////////////////////////////////////////////////////////////////////////////////

/// Transport envelope of a path build: one frame per possible hop, real
/// frames indistinguishable from the random padding slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitMessage {
	pub frames: Vec<EncryptedFrame>,
	pub version: u64,
}

/// Acknowledgment generated by the farthest hop and relayed downstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckMessage {
	pub path_id: PathId,
	pub nonce: TunnelNonce,
	pub mac: Mac,
	pub version: u64,
}

/// A data frame in flight on an established path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataMessage {
	pub path_id: PathId,
	pub frame: EncryptedFrame,
	pub version: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Message {
	Commit(CommitMessage),
	Ack(AckMessage),
	DataUpstream(DataMessage),
	DataDownstream(DataMessage),
}

impl CommitMessage {
	pub fn encode(&self) -> Vec<u8> {
		debug_assert!(self.frames.len() == MAX_HOPS);
		let mut out = Vec::with_capacity(MAX_HOPS * FRAME_SIZE + 32);
		out.push(b'd');
		write_key(&mut out, b'a');
		write_bytes(&mut out, &[MSG_COMMIT]);
		write_key(&mut out, b'f');
		let mut frames = Vec::with_capacity(MAX_HOPS * FRAME_SIZE);
		for frame in &self.frames {
			frames.extend_from_slice(frame.as_bytes());
		}
		write_bytes(&mut out, &frames);
		write_key(&mut out, b'v');
		write_int(&mut out, self.version);
		out.push(b'e');
		out
	}
}

impl AckMessage {
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(96);
		out.push(b'd');
		write_key(&mut out, b'a');
		write_bytes(&mut out, &[MSG_ACK]);
		write_key(&mut out, b'n');
		write_bytes(&mut out, &self.nonce);
		write_key(&mut out, b'p');
		write_bytes(&mut out, &self.path_id);
		write_key(&mut out, b'v');
		write_int(&mut out, self.version);
		write_key(&mut out, b'z');
		write_bytes(&mut out, &self.mac);
		out.push(b'e');
		out
	}
}

impl DataMessage {
	pub fn encode(&self, upstream: bool) -> Vec<u8> {
		let mut out = Vec::with_capacity(FRAME_SIZE + 48);
		out.push(b'd');
		write_key(&mut out, b'a');
		write_bytes(&mut out, &[if upstream { MSG_DATA_UPSTREAM } else { MSG_DATA_DOWNSTREAM }]);
		write_key(&mut out, b'f');
		write_bytes(&mut out, self.frame.as_bytes());
		write_key(&mut out, b'p');
		write_bytes(&mut out, &self.path_id);
		write_key(&mut out, b'v');
		write_int(&mut out, self.version);
		out.push(b'e');
		out
	}
}

/// Decode any wire message, dispatching on the `a` type tag.
pub fn decode_message(input: &[u8]) -> Result<Message, Error> {
	let mut r = Reader::new(input);
	r.expect(b'd')?;
	let (key, value) = r.read_entry()?.ok_or(Error::Codec)?;
	if key != b'a' {
		return Err(Error::Codec)
	}
	let tag = value.fixed::<1>()?[0];

	let mut frames_raw = None;
	let mut nonce = None;
	let mut path_id = None;
	let mut mac = None;
	let mut version = None;
	while let Some((key, value)) = r.read_entry()? {
		match key {
			b'f' => frames_raw = Some(value.bytes()?),
			b'n' => nonce = Some(value.fixed::<TUNNEL_NONCE_SIZE>()?),
			b'p' => path_id = Some(value.fixed::<PATH_ID_SIZE>()?),
			b'v' => version = Some(value.int()?),
			b'z' => mac = Some(value.fixed::<MAC_SIZE>()?),
			_ => return Err(Error::Codec),
		}
	}
	let version = version.ok_or(Error::Codec)?;

	match tag {
		MSG_COMMIT => {
			let raw = frames_raw.ok_or(Error::Codec)?;
			if raw.len() != MAX_HOPS * FRAME_SIZE {
				log::debug!(target: "pathnet", "Commit message with bad frame block: {} bytes", raw.len());
				return Err(Error::Codec)
			}
			let frames = raw
				.chunks_exact(FRAME_SIZE)
				.map(|chunk| {
					let mut bytes = [0u8; FRAME_SIZE];
					bytes.copy_from_slice(chunk);
					EncryptedFrame::from_bytes(bytes)
				})
				.collect();
			Ok(Message::Commit(CommitMessage { frames, version }))
		},
		MSG_ACK => Ok(Message::Ack(AckMessage {
			path_id: path_id.ok_or(Error::Codec)?,
			nonce: nonce.ok_or(Error::Codec)?,
			mac: mac.ok_or(Error::Codec)?,
			version,
		})),
		MSG_DATA_UPSTREAM | MSG_DATA_DOWNSTREAM => {
			let raw = frames_raw.ok_or(Error::Codec)?;
			let bytes: [u8; FRAME_SIZE] = raw.try_into().map_err(|_| Error::Codec)?;
			let msg = DataMessage {
				path_id: path_id.ok_or(Error::Codec)?,
				frame: EncryptedFrame::from_bytes(bytes),
				version,
			};
			if tag == MSG_DATA_UPSTREAM {
				Ok(Message::DataUpstream(msg))
			} else {
				Ok(Message::DataDownstream(msg))
			}
		},
		_ => {
			log::trace!(target: "pathnet", "Unknown message tag {} for path {:?}", tag, path_id.map(|p| short_id(&p)));
			Err(Error::Codec)
		},
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use rand::{Rng, RngCore};

	fn test_record(with_rc: bool) -> CommitRecord {
		let mut rng = rand::thread_rng();
		CommitRecord {
			commkey: PublicKey::from(rng.gen::<[u8; 32]>()),
			enckey: PublicKey::from(rng.gen::<[u8; 32]>()),
			next_hop: rng.gen(),
			lifetime_ms: 600_000,
			nonce: rng.gen(),
			path_id: rng.gen(),
			next_rc: with_rc.then(|| RouterContact {
				pubkey: rng.gen(),
				enckey: PublicKey::from(rng.gen::<[u8; 32]>()),
			}),
			version: 0,
		}
	}

	#[test]
	fn commit_record_round_trips() {
		for with_rc in [false, true] {
			let record = test_record(with_rc);
			let decoded = CommitRecord::decode(&record.encode()).unwrap();
			assert_eq!(record, decoded);
		}
	}

	#[test]
	fn commit_record_ignores_trailing_padding() {
		let record = test_record(false);
		let mut encoded = record.encode();
		let mut padding = vec![0u8; 64];
		rand::thread_rng().fill_bytes(&mut padding);
		encoded.extend_from_slice(&padding);
		assert_eq!(CommitRecord::decode(&encoded).unwrap(), record);
	}

	#[test]
	fn commit_record_rejects_damage() {
		let record = test_record(false);
		let encoded = record.encode();
		assert_eq!(CommitRecord::decode(&encoded[..encoded.len() - 1]), Err(Error::Codec));
		// Unknown key.
		assert_eq!(CommitRecord::decode(b"d1:q3:xyze"), Err(Error::Codec));
		// Missing mandatory fields.
		assert_eq!(CommitRecord::decode(b"de"), Err(Error::Codec));
	}

	#[test]
	fn encode_into_is_length_bounded() {
		let record = test_record(false);
		let mut big = [0u8; 256];
		let n = record.encode_into(&mut big).unwrap();
		assert_eq!(CommitRecord::decode(&big[..n]).unwrap(), record);

		let mut small = [0u8; 64];
		assert_eq!(record.encode_into(&mut small), Err(Error::Codec));
	}

	#[test]
	fn messages_round_trip() {
		let mut rng = rand::thread_rng();

		let commit = CommitMessage {
			frames: (0..MAX_HOPS).map(|_| EncryptedFrame::random(&mut rng)).collect(),
			version: 0,
		};
		assert_eq!(decode_message(&commit.encode()).unwrap(), Message::Commit(commit.clone()));

		let ack =
			AckMessage { path_id: rng.gen(), nonce: rng.gen(), mac: rng.gen(), version: 0 };
		assert_eq!(decode_message(&ack.encode()).unwrap(), Message::Ack(ack.clone()));

		let data = DataMessage {
			path_id: rng.gen(),
			frame: EncryptedFrame::random(&mut rng),
			version: 0,
		};
		assert_eq!(
			decode_message(&data.encode(true)).unwrap(),
			Message::DataUpstream(data.clone())
		);
		assert_eq!(
			decode_message(&data.encode(false)).unwrap(),
			Message::DataDownstream(data.clone())
		);
	}

	#[test]
	fn junk_is_rejected() {
		assert!(decode_message(b"").is_err());
		assert!(decode_message(b"le").is_err());
		assert!(decode_message(b"d1:a1:xe").is_err());
		let mut junk = vec![0u8; 300];
		rand::thread_rng().fill_bytes(&mut junk);
		junk[0] = b'd';
		assert!(decode_message(&junk).is_err());
	}
}

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

//! Initiator-side path state and onion layering.

use crate::core::{
	crypto::SharedSecret, error::Error, frame::EncryptedFrame, PathId, RouterContact, RouterId,
	SecretKey, TunnelNonce, MAX_HOPS,
};
use arrayvec::ArrayVec;
use rand::{CryptoRng, Rng};
use std::time::{Duration, Instant};

/// Fired exactly once on the logic executor when a build either establishes
/// or fails.
pub type OnReady = Box<dyn FnOnce(Result<(), Error>) + Send>;

/// Everything the initiator keeps about one hop of a path it built.
pub struct PathHopConfig {
	/// Path id shared by every hop of this path.
	pub path_id: PathId,
	/// The hop's router contact.
	pub rc: RouterContact,
	/// Ephemeral secret generated for this hop's key exchange.
	pub commkey: SecretKey,
	/// Shared secret with this hop; one onion layer.
	pub shared: SharedSecret,
	/// Router id of the next hop, or this hop's own id at the terminus.
	pub upstream: RouterId,
	/// Nonce bound into the key exchange.
	pub nonce: TunnelNonce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathStatus {
	/// Commit sent, waiting for the farthest hop's ack.
	Building,
	/// The farthest hop acked; the path carries traffic.
	Established,
	/// No ack within the build deadline. Sticky.
	Timeout,
	/// Lifetime exhausted. Sticky.
	Expired,
}

impl PathStatus {
	pub fn is_terminal(self) -> bool {
		matches!(self, PathStatus::Timeout | PathStatus::Expired)
	}
}

/// A path this router built. Owned by the path context; hop secrets never
/// leave it.
pub struct Path {
	hops: ArrayVec<PathHopConfig, MAX_HOPS>,
	build_started: Instant,
	status: PathStatus,
	lifetime: Duration,
	/// Data-plane frame counter for the upstream direction.
	counter: u64,
	on_ready: Option<OnReady>,
}

impl Path {
	pub(crate) fn new(
		hops: ArrayVec<PathHopConfig, MAX_HOPS>,
		lifetime: Duration,
		on_ready: Option<OnReady>,
	) -> Self {
		debug_assert!(!hops.is_empty());
		Path {
			hops,
			build_started: Instant::now(),
			status: PathStatus::Building,
			lifetime,
			counter: 0,
			on_ready,
		}
	}

	pub fn path_id(&self) -> &PathId {
		&self.first().path_id
	}

	/// The next hop from the initiator: where outgoing frames are handed to
	/// the transport.
	pub fn first_hop(&self) -> &RouterId {
		&self.first().rc.pubkey
	}

	pub fn status(&self) -> PathStatus {
		self.status
	}

	pub fn num_hops(&self) -> usize {
		self.hops.len()
	}

	fn first(&self) -> &PathHopConfig {
		self.hops.first().expect("a path has at least one hop")
	}

	pub(crate) fn farthest(&self) -> &PathHopConfig {
		self.hops.last().expect("a path has at least one hop")
	}

	/// Move to a new status. Progression is monotonic and terminal states
	/// are sticky; a stale transition is ignored.
	pub(crate) fn set_status(&mut self, status: PathStatus) -> bool {
		let allowed = match status {
			PathStatus::Building => false,
			PathStatus::Established => self.status == PathStatus::Building,
			PathStatus::Timeout => self.status == PathStatus::Building,
			PathStatus::Expired => !self.status.is_terminal(),
		};
		if allowed {
			self.status = status;
		}
		allowed
	}

	pub(crate) fn take_on_ready(&mut self) -> Option<OnReady> {
		self.on_ready.take()
	}

	pub(crate) fn age(&self, now: Instant) -> Duration {
		now.saturating_duration_since(self.build_started)
	}

	pub(crate) fn expired(&self, now: Instant) -> bool {
		self.age(now) > self.lifetime
	}

	pub(crate) fn build_deadline_exceeded(&self, now: Instant, deadline: Duration) -> bool {
		self.age(now) > deadline
	}

	pub(crate) fn evictable(&self, now: Instant, grace: Duration) -> bool {
		self.status.is_terminal() && self.age(now) > self.lifetime + grace
	}

	/// Wrap a payload for the upstream direction: fresh nonce, next counter,
	/// one encryption layer per hop, farthest first, so that each hop peels
	/// exactly one on the way up.
	pub(crate) fn encrypt_payload(
		&mut self,
		payload: &[u8],
		rng: &mut (impl Rng + CryptoRng),
	) -> Result<EncryptedFrame, Error> {
		let mut frame = EncryptedFrame::random(rng);
		frame.set_nonce(&rng.gen());
		frame.set_counter(self.counter);
		self.counter += 1;
		frame.write_payload(payload, rng)?;
		for hop in self.hops.iter().rev() {
			frame.apply_layer(&hop.shared);
		}
		Ok(frame)
	}

	/// Peel every layer off a downstream frame and recover the payload.
	pub(crate) fn decrypt_payload(&self, frame: &mut EncryptedFrame) -> Result<Vec<u8>, Error> {
		for hop in self.hops.iter() {
			frame.apply_layer(&hop.shared);
		}
		frame.read_payload().map(|p| p.to_vec())
	}
}

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

//! Relay-side forwarding state.
//!
//! A transit hop is installed by a validated commit and consulted on every
//! forwarded frame. The table is shared between network threads and the
//! build pipeline: a single mutex protects it, critical sections only touch
//! the map, and entries are copied out before any cipher work.

use crate::core::{
	crypto::SharedSecret,
	frame::EncryptedFrame,
	short_id,
	wire::{CommitRecord, DataMessage},
	PathId, RouterId, TunnelNonce, VERSION,
};
use crate::transport::Transport;
use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
	time::{Duration, Instant},
};

/// Key of a relay's forwarding entry. Two paths may share a path id only if
/// their neighbour pair differs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitHopInfo {
	pub path_id: PathId,
	/// Neighbour on the terminus side.
	pub upstream: RouterId,
	/// Neighbour on the initiator side.
	pub downstream: RouterId,
}

impl TransitHopInfo {
	pub fn new(downstream: RouterId, record: &CommitRecord) -> Self {
		TransitHopInfo { path_id: record.path_id, upstream: record.next_hop, downstream }
	}
}

/// Forwarding state for one path through this relay.
#[derive(Clone)]
pub struct TransitHop {
	pub info: TransitHopInfo,
	/// Shared secret with the initiator; this relay's onion layer.
	pub path_key: SharedSecret,
	/// Nonce from the commit record, bound into `path_key`.
	pub nonce: TunnelNonce,
	pub started: Instant,
	pub lifetime: Duration,
	pub version: u64,
	/// Frame counter for traffic this hop originates (terminus side).
	counter: Arc<AtomicU64>,
}

impl TransitHop {
	pub fn new(
		info: TransitHopInfo,
		path_key: SharedSecret,
		nonce: TunnelNonce,
		lifetime: Duration,
		version: u64,
	) -> Self {
		TransitHop {
			info,
			path_key,
			nonce,
			started: Instant::now(),
			lifetime,
			version,
			counter: Arc::new(AtomicU64::new(0)),
		}
	}

	pub fn expired(&self, now: Instant) -> bool {
		now.saturating_duration_since(self.started) > self.lifetime
	}

	pub(crate) fn next_counter(&self) -> u64 {
		self.counter.fetch_add(1, Ordering::Relaxed)
	}

	/// Remove or add this relay's layer; the transform is its own inverse.
	pub fn apply_layer(&self, frame: &mut EncryptedFrame) {
		frame.apply_layer(&self.path_key);
	}

	/// Forward data toward the terminus: apply our layer, hand to transport
	/// addressed to the upstream neighbour.
	pub fn forward_upstream(&self, mut frame: EncryptedFrame, transport: &dyn Transport) {
		self.apply_layer(&mut frame);
		log::trace!(
			target: "pathnet",
			"Forwarding frame on path {} up to {}",
			short_id(&self.info.path_id),
			short_id(&self.info.upstream),
		);
		let msg = DataMessage { path_id: self.info.path_id, frame, version: VERSION };
		transport.send_to(&self.info.upstream, msg.encode(true));
	}

	/// Forward data toward the initiator: apply our layer, hand to transport
	/// addressed to the downstream neighbour.
	pub fn forward_downstream(&self, mut frame: EncryptedFrame, transport: &dyn Transport) {
		self.apply_layer(&mut frame);
		log::trace!(
			target: "pathnet",
			"Forwarding frame on path {} down to {}",
			short_id(&self.info.path_id),
			short_id(&self.info.downstream),
		);
		let msg = DataMessage { path_id: self.info.path_id, frame, version: VERSION };
		transport.send_to(&self.info.downstream, msg.encode(false));
	}
}

/// Concurrent multimap of transit hops keyed by path id. Entries with the
/// same path id are disambiguated by their neighbour pair; the map hashes
/// path ids through the standard library's randomly keyed hasher.
pub struct TransitHopTable {
	hops: Mutex<HashMap<PathId, Vec<TransitHop>>>,
}

impl TransitHopTable {
	pub fn new() -> Self {
		TransitHopTable { hops: Mutex::new(HashMap::new()) }
	}

	/// Insert a hop. Idempotent: a hop with an identical info triple leaves
	/// the existing entry in place and returns false.
	pub fn put(&self, hop: TransitHop) -> bool {
		let mut hops = self.hops.lock().unwrap();
		let entries = hops.entry(hop.info.path_id).or_default();
		if entries.iter().any(|existing| existing.info == hop.info) {
			return false
		}
		entries.push(hop);
		true
	}

	/// Copy out every hop registered under a path id.
	pub fn lookup(&self, path_id: &PathId) -> Vec<TransitHop> {
		let hops = self.hops.lock().unwrap();
		hops.get(path_id).cloned().unwrap_or_default()
	}

	pub fn has(&self, info: &TransitHopInfo) -> bool {
		let hops = self.hops.lock().unwrap();
		hops.get(&info.path_id)
			.map_or(false, |entries| entries.iter().any(|hop| &hop.info == info))
	}

	pub fn len(&self) -> usize {
		let hops = self.hops.lock().unwrap();
		hops.values().map(|entries| entries.len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drop every hop past its lifetime. Returns how many were removed.
	pub fn expire(&self, now: Instant) -> usize {
		let mut hops = self.hops.lock().unwrap();
		let before: usize = hops.values().map(|entries| entries.len()).sum();
		hops.retain(|_, entries| {
			entries.retain(|hop| !hop.expired(now));
			!entries.is_empty()
		});
		let after: usize = hops.values().map(|entries| entries.len()).sum();
		before - after
	}
}

impl Default for TransitHopTable {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use rand::Rng;

	fn test_hop(path_id: PathId, upstream: RouterId, downstream: RouterId) -> TransitHop {
		let mut rng = rand::thread_rng();
		TransitHop::new(
			TransitHopInfo { path_id, upstream, downstream },
			SharedSecret::from_bytes(rng.gen()),
			rng.gen(),
			Duration::from_secs(600),
			0,
		)
	}

	#[test]
	fn put_is_idempotent_on_identical_info() {
		let table = TransitHopTable::new();
		let hop = test_hop([1; 16], [2; 32], [3; 32]);
		assert!(table.put(hop.clone()));
		assert!(!table.put(hop.clone()));
		assert_eq!(table.len(), 1);
		assert!(table.has(&hop.info));
	}

	#[test]
	fn same_path_id_with_different_neighbours_coexists() {
		let table = TransitHopTable::new();
		let a = test_hop([7; 16], [1; 32], [2; 32]);
		let b = test_hop([7; 16], [3; 32], [4; 32]);
		assert!(table.put(a.clone()));
		assert!(table.put(b.clone()));
		assert_eq!(table.lookup(&[7; 16]).len(), 2);
		assert!(table.has(&a.info));
		assert!(table.has(&b.info));
		assert!(table.lookup(&[8; 16]).is_empty());
	}

	#[test]
	fn expiry_is_a_sharp_boundary() {
		let table = TransitHopTable::new();
		let mut hop = test_hop([9; 16], [1; 32], [2; 32]);
		hop.lifetime = Duration::from_millis(1000);
		let started = hop.started;
		table.put(hop.clone());

		assert_eq!(table.expire(started + Duration::from_millis(999)), 0);
		assert!(table.has(&hop.info));
		assert_eq!(table.expire(started + Duration::from_millis(1001)), 1);
		assert!(!table.has(&hop.info));
		assert!(table.is_empty());
	}

	#[test]
	fn expire_only_removes_dead_entries() {
		let table = TransitHopTable::new();
		let mut old = test_hop([1; 16], [1; 32], [2; 32]);
		old.lifetime = Duration::from_millis(10);
		let fresh = test_hop([2; 16], [3; 32], [4; 32]);
		let started = old.started;
		table.put(old.clone());
		table.put(fresh.clone());

		assert_eq!(table.expire(started + Duration::from_millis(20)), 1);
		assert!(!table.has(&old.info));
		assert!(table.has(&fresh.info));
	}
}

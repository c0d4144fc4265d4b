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

//! Router-local path coordinator.
//!
//! Owns the paths this router built and the transit state it carries for
//! others, routes incoming relay messages to the right handler, and runs the
//! periodic expiry sweeps. Errors on the transit side are logged and the
//! offending message dropped; nothing is ever answered, so a relay cannot be
//! probed for what it knows.

use crate::core::{
	build::{self, BuildHandle},
	config::Config,
	crypto::{self, DerivedKeys},
	error::Error,
	frame::{EncryptedFrame, FRAME_KX_NONCE},
	path::{Path, PathStatus},
	short_id,
	transit::{TransitHop, TransitHopInfo, TransitHopTable},
	wire::{self, AckMessage, CommitMessage, DataMessage, Message, NextHop},
	PathId, PublicKey, RouterId, SecretKey, VERSION,
};
use crate::{
	exec::{Logic, Worker},
	transport::{EndpointHandler, RcStore, Transport},
};
use rand::Rng;
use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex,
	},
	time::{Duration, Instant},
};

pub struct PathContext {
	local_id: RouterId,
	secret_key: SecretKey,
	public_key: PublicKey,
	path_lifetime: Duration,
	ack_timeout: Duration,
	allow_transit: AtomicBool,
	owned: Mutex<HashMap<PathId, Path>>,
	transit: TransitHopTable,
	worker: Arc<dyn Worker>,
	logic: Arc<dyn Logic>,
	transport: Arc<dyn Transport>,
	rc_store: Arc<dyn RcStore>,
	endpoint: Arc<dyn EndpointHandler>,
}

impl PathContext {
	pub fn new(
		config: Config,
		worker: Arc<dyn Worker>,
		logic: Arc<dyn Logic>,
		transport: Arc<dyn Transport>,
		rc_store: Arc<dyn RcStore>,
		endpoint: Arc<dyn EndpointHandler>,
	) -> Arc<Self> {
		Arc::new(PathContext {
			local_id: config.local_id,
			secret_key: config.secret_key,
			public_key: config.public_key,
			path_lifetime: Duration::from_millis(config.path_lifetime_ms),
			ack_timeout: Duration::from_millis(config.ack_timeout_ms),
			allow_transit: AtomicBool::new(config.allow_transit),
			owned: Mutex::new(HashMap::new()),
			transit: TransitHopTable::new(),
			worker,
			logic,
			transport,
			rc_store,
			endpoint,
		})
	}

	pub fn local_id(&self) -> &RouterId {
		&self.local_id
	}

	pub fn public_key(&self) -> &PublicKey {
		&self.public_key
	}

	pub fn hop_is_us(&self, key: &RouterId) -> bool {
		key == &self.local_id
	}

	pub fn allow_transit(&self) {
		self.allow_transit.store(true, Ordering::Relaxed);
	}

	pub fn reject_transit(&self) {
		self.allow_transit.store(false, Ordering::Relaxed);
	}

	pub fn allowing_transit(&self) -> bool {
		self.allow_transit.load(Ordering::Relaxed)
	}

	pub(crate) fn worker(&self) -> &Arc<dyn Worker> {
		&self.worker
	}

	pub(crate) fn logic(&self) -> &Arc<dyn Logic> {
		&self.logic
	}

	pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}

	pub(crate) fn path_lifetime_ms(&self) -> u64 {
		self.path_lifetime.as_millis() as u64
	}

	////////////////////////////////////////////////////////////////////////
	// Initiator surface
	////////////////////////////////////////////////////////////////////////

	/// Build a path through the given routers, in order. The callback fires
	/// exactly once on the logic executor: with `Ok` when the farthest hop
	/// acks, with an error if the build fails or times out.
	pub fn build_path(
		self: &Arc<Self>,
		hops: &[RouterId],
		on_ready: impl FnOnce(Result<(), Error>) + Send + 'static,
	) -> Result<BuildHandle, Error> {
		let mut rcs = Vec::with_capacity(hops.len());
		for id in hops {
			rcs.push(self.rc_store.lookup_rc(id).ok_or(Error::NoPath(Some(*id)))?);
		}
		build::start(self.clone(), rcs, Box::new(on_ready))
	}

	/// Register a path once its build pipeline completes.
	pub fn add_own_path(&self, path: Path) {
		let mut owned = self.owned.lock().unwrap();
		owned.insert(*path.path_id(), path);
	}

	pub fn path_status(&self, path_id: &PathId) -> Option<PathStatus> {
		let owned = self.owned.lock().unwrap();
		owned.get(path_id).map(|path| path.status())
	}

	/// Onion-wrap a payload and hand it to the first hop. Paths past their
	/// lifetime (or that never established) refuse with [`Error::Expired`].
	pub fn encrypt_and_send(&self, path_id: &PathId, payload: &[u8]) -> Result<(), Error> {
		let (frame, first_hop) = {
			let mut owned = self.owned.lock().unwrap();
			let path = owned.get_mut(path_id).ok_or(Error::UnknownPath)?;
			if path.status().is_terminal() {
				return Err(Error::Expired)
			}
			(path.encrypt_payload(payload, &mut rand::thread_rng())?, *path.first_hop())
		};
		let msg = DataMessage { path_id: *path_id, frame, version: VERSION };
		self.transport.send_to(&first_hop, msg.encode(true));
		Ok(())
	}

	////////////////////////////////////////////////////////////////////////
	// Terminus surface
	////////////////////////////////////////////////////////////////////////

	/// Send a payload down a path that terminates at this router.
	pub fn send_downstream(&self, path_id: &PathId, payload: &[u8]) -> Result<(), Error> {
		let hops = self.transit.lookup(path_id);
		let hop = hops
			.iter()
			.find(|hop| self.hop_is_us(&hop.info.upstream))
			.ok_or(Error::UnknownPath)?;
		if hop.expired(Instant::now()) {
			return Err(Error::Expired)
		}
		let mut rng = rand::thread_rng();
		let mut frame = EncryptedFrame::random(&mut rng);
		frame.set_nonce(&rng.gen());
		frame.set_counter(hop.next_counter());
		frame.write_payload(payload, &mut rng)?;
		hop.forward_downstream(frame, &*self.transport);
		Ok(())
	}

	////////////////////////////////////////////////////////////////////////
	// Transit table
	////////////////////////////////////////////////////////////////////////

	pub fn put_transit_hop(&self, hop: TransitHop) -> bool {
		let inserted = self.transit.put(hop);
		if !inserted {
			log::trace!(target: "pathnet", "Transit hop already installed");
		}
		inserted
	}

	pub fn has_transit_hop(&self, info: &TransitHopInfo) -> bool {
		self.transit.has(info)
	}

	pub fn transit_hop_count(&self) -> usize {
		self.transit.len()
	}

	////////////////////////////////////////////////////////////////////////
	// Message dispatch
	////////////////////////////////////////////////////////////////////////

	/// Entry point for the message dispatcher: decode and route one message
	/// received from a neighbouring router. Malformed or unknown traffic is
	/// dropped without a reply.
	pub fn handle_message(&self, sender: RouterId, bytes: &[u8]) {
		match wire::decode_message(bytes) {
			Ok(Message::Commit(msg)) => self.handle_relay_commit(sender, msg),
			Ok(Message::Ack(msg)) => self.handle_relay_ack(sender, msg),
			Ok(Message::DataUpstream(msg)) => self.handle_relay_data(sender, msg, true),
			Ok(Message::DataDownstream(msg)) => self.handle_relay_data(sender, msg, false),
			Err(err) => {
				log::debug!(
					target: "pathnet",
					"Dropping undecodable message from {}: {}",
					short_id(&sender),
					err,
				);
			},
		}
	}

	/// Process a commit: find our frame, install transit state, and either
	/// ack (terminus) or pass the commit along with our slot re-randomised.
	pub fn handle_relay_commit(&self, sender: RouterId, mut msg: CommitMessage) {
		if msg.version != VERSION {
			log::debug!(target: "pathnet", "Commit with unsupported version {} from {}", msg.version, short_id(&sender));
			return
		}
		let mut found = None;
		for (idx, frame) in msg.frames.iter().enumerate() {
			let frame_shared =
				match crypto::dh_server(&frame.commit_key(), &self.secret_key, &FRAME_KX_NONCE) {
					Ok(shared) => shared,
					Err(_) => continue,
				};
			let mut candidate = frame.clone();
			if candidate.decrypt_commit_in_place(&DerivedKeys::new(&frame_shared)).is_err() {
				continue
			}
			match wire::CommitRecord::decode(candidate.commit_body()) {
				Ok(record) => {
					found = Some((idx, record));
					break
				},
				Err(err) => {
					log::debug!(
						target: "pathnet",
						"Commit frame from {} decrypted but did not parse: {}",
						short_id(&sender),
						err,
					);
					return
				},
			}
		}
		let Some((idx, record)) = found else {
			log::trace!(target: "pathnet", "Commit from {} not addressed to us", short_id(&sender));
			return
		};
		if record.version != VERSION {
			log::debug!(target: "pathnet", "Commit record with unsupported version {}", record.version);
			return
		}
		if record.enckey != self.public_key {
			log::debug!(target: "pathnet", "Commit record from {} echoes a foreign enckey", short_id(&sender));
			return
		}
		let shared = match crypto::dh_server(&record.commkey, &self.secret_key, &record.nonce) {
			Ok(shared) => shared,
			Err(err) => {
				log::warn!(target: "pathnet", "Path key exchange failed for commit from {}: {}", short_id(&sender), err);
				return
			},
		};

		let terminus = matches!(record.next(&self.local_id), NextHop::Terminus);
		let initiated = {
			let owned = self.owned.lock().unwrap();
			owned.contains_key(&record.path_id)
		};
		if !terminus && !initiated && !self.allowing_transit() {
			// Dropped without an answer, by policy.
			log::debug!(
				target: "pathnet",
				"{}: transit denied for path {} from {}",
				Error::PolicyDenied,
				short_id(&record.path_id),
				short_id(&sender),
			);
			return
		}

		let info = TransitHopInfo::new(sender, &record);
		let hop = TransitHop::new(
			info,
			shared.clone(),
			record.nonce,
			Duration::from_millis(record.lifetime_ms),
			record.version,
		);
		self.put_transit_hop(hop);
		log::debug!(
			target: "pathnet",
			"Installed transit hop for path {} (downstream {})",
			short_id(&record.path_id),
			short_id(&sender),
		);

		if terminus {
			let keys = DerivedKeys::new(&shared);
			let mac = crypto::compute_mac(keys.ack_mac_key(), &[&record.path_id, &record.nonce]);
			let ack = AckMessage {
				path_id: record.path_id,
				nonce: record.nonce,
				mac,
				version: VERSION,
			};
			log::debug!(target: "pathnet", "Terminus of path {}, acking", short_id(&record.path_id));
			self.transport.send_to(&sender, ack.encode());
		} else {
			msg.frames[idx].randomize(&mut rand::thread_rng());
			self.forward_commit(&record.next_hop, msg);
		}
	}

	fn forward_commit(&self, next_hop: &RouterId, msg: CommitMessage) {
		log::trace!(target: "pathnet", "Forwarding commit to {}", short_id(next_hop));
		self.transport.send_to(next_hop, msg.encode());
	}

	/// Process an ack: establish our own path if it came back from the
	/// farthest hop, otherwise pass it one hop further downstream.
	pub fn handle_relay_ack(&self, sender: RouterId, msg: AckMessage) {
		if msg.version != VERSION {
			log::debug!(target: "pathnet", "Ack with unsupported version {} from {}", msg.version, short_id(&sender));
			return
		}
		{
			let mut owned = self.owned.lock().unwrap();
			if let Some(path) = owned.get_mut(&msg.path_id) {
				if path.first_hop() != &sender {
					log::debug!(
						target: "pathnet",
						"Ack for path {} from unexpected neighbour {}",
						short_id(&msg.path_id),
						short_id(&sender),
					);
					return
				}
				let farthest = path.farthest();
				if msg.nonce != farthest.nonce {
					log::debug!(target: "pathnet", "Ack for path {} carries a stale nonce", short_id(&msg.path_id));
					return
				}
				let keys = DerivedKeys::new(&farthest.shared);
				if !crypto::mac_ok(&msg.mac, keys.ack_mac_key(), &[&msg.path_id, &msg.nonce]) {
					log::warn!(target: "pathnet", "Ack for path {} failed authentication", short_id(&msg.path_id));
					return
				}
				if path.set_status(PathStatus::Established) {
					log::debug!(target: "pathnet", "Path {} established", short_id(&msg.path_id));
					if let Some(on_ready) = path.take_on_ready() {
						self.logic.call_safe(Box::new(move || on_ready(Ok(()))));
					}
				} else {
					log::trace!(target: "pathnet", "Duplicate ack for path {} ignored", short_id(&msg.path_id));
				}
				return
			}
		}

		let mut forwarded = false;
		for hop in self.transit.lookup(&msg.path_id) {
			if hop.info.upstream == sender {
				log::trace!(
					target: "pathnet",
					"Relaying ack for path {} down to {}",
					short_id(&msg.path_id),
					short_id(&hop.info.downstream),
				);
				self.transport.send_to(&hop.info.downstream, msg.encode());
				forwarded = true;
			}
		}
		if !forwarded {
			log::trace!(target: "pathnet", "Ack for unknown path {}, dropped", short_id(&msg.path_id));
		}
	}

	/// Process a data frame travelling in either direction. Frames for
	/// unknown path ids are dropped producing no outgoing bytes.
	fn handle_relay_data(&self, sender: RouterId, msg: DataMessage, upstream: bool) {
		if msg.version != VERSION {
			log::debug!(target: "pathnet", "Data frame with unsupported version {} from {}", msg.version, short_id(&sender));
			return
		}
		if upstream {
			let hops = self.transit.lookup(&msg.path_id);
			let Some(hop) = hops.iter().find(|hop| hop.info.downstream == sender) else {
				log::trace!(target: "pathnet", "{} (upstream, from {})", Error::UnknownPath, short_id(&sender));
				return
			};
			if self.hop_is_us(&hop.info.upstream) {
				// We are the terminus; one last layer and the payload is
				// for our endpoint.
				let mut frame = msg.frame;
				hop.apply_layer(&mut frame);
				match frame.read_payload() {
					Ok(payload) => {
						log::trace!(
							target: "pathnet",
							"Delivering {} bytes from path {}",
							payload.len(),
							short_id(&msg.path_id),
						);
						self.endpoint.on_decrypted(&msg.path_id, payload.to_vec());
					},
					Err(_) => {
						log::debug!(target: "pathnet", "Garbled frame at terminus of path {}", short_id(&msg.path_id));
					},
				}
			} else {
				hop.forward_upstream(msg.frame, &*self.transport);
			}
		} else {
			let is_own = {
				let owned = self.owned.lock().unwrap();
				owned.contains_key(&msg.path_id)
			};
			if is_own {
				let payload = {
					let owned = self.owned.lock().unwrap();
					let Some(path) = owned.get(&msg.path_id) else { return };
					if path.status().is_terminal() {
						log::trace!(target: "pathnet", "Frame for dead path {}, dropped", short_id(&msg.path_id));
						return
					}
					if path.first_hop() != &sender {
						log::debug!(
							target: "pathnet",
							"Frame for path {} from unexpected neighbour {}",
							short_id(&msg.path_id),
							short_id(&sender),
						);
						return
					}
					let mut frame = msg.frame;
					match path.decrypt_payload(&mut frame) {
						Ok(payload) => payload,
						Err(_) => {
							log::debug!(target: "pathnet", "Garbled downstream frame on path {}", short_id(&msg.path_id));
							return
						},
					}
				};
				log::trace!(
					target: "pathnet",
					"Delivering {} bytes from path {}",
					payload.len(),
					short_id(&msg.path_id),
				);
				self.endpoint.on_decrypted(&msg.path_id, payload);
				return
			}

			let hops = self.transit.lookup(&msg.path_id);
			let Some(hop) = hops.iter().find(|hop| hop.info.upstream == sender) else {
				log::trace!(target: "pathnet", "{} (downstream, from {})", Error::UnknownPath, short_id(&sender));
				return
			};
			hop.forward_downstream(msg.frame, &*self.transport);
		}
	}

	////////////////////////////////////////////////////////////////////////
	// Expiry
	////////////////////////////////////////////////////////////////////////

	/// Called from the router's periodic tick.
	pub fn expire_paths(&self) {
		self.expire_paths_at(Instant::now());
	}

	pub fn expire_paths_at(&self, now: Instant) {
		let mut timed_out = Vec::new();
		{
			let mut owned = self.owned.lock().unwrap();
			owned.retain(|path_id, path| {
				if path.status() == PathStatus::Building &&
					path.build_deadline_exceeded(now, self.ack_timeout) &&
					path.set_status(PathStatus::Timeout)
				{
					log::debug!(target: "pathnet", "Path {} timed out waiting for ack", short_id(path_id));
					if let Some(on_ready) = path.take_on_ready() {
						timed_out.push(on_ready);
					}
				}
				if path.expired(now) && path.set_status(PathStatus::Expired) {
					log::debug!(target: "pathnet", "Path {} expired", short_id(path_id));
				}
				// Terminal paths linger for one more grace period so late
				// senders observe Expired rather than UnknownPath.
				!path.evictable(now, self.ack_timeout)
			});
		}
		for on_ready in timed_out {
			self.logic.call_safe(Box::new(move || on_ready(Err(Error::BuildTimeout))));
		}

		let removed = self.transit.expire(now);
		if removed > 0 {
			log::debug!(target: "pathnet", "Expired {} transit hops", removed);
		}
	}
}

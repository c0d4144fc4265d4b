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

//! Asynchronous path build pipeline.
//!
//! A build is a chain of worker-pool tasks, one per hop, processed strictly
//! in hop order: task `i` enqueues task `i + 1` on completion, so no two
//! hops of one path are ever in flight together and per-build memory stays
//! bounded to one hop. The final task hands off to the logic executor, which
//! registers the path and ships the commit. Abandoning a build just drops
//! the continuation; every stage checks the cancellation flag first.

use crate::core::{
	context::PathContext,
	crypto::{self, DerivedKeys},
	error::Error,
	frame::{EncryptedFrame, FRAME_KX_NONCE},
	path::{OnReady, Path, PathHopConfig},
	short_id,
	wire::{CommitMessage, CommitRecord},
	PathId, RouterContact, TunnelNonce, MAX_HOPS, VERSION,
};
use arrayvec::ArrayVec;
use rand::Rng;
use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

/// Handle returned to the caller of a build; lets the caller abandon the
/// path before completion.
#[derive(Debug)]
pub struct BuildHandle {
	path_id: PathId,
	cancelled: Arc<AtomicBool>,
}

impl BuildHandle {
	pub fn path_id(&self) -> &PathId {
		&self.path_id
	}

	/// Abandon the build. Pending stages become no-ops and the completion
	/// callback never fires.
	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::Relaxed);
	}
}

struct BuildState {
	rcs: Vec<RouterContact>,
	hops: ArrayVec<PathHopConfig, MAX_HOPS>,
	frames: Vec<EncryptedFrame>,
	path_id: PathId,
	lifetime_ms: u64,
	cancelled: Arc<AtomicBool>,
	on_ready: Option<OnReady>,
}

pub(crate) fn start(
	ctx: Arc<PathContext>,
	rcs: Vec<RouterContact>,
	on_ready: OnReady,
) -> Result<BuildHandle, Error> {
	if rcs.is_empty() {
		return Err(Error::NoPath(None))
	}
	if rcs.len() > MAX_HOPS {
		return Err(Error::TooManyHops)
	}
	let mut rng = rand::thread_rng();
	let path_id: PathId = rng.gen();
	// Every slot starts as random bytes; positions beyond the real hop
	// count stay that way, indistinguishable from ciphertext.
	let frames = (0..MAX_HOPS).map(|_| EncryptedFrame::random(&mut rng)).collect();
	let cancelled = Arc::new(AtomicBool::new(false));
	let state = BuildState {
		rcs,
		hops: ArrayVec::new(),
		frames,
		path_id,
		lifetime_ms: ctx.path_lifetime_ms(),
		cancelled: cancelled.clone(),
		on_ready: Some(on_ready),
	};
	log::debug!(target: "pathnet", "Starting build of path {} with {} hops", short_id(&path_id), state.rcs.len());
	let worker_ctx = ctx.clone();
	ctx.worker().submit(Box::new(move || key_exchange_step(worker_ctx, state)));
	Ok(BuildHandle { path_id, cancelled })
}

/// One hop's worth of CPU-bound work: keygen, key exchange, record encode,
/// frame encryption. Runs on the worker pool and enqueues its continuation.
fn key_exchange_step(ctx: Arc<PathContext>, mut state: BuildState) {
	if state.cancelled.load(Ordering::Relaxed) {
		log::trace!(target: "pathnet", "Build of path {} abandoned", short_id(&state.path_id));
		return
	}
	let idx = state.hops.len();
	let rc = state.rcs[idx].clone();
	let mut rng = rand::thread_rng();

	let (commkey, commkey_pub) = crypto::generate_encryption_keypair(&mut rng);
	let nonce: TunnelNonce = rng.gen();
	let shared = match crypto::dh_client(&rc.enckey, &commkey, &nonce) {
		Ok(shared) => shared,
		Err(err) => return fail(ctx, state, err),
	};
	let upstream = if idx + 1 < state.rcs.len() {
		state.rcs[idx + 1].pubkey
	} else {
		// The last hop names itself, marking the terminus.
		rc.pubkey
	};

	let record = CommitRecord {
		commkey: commkey_pub,
		enckey: rc.enckey,
		next_hop: upstream,
		lifetime_ms: state.lifetime_ms,
		nonce,
		path_id: state.path_id,
		next_rc: None,
		version: VERSION,
	};
	let frame = &mut state.frames[idx];
	if let Err(err) = record.encode_into(frame.commit_body_mut()) {
		return fail(ctx, state, err)
	}
	let frame_shared = match crypto::dh_client(&rc.enckey, &commkey, &FRAME_KX_NONCE) {
		Ok(shared) => shared,
		Err(err) => return fail(ctx, state, err),
	};
	frame.encrypt_commit_in_place(&commkey_pub, &DerivedKeys::new(&frame_shared));

	state.hops.push(PathHopConfig {
		path_id: state.path_id,
		rc,
		commkey,
		shared,
		upstream,
		nonce,
	});

	if state.hops.len() < state.rcs.len() {
		// Next hop.
		let worker_ctx = ctx.clone();
		ctx.worker().submit(Box::new(move || key_exchange_step(worker_ctx, state)));
	} else {
		// Farthest hop done; completion observes the logic thread's serial
		// order.
		let logic_ctx = ctx.clone();
		ctx.logic().call_safe(Box::new(move || finish(logic_ctx, state)));
	}
}

fn fail(ctx: Arc<PathContext>, mut state: BuildState, err: Error) {
	// Codec trouble is unrecoverable for this build and surfaces as a
	// reject; key exchange trouble keeps its own kind.
	let err = match err {
		Error::CryptoFailure => Error::CryptoFailure,
		_ => Error::BuildReject,
	};
	log::debug!(
		target: "pathnet",
		"Build of path {} failed at hop {}: {}",
		short_id(&state.path_id),
		state.hops.len(),
		err,
	);
	if let Some(on_ready) = state.on_ready.take() {
		ctx.logic().call_safe(Box::new(move || on_ready(Err(err))));
	}
}

fn finish(ctx: Arc<PathContext>, mut state: BuildState) {
	if state.cancelled.load(Ordering::Relaxed) {
		log::trace!(target: "pathnet", "Build of path {} abandoned before send", short_id(&state.path_id));
		return
	}
	let on_ready = state.on_ready.take();
	let path = Path::new(state.hops, Duration::from_millis(state.lifetime_ms), on_ready);
	let first_hop = *path.first_hop();
	let num_hops = path.num_hops();
	ctx.add_own_path(path);
	let msg = CommitMessage { frames: state.frames, version: VERSION };
	ctx.transport().send_to(&first_hop, msg.encode());
	log::debug!(
		target: "pathnet",
		"Built path {} over {} hops, commit sent to {}",
		short_id(&state.path_id),
		num_hops,
		short_id(&first_hop),
	);
}

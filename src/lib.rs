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

//! Path construction and transit core for an onion-routed overlay.
//!
//! An initiator builds a multi-hop circuit by performing a key exchange with
//! every relay on the route, producing one shared secret per hop. Relays keep
//! per-path forwarding state (transit hops) and move fixed-size frames up and
//! down established circuits, adding or removing one encryption layer each.
//! No relay learns more than its immediate neighbours on a path.
//!
//! This crate is network agnostic: the transport, the router-contact store and
//! the endpoint consumer are collaborator traits supplied by the embedder, as
//! are the two executors (a parallel worker pool for CPU-bound crypto and a
//! single-threaded logic executor that serialises state transitions).

pub mod core;
pub mod exec;
pub mod transport;

pub use crate::core::{
	build::BuildHandle,
	config::Config,
	context::PathContext,
	crypto::{generate_encryption_keypair, SharedSecret},
	error::Error,
	frame::EncryptedFrame,
	path::{Path, PathHopConfig, PathStatus},
	transit::{TransitHop, TransitHopInfo},
	PathId, PublicKey, RouterContact, RouterId, SecretKey, TunnelNonce, ACK_TIMEOUT_MS,
	DEFAULT_PATH_LIFETIME_MS, FRAME_SIZE, MAX_HOPS,
};
pub use exec::{Logic, LogicThread, Worker, WorkerPool};
pub use transport::{EndpointHandler, RcStore, Transport};

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

//! End-to-end path build and transit tests over an in-memory relay network.

use parking_lot::Mutex;
use pathnet::{
	core::wire::DataMessage,
	Config, EndpointHandler, Error, LogicThread, PathContext, PathId, PathStatus, RcStore,
	RouterContact, RouterId, Transport, TransitHopInfo, WorkerPool,
};
use rand::Rng;
use std::{
	collections::{HashMap, HashSet, VecDeque},
	sync::Arc,
	time::{Duration, Instant},
};

struct NetworkInner {
	queue: Mutex<VecDeque<(RouterId, RouterId, Vec<u8>)>>,
	relays: Mutex<HashMap<RouterId, Arc<PathContext>>>,
	blackholed: Mutex<HashSet<RouterId>>,
	sent: Mutex<HashMap<RouterId, usize>>,
}

/// In-memory datagram network between the test relays.
#[derive(Clone)]
struct Network(Arc<NetworkInner>);

impl Network {
	fn new() -> Self {
		Network(Arc::new(NetworkInner {
			queue: Mutex::new(VecDeque::new()),
			relays: Mutex::new(HashMap::new()),
			blackholed: Mutex::new(HashSet::new()),
			sent: Mutex::new(HashMap::new()),
		}))
	}

	fn register(&self, id: RouterId, ctx: Arc<PathContext>) {
		self.0.relays.lock().insert(id, ctx);
	}

	/// Messages addressed to `id` vanish.
	fn blackhole(&self, id: RouterId) {
		self.0.blackholed.lock().insert(id);
	}

	fn sent_by(&self, id: &RouterId) -> usize {
		self.0.sent.lock().get(id).copied().unwrap_or(0)
	}

	fn enqueue(&self, from: RouterId, to: RouterId, data: Vec<u8>) {
		*self.0.sent.lock().entry(from).or_insert(0) += 1;
		self.0.queue.lock().push_back((from, to, data));
	}

	/// Deliver queued messages until the network is quiet.
	fn process(&self) {
		loop {
			let next = self.0.queue.lock().pop_front();
			let Some((from, to, data)) = next else { break };
			if self.0.blackholed.lock().contains(&to) {
				continue
			}
			let ctx = self.0.relays.lock().get(&to).cloned();
			if let Some(ctx) = ctx {
				ctx.handle_message(from, &data);
			}
		}
	}

	/// Keep delivering until the condition holds or the deadline passes;
	/// build stages run on their own threads, so poll.
	fn process_until(&self, mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		loop {
			self.process();
			if cond() {
				return true
			}
			if Instant::now() > deadline {
				return false
			}
			std::thread::sleep(Duration::from_millis(5));
		}
	}
}

struct PeerTransport {
	from: RouterId,
	network: Network,
}

impl Transport for PeerTransport {
	fn send_to(&self, to: &RouterId, data: Vec<u8>) {
		self.network.enqueue(self.from, *to, data);
	}
}

struct MapRcStore(HashMap<RouterId, RouterContact>);

impl RcStore for MapRcStore {
	fn lookup_rc(&self, id: &RouterId) -> Option<RouterContact> {
		self.0.get(id).cloned()
	}
}

#[derive(Default)]
struct Endpoint {
	received: Mutex<Vec<(PathId, Vec<u8>)>>,
}

impl EndpointHandler for Endpoint {
	fn on_decrypted(&self, path_id: &PathId, payload: Vec<u8>) {
		self.received.lock().push((*path_id, payload));
	}
}

impl Endpoint {
	fn received(&self) -> Vec<(PathId, Vec<u8>)> {
		self.received.lock().clone()
	}
}

struct Relay {
	id: RouterId,
	ctx: Arc<PathContext>,
	endpoint: Arc<Endpoint>,
}

struct TestNetwork {
	network: Network,
	relays: Vec<Relay>,
	// Executors shared by every relay; dropped last.
	_worker: Arc<WorkerPool>,
	_logic: Arc<LogicThread>,
}

fn build_network(num_relays: usize, mut tweak: impl FnMut(usize, &mut Config)) -> TestNetwork {
	let _ = env_logger::try_init();
	let network = Network::new();
	let worker = Arc::new(WorkerPool::new(2));
	let logic = Arc::new(LogicThread::new());

	let configs: Vec<Config> = (0..num_relays)
		.map(|i| {
			let mut id: RouterId = [0; 32];
			id[0] = i as u8 + 1;
			let mut config = Config::new(id);
			tweak(i, &mut config);
			config
		})
		.collect();
	let contacts: HashMap<RouterId, RouterContact> = configs
		.iter()
		.map(|c| (c.local_id, RouterContact { pubkey: c.local_id, enckey: c.public_key }))
		.collect();

	let relays = configs
		.into_iter()
		.map(|config| {
			let id = config.local_id;
			let endpoint = Arc::new(Endpoint::default());
			let ctx = PathContext::new(
				config,
				worker.clone(),
				logic.clone(),
				Arc::new(PeerTransport { from: id, network: network.clone() }),
				Arc::new(MapRcStore(contacts.clone())),
				endpoint.clone(),
			);
			network.register(id, ctx.clone());
			Relay { id, ctx, endpoint }
		})
		.collect();

	TestNetwork { network, relays, _worker: worker, _logic: logic }
}

type BuildResult = Arc<Mutex<Option<Result<(), Error>>>>;

fn build_result_recorder() -> (BuildResult, impl FnOnce(Result<(), Error>) + Send + 'static) {
	let result: BuildResult = Arc::new(Mutex::new(None));
	let slot = result.clone();
	(result, move |r| *slot.lock() = Some(r))
}

#[test]
fn three_hop_build_and_round_trip() {
	let net = build_network(4, |_, _| ());
	let [initiator, r1, r2, r3] = &net.relays[..] else { unreachable!() };

	let (result, on_ready) = build_result_recorder();
	let handle = initiator.ctx.build_path(&[r1.id, r2.id, r3.id], on_ready).unwrap();
	let path_id = *handle.path_id();

	assert!(net
		.network
		.process_until(|| result.lock().is_some(), Duration::from_secs(5)));
	assert_eq!(*result.lock(), Some(Ok(())));
	assert_eq!(initiator.ctx.path_status(&path_id), Some(PathStatus::Established));

	// Exactly one transit hop per relay, each knowing only its neighbours.
	assert_eq!(initiator.ctx.transit_hop_count(), 0);
	for relay in [r1, r2, r3] {
		assert_eq!(relay.ctx.transit_hop_count(), 1);
	}
	assert!(r1.ctx.has_transit_hop(&TransitHopInfo {
		path_id,
		upstream: r2.id,
		downstream: initiator.id,
	}));
	assert!(r2.ctx.has_transit_hop(&TransitHopInfo {
		path_id,
		upstream: r3.id,
		downstream: r1.id,
	}));
	// The farthest hop points at itself: it knows it is the terminus.
	assert!(r3.ctx.has_transit_hop(&TransitHopInfo {
		path_id,
		upstream: r3.id,
		downstream: r2.id,
	}));

	// 100 bytes up to the terminus...
	let mut payload = vec![0u8; 100];
	rand::thread_rng().fill(&mut payload[..]);
	initiator.ctx.encrypt_and_send(&path_id, &payload).unwrap();
	net.network.process();
	assert_eq!(r3.endpoint.received(), vec![(path_id, payload)]);
	assert!(initiator.endpoint.received().is_empty());
	assert!(r1.endpoint.received().is_empty());
	assert!(r2.endpoint.received().is_empty());

	// ...and a reply back down, unchanged.
	let reply = b"reply payload from the terminus".to_vec();
	r3.ctx.send_downstream(&path_id, &reply).unwrap();
	net.network.process();
	assert_eq!(initiator.endpoint.received(), vec![(path_id, reply)]);
}

#[test]
fn single_hop_path_establishes_at_the_terminus() {
	let net = build_network(2, |_, _| ());
	let [initiator, r1] = &net.relays[..] else { unreachable!() };

	let (result, on_ready) = build_result_recorder();
	let handle = initiator.ctx.build_path(&[r1.id], on_ready).unwrap();

	assert!(net
		.network
		.process_until(|| result.lock().is_some(), Duration::from_secs(5)));
	assert_eq!(*result.lock(), Some(Ok(())));
	assert!(r1.ctx.has_transit_hop(&TransitHopInfo {
		path_id: *handle.path_id(),
		upstream: r1.id,
		downstream: initiator.id,
	}));
}

#[test]
fn frames_for_unknown_path_ids_are_silently_dropped() {
	let net = build_network(3, |_, _| ());
	let [_, r1, r2] = &net.relays[..] else { unreachable!() };

	let mut rng = rand::thread_rng();
	let msg = DataMessage {
		path_id: rng.gen(),
		frame: pathnet::EncryptedFrame::random(&mut rng),
		version: 0,
	};

	let before = net.network.sent_by(&r2.id);
	r2.ctx.handle_message(r1.id, &msg.encode(true));
	r2.ctx.handle_message(r1.id, &msg.encode(false));
	net.network.process();
	// Not a byte in response: an unknown path id must not be a probing
	// oracle.
	assert_eq!(net.network.sent_by(&r2.id), before);
}

#[test]
fn build_times_out_when_the_terminus_blackholes_commits() {
	let net = build_network(4, |i, config| {
		if i == 0 {
			config.ack_timeout_ms = 100;
		}
	});
	let [initiator, r1, r2, r3] = &net.relays[..] else { unreachable!() };
	net.network.blackhole(r3.id);

	let (result, on_ready) = build_result_recorder();
	let handle = initiator.ctx.build_path(&[r1.id, r2.id, r3.id], on_ready).unwrap();
	let path_id = *handle.path_id();

	// The commit stalls at the black hole; no ack ever comes back.
	assert!(net
		.network
		.process_until(|| r2.ctx.transit_hop_count() == 1, Duration::from_secs(5)));
	assert_eq!(initiator.ctx.path_status(&path_id), Some(PathStatus::Building));

	std::thread::sleep(Duration::from_millis(150));
	initiator.ctx.expire_paths();
	assert_eq!(initiator.ctx.path_status(&path_id), Some(PathStatus::Timeout));
	assert!(net
		.network
		.process_until(|| result.lock().is_some(), Duration::from_secs(5)));
	assert_eq!(*result.lock(), Some(Err(Error::BuildTimeout)));

	// Sends on a timed-out path are refused.
	assert_eq!(initiator.ctx.encrypt_and_send(&path_id, b"late"), Err(Error::Expired));
}

#[test]
fn disabled_transit_drops_commits_without_answering() {
	let net = build_network(4, |i, config| {
		if i == 0 {
			config.ack_timeout_ms = 100;
		}
		if i == 2 {
			config.allow_transit = false;
		}
	});
	let [initiator, r1, r2, r3] = &net.relays[..] else { unreachable!() };

	let (result, on_ready) = build_result_recorder();
	let handle = initiator.ctx.build_path(&[r1.id, r2.id, r3.id], on_ready).unwrap();
	let path_id = *handle.path_id();

	// The commit makes it through the first relay and dies at the second.
	assert!(net
		.network
		.process_until(|| r1.ctx.transit_hop_count() == 1, Duration::from_secs(5)));
	net.network.process();
	assert_eq!(r2.ctx.transit_hop_count(), 0);
	assert_eq!(r3.ctx.transit_hop_count(), 0);
	assert_eq!(net.network.sent_by(&r2.id), 0);

	std::thread::sleep(Duration::from_millis(150));
	initiator.ctx.expire_paths();
	assert!(net
		.network
		.process_until(|| result.lock().is_some(), Duration::from_secs(5)));
	assert_eq!(*result.lock(), Some(Err(Error::BuildTimeout)));
	assert_eq!(initiator.ctx.path_status(&path_id), Some(PathStatus::Timeout));
}

#[test]
fn terminus_commits_are_honoured_with_transit_disabled() {
	let net = build_network(3, |i, config| {
		if i == 2 {
			config.allow_transit = false;
		}
	});
	let [initiator, r1, r2] = &net.relays[..] else { unreachable!() };

	let (result, on_ready) = build_result_recorder();
	initiator.ctx.build_path(&[r1.id, r2.id], on_ready).unwrap();

	assert!(net
		.network
		.process_until(|| result.lock().is_some(), Duration::from_secs(5)));
	// The relay with transit disabled is the terminus here, so the commit
	// is honoured and the path establishes.
	assert_eq!(*result.lock(), Some(Ok(())));
	assert_eq!(r2.ctx.transit_hop_count(), 1);
}

#[test]
fn expiry_sweep_retires_paths_and_transit_state() {
	let net = build_network(3, |i, config| {
		config.path_lifetime_ms = 500;
		if i == 0 {
			config.ack_timeout_ms = 200;
		}
	});
	let [initiator, r1, r2] = &net.relays[..] else { unreachable!() };

	let (result, on_ready) = build_result_recorder();
	let handle = initiator.ctx.build_path(&[r1.id, r2.id], on_ready).unwrap();
	let path_id = *handle.path_id();

	assert!(net
		.network
		.process_until(|| result.lock().is_some(), Duration::from_secs(5)));
	assert_eq!(*result.lock(), Some(Ok(())));

	// Within the lifetime everything stays put.
	initiator.ctx.expire_paths();
	r1.ctx.expire_paths();
	assert_eq!(initiator.ctx.path_status(&path_id), Some(PathStatus::Established));
	assert_eq!(r1.ctx.transit_hop_count(), 1);

	std::thread::sleep(Duration::from_millis(600));
	initiator.ctx.expire_paths();
	r1.ctx.expire_paths();
	r2.ctx.expire_paths();
	assert_eq!(initiator.ctx.path_status(&path_id), Some(PathStatus::Expired));
	assert_eq!(r1.ctx.transit_hop_count(), 0);
	assert_eq!(r2.ctx.transit_hop_count(), 0);
	assert_eq!(initiator.ctx.encrypt_and_send(&path_id, b"too late"), Err(Error::Expired));
	assert_eq!(r2.ctx.send_downstream(&path_id, b"too late"), Err(Error::UnknownPath));

	// After a further grace period the path record itself is evicted.
	std::thread::sleep(Duration::from_millis(350));
	initiator.ctx.expire_paths();
	assert_eq!(initiator.ctx.path_status(&path_id), None);
}

#[test]
fn hop_resolution_failures_reject_the_build() {
	let net = build_network(2, |_, _| ());
	let [initiator, r1] = &net.relays[..] else { unreachable!() };

	let unknown: RouterId = [0xee; 32];
	let err = initiator.ctx.build_path(&[r1.id, unknown], |_| ()).unwrap_err();
	assert_eq!(err, Error::NoPath(Some(unknown)));

	let err = initiator.ctx.build_path(&[], |_| ()).unwrap_err();
	assert_eq!(err, Error::NoPath(None));

	let too_many = vec![r1.id; pathnet::MAX_HOPS + 1];
	let err = initiator.ctx.build_path(&too_many, |_| ()).unwrap_err();
	assert_eq!(err, Error::TooManyHops);
}

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

//! Executors the path core runs on.
//!
//! Two executors are assumed: a parallel worker pool for CPU-bound crypto
//! (keygen, key exchange, encode, encrypt) and a single-threaded logic
//! executor on which state transitions and user callbacks observe one serial
//! order. Both are traits so embedders can supply their own; the provided
//! implementations are plain threads fed from a channel.

use futures::{channel::mpsc, executor::block_on, StreamExt};
use std::{
	sync::{Arc, Mutex},
	thread,
};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Parallel executor for CPU-bound work.
pub trait Worker: Send + Sync {
	fn submit(&self, job: Job);
}

/// Single-threaded cooperative executor; everything submitted here runs in
/// one serial order.
pub trait Logic: Send + Sync {
	fn call_safe(&self, job: Job);
}

/// Thread-backed worker pool.
pub struct WorkerPool {
	tx: mpsc::UnboundedSender<Job>,
	threads: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
	pub fn new(num_threads: usize) -> Self {
		let (tx, rx) = mpsc::unbounded::<Job>();
		let rx = Arc::new(Mutex::new(rx));
		let threads = (0..num_threads.max(1))
			.map(|i| {
				let rx = rx.clone();
				thread::Builder::new()
					.name(format!("pathnet-worker-{}", i))
					.spawn(move || loop {
						// The lock is only held while waiting for a job;
						// jobs themselves run unlocked so the pool stays
						// parallel.
						let job = {
							let mut rx = rx.lock().unwrap();
							block_on(rx.next())
						};
						match job {
							Some(job) => job(),
							None => break,
						}
					})
					.expect("spawning a worker thread cannot fail under normal conditions")
			})
			.collect();
		WorkerPool { tx, threads }
	}
}

impl Worker for WorkerPool {
	fn submit(&self, job: Job) {
		if self.tx.unbounded_send(job).is_err() {
			log::error!(target: "pathnet", "Worker pool is shut down, dropping job.");
		}
	}
}

impl Drop for WorkerPool {
	fn drop(&mut self) {
		self.tx.close_channel();
		for handle in self.threads.drain(..) {
			let _ = handle.join();
		}
	}
}

/// Thread-backed logic executor.
pub struct LogicThread {
	tx: mpsc::UnboundedSender<Job>,
	thread: Option<thread::JoinHandle<()>>,
}

impl LogicThread {
	pub fn new() -> Self {
		let (tx, mut rx) = mpsc::unbounded::<Job>();
		let thread = thread::Builder::new()
			.name("pathnet-logic".into())
			.spawn(move || {
				while let Some(job) = block_on(rx.next()) {
					job();
				}
			})
			.expect("spawning the logic thread cannot fail under normal conditions");
		LogicThread { tx, thread: Some(thread) }
	}
}

impl Default for LogicThread {
	fn default() -> Self {
		Self::new()
	}
}

impl Logic for LogicThread {
	fn call_safe(&self, job: Job) {
		if self.tx.unbounded_send(job).is_err() {
			log::error!(target: "pathnet", "Logic executor is shut down, dropping call.");
		}
	}
}

impl Drop for LogicThread {
	fn drop(&mut self) {
		self.tx.close_channel();
		if let Some(handle) = self.thread.take() {
			let _ = handle.join();
		}
	}
}

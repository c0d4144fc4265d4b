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

//! Collaborator interfaces supplied by the embedder.

use crate::core::{PathId, RouterContact, RouterId};

/// Datagram delivery to a neighbouring router. Best effort, unordered,
/// unreliable at this layer.
pub trait Transport: Send + Sync {
	fn send_to(&self, to: &RouterId, data: Vec<u8>);
}

/// Lookup of router contacts by identity.
pub trait RcStore: Send + Sync {
	fn lookup_rc(&self, id: &RouterId) -> Option<RouterContact>;
}

/// Consumer of plaintext recovered from a path: the initiator's endpoint for
/// downstream traffic, the terminus endpoint for upstream traffic.
pub trait EndpointHandler: Send + Sync {
	fn on_decrypted(&self, path_id: &PathId, payload: Vec<u8>);
}

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

/// Error handling
use crate::core::{short_id, RouterId};
use std::fmt;

/// Path subsystem generic error.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
	/// A hop refused the commit or the build could not be assembled.
	BuildReject,
	/// Build deadline exceeded before the farthest hop acked.
	BuildTimeout,
	/// Key generation or key exchange failed.
	CryptoFailure,
	/// Record or message encoding/decoding failed.
	Codec,
	/// Frame or ack for a path id this router does not know.
	UnknownPath,
	/// Operation on a path past its lifetime.
	Expired,
	/// Transit requested on a router with transit disabled.
	PolicyDenied,
	/// No route material for the given router, or an empty hop list.
	NoPath(Option<RouterId>),
	/// More hops requested than the wire format supports.
	TooManyHops,
	/// Payload exceeds the capacity of a single frame.
	MessageTooLarge,
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::BuildReject => write!(f, "Path build rejected."),
			Error::BuildTimeout => write!(f, "Path build timed out."),
			Error::CryptoFailure => write!(f, "Key exchange or key generation failed."),
			Error::Codec => write!(f, "Record encoding or decoding failed."),
			Error::UnknownPath => write!(f, "Unknown path id."),
			Error::Expired => write!(f, "Path lifetime exceeded."),
			Error::PolicyDenied => write!(f, "Transit is disabled on this router."),
			Error::NoPath(r) => match r {
				Some(r) => write!(f, "No route material for router {}.", short_id(r)),
				None => write!(f, "Empty hop list."),
			},
			Error::TooManyHops => write!(f, "Too many hops for a single path."),
			Error::MessageTooLarge => write!(f, "Payload too large for a single frame."),
		}
	}
}

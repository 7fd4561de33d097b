//! The TCP core of the ethox network stack, usable on its own.
//!
//! ## Table of contents
//!
//! This is also a recommended reading order but feel free to skip ahead, each chapter tries to be
//! somewhat self-contained.
//!
//! 1. [Design](#design-and-relevant-core-concepts)
//! 2. [The wire module](wire/index.html)
//! 3. [The ip layer interface](layer/ip/index.html)
//! 4. [The tcp layer](layer/tcp/index.html)
//!    1. [Connection state](layer/tcp/struct.Connection.html)
//!    1. [Configuration](layer/tcp/struct.Config.html)
//!    1. [Timers](layer/tcp/struct.Timer.html)
//! 5. Internals
//!    1. [The storage module](storage/index.html)
//!    2. [Time](time/index.html)
//!
//! ## Design and relevant core concepts
//!
//! The crate contains the parts of a TCP implementation that have actual protocol state: the
//! connection state machine, the retransmission and persist machinery driven by a periodic
//! `tick`, and the congestion control bookkeeping shared by both. Everything below TCP is reached
//! through the [`IpLayer`] trait which only needs to move a finished segment to its destination.
//!
//! [`IpLayer`]: layer/ip/trait.IpLayer.html
//!
//! All connection state lives in one [`Endpoint`]. Every operation on it requires a mutable
//! reference, which is the only lock the stack needs: an inbound segment and a timer sweep can
//! never observe a connection in the middle of a transition. None of the operations block, a
//! segment is handed to the ip layer synchronously and the timers are polled against the clock
//! that the caller passes in.
//!
//! [`Endpoint`]: layer/tcp/struct.Endpoint.html
//!
//! Memory for connections is reserved upfront. The number of connection slots and the size of
//! each buffer is fixed when the endpoint is created, running out of either is reported to the
//! caller instead of growing.
#![warn(missing_docs)]
#![warn(unreachable_pub)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

extern crate alloc;

#[macro_use] mod macros;
pub mod layer;
pub mod storage;
pub mod time;
pub mod wire;

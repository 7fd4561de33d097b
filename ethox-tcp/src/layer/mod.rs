//! The process logic of protocol layers.
//!
//! ## Layering
//!
//! Each protocol layer is split into two parts; the packet logic contained in `wire` and the
//! processing part in this module. An endpoint represents the local state of a protocol. This
//! state can be used to process packets of that layer. The state is open to modifications as part
//! of a user program while processing does not take place, similar to reconfiguration on the OS
//! level with utilities such as `ss`, `sysctl`, etc.
//!
//! ## Receiving
//!
//! The tcp layer is handed every inbound segment together with the pseudo header of the ip
//! datagram that carried it. Segments that do not parse or fail the checksum are dropped before
//! any connection state is consulted.
//!
//! ## Sending
//!
//! Outbound segments are given to an implementation of [`ip::IpLayer`] synchronously, while the
//! endpoint is still borrowed. The ip layer may fail to deliver them, which the tcp layer treats
//! the same as a segment lost on the wire.
//!
//! [`ip::IpLayer`]: ip/trait.IpLayer.html
use core::fmt;

pub mod ip;
pub mod tcp;

/// The result type of layer operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The error type of layer operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The operation was not permitted.
    ///
    /// Returned when the connection is in a state that does not allow the operation, for example
    /// sending on a listening connection.
    Illegal,

    /// Not enough space for the requested packet.
    ///
    /// May also be returned when a buffer can not hold the requested length. In contrast to
    /// `Illegal` this would signal that a smaller size may be possible.
    BadSize,

    /// Unable to find a route towards the destination address.
    Unreachable,

    /// The action could not be completed because there were not enough resources.
    ///
    /// The main difference towards `Illegal` is that implies that it would have been legal with
    /// more resources. If you get this return value you may want to release closed connections or
    /// drain buffers and try again.
    Exhausted,

    /// The key does not refer to a live connection.
    ///
    /// Keys are invalidated when their connection slot is freed, even if the slot is reused.
    NotFound,

    /// The connection is closed.
    ///
    /// Returned when operating on a connection that was reset or timed out.
    Closed,
}

/// Can convert from a wire error.
///
/// This indicates some layer tried to operate on a packet but failed.
impl From<crate::wire::Error> for Error {
    fn from(_: crate::wire::Error) -> Self {
        Error::Illegal
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Illegal     => write!(f, "operation not permitted"),
            Error::BadSize     => write!(f, "bad buffer size"),
            Error::Unreachable => write!(f, "destination unreachable"),
            Error::Exhausted   => write!(f, "resources exhausted"),
            Error::NotFound    => write!(f, "no such connection"),
            Error::Closed      => write!(f, "connection closed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

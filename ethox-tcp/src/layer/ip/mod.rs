//! The IP layer interface.
//!
//! The tcp layer does not route, resolve neighbors or fragment. It needs exactly two services of
//! the network layer below it, expressed by the [`IpLayer`] trait:
//!
//! * Choosing the interface and local address to use towards a destination, when a connection is
//!   actively opened.
//! * Delivering one finished segment to the remote host, with a pseudo header describing the
//!   datagram that should carry it.
//!
//! Delivery is synchronous. The implementation may queue the datagram internally (for example
//! while a link-layer address is being resolved) but must not call back into the tcp layer. A
//! failed delivery is reported as an error and is otherwise treated exactly like a segment that
//! got lost on the wire.
//!
//! A [`Capture`] implementation records datagrams in memory instead of sending them, for tests and
//! for connecting two endpoints in the same process.
//!
//! [`IpLayer`]: trait.IpLayer.html
//! [`Capture`]: struct.Capture.html
use crate::wire::{self, IpAddress, IpProtocol};

mod capture;

pub use capture::{
    Capture,
    Datagram};

pub use super::{Error, Result};

/// Identifies a network interface of the ip layer.
///
/// The tcp layer treats this as an opaque handle. It is remembered for each connection and passed
/// back on every transmission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interface(pub usize);

/// The pseudo header of an upper layer datagram.
///
/// Describes the ip datagram for the purpose of the upper layer checksum. When sending, it
/// additionally tells the ip layer what datagram to build around the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PseudoHeader {
    /// The source address of the datagram.
    pub src_addr: IpAddress,
    /// The destination address of the datagram.
    pub dst_addr: IpAddress,
    /// The protocol of the payload.
    pub protocol: IpProtocol,
    /// The length of the payload, in octets.
    pub length: usize,
}

/// The services of the network layer used by tcp.
pub trait IpLayer {
    /// Choose the interface and local address for reaching `dst_addr`.
    ///
    /// Returns `Error::Unreachable` if there is no route towards the destination.
    fn select_source_addr(&mut self, dst_addr: IpAddress) -> Result<(Interface, IpAddress)>;

    /// Transmit one datagram.
    ///
    /// The payload is a complete segment with its checksum filled in. The call must not block. An
    /// error means the datagram was not sent, the caller relies on its own timers for retrying.
    fn send_datagram(
        &mut self,
        interface: Interface,
        header: &PseudoHeader,
        payload: &[u8],
        ttl: u8,
    ) -> Result<()>;
}

impl PseudoHeader {
    /// Create the pseudo header of a tcp segment.
    pub fn tcp(src_addr: IpAddress, dst_addr: IpAddress, length: usize) -> Self {
        PseudoHeader {
            src_addr,
            dst_addr,
            protocol: IpProtocol::Tcp,
            length,
        }
    }

    /// The pseudo header checksum, without the final complement.
    ///
    /// Fails if the addresses are not both of the same, specified family.
    pub fn checksum(&self) -> wire::Result<u16> {
        wire::ip::checksum::pseudo_header(
            &self.src_addr,
            &self.dst_addr,
            self.protocol,
            self.length as u32)
    }

    /// Calculate the complete upper layer checksum of `data`.
    ///
    /// The checksum field inside `data` must be zeroed for computing the value to fill in. A
    /// packet with a correct checksum yields `0`.
    pub fn upper_layer_checksum(&self, data: &[u8]) -> wire::Result<u16> {
        Ok(!wire::ip::checksum::combine(&[
            self.checksum()?,
            wire::ip::checksum::data(data),
        ]))
    }
}

impl<T: IpLayer + ?Sized> IpLayer for &'_ mut T {
    fn select_source_addr(&mut self, dst_addr: IpAddress) -> Result<(Interface, IpAddress)> {
        (**self).select_source_addr(dst_addr)
    }

    fn send_datagram(
        &mut self,
        interface: Interface,
        header: &PseudoHeader,
        payload: &[u8],
        ttl: u8,
    ) -> Result<()> {
        (**self).send_datagram(interface, header, payload, ttl)
    }
}

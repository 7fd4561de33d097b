//! An in-memory ip layer.
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::wire::{self, IpAddress, TcpChecksum, TcpPacket, TcpRepr};
use super::{Error, Interface, IpLayer, PseudoHeader, Result};

/// An ip layer that records all sent datagrams.
///
/// Has a single interface with a single address. Datagrams are kept in the order they were sent
/// until they are taken out. Delivery to another endpoint is up to the user, which allows
/// dropping, reordering or duplicating them on the way.
#[derive(Clone, Debug)]
pub struct Capture {
    interface: Interface,
    addr: IpAddress,
    sent: VecDeque<Datagram>,
    failing: bool,
}

/// One datagram recorded by `Capture`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    /// The interface it was sent on.
    pub interface: Interface,
    /// The pseudo header it was sent with.
    pub header: PseudoHeader,
    /// The complete upper layer payload.
    pub payload: Vec<u8>,
    /// The requested time-to-live.
    pub ttl: u8,
}

impl Capture {
    /// Create an ip layer with a single address.
    pub fn new(addr: IpAddress) -> Self {
        Capture {
            interface: Interface(0),
            addr,
            sent: VecDeque::new(),
            failing: false,
        }
    }

    /// The address of the single interface.
    pub fn address(&self) -> IpAddress {
        self.addr
    }

    /// Let all following transmissions fail, or succeed again.
    ///
    /// While failing, every `send_datagram` returns `Error::Unreachable`, just like a route or
    /// neighbor that is temporarily missing.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    /// Take the oldest recorded datagram.
    pub fn pop(&mut self) -> Option<Datagram> {
        self.sent.pop_front()
    }

    /// Take all recorded datagrams.
    pub fn take_all(&mut self) -> Vec<Datagram> {
        self.sent.drain(..).collect()
    }

    /// The number of recorded datagrams.
    pub fn len(&self) -> usize {
        self.sent.len()
    }

    /// Check if no datagrams were recorded.
    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

impl Datagram {
    /// Parse the tcp header of the datagram, verifying its checksum.
    pub fn repr(&self) -> wire::Result<TcpRepr> {
        TcpRepr::parse(&self.payload, TcpChecksum::Manual {
            src_addr: self.header.src_addr,
            dst_addr: self.header.dst_addr,
        })
    }

    /// The data carried by the tcp segment.
    pub fn tcp_payload(&self) -> wire::Result<&[u8]> {
        let header_len = TcpPacket::new_checked(&self.payload[..])?.header_len();
        Ok(&self.payload[usize::from(header_len)..])
    }
}

impl IpLayer for Capture {
    fn select_source_addr(&mut self, dst_addr: IpAddress) -> Result<(Interface, IpAddress)> {
        if !dst_addr.is_unicast() || !self.addr.same_family(&dst_addr) {
            return Err(Error::Unreachable);
        }

        Ok((self.interface, self.addr))
    }

    fn send_datagram(
        &mut self,
        interface: Interface,
        header: &PseudoHeader,
        payload: &[u8],
        ttl: u8,
    ) -> Result<()> {
        if self.failing {
            return Err(Error::Unreachable);
        }

        if header.length != payload.len() {
            return Err(Error::BadSize);
        }

        self.sent.push_back(Datagram {
            interface,
            header: *header,
            payload: payload.to_vec(),
            ttl,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{TcpFlags, TcpSeqNumber};

    fn segment(src: IpAddress, dst: IpAddress) -> (PseudoHeader, Vec<u8>) {
        let repr = TcpRepr {
            src_port: 1024,
            dst_port: 80,
            flags: TcpFlags::SYN,
            seq_number: TcpSeqNumber(7),
            ack_number: None,
            window_len: 64,
            max_seg_size: None,
            payload_len: 2,
        };
        let mut buffer = vec![0; repr.buffer_len()];
        let mut packet = TcpPacket::new_unchecked(&mut buffer[..]);
        repr.emit(&mut packet);
        packet.payload_mut_slice().copy_from_slice(b"hi");
        packet.fill_checksum(src, dst).unwrap();
        (PseudoHeader::tcp(src, dst, buffer.len()), buffer)
    }

    #[test]
    fn records_and_parses() {
        let here = IpAddress::v4(10, 0, 0, 1);
        let there = IpAddress::v4(10, 0, 0, 2);
        let mut ip = Capture::new(here);

        let (iface, src) = ip.select_source_addr(there).unwrap();
        assert_eq!(src, here);

        let (header, bytes) = segment(src, there);
        assert_eq!(header.upper_layer_checksum(&bytes), Ok(0));
        ip.send_datagram(iface, &header, &bytes, 64).unwrap();
        assert_eq!(ip.len(), 1);

        let datagram = ip.pop().unwrap();
        let repr = datagram.repr().unwrap();
        assert_eq!(repr.seq_number, TcpSeqNumber(7));
        assert_eq!(datagram.tcp_payload(), Ok(&b"hi"[..]));
        assert!(ip.is_empty());
    }

    #[test]
    fn failure_injection() {
        let here = IpAddress::v4(10, 0, 0, 1);
        let there = IpAddress::v4(10, 0, 0, 2);
        let mut ip = Capture::new(here);
        let (header, bytes) = segment(here, there);

        ip.set_failing(true);
        assert_eq!(ip.send_datagram(Interface(0), &header, &bytes, 64), Err(Error::Unreachable));
        assert!(ip.is_empty());

        ip.set_failing(false);
        assert_eq!(ip.send_datagram(Interface(0), &header, &bytes, 64), Ok(()));
        assert_eq!(ip.take_all().len(), 1);
    }

    #[test]
    fn no_route_to_other_family() {
        let mut ip = Capture::new(IpAddress::v4(10, 0, 0, 1));
        let v6 = IpAddress::v6(0xfe80, 0, 0, 0, 0, 0, 0, 1);
        assert_eq!(ip.select_source_addr(v6), Err(Error::Unreachable));
        assert_eq!(ip.select_source_addr(IpAddress::Unspecified), Err(Error::Unreachable));
    }
}

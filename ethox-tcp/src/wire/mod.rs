/*! Low-level packet access and construction.

# An overview over packet representations

The `wire` module deals with the packet *representation*. It provides two levels of
functionality.

 * First, it provides functions to extract fields from sequences of octets, and to insert fields
   into sequences of octets. This happens in the [`TcpPacket`] wrapper.
 * Second, it provides a compact, high-level representation of header data that can be created from
   parsing and emitted into a sequence of octets. This happens in [`TcpRepr`].

[`TcpPacket`]: struct.TcpPacket.html
[`TcpRepr`]: struct.TcpRepr.html

The `Packet` wrapper guarantees that, if the `Packet::check_len()` method returned `Ok(())`, then
no field accessor or setter method will panic. When parsing untrusted input, it is *necessary* to
use the checked constructor; so long as the buffer is not modified, no accessor will fail. When
emitting output, though, it is *incorrect* to use `Packet::new_checked()`; the length check is
likely to succeed on a zeroed buffer, but fail on a buffer filled with data from a previous packet.

In the `Repr` family of data structures, the `Repr::parse()` method never panics and the
`Repr::emit()` method never panics as long as the underlying buffer is exactly `Repr::buffer_len()`
octets long.

# Examples

To emit a TCP header into an octet buffer, and then parse it back:

```rust
use ethox_tcp::wire::*;
let src = IpAddress::v4(10, 0, 0, 1);
let dst = IpAddress::v4(10, 0, 0, 2);
let repr = TcpRepr {
    src_port: 49152,
    dst_port: 80,
    flags: TcpFlags::SYN,
    seq_number: TcpSeqNumber(100),
    ack_number: None,
    window_len: 2860,
    max_seg_size: Some(1430),
    payload_len: 0,
};
let mut buffer = vec![0; repr.buffer_len()];
{ // emission
    let mut packet = TcpPacket::new_unchecked(&mut buffer[..]);
    repr.emit(&mut packet);
    packet.fill_checksum(src, dst).unwrap();
}
{ // parsing
    let parsed = TcpRepr::parse(&buffer, TcpChecksum::Manual { src_addr: src, dst_addr: dst })
        .expect("malformed packet");
    assert_eq!(repr, parsed);
}
```
*/
// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// in large parts from `smoltcp` originally distributed under 0-clause BSD

mod field {
    pub(crate) type Field = ::core::ops::Range<usize>;
}

mod error;
pub(crate) mod ip;
mod ipv4;
mod ipv6;
mod tcp;

pub use self::error::{
    Error,
    Result};

pub use self::ip::{
    Protocol as IpProtocol,
    Address as IpAddress};

pub use self::ipv4::{
    Address as Ipv4Address};

pub use self::ipv6::{
    Address as Ipv6Address};

pub use self::tcp::{
    Checksum as TcpChecksum,
    SeqNumber as TcpSeqNumber,
    Packet as TcpPacket,
    TcpOption,
    Repr as TcpRepr,
    Flags as TcpFlags,
    HEADER_LEN as TCP_HEADER_LEN};

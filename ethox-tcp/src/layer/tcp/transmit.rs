//! Building and sending segments.
//!
//! All outgoing segments of a connection pass through here. Segments that occupy sequence space
//! are remembered in the retransmit queue so they can be resent unchanged later. The queue only
//! holds the segment metadata, the payload is refilled from the send buffer which keeps every byte
//! until it is acknowledged.
use alloc::collections::VecDeque;

use crate::layer::ip::{Interface, IpLayer, PseudoHeader};
use crate::layer::Result;
use crate::time::Instant;
use crate::wire::{TcpFlags, TcpPacket, TcpRepr, TcpSeqNumber};

use super::Config;
use super::connection::{Connection, State};
use super::endpoint::FourTuple;

/// A segment awaiting acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Queued {
    /// The sequence number of the segment.
    pub seq: TcpSeqNumber,

    /// The flags it was sent with, only SYN and FIN are relevant.
    pub flags: TcpFlags,

    /// The number of data octets it carries.
    pub data_len: usize,
}

/// The segments sent but not yet acknowledged, oldest first.
#[derive(Clone, Debug, Default)]
pub struct RetransmitQueue {
    segments: VecDeque<Queued>,
}

/// Parameters of a segment to send.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Emit {
    pub flags: TcpFlags,
    pub seq: TcpSeqNumber,
    pub ack: Option<TcpSeqNumber>,
    pub data_len: usize,
    /// Remember the segment for retransmission.
    pub queue: bool,
}

impl Queued {
    /// The amount of sequence space occupied by the segment.
    pub fn sequence_len(&self) -> usize {
        self.data_len + self.flags.sequence_len()
    }

    /// The sequence number following the segment.
    pub fn end(&self) -> TcpSeqNumber {
        self.seq + self.sequence_len()
    }
}

impl RetransmitQueue {
    /// The oldest unacknowledged segment.
    pub fn front(&self) -> Option<&Queued> {
        self.segments.front()
    }

    /// The number of queued segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Check if every sent segment was acknowledged.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterate the queued segments, oldest first.
    pub fn iter(&self) -> impl Iterator<Item=&Queued> + '_ {
        self.segments.iter()
    }

    pub(crate) fn push(&mut self, segment: Queued) {
        self.segments.push_back(segment);
    }

    pub(crate) fn clear(&mut self) {
        self.segments.clear();
    }

    /// Remove everything that `ack` covers.
    ///
    /// A partially acknowledged head segment is trimmed so that a retransmission only resends the
    /// missing part.
    pub(crate) fn acknowledge(&mut self, ack: TcpSeqNumber) {
        while let Some(head) = self.segments.front_mut() {
            if ack >= head.end() {
                self.segments.pop_front();
                continue;
            }

            if ack > head.seq {
                let mut covered = ack - head.seq;
                if head.flags.syn() {
                    head.flags.set_syn(false);
                    head.seq += 1;
                    covered -= 1;
                }
                head.seq += covered;
                head.data_len -= covered;
            }

            break;
        }
    }
}

/// Emit a complete segment and hand it to the ip layer.
///
/// The payload area of the segment is passed to `fill` before the checksum is calculated.
pub(crate) fn send_repr<I, F>(
    ip: &mut I,
    interface: Interface,
    tuple: &FourTuple,
    ttl: u8,
    repr: &TcpRepr,
    fill: F,
) -> Result<()>
    where I: IpLayer + ?Sized, F: FnOnce(&mut [u8])
{
    let mut buffer = alloc::vec![0; repr.buffer_len()];
    let mut packet = TcpPacket::new_unchecked(&mut buffer[..]);
    repr.emit(&mut packet);
    fill(packet.payload_mut_slice());
    packet.fill_checksum(tuple.local, tuple.remote)?;

    net_trace!("tcp: {}:{} -> {}:{} {}",
        tuple.local, tuple.local_port, tuple.remote, tuple.remote_port, repr);
    let header = PseudoHeader::tcp(tuple.local, tuple.remote, buffer.len());
    ip.send_datagram(interface, &header, &buffer, ttl)
}

impl Connection {
    fn repr_for(&mut self, flags: TcpFlags, seq: TcpSeqNumber, ack: Option<TcpSeqNumber>, data_len: usize)
        -> TcpRepr
    {
        let max_seg_size = if flags.syn() {
            Some(self.receiver_maximum_segment_size.min(u32::from(u16::max_value())) as u16)
        } else {
            None
        };
        let window = self.recv.window.min(u32::from(u16::max_value()));
        self.recv.advertised = window;

        TcpRepr {
            src_port: self.tuple.local_port,
            dst_port: self.tuple.remote_port,
            flags,
            seq_number: seq,
            ack_number: ack,
            window_len: window as u16,
            max_seg_size,
            payload_len: data_len as u16,
        }
    }

    /// Send a segment whose data is taken from the send buffer at its sequence number.
    fn emit_buffered<I>(&mut self, ip: &mut I, flags: TcpFlags, seq: TcpSeqNumber, ack: Option<TcpSeqNumber>, data_len: usize, ttl: u8)
        -> Result<()>
        where I: IpLayer + ?Sized
    {
        let repr = self.repr_for(flags, seq, ack, data_len);
        let data_start = seq + flags.syn() as usize;
        let offset = data_start.since(self.send.buffered).unwrap_or(0);
        let tx = &self.tx;
        send_repr(ip, self.interface, &self.tuple, ttl, &repr, |payload| {
            tx.read_at(offset, payload);
        })
    }

    /// Send one segment, optionally remembering it for retransmission.
    ///
    /// A queued segment arms the retransmission timer if nothing else was outstanding and starts
    /// a round trip sample if none is running. The segment is queued even if the ip layer fails to
    /// send it, the retransmission timer then recovers it.
    pub(crate) fn send_segment<I>(&mut self, ip: &mut I, emit: Emit, config: &Config, now: Instant)
        -> Result<()>
        where I: IpLayer + ?Sized
    {
        let sequence_len = emit.data_len + emit.flags.sequence_len();
        if emit.queue && sequence_len > 0 {
            if self.retransmit.is_empty() {
                self.timers.retransmit.start(now, self.rtt.rto);
            }
            self.retransmit.push(Queued {
                seq: emit.seq,
                flags: emit.flags,
                data_len: emit.data_len,
            });
            self.rtt.start(emit.seq + sequence_len, now);
        }

        self.emit_buffered(ip, emit.flags, emit.seq, emit.ack, emit.data_len, config.ttl)
    }

    /// Resend the head of the retransmit queue.
    ///
    /// Sequence number, control flags and payload are the same as on the first transmission, only
    /// the acknowledgement and window are current. The round trip sample is abandoned.
    pub(crate) fn retransmit_segment<I>(&mut self, ip: &mut I, config: &Config) -> Result<()>
        where I: IpLayer + ?Sized
    {
        let head = match self.retransmit.front() {
            Some(head) => *head,
            None => return Ok(()),
        };

        self.rtt.clear();
        let ack = if self.current.is_synchronized() {
            Some(self.recv.next)
        } else {
            None
        };

        net_debug!("tcp: retransmit {} len {} {}", head.seq, head.data_len, head.flags);
        self.emit_buffered(ip, head.flags, head.seq, ack, head.data_len, config.ttl)
    }

    /// Send our SYN, with an acknowledgement for a passive open.
    pub(crate) fn send_syn<I>(&mut self, ip: &mut I, config: &Config, now: Instant) -> Result<()>
        where I: IpLayer + ?Sized
    {
        let seq = self.send.initial_seq;
        let ack = if self.current == State::SynReceived {
            Some(self.recv.next)
        } else {
            None
        };
        self.send.next = seq + 1;
        self.send_segment(ip, Emit {
            flags: TcpFlags::SYN,
            seq,
            ack,
            data_len: 0,
            queue: true,
        }, config, now)
    }

    /// Send a segment without data acknowledging everything received.
    pub(crate) fn send_ack<I>(&mut self, ip: &mut I, config: &Config) -> Result<()>
        where I: IpLayer + ?Sized
    {
        let repr = self.repr_for(TcpFlags::default(), self.send.next, Some(self.recv.next), 0);
        send_repr(ip, self.interface, &self.tuple, config.ttl, &repr, |_| ())
    }

    /// Reset the connection on the remote end.
    pub(crate) fn send_reset<I>(&mut self, ip: &mut I, config: &Config) -> Result<()>
        where I: IpLayer + ?Sized
    {
        let repr = self.repr_for(TcpFlags::RST, self.send.next, None, 0);
        send_repr(ip, self.interface, &self.tuple, config.ttl, &repr, |_| ())
    }

    /// Send a zero window probe.
    ///
    /// The probe carries a single octet at `SND.NXT - 1`, which the receiver has already seen and
    /// must answer with its current window. It is not queued for retransmission. The octet is
    /// taken from the send buffer if still present, any value is acceptable otherwise.
    pub(crate) fn send_probe<I>(&mut self, ip: &mut I, config: &Config) -> Result<()>
        where I: IpLayer + ?Sized
    {
        let seq = self.send.next - 1;
        let repr = self.repr_for(TcpFlags::default(), seq, Some(self.recv.next), 1);
        let offset = seq.since(self.send.buffered);
        let tx = &self.tx;
        net_debug!("tcp: window probe at {}", seq);
        send_repr(ip, self.interface, &self.tuple, config.ttl, &repr, |payload| {
            match offset {
                Some(offset) => { tx.read_at(offset, payload); },
                None => payload.iter_mut().for_each(|b| *b = 0),
            }
        })
    }

    /// Send `len` new octets of buffered data at `SND.NXT`.
    ///
    /// The sequence space is consumed even if sending fails, the segment is already queued.
    pub(crate) fn send_data<I>(&mut self, ip: &mut I, len: usize, config: &Config, now: Instant)
        -> Result<()>
        where I: IpLayer + ?Sized
    {
        let seq = self.send.next;
        let ack = Some(self.recv.next);
        let result = self.send_segment(ip, Emit {
            flags: TcpFlags::PSH,
            seq,
            ack,
            data_len: len,
            queue: true,
        }, config, now);
        self.send.next += len;
        self.send.unsent -= len;
        result
    }

    /// Send as much buffered data as the windows allow, then the FIN if it is due.
    ///
    /// Returns the number of segments that were handed to the ip layer.
    pub(crate) fn transmit<I>(&mut self, ip: &mut I, config: &Config, now: Instant) -> usize
        where I: IpLayer + ?Sized
    {
        if !self.current.may_transmit() {
            return 0;
        }

        let smss = self.sender_maximum_segment_size as usize;
        let mut sent = 0;
        while self.send.unsent > 0 {
            let usable = self.usable_window();
            if usable == 0 {
                break;
            }

            let len = usable.min(self.send.unsent).min(smss);
            // Nagle, hold back small segments while anything is unacknowledged.
            if config.nagle && !self.send.fin_queued && len < smss && self.flight_size() > 0 {
                if !self.timers.sws_override.is_running() {
                    self.timers.sws_override.start(now, config.override_timeout);
                }
                break;
            }

            sent += 1;
            if let Err(err) = self.send_data(ip, len, config, now) {
                net_debug!("tcp: sending data failed: {}", err);
                break;
            }
        }

        if self.send.unsent == 0 {
            self.timers.sws_override.stop();
        }

        let fin_due = self.send.fin_queued
            && !self.send.fin_sent
            && self.send.unsent == 0;
        match self.current {
            State::FinWait1 | State::LastAck if fin_due => {
                let seq = self.send.next;
                let ack = Some(self.recv.next);
                if let Err(err) = self.send_segment(ip, Emit {
                    flags: TcpFlags::FIN,
                    seq,
                    ack,
                    data_len: 0,
                    queue: true,
                }, config, now) {
                    net_debug!("tcp: sending fin failed: {}", err);
                }
                self.send.next += 1;
                self.send.fin_sent = true;
                sent += 1;
            },
            _ => (),
        }

        self.update_persist(config, now);
        sent
    }
}

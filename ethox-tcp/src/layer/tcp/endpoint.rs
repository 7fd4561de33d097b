//! Contains main TCP handling.
//!
//! Relevant material for reading:
//! Main TCP rfc (skip if confident): https://tools.ietf.org/html/rfc793
//! Errata and comments: https://tools.ietf.org/html/rfc1122#section-4.2
//!     Notably still assuming some good-faith on hosts
//! RST handling specifically: https://www.snellman.net/blog/archive/2016-02-01-tcp-rst/
//!     OS comparison in particular
use alloc::vec::Vec;

use crate::layer::{Error, Result};
use crate::layer::ip::{Interface, IpLayer, PseudoHeader};
use crate::time::{Expiration, Instant};
use crate::wire::{IpAddress, TcpChecksum, TcpPacket, TcpRepr};

use super::Config;
use super::connection::{Connection, State, UserSignals};
use super::fsm::{reset_for, Answer, Segment, Signals};
use super::siphash::{IsnGenerator, IsnSource};
use super::transmit::send_repr;

/// Handles TCP connection states.
///
/// Owns a fixed number of connection slots and the generator for initial sequence numbers. All
/// operations, inbound segments and the timer sweep require exclusive access, which serializes
/// every mutation of every connection.
pub struct Endpoint<G = IsnGenerator> {
    config: Config,
    slots: Vec<Slot>,
    isn: G,
    next_port: u16,
}

/// The addresses and ports identifying a connection, from the local point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourTuple {
    /// The local address.
    pub local: IpAddress,
    /// The remote address.
    pub remote: IpAddress,
    /// The local port.
    pub local_port: u16,
    /// The remote port.
    pub remote_port: u16,
}

/// A connection slot.
///
/// Usage of this acts similar to a slotmap where a dedicated `SlotKey` allows referring to a
/// connection outside of its lifetime without introducing lifetime-tracked references and
/// dependencies.
#[derive(Clone, Debug, Default)]
struct Slot {
    generation: u32,
    connection: Option<Connection>,
}

/// The index of a connection.
///
/// Useful for storing in other structs to reference the connection at another point in time. Note
/// that the index will be invalidated when the connection itself is freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotKey {
    idx: usize,
    generation: u32,
}

impl<G: IsnSource> Endpoint<G> {
    /// Create an endpoint with room for `slots` connections.
    ///
    /// Listening connections and connections spawned by them occupy a slot each.
    pub fn new(slots: usize, config: Config, isn: G) -> Self {
        let mut storage = Vec::with_capacity(slots);
        storage.resize_with(slots, Slot::default);
        Endpoint {
            config,
            slots: storage,
            isn,
            next_port: config.ephemeral_port_min,
        }
    }

    /// The configuration shared by all connections.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens a new port for listening.
    ///
    /// An unspecified local address accepts connection requests to any address. At most `backlog`
    /// spawned connections wait to be accepted at any time, further requests are dropped.
    pub fn listen(&mut self, local: IpAddress, port: u16, backlog: usize) -> Result<SlotKey> {
        if port == 0 {
            return Err(Error::Illegal);
        }

        let taken = self.connections().any(|(_, conn)| {
            conn.current == State::Listen
                && conn.tuple.local_port == port
                && conn.tuple.local == local
        });
        if taken {
            return Err(Error::Illegal);
        }

        let idx = self.free_slot().ok_or(Error::Exhausted)?;
        let tuple = FourTuple {
            local,
            local_port: port,
            // Filled by the remote connection attempt.
            remote: IpAddress::Unspecified,
            remote_port: 0,
        };
        let mut conn = Connection::new(tuple, Interface::default(), &self.config, Default::default());
        conn.current = State::Listen;
        conn.owned = true;
        conn.backlog = backlog;
        net_debug!("tcp: listening on {}:{}", local, port);
        Ok(self.insert(idx, conn))
    }

    /// Take a connection spawned by a listener that reached the established state.
    ///
    /// Returns `Ok(None)` if there is none yet. The accepted connection is owned by the caller
    /// from now on.
    pub fn accept(&mut self, listener: SlotKey) -> Result<Option<SlotKey>> {
        if self.get(listener)?.current != State::Listen {
            return Err(Error::Illegal);
        }

        let found = self.connections().find(|(_, conn)| {
            conn.listener == Some(listener)
                && !conn.owned
                && (conn.current == State::Established || conn.current == State::CloseWait)
        }).map(|(key, _)| key);

        let key = match found {
            Some(key) => key,
            None => return Ok(None),
        };
        let conn = self.get_mut(key)?;
        conn.owned = true;
        conn.listener = None;
        Ok(Some(key))
    }

    /// Actively open a connection.
    ///
    /// Selects the local address through the ip layer and sends the SYN right away. A SYN that
    /// could not be sent is retried by the retransmission timer.
    pub fn connect<I>(&mut self, ip: &mut I, remote: IpAddress, port: u16, now: Instant)
        -> Result<SlotKey>
        where I: IpLayer + ?Sized
    {
        if port == 0 {
            return Err(Error::Illegal);
        }

        let (interface, local) = ip.select_source_addr(remote)?;
        let idx = self.free_slot().ok_or(Error::Exhausted)?;
        let local_port = self.ephemeral_port(local).ok_or(Error::Exhausted)?;
        let tuple = FourTuple {
            local,
            remote,
            local_port,
            remote_port: port,
        };

        let config = self.config;
        let iss = self.isn.initial_seq_num(tuple, now);
        let mut conn = Connection::new(tuple, interface, &config, iss);
        conn.owned = true;
        conn.change_state(State::SynSent, &config, now);
        if let Err(err) = conn.send_syn(ip, &config, now) {
            net_debug!("tcp: sending syn failed: {}", err);
        }
        Ok(self.insert(idx, conn))
    }

    /// Write data into the send buffer and transmit what the windows allow.
    ///
    /// Returns the number of octets buffered, which may be less than given. Fails with
    /// `Exhausted` if the buffer is full.
    pub fn send<I>(&mut self, ip: &mut I, key: SlotKey, data: &[u8], now: Instant)
        -> Result<usize>
        where I: IpLayer + ?Sized
    {
        let config = self.config;
        let conn = self.get_mut(key)?;
        match conn.current {
            State::Closed => return Err(Error::Closed),
            state if !state.may_send() => return Err(Error::Illegal),
            _ => (),
        }

        let buffered = conn.tx.enqueue_slice(data);
        if buffered == 0 && !data.is_empty() {
            return Err(Error::Exhausted);
        }

        conn.send.unsent += buffered;
        conn.transmit(ip, &config, now);
        Ok(buffered)
    }

    /// Read received data.
    ///
    /// Returns `Ok(0)` if nothing is available, `recv.fin_received` of the connection tells if
    /// more can follow. Sends a window update when reading opened the window considerably.
    pub fn recv<I>(&mut self, ip: &mut I, key: SlotKey, buf: &mut [u8], now: Instant)
        -> Result<usize>
        where I: IpLayer + ?Sized
    {
        let config = self.config;
        let conn = self.get_mut(key)?;
        if conn.current == State::Listen {
            return Err(Error::Illegal);
        }

        let read = conn.rx.dequeue_slice(buf);
        if read == 0 && conn.current == State::Closed {
            return Err(Error::Closed);
        }

        conn.update_recv_window();
        let threshold = (conn.receiver_maximum_segment_size as usize)
            .min(conn.rx.capacity() / 2)
            .max(1);
        let opened = conn.recv.window.saturating_sub(conn.recv.advertised) as usize;
        if read > 0 && conn.current.may_receive() && opened >= threshold {
            net_trace!("tcp: window update {} at {}", conn.recv.window, now);
            if let Err(err) = conn.send_ack(ip, &config) {
                net_debug!("tcp: sending window update failed: {}", err);
            }
        }
        Ok(read)
    }

    /// Close the connection gracefully.
    ///
    /// Buffered data is still sent, followed by a FIN. Closing a listener also aborts all the
    /// connections it spawned that were not yet accepted.
    pub fn close<I>(&mut self, ip: &mut I, key: SlotKey, now: Instant) -> Result<()>
        where I: IpLayer + ?Sized
    {
        let config = self.config;
        let conn = self.get_mut(key)?;
        match conn.current {
            State::Closed => return Err(Error::Closed),
            State::Listen => {
                conn.change_state(State::Closed, &config, now);
                self.abort_children(ip, key, now);
            },
            State::SynSent => conn.change_state(State::Closed, &config, now),
            State::SynReceived | State::Established => {
                conn.send.fin_queued = true;
                conn.change_state(State::FinWait1, &config, now);
                conn.transmit(ip, &config, now);
            },
            State::CloseWait => {
                conn.send.fin_queued = true;
                conn.change_state(State::LastAck, &config, now);
                conn.transmit(ip, &config, now);
            },
            // Already closing.
            _ => (),
        }
        self.reap(key.idx);
        Ok(())
    }

    /// Abort the connection, resetting the remote.
    pub fn abort<I>(&mut self, ip: &mut I, key: SlotKey, now: Instant) -> Result<()>
        where I: IpLayer + ?Sized
    {
        let config = self.config;
        let conn = self.get_mut(key)?;
        let was = conn.current;
        if was.is_synchronized() {
            if let Err(err) = conn.send_reset(ip, &config) {
                net_debug!("tcp: sending reset failed: {}", err);
            }
        }
        conn.change_state(State::Closed, &config, now);
        if was == State::Listen {
            self.abort_children(ip, key, now);
        }
        self.reap(key.idx);
        Ok(())
    }

    /// Drop the application reference to a connection.
    ///
    /// The key is invalid afterwards. A closed connection is freed immediately, any other is freed
    /// once it reaches the closed state. Call `close` or `abort` first, a connection that was left
    /// open stays open until the remote closes it.
    pub fn release(&mut self, key: SlotKey) -> Result<()> {
        let conn = self.get_mut(key)?;
        conn.owned = false;
        self.reap(key.idx);
        Ok(())
    }

    /// The state of a connection.
    pub fn state(&self, key: SlotKey) -> Result<State> {
        self.get(key).map(Connection::state)
    }

    /// Inspect a connection.
    pub fn connection(&self, key: SlotKey) -> Result<&Connection> {
        self.get(key)
    }

    /// Take the events that occurred on a connection since the last call.
    pub fn take_signals(&mut self, key: SlotKey) -> Result<UserSignals> {
        let conn = self.get_mut(key)?;
        Ok(core::mem::take(&mut conn.signals))
    }

    /// The earliest instant at which `tick` has work to do.
    pub fn poll_at(&self, now: Instant) -> Expiration {
        self.connections()
            .map(|(_, conn)| conn.poll_at(now))
            .fold(Expiration::Never, |acc, next| acc.earliest(next, now))
    }

    /// Iterate over all connections.
    pub fn connections(&self) -> impl Iterator<Item=(SlotKey, &Connection)> + '_ {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| {
            let key = SlotKey { idx, generation: slot.generation };
            slot.connection.as_ref().map(|conn| (key, conn))
        })
    }

    /// Process one inbound segment.
    ///
    /// The pseudo header describes the ip datagram that carried it, as seen by the receiver.
    /// Segments that do not parse or fail their checksum are dropped. Everything else is answered
    /// by the matching connection, or with a reset if there is none.
    pub fn process_segment<I>(
        &mut self,
        ip: &mut I,
        interface: Interface,
        header: &PseudoHeader,
        segment: &[u8],
        now: Instant,
    )
        where I: IpLayer + ?Sized
    {
        let checksum = TcpChecksum::Manual {
            src_addr: header.src_addr,
            dst_addr: header.dst_addr,
        };
        let repr = match TcpRepr::parse(segment, checksum) {
            Ok(repr) => repr,
            Err(err) => {
                net_debug!("tcp: dropping segment from {}: {}", header.src_addr, err);
                return;
            },
        };
        let header_len = usize::from(TcpPacket::new_unchecked(segment).header_len());
        let segment = Segment {
            repr,
            payload: segment.get(header_len..).unwrap_or(&[]),
        };
        let tuple = FourTuple {
            local: header.dst_addr,
            remote: header.src_addr,
            local_port: repr.dst_port,
            remote_port: repr.src_port,
        };
        net_trace!("tcp: {}:{} <- {}:{} {}",
            tuple.local, tuple.local_port, tuple.remote, tuple.remote_port, repr);

        let config = self.config;
        if let Some(idx) = self.find_connection(&tuple) {
            if let Some(conn) = self.slots[idx].connection.as_mut() {
                let signals = conn.arrives(&segment, &config, now);
                Self::apply(conn, ip, signals, &config, now);
            }
            self.reap(idx);
        } else if let Some(idx) = self.find_listener(&tuple) {
            let signals = match self.slots[idx].connection.as_mut() {
                Some(listener) => listener.arrives(&segment, &config, now),
                None => Signals::default(),
            };
            if signals.spawn {
                let listener = SlotKey { idx, generation: self.slots[idx].generation };
                self.spawn(ip, listener, interface, tuple, &segment, now);
            } else if let Some(Answer::Reset(reset)) = signals.answer {
                Self::send_stateless(ip, interface, &tuple, &reset, &config);
            }
        } else if let Some(reset) = reset_for(&repr) {
            Self::send_stateless(ip, interface, &tuple, &reset, &config);
        }
    }

    /// Perform the sends requested by a segment handler.
    fn apply<I>(conn: &mut Connection, ip: &mut I, signals: Signals, config: &Config, now: Instant)
        where I: IpLayer + ?Sized
    {
        let mut sent = 0;
        if signals.retransmit && !conn.retransmit.is_empty() {
            if let Err(err) = conn.retransmit_segment(ip, config) {
                net_debug!("tcp: retransmission failed: {}", err);
            }
            sent += 1;
        }

        if signals.transmit {
            sent += conn.transmit(ip, config, now);
        }

        let result = match signals.answer {
            Some(Answer::Ack) if sent == 0 => conn.send_ack(ip, config),
            Some(Answer::Reset(reset)) => {
                send_repr(ip, conn.interface, &conn.tuple, config.ttl, &reset, |_| ())
            },
            _ => Ok(()),
        };

        if let Err(err) = result {
            net_debug!("tcp: sending answer failed: {}", err);
        }
    }

    fn send_stateless<I>(ip: &mut I, interface: Interface, tuple: &FourTuple, reset: &TcpRepr, config: &Config)
        where I: IpLayer + ?Sized
    {
        if let Err(err) = send_repr(ip, interface, tuple, config.ttl, reset, |_| ()) {
            net_debug!("tcp: sending reset failed: {}", err);
        }
    }

    /// Create a connection for a SYN accepted by a listener.
    fn spawn<I>(
        &mut self,
        ip: &mut I,
        listener: SlotKey,
        interface: Interface,
        tuple: FourTuple,
        segment: &Segment,
        now: Instant,
    )
        where I: IpLayer + ?Sized
    {
        let backlog = match self.get(listener) {
            Ok(conn) => conn.backlog,
            Err(_) => return,
        };
        let pending = self.connections()
            .filter(|(_, conn)| conn.listener == Some(listener))
            .count();
        if pending >= backlog {
            net_debug!("tcp: backlog of {} full, dropping syn", tuple.local_port);
            return;
        }

        let idx = match self.free_slot() {
            Some(idx) => idx,
            None => {
                net_debug!("tcp: no free connection slot, dropping syn");
                return;
            },
        };

        let config = self.config;
        let iss = self.isn.initial_seq_num(tuple, now);
        let mut conn = Connection::new(tuple, interface, &config, iss);
        conn.listener = Some(listener);
        conn.open_passive(segment, &config, now);
        if let Err(err) = conn.send_syn(ip, &config, now) {
            net_debug!("tcp: sending syn-ack failed: {}", err);
        }
        self.insert(idx, conn);
    }

    /// Reset and close all unaccepted connections of a listener.
    fn abort_children<I>(&mut self, ip: &mut I, listener: SlotKey, now: Instant)
        where I: IpLayer + ?Sized
    {
        let config = self.config;
        for idx in 0..self.slots.len() {
            if let Some(conn) = self.slots[idx].connection.as_mut() {
                if conn.listener != Some(listener) || conn.owned {
                    continue;
                }
                if conn.current.is_synchronized() {
                    if let Err(err) = conn.send_reset(ip, &config) {
                        net_debug!("tcp: sending reset failed: {}", err);
                    }
                }
                conn.change_state(State::Closed, &config, now);
            }
            self.reap(idx);
        }
    }

    /// Choose an unused local port from the ephemeral range.
    fn ephemeral_port(&mut self, local: IpAddress) -> Option<u16> {
        let min = self.config.ephemeral_port_min;
        let max = self.config.ephemeral_port_max.max(min);
        let range = usize::from(max - min) + 1;

        for _ in 0..range {
            let port = if self.next_port < min || self.next_port > max {
                min
            } else {
                self.next_port
            };
            self.next_port = if port == max { min } else { port + 1 };

            let used = self.connections().any(|(_, conn)| {
                conn.tuple.local_port == port
                    && (conn.tuple.local == local || conn.tuple.local.is_unspecified())
            });
            if !used {
                return Some(port);
            }
        }

        None
    }

    fn find_connection(&self, tuple: &FourTuple) -> Option<usize> {
        self.slots.iter().position(|slot| match &slot.connection {
            Some(conn) => conn.current != State::Closed
                && conn.current != State::Listen
                && conn.tuple == *tuple,
            None => false,
        })
    }

    fn find_listener(&self, tuple: &FourTuple) -> Option<usize> {
        self.slots.iter().position(|slot| match &slot.connection {
            Some(conn) => conn.current == State::Listen
                && conn.tuple.local_port == tuple.local_port
                && (conn.tuple.local.is_unspecified() || conn.tuple.local == tuple.local),
            None => false,
        })
    }
}

impl<G> Endpoint<G> {
    pub(crate) fn get(&self, key: SlotKey) -> Result<&Connection> {
        match self.slots.get(key.idx) {
            Some(Slot { generation, connection: Some(conn) }) if *generation == key.generation => Ok(conn),
            _ => Err(Error::NotFound),
        }
    }

    pub(crate) fn get_mut(&mut self, key: SlotKey) -> Result<&mut Connection> {
        match self.slots.get_mut(key.idx) {
            Some(Slot { generation, connection: Some(conn) }) if *generation == key.generation => Ok(conn),
            _ => Err(Error::NotFound),
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.connection.is_none())
    }

    fn insert(&mut self, idx: usize, conn: Connection) -> SlotKey {
        let slot = &mut self.slots[idx];
        slot.connection = Some(conn);
        SlotKey { idx, generation: slot.generation }
    }

    /// Free the slot if its connection is closed and nobody holds a reference.
    pub(crate) fn reap(&mut self, idx: usize) {
        let slot = match self.slots.get_mut(idx) {
            Some(slot) => slot,
            None => return,
        };

        let unused = match &slot.connection {
            Some(conn) => conn.current == State::Closed && !conn.owned,
            None => false,
        };

        if unused {
            net_trace!("tcp: freeing slot {}", idx);
            slot.connection = None;
            slot.generation = slot.generation.wrapping_add(1);
        }
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot_mut(&mut self, idx: usize) -> Option<&mut Connection> {
        self.slots.get_mut(idx).and_then(|slot| slot.connection.as_mut())
    }
}

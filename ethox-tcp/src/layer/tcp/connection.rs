use core::fmt;

use crate::layer::ip::Interface;
use crate::storage::RingBuffer;
use crate::time::{Duration, Expiration, Instant};
use crate::wire::TcpSeqNumber;

use super::Config;
use super::congestion::NewReno;
use super::endpoint::{FourTuple, SlotKey};
use super::rtt::RttEstimator;
use super::timer::Timer;
use super::transmit::RetransmitQueue;

/// The state of a connection, the transmission control block.
///
/// Includes current state machine state, the configuration state that is required to stay
/// constant during a connection, and the in- and out-buffers. Only the endpoint mutates it, either
/// while processing a segment, in the timer sweep or on behalf of the application.
#[derive(Clone, Debug)]
pub struct Connection {
    /// The addresses and ports of both ends.
    pub tuple: FourTuple,

    /// The interface used for transmission.
    pub interface: Interface,

    /// The current state of the state machine.
    pub current: State,

    /// The previous state of the state machine.
    pub previous: State,

    /// The sending state.
    ///
    /// In RFC793 this is referred to as `SND`.
    pub send: Send,

    /// The receiving state.
    ///
    /// In RFC793 this is referred to as `RCV`.
    pub recv: Receive,

    /// The flow control mechanism.
    pub flow_control: NewReno,

    /// Round trip estimation and the current retransmission timeout.
    pub rtt: RttEstimator,

    /// Number of retransmissions since the last acknowledgement of new data.
    pub retransmit_count: u32,

    /// Zero window probing.
    pub persist: Persist,

    /// All timers of the connection.
    pub timers: Timers,

    /// The SMSS is the size of the largest segment that the sender can transmit.
    ///
    /// This value is the MSS option of the remote, or the configured default without one, but
    /// never more than we are configured to send. The size does not include the TCP/IP headers and
    /// options.
    pub sender_maximum_segment_size: u32,

    /// The RMSS is the size of the largest segment the receiver is willing to accept.
    ///
    /// This is the value specified in the MSS option we send during connection startup.
    pub receiver_maximum_segment_size: u32,

    pub(crate) retransmit: RetransmitQueue,
    pub(crate) tx: RingBuffer,
    pub(crate) rx: RingBuffer,
    pub(crate) owned: bool,
    /// The listener that spawned this connection, until accepted.
    pub(crate) listener: Option<SlotKey>,
    pub(crate) backlog: usize,
    pub(crate) signals: UserSignals,
}

/// The send sequence space.
#[derive(Clone, Copy, Debug, Hash)]
pub struct Send {
    /// The next not yet acknowledged sequence number.
    ///
    /// In RFC793 this is referred to as `SND.UNA`.
    pub unacked: TcpSeqNumber,

    /// The next sequence number to use for transmission.
    ///
    /// In RFC793 this is referred to as `SND.NXT`.
    pub next: TcpSeqNumber,

    /// The send window size indicated by the receiver.
    ///
    /// Must not send packet containing a sequence number beyond `unacked + window`. In RFC793 this
    /// is referred to as `SND.WND`.
    pub window: u32,

    /// The initial sequence number.
    ///
    /// In RFC793 this is referred to as `ISS`.
    pub initial_seq: TcpSeqNumber,

    /// The number of bytes written by the user that were never sent.
    pub unsent: usize,

    /// The segment sequence number used for the last window update.
    pub last_window_seq: TcpSeqNumber,

    /// The segment acknowledgment number used for the last window update.
    pub last_window_ack: TcpSeqNumber,

    /// The user closed the stream, a FIN follows the buffered data.
    pub fin_queued: bool,

    /// The FIN was sent, its sequence number is `next - 1`.
    pub fin_sent: bool,

    /// The sequence number of the first byte in the send buffer.
    pub(crate) buffered: TcpSeqNumber,
}

/// The receive sequence space.
#[derive(Clone, Copy, Debug, Hash)]
pub struct Receive {
    /// The next expected sequence number.
    ///
    /// In RFC793 this is referred to as `RCV.NXT`.
    pub next: TcpSeqNumber,

    /// The receive window size indicated by us.
    ///
    /// Always the free space of the receive buffer. In RFC793 this is referred to as `RCV.WND`.
    pub window: u32,

    /// The initial receive sequence number.
    ///
    /// In RFC793 this is referred to as `IRS`.
    pub initial_seq: TcpSeqNumber,

    /// The remote closed its stream.
    pub fin_received: bool,

    /// The window in the last segment we sent.
    pub advertised: u32,
}

/// Zero window probing state.
#[derive(Clone, Copy, Debug, Default, Hash)]
pub struct Persist {
    /// The interval until the next probe, zero while not probing.
    pub interval: Duration,

    /// The number of probes sent without the window opening.
    pub count: u32,
}

/// The five timers of a connection.
#[derive(Clone, Copy, Debug, Default, Hash)]
pub struct Timers {
    /// Running if and only if the retransmit queue is not empty.
    pub retransmit: Timer,

    /// Running only while the send window is zero and data is waiting.
    pub persist: Timer,

    /// Sends data held back by Nagle's algorithm.
    pub sws_override: Timer,

    /// Limits the time waiting for the FIN of the remote.
    pub fin_wait_2: Timer,

    /// The 2*MSL quiet time before the connection is closed.
    pub time_wait: Timer,
}

/// State enum of the statemachine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Marker state fo an unintended/uninitialized connection state.
    Closed,

    /// A listening connection.
    ///
    /// Akin to an open server socket. Spawns a new connection in SynReceived for every accepted
    /// connection request.
    Listen,

    /// An open connection request.
    SynSent,

    /// Connection request we intend to answer, waiting on ack.
    SynReceived,

    /// An open connection.
    Established,

    /// Closed our side of the connection.
    FinWait1,

    /// Closing connection nicely, initiated by us and acknowledged.
    FinWait2,

    /// Closed both sides but we don't know the other knows.
    Closing,

    /// Both sides recognized connection as closed.
    TimeWait,

    /// Other side closed its connection.
    CloseWait,

    /// Connection closed after other side closed its already.
    LastAck,
}

/// Events of a connection that are interesting for its user.
///
/// Accumulated until taken with `Endpoint::take_signals`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct UserSignals {
    /// The connection reached the established state.
    pub connected: bool,

    /// There is new data to be read.
    pub data: bool,

    /// Space in the send buffer was freed.
    pub writable: bool,

    /// The tcp data stream was closed by the remote end.
    ///
    /// The actual connection may still be half-open until our side closes the connection as well.
    pub half_closed: bool,

    /// An unexpected connection reset occurred.
    pub reset: bool,

    /// The connection reached the closed state, for whatever reason.
    pub closed: bool,
}

impl Connection {
    /// Initialize a closed connection.
    ///
    /// The raw method is near useless, transition the connection to an appropriate state
    /// afterwards.
    pub(crate) fn new(
        tuple: FourTuple,
        interface: Interface,
        config: &Config,
        initial_seq: TcpSeqNumber,
    ) -> Self {
        let tx = RingBuffer::new(config.tx_buffer_size);
        let rx = RingBuffer::new(config.rx_buffer_size);
        let smss = u32::from(config.default_mss.min(config.max_mss));
        let mut flow_control = NewReno::new(initial_seq);
        flow_control.reset_window(config.initial_window, smss, clamp_u32(tx.capacity()));

        Connection {
            tuple,
            interface,
            current: State::Closed,
            previous: State::Closed,
            send: Send {
                unacked: initial_seq,
                next: initial_seq,
                window: 0,
                initial_seq,
                unsent: 0,
                last_window_seq: TcpSeqNumber::default(),
                last_window_ack: initial_seq,
                fin_queued: false,
                fin_sent: false,
                buffered: initial_seq + 1,
            },
            recv: Receive {
                next: TcpSeqNumber::default(),
                window: clamp_u32(rx.window()),
                initial_seq: TcpSeqNumber::default(),
                fin_received: false,
                advertised: 0,
            },
            flow_control,
            rtt: RttEstimator::new(config.initial_rto),
            retransmit_count: 0,
            persist: Persist::default(),
            timers: Timers::default(),
            sender_maximum_segment_size: smss,
            receiver_maximum_segment_size: u32::from(config.max_mss),
            retransmit: RetransmitQueue::default(),
            tx,
            rx,
            owned: false,
            listener: None,
            backlog: 0,
            signals: UserSignals::default(),
        }
    }

    /// Move the state machine to a new state.
    ///
    /// Entering a state arms or stops the timers that belong to it.
    pub(crate) fn change_state(&mut self, new: State, config: &Config, now: Instant) {
        if new == self.current {
            return;
        }

        net_debug!("tcp: {}:{} -> {}:{} {} => {}",
            self.tuple.local, self.tuple.local_port,
            self.tuple.remote, self.tuple.remote_port,
            self.current, new);
        self.previous = self.current;
        self.current = new;

        match new {
            State::Established => {
                self.signals.connected = true;
            },
            State::FinWait2 => {
                self.timers.fin_wait_2.start(now, config.fin_wait_2_timeout);
            },
            State::TimeWait => {
                self.timers.retransmit.stop();
                self.timers.persist.stop();
                self.timers.sws_override.stop();
                self.timers.fin_wait_2.stop();
                self.retransmit.clear();
                self.timers.time_wait.start(now, config.time_wait);
            },
            State::Closed => {
                self.timers = Timers::default();
                self.retransmit.clear();
                self.rtt.clear();
                self.persist = Persist::default();
                self.send.unsent = 0;
                self.signals.closed = true;
            },
            _ => {},
        }
    }

    /// Adopt the MSS option of the remote and size the initial congestion window for it.
    pub(crate) fn adopt_mss(&mut self, option: Option<u16>, config: &Config) {
        let announced = match option {
            Some(mss) if mss > 0 => mss,
            _ => config.default_mss,
        };
        self.sender_maximum_segment_size = u32::from(announced.min(config.max_mss));
        self.flow_control.reset_window(
            config.initial_window,
            self.sender_maximum_segment_size,
            clamp_u32(self.tx.capacity()));
    }

    /// The current state of the state machine.
    pub fn state(&self) -> State {
        self.current
    }

    /// Check if the application holds a reference to this connection.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// The amount of sequence space sent but not acknowledged.
    pub fn flight_size(&self) -> usize {
        self.send.next - self.send.unacked
    }

    /// The number of new bytes the windows allow to send now.
    ///
    /// The minimum of the send window, the congestion window and the send buffer size, less the
    /// sequence space already in flight.
    pub fn usable_window(&self) -> usize {
        let window = (self.send.window as usize)
            .min(self.flow_control.congestion_window as usize)
            .min(self.tx.capacity());
        window.saturating_sub(self.flight_size())
    }

    /// The segments awaiting acknowledgement.
    pub fn retransmit_queue(&self) -> &RetransmitQueue {
        &self.retransmit
    }

    /// The number of bytes buffered for sending, including those in flight.
    pub fn send_buffered(&self) -> usize {
        self.tx.len()
    }

    /// The number of bytes that can still be written.
    pub fn send_capacity(&self) -> usize {
        self.tx.window()
    }

    /// The number of received bytes that were not yet read.
    pub fn recv_buffered(&self) -> usize {
        self.rx.len()
    }

    /// The earliest instant at which one of the timers expires.
    pub fn poll_at(&self, now: Instant) -> Expiration {
        let timers = &self.timers;
        timers.retransmit.expires_at()
            .earliest(timers.persist.expires_at(), now)
            .earliest(timers.sws_override.expires_at(), now)
            .earliest(timers.fin_wait_2.expires_at(), now)
            .earliest(timers.time_wait.expires_at(), now)
    }

    /// Check if the ack number of `segment` acknowledges our FIN.
    pub(crate) fn fin_acknowledged(&self) -> bool {
        self.send.fin_sent && self.send.unacked == self.send.next
    }

    /// Refresh the receive window after the receive buffer changed.
    pub(crate) fn update_recv_window(&mut self) {
        self.recv.window = clamp_u32(self.rx.window());
    }

    /// Arm or stop the persist timer after the send window or the send buffer changed.
    pub(crate) fn update_persist(&mut self, config: &Config, now: Instant) {
        let probing = self.send.window == 0
            && !self.tx.is_empty()
            && self.current.is_synchronized();

        if probing && !self.timers.persist.is_running() {
            self.persist.interval = config.default_probe_interval;
            self.persist.count = 0;
            self.timers.persist.start(now, self.persist.interval);
        } else if !probing && self.timers.persist.is_running() {
            self.timers.persist.stop();
            self.persist = Persist::default();
        }
    }
}

impl State {
    /// Check if both sequence spaces are known.
    pub fn is_synchronized(self) -> bool {
        match self {
            State::Closed | State::Listen | State::SynSent => false,
            _ => true,
        }
    }

    /// Check if the user may still write data.
    pub fn may_send(self) -> bool {
        match self {
            State::SynSent | State::SynReceived | State::Established | State::CloseWait => true,
            _ => false,
        }
    }

    /// Check if queued data and the FIN may be transmitted.
    pub(crate) fn may_transmit(self) -> bool {
        match self {
            State::Established | State::CloseWait | State::FinWait1 | State::LastAck => true,
            _ => false,
        }
    }

    /// Check if the remote may still send data.
    pub fn may_receive(self) -> bool {
        match self {
            State::Established | State::FinWait1 | State::FinWait2 => true,
            _ => false,
        }
    }
}

pub(crate) fn clamp_u32(value: usize) -> u32 {
    value.min(u32::max_value() as usize) as u32
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::Closed      => write!(f, "CLOSED"),
            State::Listen      => write!(f, "LISTEN"),
            State::SynSent     => write!(f, "SYN-SENT"),
            State::SynReceived => write!(f, "SYN-RECEIVED"),
            State::Established => write!(f, "ESTABLISHED"),
            State::FinWait1    => write!(f, "FIN-WAIT-1"),
            State::FinWait2    => write!(f, "FIN-WAIT-2"),
            State::Closing     => write!(f, "CLOSING"),
            State::TimeWait    => write!(f, "TIME-WAIT"),
            State::CloseWait   => write!(f, "CLOSE-WAIT"),
            State::LastAck     => write!(f, "LAST-ACK"),
        }
    }
}

impl Default for State {
    fn default() -> Self {
        State::Closed
    }
}

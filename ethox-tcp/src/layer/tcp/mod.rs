//! The TCP layer.
//!
//! Processes inbound segments, keeps the state of every connection and drives the timers that
//! recover from loss. Everything below tcp is reached through an [`IpLayer`], everything above is
//! the application calling methods of the [`Endpoint`].
//!
//! [`IpLayer`]: ../ip/trait.IpLayer.html
//! [`Endpoint`]: struct.Endpoint.html
//!
//! ## Structure
//!
//! The main functionality of the [`Endpoint`] structure of this layer is storing the connection
//! states, unlike other layers which mostly store configuration options. To this end it keeps a
//! fixed number of connection slots addressed by [`SlotKey`]s, which behave similar to specialized
//! file descriptors. A key is invalidated when its slot is freed and does not accidentally refer
//! to a later connection that reuses the slot.
//!
//! [`SlotKey`]: struct.SlotKey.html
//!
//! Each inbound segment is first matched against the four tuple of an existing connection and
//! then against listening connections. It is then handed to the handler of the connection's
//! current state. Handlers only mutate the connection itself and report what needs to be sent in
//! response. The endpoint performs these sends afterwards, so the state graph can be exercised
//! without any network at all.
//!
//! Unlike standard stacks where state and user must be assumed to be in different protection
//! domains and which manage their state opaquely, it poses no problem for this library to allow
//! inspection of internal state. See [`Endpoint::connection`].
//!
//! [`Endpoint::connection`]: struct.Endpoint.html#method.connection
//!
//! ## Timers
//!
//! Every connection has five timers: retransmission, persist, override, FIN-WAIT-2 and TIME-WAIT.
//! None of them fires on its own. The owner of the endpoint must call [`Endpoint::tick`]
//! periodically, once every 100ms to 1s is typical, and may use [`Endpoint::poll_at`] to find the
//! next instant at which a call is needed.
//!
//! [`Endpoint::tick`]: struct.Endpoint.html#method.tick
//! [`Endpoint::poll_at`]: struct.Endpoint.html#method.poll_at
//!
//! ## Creating a connection
//!
//! An active open selects a local address through the ip layer, picks an ephemeral port and sends
//! the SYN immediately. The returned key can be used for sending right away, data is buffered and
//! only transmitted once the connection is established.
//!
//! The stack does not allow sending any data in a SYN packet as these are rarely accepted. They
//! are incompatible with SYN-cookies and otherwise a security and stability risk. Data received in
//! a SYN is ignored, the remote will retransmit it.
//!
//! ## Accepting connections
//!
//! A listening connection spawns a new connection for every acceptable SYN, up to its backlog.
//! These are not owned by anyone until they are accepted. A spawned connection that is closed or
//! reset before that point is freed silently.
//!
//! ## Deviations
//!
//! An incoming packet in Closed state is simply dropped if it had RST set.  Packets with RST
//! should *never* be answered with a packet with RST but the only specified answers would set that
//! flag. In fact, RFC793 is clear about this [in section Reset
//! Generation](https://tools.ietf.org/html/rfc793#page-36):
//!
//! > 1.  If the connection does not exist (CLOSED) then a reset is sent in response to any
//! incoming segment except another reset.
//!
//! Only data arriving in order is accepted into the receive buffer. Segments beyond `RCV.NXT` are
//! dropped and answered with a duplicate acknowledgement, which triggers the fast retransmit of
//! the remote.
//!
//! Relevant material for reading:
//! Main TCP rfc (skip if confident): https://tools.ietf.org/html/rfc793
//! Errata and comments: https://tools.ietf.org/html/rfc1122#section-4.2
//! TCP congestion control: https://tools.ietf.org/html/rfc5681
//! NewReno: https://tools.ietf.org/html/rfc6582
//! Retransmission timer: https://tools.ietf.org/html/rfc6298
use crate::time::Duration;

mod congestion;
mod connection;
mod endpoint;
mod fsm;
mod rtt;
mod siphash;
mod tick;
mod timer;
mod transmit;

#[cfg(test)]
mod tests;

pub use congestion::{
    AckAction,
    CongestionState,
    NewReno};

pub use connection::{
    Connection,
    Persist,
    Receive,
    Send,
    State,
    Timers,
    UserSignals};

pub use endpoint::{
    Endpoint,
    FourTuple,
    SlotKey};

pub use rtt::RttEstimator;

pub use siphash::{
    FixedIsn,
    IsnGenerator,
    IsnSource};

pub use timer::Timer;

pub use transmit::{
    Queued,
    RetransmitQueue};

/// The tunables of the tcp layer.
///
/// Shared by all connections of an endpoint. The defaults are suitable for small hosts on a local
/// network and follow the recommendations of the RFCs where there are any.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// Number of retransmissions, or of window probes, before giving up on a connection.
    pub max_retries: u32,

    /// The retransmission timeout before the first round trip sample.
    pub initial_rto: Duration,

    /// Lower bound of the computed retransmission timeout.
    pub min_rto: Duration,

    /// Upper bound of the retransmission timeout, including back-off.
    pub max_rto: Duration,

    /// The congestion window after a retransmission timeout, in segments.
    pub loss_window: u32,

    /// The congestion window of a new connection, in segments.
    pub initial_window: u32,

    /// The first interval between zero window probes.
    pub default_probe_interval: Duration,

    /// Upper bound of the interval between zero window probes.
    pub max_probe_interval: Duration,

    /// How long small segments may be delayed by Nagle's algorithm.
    pub override_timeout: Duration,

    /// How long to wait for the FIN of the remote after ours was acknowledged.
    pub fin_wait_2_timeout: Duration,

    /// The duration of TIME-WAIT, twice the maximum segment lifetime.
    pub time_wait: Duration,

    /// The sender maximum segment size if the remote does not announce one.
    pub default_mss: u16,

    /// The largest segment we send and announce to receive.
    pub max_mss: u16,

    /// Size of the send buffer of each connection.
    pub tx_buffer_size: usize,

    /// Size of the receive buffer of each connection.
    pub rx_buffer_size: usize,

    /// Number of duplicate acknowledgements that trigger a fast retransmit.
    pub fast_retransmit_threshold: u32,

    /// Delay small segments while data is in flight.
    pub nagle: bool,

    /// The time-to-live given to the ip layer for all segments.
    pub ttl: u8,

    /// First port of the range used for active opens.
    pub ephemeral_port_min: u16,

    /// Last port of the range used for active opens.
    pub ephemeral_port_max: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_retries: 5,
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_secs(1),
            max_rto: Duration::from_secs(60),
            loss_window: 1,
            initial_window: 3,
            default_probe_interval: Duration::from_secs(1),
            max_probe_interval: Duration::from_secs(60),
            override_timeout: Duration::from_millis(500),
            fin_wait_2_timeout: Duration::from_secs(4),
            time_wait: Duration::from_secs(4),
            default_mss: 536,
            max_mss: 1430,
            tx_buffer_size: 2860,
            rx_buffer_size: 2860,
            fast_retransmit_threshold: 3,
            nagle: true,
            ttl: 64,
            ephemeral_port_min: 49152,
            ephemeral_port_max: 65535,
        }
    }
}

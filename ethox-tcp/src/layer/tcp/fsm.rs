//! Segment arrival, one handler per state.
//!
//! The handlers only mutate the connection they are called on. Anything that has to be sent in
//! response is described by the returned `Signals` and performed by the endpoint afterwards, so
//! the whole state graph can be driven without an ip layer.
use crate::time::Instant;
use crate::wire::{TcpFlags, TcpRepr, TcpSeqNumber};

use super::Config;
use super::congestion::AckAction;
use super::connection::{clamp_u32, Connection, State};

/// An inbound segment that passed the checksum.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Segment<'a> {
    pub repr: TcpRepr,
    pub payload: &'a [u8],
}

/// Output signals of the model.
///
/// The order in which the endpoint acts on them is fixed: retransmission first, then new data,
/// then the answer. A bare acknowledgement is skipped if any other segment went out.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Signals {
    /// Need to send some tcp answer.
    ///
    /// Since TCP must assume every packet to be potentially lost it is likely technically fine
    /// *not* to actually send the packet. In particular you could probably advance the internal
    /// state without acquiring packets to send out. This, however, sounds like a very bad idea.
    pub answer: Option<Answer>,

    /// Resend the head of the retransmit queue.
    pub retransmit: bool,

    /// The windows may allow sending buffered data.
    pub transmit: bool,

    /// A listening connection accepted a connection request.
    pub spawn: bool,
}

/// A direct answer to a segment.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Answer {
    /// Acknowledge with the current state.
    Ack,

    /// Send exactly this segment.
    Reset(TcpRepr),
}

/// The reset answering a segment that belongs to no connection.
///
/// Segments with RST set are never answered.
pub(crate) fn reset_for(segment: &TcpRepr) -> Option<TcpRepr> {
    if segment.flags.rst() {
        // Avoid answering with RST when packet has RST set.
        return None;
    }

    let (seq_number, ack_number) = match segment.ack_number {
        Some(ack_number) => (ack_number, None),
        None => (TcpSeqNumber(0), Some(segment.seq_number + segment.sequence_len())),
    };

    Some(TcpRepr {
        src_port: segment.dst_port,
        dst_port: segment.src_port,
        flags: TcpFlags::RST,
        seq_number,
        ack_number,
        window_len: 0,
        max_seg_size: None,
        payload_len: 0,
    })
}

impl Signals {
    fn ack() -> Self {
        Signals {
            answer: Some(Answer::Ack),
            ..Signals::default()
        }
    }

    fn reset(repr: TcpRepr) -> Self {
        Signals {
            answer: Some(Answer::Reset(repr)),
            ..Signals::default()
        }
    }
}

impl Connection {
    /// Process an inbound segment in the current state.
    pub(crate) fn arrives(&mut self, segment: &Segment, config: &Config, now: Instant) -> Signals {
        match self.current {
            State::Closed => self.arrives_closed(segment),
            State::Listen => self.arrives_listen(segment),
            State::SynSent => self.arrives_syn_sent(segment, config, now),
            State::SynReceived => self.arrives_syn_received(segment, config, now),
            State::Established => self.arrives_established(segment, config, now),
            State::FinWait1 => self.arrives_fin_wait_1(segment, config, now),
            State::FinWait2 => self.arrives_fin_wait_2(segment, config, now),
            State::CloseWait => self.arrives_close_wait(segment, config, now),
            State::Closing => self.arrives_closing(segment, config, now),
            State::LastAck => self.arrives_last_ack(segment, config, now),
            State::TimeWait => self.arrives_time_wait(segment, config, now),
        }
    }

    /// Answers packets on closed sockets with resets.
    ///
    /// Except when an RST flag is already set on the received packet. Probably the easiest packet
    /// flow.
    fn arrives_closed(&mut self, segment: &Segment) -> Signals {
        match reset_for(&segment.repr) {
            Some(reset) => Signals::reset(reset),
            None => Signals::default(),
        }
    }

    fn arrives_listen(&mut self, segment: &Segment) -> Signals {
        let repr = &segment.repr;
        if repr.flags.rst() {
            return Signals::default();
        }

        if repr.ack_number.is_some() {
            // What are you acking? A previous connection.
            return self.arrives_closed(segment);
        }

        if !repr.flags.syn() {
            // Doesn't have any useful flags. Why was this even sent?
            return Signals::default();
        }

        Signals {
            spawn: true,
            ..Signals::default()
        }
    }

    /// Initialize a connection spawned by a listener from the SYN that requested it.
    ///
    /// The connection must still be closed. Afterwards it is in SYN-RECEIVED and must send its
    /// SYN-ACK.
    pub(crate) fn open_passive(&mut self, segment: &Segment, config: &Config, now: Instant) {
        let repr = &segment.repr;
        self.recv.initial_seq = repr.seq_number;
        self.recv.next = repr.seq_number + 1;
        self.send.window = u32::from(repr.window_len);
        self.send.last_window_seq = repr.seq_number;
        self.send.last_window_ack = self.send.initial_seq;
        self.adopt_mss(repr.max_seg_size, config);
        self.change_state(State::SynReceived, config, now);
    }

    fn arrives_syn_sent(&mut self, segment: &Segment, config: &Config, now: Instant) -> Signals {
        let repr = &segment.repr;

        if let Some(ack) = repr.ack_number {
            if !(ack > self.send.initial_seq) || ack > self.send.next {
                if repr.flags.rst() {
                    return Signals::default();
                }
                net_debug!("tcp: unacceptable ack {} in {}", ack, self.current);
                return Signals::reset(self.reset_repr(ack));
            }
        }

        if repr.flags.rst() {
            if repr.ack_number.is_some() {
                net_debug!("tcp: connection refused");
                self.signals.reset = true;
                self.change_state(State::Closed, config, now);
            }
            return Signals::default();
        }

        if !repr.flags.syn() {
            return Signals::default();
        }

        // Data in the SYN is ignored, the remote will retransmit it.
        self.recv.initial_seq = repr.seq_number;
        self.recv.next = repr.seq_number + 1;
        self.send.window = u32::from(repr.window_len);
        self.send.last_window_seq = repr.seq_number;
        self.adopt_mss(repr.max_seg_size, config);

        match repr.ack_number {
            Some(ack) => {
                self.send.last_window_ack = ack;
                self.acknowledge(ack, config, now);
                self.change_state(State::Established, config, now);
                Signals {
                    answer: Some(Answer::Ack),
                    transmit: true,
                    ..Signals::default()
                }
            },
            None => {
                // Simultaneous open, our SYN is resent with an ACK.
                self.send.last_window_ack = self.send.initial_seq;
                self.change_state(State::SynReceived, config, now);
                Signals {
                    retransmit: true,
                    ..Signals::default()
                }
            },
        }
    }

    fn arrives_syn_received(&mut self, segment: &Segment, config: &Config, now: Instant) -> Signals {
        let repr = &segment.repr;
        if repr.flags.syn() && !repr.flags.rst() && repr.ack_number.is_none()
            && repr.seq_number == self.recv.initial_seq
        {
            // Our SYN-ACK was lost.
            return Signals {
                retransmit: true,
                ..Signals::default()
            };
        }

        let mut signals = Signals::default();
        if !self.check_control(segment, config, now, &mut signals) {
            return signals;
        }

        let ack = match repr.ack_number {
            Some(ack) => ack,
            None => return signals,
        };

        if !(ack > self.send.unacked) || ack > self.send.next {
            net_debug!("tcp: unacceptable ack {} in {}", ack, self.current);
            return Signals::reset(self.reset_repr(ack));
        }

        if !self.process_ack(segment, config, now, &mut signals) {
            return signals;
        }
        self.change_state(State::Established, config, now);
        signals.transmit = true;

        self.process_text(segment, &mut signals);
        if self.process_fin(segment, &mut signals) {
            self.change_state(State::CloseWait, config, now);
        }
        signals
    }

    fn arrives_established(&mut self, segment: &Segment, config: &Config, now: Instant) -> Signals {
        let mut signals = Signals::default();
        if !self.check_control(segment, config, now, &mut signals)
            || !self.process_ack(segment, config, now, &mut signals)
        {
            return signals;
        }

        self.process_text(segment, &mut signals);
        if self.process_fin(segment, &mut signals) {
            self.change_state(State::CloseWait, config, now);
        }
        signals
    }

    fn arrives_fin_wait_1(&mut self, segment: &Segment, config: &Config, now: Instant) -> Signals {
        let mut signals = Signals::default();
        if !self.check_control(segment, config, now, &mut signals)
            || !self.process_ack(segment, config, now, &mut signals)
        {
            return signals;
        }

        if self.fin_acknowledged() {
            self.change_state(State::FinWait2, config, now);
        }

        self.process_text(segment, &mut signals);
        if self.process_fin(segment, &mut signals) {
            if self.fin_acknowledged() {
                self.change_state(State::TimeWait, config, now);
            } else {
                self.change_state(State::Closing, config, now);
            }
        }
        signals
    }

    fn arrives_fin_wait_2(&mut self, segment: &Segment, config: &Config, now: Instant) -> Signals {
        let mut signals = Signals::default();
        if !self.check_control(segment, config, now, &mut signals)
            || !self.process_ack(segment, config, now, &mut signals)
        {
            return signals;
        }

        self.process_text(segment, &mut signals);
        if self.process_fin(segment, &mut signals) {
            self.change_state(State::TimeWait, config, now);
        }
        signals
    }

    fn arrives_close_wait(&mut self, segment: &Segment, config: &Config, now: Instant) -> Signals {
        let mut signals = Signals::default();
        if self.check_control(segment, config, now, &mut signals) {
            self.process_ack(segment, config, now, &mut signals);
        }
        signals
    }

    fn arrives_closing(&mut self, segment: &Segment, config: &Config, now: Instant) -> Signals {
        let mut signals = Signals::default();
        if !self.check_control(segment, config, now, &mut signals)
            || !self.process_ack(segment, config, now, &mut signals)
        {
            return signals;
        }

        if self.fin_acknowledged() {
            self.change_state(State::TimeWait, config, now);
        }
        signals
    }

    fn arrives_last_ack(&mut self, segment: &Segment, config: &Config, now: Instant) -> Signals {
        let mut signals = Signals::default();
        if !self.check_control(segment, config, now, &mut signals)
            || !self.process_ack(segment, config, now, &mut signals)
        {
            return signals;
        }

        if self.fin_acknowledged() {
            self.change_state(State::Closed, config, now);
        }
        signals
    }

    /// Only a retransmitted FIN or a reset is of interest.
    fn arrives_time_wait(&mut self, segment: &Segment, config: &Config, now: Instant) -> Signals {
        let repr = &segment.repr;
        if repr.flags.rst() {
            if repr.seq_number == self.recv.next {
                self.change_state(State::Closed, config, now);
            }
            return Signals::default();
        }

        let fin_seq = repr.seq_number + segment.payload.len();
        if repr.flags.fin() && fin_seq + 1 == self.recv.next {
            net_trace!("tcp: fin retransmitted in {}", self.current);
            self.timers.time_wait.start(now, config.time_wait);
            return Signals::ack();
        }

        Signals::default()
    }

    /// The reset for an unacceptable acknowledgement.
    fn reset_repr(&self, ack: TcpSeqNumber) -> TcpRepr {
        TcpRepr {
            src_port: self.tuple.local_port,
            dst_port: self.tuple.remote_port,
            flags: TcpFlags::RST,
            seq_number: ack,
            ack_number: None,
            window_len: 0,
            max_seg_size: None,
            payload_len: 0,
        }
    }

    /// The acceptability test of RFC 793 against the receive window.
    ///
    /// A segment with data is acceptable in a zero window if it starts exactly at `RCV.NXT`, so
    /// that its acknowledgement and control flags are processed. The data is then dropped when it
    /// does not fit the receive buffer.
    fn acceptable(&self, segment: &Segment) -> bool {
        let repr = &segment.repr;
        let next = self.recv.next;
        let window = self.recv.window as usize;
        let seq = repr.seq_number;
        let in_window = |seq: TcpSeqNumber| {
            seq.since(next).map_or(false, |offset| offset < window)
        };

        match (segment.payload.len() + repr.flags.sequence_len(), window) {
            (0, 0) => seq == next,
            (0, _) => in_window(seq),
            (_, 0) => seq == next,
            (len, _) => in_window(seq) || in_window(seq + (len - 1)),
        }
    }

    /// Check sequence number, RST and SYN of a segment in a synchronized state.
    ///
    /// Returns `false` if the segment was consumed.
    fn check_control(&mut self, segment: &Segment, config: &Config, now: Instant, signals: &mut Signals)
        -> bool
    {
        let repr = &segment.repr;
        if !self.acceptable(segment) {
            net_debug!("tcp: unacceptable segment {} in {}, expected {}",
                repr.seq_number, self.current, self.recv.next);
            if !repr.flags.rst() {
                signals.answer = Some(Answer::Ack);
            }
            return false;
        }

        if repr.flags.rst() {
            net_debug!("tcp: connection reset in {}", self.current);
            self.signals.reset = true;
            self.change_state(State::Closed, config, now);
            return false;
        }

        if repr.flags.syn() {
            net_debug!("tcp: syn in window, resetting");
            signals.answer = Some(Answer::Reset(self.reset_repr(self.send.next)));
            self.signals.reset = true;
            self.change_state(State::Closed, config, now);
            return false;
        }

        repr.ack_number.is_some()
    }

    /// Account for `SND.UNA` advancing to `ack`.
    ///
    /// Releases acknowledged data from the send buffer and restarts the retransmission timer for
    /// whatever remains outstanding.
    pub(crate) fn acknowledge(&mut self, ack: TcpSeqNumber, config: &Config, now: Instant) {
        let sent_data = self.tx.len() - self.send.unsent;
        let released = ack.since(self.send.buffered).unwrap_or(0).min(sent_data);
        if released > 0 {
            self.tx.discard(released);
            self.send.buffered += released;
            self.signals.writable = true;
        }

        self.send.unacked = ack;
        self.retransmit.acknowledge(ack);
        self.retransmit_count = 0;
        self.rtt.on_ack(ack, now, config.min_rto, config.max_rto);

        if self.retransmit.is_empty() {
            self.timers.retransmit.stop();
        } else {
            self.timers.retransmit.start(now, self.rtt.rto);
        }
    }

    /// Process the acknowledgement and window of a segment.
    ///
    /// Returns `false` if the segment was consumed.
    fn process_ack(&mut self, segment: &Segment, config: &Config, now: Instant, signals: &mut Signals)
        -> bool
    {
        let repr = &segment.repr;
        let ack = match repr.ack_number {
            Some(ack) => ack,
            None => return false,
        };

        if ack > self.send.next {
            net_debug!("tcp: ack {} for unsent data, next is {}", ack, self.send.next);
            signals.answer = Some(Answer::Ack);
            return false;
        }

        if ack < self.send.unacked {
            // Old duplicate, carries nothing about our window.
            return true;
        }

        let smss = self.sender_maximum_segment_size;
        let buffer = clamp_u32(self.tx.capacity());
        let window = u32::from(repr.window_len);

        if ack > self.send.unacked {
            let acked = ack - self.send.unacked;
            self.acknowledge(ack, config, now);
            let flight = self.flight_size();
            if self.flow_control.on_new_ack(ack, acked, flight, smss, buffer) == AckAction::Retransmit {
                signals.retransmit = true;
            }
        } else if segment.payload.is_empty()
            && repr.flags.sequence_len() == 0
            && window == self.send.window
            && self.flight_size() > 0
        {
            let action = self.flow_control.on_duplicate_ack(
                ack,
                self.flight_size(),
                smss,
                self.send.next,
                config.fast_retransmit_threshold,
                buffer);
            if action == AckAction::Retransmit {
                signals.retransmit = true;
            }
        }

        let seq = repr.seq_number;
        if self.send.last_window_seq < seq
            || (self.send.last_window_seq == seq && !(ack < self.send.last_window_ack))
        {
            self.send.window = window;
            self.send.last_window_seq = seq;
            self.send.last_window_ack = ack;
        }

        self.update_persist(config, now);
        signals.transmit = true;
        true
    }

    /// Queue in-order data into the receive buffer.
    fn process_text(&mut self, segment: &Segment, signals: &mut Signals) {
        if !self.current.may_receive() || segment.payload.is_empty() {
            return;
        }

        let skip = match self.recv.next.since(segment.repr.seq_number) {
            Some(skip) => skip,
            None => {
                net_trace!("tcp: out of order segment {}, expected {}",
                    segment.repr.seq_number, self.recv.next);
                signals.answer = Some(Answer::Ack);
                return;
            },
        };

        let data = segment.payload.get(skip..).unwrap_or(&[]);
        let written = self.rx.enqueue_slice(data);
        if written > 0 {
            self.recv.next += written;
            self.update_recv_window();
            self.signals.data = true;
        }
        signals.answer = Some(Answer::Ack);
    }

    /// Accept the FIN of a segment if all data before it was received.
    ///
    /// Returns `true` if the remote closed its stream with this segment.
    fn process_fin(&mut self, segment: &Segment, signals: &mut Signals) -> bool {
        let repr = &segment.repr;
        if !repr.flags.fin() || self.recv.fin_received {
            return false;
        }

        if repr.seq_number + segment.payload.len() != self.recv.next {
            return false;
        }

        self.recv.next += 1;
        self.recv.fin_received = true;
        self.signals.half_closed = true;
        signals.answer = Some(Answer::Ack);
        true
    }
}

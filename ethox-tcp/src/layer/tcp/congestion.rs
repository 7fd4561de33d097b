//! Congestion control bookkeeping.
//!
//! TCP NewReno as described in RFC 5681 and RFC 6582. The controller is owned by its connection
//! and only mutated from the ACK processing path and the timer sweep. It does not send anything on
//! its own, instead it tells the caller when the head of the retransmit queue must be resent.
use crate::wire::TcpSeqNumber;

/// The loss recovery phase of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CongestionState {
    /// No loss was detected, the window grows with every acknowledgement.
    Open,

    /// Entered on duplicate acknowledgements, lasts until `recover` is acknowledged.
    FastRecovery,

    /// Entered on a retransmission timeout, lasts until `recover` is acknowledged.
    LossRecovery,
}

/// Models TCP NewReno flow control and congestion avoidance.
#[derive(Clone, Copy, Debug, Hash)]
pub struct NewReno {
    /// Decider between slow-start and congestion.
    ///
    /// Set to MAX initially, then updated on occurance of congestion. Never less than twice the
    /// sender maximum segment size afterwards.
    pub ssthresh: u32,

    /// The window dictated by congestion.
    ///
    /// Never exceeds the size of the transmit buffer.
    pub congestion_window: u32,

    /// Sender side end flag to recovery.
    ///
    /// When recovering, declares the sent sequence number that must be acknowledged to end the
    /// recovery. Initially set to the initial sequence number (ISS).
    pub recover: TcpSeqNumber,

    /// The current recovery phase.
    pub state: CongestionState,

    /// Number of consecutive duplicate acknowledgements.
    pub duplicate_acks: u32,
}

/// What the caller should do after an acknowledgement was accounted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AckAction {
    /// Nothing beyond the regular transmission of new data.
    Continue,

    /// Resend the head of the retransmit queue now.
    Retransmit,
}

impl NewReno {
    /// Create a controller for a connection that has not yet sent data.
    pub fn new(initial_seq: TcpSeqNumber) -> Self {
        NewReno {
            ssthresh: u32::max_value(),
            congestion_window: 0,
            recover: initial_seq,
            state: CongestionState::Open,
            duplicate_acks: 0,
        }
    }

    /// Set the initial window once the segment size is known.
    pub fn reset_window(&mut self, initial_window: u32, smss: u32, buffer: u32) {
        self.congestion_window = initial_window.saturating_mul(smss).min(buffer);
    }

    fn clamped_ssthresh(flight: usize, smss: u32) -> u32 {
        let half = (flight / 2).min(u32::max_value() as usize) as u32;
        half.max(2*smss)
    }

    /// Account for a retransmission timeout.
    ///
    /// Must be called only for the first timeout of a loss episode, that is before any back-off
    /// retransmission was done.
    pub fn on_retransmit_timeout(
        &mut self,
        flight: usize,
        smss: u32,
        next: TcpSeqNumber,
        loss_window: u32,
        buffer: u32,
    ) {
        self.ssthresh = Self::clamped_ssthresh(flight, smss);
        self.congestion_window = loss_window.saturating_mul(smss).min(buffer);
        self.recover = next - 1;
        self.state = CongestionState::LossRecovery;
        self.duplicate_acks = 0;
        net_debug!("tcp: loss recovery, cwnd {} ssthresh {}", self.congestion_window, self.ssthresh);
    }

    /// Account for an acknowledgement that did not advance `SND.UNA`.
    ///
    /// `ack` is the duplicated acknowledgement number while `flight` is the amount of
    /// unacknowledged sequence space.
    pub fn on_duplicate_ack(
        &mut self,
        ack: TcpSeqNumber,
        flight: usize,
        smss: u32,
        next: TcpSeqNumber,
        threshold: u32,
        buffer: u32,
    ) -> AckAction {
        match self.state {
            CongestionState::Open => {
                self.duplicate_acks += 1;
                // Don't enter recovery again for losses of the previous episode.
                if self.duplicate_acks != threshold || !(ack > self.recover) {
                    return AckAction::Continue;
                }

                self.ssthresh = Self::clamped_ssthresh(flight, smss);
                self.congestion_window = self.ssthresh
                    .saturating_add(threshold.saturating_mul(smss))
                    .min(buffer);
                self.recover = next - 1;
                self.state = CongestionState::FastRecovery;
                net_debug!("tcp: fast retransmit, cwnd {} ssthresh {}",
                    self.congestion_window, self.ssthresh);
                AckAction::Retransmit
            },
            CongestionState::FastRecovery => {
                self.duplicate_acks += 1;
                // Each further duplicate means one segment has left the network.
                self.congestion_window = self.congestion_window
                    .saturating_add(smss)
                    .min(buffer);
                AckAction::Continue
            },
            CongestionState::LossRecovery => AckAction::Continue,
        }
    }

    /// Account for an acknowledgement of `acked` new bytes.
    ///
    /// `flight` is the unacknowledged sequence space remaining *after* this acknowledgement.
    pub fn on_new_ack(
        &mut self,
        ack: TcpSeqNumber,
        acked: usize,
        flight: usize,
        smss: u32,
        buffer: u32,
    ) -> AckAction {
        self.duplicate_acks = 0;
        let full = ack > self.recover;

        match self.state {
            CongestionState::Open => {
                self.grow(acked, smss, buffer);
                AckAction::Continue
            },
            CongestionState::FastRecovery if full => {
                let flight = (flight.min(u32::max_value() as usize)) as u32;
                self.congestion_window = self.ssthresh
                    .min(flight.saturating_add(smss))
                    .min(buffer);
                self.state = CongestionState::Open;
                net_debug!("tcp: fast recovery complete, cwnd {}", self.congestion_window);
                AckAction::Continue
            },
            CongestionState::FastRecovery => {
                // Partial acknowledgement, deflate by the amount acked.
                let acked = (acked.min(u32::max_value() as usize)) as u32;
                self.congestion_window = self.congestion_window
                    .saturating_sub(acked)
                    .saturating_add(smss)
                    .min(buffer)
                    .max(smss.min(buffer));
                AckAction::Retransmit
            },
            CongestionState::LossRecovery if full => {
                self.state = CongestionState::Open;
                self.grow(acked, smss, buffer);
                net_debug!("tcp: loss recovery complete, cwnd {}", self.congestion_window);
                AckAction::Continue
            },
            CongestionState::LossRecovery => {
                self.grow(acked, smss, buffer);
                AckAction::Retransmit
            },
        }
    }

    /// Check if the connection is in slow start.
    pub fn in_slow_start(&self) -> bool {
        self.congestion_window < self.ssthresh
    }

    fn grow(&mut self, acked: usize, smss: u32, buffer: u32) {
        let increase = if self.in_slow_start() {
            (acked.min(smss as usize)) as u32
        } else {
            (smss.saturating_mul(smss) / self.congestion_window.max(1)).max(1)
        };

        self.congestion_window = self.congestion_window
            .saturating_add(increase)
            .min(buffer);
    }
}

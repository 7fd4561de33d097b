//! Round-trip time estimation, RFC 6298.
use crate::time::{Duration, Instant};
use crate::wire::TcpSeqNumber;

/// The clock granularity `G` of the RTO calculation.
const GRANULARITY: Duration = Duration::from_millis(10);

/// Estimates the retransmission timeout from round trip samples.
///
/// At most one segment is timed at once. Following Karn's algorithm, a sample in flight is
/// abandoned as soon as anything is retransmitted since the acknowledgement would be ambiguous.
#[derive(Clone, Copy, Debug, Hash)]
pub struct RttEstimator {
    /// The current retransmission timeout.
    pub rto: Duration,

    /// If a sample is in flight.
    pub busy: bool,

    /// The sequence number that must be acknowledged to complete the sample.
    timed: TcpSeqNumber,

    /// When the timed segment was sent.
    sent_at: Instant,

    /// The smoothed round trip time, `None` before the first sample.
    srtt: Option<Duration>,

    /// The round trip time variation.
    rttvar: Duration,
}

impl RttEstimator {
    /// Create an estimator without samples.
    pub fn new(initial_rto: Duration) -> Self {
        RttEstimator {
            rto: initial_rto,
            busy: false,
            timed: TcpSeqNumber::default(),
            sent_at: Instant::default(),
            srtt: None,
            rttvar: Duration::from_millis(0),
        }
    }

    /// Start timing a segment whose acknowledgement is `end`, unless already timing one.
    pub fn start(&mut self, end: TcpSeqNumber, now: Instant) {
        if self.busy {
            return;
        }
        self.busy = true;
        self.timed = end;
        self.sent_at = now;
    }

    /// Abandon the sample in flight.
    pub fn clear(&mut self) {
        self.busy = false;
    }

    /// Complete the sample if `ack` covers the timed segment.
    pub fn on_ack(&mut self, ack: TcpSeqNumber, now: Instant, min_rto: Duration, max_rto: Duration) {
        if !self.busy || ack < self.timed {
            return;
        }
        self.busy = false;
        let sample = now.duration_since(self.sent_at);
        self.update(sample, min_rto, max_rto);
    }

    fn update(&mut self, sample: Duration, min_rto: Duration, max_rto: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = sample / 2;
            },
            Some(srtt) => {
                let delta = if srtt > sample { srtt - sample } else { sample - srtt };
                self.rttvar = (self.rttvar * 3 + delta) / 4;
                self.srtt = Some((srtt * 7 + sample) / 8);
            },
        }

        let srtt = self.srtt.unwrap_or(sample);
        let rto = srtt + GRANULARITY.max(self.rttvar * 4);
        self.rto = rto.max(min_rto).min(max_rto);
        net_trace!("tcp: rtt sample {:?}, rto {:?}", sample, self.rto);
    }

    /// The smoothed round trip time, if any sample was taken.
    pub fn smoothed(&self) -> Option<Duration> {
        self.srtt
    }
}

//! The periodic timer sweep.
//!
//! Timers never fire on their own. Each sweep checks the five timers of every connection in a
//! fixed order: retransmission, persist, override, FIN-WAIT-2 and TIME-WAIT. A connection that
//! is closed by one of them is not looked at by the later ones.
use crate::layer::ip::IpLayer;
use crate::time::{Duration, Instant};

use super::Config;
use super::connection::{clamp_u32, Connection, State};
use super::endpoint::Endpoint;
use super::siphash::IsnSource;

impl<G: IsnSource> Endpoint<G> {
    /// Check the timers of all connections.
    ///
    /// Must be called periodically, see `poll_at` for when. Connections that time out are closed
    /// and their slot is freed unless the application still holds their key.
    pub fn tick<I>(&mut self, ip: &mut I, now: Instant)
        where I: IpLayer + ?Sized
    {
        let config = *self.config();
        for idx in 0..self.slot_count() {
            if let Some(conn) = self.slot_mut(idx) {
                conn.tick(ip, &config, now);
            }
            self.reap(idx);
        }
    }
}

impl Connection {
    fn is_closed(&self) -> bool {
        self.current == State::Closed
    }

    pub(crate) fn tick<I>(&mut self, ip: &mut I, config: &Config, now: Instant)
        where I: IpLayer + ?Sized
    {
        if self.is_closed() || self.current == State::Listen {
            return;
        }

        self.tick_retransmit(ip, config, now);
        if self.is_closed() {
            return;
        }

        self.tick_persist(ip, config, now);
        if self.is_closed() {
            return;
        }

        self.tick_override(ip, config, now);

        if self.timers.fin_wait_2.elapsed(now) {
            net_debug!("tcp: no fin from {}:{}, closing", self.tuple.remote, self.tuple.remote_port);
            self.change_state(State::Closed, config, now);
            return;
        }

        if self.timers.time_wait.elapsed(now) {
            self.change_state(State::Closed, config, now);
        }
    }

    fn tick_retransmit<I>(&mut self, ip: &mut I, config: &Config, now: Instant)
        where I: IpLayer + ?Sized
    {
        if self.retransmit.is_empty() || !self.timers.retransmit.elapsed(now) {
            return;
        }

        // First timeout of this loss episode.
        if self.retransmit_count == 0 {
            let flight = self.flight_size();
            self.flow_control.on_retransmit_timeout(
                flight,
                self.sender_maximum_segment_size,
                self.send.next,
                config.loss_window,
                clamp_u32(self.tx.capacity()));
        }

        if self.retransmit_count < config.max_retries {
            if let Err(err) = self.retransmit_segment(ip, config) {
                net_debug!("tcp: retransmission failed: {}", err);
            }
            self.rtt.rto = (self.timers.retransmit.configured_interval() * 2).min(config.max_rto);
            self.timers.retransmit.start(now, self.rtt.rto);
            self.retransmit_count += 1;
        } else {
            net_debug!("tcp: giving up after {} retransmissions", self.retransmit_count);
            self.rtt.clear();
            self.timers.retransmit.stop();
            self.change_state(State::Closed, config, now);
        }
    }

    fn tick_persist<I>(&mut self, ip: &mut I, config: &Config, now: Instant)
        where I: IpLayer + ?Sized
    {
        if self.send.window != 0
            || self.persist.interval == Duration::from_millis(0)
            || !self.timers.persist.elapsed(now)
        {
            return;
        }

        if self.persist.count < config.max_retries {
            if let Err(err) = self.send_probe(ip, config) {
                net_debug!("tcp: window probe failed: {}", err);
            }
            self.persist.interval = (self.persist.interval * 2).min(config.max_probe_interval);
            self.timers.persist.start(now, self.persist.interval);
            self.persist.count += 1;
        } else {
            net_debug!("tcp: window stayed closed after {} probes", self.persist.count);
            self.change_state(State::Closed, config, now);
        }
    }

    /// Send data that Nagle's algorithm held back for too long.
    ///
    /// Sends are synchronous so the whole usable window is drained at once.
    fn tick_override<I>(&mut self, ip: &mut I, config: &Config, now: Instant)
        where I: IpLayer + ?Sized
    {
        match self.current {
            State::Established | State::CloseWait => (),
            _ => return,
        }

        if self.send.unsent == 0 || !self.timers.sws_override.elapsed(now) {
            return;
        }

        let smss = self.sender_maximum_segment_size as usize;
        let mut usable = self.usable_window();
        while usable > 0 && self.send.unsent > 0 {
            let len = usable.min(self.send.unsent).min(smss);
            let result = self.send_data(ip, len, config, now);
            usable -= len;
            if let Err(err) = result {
                net_debug!("tcp: override send failed: {}", err);
                break;
            }
        }

        self.signals.writable = true;
        if self.send.unsent > 0 {
            self.timers.sws_override.start(now, config.override_timeout);
        } else {
            self.timers.sws_override.stop();
        }
    }
}

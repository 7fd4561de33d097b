use alloc::vec::Vec;

use crate::layer::Error;
use crate::layer::ip::{Capture, Datagram, Interface};
use crate::time::{Duration, Expiration, Instant};
use crate::wire::{IpAddress, TcpRepr, TcpSeqNumber};

use super::*;

const CLIENT: IpAddress = IpAddress::v4(10, 0, 0, 1);
const SERVER: IpAddress = IpAddress::v4(10, 0, 0, 2);

/// Two endpoints connected by in-memory ip layers.
struct Pair {
    client: Endpoint<FixedIsn>,
    server: Endpoint<FixedIsn>,
    client_ip: Capture,
    server_ip: Capture,
    now: Instant,
}

impl Pair {
    fn new(config: Config) -> Self {
        Pair {
            client: Endpoint::new(4, config, FixedIsn(TcpSeqNumber(100))),
            server: Endpoint::new(4, config, FixedIsn(TcpSeqNumber(300))),
            client_ip: Capture::new(CLIENT),
            server_ip: Capture::new(SERVER),
            now: Instant::from_millis(0),
        }
    }

    /// A connection from the client to port 80, accepted by the server.
    fn established(config: Config) -> (Self, SlotKey, SlotKey) {
        let mut pair = Pair::new(config);
        let listener = pair.server.listen(SERVER, 80, 4).unwrap();
        let client = pair.client.connect(&mut pair.client_ip, SERVER, 80, pair.now).unwrap();
        pair.exchange();
        let server = pair.server.accept(listener).unwrap().expect("no connection to accept");
        assert_eq!(pair.client.state(client), Ok(State::Established));
        assert_eq!(pair.server.state(server), Ok(State::Established));
        pair.check_invariants();
        (pair, client, server)
    }

    fn to_server(&mut self, datagram: &Datagram) {
        self.server.process_segment(
            &mut self.server_ip,
            Interface(0),
            &datagram.header,
            &datagram.payload,
            self.now);
        self.check_invariants();
    }

    fn to_client(&mut self, datagram: &Datagram) {
        self.client.process_segment(
            &mut self.client_ip,
            Interface(0),
            &datagram.header,
            &datagram.payload,
            self.now);
        self.check_invariants();
    }

    /// Deliver datagrams in both directions until both sides are quiet.
    fn exchange(&mut self) {
        for _ in 0..64 {
            let from_client = self.client_ip.take_all();
            let from_server = self.server_ip.take_all();
            if from_client.is_empty() && from_server.is_empty() {
                return;
            }
            from_client.iter().for_each(|datagram| self.to_server(datagram));
            from_server.iter().for_each(|datagram| self.to_client(datagram));
        }
        panic!("endpoints did not settle");
    }

    fn advance(&mut self, millis: u64) {
        self.now += Duration::from_millis(millis);
        self.client.tick(&mut self.client_ip, self.now);
        self.server.tick(&mut self.server_ip, self.now);
        self.check_invariants();
    }

    fn check_invariants(&self) {
        for endpoint in [&self.client, &self.server].iter() {
            for (_, conn) in endpoint.connections() {
                assert!(conn.send.unacked <= conn.send.next,
                    "unacked {} beyond next {}", conn.send.unacked, conn.send.next);
                assert_eq!(conn.timers.retransmit.is_running(), !conn.retransmit_queue().is_empty(),
                    "retransmit timer out of sync in {}", conn.state());
                assert!(conn.flow_control.congestion_window as usize <= endpoint.config().tx_buffer_size);
                if conn.timers.persist.is_running() {
                    assert_eq!(conn.send.window, 0);
                }
            }
        }
    }
}

fn repr(datagram: &Datagram) -> TcpRepr {
    datagram.repr().expect("invalid segment")
}

#[test]
fn active_open() {
    let mut pair = Pair::new(Config::default());
    let listener = pair.server.listen(IpAddress::Unspecified, 80, 4).unwrap();
    let client = pair.client.connect(&mut pair.client_ip, SERVER, 80, pair.now).unwrap();
    assert_eq!(pair.client.state(client), Ok(State::SynSent));

    let syn = pair.client_ip.pop().unwrap();
    let syn_repr = repr(&syn);
    assert!(syn_repr.flags.syn());
    assert_eq!(syn_repr.seq_number, TcpSeqNumber(100));
    assert_eq!(syn_repr.ack_number, None);
    assert_eq!(syn_repr.max_seg_size, Some(1430));
    assert_eq!(syn_repr.dst_port, 80);
    pair.to_server(&syn);

    let syn_ack = pair.server_ip.pop().unwrap();
    let syn_ack_repr = repr(&syn_ack);
    assert!(syn_ack_repr.flags.syn());
    assert_eq!(syn_ack_repr.seq_number, TcpSeqNumber(300));
    assert_eq!(syn_ack_repr.ack_number, Some(TcpSeqNumber(101)));
    // Not established yet, so nothing to accept.
    assert_eq!(pair.server.accept(listener), Ok(None));
    pair.to_client(&syn_ack);
    assert_eq!(pair.client.state(client), Ok(State::Established));

    let ack = pair.client_ip.pop().unwrap();
    let ack_repr = repr(&ack);
    assert!(!ack_repr.flags.syn());
    assert_eq!(ack_repr.seq_number, TcpSeqNumber(101));
    assert_eq!(ack_repr.ack_number, Some(TcpSeqNumber(301)));
    pair.to_server(&ack);
    assert!(pair.server_ip.is_empty());

    let server = pair.server.accept(listener).unwrap().unwrap();
    assert_eq!(pair.server.state(server), Ok(State::Established));
    assert_eq!(pair.server.state(listener), Ok(State::Listen));
    assert!(pair.client.take_signals(client).unwrap().connected);
    assert_eq!(pair.client.connection(client).unwrap().sender_maximum_segment_size, 1430);
}

#[test]
fn simultaneous_open() {
    let mut pair = Pair::new(Config::default());
    let client = pair.client.connect(&mut pair.client_ip, SERVER, 49152, pair.now).unwrap();
    let server = pair.server.connect(&mut pair.server_ip, CLIENT, 49152, pair.now).unwrap();
    let client_syn = pair.client_ip.pop().unwrap();
    let server_syn = pair.server_ip.pop().unwrap();
    assert_eq!(repr(&client_syn).src_port, 49152);
    assert_eq!(repr(&server_syn).src_port, 49152);

    pair.to_server(&client_syn);
    pair.to_client(&server_syn);
    assert_eq!(pair.client.state(client), Ok(State::SynReceived));
    assert_eq!(pair.server.state(server), Ok(State::SynReceived));

    // Both SYNs are repeated with an acknowledgement.
    let client_syn_ack = pair.client_ip.pop().unwrap();
    assert!(repr(&client_syn_ack).flags.syn());
    assert_eq!(repr(&client_syn_ack).seq_number, TcpSeqNumber(100));
    assert_eq!(repr(&client_syn_ack).ack_number, Some(TcpSeqNumber(301)));
    let server_syn_ack = pair.server_ip.pop().unwrap();
    assert_eq!(repr(&server_syn_ack).ack_number, Some(TcpSeqNumber(101)));

    pair.to_server(&client_syn_ack);
    pair.to_client(&server_syn_ack);
    pair.exchange();
    assert_eq!(pair.client.state(client), Ok(State::Established));
    assert_eq!(pair.server.state(server), Ok(State::Established));
    assert!(pair.client.connection(client).unwrap().retransmit_queue().is_empty());
    assert!(pair.server.connection(server).unwrap().retransmit_queue().is_empty());
}

#[test]
fn graceful_close() {
    let (mut pair, client, server) = Pair::established(Config::default());
    let request = [b'a'; 399];
    let response = [b'b'; 399];

    assert_eq!(pair.client.send(&mut pair.client_ip, client, &request, pair.now), Ok(399));
    pair.exchange();
    assert_eq!(pair.server.send(&mut pair.server_ip, server, &response, pair.now), Ok(399));
    pair.exchange();

    let mut buf = [0; 512];
    assert_eq!(pair.server.recv(&mut pair.server_ip, server, &mut buf, pair.now), Ok(399));
    assert_eq!(&buf[..399], &request[..]);
    assert_eq!(pair.client.recv(&mut pair.client_ip, client, &mut buf, pair.now), Ok(399));
    assert_eq!(&buf[..399], &response[..]);
    assert!(pair.client_ip.is_empty() && pair.server_ip.is_empty());

    pair.client.close(&mut pair.client_ip, client, pair.now).unwrap();
    assert_eq!(pair.client.state(client), Ok(State::FinWait1));
    let fin = pair.client_ip.pop().unwrap();
    assert!(repr(&fin).flags.fin());
    assert_eq!(repr(&fin).seq_number, TcpSeqNumber(500));
    pair.to_server(&fin);
    assert_eq!(pair.server.state(server), Ok(State::CloseWait));
    assert!(pair.server.take_signals(server).unwrap().half_closed);

    let ack = pair.server_ip.pop().unwrap();
    assert_eq!(repr(&ack).ack_number, Some(TcpSeqNumber(501)));
    pair.to_client(&ack);
    assert_eq!(pair.client.state(client), Ok(State::FinWait2));

    pair.server.close(&mut pair.server_ip, server, pair.now).unwrap();
    assert_eq!(pair.server.state(server), Ok(State::LastAck));
    let fin = pair.server_ip.pop().unwrap();
    assert!(repr(&fin).flags.fin());
    assert_eq!(repr(&fin).seq_number, TcpSeqNumber(700));
    pair.to_client(&fin);
    assert_eq!(pair.client.state(client), Ok(State::TimeWait));

    let ack = pair.client_ip.pop().unwrap();
    assert_eq!(repr(&ack).ack_number, Some(TcpSeqNumber(701)));
    pair.to_server(&ack);
    assert_eq!(pair.server.state(server), Ok(State::Closed));

    // The reading side has seen the end of the stream.
    assert!(pair.client.connection(client).unwrap().recv.fin_received);
    assert_eq!(pair.server.recv(&mut pair.server_ip, server, &mut buf, pair.now), Err(Error::Closed));

    pair.advance(3999);
    assert_eq!(pair.client.state(client), Ok(State::TimeWait));
    pair.advance(1);
    assert_eq!(pair.client.state(client), Ok(State::Closed));
    assert!(pair.client.take_signals(client).unwrap().closed);

    pair.client.release(client).unwrap();
    assert_eq!(pair.client.state(client), Err(Error::NotFound));
    pair.server.release(server).unwrap();
    assert_eq!(pair.server.connection(server).err(), Some(Error::NotFound));
}

#[test]
fn duplicate_segment_is_acknowledged() {
    let (mut pair, client, server) = Pair::established(Config::default());
    pair.client.send(&mut pair.client_ip, client, b"hello", pair.now).unwrap();
    let data = pair.client_ip.pop().unwrap();

    pair.to_server(&data);
    let ack = pair.server_ip.pop().unwrap();
    assert_eq!(repr(&ack).ack_number, Some(TcpSeqNumber(106)));

    let before = pair.server.connection(server).unwrap().recv;
    pair.to_server(&data);
    let ack = pair.server_ip.pop().unwrap();
    assert_eq!(repr(&ack).seq_number, TcpSeqNumber(301));
    assert_eq!(repr(&ack).ack_number, Some(TcpSeqNumber(106)));
    assert!(pair.server_ip.is_empty());

    let conn = pair.server.connection(server).unwrap();
    assert_eq!(conn.state(), State::Established);
    assert_eq!(conn.recv.next, before.next);
    assert_eq!(conn.recv_buffered(), 5);
}

#[test]
fn retransmission_gives_up() {
    let config = Config {
        max_retries: 3,
        max_rto: Duration::from_secs(5),
        ..Config::default()
    };
    let (mut pair, client, _) = Pair::established(config);
    let data = [7; 1000];
    pair.client.send(&mut pair.client_ip, client, &data, pair.now).unwrap();
    let original = pair.client_ip.pop().unwrap();
    assert_eq!(repr(&original).payload_len, 1000);
    assert!(pair.client.connection(client).unwrap().rtt.busy);

    let mut rtos = Vec::new();
    let mut wait = 1000;
    for _ in 0..3 {
        pair.advance(wait - 1);
        assert!(pair.client_ip.is_empty());
        pair.advance(1);

        let resent = pair.client_ip.pop().expect("no retransmission");
        assert!(pair.client_ip.is_empty());
        assert_eq!(resent.payload, original.payload);

        let conn = pair.client.connection(client).unwrap();
        assert_eq!(conn.state(), State::Established);
        assert!(!conn.rtt.busy);
        rtos.push(conn.rtt.rto);
        wait = conn.rtt.rto.as_millis() as u64;
    }

    assert_eq!(rtos, [
        Duration::from_secs(2),
        Duration::from_secs(4),
        Duration::from_secs(5),
    ]);

    pair.advance(wait);
    assert!(pair.client_ip.is_empty());
    let conn = pair.client.connection(client).unwrap();
    assert_eq!(conn.state(), State::Closed);
    assert!(!conn.timers.retransmit.is_running());
}

#[test]
fn congestion_reset_once_per_episode() {
    let (mut pair, client, _) = Pair::established(Config::default());
    pair.client.send(&mut pair.client_ip, client, &[1; 2860], pair.now).unwrap();
    assert_eq!(pair.client_ip.take_all().len(), 2);
    assert_eq!(pair.client.connection(client).unwrap().flow_control.congestion_window, 2860);

    pair.advance(1000);
    {
        let conn = pair.client.connection(client).unwrap();
        assert_eq!(conn.retransmit_count, 1);
        assert_eq!(conn.flow_control.congestion_window, 1430);
        // Half of the octets in flight is below two segments.
        assert_eq!(conn.flow_control.ssthresh, 2860);
        assert_eq!(conn.flow_control.recover, TcpSeqNumber(2960));
        assert_eq!(conn.flow_control.state, CongestionState::LossRecovery);
    }

    pair.client.get_mut(client).unwrap().flow_control.congestion_window = 1000;
    pair.advance(2000);
    let conn = pair.client.connection(client).unwrap();
    assert_eq!(conn.retransmit_count, 2);
    assert_eq!(conn.flow_control.congestion_window, 1000);
    assert_eq!(pair.client_ip.take_all().len(), 2);
}

#[test]
fn recovery_after_transient_send_failure() {
    let (mut pair, client, server) = Pair::established(Config::default());
    pair.client_ip.set_failing(true);
    assert_eq!(pair.client.send(&mut pair.client_ip, client, b"lost", pair.now), Ok(4));
    assert!(pair.client_ip.is_empty());
    {
        let conn = pair.client.connection(client).unwrap();
        assert_eq!(conn.send.next, TcpSeqNumber(105));
        assert_eq!(conn.retransmit_queue().len(), 1);
    }

    pair.client_ip.set_failing(false);
    pair.advance(1000);
    assert_eq!(pair.client_ip.len(), 1);
    pair.exchange();

    let conn = pair.client.connection(client).unwrap();
    assert!(conn.retransmit_queue().is_empty());
    assert_eq!(conn.retransmit_count, 0);
    let mut buf = [0; 8];
    assert_eq!(pair.server.recv(&mut pair.server_ip, server, &mut buf, pair.now), Ok(4));
    assert_eq!(&buf[..4], b"lost");
}

#[test]
fn zero_window_persists() {
    let (mut pair, client, server) = Pair::established(Config::default());
    assert_eq!(pair.client.send(&mut pair.client_ip, client, &[3; 2860], pair.now), Ok(2860));
    pair.exchange();
    {
        let conn = pair.client.connection(client).unwrap();
        assert_eq!(conn.send.window, 0);
        assert_eq!(conn.flight_size(), 0);
        assert!(!conn.timers.persist.is_running());
    }

    assert_eq!(pair.client.send(&mut pair.client_ip, client, b"more", pair.now), Ok(4));
    assert!(pair.client_ip.is_empty());
    assert!(pair.client.connection(client).unwrap().timers.persist.is_running());

    pair.advance(1000);
    let segment = pair.client_ip.pop().expect("no persist segment");
    assert_eq!(repr(&segment).seq_number, TcpSeqNumber(101 + 2860 - 1));
    assert_eq!(repr(&segment).payload_len, 1);
    {
        let conn = pair.client.connection(client).unwrap();
        assert_eq!(conn.persist.count, 1);
        assert_eq!(conn.persist.interval, Duration::from_secs(2));
        assert_eq!(conn.send.unsent, 4);
    }

    // The receiver insists on its closed window.
    pair.to_server(&segment);
    let answer = pair.server_ip.pop().unwrap();
    assert_eq!(repr(&answer).window_len, 0);
    pair.to_client(&answer);
    assert!(pair.client.connection(client).unwrap().timers.persist.is_running());

    // Reading opens it again.
    let mut buf = [0; 4096];
    assert_eq!(pair.server.recv(&mut pair.server_ip, server, &mut buf, pair.now), Ok(2860));
    assert_eq!(pair.server_ip.len(), 1);
    pair.exchange();

    let conn = pair.client.connection(client).unwrap();
    assert!(!conn.timers.persist.is_running());
    assert_eq!(conn.send.unsent, 0);
    assert_eq!(pair.server.recv(&mut pair.server_ip, server, &mut buf, pair.now), Ok(4));
}

#[test]
fn closed_window_gives_up() {
    let config = Config {
        max_retries: 2,
        ..Config::default()
    };
    let (mut pair, client, _) = Pair::established(config);
    pair.client.send(&mut pair.client_ip, client, &[3; 2860], pair.now).unwrap();
    pair.exchange();
    pair.client.send(&mut pair.client_ip, client, b"x", pair.now).unwrap();

    pair.advance(1000);
    pair.advance(2000);
    assert_eq!(pair.client_ip.take_all().len(), 2);
    assert_eq!(pair.client.state(client), Ok(State::Established));
    pair.advance(4000);
    assert_eq!(pair.client.state(client), Ok(State::Closed));
}

#[test]
fn persist_interval_is_capped() {
    let config = Config {
        max_probe_interval: Duration::from_secs(4),
        ..Config::default()
    };
    let (mut pair, client, _) = Pair::established(config);
    pair.client.send(&mut pair.client_ip, client, &[3; 2860], pair.now).unwrap();
    pair.exchange();
    pair.client.send(&mut pair.client_ip, client, b"x", pair.now).unwrap();

    let mut intervals = Vec::new();
    let mut wait = 1000;
    for _ in 0..4 {
        pair.advance(wait);
        assert_eq!(pair.client_ip.take_all().len(), 1);
        let interval = pair.client.connection(client).unwrap().persist.interval;
        intervals.push(interval);
        wait = interval.as_millis() as u64;
    }

    assert_eq!(intervals, [
        Duration::from_secs(2),
        Duration::from_secs(4),
        Duration::from_secs(4),
        Duration::from_secs(4),
    ]);
    assert_eq!(pair.client.state(client), Ok(State::Established));
}

#[test]
fn nagle_and_override() {
    let (mut pair, client, _) = Pair::established(Config::default());
    pair.client.send(&mut pair.client_ip, client, b"first", pair.now).unwrap();
    assert_eq!(pair.client_ip.len(), 1);

    // Held back while the first segment is unacknowledged.
    pair.client.send(&mut pair.client_ip, client, b"second", pair.now).unwrap();
    assert_eq!(pair.client_ip.len(), 1);
    assert!(pair.client.connection(client).unwrap().timers.sws_override.is_running());

    pair.advance(500);
    let segments = pair.client_ip.take_all();
    assert_eq!(segments.len(), 2);
    assert_eq!(repr(&segments[1]).seq_number, TcpSeqNumber(106));
    assert_eq!(segments[1].tcp_payload().unwrap(), b"second");

    let conn = pair.client.connection(client).unwrap();
    assert_eq!(conn.send.unsent, 0);
    assert!(!conn.timers.sws_override.is_running());
    assert!(pair.client.take_signals(client).unwrap().writable);
}

#[test]
fn fast_retransmit() {
    let config = Config {
        max_mss: 100,
        initial_window: 10,
        ..Config::default()
    };
    let (mut pair, client, server) = Pair::established(config);
    pair.client.send(&mut pair.client_ip, client, &[9; 500], pair.now).unwrap();
    let segments = pair.client_ip.take_all();
    assert_eq!(segments.len(), 5);

    // The first segment is lost, the others produce duplicate acknowledgements.
    segments[1..].iter().for_each(|segment| pair.to_server(segment));
    let duplicates = pair.server_ip.take_all();
    assert_eq!(duplicates.len(), 4);
    assert!(duplicates.iter().all(|ack| repr(ack).ack_number == Some(TcpSeqNumber(101))));

    duplicates[..2].iter().for_each(|ack| pair.to_client(ack));
    assert!(pair.client_ip.is_empty());
    pair.to_client(&duplicates[2]);
    let resent = pair.client_ip.take_all();
    assert_eq!(resent.len(), 1);
    assert_eq!(repr(&resent[0]).seq_number, TcpSeqNumber(101));
    assert_eq!(pair.client.connection(client).unwrap().flow_control.state, CongestionState::FastRecovery);

    pair.to_client(&duplicates[3]);
    pair.to_server(&resent[0]);
    // Partial acknowledgements resend one segment each.
    pair.exchange();

    let conn = pair.client.connection(client).unwrap();
    assert!(conn.retransmit_queue().is_empty());
    assert_eq!(conn.flow_control.state, CongestionState::Open);
    let mut buf = [0; 600];
    assert_eq!(pair.server.recv(&mut pair.server_ip, server, &mut buf, pair.now), Ok(500));
}

#[test]
fn simultaneous_close() {
    let (mut pair, client, server) = Pair::established(Config::default());
    pair.client.close(&mut pair.client_ip, client, pair.now).unwrap();
    pair.server.close(&mut pair.server_ip, server, pair.now).unwrap();
    let client_fin = pair.client_ip.pop().unwrap();
    let server_fin = pair.server_ip.pop().unwrap();

    pair.to_client(&server_fin);
    assert_eq!(pair.client.state(client), Ok(State::Closing));
    pair.to_server(&client_fin);
    assert_eq!(pair.server.state(server), Ok(State::Closing));

    pair.exchange();
    assert_eq!(pair.client.state(client), Ok(State::TimeWait));
    assert_eq!(pair.server.state(server), Ok(State::TimeWait));

    // A retransmitted FIN is acknowledged again and restarts the timer.
    pair.advance(2000);
    pair.to_client(&server_fin);
    assert_eq!(repr(&pair.client_ip.pop().unwrap()).ack_number, Some(TcpSeqNumber(302)));
    pair.advance(2000);
    assert_eq!(pair.client.state(client), Ok(State::TimeWait));
    assert_eq!(pair.server.state(server), Ok(State::Closed));
    pair.advance(2000);
    assert_eq!(pair.client.state(client), Ok(State::Closed));
}

#[test]
fn time_wait_frees_released_slot() {
    let (mut pair, client, server) = Pair::established(Config::default());
    pair.client.close(&mut pair.client_ip, client, pair.now).unwrap();
    pair.exchange();
    pair.server.close(&mut pair.server_ip, server, pair.now).unwrap();
    pair.exchange();
    assert_eq!(pair.client.state(client), Ok(State::TimeWait));

    pair.client.release(client).unwrap();
    assert_eq!(pair.client.connections().count(), 1);
    pair.advance(4000);
    assert_eq!(pair.client.connections().count(), 0);
    assert_eq!(pair.client.state(client), Err(Error::NotFound));
}

#[test]
fn fin_wait_2_expires() {
    let (mut pair, client, _) = Pair::established(Config::default());
    pair.client.close(&mut pair.client_ip, client, pair.now).unwrap();
    pair.exchange();
    assert_eq!(pair.client.state(client), Ok(State::FinWait2));
    pair.advance(4000);
    assert_eq!(pair.client.state(client), Ok(State::Closed));
}

#[test]
fn abort_resets_remote() {
    let (mut pair, client, server) = Pair::established(Config::default());
    pair.client.abort(&mut pair.client_ip, client, pair.now).unwrap();
    assert_eq!(pair.client.state(client), Ok(State::Closed));
    let reset = pair.client_ip.pop().unwrap();
    assert!(repr(&reset).flags.rst());
    pair.to_server(&reset);
    assert!(pair.server_ip.is_empty());

    assert_eq!(pair.server.state(server), Ok(State::Closed));
    let signals = pair.server.take_signals(server).unwrap();
    assert!(signals.reset && signals.closed);
    assert_eq!(pair.server.send(&mut pair.server_ip, server, b"late", pair.now), Err(Error::Closed));
}

#[test]
fn connection_refused() {
    let mut pair = Pair::new(Config::default());
    let client = pair.client.connect(&mut pair.client_ip, SERVER, 81, pair.now).unwrap();
    pair.exchange();

    assert_eq!(pair.client.state(client), Ok(State::Closed));
    assert!(pair.client.take_signals(client).unwrap().reset);
    assert_eq!(pair.server.connections().count(), 0);
}

#[test]
fn reset_for_unknown_connection() {
    let mut pair = Pair::new(Config::default());
    let client = pair.client.connect(&mut pair.client_ip, SERVER, 81, pair.now).unwrap();
    let syn = pair.client_ip.pop().unwrap();
    pair.to_server(&syn);

    let reset = repr(&pair.server_ip.pop().unwrap());
    assert!(reset.flags.rst());
    assert_eq!(reset.seq_number, TcpSeqNumber(0));
    assert_eq!(reset.ack_number, Some(TcpSeqNumber(101)));
    assert_eq!(pair.client.state(client), Ok(State::SynSent));
}

#[test]
fn corrupted_segment_is_ignored() {
    let (mut pair, client, server) = Pair::established(Config::default());
    pair.client.send(&mut pair.client_ip, client, b"data", pair.now).unwrap();
    let mut data = pair.client_ip.pop().unwrap();
    let last = data.payload.len() - 1;
    data.payload[last] ^= 0xff;
    pair.to_server(&data);
    assert!(pair.server_ip.is_empty());
    assert_eq!(pair.server.connection(server).unwrap().recv_buffered(), 0);
}

#[test]
fn listener_backlog() {
    let mut pair = Pair::new(Config::default());
    let listener = pair.server.listen(SERVER, 80, 1).unwrap();
    assert_eq!(pair.server.listen(SERVER, 80, 1), Err(Error::Illegal));
    pair.client.connect(&mut pair.client_ip, SERVER, 80, pair.now).unwrap();
    pair.client.connect(&mut pair.client_ip, SERVER, 80, pair.now).unwrap();
    let syns = pair.client_ip.take_all();
    assert_eq!(syns.len(), 2);
    syns.iter().for_each(|syn| pair.to_server(syn));

    // Only one connection was spawned.
    assert_eq!(pair.server_ip.len(), 1);
    assert_eq!(pair.server.connections().count(), 2);

    pair.server.close(&mut pair.server_ip, listener, pair.now).unwrap();
    assert_eq!(pair.server.connections().count(), 1);
    assert_eq!(pair.server.state(listener), Ok(State::Closed));
}

#[test]
fn slots_are_exhausted() {
    let mut pair = Pair::new(Config::default());
    for _ in 0..4 {
        pair.client.connect(&mut pair.client_ip, SERVER, 80, pair.now).unwrap();
    }
    assert_eq!(pair.client.connect(&mut pair.client_ip, SERVER, 80, pair.now), Err(Error::Exhausted));
    assert_eq!(pair.client.connect(&mut pair.client_ip, IpAddress::Unspecified, 80, pair.now), Err(Error::Unreachable));
    let ports: Vec<u16> = pair.client.connections().map(|(_, conn)| conn.tuple.local_port).collect();
    assert_eq!(ports, [49152, 49153, 49154, 49155]);
}

#[test]
fn poll_at_reports_earliest_timer() {
    let (mut pair, client, _) = Pair::established(Config::default());
    assert_eq!(pair.client.poll_at(pair.now), Expiration::Never);
    pair.client.send(&mut pair.client_ip, client, b"x", pair.now).unwrap();
    assert_eq!(pair.client.poll_at(pair.now), Expiration::When(pair.now + Duration::from_secs(1)));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Debug)]
    enum Op {
        ClientSend(usize),
        ServerSend(usize),
        Deliver { drop_client: bool, drop_server: bool },
        ClientRecv,
        ServerRecv,
        Advance(u64),
    }

    fn op() -> impl Strategy<Value=Op> {
        prop_oneof![
            (1usize..3000).prop_map(Op::ClientSend),
            (1usize..3000).prop_map(Op::ServerSend),
            (any::<bool>(), any::<bool>())
                .prop_map(|(drop_client, drop_server)| Op::Deliver { drop_client, drop_server }),
            Just(Op::ClientRecv),
            Just(Op::ServerRecv),
            (1u64..3000).prop_map(Op::Advance),
        ]
    }

    proptest! {
        #[test]
        fn invariants_hold(ops in proptest::collection::vec(op(), 1..64)) {
            let (mut pair, client, server) = Pair::established(Config::default());
            let data = [0x55; 3000];
            let mut buf = [0; 3000];

            for op in ops {
                match op {
                    Op::ClientSend(len) => {
                        let _ = pair.client.send(&mut pair.client_ip, client, &data[..len], pair.now);
                    },
                    Op::ServerSend(len) => {
                        let _ = pair.server.send(&mut pair.server_ip, server, &data[..len], pair.now);
                    },
                    Op::Deliver { drop_client, drop_server } => {
                        let from_client = pair.client_ip.take_all();
                        let from_server = pair.server_ip.take_all();
                        if !drop_client {
                            from_client.iter().for_each(|datagram| pair.to_server(datagram));
                        }
                        if !drop_server {
                            from_server.iter().for_each(|datagram| pair.to_client(datagram));
                        }
                    },
                    Op::ClientRecv => {
                        let _ = pair.client.recv(&mut pair.client_ip, client, &mut buf, pair.now);
                    },
                    Op::ServerRecv => {
                        let _ = pair.server.recv(&mut pair.server_ip, server, &mut buf, pair.now);
                    },
                    Op::Advance(millis) => pair.advance(millis),
                }
                pair.check_invariants();
            }

            for (_, conn) in pair.client.connections().chain(pair.server.connections()) {
                let rto = conn.rtt.rto;
                prop_assert!(rto <= Config::default().max_rto);
            }
        }
    }
}

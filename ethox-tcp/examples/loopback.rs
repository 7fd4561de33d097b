//! Transfers data between two endpoints over a simulated lossy link.
//!
//! Both endpoints live in this process and share a virtual clock, so the transfer runs as fast as
//! the machine allows while the timers behave as if real time passed. Prints how long the transfer
//! took in virtual time and how many segments were lost on the way.
use structopt::StructOpt;

use ethox_tcp::layer::ip::{Capture, Interface};
use ethox_tcp::layer::tcp::{Config, Endpoint, IsnGenerator, State};
use ethox_tcp::time::{Duration, Instant};
use ethox_tcp::wire::IpAddress;

const CLIENT: IpAddress = IpAddress::v4(10, 0, 0, 1);
const SERVER: IpAddress = IpAddress::v4(10, 0, 0, 2);

fn main() {
    let Options {
        bytes,
        loss,
        seed,
        step,
        limit,
    } = Options::from_args();

    let config = Config::default();
    let mut client = Endpoint::new(1, config, IsnGenerator::from_std_hash());
    let mut server = Endpoint::new(2, config, IsnGenerator::from_std_hash());
    let mut client_ip = Capture::new(CLIENT);
    let mut server_ip = Capture::new(SERVER);
    let mut link = Link::new(loss, seed);
    let mut now = Instant::from_millis(0);

    let listener = server.listen(SERVER, 80, 1).unwrap();
    let conn = client.connect(&mut client_ip, SERVER, 80, now).unwrap();
    let mut accepted = None;

    let data: Vec<u8> = (0..bytes).map(|i| i as u8).collect();
    let mut written = 0;
    let mut received = Vec::with_capacity(bytes);
    let mut buf = vec![0; 1 << 12];
    let deadline = Instant::from_secs(limit);

    while now.is_before(deadline) {
        for datagram in client_ip.take_all() {
            if link.pass() {
                server.process_segment(&mut server_ip, Interface(0), &datagram.header, &datagram.payload, now);
            }
        }
        for datagram in server_ip.take_all() {
            if link.pass() {
                client.process_segment(&mut client_ip, Interface(0), &datagram.header, &datagram.payload, now);
            }
        }

        if accepted.is_none() {
            accepted = server.accept(listener).unwrap();
        }

        if let Ok(State::Established) = client.state(conn) {
            if written < data.len() {
                written += client.send(&mut client_ip, conn, &data[written..], now).unwrap_or(0);
            } else if written == data.len() {
                client.close(&mut client_ip, conn, now).unwrap();
                written += 1;
            }
        }

        if let Some(key) = accepted {
            while let Ok(read) = server.recv(&mut server_ip, key, &mut buf, now) {
                if read == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..read]);
            }

            if let Ok(State::CloseWait) = server.state(key) {
                server.close(&mut server_ip, key, now).unwrap();
            }
        }

        let done = client.state(conn) == Ok(State::Closed)
            && accepted.map(|key| server.state(key) == Ok(State::Closed)).unwrap_or(false);
        if done {
            break;
        }

        now += Duration::from_millis(step);
        client.tick(&mut client_ip, now);
        server.tick(&mut server_ip, now);
    }

    let intact = received == data;
    println!("transferred {} of {} bytes in {}", received.len(), bytes, now);
    println!("dropped {} of {} segments", link.dropped, link.total);
    println!("data intact: {}", intact);
    if !intact {
        std::process::exit(1);
    }
}

/// Drops segments at random.
///
/// Xoroshiro256**, the quality is far more than needed.
struct Link {
    state: [u64; 4],
    threshold: u64,
    dropped: usize,
    total: usize,
}

impl Link {
    fn new(loss: f64, seed: u64) -> Self {
        let loss = loss.max(0.0).min(1.0);
        Link {
            state: [seed, seed ^ 0x9e37_79b9_7f4a_7c15, 0, 1],
            threshold: (loss * u64::max_value() as f64) as u64,
            dropped: 0,
            total: 0,
        }
    }

    fn pass(&mut self) -> bool {
        self.total += 1;
        let lost = self.threshold > 0 && self.next() <= self.threshold;
        if lost {
            self.dropped += 1;
        }
        !lost
    }

    fn next(&mut self) -> u64 {
        let s = &mut self.state;
        let result = s[1]
            .wrapping_mul(5)
            .rotate_left(7)
            .wrapping_mul(9);
        let t = s[1] << 17;

        s[2] ^= s[0];
        s[3] ^= s[1];
        s[1] ^= s[2];
        s[0] ^= s[3];
        s[2] ^= t;
        s[3] = s[3].rotate_left(45);

        result
    }
}

#[derive(StructOpt)]
struct Options {
    /// Number of bytes to transfer.
    #[structopt(long = "bytes", default_value = "100000")]
    bytes: usize,

    /// Probability of losing a segment, between 0 and 1.
    #[structopt(long = "loss", default_value = "0.05")]
    loss: f64,

    /// Seed of the loss simulation.
    #[structopt(long = "seed", default_value = "1")]
    seed: u64,

    /// Milliseconds of virtual time per round.
    #[structopt(long = "step", default_value = "10")]
    step: u64,

    /// Give up after this many seconds of virtual time.
    #[structopt(long = "limit", default_value = "600")]
    limit: u32,
}

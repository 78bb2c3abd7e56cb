//! Common test utilities for the congestion pipeline
//!
//! Provides a seeded synthetic traffic generator, CSV writers and canonical
//! busy / idle records shared by the integration tests and benches.

#![allow(dead_code)]

use congestion_predictor::ml::RawRecord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const CSV_HEADER: &str =
    "duration,src_bytes,dst_bytes,packet_count,hour,protocol,service,congestion";

const PEAK_HOURS: [u32; 6] = [7, 8, 9, 17, 18, 19];

/// (service, protocol, probability)
const SERVICES: [(&str, &str, f64); 7] = [
    ("http", "TCP", 0.4),
    ("ftp", "TCP", 0.05),
    ("ssh", "TCP", 0.05),
    ("smtp", "TCP", 0.1),
    ("dns", "UDP", 0.2),
    ("ntp", "UDP", 0.1),
    ("other", "UDP", 0.1),
];

/// One labeled dataset row
#[derive(Debug, Clone)]
pub struct TrafficRow {
    pub duration: f64,
    pub src_bytes: i64,
    pub dst_bytes: i64,
    pub packet_count: u64,
    pub hour: u32,
    pub protocol: &'static str,
    pub service: &'static str,
    pub congestion: u8,
}

impl TrafficRow {
    pub fn to_record(&self) -> RawRecord {
        record(
            self.duration,
            self.src_bytes as f64,
            self.dst_bytes as f64,
            self.packet_count,
            self.hour,
            self.protocol,
            self.service,
        )
    }

    fn csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.duration,
            self.src_bytes,
            self.dst_bytes,
            self.packet_count,
            self.hour,
            self.protocol,
            self.service,
            self.congestion
        )
    }
}

/// Synthetic traffic: peak hours carry longer, heavier connections, and a
/// row is congested when packets x duration is high or a peak-hour
/// connection exceeds 80 packets.
pub fn generate_traffic(n: usize, seed: u64) -> Vec<TrafficRow> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..n)
        .map(|_| {
            let hour = rng.gen_range(0..24u32);
            let peak = PEAK_HOURS.contains(&hour);

            let (mut service, mut protocol) = pick_service(&mut rng);
            if rng.gen::<f64>() < 0.05 {
                protocol = "ICMP";
                service = "none";
            }

            let duration = exponential(&mut rng, if peak { 8.0 } else { 4.0 });
            let src_bytes = normal(&mut rng, if peak { 5000.0 } else { 1000.0 }, 800.0) as i64;
            let dst_bytes = normal(&mut rng, if peak { 3000.0 } else { 700.0 }, 500.0) as i64;
            let packet_count = poisson(&mut rng, if peak { 60.0 } else { 20.0 });

            let load_factor = (packet_count as f64 / 100.0) * (duration / 10.0);
            let congested = load_factor > 1.0 || (peak && packet_count > 80);

            TrafficRow {
                duration,
                src_bytes: src_bytes.max(0),
                dst_bytes: dst_bytes.max(0),
                packet_count,
                hour,
                protocol,
                service,
                congestion: congested as u8,
            }
        })
        .collect()
}

/// Congested rows clustered tightly around `busy_record()`
pub fn busy_rows(n: usize) -> Vec<TrafficRow> {
    (0..n)
        .map(|j| TrafficRow {
            duration: 9.5 + (j % 11) as f64 * 0.1,
            src_bytes: 4900 + ((j * 37) % 200) as i64,
            dst_bytes: 2950 + ((j * 53) % 100) as i64,
            packet_count: 57 + (j % 7) as u64,
            hour: 8,
            protocol: "TCP",
            service: "http",
            congestion: 1,
        })
        .collect()
}

/// The documented distribution plus a block of labeled busy rows
pub fn training_rows() -> Vec<TrafficRow> {
    let mut rows = generate_traffic(1500, 42);
    rows.extend(busy_rows(250));
    rows
}

pub fn write_csv(path: &Path, rows: &[TrafficRow]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", CSV_HEADER)?;
    for row in rows {
        writeln!(out, "{}", row.csv_line())?;
    }
    out.flush()
}

pub fn record(
    duration: f64,
    src_bytes: f64,
    dst_bytes: f64,
    packet_count: u64,
    hour: u32,
    protocol: &str,
    service: &str,
) -> RawRecord {
    json!({
        "duration": duration,
        "src_bytes": src_bytes,
        "dst_bytes": dst_bytes,
        "packet_count": packet_count,
        "hour": hour,
        "protocol": protocol,
        "service": service,
    })
    .as_object()
    .cloned()
    .unwrap()
}

/// High-load peak-hour connection
pub fn busy_record() -> RawRecord {
    record(10.0, 5000.0, 3000.0, 60, 8, "TCP", "http")
}

/// Near-idle off-peak connection
pub fn idle_record() -> RawRecord {
    record(1.0, 50.0, 50.0, 2, 3, "UDP", "dns")
}

fn pick_service(rng: &mut StdRng) -> (&'static str, &'static str) {
    let draw: f64 = rng.gen();
    let mut cumulative = 0.0;
    for (service, protocol, p) in SERVICES {
        cumulative += p;
        if draw < cumulative {
            return (service, protocol);
        }
    }
    ("other", "UDP")
}

fn exponential(rng: &mut StdRng, scale: f64) -> f64 {
    let u: f64 = rng.gen();
    -(1.0 - u).ln() * scale
}

/// Box-Muller transform
fn normal(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    mean + std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Knuth's multiplication method
fn poisson(rng: &mut StdRng, lambda: f64) -> u64 {
    let limit = (-lambda).exp();
    let mut k = 0;
    let mut product: f64 = rng.gen();
    while product > limit {
        k += 1;
        product *= rng.gen::<f64>();
    }
    k
}

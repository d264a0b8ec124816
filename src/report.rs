use std::{net::Ipv4Addr, time::Duration};

use chrono::{DateTime, Local};
use pad::{Alignment, PadStr};

use crate::scan::ScanResult;

const WIDTH: usize = 50;

fn rule() -> String {
    "=".repeat(WIDTH)
}

pub fn banner(name: &str, version: &str) -> String {
    let title = format!("{} {}", name, version);
    format!(
        "{rule}\n{}\n\
        Scans every TCP port of a host with a pool of\n\
        concurrent connect probes and prints the ports\n\
        that accept a connection.\n{rule}\n",
        title.pad_to_width_with_alignment(WIDTH, Alignment::Middle),
        rule = rule(),
    )
}

#[inline]
pub fn open_line(port: u16) -> String {
    format!("Port {} is open", port)
}

pub fn start_lines(ip: Ipv4Addr, started: DateTime<Local>) -> String {
    format!(
        "Scanning target IP: {}\nTime started: {}\n",
        ip,
        started.format("%Y-%m-%d %H:%M:%S%.6f")
    )
}

/// `H:MM:SS.ffffff`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        secs % 3600 / 60,
        secs % 60,
        elapsed.subsec_micros()
    )
}

pub fn elapsed_line(elapsed: Duration) -> String {
    format!("Port scan completed in {}\n", format_elapsed(elapsed))
}

pub fn cancelled_line(result: &ScanResult) -> String {
    format!(
        "Port scan cancelled after {} ({} of {} ports probed)\n",
        format_elapsed(result.elapsed),
        result.probed,
        result.total
    )
}

pub fn summary(open: &[u16]) -> String {
    let list = open
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",");

    format!("{}\nOpen ports are: \n{}\n", rule(), list)
}

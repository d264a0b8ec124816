use std::{process, time::Duration};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{
    arg, crate_authors, crate_name, crate_version, value_parser, ArgAction, ArgMatches, Command,
};
use log::LevelFilter;
use tscan::{
    error::ScanError,
    logger, report, resolver,
    scan::{cancel::CancelToken, probe::DEFAULT_TIMEOUT, ScanStatus, Scanner, FIRST_PORT, LAST_PORT},
};

struct ParsedArgs {
    log_level: LevelFilter,
    quiet: bool,
    target: String,
    workers: usize,
    timeout: Duration,
    ports: (u16, u16),
}

fn parse_range(raw: &str) -> Result<(u16, u16), ScanError> {
    let invalid = || ScanError::InvalidPortRange(raw.into());

    let (lower, upper) = match raw.split_once('-') {
        Some((lower, upper)) => (lower.trim(), upper.trim()),
        None => (raw.trim(), raw.trim()),
    };
    let lower = lower.parse::<u16>().map_err(|_| invalid())?;
    let upper = upper.parse::<u16>().map_err(|_| invalid())?;

    if lower == 0 || lower > upper {
        return Err(invalid());
    }

    Ok((lower, upper))
}

fn parse_args(matches: ArgMatches) -> Result<ParsedArgs, ScanError> {
    let log_level = match matches.get_count("debug") {
        0 => LevelFilter::Off,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let quiet = matches.get_flag("quiet");

    let target = matches
        .get_one::<String>("TARGET_HOST")
        .cloned()
        .unwrap_or_default();

    let workers = *matches.get_one::<usize>("THREAD_NUM").unwrap_or(&0);
    if workers == 0 {
        return Err(ScanError::InvalidWorkerCount(workers.to_string()));
    }

    let timeout = matches
        .get_one::<u64>("timeout-ms")
        .map(|ms| Duration::from_millis(*ms))
        .unwrap_or(DEFAULT_TIMEOUT);

    let ports = match matches.get_one::<String>("ports") {
        Some(raw) => parse_range(raw)?,
        None => (FIRST_PORT, LAST_PORT),
    };

    Ok(ParsedArgs {
        log_level,
        quiet,
        target,
        workers,
        timeout,
        ports,
    })
}

fn command() -> Command {
    Command::new(crate_name!())
        .about(
            "Concurrent TCP connect scanner.\n\
            Probes every port of TARGET_HOST using THREAD_NUM workers (recommended: 200).",
        )
        .version(crate_version!())
        .arg_required_else_help(true)
        .author(crate_authors!())
        .args([
            arg!(<TARGET_HOST> "Address or hostname to scan"),
            arg!(<THREAD_NUM> "Number of concurrent workers").value_parser(value_parser!(usize)),
        ])
        .args([
            // Miscellaneous arguments.
            arg!(-d --debug... "Turns on debugging information (twice for every probe)")
                .action(ArgAction::Count),
            arg!(-q --quiet "Don't print the banner").action(ArgAction::SetTrue),
            arg!(-t --"timeout-ms" <MS> "Connect timeout per port in milliseconds")
                .value_parser(value_parser!(u64).range(1..)),
            arg!(-p --ports <RANGE> "Inclusive port range to scan, e.g. 1-1024"),
        ])
}

fn main() -> Result<()> {
    // Extract arguments.
    let parsed = parse_args(command().get_matches())?;

    logger::init(parsed.log_level);

    if !parsed.quiet {
        print!("{}", report::banner(crate_name!(), crate_version!()));
    }

    // Parse target.
    let ip = resolver::lookup(&parsed.target)
        .with_context(|| format!("cannot scan `{}`", parsed.target))?;

    // First Ctrl-C stops the scan and keeps what was found, second one exits.
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_token.cancel() {
            eprintln!("\nCancelling scan, press Ctrl-C again to exit now");
        } else {
            eprintln!("\nForce exiting...");
            process::exit(130);
        }
    })
    .map_err(ScanError::SignalHandlerFailed)?;

    let (lower, upper) = parsed.ports;
    let scanner = Scanner::new(ip, parsed.workers)?
        .timeout(parsed.timeout)
        .ports(lower, upper)?
        .cancel_token(cancel)
        .on_open(|port| println!("{}", report::open_line(port)));

    print!("{}", report::start_lines(scanner.ip(), Local::now()));

    // Start scanner.
    let result = scanner.scan()?;

    // Show result.
    match result.status {
        ScanStatus::Complete => print!("{}", report::elapsed_line(result.elapsed)),
        ScanStatus::Cancelled => print!("{}", report::cancelled_line(&result)),
    }
    print!("{}", report::summary(&result.open));

    Ok(())
}

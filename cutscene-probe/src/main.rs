//! # Cutscene Probe
//!
//! Opens a cutscene container, prints its streams and walks its packets.
//!
//! ```text
//! cutscene-probe intro.bik --packets 500 --json
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use cutscene_core::media::{MediaKind, StreamInfo};
use cutscene_core::probe::probe;
use cutscene_core::CodecRegistry;

#[derive(Debug, PartialEq)]
struct ProbeOptions {
    input: PathBuf,
    format: String,
    packets: u64,
    json: bool,
}

#[derive(Debug, Default, Serialize)]
struct StreamTally {
    packets: u64,
    bytes: u64,
    keyframes: u64,
    last_pts: i64,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    input: PathBuf,
    fps: f64,
    video_index: usize,
    audio_index: Option<usize>,
    streams: Vec<StreamInfo>,
    tally: BTreeMap<usize, StreamTally>,
    end_of_stream: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cutscene_core=info".parse()?)
                .add_directive("cutscene_probe=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;
    tracing::info!("Cutscene Probe v{}", cutscene_core::VERSION);

    let report = run(&options)?;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn run(options: &ProbeOptions) -> Result<ProbeReport> {
    let registry = CodecRegistry::with_builtin_formats();
    let mut probed = probe(&registry, &options.format, &options.input)?;

    let mut tally: BTreeMap<usize, StreamTally> = BTreeMap::new();
    let mut end_of_stream = false;
    for _ in 0..options.packets {
        match probed.demuxer.read_packet() {
            Ok(packet) => {
                let entry = tally.entry(packet.stream_index).or_default();
                entry.packets += 1;
                entry.bytes += packet.data.len() as u64;
                entry.keyframes += packet.keyframe as u64;
                entry.last_pts = packet.pts;
            }
            Err(e) if e.is_end_of_stream() => {
                end_of_stream = true;
                break;
            }
            Err(e) => {
                tracing::warn!("Stopped reading: {}", e);
                break;
            }
        }
    }

    let total: u64 = tally.values().map(|t| t.packets).sum();
    tracing::info!("Read {} packets (end of stream: {})", total, end_of_stream);

    Ok(ProbeReport {
        input: options.input.clone(),
        fps: probed.fps(),
        video_index: probed.video_index,
        audio_index: probed.audio_index,
        streams: probed.demuxer.streams().to_vec(),
        tally,
        end_of_stream,
    })
}

fn print_report(report: &ProbeReport) {
    println!("{}", report.input.display());
    println!("  fps: {:.3}", report.fps);
    for stream in &report.streams {
        let selected = stream.index == report.video_index || Some(stream.index) == report.audio_index;
        let marker = if selected { "*" } else { " " };
        match stream.kind {
            MediaKind::Video => println!(
                " {} #{} video {:?} {}x{} {:?}, {} frames",
                marker,
                stream.index,
                stream.params.codec,
                stream.params.width,
                stream.params.height,
                stream.params.pixel_format,
                stream.frame_count
            ),
            MediaKind::Audio => println!(
                " {} #{} audio {:?} {} Hz {:?} (id {})",
                marker,
                stream.index,
                stream.params.codec,
                stream.params.sample_rate,
                stream.params.channel_layout,
                stream.id
            ),
        }
    }
    for (index, t) in &report.tally {
        println!(
            "  stream {}: {} packets, {} bytes, {} keyframes, last pts {}",
            index, t.packets, t.bytes, t.keyframes, t.last_pts
        );
    }
}

fn parse_args(args: &[String]) -> Result<ProbeOptions> {
    let mut input: Option<PathBuf> = None;
    let mut format = "bink".to_string();
    let mut packets: u64 = u64::MAX;
    let mut json = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--packets" | "-n" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --packets"))?;
                packets = value
                    .parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("Invalid packet count {}: {}", value, e))?;
                i += 2;
            }
            "--format" | "-f" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --format"))?;
                format = value.clone();
                i += 2;
            }
            "--json" => {
                json = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                return Err(anyhow::anyhow!("Unknown option {}", other));
            }
            other => {
                input = Some(PathBuf::from(other));
                i += 1;
            }
        }
    }

    let input = input.ok_or_else(|| {
        print_usage();
        anyhow::anyhow!("No input file given")
    })?;
    Ok(ProbeOptions {
        input,
        format,
        packets,
        json,
    })
}

fn print_usage() {
    eprintln!("Usage: cutscene-probe <file> [--packets N] [--format NAME] [--json]");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("cutscene-probe")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_defaults() {
        let options = parse_args(&args(&["intro.bik"])).unwrap();
        assert_eq!(options.input, PathBuf::from("intro.bik"));
        assert_eq!(options.format, "bink");
        assert_eq!(options.packets, u64::MAX);
        assert!(!options.json);
    }

    #[test]
    fn test_parse_flags() {
        let options = parse_args(&args(&["--packets", "10", "--json", "outro.bik"])).unwrap();
        assert_eq!(options.packets, 10);
        assert!(options.json);
        assert_eq!(options.input, PathBuf::from("outro.bik"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["intro.bik", "--packets"])).is_err());
        assert!(parse_args(&args(&["intro.bik", "--packets", "many"])).is_err());
        assert!(parse_args(&args(&["intro.bik", "--verbose"])).is_err());
    }

    #[test]
    fn test_run_on_missing_file() {
        let options = parse_args(&args(&["/nonexistent/intro.bik"])).unwrap();
        assert!(run(&options).is_err());
    }
}

//! Command-line argument parsing for the intercom

use std::path::PathBuf;
use std::str::FromStr;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::flow::{FeedbackSource, FlowMode};

/// Parsed command line. Unset options leave the config file's value alone.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub destination: Option<String>,
    pub listen_port: Option<u16>,
    pub channels: Option<usize>,
    pub frames_per_chunk: Option<usize>,
    pub chunks_to_buffer: Option<usize>,
    pub sample_rate: Option<u32>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub no_flow_control: bool,
    pub keep_empty_planes: bool,
    pub report_received: bool,
    pub reported_feedback: bool,
    /// `--wavelet` alone uses the configured depth
    pub wavelet: Option<Option<u32>>,
    pub list_devices: bool,
    pub help: bool,
}

impl Args {
    /// Overlay the flags onto a loaded config
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(destination) = &self.destination {
            config.network.destination = destination.clone();
        }
        if let Some(port) = self.listen_port {
            config.network.listen_port = port;
        }
        if let Some(channels) = self.channels {
            config.stream.channels = channels;
        }
        if let Some(frames) = self.frames_per_chunk {
            config.stream.frames_per_chunk = frames;
        }
        if let Some(chunks) = self.chunks_to_buffer {
            config.stream.chunks_to_buffer = chunks;
        }
        if let Some(rate) = self.sample_rate {
            config.audio.sample_rate = rate;
        }
        if let Some(device) = &self.input_device {
            config.audio.input_device = Some(device.clone());
        }
        if let Some(device) = &self.output_device {
            config.audio.output_device = Some(device.clone());
        }
        if self.no_flow_control {
            config.codec.flow = FlowMode::Unlimited;
        }
        if self.keep_empty_planes {
            config.codec.skip_empty_planes = false;
        }
        if self.report_received {
            config.codec.received_count = true;
        }
        if self.reported_feedback {
            // Reported feedback is meaningless without the field
            config.codec.feedback = FeedbackSource::Reported;
            config.codec.received_count = true;
        }
        if let Some(levels) = self.wavelet {
            config.codec.wavelet = true;
            if let Some(levels) = levels {
                config.codec.wavelet_levels = levels;
            }
        }
    }
}

pub fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_internal(&args)
}

fn value<T: FromStr>(args: &[String], i: &mut usize) -> Result<T> {
    let flag = &args[*i];
    *i += 1;
    let raw = args
        .get(*i)
        .ok_or_else(|| Error::Config(format!("{} needs a value", flag)))?;
    raw.parse()
        .map_err(|_| Error::Config(format!("invalid value for {}: {}", flag, raw)))
}

/// Parse an argument vector whose first entry is the program name
pub fn parse_args_internal(args: &[String]) -> Result<Args> {
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => result.config = Some(value(args, &mut i)?),
            "--destination" | "-d" => result.destination = Some(value(args, &mut i)?),
            "--listen-port" | "-p" => result.listen_port = Some(value(args, &mut i)?),
            "--channels" => result.channels = Some(value(args, &mut i)?),
            "--frames-per-chunk" => result.frames_per_chunk = Some(value(args, &mut i)?),
            "--chunks-to-buffer" => result.chunks_to_buffer = Some(value(args, &mut i)?),
            "--sample-rate" => result.sample_rate = Some(value(args, &mut i)?),
            "--input-device" => result.input_device = Some(value(args, &mut i)?),
            "--output-device" => result.output_device = Some(value(args, &mut i)?),
            "--no-flow-control" => result.no_flow_control = true,
            "--keep-empty-planes" => result.keep_empty_planes = true,
            "--report-received" => result.report_received = true,
            "--reported-feedback" => result.reported_feedback = true,
            "--wavelet" => {
                // Optional depth
                let levels = args.get(i + 1).and_then(|next| next.parse::<u32>().ok());
                if levels.is_some() {
                    i += 1;
                }
                result.wavelet = Some(levels);
            }
            "--list-devices" => result.list_devices = true,
            "--help" | "-h" => result.help = true,
            other => return Err(Error::Config(format!("unknown argument: {}", other))),
        }
        i += 1;
    }

    Ok(result)
}

pub fn print_help() {
    println!("intercom - bit-plane audio intercom over UDP\n");
    println!("USAGE:");
    println!("    intercom [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    -c, --config <PATH>           Config file (default: platform config dir)");
    println!("    -d, --destination <HOST:PORT> Peer address (default: localhost:4444)");
    println!("    -p, --listen-port <PORT>      Local UDP port (default: 4444)");
    println!("    --channels <1|2>              Channels per frame (default: 2)");
    println!("    --frames-per-chunk <N>        Frames per chunk, multiple of 8 (default: 1024)");
    println!("    --chunks-to-buffer <N>        Playout delay in chunks, power of two (default: 32)");
    println!("    --sample-rate <HZ>            Sample rate (default: 44100)");
    println!("    --input-device <NAME>         Capture device (default: host default)");
    println!("    --output-device <NAME>        Playback device (default: host default)");
    println!("    --no-flow-control             Always send every bit-plane");
    println!("    --keep-empty-planes           Send all-zero bit-planes too");
    println!("    --report-received             Add the received-count byte to packets");
    println!("    --reported-feedback           Adapt to the peer's received count");
    println!("    --wavelet [LEVELS]            Enable the Haar wavelet stage");
    println!("    --list-devices                List audio devices and exit");
    println!("    -h, --help                    Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                      Log filter (default: info)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        let args: Vec<String> = std::iter::once("intercom")
            .chain(args.iter().copied())
            .map(String::from)
            .collect();
        parse_args_internal(&args)
    }

    #[test]
    fn test_parse_args_default() {
        let result = parse(&[]).unwrap();
        assert_eq!(result, Args::default());

        let mut config = AppConfig::default();
        result.apply(&mut config);
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_parse_args_values() {
        let result = parse(&[
            "-d",
            "10.0.0.2:5000",
            "--listen-port",
            "5001",
            "--channels",
            "1",
            "--chunks-to-buffer",
            "8",
            "--input-device",
            "USB Mic",
        ])
        .unwrap();

        assert_eq!(result.destination.as_deref(), Some("10.0.0.2:5000"));
        assert_eq!(result.listen_port, Some(5001));
        assert_eq!(result.channels, Some(1));
        assert_eq!(result.chunks_to_buffer, Some(8));
        assert_eq!(result.input_device.as_deref(), Some("USB Mic"));
    }

    #[test]
    fn test_parse_args_wavelet() {
        assert_eq!(parse(&["--wavelet"]).unwrap().wavelet, Some(None));
        assert_eq!(parse(&["--wavelet", "3"]).unwrap().wavelet, Some(Some(3)));

        let result = parse(&["--wavelet", "--help"]).unwrap();
        assert_eq!(result.wavelet, Some(None));
        assert!(result.help);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse(&["--listen-port"]).is_err());
        assert!(parse(&["--listen-port", "seventy"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }

    #[test]
    fn test_apply_flags() {
        let result = parse(&[
            "--no-flow-control",
            "--keep-empty-planes",
            "--reported-feedback",
            "--wavelet",
            "2",
            "--sample-rate",
            "48000",
        ])
        .unwrap();

        let mut config = AppConfig::default();
        result.apply(&mut config);
        assert_eq!(config.codec.flow, FlowMode::Unlimited);
        assert!(!config.codec.skip_empty_planes);
        assert_eq!(config.codec.feedback, FeedbackSource::Reported);
        assert!(config.codec.received_count);
        assert!(config.codec.wavelet);
        assert_eq!(config.codec.wavelet_levels, 2);
        assert_eq!(config.audio.sample_rate, 48000);

        let params = config.stream_params().unwrap();
        assert_eq!(params.wavelet_levels, Some(2));
    }
}

// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// XMODEM command line front end
use clap::{Parser, Subcommand, ValueEnum};
use serialport::{DataBits, Parity, StopBits};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;
use xmodem::{
    ChecksumMode, ReadSource, ReceiveOptions, RealSerialPort, SerialPort, SessionConfig,
    TransmitOptions, WriteSink, XmodemError,
};

/// Default receive limit when none is given
const MAX_RECEIVE_BYTES: usize = 1_073_741_823;

/// Line speeds the transfer timings are tuned for
const SUPPORTED_BAUD_RATES: [u32; 5] = [110, 300, 600, 9600, 19200];

/// Effective throughput used for the send time estimate
const ESTIMATE_BYTES_PER_SEC: usize = 396;

#[derive(Parser)]
#[command(name = "xmodem")]
#[command(about = "XMODEM/XMODEM-1K file transfer over a serial port", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate (110, 300, 600, 9600 or 19200)
    #[arg(short, long, default_value = "19200")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Wait this long before starting, to give the other side time to start
    #[arg(long, default_value = "4000", value_name = "MS")]
    startup_delay: u64,

    /// Retry cap for rejected or unacknowledged blocks
    #[arg(long, default_value = "25", value_name = "N")]
    retries: u32,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file
    Send {
        /// File to send
        file: PathBuf,

        /// Use 128-byte blocks instead of XMODEM-1K
        #[arg(long)]
        short_blocks: bool,

        /// Send a single YMODEM control block
        #[arg(long)]
        control: bool,
    },
    /// Receive a file
    Receive {
        /// File to create (must not exist)
        file: PathBuf,

        /// Maximum number of bytes to keep
        #[arg(long, value_name = "BYTES")]
        limit: Option<usize>,

        /// Checksum mode to request
        #[arg(long, value_enum, default_value = "crc")]
        checksum: ChecksumArg,

        /// Receive a single YMODEM control block
        #[arg(long)]
        control: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ChecksumArg {
    /// 8-bit additive checksum
    Checksum,
    /// CRC-16
    Crc,
    /// CRC-16 without per-block ACK (YMODEM-G)
    CrcG,
}

impl From<ChecksumArg> for ChecksumMode {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::Checksum => ChecksumMode::Arithmetic,
            ChecksumArg::Crc => ChecksumMode::Crc16,
            ChecksumArg::CrcG => ChecksumMode::Crc16NoAck,
        }
    }
}

fn parse_baud(baud: u32) -> Result<u32, String> {
    if SUPPORTED_BAUD_RATES.contains(&baud) {
        Ok(baud)
    } else {
        Err(format!("Invalid baud rate: {}. Must be 110, 300, 600, 9600 or 19200", baud))
    }
}

/// Whole minutes, never less than one
fn estimated_minutes(size: usize) -> usize {
    (size / (ESTIMATE_BYTES_PER_SEC * 60)).max(1)
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn init_logging(debug: bool) {
    let level = if debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

fn exit_with(message: &str, code: i32) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(code);
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let baud = parse_baud(cli.baud).unwrap_or_else(|e| exit_with(&e, 98));
    let data_bits = parse_data_bits(cli.data_bits).unwrap_or_else(|e| exit_with(&e, 1));
    let parity = parse_parity(&cli.parity).unwrap_or_else(|e| exit_with(&e, 1));
    let stop_bits = parse_stop_bits(cli.stop_bits).unwrap_or_else(|e| exit_with(&e, 1));

    let abort = Arc::new(AtomicBool::new(false));
    let flag = abort.clone();
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        exit_with(&format!("Failed to install Ctrl-C handler: {}", e), 1);
    }

    let config = SessionConfig { max_retries: cli.retries, ..SessionConfig::default() };

    // Check the file before touching the port
    if let Commands::Receive { file, .. } = &cli.command {
        if file.exists() {
            exit_with(&format!("File {} already exists", file.display()), 95);
        }
    }

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", baud, data_bits, parity, stop_bits);

    let mut serial_port = match RealSerialPort::open(&cli.port, baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => exit_with(&format!("Failed to open serial port: {}", e), 1),
    };

    let startup_delay = Duration::from_millis(cli.startup_delay);

    match cli.command {
        Commands::Send { file, short_blocks, control } => {
            let options = TransmitOptions { use_1k: !short_blocks, control, config };
            println!("\nSending file: {}, Ctrl-C to quit", file.display());
            std::thread::sleep(startup_delay);

            let start = Instant::now();
            match send_file(&mut serial_port, &file, &abort, options) {
                Ok(bytes) => println!(
                    "\nSuccessfully transmitted {} bytes in {} sec",
                    bytes,
                    start.elapsed().as_secs()
                ),
                Err(e) => exit_with(&format!("Send failed: {}", e), e.status_code().abs()),
            }
        }
        Commands::Receive { file, limit, checksum, control } => {
            let options = ReceiveOptions {
                mode: checksum.into(),
                limit: Some(limit.unwrap_or(MAX_RECEIVE_BYTES)),
                control,
                config,
            };
            println!("\nReceiving file: {}, Ctrl-C to quit", file.display());
            std::thread::sleep(startup_delay);

            let start = Instant::now();
            match receive_file(&mut serial_port, &file, &abort, options) {
                Ok(bytes) => println!(
                    "\nReceived {} bytes in {} sec",
                    bytes,
                    start.elapsed().as_secs()
                ),
                Err(e) => exit_with(&format!("Receive failed: {}", e), e.status_code().abs()),
            }
        }
    }
}

fn transfer_size(len: u64, file: &Path) -> std::io::Result<usize> {
    usize::try_from(len).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("File too large: {}", file.display()),
        )
    })
}

fn send_file(
    serial_port: &mut impl SerialPort,
    file: &Path,
    abort: &Arc<AtomicBool>,
    options: TransmitOptions,
) -> Result<usize, XmodemError> {
    if !file.exists() {
        return Err(XmodemError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", file.display()),
        )));
    }

    let handle = File::open(file)?;
    let size = transfer_size(handle.metadata()?.len(), file)?;
    if size == 0 {
        return Err(XmodemError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("File is empty: {}", file.display()),
        )));
    }

    println!("Sending {} bytes (est {} min)", size, estimated_minutes(size));
    let mut source = ReadSource::new(BufReader::new(handle));
    xmodem::transmit(serial_port, &mut source, abort, size, options)
}

fn receive_file(
    serial_port: &mut impl SerialPort,
    file: &Path,
    abort: &Arc<AtomicBool>,
    options: ReceiveOptions,
) -> Result<usize, XmodemError> {
    if file.exists() {
        return Err(XmodemError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("File {} already exists", file.display()),
        )));
    }

    let handle = File::create_new(file)?;
    let mut sink = WriteSink::new(BufWriter::new(handle));
    let bytes = xmodem::receive(serial_port, &mut sink, abort, options)?;
    sink.into_inner().flush()?;
    info!("Stored {} bytes in {}", bytes, file.display());
    Ok(bytes)
}

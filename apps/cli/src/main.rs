use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use thor_core::{
    CancelToken, NusbTransport, PartitionSelector, PitTable, RawPartition, SessionConfig, Thor,
    ThorError, UsbTransport, exit_code,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Samsung Thor download-mode tool (Pure Rust)", long_about = None)]
struct Args {
    /// Session configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Skip the handshake on a device that already completed it
    #[arg(long, global = true)]
    resume: bool,

    /// Packet size override in bytes (multiple of 512)
    #[arg(long, global = true)]
    packet_size: Option<u32>,

    /// USB vendor ID, hex
    #[arg(long, global = true, value_parser = parse_hex, requires = "pid")]
    vid: Option<u16>,

    /// USB product ID, hex
    #[arg(long, global = true, value_parser = parse_hex, requires = "vid")]
    pid: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Handshake, print the negotiated parameters and close the session
    Begin,
    /// Print the device partition table
    ReadPit {
        /// Also save the raw table to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Flash an image to a partition
    Flash(FlashArgs),
    /// Replace the device partition table
    WritePit {
        /// PIT file
        pit: PathBuf,
    },
    /// Open and close a session
    End,
    /// Reboot the device
    Reboot,
    /// Power the device off
    Shutdown,
    /// Erase user data
    Erase,
    /// Flash to the external T-Flash card for the rest of the session
    TFlash,
}

#[derive(clap::Args, Debug)]
struct FlashArgs {
    /// Image file
    image: PathBuf,

    /// Partition name or PIT identifier
    #[arg(short, long, required_unless_present = "raw_id")]
    partition: Option<String>,

    /// Partition identifier to flash without reading the PIT
    #[arg(long, conflicts_with = "partition")]
    raw_id: Option<u32>,

    /// Binary type for --raw-id (0 = AP, 1 = CP)
    #[arg(long, default_value_t = 0, requires = "raw_id")]
    binary_type: u32,

    /// Device type for --raw-id (2 = MMC)
    #[arg(long, default_value_t = 2, requires = "raw_id")]
    device_type: u32,

    /// Clear EFS with the last sequence
    #[arg(long)]
    efs_clear: bool,

    /// Update the bootloader with the last sequence
    #[arg(long)]
    update_bootloader: bool,

    /// Reboot once flashing succeeds
    #[arg(long)]
    reboot: bool,
}

fn parse_hex(s: &str) -> Result<u16, std::num::ParseIntError> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }

    let code = match run(args) {
        Ok(()) => exit_code::SUCCESS,
        Err(e) => {
            error!("Error: {:#}", e);
            e.downcast_ref::<ThorError>()
                .map_or(exit_code::OTHER, ThorError::exit_code)
        }
    };
    std::process::exit(code);
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    config.resume |= args.resume;
    if args.packet_size.is_some() {
        config.packet_size = args.packet_size;
    }
    if let Commands::Flash(flash) = &args.command {
        config.efs_clear |= flash.efs_clear;
        config.update_bootloader |= flash.update_bootloader;
    }
    Ok(config)
}

fn open_transport(args: &Args) -> Result<NusbTransport> {
    let transport = match (args.vid, args.pid) {
        (Some(vid), Some(pid)) => NusbTransport::open_with_ids(vid, pid)?,
        _ => NusbTransport::open()?,
    };
    Ok(transport)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let transport = open_transport(&args)?;
    let mut thor = Thor::new(transport, config);

    thor.begin()?;
    let session = thor.session();
    info!(
        version = session.protocol_version(),
        packet_size = session.packet_size(),
        capabilities = %session.capabilities(),
        "Connected"
    );

    let result = execute(&mut thor, &args.command);
    if result.is_err() && thor.session().is_active() {
        if let Err(e) = thor.end() {
            warn!(error = %e, "Could not end session");
        }
    }
    result
}

fn execute<T: UsbTransport>(thor: &mut Thor<T>, command: &Commands) -> Result<()> {
    match command {
        Commands::Begin | Commands::End => {}
        Commands::ReadPit { output } => {
            let table = thor.read_pit()?;
            println!("{table}");
            if let Some(path) = output {
                std::fs::write(path, table.to_bytes()?)
                    .with_context(|| format!("writing {}", path.display()))?;
                info!(path = %path.display(), "PIT saved");
            }
        }
        Commands::Flash(args) => {
            flash(thor, args)?;
            if args.reboot {
                return Ok(thor.reboot()?);
            }
        }
        Commands::WritePit { pit } => {
            let data = std::fs::read(pit).with_context(|| format!("reading {}", pit.display()))?;
            let table = PitTable::parse(&data)?;
            thor.write_pit(&table)?;
        }
        Commands::Reboot => return Ok(thor.reboot()?),
        Commands::Shutdown => return Ok(thor.shutdown()?),
        Commands::Erase => thor.erase_user_data()?,
        Commands::TFlash => thor.enable_t_flash()?,
    }
    thor.end()?;
    Ok(())
}

fn flash<T: UsbTransport>(thor: &mut Thor<T>, args: &FlashArgs) -> Result<()> {
    let selector = match (args.raw_id, &args.partition) {
        (Some(partition_id), _) => PartitionSelector::Raw(RawPartition {
            partition_id,
            binary_type: args.binary_type.into(),
            device_type: args.device_type.into(),
        }),
        (None, Some(partition)) => {
            thor.read_pit()?;
            partition.parse()?
        }
        (None, None) => bail!("either --partition or --raw-id is required"),
    };

    let file = File::open(&args.image)
        .with_context(|| format!("opening {}", args.image.display()))?;
    let size = file.metadata()?.len();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after the current chunk");
        handler_token.cancel();
    })?;

    info!(image = %args.image.display(), partition = %selector, size, "Flashing");
    let report = thor.flash_with_cancel(&selector, BufReader::new(file), size, &cancel)?;
    info!(
        bytes = report.bytes_sent,
        chunks = report.chunks,
        retries = report.retries,
        "Flash complete"
    );
    Ok(())
}

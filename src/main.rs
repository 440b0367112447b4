#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use eeprom_programmer::{
    parse_address, parse_byte, protocol::DEFAULT_BAUD, Options, Programmer, Snapshot, Transport,
};

#[derive(Clone, Debug, StructOpt)]
#[structopt(name = "eeprom", about = "An EEPROM programmer")]
pub struct Args {
    /// Serial port to connect to
    #[structopt(short, long)]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "57600")]
    baud: usize,

    /// Dump current EEPROM content
    #[structopt(short, long)]
    dump: bool,

    /// Write the dump to a file instead of printing it
    #[structopt(short, long, parse(from_os_str), requires = "dump")]
    output: Option<PathBuf>,

    /// Write the dump file as hex text
    #[structopt(long, requires = "output")]
    hex: bool,

    /// Fill every EEPROM cell with BYTE, then verify
    #[structopt(short, long, value_name = "BYTE", parse(try_from_str = parse_byte))]
    erase: Option<u8>,

    /// Write a file to EEPROM
    #[structopt(long, value_name = "PATH", parse(from_os_str))]
    write_file: Option<PathBuf>,

    /// Read the EEPROM back after --write-file and compare
    #[structopt(long, requires = "write-file")]
    verify: bool,

    /// Write a single byte to EEPROM
    #[structopt(long, number_of_values = 2, value_names = &["ADDRESS", "BYTE"])]
    write_byte: Option<Vec<String>>,

    /// Read a single byte from EEPROM
    #[structopt(long, value_name = "ADDRESS", parse(try_from_str = parse_address))]
    read_byte: Option<u16>,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, Debug, PartialEq)]
enum Operation {
    Dump,
    Erase(u8),
    WriteFile(PathBuf),
    WriteByte(u16, u8),
    ReadByte(u16),
}

impl Args {
    /// Resolve the single requested operation
    fn operation(&self) -> Result<Operation> {
        let mut ops = Vec::new();

        if self.dump {
            ops.push(Operation::Dump);
        }
        if let Some(fill) = self.erase {
            ops.push(Operation::Erase(fill));
        }
        if let Some(path) = &self.write_file {
            ops.push(Operation::WriteFile(path.clone()));
        }
        if let Some(v) = &self.write_byte {
            let address = parse_address(&v[0]).context("invalid --write-byte address")?;
            let value = parse_byte(&v[1]).context("invalid --write-byte value")?;
            ops.push(Operation::WriteByte(address, value));
        }
        if let Some(address) = self.read_byte {
            ops.push(Operation::ReadByte(address));
        }

        match ops.len() {
            0 => bail!("no operation given, see --help"),
            1 => Ok(ops.remove(0)),
            _ => bail!("only one operation may be given at a time"),
        }
    }
}

fn main() -> Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    let operation = o.operation()?;

    if o.baud != DEFAULT_BAUD {
        warn!("Programmer firmware expects {} baud", DEFAULT_BAUD);
    }

    let open = || Transport::linux(&o.port, o.baud, o.options.clone());

    info!("Connecting to programmer on {}", o.port);

    let mut p = Programmer::connect(open()?)
        .with_context(|| format!("error connecting to programmer on {}", o.port))?;

    info!("EEPROM capacity: {}", bytefmt::format(p.capacity() as u64));

    match operation {
        Operation::Dump => {
            let bar = progress_bar(p.capacity(), "Reading");
            let snapshot = p
                .dump_with_progress(|n| bar.set_position(n as u64))
                .context("error reading EEPROM")?;
            bar.finish_and_clear();

            match &o.output {
                Some(path) => write_dump(path, &snapshot, o.hex)?,
                None => print_dump(&snapshot),
            }
        }
        Operation::Erase(fill) => {
            info!("Erasing EEPROM with 0x{:02X}", fill);
            p = p.erase_verified(fill, open).context("error erasing EEPROM")?;
            info!("EEPROM verified");
        }
        Operation::WriteFile(path) => {
            let data = fs::read(&path)
                .with_context(|| format!("error reading {}", path.display()))?;

            info!("Writing {} ({})", path.display(), bytefmt::format(data.len() as u64));

            let bar = progress_bar(data.len(), "Writing");
            p.write_file_with_progress(&data, |n| bar.set_position(n as u64))
                .context("error writing EEPROM")?;
            bar.finish_and_clear();

            if o.verify {
                info!("Verifying EEPROM");
                p.verify_contents(&data).context("error verifying EEPROM")?;
                info!("EEPROM verified");
            }
        }
        Operation::WriteByte(address, value) => {
            p.write_byte(address, value).context("error writing byte")?;
            info!("Wrote 0x{:02X} to 0x{:04X}", value, address);
        }
        Operation::ReadByte(address) => {
            let value = p.read_byte(address).context("error reading byte")?;
            println!("{:02X}", value);
        }
    }

    p.close();

    Ok(())
}

fn progress_bar(len: usize, message: &str) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40}] {bytes}/{total_bytes}")
            .progress_chars("=> "),
    );
    bar.set_message(message);
    bar
}

fn print_dump(snapshot: &Snapshot) {
    println!("Total {}", snapshot.len());

    let mut header = String::from("        ");
    for i in 0..16 {
        header.push_str(&format!("|  {:02X}  ", i));
    }
    println!("{}", header);

    for (row, chunk) in snapshot.chunks(16).enumerate() {
        let mut line = format!("{:04X}    ", row * 16);
        for v in chunk {
            line.push_str(&format!("|  {:02X}  ", v));
        }
        println!("{}", line);
    }
}

fn write_dump(path: &Path, snapshot: &Snapshot, as_hex: bool) -> Result<()> {
    let mut f = fs::File::create(path)
        .with_context(|| format!("error creating {}", path.display()))?;

    if as_hex {
        for chunk in snapshot.chunks(16) {
            writeln!(f, "{}", hex::encode_upper(chunk))?;
        }
    } else {
        f.write_all(snapshot)
            .with_context(|| format!("error writing {}", path.display()))?;
    }

    info!("Wrote {} bytes to {}", snapshot.len(), path.display());

    Ok(())
}

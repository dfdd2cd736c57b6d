// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! dlpack - datalib instance packer.
//!
//! Text input is packed to a binary instance, binary input is converted to
//! another byte order or pointer width, and `-u` turns either into text.
//!
//! ```bash
//! # Pack a text instance for a 32-bit big-endian target
//! dlpack -l game.tlb -e big -p 4 -o level.bin level.txt
//!
//! # Back to text
//! dlpack -l game.tlb -u level.bin
//!
//! # Header summary
//! dlpack -i --json level.bin
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use datalib::{codec, text, util, CodecLimits, Endian, Format, PtrSize, Registry};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EndianArg {
    Little,
    Big,
}

impl From<EndianArg> for Endian {
    fn from(e: EndianArg) -> Self {
        match e {
            EndianArg::Little => Endian::Little,
            EndianArg::Big => Endian::Big,
        }
    }
}

/// datalib instance packer
#[derive(Parser, Debug)]
#[command(name = "dlpack")]
#[command(about = "Pack, unpack and convert datalib instances")]
#[command(version)]
struct Args {
    /// Directory searched for type libraries given with -l
    #[arg(short = 'L', long = "lib-path", value_name = "DIR")]
    lib_paths: Vec<PathBuf>,

    /// Type library to load (path, or file name searched in -L dirs)
    #[arg(short = 'l', long = "lib", value_name = "LIB")]
    libs: Vec<PathBuf>,

    /// Output file (stdout if omitted)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Byte order of produced binary instances
    #[arg(short, long, value_enum)]
    endian: Option<EndianArg>,

    /// Pointer size of produced binary instances (4 or 8)
    #[arg(short, long, value_parser = ["4", "8"])]
    ptr: Option<String>,

    /// Write text instead of binary
    #[arg(short, long)]
    unpack: bool,

    /// Print instance header info instead of the instance
    #[arg(short, long, conflicts_with = "unpack")]
    info: bool,

    /// Print info as JSON
    #[arg(long, requires = "info")]
    json: bool,

    /// JSON file overriding codec limits
    #[arg(long, value_name = "FILE")]
    limits: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Input instance, text or binary (stdin if omitted)
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,
}

impl Args {
    fn target_format(&self) -> Format {
        let host = Format::host();
        let endian = self.endian.map(Endian::from).unwrap_or(host.endian);
        let ptr_size = match self.ptr.as_deref() {
            Some("4") => PtrSize::Ptr32,
            Some(_) => PtrSize::Ptr64,
            None => host.ptr_size,
        };
        Format::new(endian, ptr_size)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "dlpack=debug,datalib=debug"
    } else {
        "dlpack=info,datalib=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// `lib` as given if it exists, else the first `-L` dir containing it.
fn resolve_lib(lib: &Path, lib_paths: &[PathBuf]) -> Result<PathBuf> {
    if lib.is_file() {
        return Ok(lib.to_path_buf());
    }
    lib_paths
        .iter()
        .map(|dir| dir.join(lib))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| anyhow!("type library {} not found", lib.display()))
}

fn load_registry(args: &Args) -> Result<Registry> {
    let mut registry = Registry::new();
    if let Some(path) = &args.limits {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read limits {}", path.display()))?;
        let limits: CodecLimits = serde_json::from_str(&raw)
            .with_context(|| format!("invalid limits in {}", path.display()))?;
        debug!("limits: {:?}", limits);
        registry.set_limits(limits);
    }
    for lib in &args.libs {
        let path = resolve_lib(lib, &args.lib_paths)?;
        util::load_typelib_file(&mut registry, &path)
            .with_context(|| format!("failed to load type library {}", path.display()))?;
        debug!("loaded {}", path.display());
    }
    Ok(registry)
}

fn info_output(info: &codec::InstanceInfo, json: bool) -> Result<Vec<u8>> {
    if json {
        let mut out = serde_json::to_vec_pretty(info)?;
        out.push(b'\n');
        return Ok(out);
    }
    Ok(format!(
        "root type:  0x{:08X}\nendian:     {}\nptr size:   {}\nload size:  {}\n",
        info.root_type,
        info.endian.as_str(),
        info.ptr_size.bytes(),
        info.load_size
    )
    .into_bytes())
}

/// Everything dlpack writes for one input.
fn process(registry: &Registry, args: &Args, input: &[u8]) -> Result<Vec<u8>> {
    let target = args.target_format();

    if codec::is_instance(input) {
        let header = codec::instance_info(input).context("invalid instance header")?;
        debug!(
            "binary input: type 0x{:08X}, {} endian, {}-byte pointers",
            header.root_type,
            header.endian.as_str(),
            header.ptr_size.bytes()
        );
        if args.info {
            return info_output(&header, args.json);
        }
        let root = header.root_type;
        if args.unpack {
            let host = Format::new(Endian::host(), header.ptr_size);
            let native = codec::convert(registry, root, input, host)
                .context("failed to convert instance to host byte order")?;
            let text = text::unpack(registry, root, &native).context("failed to unpack instance")?;
            return Ok(text.into_bytes());
        }
        return codec::convert(registry, root, input, target).context("failed to convert instance");
    }

    let src = std::str::from_utf8(input)
        .map_err(|_| anyhow!("input is neither a binary instance nor utf-8 text"))?;
    if args.unpack {
        let (_, instance) = text::parse(registry, src).context("failed to parse text instance")?;
        let text = text::write_text(registry, &instance).context("failed to write text")?;
        return Ok(text.into_bytes());
    }
    let packed = text::pack_with_format(registry, src, target).context("failed to pack text instance")?;
    if args.info {
        let header = codec::instance_info(&packed)?;
        return info_output(&header, args.json);
    }
    Ok(packed)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let registry = load_registry(&args)?;

    let input = match &args.input {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .lock()
                .read_to_end(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };
    if input.is_empty() {
        bail!("empty input");
    }

    let output = process(&registry, &args, &input)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &output)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("wrote {} bytes to {}", output.len(), path.display());
        }
        None => std::io::stdout()
            .lock()
            .write_all(&output)
            .context("failed to write to stdout")?,
    }
    Ok(())
}

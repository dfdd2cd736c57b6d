// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! dltlc - datalib type-library compiler.
//!
//! Merges text or binary type libraries and writes one binary library, or
//! prints what they contain.
//!
//! ```bash
//! # Compile two text libraries into one binary library
//! dltlc -o game.tlb base.tld game.tld
//!
//! # Show types, members and enums
//! dltlc -i game.tlb
//! dltlc -i --json game.tlb
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use datalib::reflect::{ContextInfo, EnumInfo, EnumValueInfo, MemberInfo, TypeInfo};
use datalib::{util, PtrSize, Registry};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// datalib type-library compiler
#[derive(Parser, Debug)]
#[command(name = "dltlc")]
#[command(about = "Compile and inspect datalib type libraries")]
#[command(version)]
struct Args {
    /// Input type libraries (text or binary), merged in order
    #[arg(value_name = "FILE", required = true)]
    inputs: Vec<PathBuf>,

    /// Output binary type library (stdout if omitted)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print library contents instead of writing a binary library
    #[arg(short, long)]
    info: bool,

    /// Print info as JSON
    #[arg(long, requires = "info")]
    json: bool,

    /// Pointer size used for reported sizes and offsets (4 or 8)
    #[arg(short, long, default_value = "8", value_parser = ["4", "8"])]
    ptr: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct TypeReport {
    #[serde(flatten)]
    info: TypeInfo,
    members: Vec<MemberInfo>,
}

#[derive(Serialize)]
struct EnumReport {
    #[serde(flatten)]
    info: EnumInfo,
    values: Vec<EnumValueInfo>,
}

#[derive(Serialize)]
struct Report {
    context: ContextInfo,
    ptr_size: PtrSize,
    types: Vec<TypeReport>,
    enums: Vec<EnumReport>,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "dltlc=debug,datalib=debug"
    } else {
        "dltlc=info,datalib=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_registry(inputs: &[PathBuf]) -> Result<Registry> {
    let mut registry = Registry::new();
    for path in inputs {
        util::load_typelib_file(&mut registry, path)
            .with_context(|| format!("failed to load type library {}", path.display()))?;
        debug!("loaded {}", path.display());
    }
    Ok(registry)
}

fn build_report(registry: &Registry, ptr: PtrSize) -> Result<Report> {
    let mut types = Vec::new();
    for tid in registry.type_ids() {
        let (Some(info), Some(members)) =
            (registry.type_info(tid, ptr), registry.type_members(tid, ptr))
        else {
            bail!("type 0x{:08X} disappeared while reporting", tid);
        };
        types.push(TypeReport { info, members });
    }
    let mut enums = Vec::new();
    for tid in registry.enum_ids() {
        let (Some(info), Some(values)) = (registry.enum_info(tid), registry.enum_values_info(tid))
        else {
            bail!("enum 0x{:08X} disappeared while reporting", tid);
        };
        enums.push(EnumReport { info, values });
    }
    Ok(Report {
        context: registry.context_info(),
        ptr_size: ptr,
        types,
        enums,
    })
}

fn print_table(report: &Report, out: &mut impl Write) -> std::io::Result<()> {
    let ctx = &report.context;
    writeln!(
        out,
        "{} types, {} members, {} enums, {} values ({}-byte pointers)",
        ctx.type_count,
        ctx.member_count,
        ctx.enum_count,
        ctx.enum_value_count,
        match report.ptr_size {
            PtrSize::Ptr32 => 4,
            PtrSize::Ptr64 => 8,
        }
    )?;

    for ty in &report.types {
        let t = &ty.info;
        writeln!(out)?;
        writeln!(
            out,
            "{} {} (0x{:08X}) size {} align {}{}",
            if t.is_union { "union" } else { "struct" },
            t.name,
            t.tid,
            t.size,
            t.alignment,
            if t.is_extern { " extern" } else { "" }
        )?;
        writeln!(out, "  {:<24} {:<12} {:>6} {:>6} {:>6}", "member", "storage", "offset", "size", "align")?;
        for m in &ty.members {
            let storage = match (m.array_count, m.bitfield_bits) {
                (0, 0) => format!("{:?}", m.storage),
                (0, bits) => format!("bits {}@{}", bits, m.bitfield_offset),
                (n, _) => format!("{:?}[{}]", m.storage, n),
            };
            writeln!(
                out,
                "  {:<24} {:<12} {:>6} {:>6} {:>6}",
                m.name, storage, m.offset, m.size, m.alignment
            )?;
        }
    }

    for e in &report.enums {
        writeln!(out)?;
        writeln!(
            out,
            "enum {} (0x{:08X}) {:?}",
            e.info.name, e.info.tid, e.info.storage
        )?;
        for v in &e.values {
            let signed = e.info.storage.is_signed();
            let value = if signed {
                (v.value as i64).to_string()
            } else {
                v.value.to_string()
            };
            writeln!(out, "  {:<24} = {}", v.aliases.join(" | "), value)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let registry = load_registry(&args.inputs)?;
    let ctx = registry.context_info();
    info!(
        "{} inputs: {} types, {} enums",
        args.inputs.len(),
        ctx.type_count,
        ctx.enum_count
    );

    if args.info {
        let ptr = if args.ptr == "4" {
            PtrSize::Ptr32
        } else {
            PtrSize::Ptr64
        };
        let report = build_report(&registry, ptr)?;
        let mut stdout = std::io::stdout().lock();
        if args.json {
            serde_json::to_writer_pretty(&mut stdout, &report).context("failed to write JSON")?;
            writeln!(stdout)?;
        } else {
            print_table(&report, &mut stdout)?;
        }
        return Ok(());
    }

    let bytes = registry
        .write_binary()
        .context("failed to encode binary type library")?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => std::io::stdout()
            .lock()
            .write_all(&bytes)
            .context("failed to write to stdout")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB: &str = r#"{
        "enums": { "Kind": { "type": "int8", "values": { "A": -1, "B": { "value": 2, "aliases": ["BEE"] } } } },
        "types": { "Item": { "members": [
            { "name": "kind", "type": "Kind" },
            { "name": "count", "type": "uint16[4]" },
            { "name": "flag", "type": "bitfield:1" }
        ] } }
    }"#;

    #[test]
    fn test_merge_text_and_binary_inputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let text = dir.path().join("item.tld");
        std::fs::write(&text, LIB).expect("write text");

        let compiled = load_registry(&[text.clone()]).expect("text input");
        let bin = dir.path().join("item.tlb");
        std::fs::write(&bin, compiled.write_binary().expect("encode")).expect("write bin");

        let extra = dir.path().join("extra.tld");
        std::fs::write(
            &extra,
            r#"{ "types": { "Bag": { "members": [ { "name": "items", "type": "Item[]" } ] } } }"#,
        )
        .expect("write extra");

        let merged = load_registry(&[bin, extra]).expect("merged");
        assert_eq!(merged.type_ids().len(), 2);

        let err = load_registry(&[text.clone(), text]).expect_err("duplicate");
        assert!(format!("{:#}", err).contains("already defined"));
    }

    #[test]
    fn test_report_and_table() {
        let registry = Registry::from_text(LIB).expect("lib");
        let report = build_report(&registry, PtrSize::Ptr32).expect("report");
        assert_eq!(report.types.len(), 1);
        assert_eq!(report.types[0].members[1].array_count, 4);
        assert_eq!(report.enums[0].values[1].aliases, vec!["B", "BEE"]);

        let mut out = Vec::new();
        print_table(&report, &mut out).expect("table");
        let table = String::from_utf8(out).expect("utf-8");
        assert!(table.contains("struct Item"));
        assert!(table.contains("B | BEE"));
        assert!(table.contains("= -1"));
        assert!(table.contains("bits 1@0"));

        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["types"][0]["name"], "Item");
        assert_eq!(json["ptr_size"], "Ptr32");
    }
}

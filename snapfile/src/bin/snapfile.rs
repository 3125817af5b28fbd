use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use snapfile::{SnapshotFile, SnapshotWriter, WriterOptions};

#[derive(Parser)]
#[command(name = "snapfile", version, about = "Snapshot file builder/stat CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a snapshot from N-Triples files
    Build(BuildArgs),
    /// Print header, sections and counts of a snapshot
    Stat(StatArgs),
}

#[derive(Args)]
struct BuildArgs {
    #[arg(long = "input", required = true)]
    input: Vec<PathBuf>,
    #[arg(long = "output")]
    output: PathBuf,
    #[arg(long = "zstd", default_value_t = false)]
    zstd: bool,
    #[arg(long = "no-crc", default_value_t = false)]
    no_crc: bool,
}

#[derive(Args)]
struct StatArgs {
    #[arg(long = "file")]
    file: PathBuf,
    #[arg(long = "verbose", default_value_t = false)]
    verbose: bool,
    /// Print every triple
    #[arg(long = "list", default_value_t = false)]
    list: bool,
}

#[cfg(feature = "oxigraph")]
fn build(args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    use oxigraph::io::{RdfFormat, RdfParser};
    use std::fs::File;
    use std::io::BufReader;

    let opts = WriterOptions {
        zstd: args.zstd,
        with_crc: !args.no_crc,
    };
    let mut w = SnapshotWriter::new(&args.output, opts);
    let start = Instant::now();
    for input in args.input {
        let rdr = BufReader::new(File::open(&input)?);
        let mut n = 0usize;
        for t in RdfParser::from_format(RdfFormat::NTriples).for_reader(rdr) {
            let q = t?;
            w.add(
                &q.subject.to_string(),
                &q.predicate.to_string(),
                &q.object.to_string(),
            )?;
            n += 1;
        }
        println!("Added {} triples from '{}'", n, input.display());
    }
    w.finalize()?;
    eprintln!("built in {:?}", start.elapsed());
    Ok(())
}

#[cfg(not(feature = "oxigraph"))]
fn build(_args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    Err("building requires the 'oxigraph' feature".into())
}

fn stat(args: StatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let f = match SnapshotFile::open(&args.file) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            eprintln!(
                "stat: failed to open '{}': {}\nHint: Use 'build' to produce a .snap file first.",
                args.file.display(),
                e
            );
            std::process::exit(2);
        }
    };
    let toc = f.toc();
    eprintln!("sections: {}", toc.len());
    if args.verbose {
        let h = f.header();
        eprintln!(
            "header.magic='{}' version={} flags=0x{:04x} created_unix={} toc_off={} toc_len={}",
            std::str::from_utf8(&h.magic).unwrap_or("????"),
            h.version_u16,
            h.flags_u16,
            h.created_unix64,
            h.toc_off_u64,
            h.toc_len_u32
        );
        for (i, e) in toc.iter().enumerate() {
            eprintln!(
                "  [{}] kind={:?} off={} len={} crc={}",
                i, e.kind, e.section.off, e.section.len, e.crc32_u32
            );
        }
    }
    let start = Instant::now();
    eprintln!(
        "terms: {} triples: {} in {:?}",
        f.n_terms(),
        f.len(),
        start.elapsed()
    );
    if args.list {
        for [s, p, o] in f.search([0, 0, 0]) {
            println!(
                "{} {} {} .",
                f.term(s).unwrap_or("?"),
                f.term(p).unwrap_or("?"),
                f.term(o).unwrap_or("?")
            );
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => build(args),
        Commands::Stat(args) => stat(args),
    }
}

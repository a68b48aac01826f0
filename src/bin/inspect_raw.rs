use anyhow::Result;
use clap::Parser;
use madrid_etl::{process::inspect::ArtifactSummary, DataPaths, Selector};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "inspect_raw", about = "Print rows, columns and codecs of raw Parquet artifacts")]
struct Args {
    /// Artifact files to inspect; when empty, the selected sources under DATA_OUT_DIR are used
    files: Vec<PathBuf>,

    /// Sources to inspect when no files are given
    #[arg(long, default_value = "all")]
    only: Selector,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let files = if args.files.is_empty() {
        let raw_dir = DataPaths::from_env().raw_dir();
        args.only
            .sources()
            .into_iter()
            .map(|s| raw_dir.join(s.raw_file_name()))
            .collect()
    } else {
        args.files
    };

    let mut failed = false;
    for path in &files {
        match ArtifactSummary::read(path) {
            Ok(summary) => print_summary(path, &summary),
            Err(e) => {
                eprintln!("{}: {:#}", path.display(), e);
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(path: &std::path::Path, s: &ArtifactSummary) {
    println!("=== {} ===", path.display());
    println!("Rows:        {}", s.rows);
    println!("Row groups:  {}", s.row_groups);
    println!("Size:        {} bytes", s.bytes);
    let codecs: Vec<&str> = s.codecs.iter().map(String::as_str).collect();
    println!("Codecs:      {}", codecs.join(", "));
    println!("Columns:");
    for (name, ty) in &s.columns {
        println!("  - {:<30} {}", name, ty);
    }
    println!();
}

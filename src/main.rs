use anyhow::Result;
use clap::Parser;
use madrid_etl::{DataPaths, LoaderConfig, RawLoader, RowPolicy, Selector};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "madrid_etl", about = "Convert the raw source CSVs into Parquet")]
struct Args {
    /// Which sources to rebuild: all, renta, delitos or contact
    #[arg(long, default_value = "all")]
    only: Selector,

    /// YAML file with loader settings
    #[arg(long, env = "RAW_CONFIG")]
    config: Option<PathBuf>,

    /// Base data directory
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory holding the input CSVs (defaults to the data directory)
    #[arg(long, env = "DATA_IN_DIR")]
    data_in_dir: Option<PathBuf>,

    /// Output root; artifacts land in its raw/ subdirectory
    #[arg(long, env = "DATA_OUT_DIR")]
    data_out_dir: Option<PathBuf>,

    /// Rows per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Parquet codec (zstd, snappy, gzip, brotli, lz4, none)
    #[arg(long)]
    compression: Option<String>,

    #[arg(long)]
    compression_level: Option<i32>,

    /// strict (abort on a bad row) or permissive (skip / null it)
    #[arg(long)]
    row_policy: Option<RowPolicy>,
}

impl Args {
    fn loader_config(&self) -> Result<LoaderConfig> {
        let mut cfg = LoaderConfig::load(self.config.as_deref())?;
        if let Some(n) = self.chunk_size {
            cfg.chunk_size = n;
        }
        if let Some(codec) = &self.compression {
            cfg.compression = codec.clone();
        }
        if let Some(level) = self.compression_level {
            cfg.compression_level = level;
        }
        if let Some(policy) = self.row_policy {
            cfg.row_policy = policy;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Flags already carry their env fallbacks; `DataPaths` applies the
    /// directory precedence.
    fn data_paths(&self) -> DataPaths {
        let as_string = |p: &PathBuf| p.to_string_lossy().into_owned();
        DataPaths::from_lookup(|key| match key {
            "DATA_DIR" => Some(as_string(&self.data_dir)),
            "DATA_IN_DIR" => self.data_in_dir.as_ref().map(as_string),
            "DATA_OUT_DIR" => self.data_out_dir.as_ref().map(as_string),
            _ => None,
        })
    }
}

fn main() -> Result<()> {
    // ─── 1) env + logging ─────────────────────────────────────────────
    dotenvy::dotenv().ok();

    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    // ─── 2) resolve config and directories ────────────────────────────
    let args = Args::parse();
    let config = args.loader_config()?;
    let paths = args.data_paths();
    info!(
        input = %paths.input_dir.display(),
        output = %paths.raw_dir().display(),
        chunk_size = config.chunk_size,
        compression = %config.compression,
        "starting raw load"
    );

    // ─── 3) build the selected sources ────────────────────────────────
    let loader = RawLoader::new(config, paths)?;
    let outputs = match loader.run(args.only) {
        Ok(outputs) => outputs,
        Err(e) => {
            error!("raw load failed: {:#}", e);
            return Err(e);
        }
    };

    // ─── 4) report artifact paths ─────────────────────────────────────
    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn directory_flags_follow_data_paths_precedence() {
        let args = Args::try_parse_from(["madrid_etl", "--data-dir", "/srv/etl"]).unwrap();
        let paths = args.data_paths();
        assert_eq!(paths.input_dir, Path::new("/srv/etl"));
        assert_eq!(paths.raw_dir(), Path::new("/srv/etl/output/raw"));

        let args = Args::try_parse_from([
            "madrid_etl",
            "--data-dir",
            "/srv/etl",
            "--data-in-dir",
            "/mnt/in",
            "--data-out-dir",
            "/mnt/out",
        ])
        .unwrap();
        let paths = args.data_paths();
        assert_eq!(paths, DataPaths::new("/mnt/in", "/mnt/out"));
        assert!(!args.loader_config().unwrap().infer_types);
    }
}

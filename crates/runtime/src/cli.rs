//! CLI wiring for the paramcache tools.

use crate::backend::ChecksumBackend;
use crate::options::CacheOptions;
use crate::session::CacheSession;
use anyhow::Result;
use clap::{Parser, Subcommand};
use paramcache_cache::{read_mappings, FORMAT_TAG, FORMAT_VERSION};
use paramcache_compiler::{BasisCompiler, CompileConfig};
use paramcache_ir::builder::{ry_rz_ansatz, ry_rz_parameter_count};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "paramcache", about = "Compilation cache for parameterized jobs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the mappings stored in a cache file.
    Inspect { path: PathBuf },
    /// Run a parameter sweep over a sample ansatz through a cache session.
    Demo {
        #[arg(long)]
        cache_file: Option<PathBuf>,
        #[arg(long, default_value_t = 20)]
        sweeps: usize,
        #[arg(long, default_value_t = 4)]
        resources: usize,
        #[arg(long, default_value_t = 2)]
        depth: usize,
        #[arg(long, default_value_t = false)]
        no_isolate: bool,
        #[arg(long, default_value_t = false)]
        skip_validation: bool,
        #[arg(long)]
        options: Option<PathBuf>,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    match cli.command {
        Command::Inspect { path } => {
            let mappings = read_mappings(&path)?;
            println!("{} v{}: {} mappings", FORMAT_TAG, FORMAT_VERSION, mappings.len());
            for record in &mappings {
                println!(
                    "- {} params={} traced={} untraceable={} instructions={}",
                    record.fingerprint.abbreviated(),
                    record.slots.len(),
                    record.traced(),
                    record.slots.len() - record.traced(),
                    record.signature.instruction_count
                );
            }
        }
        Command::Demo {
            cache_file,
            sweeps,
            resources,
            depth,
            no_isolate,
            skip_validation,
            options,
        } => {
            let mut options = match options {
                Some(path) => CacheOptions::load_from_file(&path)?,
                None => CacheOptions::default(),
            };
            if cache_file.is_some() {
                options.cache_file = cache_file;
            }
            options.isolate &= !no_isolate;
            options.skip_validation |= skip_validation;

            let config = CompileConfig::with_resources(resources);
            let session = CacheSession::open(BasisCompiler, ChecksumBackend, config, options)?;
            let count = ry_rz_parameter_count(resources, depth);
            let jobs: Vec<_> = (0..sweeps)
                .map(|sweep| {
                    let params: Vec<f64> = (0..count)
                        .map(|i| 0.1 + 0.01 * sweep as f64 + 0.2 * i as f64)
                        .collect();
                    ry_rz_ansatz(resources, depth, &params)
                })
                .collect();

            let started = Instant::now();
            let results = session.execute(&jobs)?;
            info!(
                jobs = results.len(),
                elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
                "sweep completed"
            );
            for result in &results {
                println!(
                    "{} instructions={} checksum={:.6}",
                    result.job, result.instructions, result.checksum
                );
            }
            println!("{}", session.stats());
            session.shutdown()?;
        }
    }
    Ok(())
}

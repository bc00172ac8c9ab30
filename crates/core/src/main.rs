// Stract is an open source web search engine.
// Copyright (C) 2023 Stract ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
use anyhow::{Context, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use stract::config;
use stract::entrypoint;

/// Single executable, mutually exclusive mode flags. Worker-pool sizing
/// and the three IPC flags apply only to the modes that use them; an
/// unused flag is silently ignored rather than rejected.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Run the crawl worker pool.
    #[clap(long, short = 'w')]
    webcrawler: bool,

    /// Run the indexer worker pool.
    #[clap(long, short = 'i')]
    indexer: bool,

    /// Run the network scanner (out of core).
    #[clap(long, short = 's', value_name = "ptr|axfr")]
    scanner: Option<String>,

    /// Out of core.
    #[clap(long, short = 'e')]
    exploit: bool,

    /// Run the Optimizer loop.
    #[clap(long, short = 'o')]
    optimizer: bool,

    /// Run the Rebooster once.
    #[clap(long, short = 'r', visible_alias = "rb")]
    rebooster: bool,

    /// Run DeltaMerge once.
    #[clap(long, short = 'd', visible_alias = "dm")]
    deltamerge: bool,

    /// Run the LockService network endpoint.
    #[clap(long, visible_alias = "wm")]
    webcrawlermanager: bool,

    /// Worker count.
    #[clap(long, short = 'p', default_value_t = 10)]
    processes: usize,

    /// LockService bind host.
    #[clap(long, default_value = "0.0.0.0")]
    host: String,

    /// LockService bind port.
    #[clap(long, default_value_t = 4643)]
    port: u16,

    /// LockService shared authkey.
    #[clap(long, default_value = "a")]
    authkey: String,

    /// TOML config describing the IndexClient endpoints for this mode.
    #[clap(long)]
    config: Option<String>,
}

fn load_toml_config<T: DeserializeOwned + Default>(path: &Option<String>) -> T {
    match path {
        Some(path) => {
            let path = Path::new(path);
            let raw_config = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: '{}'", path.display()))
                .unwrap();
            toml::from_str(&raw_config)
                .with_context(|| format!("Failed to parse config: '{}'", path.display()))
                .unwrap()
        }
        None => T::default(),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive("stract=info".parse().unwrap())
                .from_env_lossy(),
        )
        .without_time()
        .with_target(false)
        .finish()
        .init();

    let args = Args::parse();

    let modes = [
        args.webcrawler,
        args.indexer,
        args.scanner.is_some(),
        args.exploit,
        args.optimizer,
        args.rebooster,
        args.deltamerge,
        args.webcrawlermanager,
    ];

    if modes.iter().filter(|m| **m).count() != 1 {
        anyhow::bail!("exactly one mode flag must be given");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if args.webcrawler {
        let mut config: config::CrawlerConfig = load_toml_config(&args.config);
        config.num_workers = args.processes;
        return runtime.block_on(entrypoint::crawler::run(config));
    }

    if args.indexer {
        let mut config: config::IndexerConfig = load_toml_config(&args.config);
        config.num_workers = args.processes;
        return runtime.block_on(entrypoint::indexer::run(config));
    }

    if let Some(mode) = &args.scanner {
        tracing::warn!(mode, "network scanner is out of core for this deployment");
        return Ok(());
    }

    if args.exploit {
        tracing::warn!("exploit mode is out of core for this deployment");
        return Ok(());
    }

    if args.optimizer {
        let config: config::OptimizerConfig = load_toml_config(&args.config);
        return runtime.block_on(entrypoint::optimizer::run(config));
    }

    if args.rebooster {
        let config: config::ReboosterConfig = load_toml_config(&args.config);
        return runtime.block_on(entrypoint::rebooster::run(config));
    }

    if args.deltamerge {
        let config: config::DeltaMergeConfig = load_toml_config(&args.config);
        return runtime.block_on(entrypoint::delta_merge::run(config));
    }

    if args.webcrawlermanager {
        let config = config::LockServiceConfig {
            host: args.host,
            port: args.port,
            authkey: args.authkey,
        };
        return runtime.block_on(entrypoint::lock_service::run(config));
    }

    unreachable!("exactly one mode flag was validated above")
}

use std::sync::Arc;

use clap::Parser;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

use palisade::authz::store::MemoryPolicyStore;
use palisade::authz::{seed, subject, AuthzService};
use palisade::settings::Settings;
use palisade::web;

#[derive(Parser, Debug)]
#[command(
    name = "palisade",
    version,
    about = "Control-plane authorization policy decision service"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    subject::validate(&settings.user_types)?;

    // build the policy engine (seeded from KDL files when configured)
    let authz = if settings.authz.enabled {
        let store = MemoryPolicyStore::new();
        if let Some(dir) = &settings.authz.seeds_dir {
            let seeds = seed::load_seeds(dir)
                .map_err(|e| miette::miette!("failed to load policy seeds: {e}"))?;
            store
                .install_seed(seeds.roles, seeds.mappings)
                .map_err(|e| miette::miette!("failed to install policy seeds: {e}"))?;
        }
        Arc::new(AuthzService::enabled(Arc::new(store)))
    } else {
        tracing::warn!("Authorization is DISABLED - every evaluation will be allowed");
        Arc::new(AuthzService::disabled())
    };

    // start web server
    web::serve(settings, authz).await?;
    Ok(())
}

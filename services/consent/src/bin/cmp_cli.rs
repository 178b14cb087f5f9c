//! CMP command-line tool
//!
//! Usage:
//!   cmp_cli resolve --jurisdiction GDPR --protocol
//!   cmp_cli decode CQAbc...
//!   cmp_cli fetch --vendor-ids 8,12,755
//!   cmp_cli encode --action accept-all --config config/cmp.toml
//!   cmp_cli config --profile staging

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cmp_config::CmpConfig;
use consent_service::{
    default_categories, requires_prompt, resolve_model, ConsentReconciler, InMemoryHostStore,
    InitOutcome, MemoryStorage, Prefetch, UserAction,
};
use frame_messaging::Window;
use std::path::PathBuf;
use std::sync::Arc;
use tcf_codec::{purpose_consents_to_categories, TcStringCodec};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vendor_list::{FetchOptions, VendorListCache};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Profile override from config/environments/<profile>.toml
    #[arg(long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration after profile and env overrides
    Config,

    /// Resolve the consent model for a jurisdiction code
    Resolve {
        #[arg(short, long)]
        jurisdiction: Option<String>,

        /// Enable TCF protocol mode
        #[arg(long)]
        protocol: bool,

        /// Visitor sends an enhanced privacy signal
        #[arg(long)]
        privacy_signal: bool,
    },

    /// Decode a TC string and print it as JSON
    Decode {
        tc_string: String,

        /// Ceiling for expanded vendor maps
        #[arg(long)]
        max_vendor_id: Option<u32>,
    },

    /// Fetch the vendor list and print a summary
    Fetch {
        /// Comma-separated vendor IDs
        #[arg(long, value_delimiter = ',')]
        vendor_ids: Vec<u32>,
    },

    /// Produce a TC string for a user action against the live vendor list
    Encode {
        #[arg(long, value_enum)]
        action: Action,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Action {
    AcceptAll,
    RejectAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "consent_service=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Config => {
            let config = load(&args.config, args.profile.as_deref())?;
            print!("{}", config.to_toml_string()?);
        }
        Command::Resolve {
            jurisdiction,
            protocol,
            privacy_signal,
        } => {
            let model = resolve_model(jurisdiction.as_deref(), protocol);
            let output = serde_json::json!({
                "jurisdiction": jurisdiction,
                "model": model,
                "requiresPrompt": requires_prompt(model),
                "defaultCategories": default_categories(model, privacy_signal),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Decode {
            tc_string,
            max_vendor_id,
        } => {
            let decoded = TcStringCodec::with_max_vendor_id(max_vendor_id)
                .decode(&tc_string)
                .context("Failed to decode TC string")?;
            let categories = purpose_consents_to_categories(&decoded.state.purpose_consents);
            let output = serde_json::json!({
                "decoded": decoded,
                "categories": categories,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Fetch { vendor_ids } => {
            let config = load(&args.config, args.profile.as_deref())?;
            let cache = VendorListCache::from_settings(&config.vendor_list)?;
            let ids = (!vendor_ids.is_empty()).then_some(vendor_ids.as_slice());

            info!(endpoint = %cache.endpoint(), "Fetching vendor list");
            match cache.fetch(ids, FetchOptions::default()).await? {
                Some(list) => {
                    let output = serde_json::json!({
                        "vendorListVersion": list.vendor_list_version,
                        "tcfPolicyVersion": list.tcf_policy_version,
                        "lastUpdated": list.last_updated_at(),
                        "purposes": list.purposes.len(),
                        "vendors": list.vendors.len(),
                        "maxVendorId": list.max_vendor_id(),
                        "activeVendors": list.active_vendors().count(),
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                None => println!("Vendor list not applicable (204)"),
            }
        }
        Command::Encode { action } => {
            let mut config = load(&args.config, args.profile.as_deref())?;
            config.cmp.protocol_mode_enabled = true;
            let cache = Arc::new(VendorListCache::from_settings(&config.vendor_list)?);

            let reconciler = ConsentReconciler::new(
                config,
                Window::top("cmp_cli"),
                Arc::new(InMemoryHostStore::new(Some("GDPR"), false)),
                Arc::new(MemoryStorage::new()),
                cache,
            );
            match reconciler.initialize(Prefetch::NotFetched).await? {
                InitOutcome::Protocol { .. } => {}
                InitOutcome::FellBack { error, .. } => {
                    return Err(error).context("Vendor list fetch failed");
                }
                other => bail!("TCF protocol did not start: {:?}", other),
            }

            let action = match action {
                Action::AcceptAll => UserAction::AcceptAll,
                Action::RejectAll => UserAction::RejectAll,
            };
            let tc_string = reconciler.save(action).await?;
            reconciler.shutdown().await;
            println!("{tc_string}");
        }
    }

    Ok(())
}

fn load(path: &Option<PathBuf>, profile: Option<&str>) -> Result<CmpConfig> {
    CmpConfig::load(path.as_deref(), profile).context("Failed to load CMP configuration")
}

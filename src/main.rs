//! gridlot operator CLI.
//!
//! Administers a grid-canvas ad marketplace database: schema migration,
//! pricing zones, the ban registry, the review queue, and refunds. The
//! buyer-facing surfaces (reservation, content submission) live in the
//! library; this binary is the operator's side of the system.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use gridlot::bans::BanRegistry;
use gridlot::config::GridlotConfig;
use gridlot::lifecycle::{AdminIdentity, RegionAdmin, ROLE_ADMIN};
use gridlot::payments::PaymentLedger;
use gridlot::store::{BanKind, PricingZone, Store};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "gridlot", version, about = "grid-canvas ad marketplace operator tool")]
struct Cli {
    /// Actor identity recorded in the audit trail.
    #[arg(long, default_value = "operator@localhost")]
    actor: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply the database schema.
    Migrate,
    /// Show region counts per lifecycle status.
    Status,
    /// List published regions and their live content.
    Published,
    /// Manage pricing zones.
    #[command(subcommand)]
    Zone(ZoneCommand),
    /// Manage the ban registry.
    #[command(subcommand)]
    Ban(BanCommand),
    /// Work the review queue.
    #[command(subcommand)]
    Review(ReviewCommand),
    /// Refund a payment and take its region off the canvas.
    Refund {
        /// Payment provider reference.
        reference: String,
        /// Reason recorded on the region and in the audit trail.
        #[arg(long, default_value = "refunded")]
        reason: String,
    },
}

#[derive(Subcommand)]
enum ZoneCommand {
    /// Add a pricing zone.
    Add {
        /// Zone name.
        name: String,
        /// Left edge in grid units.
        x: u32,
        /// Top edge in grid units.
        y: u32,
        /// Width in grid units.
        width: u32,
        /// Height in grid units.
        height: u32,
        /// Price per grid unit in cents.
        price_per_unit_cents: i64,
        /// Mark the zone premium.
        #[arg(long)]
        premium: bool,
    },
    /// List pricing zones in evaluation order.
    List,
}

#[derive(Subcommand)]
enum BanCommand {
    /// Add a ban registry entry.
    Add {
        /// Ban kind: domain, content_hash, or keyword.
        kind: String,
        /// Banned value.
        value: String,
        /// Stated reason.
        #[arg(long)]
        reason: Option<String>,
    },
    /// List all bans, newest first.
    List,
}

#[derive(Subcommand)]
enum ReviewCommand {
    /// List regions awaiting review, oldest first.
    List,
    /// Approve a pending region.
    Approve {
        /// Region id.
        region_id: Uuid,
    },
    /// Reject a pending region.
    Reject {
        /// Region id.
        region_id: Uuid,
        /// Reason shown to the buyer.
        reason: String,
    },
    /// Take down a published region.
    Remove {
        /// Region id.
        region_id: Uuid,
        /// Reason shown to the buyer.
        reason: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = GridlotConfig::load().context("failed to load configuration")?;

    // Operator actions end up in the same rotated JSON log as the service
    // side, so the audit trail and the log line up.
    let _logging = gridlot::logging::init_service(
        std::path::Path::new(&config.logging.logs_dir),
        &config.logging.level,
    )?;
    let store = Arc::new(
        Store::connect(&config.database.path)
            .await
            .context("failed to open database")?,
    );
    // Operator CLI runs with full privileges.
    let actor = AdminIdentity::new(&cli.actor, ROLE_ADMIN);

    match cli.command {
        Command::Migrate => {
            // connect() already applied the schema; this just reports it.
            info!(path = %config.database.path, "schema applied");
            println!("schema applied to {}", config.database.path);
        }
        Command::Status => {
            for (status, count) in store.region_counts().await? {
                println!("{status:>22}  {count}");
            }
        }
        Command::Published => {
            for (region, submission) in store.published_regions().await? {
                let link = submission
                    .as_ref()
                    .map_or("-", |s| s.link_url.as_str());
                println!("{}  {}  {}", region.id, region.rect(), link);
            }
        }
        Command::Zone(ZoneCommand::Add {
            name,
            x,
            y,
            width,
            height,
            price_per_unit_cents,
            premium,
        }) => {
            let zone = PricingZone {
                id: Uuid::new_v4(),
                name,
                x_start: x,
                y_start: y,
                width,
                height,
                price_per_unit_cents,
                locked: false,
                premium,
            };
            store.insert_zone(zone.clone()).await?;
            println!("zone {} added: {} @ {}", zone.id, zone.name, zone.rect());
        }
        Command::Zone(ZoneCommand::List) => {
            for zone in store.pricing_zones().await? {
                println!(
                    "{}  {:<20} {}  {}¢/unit{}",
                    zone.id,
                    zone.name,
                    zone.rect(),
                    zone.price_per_unit_cents,
                    if zone.premium { "  premium" } else { "" },
                );
            }
        }
        Command::Ban(BanCommand::Add { kind, value, reason }) => {
            let kind = BanKind::parse(&kind)?;
            let bans = BanRegistry::new(Arc::clone(&store));
            let entry = bans.ban(kind, &value, reason, &actor.email).await?;
            println!("banned {} {:?} ({})", entry.kind, entry.value, entry.id);
        }
        Command::Ban(BanCommand::List) => {
            let bans = BanRegistry::new(Arc::clone(&store));
            for entry in bans.list().await? {
                println!(
                    "{}  {:<12} {:?}  {}",
                    entry.id,
                    entry.kind,
                    entry.value,
                    entry.reason.as_deref().unwrap_or("-"),
                );
            }
        }
        Command::Review(review) => {
            let admin = RegionAdmin::new(Arc::clone(&store));
            match review {
                ReviewCommand::List => {
                    for region in admin.review_queue().await? {
                        println!(
                            "{}  {}  {}  {}¢",
                            region.id,
                            region.rect(),
                            region.buyer_email,
                            region.price_cents,
                        );
                    }
                }
                ReviewCommand::Approve { region_id } => {
                    admin.approve(&actor, region_id).await?;
                    println!("region {region_id} approved");
                }
                ReviewCommand::Reject { region_id, reason } => {
                    admin.reject(&actor, region_id, reason).await?;
                    println!("region {region_id} rejected");
                }
                ReviewCommand::Remove { region_id, reason } => {
                    admin.remove(&actor, region_id, reason).await?;
                    println!("region {region_id} removed");
                }
            }
        }
        Command::Refund { reference, reason } => {
            let ledger = PaymentLedger::new(Arc::clone(&store));
            ledger.refund(&actor, &reference, &reason).await?;
            println!("payment {reference} refunded");
        }
    }

    store.shutdown().await;
    Ok(())
}

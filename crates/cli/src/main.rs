//! Backline CLI - migrations, catalog seeding and order management.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! bl-cli migrate
//!
//! # Load products, promotions and gift cards
//! bl-cli seed catalog.yaml
//!
//! # Price a cart: two of product 3, one of product 7 variant 1
//! bl-cli quote --country DE --item 3x2 --item 7:1x1 --promo TOUR10
//!
//! # Ship or cancel an order
//! bl-cli orders fulfill 42 --tracking 00340434161094042557
//! bl-cli orders cancel 42
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "bl-cli")]
#[command(author, version, about = "Backline CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Seed products, promotions, gift cards and shipping options from YAML
    Seed {
        /// Path to the seed file
        file: String,
    },
    /// Print a price quote for a cart
    Quote {
        /// Destination country (ISO 3166-1 alpha-2)
        #[arg(short, long)]
        country: String,

        /// Cart line as `<product_id>[:<variant>]x<qty>`, repeatable
        #[arg(short, long = "item", required = true)]
        items: Vec<String>,

        /// Promotion code
        #[arg(long)]
        promo: Option<String>,

        /// Gift card code
        #[arg(long)]
        gift_card: Option<String>,
    },
    /// Order status actions
    Orders {
        #[command(subcommand)]
        action: OrderAction,
    },
}

#[derive(Subcommand)]
enum OrderAction {
    /// Mark a paid order as shipped and notify the customer
    Fulfill {
        /// Order id
        id: i32,

        /// Carrier tracking number
        #[arg(short, long)]
        tracking: String,
    },
    /// Cancel a pending or paid order
    Cancel {
        /// Order id
        id: i32,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::Seed { file } => {
            commands::seed::from_file(&file).await?;
        }
        Commands::Quote {
            country,
            items,
            promo,
            gift_card,
        } => commands::quote::print(&country, &items, promo, gift_card).await?,
        Commands::Orders { action } => match action {
            OrderAction::Fulfill { id, tracking } => {
                commands::orders::fulfill(id, &tracking).await?;
            }
            OrderAction::Cancel { id } => commands::orders::cancel(id).await?,
        },
    }
    Ok(())
}

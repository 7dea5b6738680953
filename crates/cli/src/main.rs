//! Cartwheel CLI - a command-line storefront shell.
//!
//! # Usage
//!
//! ```bash
//! # Browse the catalog
//! cartwheel products list
//! cartwheel products search lamp
//!
//! # Change the cart and show the header badge
//! cartwheel cart add 7 --quantity 2
//! cartwheel cart adjust 7 -1
//! cartwheel cart badge
//!
//! # Sign in (the credential is kept in the data directory)
//! cartwheel auth signin -u sam -p 'correct horse'
//! ```
//!
//! # Commands
//!
//! - `session show` - Print the anonymous session id
//! - `products list|search|show` - Read the product catalog
//! - `cart show|badge|add|remove|adjust` - Read and change the cart
//! - `auth signin|signup|signout|whoami` - Manage the stored credential
//!
//! Configuration comes from `CARTWHEEL_*` environment variables (see
//! `cartwheel_storefront::config`).

#![cfg_attr(not(test), forbid(unsafe_code))]

use cartwheel_core::ProductId;
use cartwheel_storefront::CartContext;
use cartwheel_storefront::config::StorefrontConfig;
use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::CliError;

#[derive(Parser)]
#[command(name = "cartwheel")]
#[command(author, version, about = "Cartwheel storefront shell")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Anonymous session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Product catalog
    Products {
        #[command(subcommand)]
        action: ProductsAction,
    },
    /// Shopping cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Sign-in state
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Print the session id, creating it on first use
    Show,
}

#[derive(Subcommand)]
enum ProductsAction {
    /// List every product
    List,
    /// Search products by name
    Search {
        /// Search text
        query: String,
    },
    /// Show one product
    Show {
        /// Product ID
        id: ProductId,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the authoritative cart
    Show,
    /// Print the header badge
    Badge {
        /// Use the locally cached count instead of asking the backend
        #[arg(long)]
        cached: bool,
    },
    /// Add units of a product
    Add {
        /// Product ID
        id: ProductId,

        /// Units to add
        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(i32).range(1..))]
        quantity: i32,
    },
    /// Remove a product's line entirely
    Remove {
        /// Product ID
        id: ProductId,
    },
    /// Change a product's quantity by a relative amount
    Adjust {
        /// Product ID
        id: ProductId,

        /// Relative change, e.g. 2 or -1
        #[arg(allow_negative_numbers = true)]
        delta: i32,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Sign in and keep the credential
    Signin {
        #[arg(short, long)]
        username: String,

        /// Password (read from stdin if omitted)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Register a new account
    Signup {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        /// Password (read from stdin if omitted)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Forget the stored credential
    Signout,
    /// Show the signed-in user
    Whoami,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load configuration from environment (needed for Sentry init)
    #[allow(clippy::expect_used)]
    let config = StorefrontConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Log to stderr so command output on stdout stays clean
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cartwheel_storefront=warn,cartwheel_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(cli, config).await {
        e.report();
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: StorefrontConfig) -> Result<(), CliError> {
    let ctx = CartContext::new(config)?;
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Session { action } => match action {
            SessionAction::Show => commands::session::show(&ctx, &mut out)?,
        },
        Commands::Products { action } => match action {
            ProductsAction::List => commands::products::list(&ctx, &mut out).await?,
            ProductsAction::Search { query } => {
                commands::products::search(&ctx, &query, &mut out).await?;
            }
            ProductsAction::Show { id } => commands::products::show(&ctx, id, &mut out).await?,
        },
        Commands::Cart { action } => match action {
            CartAction::Show => commands::cart::show(&ctx, &mut out).await?,
            CartAction::Badge { cached } => commands::cart::badge(&ctx, cached, &mut out).await?,
            CartAction::Add { id, quantity } => {
                commands::cart::adjust(&ctx, id, quantity, &mut out).await?;
            }
            CartAction::Remove { id } => commands::cart::remove(&ctx, id, &mut out).await?,
            CartAction::Adjust { id, delta } => {
                commands::cart::adjust(&ctx, id, delta, &mut out).await?;
            }
        },
        Commands::Auth { action } => match action {
            AuthAction::Signin { username, password } => {
                commands::auth::sign_in(&ctx, &username, password, &mut out).await?;
            }
            AuthAction::Signup {
                username,
                email,
                password,
            } => {
                commands::auth::sign_up(&ctx, &username, &email, password, &mut out).await?;
            }
            AuthAction::Signout => commands::auth::sign_out(&ctx, &mut out)?,
            AuthAction::Whoami => commands::auth::whoami(&ctx, &mut out)?,
        },
    }
    Ok(())
}

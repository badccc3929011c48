use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::time::Duration;

use billhook::billing;
use billhook::config::Config;
use billhook::db::cache::LicenseCache;
use billhook::db::{AppState, create_pool, init_db, queries};
use billhook::email::EmailService;
use billhook::gateways;
use billhook::handlers;
use billhook::models::{BillingPeriod, CreateCustomer, CreateProduct, CreateSubscription};
use billhook::reminders;

#[derive(Parser, Debug)]
#[command(name = "billhook")]
#[command(about = "Recurring billing and software licensing server for digital products")]
struct Cli {
    /// Seed the database with dev data (customer, product, subscription, license)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Mints an admin API key when none are active, so a fresh install can
/// reach the admin API. The plaintext is printed once and never stored.
fn bootstrap_first_api_key(state: &AppState) {
    let conn = state
        .db
        .get()
        .expect("Failed to get db connection for bootstrap");

    let count = queries::count_active_api_keys(&conn).expect("Failed to count API keys");
    if count > 0 {
        return;
    }

    let (_, key) =
        queries::create_api_key(&conn, "bootstrap").expect("Failed to create bootstrap API key");

    tracing::info!("============================================");
    tracing::info!("BOOTSTRAP ADMIN API KEY CREATED");
    tracing::info!("API Key: {}", key);
    tracing::info!("============================================");
    tracing::info!("SAVE THIS API KEY - IT WILL NOT BE SHOWN AGAIN");
    tracing::info!("============================================");
}

/// Seeds the database with dev data for testing.
/// Creates: admin API key, customer, product, and a subscription with its
/// license. Only runs in dev mode and when the dev customer doesn't exist.
fn seed_dev_data(state: &AppState) {
    let conn = state
        .db
        .get()
        .expect("Failed to get db connection for seeding");

    let existing = queries::get_customer_by_email(&conn, "dev@billhook.local")
        .expect("Failed to check for existing dev data");
    if existing.is_some() {
        tracing::info!("Database already has dev data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    // 1. Admin API key
    let (api_key, plaintext_key) =
        queries::create_api_key(&conn, "dev").expect("Failed to create dev API key");
    tracing::info!("Admin API Key: {} ({})", plaintext_key, api_key.name);
    tracing::info!("");

    // 2. Customer
    let customer = queries::create_customer(
        &conn,
        &CreateCustomer {
            email: "dev@billhook.local".to_string(),
            name: Some("Dev Customer".to_string()),
        },
    )
    .expect("Failed to create dev customer");
    tracing::info!("Customer: {} (id: {})", customer.email, customer.id);
    tracing::info!("");

    // 3. Product with monthly billing and licensing
    let product = queries::create_product(
        &conn,
        &CreateProduct {
            name: "Pro Plugin".to_string(),
            slug: None,
            version: "1.2.0".to_string(),
            price_cents: 1299,
            currency: "usd".to_string(),
            signup_fee_cents: 0,
            trial_days: 0,
            billing_period: Some(BillingPeriod::Month),
            bill_times: 0,
            licensing_enabled: true,
            activation_limit: 3,
            license_length_days: Some(365),
            changelog: Some("<h4>1.2.0</h4><ul><li>Initial dev release</li></ul>".to_string()),
            package_url: Some("https://downloads.billhook.local/pro-plugin.zip".to_string()),
        },
    )
    .expect("Failed to create dev product");
    tracing::info!("Product: {} (id: {})", product.name, product.id);
    tracing::info!("");

    // 4. Subscription on the manual gateway. Licensing is enabled on the
    //    product, so this also issues the license.
    let gateway = gateways::find("manual").expect("manual gateway missing");
    let subscription = billing::create_subscription(
        &conn,
        gateway,
        &customer,
        &product,
        &CreateSubscription {
            customer_id: customer.id.clone(),
            product_id: product.id.clone(),
            gateway: "manual".to_string(),
            profile_id: None,
            period: None,
            initial_amount_cents: None,
            recurring_amount_cents: None,
            bill_times: None,
            trial_days: None,
        },
    )
    .expect("Failed to create dev subscription");

    // The initial payment opens the first billing period and issues the
    // license.
    let outcome = billing::apply_initial_payment(
        &conn,
        &state.cache,
        &subscription.id,
        None,
        Some("dev-seed-initial"),
    )
    .expect("Failed to record dev initial payment");
    let billing::PaymentOutcome::Applied(subscription) = outcome else {
        panic!("dev initial payment was not applied");
    };
    tracing::info!(
        "Subscription: {} (status: {})",
        subscription.id,
        subscription.status.as_ref()
    );

    let license = queries::get_license_for_subscription(&conn, &subscription.id)
        .expect("Failed to load dev license")
        .expect("dev subscription has no license");
    tracing::info!("License Key: {}", license.key);
    tracing::info!("");

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");

    // Print copy-paste friendly output (no log formatting, 2-space indent for Bruno env file)
    println!();
    println!("--- COPY FROM HERE ---");
    println!("  admin_api_key: {}", plaintext_key);
    println!("  customer_id: {}", customer.id);
    println!("  product_id: {}", product.id);
    println!("  subscription_id: {}", subscription.id);
    println!("  license_key: {}", license.key);
    println!("--- END COPY ---");
    println!();
}

/// Spawns the reminder sweep: upcoming-renewal and expiring-soon emails,
/// one per (object, notice key), forever.
fn spawn_reminder_sweep(state: AppState, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs);

        loop {
            tokio::time::sleep(interval).await;

            if let Err(e) = reminders::run_reminder_sweep(&state).await {
                tracing::warn!("Reminder sweep failed: {}", e);
            }
        }
    });

    tracing::info!(
        "Reminder sweep started (runs every {} seconds)",
        interval_secs
    );
}

/// Spawns the maintenance sweep that expires overdue subscriptions and
/// licenses.
fn spawn_maintenance_sweep(state: AppState, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs);

        loop {
            tokio::time::sleep(interval).await;

            if let Err(e) = reminders::run_maintenance_sweep(&state) {
                tracing::warn!("Maintenance sweep failed: {}", e);
            }
        }
    });

    tracing::info!(
        "Maintenance sweep started (runs every {} seconds)",
        interval_secs
    );
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "billhook=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    // Create database connection pool and schema
    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let email = EmailService::new(
        config.resend_api_key.clone(),
        config.email_webhook_url.clone(),
        config.from_email.clone(),
        config.store_name.clone(),
    );

    let state = AppState {
        db: db_pool,
        cache: LicenseCache::new(),
        email,
        base_url: config.base_url.clone(),
        store_name: config.store_name.clone(),
        paypal_webhook_secret: config.paypal_webhook_secret.clone(),
        reminders_enabled: config.reminders_enabled,
        renewal_notice_days: config.renewal_notice_days.clone(),
        expiration_notice_days: config.expiration_notice_days.clone(),
    };

    // Seed dev data if --seed flag is passed (only in dev mode)
    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set BILLHOOK_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    // First run on an empty database still needs a usable admin key
    bootstrap_first_api_key(&state);

    // Background sweeps: reminders and overdue-record expiry
    spawn_reminder_sweep(state.clone(), config.reminder_interval_secs);
    spawn_maintenance_sweep(state.clone(), config.maintenance_interval_secs);

    // Build the application router
    let app = Router::new()
        // Public license API (no auth, rate limited)
        .merge(handlers::public::router(config.rate_limit))
        // Gateway webhooks (signature auth)
        .merge(handlers::webhooks::router())
        // Admin API (API key auth)
        .merge(handlers::admin::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // Track if we should clean up on exit
    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Billhook server listening on {}", addr);

    // Run server with graceful shutdown
    // Use into_make_service_with_connect_info to enable IP-based rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    // Cleanup on exit if ephemeral mode
    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        // Also remove WAL and SHM files if they exist
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}

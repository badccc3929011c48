use rusqlite::Connection;

/// Initialize the database schema. Idempotent; runs at every startup.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA wal_autocheckpoint = 1000;
        PRAGMA journal_size_limit = 67108864;

        -- Customers (billing contacts - own subscriptions and licenses)
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_customers_email ON customers(email);

        -- Products (digital downloads with optional billing + licensing config)
        -- billing_period NULL = one-time purchase
        -- license_length_days NULL = lifetime licenses
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            version TEXT NOT NULL DEFAULT '1.0.0',
            price_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'usd',
            signup_fee_cents INTEGER NOT NULL DEFAULT 0,
            trial_days INTEGER NOT NULL DEFAULT 0,
            billing_period TEXT CHECK (billing_period IS NULL OR billing_period IN ('day', 'week', 'month', 'quarter', 'semi-year', 'year')),
            bill_times INTEGER NOT NULL DEFAULT 0,
            licensing_enabled INTEGER NOT NULL DEFAULT 0,
            activation_limit INTEGER NOT NULL DEFAULT 0,
            license_length_days INTEGER,
            changelog TEXT,
            package_url TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_products_slug ON products(slug);

        -- Subscriptions (the billing lifecycle state machine)
        -- expiration is the next renewal date, or end of access for
        -- non-renewing states; NULL until activated
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            period TEXT NOT NULL CHECK (period IN ('day', 'week', 'month', 'quarter', 'semi-year', 'year')),
            initial_amount_cents INTEGER NOT NULL,
            recurring_amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'usd',
            bill_times INTEGER NOT NULL DEFAULT 0,
            times_billed INTEGER NOT NULL DEFAULT 0,
            trial_days INTEGER NOT NULL DEFAULT 0,
            gateway TEXT NOT NULL,
            profile_id TEXT,
            status TEXT NOT NULL CHECK (status IN ('pending', 'trialling', 'active', 'cancelled', 'failing', 'expired', 'completed')),
            created_at INTEGER NOT NULL,
            expiration INTEGER,
            notes TEXT,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_customer ON subscriptions(customer_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_product ON subscriptions(product_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_status ON subscriptions(status);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_status_expiration ON subscriptions(status, expiration);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_gateway_profile ON subscriptions(gateway, profile_id) WHERE profile_id IS NOT NULL;

        -- Payments (initial / renewal / refund events per subscription)
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            subscription_id TEXT NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'usd',
            gateway TEXT NOT NULL,
            transaction_id TEXT,
            payment_type TEXT NOT NULL CHECK (payment_type IN ('initial', 'renewal', 'refund')),
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payments_subscription ON payments(subscription_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_payments_gateway_txn ON payments(gateway, transaction_id) WHERE transaction_id IS NOT NULL;

        -- Licenses (the key store)
        -- activation_limit NULL = inherit product default, 0 = unlimited
        -- expiration NULL = lifetime
        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            key TEXT NOT NULL UNIQUE,
            customer_id TEXT NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            subscription_id TEXT REFERENCES subscriptions(id) ON DELETE SET NULL,
            status TEXT NOT NULL CHECK (status IN ('inactive', 'active', 'expired', 'disabled')),
            activation_limit INTEGER,
            expiration INTEGER,
            notes TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_key ON licenses(key);
        CREATE INDEX IF NOT EXISTS idx_licenses_customer ON licenses(customer_id);
        CREATE INDEX IF NOT EXISTS idx_licenses_product ON licenses(product_id);
        CREATE INDEX IF NOT EXISTS idx_licenses_subscription ON licenses(subscription_id);
        CREATE INDEX IF NOT EXISTS idx_licenses_status_expiration ON licenses(status, expiration);

        -- License meta (open key/value per license)
        CREATE TABLE IF NOT EXISTS license_meta (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
            meta_key TEXT NOT NULL,
            meta_value TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(license_id, meta_key)
        );
        CREATE INDEX IF NOT EXISTS idx_license_meta_license ON license_meta(license_id);
        CREATE INDEX IF NOT EXISTS idx_license_meta_kv ON license_meta(meta_key, meta_value);

        -- Activations (sites activated against a license)
        -- is_local: local/staging installs never count against the limit
        CREATE TABLE IF NOT EXISTS activations (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
            site_url TEXT NOT NULL,
            is_local INTEGER NOT NULL DEFAULT 0,
            activated_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            UNIQUE(license_id, site_url)
        );
        CREATE INDEX IF NOT EXISTS idx_activations_license ON activations(license_id);

        -- Admin API keys (only the SHA-256 hash is stored)
        CREATE TABLE IF NOT EXISTS api_keys (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            key_prefix TEXT NOT NULL,
            key_hash TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            last_used_at INTEGER,
            revoked_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_api_keys_hash ON api_keys(key_hash);

        -- Processed webhook deliveries (replay suppression)
        CREATE TABLE IF NOT EXISTS webhook_events (
            gateway TEXT NOT NULL,
            event_id TEXT NOT NULL,
            received_at INTEGER NOT NULL,
            PRIMARY KEY (gateway, event_id)
        );

        -- Sent reminder notices (one row per object + notice, forever)
        CREATE TABLE IF NOT EXISTS reminder_log (
            object_type TEXT NOT NULL CHECK (object_type IN ('subscription', 'license')),
            object_id TEXT NOT NULL,
            notice_key TEXT NOT NULL,
            sent_at INTEGER NOT NULL,
            PRIMARY KEY (object_type, object_id, notice_key)
        );
        "#,
    )
}

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    ACTIVATION_COLS, API_KEY_COLS, CUSTOMER_COLS, FromRow, LICENSE_COLS, LICENSE_META_COLS,
    LICENSE_WITH_PRODUCT_COLS, PAYMENT_COLS, PRODUCT_COLS, SUBSCRIPTION_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Generate a license key: 32 lowercase hex chars, same entropy as a v4 UUID.
pub fn generate_license_key() -> String {
    Uuid::new_v4().as_simple().to_string()
}

/// Generate an admin API key in the form `bh_key_{40 alphanumeric chars}`.
pub fn generate_api_key() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789";
    let mut rng = rand::thread_rng();
    let secret: String = (0..40)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("bh_key_{}", secret)
}

/// Hash an API key for database lookups. SHA-256 with an application salt,
/// lowercase hex. Only hashes are stored.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"billhook-v1:");
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query for efficiency.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value (including NULL).
    /// Use this for Option<T> where Some(v) = set to v, None = set to NULL.
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    /// Execute the update and return the updated entity using RETURNING clause.
    /// Returns None if no rows matched (entity not found or no fields to update).
    fn execute_returning<T: super::from_row::FromRow>(
        mut self,
        conn: &Connection,
        returning_cols: &str,
    ) -> Result<Option<T>> {
        if self.fields.is_empty() {
            return Ok(None);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? RETURNING {}",
            self.table,
            sets.join(", "),
            returning_cols
        );
        conn.query_row(&sql, params_from_iter(values), T::from_row)
            .optional()
            .map_err(Into::into)
    }
}

// ============ Customers ============

pub fn create_customer(conn: &Connection, input: &CreateCustomer) -> Result<Customer> {
    let email = input.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(AppError::BadRequest("Invalid email address".into()));
    }

    let id = EntityType::Customer.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO customers (id, email, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, email, input.name, ts, ts],
    )?;

    get_customer_by_id(conn, &id)?
        .ok_or_else(|| AppError::Internal("Customer vanished after insert".into()))
}

pub fn get_customer_by_id(conn: &Connection, id: &str) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!("SELECT {} FROM customers WHERE id = ?1", CUSTOMER_COLS),
        &[&id],
    )
}

pub fn get_customer_by_email(conn: &Connection, email: &str) -> Result<Option<Customer>> {
    let email = email.trim().to_lowercase();
    query_one(
        conn,
        &format!("SELECT {} FROM customers WHERE email = ?1", CUSTOMER_COLS),
        &[&email],
    )
}

pub fn list_customers_paginated(
    conn: &Connection,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Customer>, i64)> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM customers", [], |r| r.get(0))?;
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM customers ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            CUSTOMER_COLS
        ),
        &[&limit, &offset],
    )?;
    Ok((items, total))
}

pub fn update_customer(
    conn: &Connection,
    id: &str,
    input: &UpdateCustomer,
) -> Result<Option<Customer>> {
    if let Some(ref email) = input.email
        && !email.contains('@')
    {
        return Err(AppError::BadRequest("Invalid email address".into()));
    }

    UpdateBuilder::new("customers", id)
        .with_updated_at()
        .set_opt("email", input.email.as_ref().map(|e| e.trim().to_lowercase()))
        .set_opt("name", input.name.clone().map(Value::from))
        .execute_returning(conn, CUSTOMER_COLS)
}

// ============ Products ============

/// Derive a URL-safe slug from a product name.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

pub fn create_product(conn: &Connection, input: &CreateProduct) -> Result<Product> {
    if input.price_cents < 0 {
        return Err(AppError::BadRequest("price_cents must be non-negative".into()));
    }
    if input.billing_period.is_none() && input.trial_days > 0 {
        return Err(AppError::BadRequest(
            "trial_days requires a billing_period".into(),
        ));
    }

    let slug = match input.slug {
        Some(ref s) if !s.is_empty() => s.clone(),
        _ => slugify(&input.name),
    };
    if slug.is_empty() {
        return Err(AppError::BadRequest("Product name produces an empty slug".into()));
    }

    let id = EntityType::Product.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO products (id, name, slug, version, price_cents, currency, signup_fee_cents,
            trial_days, billing_period, bill_times, licensing_enabled, activation_limit,
            license_length_days, changelog, package_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            id,
            input.name,
            slug,
            input.version,
            input.price_cents,
            input.currency,
            input.signup_fee_cents,
            input.trial_days,
            input.billing_period.map(|p| p.as_ref().to_string()),
            input.bill_times,
            input.licensing_enabled as i32,
            input.activation_limit,
            input.license_length_days,
            input.changelog,
            input.package_url,
            ts,
            ts
        ],
    )?;

    get_product_by_id(conn, &id)?
        .ok_or_else(|| AppError::Internal("Product vanished after insert".into()))
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

pub fn get_product_by_slug(conn: &Connection, slug: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE slug = ?1", PRODUCT_COLS),
        &[&slug],
    )
}

pub fn list_products_paginated(
    conn: &Connection,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Product>, i64)> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?;
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM products ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            PRODUCT_COLS
        ),
        &[&limit, &offset],
    )?;
    Ok((items, total))
}

pub fn update_product(
    conn: &Connection,
    id: &str,
    input: &UpdateProduct,
) -> Result<Option<Product>> {
    UpdateBuilder::new("products", id)
        .with_updated_at()
        .set_opt("name", input.name.clone())
        .set_opt("version", input.version.clone())
        .set_opt("price_cents", input.price_cents)
        .set_opt("signup_fee_cents", input.signup_fee_cents)
        .set_opt("trial_days", input.trial_days)
        .set_opt("bill_times", input.bill_times)
        .set_opt("licensing_enabled", input.licensing_enabled.map(|b| b as i32))
        .set_opt("activation_limit", input.activation_limit)
        .set_opt(
            "license_length_days",
            input.license_length_days.map(Value::from),
        )
        .set_opt("changelog", input.changelog.clone().map(Value::from))
        .set_opt("package_url", input.package_url.clone().map(Value::from))
        .execute_returning(conn, PRODUCT_COLS)
}

pub fn delete_product(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM products WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

// ============ Subscriptions ============

/// Validated values for a subscription insert. Built by the billing layer
/// after gateway validation; defaults already resolved from the product.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub customer_id: String,
    pub product_id: String,
    pub period: BillingPeriod,
    pub initial_amount_cents: i64,
    pub recurring_amount_cents: i64,
    pub currency: String,
    pub bill_times: i64,
    pub trial_days: i64,
    pub gateway: String,
    pub profile_id: Option<String>,
    pub status: SubscriptionStatus,
    pub expiration: Option<i64>,
}

pub fn create_subscription(conn: &Connection, input: &NewSubscription) -> Result<Subscription> {
    let id = EntityType::Subscription.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO subscriptions (id, customer_id, product_id, period, initial_amount_cents,
            recurring_amount_cents, currency, bill_times, times_billed, trial_days, gateway,
            profile_id, status, created_at, expiration, notes, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12, ?13, ?14, NULL, ?15)",
        params![
            id,
            input.customer_id,
            input.product_id,
            input.period.as_ref(),
            input.initial_amount_cents,
            input.recurring_amount_cents,
            input.currency,
            input.bill_times,
            input.trial_days,
            input.gateway,
            input.profile_id,
            input.status.as_ref(),
            ts,
            input.expiration,
            ts
        ],
    )?;

    get_subscription_by_id(conn, &id)?
        .ok_or_else(|| AppError::Internal("Subscription vanished after insert".into()))
}

pub fn get_subscription_by_id(conn: &Connection, id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM subscriptions WHERE id = ?1", SUBSCRIPTION_COLS),
        &[&id],
    )
}

/// Resolve a subscription from a gateway billing-profile reference.
/// This is how webhook events find their subscription.
pub fn get_subscription_by_profile(
    conn: &Connection,
    gateway: &str,
    profile_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE gateway = ?1 AND profile_id = ?2",
            SUBSCRIPTION_COLS
        ),
        &[&gateway, &profile_id],
    )
}

#[derive(Debug, Default, Clone)]
pub struct SubscriptionFilters {
    pub status: Option<SubscriptionStatus>,
    pub customer_id: Option<String>,
    pub product_id: Option<String>,
    pub gateway: Option<String>,
}

pub fn list_subscriptions_paginated(
    conn: &Connection,
    filters: &SubscriptionFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Subscription>, i64)> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(status) = filters.status {
        clauses.push("status = ?");
        values.push(status.as_ref().to_string().into());
    }
    if let Some(ref customer_id) = filters.customer_id {
        clauses.push("customer_id = ?");
        values.push(customer_id.clone().into());
    }
    if let Some(ref product_id) = filters.product_id {
        clauses.push("product_id = ?");
        values.push(product_id.clone().into());
    }
    if let Some(ref gateway) = filters.gateway {
        clauses.push("gateway = ?");
        values.push(gateway.clone().into());
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM subscriptions{}", where_sql),
        params_from_iter(values.clone()),
        |r| r.get(0),
    )?;

    values.push(limit.into());
    values.push(offset.into());
    let sql = format!(
        "SELECT {} FROM subscriptions{} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        SUBSCRIPTION_COLS, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(values), Subscription::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((items, total))
}

pub fn update_subscription(
    conn: &Connection,
    id: &str,
    input: &UpdateSubscription,
) -> Result<Option<Subscription>> {
    UpdateBuilder::new("subscriptions", id)
        .with_updated_at()
        .set_opt("profile_id", input.profile_id.clone().map(Value::from))
        .set_opt("expiration", input.expiration)
        .set_opt("recurring_amount_cents", input.recurring_amount_cents)
        .set_opt("bill_times", input.bill_times)
        .execute_returning(conn, SUBSCRIPTION_COLS)
}

/// Move a subscription to a new status, optionally updating expiration.
pub fn set_subscription_status(
    conn: &Connection,
    id: &str,
    status: SubscriptionStatus,
    expiration: Option<i64>,
) -> Result<Option<Subscription>> {
    UpdateBuilder::new("subscriptions", id)
        .with_updated_at()
        .set("status", status.as_ref().to_string())
        .set_opt("expiration", expiration)
        .execute_returning(conn, SUBSCRIPTION_COLS)
}

/// Record a payment against a subscription and advance its billing state
/// in one statement. Status and expiration are decided by the caller.
pub fn apply_subscription_renewal(
    conn: &Connection,
    id: &str,
    status: SubscriptionStatus,
    expiration: i64,
    times_billed: i64,
) -> Result<Option<Subscription>> {
    UpdateBuilder::new("subscriptions", id)
        .with_updated_at()
        .set("status", status.as_ref().to_string())
        .set("expiration", expiration)
        .set("times_billed", times_billed)
        .execute_returning(conn, SUBSCRIPTION_COLS)
}

/// Append a dated note to a subscription's history.
pub fn add_subscription_note(conn: &Connection, id: &str, note: &str) -> Result<()> {
    let entry = format!("{} - {}", crate::util::format_date(now()), note);
    conn.execute(
        "UPDATE subscriptions SET notes = COALESCE(notes || char(10), '') || ?1, updated_at = ?2
         WHERE id = ?3",
        params![entry, now(), id],
    )?;
    Ok(())
}

pub fn delete_subscription(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM subscriptions WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

/// Subscriptions whose access window has lapsed and that the maintenance
/// sweep should expire.
pub fn list_subscriptions_to_expire(conn: &Connection, cutoff: i64) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscriptions
             WHERE status IN ('trialling', 'active', 'cancelled', 'failing')
               AND expiration IS NOT NULL AND expiration < ?1",
            SUBSCRIPTION_COLS
        ),
        &[&cutoff],
    )
}

/// Subscriptions with an expiration inside [start, end), restricted to the
/// given statuses. Used by the reminders engine to build notice windows.
pub fn list_subscriptions_expiring_between(
    conn: &Connection,
    start: i64,
    end: i64,
    statuses: &[SubscriptionStatus],
) -> Result<Vec<Subscription>> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM subscriptions
         WHERE status IN ({}) AND expiration IS NOT NULL AND expiration >= ? AND expiration < ?",
        SUBSCRIPTION_COLS, placeholders
    );
    let mut values: Vec<Value> = statuses
        .iter()
        .map(|s| s.as_ref().to_string().into())
        .collect();
    values.push(start.into());
    values.push(end.into());

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(values), Subscription::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(items)
}

// ============ Payments ============

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub subscription_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub gateway: String,
    pub transaction_id: Option<String>,
    pub payment_type: PaymentType,
}

pub fn create_payment(conn: &Connection, input: &NewPayment) -> Result<Payment> {
    let id = EntityType::Payment.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO payments (id, subscription_id, amount_cents, currency, gateway,
            transaction_id, payment_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            input.subscription_id,
            input.amount_cents,
            input.currency,
            input.gateway,
            input.transaction_id,
            input.payment_type.as_str(),
            ts
        ],
    )?;

    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        &[&id],
    )?
    .ok_or_else(|| AppError::Internal("Payment vanished after insert".into()))
}

pub fn get_payments_for_subscription(
    conn: &Connection,
    subscription_id: &str,
) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE subscription_id = ?1 ORDER BY created_at ASC",
            PAYMENT_COLS
        ),
        &[&subscription_id],
    )
}

/// Whether a gateway transaction has already been recorded. Backstops the
/// unique index so webhook replays can answer without a constraint error.
pub fn payment_exists(conn: &Connection, gateway: &str, transaction_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM payments WHERE gateway = ?1 AND transaction_id = ?2",
        params![gateway, transaction_id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Sum of initial and renewal payments minus refunds, in cents.
pub fn subscription_lifetime_value(conn: &Connection, subscription_id: &str) -> Result<i64> {
    let value: i64 = conn.query_row(
        "SELECT COALESCE(SUM(CASE WHEN payment_type = 'refund' THEN -amount_cents ELSE amount_cents END), 0)
         FROM payments WHERE subscription_id = ?1",
        params![subscription_id],
        |r| r.get(0),
    )?;
    Ok(value)
}

// ============ Licenses ============

/// Validated values for a license insert, built by the licensing layer.
#[derive(Debug, Clone)]
pub struct NewLicense {
    pub key: String,
    pub customer_id: String,
    pub product_id: String,
    pub subscription_id: Option<String>,
    pub activation_limit: Option<i64>,
    pub expiration: Option<i64>,
}

pub fn create_license(conn: &Connection, input: &NewLicense) -> Result<License> {
    let id = EntityType::License.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO licenses (id, key, customer_id, product_id, subscription_id, status,
            activation_limit, expiration, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'inactive', ?6, ?7, NULL, ?8, ?9)",
        params![
            id,
            input.key,
            input.customer_id,
            input.product_id,
            input.subscription_id,
            input.activation_limit,
            input.expiration,
            ts,
            ts
        ],
    )?;

    get_license_by_id(conn, &id)?
        .ok_or_else(|| AppError::Internal("License vanished after insert".into()))
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )
}

pub fn get_license_by_key(conn: &Connection, key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE key = ?1", LICENSE_COLS),
        &[&key],
    )
}

pub fn get_license_for_subscription(
    conn: &Connection,
    subscription_id: &str,
) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE subscription_id = ?1 ORDER BY created_at ASC",
            LICENSE_COLS
        ),
        &[&subscription_id],
    )
}

#[derive(Debug, Default, Clone)]
pub struct LicenseFilters {
    pub status: Option<LicenseStatus>,
    pub customer_id: Option<String>,
    pub product_id: Option<String>,
    pub key: Option<String>,
    /// Match licenses carrying this exact meta key/value pair.
    pub meta: Option<(String, String)>,
}

pub fn list_licenses_paginated(
    conn: &Connection,
    filters: &LicenseFilters,
    limit: i64,
    offset: i64,
) -> Result<(Vec<LicenseWithProduct>, i64)> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(status) = filters.status {
        clauses.push("l.status = ?");
        values.push(status.as_ref().to_string().into());
    }
    if let Some(ref customer_id) = filters.customer_id {
        clauses.push("l.customer_id = ?");
        values.push(customer_id.clone().into());
    }
    if let Some(ref product_id) = filters.product_id {
        clauses.push("l.product_id = ?");
        values.push(product_id.clone().into());
    }
    if let Some(ref key) = filters.key {
        clauses.push("l.key = ?");
        values.push(key.clone().into());
    }
    if let Some((ref meta_key, ref meta_value)) = filters.meta {
        clauses.push(
            "l.id IN (SELECT license_id FROM license_meta WHERE meta_key = ? AND meta_value = ?)",
        );
        values.push(meta_key.clone().into());
        values.push(meta_value.clone().into());
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM licenses l{}", where_sql),
        params_from_iter(values.clone()),
        |r| r.get(0),
    )?;

    values.push(limit.into());
    values.push(offset.into());
    let sql = format!(
        "SELECT {} FROM licenses l JOIN products p ON p.id = l.product_id{}
         ORDER BY l.created_at DESC LIMIT ? OFFSET ?",
        LICENSE_WITH_PRODUCT_COLS, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(values), LicenseWithProduct::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((items, total))
}

pub fn update_license(
    conn: &Connection,
    id: &str,
    input: &UpdateLicense,
) -> Result<Option<License>> {
    UpdateBuilder::new("licenses", id)
        .with_updated_at()
        .set_opt("activation_limit", input.activation_limit.map(Value::from))
        .set_opt("expiration", input.expiration.map(Value::from))
        .execute_returning(conn, LICENSE_COLS)
}

pub fn set_license_status(
    conn: &Connection,
    id: &str,
    status: LicenseStatus,
) -> Result<Option<License>> {
    UpdateBuilder::new("licenses", id)
        .with_updated_at()
        .set("status", status.as_ref().to_string())
        .execute_returning(conn, LICENSE_COLS)
}

/// Set a license's expiration and status together (renewals, admin edits).
pub fn set_license_expiration(
    conn: &Connection,
    id: &str,
    expiration: Option<i64>,
    status: LicenseStatus,
) -> Result<Option<License>> {
    UpdateBuilder::new("licenses", id)
        .with_updated_at()
        .set_nullable("expiration", expiration)
        .set("status", status.as_ref().to_string())
        .execute_returning(conn, LICENSE_COLS)
}

/// Replace a license key (support operation). The old key stops working
/// immediately.
pub fn set_license_key(conn: &Connection, id: &str, key: &str) -> Result<Option<License>> {
    UpdateBuilder::new("licenses", id)
        .with_updated_at()
        .set("key", key.to_string())
        .execute_returning(conn, LICENSE_COLS)
}

/// Append a dated note to a license's history.
pub fn add_license_note(conn: &Connection, id: &str, note: &str) -> Result<()> {
    let entry = format!("{} - {}", crate::util::format_date(now()), note);
    conn.execute(
        "UPDATE licenses SET notes = COALESCE(notes || char(10), '') || ?1, updated_at = ?2
         WHERE id = ?3",
        params![entry, now(), id],
    )?;
    Ok(())
}

/// Licenses whose term has lapsed and that the maintenance sweep should
/// mark expired. Disabled licenses are left alone.
pub fn list_licenses_to_expire(conn: &Connection, cutoff: i64) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses
             WHERE status IN ('inactive', 'active')
               AND expiration IS NOT NULL AND expiration < ?1",
            LICENSE_COLS
        ),
        &[&cutoff],
    )
}

/// Licenses expiring inside [start, end) that are still in a renewable
/// state. Used for expiring-soon notices.
pub fn list_licenses_expiring_between(
    conn: &Connection,
    start: i64,
    end: i64,
) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses
             WHERE status IN ('inactive', 'active')
               AND expiration IS NOT NULL AND expiration >= ?1 AND expiration < ?2",
            LICENSE_COLS
        ),
        &[&start, &end],
    )
}

// ============ License meta ============

pub fn upsert_license_meta(
    conn: &Connection,
    license_id: &str,
    meta_key: &str,
    meta_value: &str,
) -> Result<LicenseMeta> {
    let id = EntityType::LicenseMeta.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO license_meta (id, license_id, meta_key, meta_value, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(license_id, meta_key)
         DO UPDATE SET meta_value = excluded.meta_value, updated_at = excluded.updated_at",
        params![id, license_id, meta_key, meta_value, ts, ts],
    )?;

    get_license_meta(conn, license_id, meta_key)?
        .ok_or_else(|| AppError::Internal("License meta vanished after upsert".into()))
}

pub fn get_license_meta(
    conn: &Connection,
    license_id: &str,
    meta_key: &str,
) -> Result<Option<LicenseMeta>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM license_meta WHERE license_id = ?1 AND meta_key = ?2",
            LICENSE_META_COLS
        ),
        &[&license_id, &meta_key],
    )
}

pub fn list_license_meta(conn: &Connection, license_id: &str) -> Result<Vec<LicenseMeta>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM license_meta WHERE license_id = ?1 ORDER BY meta_key ASC",
            LICENSE_META_COLS
        ),
        &[&license_id],
    )
}

pub fn delete_license_meta(conn: &Connection, license_id: &str, meta_key: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM license_meta WHERE license_id = ?1 AND meta_key = ?2",
        params![license_id, meta_key],
    )?;
    Ok(affected > 0)
}

// ============ Activations ============

pub fn create_activation(
    conn: &Connection,
    license_id: &str,
    site_url: &str,
    is_local: bool,
) -> Result<Activation> {
    let id = EntityType::Activation.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO activations (id, license_id, site_url, is_local, activated_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, license_id, site_url, is_local as i32, ts, ts],
    )?;

    query_one(
        conn,
        &format!("SELECT {} FROM activations WHERE id = ?1", ACTIVATION_COLS),
        &[&id],
    )?
    .ok_or_else(|| AppError::Internal("Activation vanished after insert".into()))
}

pub fn get_activation(
    conn: &Connection,
    license_id: &str,
    site_url: &str,
) -> Result<Option<Activation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM activations WHERE license_id = ?1 AND site_url = ?2",
            ACTIVATION_COLS
        ),
        &[&license_id, &site_url],
    )
}

pub fn get_activation_by_id(conn: &Connection, id: &str) -> Result<Option<Activation>> {
    query_one(
        conn,
        &format!("SELECT {} FROM activations WHERE id = ?1", ACTIVATION_COLS),
        &[&id],
    )
}

pub fn list_activations_for_license(
    conn: &Connection,
    license_id: &str,
) -> Result<Vec<Activation>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM activations WHERE license_id = ?1 ORDER BY activated_at ASC",
            ACTIVATION_COLS
        ),
        &[&license_id],
    )
}

/// Number of activations that count against the limit (local sites excluded).
pub fn count_site_activations(conn: &Connection, license_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM activations WHERE license_id = ?1 AND is_local = 0",
        params![license_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

pub fn delete_activation(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM activations WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

pub fn touch_activation_last_seen(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE activations SET last_seen_at = ?1 WHERE id = ?2",
        params![now(), id],
    )?;
    Ok(())
}

// ============ API keys ============

/// Create an admin API key. Returns the record and the plaintext key,
/// which is never retrievable again.
pub fn create_api_key(conn: &Connection, name: &str) -> Result<(ApiKey, String)> {
    let key = generate_api_key();
    let id = EntityType::ApiKey.gen_id();
    let ts = now();
    conn.execute(
        "INSERT INTO api_keys (id, name, key_prefix, key_hash, created_at, last_used_at, revoked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL)",
        params![id, name, &key[..12], hash_api_key(&key), ts],
    )?;

    let record = query_one(
        conn,
        &format!("SELECT {} FROM api_keys WHERE id = ?1", API_KEY_COLS),
        &[&id],
    )?
    .ok_or_else(|| AppError::Internal("API key vanished after insert".into()))?;

    Ok((record, key))
}

/// Look up an unrevoked API key by the hash of its plaintext.
pub fn get_api_key_by_hash(conn: &Connection, key_hash: &str) -> Result<Option<ApiKey>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM api_keys WHERE key_hash = ?1 AND revoked_at IS NULL",
            API_KEY_COLS
        ),
        &[&key_hash],
    )
}

pub fn get_api_key_by_id(conn: &Connection, id: &str) -> Result<Option<ApiKey>> {
    query_one(
        conn,
        &format!("SELECT {} FROM api_keys WHERE id = ?1", API_KEY_COLS),
        &[&id],
    )
}

pub fn list_api_keys(conn: &Connection) -> Result<Vec<ApiKey>> {
    query_all(
        conn,
        &format!("SELECT {} FROM api_keys ORDER BY created_at ASC", API_KEY_COLS),
        &[],
    )
}

pub fn count_active_api_keys(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM api_keys WHERE revoked_at IS NULL",
        [],
        |r| r.get(0),
    )?;
    Ok(count)
}

pub fn revoke_api_key(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE api_keys SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
        params![now(), id],
    )?;
    Ok(affected > 0)
}

pub fn touch_api_key_last_used(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
        params![now(), id],
    )?;
    Ok(())
}

// ============ Webhook events ============

/// Record a webhook delivery id. Returns false when the id was already
/// recorded, meaning the delivery is a replay and must not be re-processed.
pub fn try_record_webhook_event(conn: &Connection, gateway: &str, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (gateway, event_id, received_at) VALUES (?1, ?2, ?3)",
        params![gateway, event_id, now()],
    )?;
    Ok(affected > 0)
}

// ============ Reminder log ============

/// Record that a notice was sent for an object. Returns false when this
/// (object, notice) pair was already sent, so each notice fires once.
pub fn try_record_reminder(
    conn: &Connection,
    object_type: &str,
    object_id: &str,
    notice_key: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO reminder_log (object_type, object_id, notice_key, sent_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![object_type, object_id, notice_key, now()],
    )?;
    Ok(affected > 0)
}

pub fn reminder_already_sent(
    conn: &Connection,
    object_type: &str,
    object_id: &str,
    notice_key: &str,
) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM reminder_log
         WHERE object_type = ?1 AND object_id = ?2 AND notice_key = ?3",
        params![object_type, object_id, notice_key],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

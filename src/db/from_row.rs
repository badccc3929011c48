//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! This module provides a `FromRow` trait that models can implement to
//! define how they are constructed from database rows, plus helper functions
//! for common query patterns.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// This provides graceful error handling instead of panicking when database
/// contains invalid enum values (from corruption, migration errors, etc.).
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Parse a nullable string column into an optional enum type.
fn parse_enum_opt<T: std::str::FromStr>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(col)? {
        None => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(|_| {
            rusqlite::Error::InvalidColumnType(
                col,
                col_name.to_string(),
                rusqlite::types::Type::Text,
            )
        }),
    }
}

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    /// Construct an instance from a database row.
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const CUSTOMER_COLS: &str = "id, email, name, created_at, updated_at";

pub const PRODUCT_COLS: &str = "id, name, slug, version, price_cents, currency, signup_fee_cents, trial_days, billing_period, bill_times, licensing_enabled, activation_limit, license_length_days, changelog, package_url, created_at, updated_at";

pub const SUBSCRIPTION_COLS: &str = "id, customer_id, product_id, period, initial_amount_cents, recurring_amount_cents, currency, bill_times, times_billed, trial_days, gateway, profile_id, status, created_at, expiration, notes, updated_at";

pub const PAYMENT_COLS: &str =
    "id, subscription_id, amount_cents, currency, gateway, transaction_id, payment_type, created_at";

pub const LICENSE_COLS: &str = "id, key, customer_id, product_id, subscription_id, status, activation_limit, expiration, notes, created_at, updated_at";

pub const LICENSE_WITH_PRODUCT_COLS: &str = "l.id, l.key, l.customer_id, l.product_id, l.subscription_id, l.status, l.activation_limit, l.expiration, l.notes, l.created_at, l.updated_at, p.name";

pub const LICENSE_META_COLS: &str =
    "id, license_id, meta_key, meta_value, created_at, updated_at";

pub const ACTIVATION_COLS: &str =
    "id, license_id, site_url, is_local, activated_at, last_seen_at";

pub const API_KEY_COLS: &str =
    "id, name, key_prefix, key_hash, created_at, last_used_at, revoked_at";

// ============ FromRow Implementations ============

impl FromRow for Customer {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Customer {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            version: row.get(3)?,
            price_cents: row.get(4)?,
            currency: row.get(5)?,
            signup_fee_cents: row.get(6)?,
            trial_days: row.get(7)?,
            billing_period: parse_enum_opt(row, 8, "billing_period")?,
            bill_times: row.get(9)?,
            licensing_enabled: row.get::<_, i32>(10)? != 0,
            activation_limit: row.get(11)?,
            license_length_days: row.get(12)?,
            changelog: row.get(13)?,
            package_url: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            product_id: row.get(2)?,
            period: parse_enum(row, 3, "period")?,
            initial_amount_cents: row.get(4)?,
            recurring_amount_cents: row.get(5)?,
            currency: row.get(6)?,
            bill_times: row.get(7)?,
            times_billed: row.get(8)?,
            trial_days: row.get(9)?,
            gateway: row.get(10)?,
            profile_id: row.get(11)?,
            status: parse_enum(row, 12, "status")?,
            created_at: row.get(13)?,
            expiration: row.get(14)?,
            notes: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let type_str: String = row.get(6)?;
        let payment_type = PaymentType::from_str(&type_str).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(
                6,
                "payment_type".to_string(),
                rusqlite::types::Type::Text,
            )
        })?;
        Ok(Payment {
            id: row.get(0)?,
            subscription_id: row.get(1)?,
            amount_cents: row.get(2)?,
            currency: row.get(3)?,
            gateway: row.get(4)?,
            transaction_id: row.get(5)?,
            payment_type,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            key: row.get(1)?,
            customer_id: row.get(2)?,
            product_id: row.get(3)?,
            subscription_id: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            activation_limit: row.get(6)?,
            expiration: row.get(7)?,
            notes: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for LicenseWithProduct {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LicenseWithProduct {
            license: License::from_row(row)?,
            product_name: row.get(11)?,
        })
    }
}

impl FromRow for LicenseMeta {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LicenseMeta {
            id: row.get(0)?,
            license_id: row.get(1)?,
            meta_key: row.get(2)?,
            meta_value: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl FromRow for Activation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Activation {
            id: row.get(0)?,
            license_id: row.get(1)?,
            site_url: row.get(2)?,
            is_local: row.get::<_, i32>(3)? != 0,
            activated_at: row.get(4)?,
            last_seen_at: row.get(5)?,
        })
    }
}

impl FromRow for ApiKey {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ApiKey {
            id: row.get(0)?,
            name: row.get(1)?,
            key_prefix: row.get(2)?,
            key_hash: row.get(3)?,
            created_at: row.get(4)?,
            last_used_at: row.get(5)?,
            revoked_at: row.get(6)?,
        })
    }
}

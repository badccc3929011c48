//! Software licensing facade: key issuance, renewal, and site activation
//! rules shared by the public license API, the billing engine, and the
//! admin surface.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use url::Url;

use crate::db::cache::LicenseCache;
use crate::db::queries;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{Activation, License, LicenseMeta, LicenseStatus, Product, Subscription};
use crate::util::SECONDS_PER_DAY;

// ============ Site URL handling ============

/// Normalize a site URL so the same install always maps to the same
/// activation row: scheme and `www.` stripped, host lowercased, trailing
/// slash trimmed, query and fragment dropped. Port and path are kept
/// because they distinguish separate installs on one host.
pub fn normalize_site_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("Site URL is required".into()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = Url::parse(&with_scheme)
        .map_err(|_| AppError::BadRequest("Invalid site URL".into()))?;
    let host = url
        .host_str()
        .ok_or_else(|| AppError::BadRequest("Site URL has no host".into()))?;
    let host = host.strip_prefix("www.").unwrap_or(host);

    let mut normalized = host.to_lowercase();
    if let Some(port) = url.port() {
        normalized.push(':');
        normalized.push_str(&port.to_string());
    }
    let path = url.path().trim_end_matches('/');
    if !path.is_empty() && path != "/" {
        normalized.push_str(path);
    }
    Ok(normalized)
}

/// Development and staging hosts do not consume activation slots.
pub fn is_local_site(normalized_url: &str) -> bool {
    let host = normalized_url.split('/').next().unwrap_or(normalized_url);
    if let Some(v6) = host.strip_prefix('[') {
        return v6.split(']').next() == Some("::1");
    }
    let host = host.split(':').next().unwrap_or(host);

    host == "localhost"
        || host == "127.0.0.1"
        || host.starts_with("10.")
        || host.starts_with("192.168.")
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.ends_with(".test")
        || host.ends_with(".example")
}

// ============ Read-through cache ============

pub fn load_license_by_key(
    conn: &Connection,
    cache: &LicenseCache,
    key: &str,
) -> Result<Option<Arc<License>>> {
    if let Some(license) = cache.get_license_by_key(key) {
        return Ok(Some(license));
    }
    match queries::get_license_by_key(conn, key)? {
        Some(license) => {
            cache.store_license(&license);
            Ok(Some(Arc::new(license)))
        }
        None => Ok(None),
    }
}

pub fn load_activations(
    conn: &Connection,
    cache: &LicenseCache,
    license_id: &str,
) -> Result<Arc<Vec<Activation>>> {
    if let Some(rows) = cache.get_activations(license_id) {
        return Ok(rows);
    }
    let rows = queries::list_activations_for_license(conn, license_id)?;
    cache.store_activations(license_id, rows.clone());
    Ok(Arc::new(rows))
}

pub fn load_meta(
    conn: &Connection,
    cache: &LicenseCache,
    license_id: &str,
) -> Result<Arc<Vec<LicenseMeta>>> {
    if let Some(rows) = cache.get_meta(license_id) {
        return Ok(rows);
    }
    let rows = queries::list_license_meta(conn, license_id)?;
    cache.store_meta(license_id, rows.clone());
    Ok(Arc::new(rows))
}

// ============ Issuance and lifecycle ============

/// Issue a license for a purchase. Returns None when the product does not
/// have licensing enabled. Subscription-backed licenses inherit the
/// subscription's expiration; one-off purchases run from
/// `license_length_days` (NULL = lifetime).
pub fn issue_license(
    conn: &Connection,
    product: &Product,
    customer_id: &str,
    subscription: Option<&Subscription>,
) -> Result<Option<License>> {
    if !product.licensing_enabled {
        return Ok(None);
    }

    let expiration = match subscription {
        Some(sub) => sub.expiration,
        None => product
            .license_length_days
            .map(|days| Utc::now().timestamp() + days * SECONDS_PER_DAY),
    };

    let license = queries::create_license(
        conn,
        &queries::NewLicense {
            key: queries::generate_license_key(),
            customer_id: customer_id.to_string(),
            product_id: product.id.clone(),
            subscription_id: subscription.map(|s| s.id.clone()),
            activation_limit: None,
            expiration,
        },
    )?;
    queries::add_license_note(conn, &license.id, "License issued")?;
    Ok(Some(license))
}

/// Status a non-disabled, non-expired license should carry given its
/// current activations.
fn status_for_activity(conn: &Connection, license_id: &str) -> Result<LicenseStatus> {
    let count = queries::count_site_activations(conn, license_id)?;
    Ok(if count > 0 {
        LicenseStatus::Active
    } else {
        LicenseStatus::Inactive
    })
}

/// Flip a lapsed license to `expired` on read. The maintenance sweep does
/// the same in bulk; this keeps API answers correct between sweeps.
pub fn refresh_expiry(
    conn: &Connection,
    cache: &LicenseCache,
    license: &License,
    now: i64,
) -> Result<License> {
    let lapsed = matches!(
        license.status,
        LicenseStatus::Active | LicenseStatus::Inactive
    ) && license.expiration.is_some_and(|exp| exp < now);

    if !lapsed {
        return Ok(license.clone());
    }
    cache.invalidate_license(&license.id);
    queries::set_license_status(conn, &license.id, LicenseStatus::Expired)?
        .or_not_found(msg::LICENSE_NOT_FOUND)
}

/// Extend a standalone license by the product's term, from
/// `max(expiration, now)`. Lifetime licenses are left alone.
pub fn renew_license(
    conn: &Connection,
    cache: &LicenseCache,
    license: &License,
    product: &Product,
) -> Result<License> {
    if license.status == LicenseStatus::Disabled {
        return Err(AppError::BadRequest(
            "Cannot renew a disabled license".into(),
        ));
    }
    let (Some(days), Some(current)) = (product.license_length_days, license.expiration) else {
        return Ok(license.clone());
    };

    let now = Utc::now().timestamp();
    let expiration = current.max(now) + days * SECONDS_PER_DAY;
    let status = status_for_activity(conn, &license.id)?;

    cache.invalidate_license(&license.id);
    let updated = queries::set_license_expiration(conn, &license.id, Some(expiration), status)?
        .or_not_found(msg::LICENSE_NOT_FOUND)?;
    queries::add_license_note(
        conn,
        &license.id,
        &format!("License renewed until {}", crate::util::format_date(expiration)),
    )?;
    Ok(updated)
}

/// Align a subscription's license with the subscription's expiration.
/// Called after subscription renewal. Disabled licenses are not revived.
pub fn sync_license_to_subscription(
    conn: &Connection,
    cache: &LicenseCache,
    subscription: &Subscription,
) -> Result<Option<License>> {
    let Some(license) = queries::get_license_for_subscription(conn, &subscription.id)? else {
        return Ok(None);
    };
    if license.status == LicenseStatus::Disabled {
        return Ok(Some(license));
    }

    let status = status_for_activity(conn, &license.id)?;
    cache.invalidate_license(&license.id);
    let updated =
        queries::set_license_expiration(conn, &license.id, subscription.expiration, status)?;
    Ok(updated)
}

/// Admin kill-switch. Disabled licenses fail every public operation.
pub fn disable_license(
    conn: &Connection,
    cache: &LicenseCache,
    license: &License,
) -> Result<License> {
    cache.invalidate_license(&license.id);
    let updated = queries::set_license_status(conn, &license.id, LicenseStatus::Disabled)?
        .or_not_found(msg::LICENSE_NOT_FOUND)?;
    queries::add_license_note(conn, &license.id, "License disabled")?;
    Ok(updated)
}

/// Re-enable a disabled license. Lands on `expired` when the term has
/// already lapsed, otherwise on `active`/`inactive` per current activations.
pub fn enable_license(
    conn: &Connection,
    cache: &LicenseCache,
    license: &License,
) -> Result<License> {
    let now = Utc::now().timestamp();
    let status = if license.expiration.is_some_and(|exp| exp < now) {
        LicenseStatus::Expired
    } else {
        status_for_activity(conn, &license.id)?
    };

    cache.invalidate_license(&license.id);
    let updated = queries::set_license_status(conn, &license.id, status)?
        .or_not_found(msg::LICENSE_NOT_FOUND)?;
    queries::add_license_note(conn, &license.id, "License enabled")?;
    Ok(updated)
}

/// Replace the key (support operation). The old key stops working as soon
/// as the cache entry is dropped.
pub fn regenerate_key(
    conn: &Connection,
    cache: &LicenseCache,
    license: &License,
) -> Result<License> {
    cache.invalidate_license(&license.id);
    let updated = queries::set_license_key(conn, &license.id, &queries::generate_license_key())?
        .or_not_found(msg::LICENSE_NOT_FOUND)?;
    queries::add_license_note(conn, &license.id, "License key regenerated")?;
    Ok(updated)
}

// ============ Site activations ============

#[derive(Debug)]
pub enum ActivationOutcome {
    Activated(Activation),
    /// The site was already activated; re-activation is idempotent.
    AlreadyActive(Activation),
    LimitReached,
}

#[derive(Debug, PartialEq)]
pub enum DeactivationOutcome {
    Deactivated,
    NotActive,
}

/// Activate a site against a license. Local sites always succeed and never
/// consume a slot; the first counted activation moves `inactive` to
/// `active`. Expects a normalized URL.
pub fn activate_site(
    conn: &Connection,
    cache: &LicenseCache,
    license: &License,
    product: &Product,
    site_url: &str,
) -> Result<ActivationOutcome> {
    if let Some(existing) = queries::get_activation(conn, &license.id, site_url)? {
        queries::touch_activation_last_seen(conn, &existing.id)?;
        return Ok(ActivationOutcome::AlreadyActive(existing));
    }

    let is_local = is_local_site(site_url);
    if !is_local {
        let limit = license.effective_activation_limit(product);
        if limit > 0 && queries::count_site_activations(conn, &license.id)? >= limit {
            return Ok(ActivationOutcome::LimitReached);
        }
    }

    cache.invalidate_license(&license.id);
    let activation = queries::create_activation(conn, &license.id, site_url, is_local)?;
    if !is_local && license.status == LicenseStatus::Inactive {
        queries::set_license_status(conn, &license.id, LicenseStatus::Active)?;
    }
    queries::add_license_note(conn, &license.id, &format!("Site {} activated", site_url))?;
    Ok(ActivationOutcome::Activated(activation))
}

/// Remove one activation row. Dropping the last counted activation returns
/// an `active` license to `inactive`.
pub fn remove_activation(
    conn: &Connection,
    cache: &LicenseCache,
    license: &License,
    activation: &Activation,
) -> Result<()> {
    cache.invalidate_license(&license.id);
    queries::delete_activation(conn, &activation.id)?;
    if !activation.is_local
        && license.status == LicenseStatus::Active
        && queries::count_site_activations(conn, &license.id)? == 0
    {
        queries::set_license_status(conn, &license.id, LicenseStatus::Inactive)?;
    }
    queries::add_license_note(
        conn,
        &license.id,
        &format!("Site {} deactivated", activation.site_url),
    )?;
    Ok(())
}

/// Deactivate a site by its normalized URL.
pub fn deactivate_site(
    conn: &Connection,
    cache: &LicenseCache,
    license: &License,
    site_url: &str,
) -> Result<DeactivationOutcome> {
    match queries::get_activation(conn, &license.id, site_url)? {
        Some(activation) => {
            remove_activation(conn, cache, license, &activation)?;
            Ok(DeactivationOutcome::Deactivated)
        }
        None => Ok(DeactivationOutcome::NotActive),
    }
}

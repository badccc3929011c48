mod activation;
mod api_key;
mod customer;
mod license;
mod payment;
mod product;
mod subscription;

pub use activation::*;
pub use api_key::*;
pub use customer::*;
pub use license::*;
pub use payment::*;
pub use product::*;
pub use subscription::*;

/// Deserializer for PATCH fields where `null` clears the value. Plain
/// `Option<Option<T>>` collapses an explicit `null` into the outer `None`;
/// this keeps it as `Some(None)` so absent and `null` stay distinct.
pub(crate) fn double_option<'de, T, D>(
    deserializer: D,
) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

use serde::{Deserialize, Serialize};

use super::double_option;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCustomer {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCustomer {
    #[serde(default)]
    pub email: Option<String>,
    /// `null` clears the name, absent leaves it unchanged.
    #[serde(default, deserialize_with = "double_option")]
    pub name: Option<Option<String>>,
}

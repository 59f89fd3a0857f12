//! Partition/sort key construction for every table.
//!
//! All tables share the `(PK, SK)` string schema. Keys are built here and
//! nowhere else, and are written exactly as built.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;

pub const PK: &str = "PK";
pub const SK: &str = "SK";

pub const USER_PREFIX: &str = "USER#";
pub const PROFILE_PREFIX: &str = "PROFILE#";
pub const PAYMENT_PREFIX: &str = "PAYMENT#";
pub const PARTNER_PREFIX: &str = "PARTNER#";
pub const CUSTOMER_PREFIX: &str = "CUSTOMER#";
pub const REFERRAL_PREFIX: &str = "REFERRAL#";
pub const METADATA_PREFIX: &str = "METADATA#";
pub const ENVELOPE_PREFIX: &str = "ENVELOPE#";
pub const BONUS_POOL_PREFIX: &str = "BONUSPOOL#";
/// Sort key of the item that reserves a payment id across all users.
pub const PAYMENT_ID_SK: &str = "PAYMENT_ID";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableKey {
    pub pk: String,
    pub sk: String,
}

impl TableKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    pub fn to_item(&self) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (PK.to_string(), AttributeValue::S(self.pk.clone())),
            (SK.to_string(), AttributeValue::S(self.sk.clone())),
        ])
    }

    /// Extracts the key attributes from a full item.
    pub fn from_item(item: &HashMap<String, AttributeValue>) -> Option<Self> {
        let pk = item.get(PK).and_then(|v| v.as_s().ok())?;
        let sk = item.get(SK).and_then(|v| v.as_s().ok())?;
        Some(Self::new(pk.clone(), sk.clone()))
    }
}

pub fn user_profile_key(user_id: &str) -> TableKey {
    TableKey::new(
        format!("{USER_PREFIX}{user_id}"),
        format!("{PROFILE_PREFIX}{user_id}"),
    )
}

pub fn payment_pk(payment_id: &str) -> String {
    format!("{PAYMENT_PREFIX}{payment_id}")
}

/// Payments are partitioned by payment and sorted by owning user.
pub fn payment_key(payment_id: &str, user_id: &str) -> TableKey {
    TableKey::new(payment_pk(payment_id), format!("{USER_PREFIX}{user_id}"))
}

pub fn payment_id_key(payment_id: &str) -> TableKey {
    TableKey::new(payment_pk(payment_id), PAYMENT_ID_SK)
}

pub fn partner_key(partner_id: &str) -> TableKey {
    TableKey::new(
        format!("{PARTNER_PREFIX}{partner_id}"),
        format!("{PROFILE_PREFIX}{partner_id}"),
    )
}

pub fn customer_key(customer_id: &str) -> TableKey {
    TableKey::new(
        format!("{CUSTOMER_PREFIX}{customer_id}"),
        format!("{PROFILE_PREFIX}{customer_id}"),
    )
}

pub fn referral_key(referral_id: &str) -> TableKey {
    TableKey::new(
        format!("{REFERRAL_PREFIX}{referral_id}"),
        format!("{METADATA_PREFIX}{referral_id}"),
    )
}

pub fn envelope_key(envelope_id: &str) -> TableKey {
    TableKey::new(
        format!("{ENVELOPE_PREFIX}{envelope_id}"),
        format!("{METADATA_PREFIX}{envelope_id}"),
    )
}

pub fn bonus_pool_key(pool_id: &str) -> TableKey {
    TableKey::new(
        format!("{BONUS_POOL_PREFIX}{pool_id}"),
        format!("{METADATA_PREFIX}{pool_id}"),
    )
}

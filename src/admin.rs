//! Operator actions on the store. Phone numbers are normalised the same way
//! the webhook does it, so CLI edits hit the same rows.

use sms_core::normalize_e164;
use sms_store::{ConsentChange, ConsentStatus, Store, Subscriber};
use sms_web_generic::clean_name;
use tracing::info;

use crate::error::{Error, Result};

pub struct Admin<'a> {
    store: &'a Store,
    actor: &'a str,
    country_code: &'a str,
}

impl<'a> Admin<'a> {
    pub fn new(store: &'a Store, actor: &'a str, country_code: &'a str) -> Self {
        Self {
            store,
            actor,
            country_code,
        }
    }

    fn phone(&self, raw: &str) -> Result<String> {
        normalize_e164(raw, self.country_code).ok_or_else(|| Error::InvalidPhone(raw.to_string()))
    }

    /// Add an opted-in subscriber by hand (paper sign-up sheet, phone call).
    pub fn add(&self, raw_phone: &str, name: Option<&str>) -> Result<Subscriber> {
        let phone = self.phone(raw_phone)?;
        let name = name.map(clean_name).unwrap_or_default();
        let added = self.store.add(&phone, &name, self.actor)?;
        info!(%phone, actor = self.actor, "subscriber added");
        Ok(added)
    }

    pub fn set_status(&self, raw_phone: &str, status: ConsentStatus) -> Result<ConsentChange> {
        let phone = self.phone(raw_phone)?;
        let change = self.store.record_consent(&phone, status, self.actor)?;
        info!(%phone, %status, changed = change.changed, actor = self.actor, "status set");
        Ok(change)
    }

    pub fn rename(&self, raw_phone: &str, name: &str) -> Result<Subscriber> {
        let phone = self.phone(raw_phone)?;
        Ok(self.store.set_name(&phone, &clean_name(name), self.actor)?)
    }
}

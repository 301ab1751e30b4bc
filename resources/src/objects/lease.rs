use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{Metadata, Object};

/// Leader-election record; the holder renews `renewTime` while alive and
/// others may take over once the lease duration elapses without renewal.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Lease {
    pub metadata: Metadata,
    pub spec: LeaseSpec,
}

impl Object for Lease {
    fn kind(&self) -> &'static str {
        "Lease"
    }

    fn plural() -> &'static str {
        "leases"
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_time: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub lease_transitions: u32,
}

impl Lease {
    pub fn held_by(&self, identity: &str) -> bool {
        self.spec.holder_identity.as_deref() == Some(identity)
    }

    pub fn expired(&self, now: NaiveDateTime) -> bool {
        let duration = self.spec.lease_duration_seconds.unwrap_or(0) as i64;
        match self.spec.renew_time {
            Some(renewed) => now - renewed > chrono::Duration::seconds(duration),
            None => true,
        }
    }
}

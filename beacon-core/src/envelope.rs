//! Wire envelopes for publishing detections.
//!
//! An envelope carries every detection that shares one gateway location.
//! Serialized as JSON with camelCase field names.

use serde::Serialize;

use crate::location::LocationFix;
use crate::window::DetectionRecord;

pub const GATEWAY_TYPE: &str = "mobile";

/// Identity the gateway publishes under. Opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub gateway_id: String,
    pub mqtt_access_token: String,
    pub owner_id: String,
}

impl Credentials {
    pub fn new(
        gateway_id: impl Into<String>,
        mqtt_access_token: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Credentials {
            gateway_id: gateway_id.into(),
            mqtt_access_token: mqtt_access_token.into(),
            owner_id: owner_id.into(),
        }
    }

    /// Publish topic: `data-prod/{owner}/{gateway}`.
    pub fn topic(&self) -> String {
        format!("data-prod/{}/{}", self.owner_id, self.gateway_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishItem {
    pub payload: String,
    pub sequence_id: u32,
    pub signal_level: i32,
    pub timestamp: u64,
    pub unacknowledged_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_id: Option<String>,
}

impl PublishItem {
    pub fn from_record(record: &DetectionRecord, sequence_id: u32) -> Self {
        PublishItem {
            payload: record.frame.raw_value.clone(),
            sequence_id,
            signal_level: record.frame.signal_level,
            timestamp: record.frame.received_at_ms,
            unacknowledged_count: record.unacknowledged_count(),
            bridge_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub items: Vec<PublishItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationFix>,
    pub gateway_id: String,
    pub gateway_name: String,
    pub gateway_type: &'static str,
    pub timestamp: u64,
}

impl Envelope {
    pub fn new(
        items: Vec<PublishItem>,
        location: Option<LocationFix>,
        credentials: &Credentials,
        timestamp: u64,
    ) -> Self {
        Envelope {
            items,
            location,
            gateway_id: credentials.gateway_id.clone(),
            gateway_name: credentials.gateway_id.clone(),
            gateway_type: GATEWAY_TYPE,
            timestamp,
        }
    }

    /// Empty envelope that only signals liveness. Unknown location reports `{0, 0}`.
    pub fn heartbeat(
        location: Option<LocationFix>,
        credentials: &Credentials,
        timestamp: u64,
    ) -> Self {
        Envelope::new(
            Vec::new(),
            Some(location.unwrap_or_else(LocationFix::origin)),
            credentials,
            timestamp,
        )
    }

    pub fn is_heartbeat(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Detections sharing one location, in batch order.
#[derive(Debug)]
pub struct LocationGroup<'a> {
    pub location: Option<LocationFix>,
    pub records: Vec<&'a DetectionRecord>,
}

/// Partition records by location. Unknown location is its own group; groups
/// appear in order of first occurrence.
pub fn group_by_location(records: &[DetectionRecord]) -> Vec<LocationGroup<'_>> {
    let mut groups: Vec<LocationGroup<'_>> = Vec::new();
    for record in records {
        let key = record.location.map(|l| l.grid_key());
        match groups
            .iter_mut()
            .find(|g| g.location.map(|l| l.grid_key()) == key)
        {
            Some(group) => group.records.push(record),
            None => groups.push(LocationGroup {
                location: record.location,
                records: vec![record],
            }),
        }
    }
    groups
}

impl LocationGroup<'_> {
    /// Build this group's envelope; every item carries `sequence_id`.
    pub fn to_envelope(
        &self,
        sequence_id: u32,
        credentials: &Credentials,
        timestamp: u64,
    ) -> Envelope {
        let items = self
            .records
            .iter()
            .map(|r| PublishItem::from_record(r, sequence_id))
            .collect();
        Envelope::new(items, self.location, credentials, timestamp)
    }

    pub fn mark_delivered(&self) {
        for record in &self.records {
            record.mark_delivered();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Process Instance Record
//!
//! One shared record per (process name, instance number). Every candidate
//! node reads it on each poll; only the node that believes itself active
//! writes the keep-alive fields.

use std::fmt;

use bson::serde_helpers::chrono_datetime_as_bson_datetime_optional;
use bson::{doc, Bson, Document};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Identifies one instance record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub process_name: String,
    pub instance_number: i32,
}

impl InstanceKey {
    pub fn new(process_name: impl Into<String>, instance_number: i32) -> Self {
        Self {
            process_name: process_name.into(),
            instance_number,
        }
    }

    /// Query filter matching this key. Numeric comparison in MongoDB matches
    /// records that stored the instance number as a double.
    pub fn filter(&self) -> Document {
        doc! {
            "processName": &self.process_name,
            "processInstanceNumber": self.instance_number,
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.process_name, self.instance_number)
    }
}

/// Shared redundancy record, stored in the `processInstances` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstance {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<bson::oid::ObjectId>,

    pub process_name: String,

    #[serde(with = "instance_number")]
    pub process_instance_number: i32,

    /// A missing flag counts as enabled; only an explicit `false` disables.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Empty means any node may become active
    #[serde(
        rename = "nodeNames",
        alias = "allowedNodeNames",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub allowed_node_names: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_node_name: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono_datetime_as_bson_datetime_optional"
    )]
    pub active_node_keep_alive_time_tag: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<Bson>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Document>,
}

fn default_enabled() -> bool {
    true
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ProcessInstance {
    /// Record created by the first node that finds none: claimed by that
    /// node, enabled, no node restriction.
    pub fn bootstrap(key: &InstanceKey, node_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            process_name: key.process_name.clone(),
            process_instance_number: key.instance_number,
            enabled: true,
            allowed_node_names: Vec::new(),
            active_node_name: Some(node_name.to_string()),
            active_node_keep_alive_time_tag: Some(now),
            software_version: None,
            log_level: Some(Bson::Double(1.0)),
            stats: None,
        }
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.process_name.clone(), self.process_instance_number)
    }

    /// Whether `node_name` may ever become active for this record.
    pub fn allows_node(&self, node_name: &str) -> bool {
        self.allowed_node_names.is_empty()
            || self.allowed_node_names.iter().any(|n| n == node_name)
    }

    pub fn is_claimed_by(&self, node_name: &str) -> bool {
        self.active_node_name.as_deref() == Some(node_name)
    }

    pub fn apply_keep_alive(&mut self, keep_alive: &KeepAlive) {
        self.active_node_name = Some(keep_alive.node_name.clone());
        self.active_node_keep_alive_time_tag = Some(keep_alive.time_tag);
        self.software_version = Some(keep_alive.software_version.clone());
    }
}

/// Lease renewal written by the active node on every poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAlive {
    pub node_name: String,
    pub time_tag: DateTime<Utc>,
    pub software_version: String,
}

/// Current time at the resolution the store keeps (BSON datetimes hold milliseconds).
///
/// Keep-alive staleness is judged by exact equality, so renewals closer
/// together than one millisecond are indistinguishable.
pub fn keep_alive_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Instance numbers are written as doubles, matching existing collections,
/// and read from any BSON numeric type.
mod instance_number {
    use bson::Bson;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &i32, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(f64::from(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i32, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Bson::deserialize(deserializer)? {
            Bson::Int32(v) => Ok(v),
            Bson::Int64(v) => i32::try_from(v).map_err(D::Error::custom),
            Bson::Double(v)
                if v.fract() == 0.0 && v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX) =>
            {
                Ok(v as i32)
            }
            other => Err(D::Error::custom(format!(
                "invalid processInstanceNumber: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_legacy_document() {
        let stamp = bson::DateTime::from_millis(1_700_000_000_123);
        let doc = doc! {
            "_id": bson::oid::ObjectId::new(),
            "processName": "CS_CUSTOM_PROCESSOR",
            "processInstanceNumber": 1.0,
            "enabled": true,
            "logLevel": 1.0,
            "nodeNames": ["scada-a", "scada-b"],
            "activeNodeName": "scada-a",
            "activeNodeKeepAliveTimeTag": stamp,
        };

        let record: ProcessInstance = bson::from_document(doc).unwrap();
        assert_eq!(record.process_instance_number, 1);
        assert_eq!(record.allowed_node_names, vec!["scada-a", "scada-b"]);
        assert!(record.is_claimed_by("scada-a"));
        assert_eq!(
            record.active_node_keep_alive_time_tag,
            Some(stamp.to_chrono())
        );
    }

    #[test]
    fn test_missing_optional_fields() {
        let doc = doc! {
            "processName": "P",
            "processInstanceNumber": 2_i32,
            "nodeNames": Bson::Null,
        };

        let record: ProcessInstance = bson::from_document(doc).unwrap();
        assert!(record.enabled);
        assert!(record.allowed_node_names.is_empty());
        assert!(record.active_node_name.is_none());
        assert!(record.active_node_keep_alive_time_tag.is_none());
    }

    #[test]
    fn test_allowed_node_names_alias() {
        let doc = doc! {
            "processName": "P",
            "processInstanceNumber": 3_i64,
            "allowedNodeNames": ["only-me"],
        };

        let record: ProcessInstance = bson::from_document(doc).unwrap();
        assert_eq!(record.process_instance_number, 3);
        assert!(record.allows_node("only-me"));
        assert!(!record.allows_node("someone-else"));
    }

    #[test]
    fn test_fractional_instance_number_rejected() {
        let doc = doc! { "processName": "P", "processInstanceNumber": 1.5 };
        assert!(bson::from_document::<ProcessInstance>(doc).is_err());
    }

    #[test]
    fn test_bootstrap_record_serializes_wire_names() {
        let key = InstanceKey::new("P", 4);
        let now = keep_alive_now();
        let record = ProcessInstance::bootstrap(&key, "node-1", now);
        let doc = bson::to_document(&record).unwrap();

        assert_eq!(doc.get_f64("processInstanceNumber").unwrap(), 4.0);
        assert!(doc.get_bool("enabled").unwrap());
        assert!(doc.get_array("nodeNames").unwrap().is_empty());
        assert_eq!(doc.get_str("activeNodeName").unwrap(), "node-1");
        assert_eq!(
            doc.get_datetime("activeNodeKeepAliveTimeTag").unwrap().to_chrono(),
            now
        );
        assert!(!doc.contains_key("_id"));
    }

    #[test]
    fn test_empty_allow_list_allows_everyone() {
        let record = ProcessInstance::bootstrap(&InstanceKey::new("P", 1), "a", keep_alive_now());
        assert!(record.allows_node("a"));
        assert!(record.allows_node("b"));
    }

    #[test]
    fn test_keep_alive_now_has_millisecond_resolution() {
        let now = keep_alive_now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}

// # Ledger File Format
//
// ```json
// {
//   "updater_name": {
//     "ipv4": ["203.0.113.7", true],
//     "ipv6": ["2001:db8:1:2::/64", false]
//   }
// }
// ```
//
// Each family value is `[address-or-null, is_current]`. A missing family
// key is the same as `[null, false]`, and a missing backend is the same as
// both families missing.
//
// Decoding never fails. Damage is contained to the smallest unit that can
// be discarded: a bad family value is dropped, a backend object with
// unexpected keys or the wrong JSON type is reset, and a file that is not
// JSON (or not a JSON object) is ignored entirely.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;

use serde_json::{Map, Value};

use super::{BackendRecord, LedgerEntry};
use crate::address::{AddressFamily, FamilyAddress, Ipv6Prefix};
use crate::error::{Error, Result};

/// Decode ledger file contents, discarding anything malformed
pub(crate) fn decode(text: &str, path: &Path) -> BTreeMap<String, BackendRecord> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                "Malformed JSON in ledger {} at ({}:{}). Will recreate.",
                path.display(),
                e.line(),
                e.column()
            );
            return BTreeMap::new();
        }
    };

    let Value::Object(backends) = value else {
        tracing::warn!(
            "Ledger {} has unexpected JSON structure. Will recreate.",
            path.display()
        );
        return BTreeMap::new();
    };

    backends
        .into_iter()
        .map(|(name, value)| {
            let record = decode_record(&name, &value, path);
            (name, record)
        })
        .collect()
}

fn decode_record(name: &str, value: &Value, path: &Path) -> BackendRecord {
    let Value::Object(families) = value else {
        tracing::warn!(
            "Ledger {} has unexpected JSON structure for key {}. Will recreate that key.",
            path.display(),
            name
        );
        return BackendRecord::default();
    };

    let ipv4_key = AddressFamily::Ipv4.key();
    let ipv6_key = AddressFamily::Ipv6.key();
    if let Some(key) = families.keys().find(|k| *k != ipv4_key && *k != ipv6_key) {
        tracing::warn!(
            "Ledger {} has unexpected key {} under {}. Will recreate that key.",
            path.display(),
            key,
            name
        );
        return BackendRecord::default();
    }

    BackendRecord {
        ipv4: families
            .get(ipv4_key)
            .and_then(|v| decode_entry::<Ipv4Addr>(name, v)),
        ipv6: families
            .get(ipv6_key)
            .and_then(|v| decode_entry::<Ipv6Prefix>(name, v)),
    }
}

fn decode_entry<A: FamilyAddress>(name: &str, value: &Value) -> Option<LedgerEntry<A>> {
    let family = A::FAMILY;

    let [address, current] = value.as_array().map(Vec::as_slice).unwrap_or_default() else {
        tracing::warn!("Malformed {} entry for {} in ledger. Ignoring.", family, name);
        return None;
    };

    let address = match address {
        Value::Null => None,
        Value::String(text) => match text.parse::<A>() {
            Ok(address) => Some(address),
            Err(_) => {
                tracing::warn!(
                    "Malformed {} address '{}' for {} in ledger. Ignoring.",
                    family,
                    text,
                    name
                );
                return None;
            }
        },
        _ => {
            tracing::warn!("Malformed {} entry for {} in ledger. Ignoring.", family, name);
            return None;
        }
    };

    let Value::Bool(current) = current else {
        tracing::warn!("Malformed {} entry for {} in ledger. Ignoring.", family, name);
        return None;
    };

    Some(LedgerEntry {
        address,
        current: *current,
    })
}

/// Encode ledger records as pretty-printed JSON with sorted keys
pub(crate) fn encode(records: &BTreeMap<String, BackendRecord>) -> Result<String> {
    let mut backends = Map::new();
    for (name, record) in records {
        let mut families = Map::new();
        if let Some(entry) = &record.ipv4 {
            families.insert(AddressFamily::Ipv4.key().to_string(), encode_entry(entry));
        }
        if let Some(entry) = &record.ipv6 {
            families.insert(AddressFamily::Ipv6.key().to_string(), encode_entry(entry));
        }
        backends.insert(name.clone(), Value::Object(families));
    }

    serde_json::to_string_pretty(&Value::Object(backends))
        .map_err(|e| Error::ledger(format!("Failed to serialize ledger: {}", e)))
}

fn encode_entry<A: FamilyAddress>(entry: &LedgerEntry<A>) -> Value {
    let address = entry
        .address
        .map_or(Value::Null, |a| Value::String(a.to_string()));
    Value::Array(vec![address, Value::Bool(entry.current)])
}

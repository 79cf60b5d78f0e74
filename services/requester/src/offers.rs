//! Offer callback normalisation and selection.
//!
//! The coordinator posts a mapping of slot key to offer descriptor. The
//! mapping is noisy: only object-typed entries are offers, everything else
//! is skipped. Valid offers are kept ordered by slot key.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::cluster::DEFAULT_KIND;

fn default_kind() -> String {
    DEFAULT_KIND.to_string()
}

/// A candidate placement proposed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Offer {
    /// Agent the placement is pinned to.
    #[serde(alias = "hostname")]
    pub agent: String,

    /// Base URL of the backend orchestrator holding the offer.
    #[serde(alias = "url")]
    pub endpoint: String,

    /// Backend kind tag.
    ///
    /// Offers without a `type` field are Marathon offers. An explicit tag is
    /// kept as given; an unregistered one fails when the adapter is built.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

/// Offer callback parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum OfferError {
    #[error("offer callback body must be a JSON object")]
    NotAnObject,

    #[error("offer callback carried no offers")]
    Empty,

    #[error("offer '{slot}' is invalid: {source}")]
    Invalid {
        slot: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Offers ordered by slot key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferSet {
    offers: BTreeMap<String, Offer>,
}

impl OfferSet {
    /// Normalise a callback body into an ordered offer set.
    pub fn from_json(body: serde_json::Value) -> Result<Self, OfferError> {
        let serde_json::Value::Object(entries) = body else {
            return Err(OfferError::NotAnObject);
        };

        let mut offers = BTreeMap::new();
        for (slot, value) in entries {
            if !value.is_object() {
                debug!(slot = %slot, "Skipping non-object offer entry");
                continue;
            }
            let offer = serde_json::from_value(value)
                .map_err(|source| OfferError::Invalid {
                    slot: slot.clone(),
                    source,
                })?;
            offers.insert(slot, offer);
        }

        if offers.is_empty() {
            return Err(OfferError::Empty);
        }

        Ok(Self { offers })
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// Offers in slot key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Offer)> {
        self.offers.iter().map(|(slot, offer)| (slot.as_str(), offer))
    }

    /// The offer under the greatest slot key.
    ///
    /// This is a fixed tie-break on the key, not a judgement of offer quality.
    pub fn select(&self) -> Option<(&str, &Offer)> {
        self.offers
            .last_key_value()
            .map(|(slot, offer)| (slot.as_str(), offer))
    }
}

impl FromIterator<(String, Offer)> for OfferSet {
    fn from_iter<I: IntoIterator<Item = (String, Offer)>>(iter: I) -> Self {
        Self {
            offers: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(agent: &str) -> serde_json::Value {
        serde_json::json!({ "agent": agent, "endpoint": format!("http://{agent}:8080") })
    }

    #[test]
    fn test_selects_greatest_slot_key() {
        let body = serde_json::json!({ "b": offer("o2"), "c": offer("o3"), "a": offer("o1") });
        let offers = OfferSet::from_json(body).unwrap();

        let (slot, selected) = offers.select().unwrap();
        assert_eq!(slot, "c");
        assert_eq!(selected.agent, "o3");
        assert_eq!(selected.kind, "marathon");
    }

    #[test]
    fn test_selection_independent_of_insertion_order() {
        let forward: OfferSet = [("a", "o1"), ("b", "o2"), ("c", "o3")]
            .into_iter()
            .map(|(k, a)| (k.to_string(), serde_json::from_value(offer(a)).unwrap()))
            .collect();
        let backward: OfferSet = [("c", "o3"), ("b", "o2"), ("a", "o1")]
            .into_iter()
            .map(|(k, a)| (k.to_string(), serde_json::from_value(offer(a)).unwrap()))
            .collect();

        assert_eq!(forward, backward);
        assert_eq!(forward.select().unwrap().1.agent, "o3");
    }

    #[test]
    fn test_slot_keys_compare_lexicographically() {
        let body = serde_json::json!({ "10": offer("ten"), "9": offer("nine") });
        let offers = OfferSet::from_json(body).unwrap();
        assert_eq!(offers.select().unwrap().1.agent, "nine");
    }

    #[test]
    fn test_non_object_entries_are_skipped() {
        let body = serde_json::json!({
            "a": offer("o1"),
            "z": "not an offer",
            "count": 2,
            "list": [1, 2],
            "nothing": null
        });
        let offers = OfferSet::from_json(body).unwrap();

        assert_eq!(offers.len(), 1);
        assert_eq!(offers.select().unwrap().0, "a");
    }

    #[test]
    fn test_legacy_field_names() {
        let body = serde_json::json!({
            "s1": { "hostname": "10.0.0.5", "url": "http://m:8080", "type": "marathon" }
        });
        let offers = OfferSet::from_json(body).unwrap();
        let (_, offer) = offers.select().unwrap();
        assert_eq!(offer.agent, "10.0.0.5");
        assert_eq!(offer.endpoint, "http://m:8080");
    }

    #[test]
    fn test_absent_kind_defaults_but_explicit_kind_is_kept() {
        let body = serde_json::json!({
            "a": { "agent": "o1", "endpoint": "http://m:8080" },
            "b": { "agent": "o2", "endpoint": "http://k:6443", "type": "kubernetes" }
        });
        let offers = OfferSet::from_json(body).unwrap();
        let kinds: Vec<&str> = offers.iter().map(|(_, o)| o.kind.as_str()).collect();
        assert_eq!(kinds, vec![DEFAULT_KIND, "kubernetes"]);

        let registry = crate::cluster::ClusterRegistry::new(reqwest::Client::new());
        let (_, selected) = offers.select().unwrap();
        assert!(registry.connect(&selected.kind, &selected.endpoint).is_err());
    }

    #[test]
    fn test_empty_and_malformed_bodies() {
        assert!(matches!(
            OfferSet::from_json(serde_json::json!([])),
            Err(OfferError::NotAnObject)
        ));
        assert!(matches!(
            OfferSet::from_json(serde_json::json!({ "x": 1 })),
            Err(OfferError::Empty)
        ));
        assert!(matches!(
            OfferSet::from_json(serde_json::json!({ "a": { "agent": "no-endpoint" } })),
            Err(OfferError::Invalid { slot, .. }) if slot == "a"
        ));
    }
}

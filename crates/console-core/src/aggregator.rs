//! Slot and key aggregation for the dashboard view.
//!
//! The slot list is fetched first and is load-bearing: if it fails, nothing
//! else is requested. Keys are then fetched for every slot at once and joined.
//! A slot whose key fetch fails shows up with no keys instead of failing the
//! whole view.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::{api::HsmApi, ConsoleResult, Key, Slot};

/// Keys of a single slot, in server order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotKeys {
    pub slot: Slot,
    pub keys: Vec<Key>,
}

/// Mapping from slot display index to that slot's keys.
///
/// Slots keep the order of the slot listing. Every listed slot has an entry,
/// even when its keys could not be fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotKeyMap {
    entries: Vec<SlotKeys>,
}

impl SlotKeyMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys for the slot with the given display index.
    pub fn keys_for(&self, slot_index: u32) -> Option<&[Key]> {
        self.entries
            .iter()
            .find(|entry| entry.slot.slot_index == slot_index)
            .map(|entry| entry.keys.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotKeys> {
        self.entries.iter()
    }

    pub fn total_keys(&self) -> usize {
        self.entries.iter().map(|entry| entry.keys.len()).sum()
    }
}

impl IntoIterator for SlotKeyMap {
    type Item = SlotKeys;
    type IntoIter = std::vec::IntoIter<SlotKeys>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Stateless fan-out/fan-in over the slot and key listings.
#[derive(Clone)]
pub struct SlotKeyAggregator {
    api: Arc<dyn HsmApi>,
}

impl SlotKeyAggregator {
    pub fn new(api: Arc<dyn HsmApi>) -> Self {
        Self { api }
    }

    /// Current slot listing, for the slot table view.
    pub async fn list_slots(&self) -> ConsoleResult<Vec<Slot>> {
        self.api.list_slots().await
    }

    pub async fn aggregate(&self) -> ConsoleResult<SlotKeyMap> {
        let slots = self.api.list_slots().await?;
        debug!(slots = slots.len(), "fetching keys for every slot");

        let fetches = slots.iter().map(|slot| self.keys_or_empty(slot));
        let key_lists = join_all(fetches).await;

        let entries = slots
            .into_iter()
            .zip(key_lists)
            .map(|(slot, keys)| {
                let keys = keys.into_iter().map(|key| key.in_slot(&slot)).collect();
                SlotKeys { slot, keys }
            })
            .collect();
        Ok(SlotKeyMap { entries })
    }

    async fn keys_or_empty(&self, slot: &Slot) -> Vec<Key> {
        match self.api.list_keys(slot.slot_decimal).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(
                    slot_index = slot.slot_index,
                    slot_hex = %slot.slot_hex,
                    error = %err,
                    "key listing failed; showing slot without keys"
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        api::{LoginRequest, LoginResponse},
        ConsoleError, SignRequest, VerifyRequest,
    };

    /// In-memory service double recording every call it receives.
    #[derive(Default)]
    pub(crate) struct StubApi {
        pub slots: Option<Vec<Slot>>,
        pub keys: HashMap<u64, Vec<Key>>,
        pub failing_slots: HashSet<u64>,
        pub delays: HashMap<u64, Duration>,
        pub sign_result: Option<ConsoleResult<String>>,
        pub verify_result: Option<ConsoleResult<bool>>,
        pub login_result: Option<ConsoleResult<LoginResponse>>,
        pub calls: Mutex<Vec<String>>,
        pub key_requests: Mutex<Vec<u64>>,
    }

    impl StubApi {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl HsmApi for StubApi {
        async fn list_slots(&self) -> ConsoleResult<Vec<Slot>> {
            self.record("list_slots");
            self.slots
                .clone()
                .ok_or_else(|| ConsoleError::Transport("connection refused".into()))
        }

        async fn list_keys(&self, slot_decimal: u64) -> ConsoleResult<Vec<Key>> {
            self.key_requests.lock().unwrap().push(slot_decimal);
            self.record(format!("list_keys:{slot_decimal}"));
            if let Some(delay) = self.delays.get(&slot_decimal) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing_slots.contains(&slot_decimal) {
                return Err(ConsoleError::operation(500, "token not present"));
            }
            Ok(self.keys.get(&slot_decimal).cloned().unwrap_or_default())
        }

        async fn sign(&self, key_label: &str, request: &SignRequest) -> ConsoleResult<String> {
            self.record(format!("sign:{key_label}:{}", request.sign_algo));
            self.sign_result
                .clone()
                .unwrap_or_else(|| Ok("c2lnbmF0dXJl".to_string()))
        }

        async fn verify(&self, key_label: &str, request: &VerifyRequest) -> ConsoleResult<bool> {
            self.record(format!("verify:{key_label}:{}", request.verify_algo));
            self.verify_result.clone().unwrap_or(Ok(true))
        }

        async fn login(&self, request: &LoginRequest) -> ConsoleResult<LoginResponse> {
            self.record(format!(
                "login:{}:{}",
                request.username,
                if request.mutual_tls.is_some() { "mtls" } else { "plain" }
            ));
            self.login_result.clone().unwrap_or(Ok(LoginResponse::default()))
        }
    }

    pub(crate) fn slot(index: u32, decimal: u64) -> Slot {
        Slot {
            slot_index: index,
            slot_hex: format!("0x{decimal:x}"),
            slot_decimal: decimal,
            label: format!("token-{index}"),
            manufacturer: "SoftHSM project".into(),
            model: "SoftHSM v2".into(),
            flags: "token present".into(),
            hw_version: "2.6".into(),
            fw_version: "2.6".into(),
            serial: format!("{decimal:016x}"),
            pin_min_max: "4/255".into(),
            initialized: true,
        }
    }

    pub(crate) fn key(id: &str, label: &str, usage: &str) -> Key {
        Key {
            id: id.into(),
            label: label.into(),
            key_type: "privkey".into(),
            usage: usage.into(),
            access: "sensitive, always sensitive".into(),
            ..Key::default()
        }
    }

    #[tokio::test]
    async fn one_entry_per_slot_even_when_fetches_fail() {
        let api = Arc::new(StubApi {
            slots: Some(vec![slot(0, 0x11), slot(1, 0x22), slot(2, 0x33)]),
            keys: HashMap::from([
                (0x11, vec![key("01", "a", "sign"), key("02", "b", "verify")]),
                (0x33, vec![key("03", "c", "sign")]),
            ]),
            failing_slots: HashSet::from([0x22]),
            ..StubApi::default()
        });
        let map = SlotKeyAggregator::new(api.clone()).aggregate().await.unwrap();

        let mut requested = api.key_requests.lock().unwrap().clone();
        requested.sort();
        assert_eq!(requested, vec![0x11, 0x22, 0x33]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.keys_for(1), Some(&[][..]));
        assert_eq!(map.total_keys(), 3);
    }

    #[tokio::test]
    async fn every_fetch_failing_still_yields_all_slots() {
        let slots: Vec<Slot> = (0..5).map(|i| slot(i, 100 + u64::from(i))).collect();
        let api = Arc::new(StubApi {
            failing_slots: slots.iter().map(|s| s.slot_decimal).collect(),
            slots: Some(slots),
            ..StubApi::default()
        });
        let map = SlotKeyAggregator::new(api.clone()).aggregate().await.unwrap();
        assert_eq!(api.key_requests.lock().unwrap().len(), 5);
        assert_eq!(map.len(), 5);
        assert!(map.iter().all(|entry| entry.keys.is_empty()));
    }

    #[tokio::test]
    async fn slot_list_failure_aborts_before_key_fetches() {
        let api = Arc::new(StubApi::default());
        let err = SlotKeyAggregator::new(api.clone())
            .aggregate()
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Transport(_)));
        assert_eq!(api.calls(), vec!["list_slots"]);
    }

    #[tokio::test]
    async fn zero_slots_is_an_empty_map_not_an_error() {
        let api = Arc::new(StubApi {
            slots: Some(Vec::new()),
            ..StubApi::default()
        });
        let map = SlotKeyAggregator::new(api).aggregate().await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn order_is_preserved_and_keys_are_decorated() {
        let api = Arc::new(StubApi {
            slots: Some(vec![slot(4, 0x40), slot(2, 0x20)]),
            keys: HashMap::from([
                (0x40, vec![key("09", "z", "sign"), key("01", "a", "sign")]),
                (0x20, vec![key("05", "m", "verify")]),
            ]),
            // the first slot finishes last
            delays: HashMap::from([(0x40, Duration::from_millis(30))]),
            ..StubApi::default()
        });
        let map = SlotKeyAggregator::new(api).aggregate().await.unwrap();

        let order: Vec<u32> = map.iter().map(|entry| entry.slot.slot_index).collect();
        assert_eq!(order, vec![4, 2]);

        let labels: Vec<&str> = map.keys_for(4).unwrap().iter().map(|k| k.label.as_str()).collect();
        assert_eq!(labels, vec!["z", "a"]);

        let decorated = &map.keys_for(2).unwrap()[0];
        assert_eq!(decorated.slot_index, Some(2));
        assert_eq!(decorated.slot_hex.as_deref(), Some("0x20"));
    }
}

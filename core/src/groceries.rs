//! Grocery list mirrored to `/groceries.json`
//!
//! Stored as a JSON array of strings. Older documents were objects keyed by
//! push id; those still load, in key order.

use alloc::string::String;
use core::fmt::Write;

use embedded_hal_async::delay::DelayNs;
use hal_abstractions::{Clock, HttpTransport};
use serde_json::Value;

use crate::queue::{Operation, OperationQueue};
use crate::store::{RemoteStoreClient, StoreError};

pub const MAX_GROCERIES: usize = 50;

pub const GROCERIES_PATH: &str = "/groceries.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GroceryError {
    /// Blank after trimming
    Empty,
    Full,
    NotFound,
}

impl core::fmt::Display for GroceryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "Item is empty"),
            Self::Full => write!(f, "Grocery list full"),
            Self::NotFound => write!(f, "Item not found"),
        }
    }
}

impl core::error::Error for GroceryError {}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GroceryList {
    items: heapless::Vec<String, MAX_GROCERIES>,
}

impl GroceryList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the trimmed item; returns its index
    pub fn add(&mut self, item: &str) -> Result<usize, GroceryError> {
        let item = item.trim();
        if item.is_empty() {
            return Err(GroceryError::Empty);
        }
        self.items
            .push(String::from(item))
            .map_err(|_| GroceryError::Full)?;
        info!("Grocery item added: {}", item);
        Ok(self.items.len() - 1)
    }

    pub fn remove(&mut self, index: usize) -> Result<String, GroceryError> {
        if index >= self.items.len() {
            return Err(GroceryError::NotFound);
        }
        Ok(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self.items.as_slice())
    }

    /// Replace the list with `json` (array, legacy object, or null)
    pub fn from_json(&mut self, json: &str) -> Result<usize, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;
        self.apply_remote(value)
    }

    /// Replace the list with an already decoded document. Non-string and
    /// blank entries are skipped; anything past capacity is dropped.
    pub fn apply_remote(&mut self, value: Value) -> Result<usize, serde_json::Error> {
        let entries: alloc::vec::Vec<Value> = match value {
            Value::Null => alloc::vec::Vec::new(),
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            _ => {
                return Err(<serde_json::Error as serde::de::Error>::custom(
                    "expected an array or object of strings",
                ))
            }
        };

        self.items.clear();
        for entry in entries {
            let Value::String(item) = entry else {
                continue;
            };
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            if self.items.push(String::from(item)).is_err() {
                warn!("Grocery list full, ignoring remaining items");
                break;
            }
        }
        Ok(self.items.len())
    }

    /// Enqueue a PUT of the current list
    pub fn save(&self, queue: &mut OperationQueue, now_ms: u64) -> bool {
        match self.to_json() {
            Ok(json) => queue.enqueue(Operation::put(GROCERIES_PATH, json), now_ms),
            Err(_) => {
                error!("Failed to serialize grocery list");
                false
            }
        }
    }

    /// GET the stored document as raw JSON (`Null` when absent)
    pub async fn fetch<T, C, D>(client: &mut RemoteStoreClient<T, C, D>) -> Result<Value, StoreError>
    where
        T: HttpTransport,
        C: Clock,
        D: DelayNs,
    {
        Ok(client
            .load_json::<Value>(GROCERIES_PATH)
            .await?
            .unwrap_or(Value::Null))
    }

    pub async fn load<T, C, D>(
        &mut self,
        client: &mut RemoteStoreClient<T, C, D>,
    ) -> Result<usize, StoreError>
    where
        T: HttpTransport,
        C: Clock,
        D: DelayNs,
    {
        let value = Self::fetch(client).await?;
        let count = self.apply_remote(value).map_err(|_| {
            error!("Unexpected grocery document shape");
            StoreError::Parse
        })?;
        info!("Loaded {} grocery items", count);
        Ok(count)
    }

    /// Receipt text for the printer
    pub fn print_text(&self) -> String {
        let mut text = String::from("*** GROCERY LIST ***\n");
        for item in &self.items {
            let _ = writeln!(text, "[ ] {}", item);
        }
        let _ = writeln!(text, "{} items", self.items.len());
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::OperationKind;
    use crate::testing::{mock_client, test_config};
    use embassy_futures::block_on;

    #[test]
    fn test_add_trims_and_rejects_blank() {
        let mut list = GroceryList::new();
        assert_eq!(list.add("  milk "), Ok(0));
        assert_eq!(list.add("   "), Err(GroceryError::Empty));
        assert_eq!(list.items(), &[String::from("milk")]);
    }

    #[test]
    fn test_capacity() {
        let mut list = GroceryList::new();
        for n in 0..MAX_GROCERIES {
            list.add(&alloc::format!("item {}", n)).unwrap();
        }
        assert_eq!(list.add("one more"), Err(GroceryError::Full));
        assert_eq!(list.len(), MAX_GROCERIES);
    }

    #[test]
    fn test_remove_by_index() {
        let mut list = GroceryList::new();
        list.add("a").unwrap();
        list.add("b").unwrap();
        list.add("c").unwrap();

        assert_eq!(list.remove(1), Ok(String::from("b")));
        assert_eq!(list.remove(5), Err(GroceryError::NotFound));
        assert_eq!(list.items(), &[String::from("a"), String::from("c")]);
    }

    #[test]
    fn test_json_array_round_trip() {
        let mut list = GroceryList::new();
        list.add("eggs").unwrap();
        list.add("bread").unwrap();
        let json = list.to_json().unwrap();
        assert_eq!(json, r#"["eggs","bread"]"#);

        let mut copy = GroceryList::new();
        assert_eq!(copy.from_json(&json).unwrap(), 2);
        assert_eq!(copy, list);
    }

    #[test]
    fn test_legacy_object_format() {
        let mut list = GroceryList::new();
        let count = list
            .from_json(r#"{"-b": "apples", "-a": " pears ", "-c": 7, "-d": ""}"#)
            .unwrap();
        assert_eq!(count, 2);
        // object keys load in key order
        assert_eq!(list.items(), &[String::from("pears"), String::from("apples")]);
    }

    #[test]
    fn test_null_and_bad_shapes() {
        let mut list = GroceryList::new();
        list.add("x").unwrap();
        assert_eq!(list.from_json("null").unwrap(), 0);
        assert!(list.is_empty());
        assert!(list.from_json("42").is_err());
        assert!(list.from_json("[").is_err());
    }

    #[test]
    fn test_oversized_document_is_truncated() {
        let items: alloc::vec::Vec<String> =
            (0..MAX_GROCERIES + 5).map(|n| alloc::format!("i{}", n)).collect();
        let json = serde_json::to_string(&items).unwrap();
        let mut list = GroceryList::new();
        assert_eq!(list.from_json(&json).unwrap(), MAX_GROCERIES);
    }

    #[test]
    fn test_save_enqueues_put() {
        let mut list = GroceryList::new();
        list.add("tea").unwrap();
        let mut queue = OperationQueue::new();
        assert!(list.save(&mut queue, 7));

        let op = &queue.iter().next().unwrap().operation;
        assert_eq!(op.kind, OperationKind::Put);
        assert_eq!(op.path, GROCERIES_PATH);
        assert_eq!(op.payload, r#"["tea"]"#);
    }

    #[test]
    fn test_load_from_store() {
        let (mut client, _clock, _delay) = mock_client(test_config());
        client
            .transport_mut()
            .respond(200, r#"["rice","beans"]"#)
            .respond(200, r#""just a string""#);
        let mut list = GroceryList::new();

        assert_eq!(block_on(list.load(&mut client)), Ok(2));
        assert_eq!(list.len(), 2);
        assert_eq!(block_on(list.load(&mut client)), Err(StoreError::Parse));
    }

    #[test]
    fn test_print_text() {
        let mut list = GroceryList::new();
        list.add("milk").unwrap();
        list.add("eggs").unwrap();
        assert_eq!(
            list.print_text(),
            "*** GROCERY LIST ***\n[ ] milk\n[ ] eggs\n2 items\n"
        );
    }
}

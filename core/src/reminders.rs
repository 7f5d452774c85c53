//! Reminder scheduler
//!
//! Reminders live in a dense fixed-capacity array. Deletion is a soft delete
//! (`active = false`) followed by an order-preserving compaction, so indices
//! never point at holes for longer than one call.
//!
//! Firing is polled: [`ReminderScheduler::check_due`] fires every active,
//! unprinted reminder whose scheduled time lies in
//! `[scheduled_at, scheduled_at + DUE_WINDOW_SECS]` and expires everything
//! older. A reminder whose window passes between two polls is expired without
//! firing; the caller has to poll more often than once per window.
//!
//! Every mutation is mirrored to the store by enqueuing a PUT of the whole
//! document (see [`ReminderScheduler::save`]). Ids deleted or expired locally
//! are remembered until a PUT that no longer carries them has gone through
//! (see [`ReminderScheduler::confirm_saved`]), so a stale remote copy cannot
//! bring them back. A local `printed` flag always wins over the remote copy.
//!
//! Nothing may be saved before the stored document has been read once
//! ([`ReminderScheduler::is_loaded`]): the PUT replaces the whole document.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use embedded_hal_async::delay::DelayNs;
use hal_abstractions::{Clock, HttpTransport};
use rand_core::RngCore;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::calendar::format_timestamp;
use crate::queue::{Operation, OperationQueue};
use crate::store::{RemoteStoreClient, StoreError};

pub const MAX_REMINDERS: usize = 50;

/// Seconds after `scheduled_at` during which a reminder may still fire
pub const DUE_WINDOW_SECS: u64 = 60;

pub const REMINDERS_PATH: &str = "/reminders.json";

pub const MAX_ID_LEN: usize = 32;

/// Every id the store can know about was once one of our slots
const TOMBSTONE_CAPACITY: usize = MAX_REMINDERS;

/// Random draws tried before falling back to a suffix scan
const ID_ATTEMPTS: usize = 8;

pub type ReminderId = heapless::String<MAX_ID_LEN>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub id: ReminderId,
    pub message: String,
    /// Unix seconds
    pub scheduled_at: u64,
    /// Unix seconds
    pub created_at: u64,
    pub printed: bool,
    pub active: bool,
}

impl Reminder {
    /// Inside the firing window and not yet fired
    pub fn is_due(&self, now: u64) -> bool {
        self.active
            && !self.printed
            && now >= self.scheduled_at
            && now <= self.scheduled_at.saturating_add(DUE_WINDOW_SECS)
    }

    /// Past the firing window
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.scheduled_at.saturating_add(DUE_WINDOW_SECS)
    }

    /// Text for the receipt printer
    pub fn receipt_text(&self) -> String {
        let mut text = String::new();
        let _ = write!(
            text,
            "*** REMINDER ***\n{}\n{}\n",
            self.message,
            format_timestamp(self.scheduled_at)
        );
        text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReminderError {
    /// All slots hold active reminders
    CapacityExceeded,
    /// Scheduled time is not in the future
    InPast,
}

impl core::fmt::Display for ReminderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CapacityExceeded => write!(f, "Reminder store full"),
            Self::InPast => write!(f, "Scheduled time must be in the future"),
        }
    }
}

impl core::error::Error for ReminderError {}

/// What one [`ReminderScheduler::check_due`] pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DueSweep {
    pub expired: usize,
    pub fired: usize,
}

impl DueSweep {
    /// Whether the stored document needs rewriting
    pub fn changed(&self) -> bool {
        self.expired > 0 || self.fired > 0
    }
}

/// One value of the `/reminders.json` map
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReminderRecord {
    message: String,
    scheduled_time: u64,
    #[serde(default)]
    created_time: Option<u64>,
    #[serde(default)]
    printed: bool,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReminderRecordRef<'a> {
    message: &'a str,
    scheduled_time: u64,
    created_time: u64,
    printed: bool,
    active: bool,
}

/// Serializes active reminders as an id-keyed map in insertion order
struct Document<'a>(&'a [Reminder]);

impl Serialize for Document<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let active = self.0.iter().filter(|r| r.active);
        let mut map = serializer.serialize_map(Some(active.clone().count()))?;
        for reminder in active {
            map.serialize_entry(
                reminder.id.as_str(),
                &ReminderRecordRef {
                    message: &reminder.message,
                    scheduled_time: reminder.scheduled_at,
                    created_time: reminder.created_at,
                    printed: reminder.printed,
                    active: reminder.active,
                },
            )?;
        }
        map.end()
    }
}

/// Decoded `/reminders.json`, entries in document order
#[derive(Debug, Default)]
pub struct RemoteReminders(Vec<(String, ReminderRecord)>);

impl RemoteReminders {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for RemoteReminders {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RemoteReminders;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of reminder id to reminder")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(RemoteReminders::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, ReminderRecord>()? {
                    entries.push(entry);
                }
                Ok(RemoteReminders(entries))
            }
        }

        deserializer.deserialize_any(EntriesVisitor)
    }
}

/// Fixed-capacity reminder store with due-window polling
#[derive(Debug, Default)]
pub struct ReminderScheduler {
    reminders: heapless::Vec<Reminder, MAX_REMINDERS>,
    tombstones: heapless::Deque<ReminderId, TOMBSTONE_CAPACITY>,
    loaded: bool,
}

impl ReminderScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `message` at `scheduled_at` (Unix seconds).
    ///
    /// Rejected when `scheduled_at <= now` or when every slot is taken by an
    /// active reminder.
    pub fn add<R: RngCore>(
        &mut self,
        message: &str,
        scheduled_at: u64,
        now: u64,
        rng: &mut R,
    ) -> Result<ReminderId, ReminderError> {
        if scheduled_at <= now {
            warn!("Reminder rejected: {} is not after {}", scheduled_at, now);
            return Err(ReminderError::InPast);
        }
        if self.reminders.is_full() {
            self.compact();
        }
        if self.reminders.is_full() {
            warn!("Reminder rejected: store full ({})", MAX_REMINDERS);
            return Err(ReminderError::CapacityExceeded);
        }

        let id = self.generate_id(now, rng);
        self.reminders
            .push(Reminder {
                id: id.clone(),
                message: String::from(message),
                scheduled_at,
                created_at: now,
                printed: false,
                active: true,
            })
            .map_err(|_| ReminderError::CapacityExceeded)?;

        info!("Reminder {} scheduled for {}", id.as_str(), scheduled_at);
        Ok(id)
    }

    /// Soft-delete and compact. Returns `false` for unknown ids.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(reminder) = self
            .reminders
            .iter_mut()
            .find(|r| r.active && r.id.as_str() == id)
        else {
            return false;
        };
        reminder.active = false;
        let id = reminder.id.clone();
        info!("Reminder {} deleted", id.as_str());
        self.tombstone(id);
        self.compact();
        true
    }

    /// Idempotent: `true` whenever an active reminder with `id` exists
    pub fn mark_printed(&mut self, id: &str) -> bool {
        match self
            .reminders
            .iter_mut()
            .find(|r| r.active && r.id.as_str() == id)
        {
            Some(reminder) => {
                reminder.printed = true;
                true
            }
            None => false,
        }
    }

    /// Expire reminders past their window, then fire the ones inside it.
    ///
    /// `on_due` runs once per fired reminder, before it is marked printed.
    pub fn check_due<F: FnMut(&Reminder)>(&mut self, now: u64, mut on_due: F) -> DueSweep {
        let mut sweep = DueSweep::default();

        let mut expired_ids: heapless::Vec<ReminderId, MAX_REMINDERS> = heapless::Vec::new();
        for reminder in self.reminders.iter_mut() {
            if reminder.active && reminder.is_expired(now) {
                reminder.active = false;
                if !reminder.printed {
                    warn!("Reminder {} missed its window", reminder.id.as_str());
                }
                let _ = expired_ids.push(reminder.id.clone());
            }
        }
        sweep.expired = expired_ids.len();
        for id in expired_ids {
            self.tombstone(id);
        }
        if sweep.expired > 0 {
            self.compact();
        }

        for reminder in self.reminders.iter_mut() {
            if reminder.is_due(now) {
                info!("Reminder {} due", reminder.id.as_str());
                on_due(reminder);
                reminder.printed = true;
                sweep.fired += 1;
            }
        }

        sweep
    }

    /// Drop soft-deleted slots, keeping order. Returns how many were removed.
    pub fn compact(&mut self) -> usize {
        let before = self.reminders.len();
        self.reminders.retain(|r| r.active);
        before - self.reminders.len()
    }

    pub fn get(&self, id: &str) -> Option<&Reminder> {
        self.reminders.iter().find(|r| r.id.as_str() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reminder> {
        self.reminders.iter()
    }

    /// Active reminders still in the future
    pub fn upcoming(&self, now: u64) -> impl Iterator<Item = &Reminder> {
        self.reminders
            .iter()
            .filter(move |r| r.active && r.scheduled_at > now)
    }

    pub fn len(&self) -> usize {
        self.reminders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reminders.is_empty()
    }

    pub fn capacity(&self) -> usize {
        MAX_REMINDERS
    }

    /// Whether the stored document has been read since boot
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// `{"<id>": {"message", "scheduledTime", "createdTime", "printed", "active"}}`
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Document(&self.reminders))
    }

    /// Replace the whole set with the document in `json`.
    ///
    /// Missing `createdTime` defaults to `now`, missing `printed` to false and
    /// missing `active` to true. Inactive entries and ids longer than
    /// [`MAX_ID_LEN`] are skipped.
    pub fn from_json(&mut self, json: &str, now: u64) -> Result<usize, serde_json::Error> {
        let remote: RemoteReminders = serde_json::from_str(json)?;
        Ok(self.replace_with(remote, now, false))
    }

    /// Like [`from_json`](Self::from_json) but keeps local deletions,
    /// expiries and `printed` flags that the remote copy may not have seen.
    pub fn merge_remote(&mut self, json: &str, now: u64) -> Result<usize, serde_json::Error> {
        let remote: RemoteReminders = serde_json::from_str(json)?;
        Ok(self.apply_remote(remote, now))
    }

    /// Merge an already fetched document (see [`fetch`](Self::fetch))
    pub fn apply_remote(&mut self, remote: RemoteReminders, now: u64) -> usize {
        self.replace_with(remote, now, true)
    }

    /// Enqueue a PUT of the current document. Refused until
    /// [`is_loaded`](Self::is_loaded).
    pub fn save(&self, queue: &mut OperationQueue, now_ms: u64) -> bool {
        if !self.loaded {
            warn!("Reminders not loaded, save skipped");
            return false;
        }
        match self.to_json() {
            Ok(json) => queue.enqueue(Operation::put(REMINDERS_PATH, json), now_ms),
            Err(_) => {
                error!("Failed to serialize reminders");
                false
            }
        }
    }

    /// A PUT of `document` reached the store: forget tombstones for ids it
    /// no longer carries. Returns how many were dropped.
    pub fn confirm_saved(&mut self, document: &str) -> usize {
        let Ok(stored) = serde_json::from_str::<RemoteReminders>(document) else {
            return 0;
        };
        let before = self.tombstones.len();
        let mut kept = heapless::Deque::new();
        while let Some(id) = self.tombstones.pop_front() {
            if stored.0.iter().any(|(key, _)| key.as_str() == id.as_str()) {
                let _ = kept.push_back(id);
            }
        }
        self.tombstones = kept;
        before - self.tombstones.len()
    }

    /// GET the stored document; `None` when it does not exist yet
    pub async fn fetch<T, C, D>(
        client: &mut RemoteStoreClient<T, C, D>,
    ) -> Result<RemoteReminders, StoreError>
    where
        T: HttpTransport,
        C: Clock,
        D: DelayNs,
    {
        Ok(client
            .load_json::<RemoteReminders>(REMINDERS_PATH)
            .await?
            .unwrap_or_default())
    }

    /// Fetch and merge in one go
    pub async fn load<T, C, D>(
        &mut self,
        client: &mut RemoteStoreClient<T, C, D>,
        now: u64,
    ) -> Result<usize, StoreError>
    where
        T: HttpTransport,
        C: Clock,
        D: DelayNs,
    {
        let remote = Self::fetch(client).await?;
        let count = self.apply_remote(remote, now);
        info!("Loaded {} reminders", count);
        Ok(count)
    }

    fn replace_with(&mut self, remote: RemoteReminders, now: u64, merge: bool) -> usize {
        let previous = core::mem::take(&mut self.reminders);
        self.loaded = true;

        for (key, record) in remote.0 {
            if !record.active {
                continue;
            }
            let Some(id) = make_id(&key) else {
                warn!("Skipping reminder with oversized id {}", key.as_str());
                continue;
            };
            if merge && self.tombstones.iter().any(|t| *t == id) {
                continue;
            }
            if self.reminders.iter().any(|r| r.id == id) {
                continue;
            }

            let printed_locally = merge && previous.iter().any(|r| r.id == id && r.printed);
            let reminder = Reminder {
                id,
                message: record.message,
                scheduled_at: record.scheduled_time,
                created_at: record.created_time.unwrap_or(now),
                printed: record.printed || printed_locally,
                active: true,
            };
            if self.reminders.push(reminder).is_err() {
                warn!("Reminder store full, ignoring remaining entries");
                break;
            }
        }

        self.reminders.len()
    }

    fn tombstone(&mut self, id: ReminderId) {
        if self.tombstones.is_full() {
            self.tombstones.pop_front();
        }
        let _ = self.tombstones.push_back(id);
    }

    fn is_taken(&self, id: &ReminderId) -> bool {
        self.reminders.iter().any(|r| r.id == *id) || self.tombstones.iter().any(|t| t == id)
    }

    fn generate_id<R: RngCore>(&self, now: u64, rng: &mut R) -> ReminderId {
        for _ in 0..ID_ATTEMPTS {
            let id = compose_id(now, 1000 + rng.next_u32() % 9000);
            if !self.is_taken(&id) {
                return id;
            }
        }
        // 9000 suffixes against at most 66 taken ids
        (1000..10_000)
            .map(|suffix| compose_id(now, suffix))
            .find(|id| !self.is_taken(id))
            .unwrap_or_else(|| compose_id(now, 0))
    }
}

fn compose_id(now: u64, suffix: u32) -> ReminderId {
    let mut id = ReminderId::new();
    // at most 20 + 4 digits
    let _ = write!(id, "{}{}", now, suffix);
    id
}

fn make_id(key: &str) -> Option<ReminderId> {
    let mut id = ReminderId::new();
    id.push_str(key).ok()?;
    Some(id)
}

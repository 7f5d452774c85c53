//! Remote command poller
//!
//! The companion app drops commands under `/commands.json` as
//! `{"<id>": {"type": "...", "data": ..., "processed": false}}`. The poller
//! turns each one into a queued operation and deletes it with
//! `DELETE /commands/<id>.json`.
//!
//! A command is only acknowledged once its action made it into the queue, so
//! a full queue defers it to the next poll. Recently acknowledged ids are
//! remembered, which keeps a failed DELETE from running the command twice.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use embedded_hal_async::delay::DelayNs;
use hal_abstractions::{Clock, HttpTransport};
use serde::Deserialize;
use serde_json::Value;

use crate::queue::{Operation, OperationKind, OperationQueue};
use crate::store::{RemoteStoreClient, StoreError};

pub const COMMANDS_PATH: &str = "/commands.json";

const RECENT_CAPACITY: usize = 16;

pub type CommandId = heapless::String<32>;

pub const TEST_PRINT_TEXT: &str = "*** TEST PRINT ***\nPrinter OK\n";

/// One entry of `/commands.json`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteCommand {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub processed: bool,
}

impl RemoteCommand {
    /// `data` as text: strings verbatim, other JSON re-encoded, null empty
    pub fn data_text(&self) -> String {
        match &self.data {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// What a command asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    Enqueue(Operation),
    /// Push a fresh status snapshot
    PublishStatus,
    /// Unknown type; acknowledged and dropped
    Ignore,
}

pub fn interpret(command: &RemoteCommand) -> CommandAction {
    match command.kind.as_str() {
        "dispense_start" | "water_start" => {
            CommandAction::Enqueue(Operation::device(OperationKind::DispenseStart))
        }
        "dispense_stop" | "water_stop" => {
            CommandAction::Enqueue(Operation::device(OperationKind::DispenseStop))
        }
        "weather" => CommandAction::Enqueue(Operation::device(OperationKind::FetchWeather)),
        "print" => CommandAction::Enqueue(Operation::print(command.data_text())),
        "test_print" => CommandAction::Enqueue(Operation::print(TEST_PRINT_TEXT)),
        "status" | "gpio_status" => CommandAction::PublishStatus,
        other => {
            warn!("Unknown command type: {}", other);
            CommandAction::Ignore
        }
    }
}

/// Pending commands by id (push ids sort chronologically)
pub type PendingCommands = BTreeMap<String, RemoteCommand>;

/// Result of admitting one batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Ids to delete from the store
    pub acknowledged: Vec<String>,
    /// Commands left for the next poll because the queue was full
    pub deferred: usize,
    /// A `status` command asked for a snapshot
    pub publish_status: bool,
}

#[derive(Debug, Default)]
pub struct CommandPoller {
    recent: heapless::Deque<CommandId, RECENT_CAPACITY>,
}

impl CommandPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// GET `/commands.json`; an absent document is an empty batch
    pub async fn fetch<T, C, D>(
        client: &mut RemoteStoreClient<T, C, D>,
    ) -> Result<PendingCommands, StoreError>
    where
        T: HttpTransport,
        C: Clock,
        D: DelayNs,
    {
        Ok(client
            .load_json::<PendingCommands>(COMMANDS_PATH)
            .await?
            .unwrap_or_default())
    }

    /// Queue the actions of every unprocessed command
    pub fn admit(
        &mut self,
        queue: &mut OperationQueue,
        commands: &PendingCommands,
        now_ms: u64,
    ) -> PollOutcome {
        let mut outcome = PollOutcome::default();

        for (id, command) in commands {
            if command.processed {
                continue;
            }
            if self.seen(id) {
                debug!("Command {} already handled, re-acknowledging", id.as_str());
                outcome.acknowledged.push(id.clone());
                continue;
            }

            info!("Command {}: {}", id.as_str(), command.kind.as_str());
            let admitted = match interpret(command) {
                CommandAction::Enqueue(op) => queue.enqueue(op, now_ms),
                CommandAction::PublishStatus => {
                    outcome.publish_status = true;
                    true
                }
                CommandAction::Ignore => true,
            };

            if admitted {
                self.remember(id);
                outcome.acknowledged.push(id.clone());
            } else {
                outcome.deferred += 1;
            }
        }

        if outcome.deferred > 0 {
            warn!("{} commands deferred, queue full", outcome.deferred);
        }
        outcome
    }

    /// Delete each id from the store. Returns how many deletes succeeded.
    pub async fn acknowledge<T, C, D>(
        client: &mut RemoteStoreClient<T, C, D>,
        ids: &[String],
    ) -> usize
    where
        T: HttpTransport,
        C: Clock,
        D: DelayNs,
    {
        let mut deleted = 0;
        for id in ids {
            let path = format!("/commands/{}.json", id);
            match client.delete(&path).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Failed to delete command {}: {}", id.as_str(), e),
            }
        }
        deleted
    }

    /// Fetch, admit and acknowledge in one go
    pub async fn poll<T, C, D>(
        &mut self,
        client: &mut RemoteStoreClient<T, C, D>,
        queue: &mut OperationQueue,
    ) -> Result<PollOutcome, StoreError>
    where
        T: HttpTransport,
        C: Clock,
        D: DelayNs,
    {
        let commands = Self::fetch(client).await?;
        let outcome = self.admit(queue, &commands, client.now_ms());
        Self::acknowledge(client, &outcome.acknowledged).await;
        Ok(outcome)
    }

    fn seen(&self, id: &str) -> bool {
        self.recent.iter().any(|r| r.as_str() == id)
    }

    fn remember(&mut self, id: &str) {
        let mut entry = CommandId::new();
        if entry.push_str(id).is_err() {
            return;
        }
        if self.recent.is_full() {
            self.recent.pop_front();
        }
        let _ = self.recent.push_back(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QUEUE_CAPACITY;
    use crate::testing::{mock_client, test_config};
    use alloc::vec;
    use embassy_futures::block_on;
    use hal_abstractions::Method;

    fn command(kind: &str, data: Value) -> RemoteCommand {
        RemoteCommand {
            kind: String::from(kind),
            data,
            processed: false,
        }
    }

    #[test]
    fn test_interpret() {
        assert_eq!(
            interpret(&command("water_start", Value::Null)),
            CommandAction::Enqueue(Operation::device(OperationKind::DispenseStart))
        );
        assert_eq!(
            interpret(&command("dispense_stop", Value::Null)),
            CommandAction::Enqueue(Operation::device(OperationKind::DispenseStop))
        );
        assert_eq!(
            interpret(&command("weather", Value::Null)),
            CommandAction::Enqueue(Operation::device(OperationKind::FetchWeather))
        );
        assert_eq!(
            interpret(&command("print", Value::String(String::from("hi")))),
            CommandAction::Enqueue(Operation::print("hi"))
        );
        assert_eq!(
            interpret(&command("test_print", Value::Null)),
            CommandAction::Enqueue(Operation::print(TEST_PRINT_TEXT))
        );
        assert_eq!(interpret(&command("status", Value::Null)), CommandAction::PublishStatus);
        assert_eq!(interpret(&command("reboot", Value::Null)), CommandAction::Ignore);
    }

    #[test]
    fn test_data_text() {
        assert_eq!(command("print", Value::Null).data_text(), "");
        assert_eq!(command("print", Value::from(42)).data_text(), "42");
    }

    #[test]
    fn test_admit_skips_processed_and_acks_unknown() {
        let json = r#"{
            "-A1": {"type": "print", "data": "one", "processed": false, "timestamp": "2024-01-01T00:00:00"},
            "-A2": {"type": "print", "data": "two", "processed": true},
            "-A3": {"type": "launch_rocket"}
        }"#;
        let commands: PendingCommands = serde_json::from_str(json).unwrap();
        let mut queue = OperationQueue::new();
        let mut poller = CommandPoller::new();

        let outcome = poller.admit(&mut queue, &commands, 0);
        assert_eq!(outcome.acknowledged, vec![String::from("-A1"), String::from("-A3")]);
        assert_eq!(outcome.deferred, 0);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().unwrap().operation, Operation::print("one"));
    }

    #[test]
    fn test_full_queue_defers_command() {
        let mut queue = OperationQueue::new();
        for _ in 0..QUEUE_CAPACITY {
            queue.enqueue(Operation::device(OperationKind::DispenseStop), 0);
        }
        let mut commands = PendingCommands::new();
        commands.insert(String::from("-B1"), command("weather", Value::Null));
        let mut poller = CommandPoller::new();

        let outcome = poller.admit(&mut queue, &commands, 0);
        assert!(outcome.acknowledged.is_empty());
        assert_eq!(outcome.deferred, 1);

        // room again: the same command goes through
        queue.clear();
        let outcome = poller.admit(&mut queue, &commands, 0);
        assert_eq!(outcome.acknowledged, vec![String::from("-B1")]);
    }

    #[test]
    fn test_redelivered_command_runs_once() {
        let mut commands = PendingCommands::new();
        commands.insert(String::from("-C1"), command("dispense_start", Value::Null));
        let mut queue = OperationQueue::new();
        let mut poller = CommandPoller::new();

        poller.admit(&mut queue, &commands, 0);
        // the DELETE failed, so the store hands it out again
        let outcome = poller.admit(&mut queue, &commands, 10);
        assert_eq!(outcome.acknowledged, vec![String::from("-C1")]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_status_command_requests_snapshot() {
        let mut commands = PendingCommands::new();
        commands.insert(String::from("-D1"), command("gpio_status", Value::Null));
        let outcome = CommandPoller::new().admit(&mut OperationQueue::new(), &commands, 0);
        assert!(outcome.publish_status);
        assert_eq!(outcome.acknowledged.len(), 1);
    }

    #[test]
    fn test_poll_round_trip() {
        let (mut client, _clock, _delay) = mock_client(test_config());
        client
            .transport_mut()
            .respond(200, r#"{"-E1":{"type":"print","data":"from app","processed":false}}"#)
            .respond(200, "null");
        let mut queue = OperationQueue::new();
        let mut poller = CommandPoller::new();

        let outcome = block_on(poller.poll(&mut client, &mut queue)).unwrap();
        assert_eq!(outcome.acknowledged, vec![String::from("-E1")]);

        let requests = &client.transport().requests;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].url, "https://example.test/commands.json");
        assert_eq!(requests[1].method, Method::Delete);
        assert_eq!(requests[1].url, "https://example.test/commands/-E1.json");
    }

    #[test]
    fn test_poll_with_no_commands() {
        let (mut client, _clock, _delay) = mock_client(test_config());
        client.transport_mut().respond(200, "null");
        let mut queue = OperationQueue::new();

        let outcome = block_on(CommandPoller::new().poll(&mut client, &mut queue)).unwrap();
        assert_eq!(outcome, PollOutcome::default());
        assert_eq!(client.transport().requests.len(), 1);
    }
}

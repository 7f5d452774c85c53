//! Cooperative driver loop
//!
//! One [`Driver::tick`] runs every periodic duty whose [`Cadence`] is due:
//! reloading the stored documents, firing reminders, polling remote
//! commands, publishing status, sampling health and finally draining one
//! queued operation. The board calls it every
//! [`periods::QUEUE_TICK_MS`](crate::cadence::periods::QUEUE_TICK_MS).
//!
//! [`DeviceState`] sits in a `RefCell` shared with the local API server. A
//! borrow is never held across an `.await`, so API requests are served while
//! a store request is in flight.

use core::cell::RefCell;

use embedded_hal_async::delay::DelayNs;
use hal_abstractions::{Appliance, Clock, HttpTransport};

use crate::cadence::{periods, Cadence};
use crate::commands::{CommandPoller, PollOutcome};
use crate::dispatch;
use crate::groceries::{GroceryList, GROCERIES_PATH};
use crate::health::HealthProbe;
use crate::queue::{Operation, OperationKind, Settlement};
use crate::reminders::{DueSweep, ReminderScheduler, REMINDERS_PATH};
use crate::state::DeviceState;
use crate::status::{DeviceReadings, StatusSnapshot};
use crate::store::RemoteStoreClient;

/// Board-side sensing that the driver samples
pub trait DeviceMonitor {
    /// Periodic housekeeping: safety cut-offs, sensor refresh
    fn service(&mut self, now_ms: u64);

    fn readings(&self) -> DeviceReadings;

    /// Vitals for the health report. `store_healthy` is filled in by the
    /// driver.
    fn probe(&self) -> HealthProbe;
}

/// What one tick did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub reloaded: bool,
    pub sweep: Option<DueSweep>,
    pub commands: Option<PollOutcome>,
    pub status_published: bool,
    pub health_checked: bool,
    pub processed: Option<Settlement>,
}

pub struct Driver<T, C, D, A> {
    client: RemoteStoreClient<T, C, D>,
    appliance: A,
    queue_tick: Cadence,
    reload: Cadence,
    reload_retry: Cadence,
    reminder_check: Cadence,
    command_poll: Cadence,
    status: Cadence,
}

impl<T, C, D, A> Driver<T, C, D, A>
where
    T: HttpTransport,
    C: Clock,
    D: DelayNs,
    A: Appliance + DeviceMonitor,
{
    pub fn new(client: RemoteStoreClient<T, C, D>, appliance: A) -> Self {
        Self {
            client,
            appliance,
            queue_tick: Cadence::new(periods::QUEUE_TICK_MS),
            reload: Cadence::new(periods::RELOAD_MS),
            reload_retry: Cadence::new(periods::RELOAD_RETRY_MS),
            reminder_check: Cadence::new(periods::REMINDER_CHECK_MS),
            command_poll: Cadence::new(periods::COMMAND_POLL_MS),
            status: Cadence::new(periods::STATUS_MS),
        }
    }

    pub fn client(&self) -> &RemoteStoreClient<T, C, D> {
        &self.client
    }

    pub fn appliance(&self) -> &A {
        &self.appliance
    }

    /// Run every due duty once. `unix_secs` is `None` until wall time is
    /// known; time-based duties are skipped until then.
    pub async fn tick(&mut self, state: &RefCell<DeviceState>, unix_secs: Option<u64>) -> TickReport {
        let mut report = TickReport::default();
        let now_ms = self.client.now_ms();

        self.appliance.service(now_ms);

        let reload_due = if state.borrow().reminders.is_loaded() {
            self.reload.due(now_ms)
        } else {
            self.reload_retry.due(now_ms)
        };
        if reload_due {
            self.reload.mark(now_ms);
            self.reload_documents(state, unix_secs).await;
            report.reloaded = true;
        }

        if let Some(unix) = unix_secs {
            if self.reminder_check.due(now_ms) {
                report.sweep = Some(self.check_reminders(state, unix));
            }
        }

        if self.command_poll.due(now_ms) {
            report.commands = self.poll_commands(state, unix_secs).await;
        }

        if self.status.due(now_ms) {
            report.status_published = self.publish_status(state, unix_secs);
        }

        let health_due = state.borrow_mut().health.check_due(now_ms);
        if health_due {
            self.check_health(state, unix_secs).await;
            report.health_checked = true;
        }

        if self.queue_tick.due(now_ms) {
            report.processed = self.process_queue(state).await;
        }

        report
    }

    /// Pull reminders and groceries from the store unless a local write of
    /// the same document is still queued.
    ///
    /// Runs without wall time too; records lacking `createdTime` then get 0.
    async fn reload_documents(&mut self, state: &RefCell<DeviceState>, unix_secs: Option<u64>) {
        if !write_pending(state, REMINDERS_PATH) {
            match ReminderScheduler::fetch(&mut self.client).await {
                // a web request may have queued a write while we waited
                Ok(remote) if !write_pending(state, REMINDERS_PATH) => {
                    let now = unix_secs.unwrap_or(0);
                    let count = state.borrow_mut().reminders.apply_remote(remote, now);
                    info!("Reloaded {} reminders", count);
                }
                Ok(_) => debug!("Reminder reload superseded by local change"),
                Err(e) => warn!("Reminder reload failed: {}", e),
            }
        }

        if !write_pending(state, GROCERIES_PATH) {
            match GroceryList::fetch(&mut self.client).await {
                Ok(value) if !write_pending(state, GROCERIES_PATH) => {
                    match state.borrow_mut().groceries.apply_remote(value) {
                        Ok(count) => info!("Reloaded {} grocery items", count),
                        Err(_) => warn!("Unexpected grocery document shape"),
                    }
                }
                Ok(_) => debug!("Grocery reload superseded by local change"),
                Err(e) => warn!("Grocery reload failed: {}", e),
            }
        }
    }

    fn check_reminders(&mut self, state: &RefCell<DeviceState>, unix: u64) -> DueSweep {
        let now_ms = self.client.now_ms();
        let mut guard = state.borrow_mut();
        let DeviceState {
            reminders, queue, ..
        } = &mut *guard;

        let sweep = reminders.check_due(unix, |reminder| {
            if !queue.enqueue(Operation::print(reminder.receipt_text()), now_ms) {
                warn!("Reminder {} not printed, queue full", reminder.id.as_str());
            }
        });
        if sweep.changed() {
            reminders.save(queue, now_ms);
        }
        sweep
    }

    async fn poll_commands(
        &mut self,
        state: &RefCell<DeviceState>,
        unix_secs: Option<u64>,
    ) -> Option<PollOutcome> {
        let commands = match CommandPoller::fetch(&mut self.client).await {
            Ok(commands) => commands,
            Err(e) => {
                warn!("Command poll failed: {}", e);
                return None;
            }
        };
        if commands.is_empty() {
            return Some(PollOutcome::default());
        }

        let now_ms = self.client.now_ms();
        let outcome = {
            let mut guard = state.borrow_mut();
            let DeviceState {
                commands: poller,
                queue,
                ..
            } = &mut *guard;
            poller.admit(queue, &commands, now_ms)
        };

        CommandPoller::acknowledge(&mut self.client, &outcome.acknowledged).await;
        if outcome.publish_status {
            self.publish_status(state, unix_secs);
        }
        Some(outcome)
    }

    fn publish_status(&mut self, state: &RefCell<DeviceState>, unix_secs: Option<u64>) -> bool {
        let snapshot = StatusSnapshot::new(self.appliance.readings(), unix_secs);
        let now_ms = self.client.now_ms();
        snapshot.publish(&mut state.borrow_mut().queue, now_ms)
    }

    async fn check_health(&mut self, state: &RefCell<DeviceState>, unix_secs: Option<u64>) {
        let store_healthy = self.client.is_healthy().await;
        let probe = HealthProbe {
            store_healthy,
            ..self.appliance.probe()
        };
        let now_ms = self.client.now_ms();
        state.borrow_mut().health.record(probe, now_ms, unix_secs);
    }

    async fn process_queue(&mut self, state: &RefCell<DeviceState>) -> Option<Settlement> {
        let now_ms = self.client.now_ms();
        let op = state.borrow_mut().queue.dequeue_if_due(now_ms)?;

        let succeeded = dispatch::execute(&op, &mut self.client, &mut self.appliance).await;

        let now_ms = self.client.now_ms();
        let mut guard = state.borrow_mut();
        let operation = &op.operation;
        if succeeded && operation.kind == OperationKind::Put && operation.path == REMINDERS_PATH {
            guard.reminders.confirm_saved(&operation.payload);
        }
        Some(guard.queue.settle(op, succeeded, now_ms))
    }
}

fn write_pending(state: &RefCell<DeviceState>, path: &str) -> bool {
    state.borrow().queue.has_pending(OperationKind::Put, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{self, ApiRequest, Now};
    use crate::testing::{
        mock_client, test_config, ApplianceCall, MockAppliance, MockClient, MockClock, MockDelay,
        MockTransport, StepRng,
    };
    use alloc::vec::Vec;
    use embassy_futures::block_on;
    use hal_abstractions::Method;

    const UNIX: u64 = 1_700_000_000;

    const STORED: &str = r#"{"17000000001111":{"message":"stored","scheduledTime":1700003600,"createdTime":1700000000}}"#;

    type MockDriver = Driver<MockTransport, MockClock, MockDelay, MockAppliance>;

    fn driver() -> (MockDriver, MockClock) {
        let (client, clock, _delay) = mock_client(test_config());
        (Driver::new(client, MockAppliance::default()), clock)
    }

    fn requests(client: &MockClient) -> Vec<(Method, &str)> {
        client
            .transport()
            .requests
            .iter()
            .map(|r| {
                let path = r.url.trim_start_matches("https://example.test");
                (r.method, path)
            })
            .collect()
    }

    #[test]
    fn test_first_tick_runs_every_duty() {
        let (mut driver, _clock) = driver();
        let state = RefCell::new(DeviceState::default());

        let report = block_on(driver.tick(&state, Some(UNIX)));

        assert!(report.reloaded);
        assert_eq!(report.sweep, Some(DueSweep::default()));
        assert_eq!(report.commands, Some(PollOutcome::default()));
        assert!(report.status_published);
        assert!(report.health_checked);
        assert_eq!(
            requests(driver.client()),
            [
                (Method::Get, "/reminders.json"),
                (Method::Get, "/groceries.json"),
                (Method::Get, "/commands.json"),
                (Method::Get, "/.json"),
                (Method::Put, "/status.json"),
            ]
        );
        assert!(state.borrow().queue.is_empty());
        assert!(state.borrow().health.probe().store_healthy);
        assert!(state.borrow().health.is_healthy());
    }

    #[test]
    fn test_duties_wait_for_their_cadence() {
        let (mut driver, clock) = driver();
        let state = RefCell::new(DeviceState::default());
        block_on(driver.tick(&state, Some(UNIX)));
        let issued = driver.client().transport().requests.len();

        clock.advance(100);
        let report = block_on(driver.tick(&state, Some(UNIX)));
        assert_eq!(report, TickReport::default());
        assert_eq!(driver.client().transport().requests.len(), issued);

        clock.advance(periods::COMMAND_POLL_MS);
        let report = block_on(driver.tick(&state, Some(UNIX + 30)));
        assert!(report.commands.is_some());
        assert!(report.sweep.is_some());
        assert!(!report.reloaded);
    }

    #[test]
    fn test_reminder_fires_and_pending_write_blocks_reload() {
        let (mut driver, _clock) = driver();
        let state = RefCell::new(DeviceState::default());
        {
            let mut guard = state.borrow_mut();
            let DeviceState {
                reminders, queue, ..
            } = &mut *guard;
            reminders.from_json("null", UNIX - 100).unwrap();
            reminders.add("Take pills", UNIX - 10, UNIX - 100, &mut StepRng(0)).unwrap();
            reminders.save(queue, 0);
        }

        let report = block_on(driver.tick(&state, Some(UNIX)));

        assert_eq!(report.sweep.map(|s| s.fired), Some(1));
        // the queued reminders write went out instead of a reload
        let sent = requests(driver.client());
        assert!(!sent.contains(&(Method::Get, "/reminders.json")));
        assert_eq!(sent.last(), Some(&(Method::Put, "/reminders.json")));

        let state = state.borrow();
        let kinds: Vec<OperationKind> = state.queue.iter().map(|op| op.kind()).collect();
        assert_eq!(
            kinds,
            [OperationKind::PrintReceipt, OperationKind::Put, OperationKind::Put]
        );
        let print = &state.queue.iter().next().unwrap().operation;
        assert!(print.payload.contains("Take pills"));
        assert!(state.reminders.iter().all(|r| r.printed));
    }

    #[test]
    fn test_commands_are_queued_and_acknowledged() {
        let (mut driver, clock) = driver();
        let state = RefCell::new(DeviceState::default());
        driver
            .client
            .transport_mut()
            .respond(200, "null")
            .respond(200, "null")
            .respond(
                200,
                r#"{"c1":{"type":"dispense_start","processed":false},"c2":{"type":"status"}}"#,
            );

        let report = block_on(driver.tick(&state, Some(UNIX)));

        let outcome = report.commands.unwrap();
        assert_eq!(outcome.acknowledged, ["c1", "c2"]);
        assert!(outcome.publish_status);
        let sent = requests(driver.client());
        assert!(sent.contains(&(Method::Delete, "/commands/c1.json")));
        assert!(sent.contains(&(Method::Delete, "/commands/c2.json")));

        // dispense first, then both status snapshots
        assert_eq!(report.processed.map(|s| s.kind), Some(OperationKind::DispenseStart));
        assert_eq!(driver.appliance().calls, [ApplianceCall::Start]);
        assert_eq!(state.borrow().queue.len(), 2);

        clock.advance(2_000);
        let report = block_on(driver.tick(&state, Some(UNIX + 2)));
        assert_eq!(report.processed.map(|s| s.kind), Some(OperationKind::Put));
    }

    #[test]
    fn test_unsynced_boot_still_loads_reminders() {
        let (mut driver, _clock) = driver();
        let state = RefCell::new(DeviceState::default());
        driver.client.transport_mut().respond(200, STORED);

        let report = block_on(driver.tick(&state, None));

        assert!(report.reloaded);
        assert!(report.sweep.is_none());
        let sent = requests(driver.client());
        assert!(sent.contains(&(Method::Get, "/reminders.json")));
        assert!(sent.contains(&(Method::Get, "/groceries.json")));
        let state = state.borrow();
        assert!(state.reminders.is_loaded());
        assert_eq!(state.reminders.get("17000000001111").unwrap().message, "stored");
    }

    #[test]
    fn test_failed_boot_load_is_retried_before_local_writes() {
        let (mut driver, clock) = driver();
        let state = RefCell::new(DeviceState::default());
        driver.client.transport_mut().respond(401, "");

        block_on(driver.tick(&state, None));
        assert!(!state.borrow().reminders.is_loaded());

        clock.advance(60_000);
        let add = ApiRequest {
            method: Method::Post,
            path: "/api/reminders",
            client: "10.0.0.2",
            api_key: None,
            body: r#"{"message":"new","scheduledTime":1700007200}"#,
        };
        let now = Now {
            ms: clock.now_ms(),
            unix_secs: Some(UNIX + 60),
        };
        let response = api::handle(&mut state.borrow_mut(), &add, now, &mut StepRng(0));
        assert_eq!(response.status, 503);
        assert!(state.borrow().queue.is_empty());

        driver.client.transport_mut().respond(200, STORED);
        let report = block_on(driver.tick(&state, Some(UNIX + 60)));
        assert!(report.reloaded);
        assert!(state.borrow().reminders.is_loaded());

        let response = api::handle(&mut state.borrow_mut(), &add, now, &mut StepRng(0));
        assert_eq!(response.status, 200);
        for _ in 0..30 {
            clock.advance(periods::QUEUE_TICK_MS);
            block_on(driver.tick(&state, Some(UNIX + 61)));
        }

        let put = driver
            .client()
            .transport()
            .requests
            .iter()
            .rev()
            .find(|r| r.method == Method::Put && r.url.ends_with("/reminders.json"))
            .unwrap();
        let body = put.body.as_deref().unwrap();
        assert!(body.contains("17000000001111"));
        assert!(body.contains(r#""message":"new""#));
    }

    #[test]
    fn test_reload_uses_long_period_once_loaded() {
        let (mut driver, clock) = driver();
        let state = RefCell::new(DeviceState::default());
        driver.client.transport_mut().respond(401, "");
        assert!(block_on(driver.tick(&state, None)).reloaded);

        clock.advance(periods::RELOAD_RETRY_MS - 1);
        assert!(!block_on(driver.tick(&state, None)).reloaded);
        clock.advance(1);
        assert!(block_on(driver.tick(&state, None)).reloaded);
        assert!(state.borrow().reminders.is_loaded());

        clock.advance(periods::RELOAD_RETRY_MS);
        assert!(!block_on(driver.tick(&state, None)).reloaded);
        clock.advance(periods::RELOAD_MS);
        assert!(block_on(driver.tick(&state, None)).reloaded);
    }

    #[test]
    fn test_service_runs_every_tick() {
        let (mut driver, clock) = driver();
        let state = RefCell::new(DeviceState::default());
        block_on(driver.tick(&state, None));
        clock.advance(10);
        block_on(driver.tick(&state, None));
        assert_eq!(driver.appliance().serviced, 2);
    }
}

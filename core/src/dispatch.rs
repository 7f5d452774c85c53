//! Queue consumer
//!
//! Hands one dequeued operation to the remote store or the appliance and
//! reports success. Retry bookkeeping stays in [`OperationQueue::settle`].

use embedded_hal_async::delay::DelayNs;
use hal_abstractions::{Appliance, Clock, HttpTransport};

use crate::queue::{OperationKind, OperationQueue, QueuedOperation, Settlement};
use crate::store::RemoteStoreClient;

/// Run `op` once. Returns whether it succeeded.
pub async fn execute<T, C, D, A>(
    op: &QueuedOperation,
    client: &mut RemoteStoreClient<T, C, D>,
    appliance: &mut A,
) -> bool
where
    T: HttpTransport,
    C: Clock,
    D: DelayNs,
    A: Appliance,
{
    let path = op.operation.path.as_str();
    let payload = op.operation.payload.as_str();

    match op.kind() {
        OperationKind::Get => client.get(path).await.is_ok(),
        OperationKind::Put => client.put(path, payload).await.is_ok(),
        OperationKind::Post => client.post(path, payload).await.is_ok(),
        OperationKind::Delete => client.delete(path).await.is_ok(),
        OperationKind::FetchWeather => appliance.refresh_weather().await.is_ok(),
        OperationKind::PrintReceipt => appliance.print_receipt(payload).await.is_ok(),
        OperationKind::DispenseStart => appliance.start_dispense().is_ok(),
        OperationKind::DispenseStop => appliance.stop_dispense().is_ok(),
    }
}

/// Process at most one due item: dequeue, execute, settle.
///
/// Returns `None` when nothing was due.
pub async fn process_next<T, C, D, A>(
    queue: &mut OperationQueue,
    client: &mut RemoteStoreClient<T, C, D>,
    appliance: &mut A,
) -> Option<Settlement>
where
    T: HttpTransport,
    C: Clock,
    D: DelayNs,
    A: Appliance,
{
    let op = queue.dequeue_if_due(client.now_ms())?;
    debug!(
        "Processing {} {} (retry {})",
        op.kind(),
        op.operation.path.as_str(),
        op.retry_attempts
    );
    let succeeded = execute(&op, client, appliance).await;
    let settlement = queue.settle(op, succeeded, client.now_ms());
    if succeeded {
        debug!("{} completed ({} left)", settlement.kind, queue.len());
    }
    Some(settlement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Operation, RetryOutcome, MAX_RETRIES};
    use crate::testing::{mock_client, test_config, ApplianceCall, MockAppliance};
    use alloc::string::String;
    use alloc::vec;
    use embassy_futures::block_on;
    use hal_abstractions::Method;

    #[test]
    fn test_store_operations_use_client() {
        let (mut client, clock, _delay) = mock_client(test_config());
        let mut appliance = MockAppliance::default();
        let mut queue = OperationQueue::new();
        queue.enqueue(Operation::put("/status.json", r#"{"status":"OK"}"#), 0);
        queue.enqueue(Operation::delete("/commands/abc.json"), 0);

        let first = block_on(process_next(&mut queue, &mut client, &mut appliance)).unwrap();
        assert!(first.succeeded);
        assert_eq!(first.kind, OperationKind::Put);

        // second item waits for the processing interval
        assert!(block_on(process_next(&mut queue, &mut client, &mut appliance)).is_none());
        clock.advance(2_000);
        assert!(block_on(process_next(&mut queue, &mut client, &mut appliance)).is_some());

        let methods: vec::Vec<Method> = client.transport().requests.iter().map(|r| r.method).collect();
        assert_eq!(methods, vec![Method::Put, Method::Delete]);
        assert_eq!(
            client.transport().requests[0].body.as_deref(),
            Some(r#"{"status":"OK"}"#)
        );
        assert!(appliance.calls.is_empty());
    }

    #[test]
    fn test_device_operations_use_appliance() {
        let (mut client, _clock, _delay) = mock_client(test_config());
        let mut appliance = MockAppliance::default();
        let mut queue = OperationQueue::with_process_interval(0);
        queue.enqueue(Operation::device(OperationKind::DispenseStart), 0);
        queue.enqueue(Operation::device(OperationKind::DispenseStop), 0);
        queue.enqueue(Operation::print("hello"), 0);
        queue.enqueue(Operation::device(OperationKind::FetchWeather), 0);

        while block_on(process_next(&mut queue, &mut client, &mut appliance)).is_some() {}

        assert_eq!(
            appliance.calls,
            vec![
                ApplianceCall::Start,
                ApplianceCall::Stop,
                ApplianceCall::Print(String::from("hello")),
                ApplianceCall::Weather,
            ]
        );
        assert!(client.transport().requests.is_empty());
    }

    #[test]
    fn test_failure_requeues_until_budget_spent() {
        let (mut client, _clock, _delay) = mock_client(test_config());
        let mut appliance = MockAppliance {
            failing: true,
            ..MockAppliance::default()
        };
        let mut queue = OperationQueue::with_process_interval(0);
        queue.enqueue(Operation::print("jammed"), 0);

        let mut outcomes = vec::Vec::new();
        while let Some(settlement) = block_on(process_next(&mut queue, &mut client, &mut appliance)) {
            outcomes.push(settlement.retry);
        }

        assert_eq!(appliance.calls.len(), 1 + MAX_RETRIES as usize);
        assert_eq!(
            outcomes,
            vec![
                Some(RetryOutcome::Requeued { attempt: 1 }),
                Some(RetryOutcome::Requeued { attempt: 2 }),
                Some(RetryOutcome::Requeued { attempt: 3 }),
                Some(RetryOutcome::Exhausted),
            ]
        );
    }

    #[test]
    fn test_store_failure_counts_as_failed() {
        let (mut client, _clock, _delay) = mock_client(test_config());
        client.transport_mut().respond(401, "");
        let mut appliance = MockAppliance::default();
        let mut queue = OperationQueue::new();
        queue.enqueue(Operation::put("/reminders.json", "{}"), 0);

        let settlement = block_on(process_next(&mut queue, &mut client, &mut appliance)).unwrap();
        assert!(!settlement.succeeded);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().unwrap().retry_attempts, 1);
    }
}

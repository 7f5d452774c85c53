//! Host-side doubles for the hardware seams

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use embedded_hal_async::delay::DelayNs;
use hal_abstractions::{Appliance, Clock, HttpTransport, Method, Request, Response};

use crate::driver::DeviceMonitor;
use crate::health::HealthProbe;
use crate::status::DeviceReadings;
use crate::store::{RemoteStoreClient, StoreConfig};

/// Shared, manually advanced millisecond clock
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    now: Rc<Cell<u64>>,
}

impl MockClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// Delay that returns immediately, advancing the clock and recording the wait
#[derive(Debug, Clone)]
pub struct MockDelay {
    clock: MockClock,
    waits: Rc<RefCell<Vec<u32>>>,
}

impl MockDelay {
    pub fn new(clock: MockClock) -> Self {
        Self {
            clock,
            waits: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn waits(&self) -> Vec<u32> {
        self.waits.borrow().clone()
    }
}

impl DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.delay_ms(ns / 1_000_000).await;
    }

    async fn delay_us(&mut self, us: u32) {
        self.delay_ms(us / 1_000).await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.waits.borrow_mut().push(ms);
        self.clock.advance(ms as u64);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockIoError;

impl core::fmt::Display for MockIoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "mock transport timed out")
    }
}

impl core::error::Error for MockIoError {}

impl embedded_io::Error for MockIoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        embedded_io::ErrorKind::TimedOut
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub timeout_ms: u32,
    pub at_ms: u64,
}

/// Scripted transport; answers `200 null` once the script runs out
#[derive(Debug)]
pub struct MockTransport {
    clock: MockClock,
    script: VecDeque<Result<Response, MockIoError>>,
    pub requests: Vec<RecordedRequest>,
}

impl MockTransport {
    pub fn new(clock: MockClock) -> Self {
        Self {
            clock,
            script: VecDeque::new(),
            requests: Vec::new(),
        }
    }

    pub fn respond(&mut self, status: u16, body: &str) -> &mut Self {
        self.script.push_back(Ok(Response::new(status, body)));
        self
    }

    pub fn fail(&mut self) -> &mut Self {
        self.script.push_back(Err(MockIoError));
        self
    }

    pub fn urls(&self) -> Vec<&str> {
        self.requests.iter().map(|r| r.url.as_str()).collect()
    }
}

impl HttpTransport for MockTransport {
    type Error = MockIoError;

    async fn send(&mut self, request: Request<'_>) -> Result<Response, Self::Error> {
        self.requests.push(RecordedRequest {
            method: request.method,
            url: String::from(request.url),
            body: request.body.map(String::from),
            timeout_ms: request.timeout_ms,
            at_ms: self.clock.now_ms(),
        });
        self.script
            .pop_front()
            .unwrap_or_else(|| Ok(Response::new(200, "null")))
    }
}

pub type MockClient = RemoteStoreClient<MockTransport, MockClock, MockDelay>;

/// Store client wired to mocks, plus handles to the clock and delay
pub fn mock_client(config: StoreConfig) -> (MockClient, MockClock, MockDelay) {
    let clock = MockClock::new(0);
    let delay = MockDelay::new(clock.clone());
    let client = RemoteStoreClient::new(
        config,
        MockTransport::new(clock.clone()),
        clock.clone(),
        delay.clone(),
    );
    (client, clock, delay)
}

/// Config used by most tests: no pacing, no token
pub fn test_config() -> StoreConfig {
    StoreConfig::new("https://example.test").with_bootstrap_allowance(u32::MAX)
}

/// Deterministic `RngCore` counting up from a seed
#[derive(Debug, Clone)]
pub struct StepRng(pub u32);

impl rand_core::RngCore for StepRng {
    fn next_u32(&mut self) -> u32 {
        let v = self.0;
        self.0 = self.0.wrapping_add(1);
        v
    }

    fn next_u64(&mut self) -> u64 {
        self.next_u32() as u64
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplianceCall {
    Start,
    Stop,
    Print(String),
    Weather,
}

/// Records calls; fails every call while `failing` is set
#[derive(Debug, Default)]
pub struct MockAppliance {
    pub calls: Vec<ApplianceCall>,
    pub failing: bool,
    pub serviced: u32,
}

impl MockAppliance {
    fn outcome(&self) -> Result<(), ()> {
        if self.failing {
            Err(())
        } else {
            Ok(())
        }
    }
}

impl Appliance for MockAppliance {
    type Error = ();

    fn start_dispense(&mut self) -> Result<(), ()> {
        self.calls.push(ApplianceCall::Start);
        self.outcome()
    }

    fn stop_dispense(&mut self) -> Result<(), ()> {
        self.calls.push(ApplianceCall::Stop);
        self.outcome()
    }

    async fn print_receipt(&mut self, text: &str) -> Result<(), ()> {
        self.calls.push(ApplianceCall::Print(String::from(text)));
        self.outcome()
    }

    async fn refresh_weather(&mut self) -> Result<(), ()> {
        self.calls.push(ApplianceCall::Weather);
        self.outcome()
    }
}


impl DeviceMonitor for MockAppliance {
    fn service(&mut self, _now_ms: u64) {
        self.serviced += 1;
    }

    fn readings(&self) -> DeviceReadings {
        DeviceReadings {
            link_up: true,
            sanitizer_level: 100.0,
            weather: String::from("N/A"),
            ip: String::from("10.0.0.2"),
            ..DeviceReadings::default()
        }
    }

    fn probe(&self) -> HealthProbe {
        HealthProbe {
            link_up: true,
            ip: Some(String::from("10.0.0.2")),
            printer_ready: true,
            free_heap: 16 * 1024,
            min_free_heap: 12 * 1024,
            heap_size: 32 * 1024,
            cpu_mhz: 84,
            ..HealthProbe::default()
        }
    }
}

#![deny(unsafe_code)]
//! Dispenser hardware: pump, receipt printer, sensors and the weather line

use alloc::string::String;

use defmt::{error, info, warn, Format};
use dispenser_core::cadence::Cadence;
use dispenser_core::health::HealthProbe;
use dispenser_core::pump::{PumpError, PumpGuard};
use dispenser_core::receipt;
use dispenser_core::status::{moisture_percent, DeviceReadings};
use dispenser_core::weather::{parse_report, WeatherConfig, WeatherError};
use dispenser_core::DeviceMonitor;
use embassy_net::Stack;
use embassy_stm32::adc::{Adc, AnyAdcChannel};
use embassy_stm32::gpio::{Input, Output};
use embassy_stm32::mode::Async;
use embassy_stm32::peripherals::ADC1;
use embassy_stm32::usart::UartTx;
use hal_abstractions::{Appliance, Clock, Method, Request};

use crate::heap;
use crate::network::{manager, HttpClient, NetworkError};
use crate::time::BoardClock;

/// How often the IR and moisture sensors are read
const SENSOR_INTERVAL_MS: u64 = 10_000;

const WEATHER_TIMEOUT_MS: u32 = 10_000;

/// SYSCLK from the PLL setup in `init`
pub const CPU_MHZ: u32 = 84;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum ApplianceError {
    Pump(PumpError),
    Printer,
    Weather(NetworkError),
    WeatherStatus(u16),
    WeatherParse(WeatherError),
    /// No weather API key was configured
    WeatherDisabled,
}

impl From<PumpError> for ApplianceError {
    fn from(e: PumpError) -> Self {
        Self::Pump(e)
    }
}

/// Board peripherals behind the [`Appliance`] seam
pub struct FeatherAppliance {
    clock: BoardClock,
    stack: Stack<'static>,
    pump: Output<'static>,
    guard: PumpGuard,
    ir: Input<'static>,
    adc: Adc<'static, ADC1>,
    moisture_pin: AnyAdcChannel<ADC1>,
    printer: UartTx<'static, Async>,
    printer_ready: bool,
    http: HttpClient,
    weather: Option<WeatherConfig>,
    weather_line: String,
    sensors: Cadence,
    ir_detected: bool,
    moisture: f32,
}

pub struct FeatherPeripherals {
    pub pump: Output<'static>,
    pub ir: Input<'static>,
    pub adc: Adc<'static, ADC1>,
    pub moisture_pin: AnyAdcChannel<ADC1>,
    pub printer: UartTx<'static, Async>,
}

impl FeatherAppliance {
    pub fn new(
        periph: FeatherPeripherals,
        stack: Stack<'static>,
        weather: Option<WeatherConfig>,
    ) -> Self {
        if weather.is_none() {
            warn!("No weather API key configured");
        }
        Self {
            clock: BoardClock,
            stack,
            pump: periph.pump,
            guard: PumpGuard::new(),
            ir: periph.ir,
            adc: periph.adc,
            moisture_pin: periph.moisture_pin,
            printer: periph.printer,
            printer_ready: true,
            http: HttpClient::new(stack),
            weather,
            weather_line: String::new(),
            sensors: Cadence::new(SENSOR_INTERVAL_MS),
            ir_detected: false,
            moisture: 0.0,
        }
    }

    fn sample_sensors(&mut self) {
        // IR obstacle sensor pulls low when something is in front of it
        self.ir_detected = self.ir.is_low();
        let raw = self.adc.blocking_read(&mut self.moisture_pin);
        self.moisture = moisture_percent(raw);
    }

    fn cut_pump(&mut self, now_ms: u64) {
        self.pump.set_low();
        match self.guard.stop(now_ms) {
            Ok(ms) => info!(
                "Pump stopped after {} ms (total dispenses: {})",
                ms,
                self.guard.total_dispenses()
            ),
            Err(e) => warn!("Pump stop: {}", e),
        }
    }
}

impl Appliance for FeatherAppliance {
    type Error = ApplianceError;

    fn start_dispense(&mut self) -> Result<(), Self::Error> {
        self.guard.start(self.clock.now_ms()).inspect_err(|e| {
            warn!("Dispense refused: {}", e);
        })?;
        self.pump.set_high();
        info!("Pump started");
        Ok(())
    }

    fn stop_dispense(&mut self) -> Result<(), Self::Error> {
        let now_ms = self.clock.now_ms();
        if !self.guard.is_dispensing() {
            return Err(PumpError::NotRunning.into());
        }
        self.cut_pump(now_ms);
        Ok(())
    }

    async fn print_receipt(&mut self, text: &str) -> Result<(), Self::Error> {
        let bytes = receipt::encode(text);
        match self.printer.write(&bytes).await {
            Ok(()) => {
                self.printer_ready = true;
                info!("Printed {} bytes", bytes.len());
                Ok(())
            }
            Err(e) => {
                self.printer_ready = false;
                error!("Printer write failed: {:?}", e);
                Err(ApplianceError::Printer)
            }
        }
    }

    async fn refresh_weather(&mut self) -> Result<(), Self::Error> {
        let Some(config) = &self.weather else {
            return Err(ApplianceError::WeatherDisabled);
        };
        let url = config.request_url();
        let response = self
            .http
            .exchange(Request {
                method: Method::Get,
                url: &url,
                body: None,
                timeout_ms: WEATHER_TIMEOUT_MS,
            })
            .await
            .map_err(ApplianceError::Weather)?;
        if response.status != 200 {
            warn!("Weather API returned {}", response.status);
            return Err(ApplianceError::WeatherStatus(response.status));
        }
        let report = parse_report(&response.body).map_err(ApplianceError::WeatherParse)?;
        self.weather_line = report.summary();
        info!("Weather: {}", self.weather_line.as_str());
        Ok(())
    }
}

impl DeviceMonitor for FeatherAppliance {
    fn service(&mut self, now_ms: u64) {
        if self.guard.timed_out(now_ms) {
            warn!("Dispense timeout reached, stopping pump");
            self.cut_pump(now_ms);
        }
        if self.sensors.due(now_ms) {
            self.sample_sensors();
        }
    }

    fn readings(&self) -> DeviceReadings {
        DeviceReadings {
            link_up: manager::is_online(self.stack),
            ir_detected: self.ir_detected,
            dispensing: self.guard.is_dispensing(),
            sanitizer_level: self.guard.sanitizer_level(),
            moisture: self.moisture,
            weather: self.weather_line.clone(),
            ip: manager::ipv4_address(self.stack).unwrap_or_default(),
        }
    }

    fn probe(&self) -> HealthProbe {
        let heap = heap::stats();
        HealthProbe {
            link_up: manager::is_online(self.stack),
            ip: manager::ipv4_address(self.stack),
            store_healthy: false,
            printer_ready: self.printer_ready,
            free_heap: heap.free,
            min_free_heap: heap.min_free,
            heap_size: heap.size,
            cpu_mhz: CPU_MHZ,
        }
    }
}

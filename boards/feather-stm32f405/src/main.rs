#![deny(unsafe_code)]
#![no_main]
#![no_std]

extern crate alloc;

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod appliance;
mod eth;
mod heap;
mod network;
mod rng;
mod time;
mod tls_buffers;

stm32_tim2_monotonic!(Mono, 1_000_000);

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART2, USART3, UART4])]
mod app {
    use super::*;
    use core::cell::RefCell;
    use defmt::{error, info, warn};
    use dispenser_core::cadence::periods;
    use dispenser_core::health::HealthConfig;
    use dispenser_core::{Cadence, DeviceState, Driver, RemoteStoreClient};
    use embassy_futures::join::join4;
    use embassy_stm32::adc::{Adc, AdcChannel};
    use embassy_stm32::exti::ExtiInput;
    use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::{Hse, HseMode, LsConfig, LseConfig, LseMode};
    use embassy_stm32::rng::Rng;
    use embassy_stm32::rtc::{Rtc, RtcConfig};
    use embassy_stm32::spi::{self, Spi};
    use embassy_stm32::time::Hertz;
    use embassy_stm32::usart::{self, UartTx};
    use hal_abstractions::{Clock, WallClock};

    use appliance::{FeatherAppliance, FeatherPeripherals};
    use network::{config, manager, server, HttpsClient, NetworkConfig, SntpClient, SntpConfig};
    use time::BoardClock;

    type SpiPeripheral = embassy_stm32::Peri<'static, peripherals::SPI2>;
    type PinPB13 = embassy_stm32::Peri<'static, peripherals::PB13>;
    type PinPB15 = embassy_stm32::Peri<'static, peripherals::PB15>;
    type PinPB14 = embassy_stm32::Peri<'static, peripherals::PB14>;
    type PinPC6 = embassy_stm32::Peri<'static, peripherals::PC6>;
    type PinPC3 = embassy_stm32::Peri<'static, peripherals::PC3>;
    type PinPC2 = embassy_stm32::Peri<'static, peripherals::PC2>;
    type ExtiChannel = embassy_stm32::Peri<'static, peripherals::EXTI2>;
    type DmaTx = embassy_stm32::Peri<'static, peripherals::DMA1_CH4>;
    type DmaRx = embassy_stm32::Peri<'static, peripherals::DMA1_CH3>;

    struct NetworkPeripherals {
        spi: SpiPeripheral,
        sck: PinPB13,
        mosi: PinPB15,
        miso: PinPB14,
        cs: PinPC6,
        reset: PinPC3,
        int: PinPC2,
        exti: ExtiChannel,
        dma_tx: DmaTx,
        dma_rx: DmaRx,
    }

    // RNG interrupt binding for hardware random number generator
    embassy_stm32::bind_interrupts!(struct RngIrqs {
        RNG => embassy_stm32::rng::InterruptHandler<peripherals::RNG>;
    });

    /// Thermal printers ship at 9600 baud
    const PRINTER_BAUD: u32 = 9600;

    /// SNTP retry spacing until the first sync succeeds
    const SNTP_RETRY_MS: u64 = 60_000;

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Dispenser firmware starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE, 32.768 kHz LSE (PC14/PC15)
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / 6 = 2 MHz PLL input, * 168 = 336 MHz VCO
        // VCO / 4 = 84 MHz SYSCLK, VCO / 7 = 48 MHz for the RNG
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        config.rcc.ls = LsConfig {
            rtc: embassy_stm32::rcc::RtcClockSource::LSE,
            lsi: false,
            lse: Some(LseConfig {
                frequency: Hertz(32_768),
                mode: LseMode::Oscillator(embassy_stm32::rcc::LseDrive::MediumHigh),
            }),
        };

        let p = embassy_stm32::init(config);
        heap::init();

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        Mono::start(84_000_000);

        time::initialize_rtc(Rtc::new(p.RTC, RtcConfig::default()));

        let led = Output::new(p.PC1, Level::High, Speed::Low);

        let mut printer_config = usart::Config::default();
        printer_config.baudrate = PRINTER_BAUD;
        let printer = match UartTx::new(p.USART1, p.PB6, p.DMA2_CH7, printer_config) {
            Ok(printer) => printer,
            Err(e) => defmt::panic!("Printer UART config rejected: {:?}", e),
        };

        let device = FeatherPeripherals {
            pump: Output::new(p.PB8, Level::Low, Speed::Low),
            ir: Input::new(p.PB9, Pull::Up),
            adc: Adc::new(p.ADC1),
            moisture_pin: p.PA4.degrade_adc(),
            printer,
        };

        let net_periph = NetworkPeripherals {
            spi: p.SPI2,
            sck: p.PB13,
            mosi: p.PB15,
            miso: p.PB14,
            cs: p.PC6,
            reset: p.PC3,
            int: p.PC2,
            exti: p.EXTI2,
            dma_tx: p.DMA1_CH4,
            dma_rx: p.DMA1_CH3,
        };

        heartbeat::spawn().ok();
        network_task::spawn(net_periph, p.RNG, device).ok();

        (Shared {}, Local { led })
    }

    #[task(priority = 1, local = [led])]
    async fn heartbeat(cx: heartbeat::Context) {
        loop {
            cx.local.led.set_high();
            Mono::delay(100.millis()).await;
            cx.local.led.set_low();
            Mono::delay(4900.millis()).await;
        }
    }

    /// Network task: W5500 and embassy-net runners, the driver loop and the
    /// local API server, joined on one executor
    ///
    /// Stack is !Send and must remain within this task, as does the
    /// `RefCell<DeviceState>` the driver and the server share.
    #[task(priority = 1)]
    async fn network_task(
        _cx: network_task::Context,
        periph: NetworkPeripherals,
        rng_periph: embassy_stm32::Peri<'static, peripherals::RNG>,
        device: FeatherPeripherals,
    ) -> ! {
        use embassy_net::{Config, StackResources};
        use static_cell::StaticCell;

        let net_config = NetworkConfig::default();

        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(10_000_000); // 10 MHz for W5500

        let spi = Spi::new(
            periph.spi,
            periph.sck,
            periph.mosi,
            periph.miso,
            periph.dma_tx,
            periph.dma_rx,
            spi_config,
        );

        let eth_periph = eth::EthPeripherals {
            spi,
            cs: Output::new(periph.cs, Level::High, Speed::VeryHigh),
            reset: Output::new(periph.reset, Level::High, Speed::Low),
            int: ExtiInput::new(periph.int, periph.exti, Pull::Up),
        };

        let (device_net, w5500_runner) = match eth::init_w5500(eth_periph, net_config.mac_addr).await {
            Ok(parts) => parts,
            Err(e) => {
                error!("Ethernet unavailable: {}", e);
                loop {
                    Mono::delay(60.secs()).await;
                }
            }
        };

        // API server, HTTP client, SNTP and DNS sockets
        static RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();
        let (stack, mut net_runner) = embassy_net::new(
            device_net,
            Config::dhcpv4(Default::default()),
            RESOURCES.init(StackResources::new()),
            net_config.seed,
        );
        info!("Network stack initialized with DHCP");

        let hw_rng = RefCell::new(Rng::new(rng_periph, RngIrqs));
        let state = RefCell::new(DeviceState::new(config::gate_config(), HealthConfig::default()));

        let transport = HttpsClient::new(stack, rng::SharedRng::new(&hw_rng), tls_buffers::take());
        let client = RemoteStoreClient::new(
            config::store_config(),
            transport,
            BoardClock,
            embassy_time::Delay,
        );
        let appliance = FeatherAppliance::new(device, stack, config::weather_config());
        let mut driver = Driver::new(client, appliance);

        let driver_loop = async {
            manager::wait_for_config(stack).await;

            let sntp = SntpClient::new(SntpConfig::default());
            let mut resync = Cadence::new(sntp.config().resync_interval_ms);
            let mut retry = Cadence::new(SNTP_RETRY_MS);

            loop {
                let now_ms = BoardClock.now_ms();
                let sync_due = if time::is_time_synced() {
                    resync.due(now_ms)
                } else {
                    retry.due(now_ms)
                };
                if sync_due {
                    match sntp.sync(stack).await {
                        // the resync period starts from this sync
                        Ok(_) => {
                            resync.due(BoardClock.now_ms());
                        }
                        Err(e) => warn!("SNTP sync failed: {}", e),
                    }
                }

                driver.tick(&state, BoardClock.unix_secs()).await;
                Mono::delay(periods::QUEUE_TICK_MS.millis()).await;
            }
        };

        let api_server = async {
            manager::wait_for_config(stack).await;
            let mut ids = rng::SharedRng::new(&hw_rng);
            server::serve(stack, net_config.api_port, &state, &mut ids).await
        };

        let _ = join4(w5500_runner.run(), net_runner.run(), driver_loop, api_server).await;
        loop {
            Mono::delay(60.secs()).await;
        }
    }

    /// RTIC idle task - WFI sleep mode when no tasks active
    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }
}

use core::net::Ipv4Addr;

use alloc::string::String;
use defmt::{error, info, warn};
use embassy_executor::Spawner;
use embassy_net::{DhcpConfig, Ipv4Cidr, Runner, Stack, StackResources, StaticConfigV4};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use enumset::EnumSet;
use esp_hal::{gpio::Output, peripherals::WIFI, rng::Rng};
use esp_wifi::{
    wifi::{
        self, AccessPointConfiguration, WifiController, WifiDevice, WifiError, WifiEvent, WifiState,
    },
    EspWifiController,
};
use heapless::Vec;

use crate::web::{self, WebApp};
use crate::{mk_static, DeviceConfig};

const AP_SSID: &str = "clipbox";
const AP_PASSWORD: &str = "12345678";
const CONNECT_ATTEMPTS: usize = 5;

/// Raised by the management transport; the network comes up on the first signal.
pub(crate) static ENABLE: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Station credentials taken from the device config.
#[derive(Clone)]
pub struct Credentials {
    ssid: String,
    password: String,
}

impl Credentials {
    pub fn from_config(config: &DeviceConfig) -> Option<Self> {
        config.credentials().map(|(ssid, password)| Self {
            ssid: ssid.into(),
            password: password.into(),
        })
    }
}

/// Waits for the management service to be enabled, then brings up Wi-Fi and the web server.
#[embassy_executor::task]
pub async fn network_task(
    spawner: Spawner,
    esp_wifi_ctrl: &'static EspWifiController<'static>,
    wifi: WIFI<'static>,
    led: Output<'static>,
    rng: Rng,
    credentials: Option<Credentials>,
) {
    ENABLE.wait().await;
    info!("Bringing up the management network");

    let stack = match start_wifi(esp_wifi_ctrl, wifi, led, rng, credentials, &spawner).await {
        Ok(stack) => stack,
        Err(err) => {
            error!("Wi-Fi bring-up failed: {:?}", err);
            return;
        }
    };

    let web_app = WebApp::default();
    for id in 0..web::WEB_TASK_POOL_SIZE {
        spawner.must_spawn(web::web_task(id, stack, web_app.router, web_app.config));
    }
    info!("Web server started...");
}

pub async fn start_wifi(
    esp_wifi_ctrl: &'static EspWifiController<'static>,
    wifi: WIFI<'static>,
    led: Output<'static>,
    mut rng: Rng,
    credentials: Option<Credentials>,
    spawner: &Spawner,
) -> Result<Stack<'static>, WifiError> {
    let (controller, interfaces) = esp_wifi::wifi::new(esp_wifi_ctrl, wifi)?;
    info!("Device capabilities: {:?}", controller.capabilities());

    if let Some(credentials) = credentials {
        match start_wifi_sta(controller, led, interfaces.sta, &mut rng, credentials, spawner).await
        {
            Ok(stack) => Ok(stack),
            Err((err, controller, led)) => {
                warn!("Cannot join network ({:?}), opening access point", err);
                start_wifi_ap(controller, led, interfaces.ap, &mut rng, spawner).await
            }
        }
    } else {
        start_wifi_ap(controller, led, interfaces.ap, &mut rng, spawner).await
    }
}

pub async fn start_wifi_ap(
    mut controller: WifiController<'static>,
    led: Output<'static>,
    device: WifiDevice<'static>,
    rng: &mut Rng,
    spawner: &Spawner,
) -> Result<Stack<'static>, WifiError> {
    let net_seed = rng.random() as u64 | ((rng.random() as u64) << 32);

    let net_config = embassy_net::Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(Ipv4Addr::new(192, 168, 42, 1), 24),
        gateway: None,
        dns_servers: Vec::new(),
    });

    // Init network stack
    let (stack, runner) = embassy_net::new(
        device,
        net_config,
        mk_static!(StackResources<6>, StackResources::<6>::new()),
        net_seed,
    );

    let ap_config = AccessPointConfiguration {
        ssid: AP_SSID.into(),
        password: AP_PASSWORD.into(),
        channel: 6,
        auth_method: wifi::AuthMethod::WPA2Personal,
        ..Default::default()
    };

    controller.set_configuration(&wifi::Configuration::AccessPoint(ap_config))?;
    controller.start_async().await?;
    info!("Access point {} started", AP_SSID);

    spawner.spawn(connection_task(None, controller, led)).ok();
    spawner.spawn(net_task(runner)).ok();

    wait_for_connection(stack).await;

    Ok(stack)
}

pub async fn start_wifi_sta(
    mut controller: WifiController<'static>,
    led: Output<'static>,
    device: WifiDevice<'static>,
    rng: &mut Rng,
    credentials: Credentials,
    spawner: &Spawner,
) -> Result<Stack<'static>, (WifiError, WifiController<'static>, Output<'static>)> {
    let net_seed = rng.random() as u64 | ((rng.random() as u64) << 32);

    let dhcp_config = DhcpConfig::default();
    let net_config = embassy_net::Config::dhcpv4(dhcp_config);

    // Init network stack
    let (stack, runner) = embassy_net::new(
        device,
        net_config,
        mk_static!(StackResources<6>, StackResources::<6>::new()),
        net_seed,
    );

    let mut last_error = None;
    for _ in 0..CONNECT_ATTEMPTS {
        match wifi_connect(&credentials, &mut controller).await {
            Ok(_) => {
                last_error = None;
                break;
            }
            Err(err) => last_error = Some(err),
        }
    }
    if let Some(err) = last_error {
        controller.stop_async().await.ok();
        return Err((err, controller, led));
    }

    spawner
        .spawn(connection_task(Some(credentials), controller, led))
        .ok();
    spawner.spawn(net_task(runner)).ok();

    wait_for_connection(stack).await;

    Ok(stack)
}

async fn wait_for_connection(stack: Stack<'_>) {
    info!("Waiting for link to be up");
    loop {
        if stack.is_link_up() {
            break;
        }
        Timer::after(Duration::from_millis(500)).await;
    }

    info!("Waiting to get IP address...");
    loop {
        if let Some(config) = stack.config_v4() {
            info!("Got IP: {}", config.address);
            break;
        }
        Timer::after(Duration::from_millis(500)).await;
    }
}

#[embassy_executor::task]
async fn connection_task(
    credentials: Option<Credentials>,
    mut controller: WifiController<'static>,
    mut pin: Output<'static>,
) {
    info!("start connection task");
    let started_states = [WifiState::StaConnected, WifiState::ApStarted];
    let stopped_events = EnumSet::from_iter([WifiEvent::StaDisconnected, WifiEvent::ApStop]);
    loop {
        if started_states.contains(&esp_wifi::wifi::wifi_state()) {
            pin.set_high();
            // wait until we're no longer connected
            controller.wait_for_events(stopped_events, false).await;
            pin.set_low();
            Timer::after(Duration::from_millis(5000)).await
        }
        match &credentials {
            Some(credentials) => {
                wifi_connect(credentials, &mut controller).await.ok();
            }
            None => Timer::after(Duration::from_millis(5000)).await,
        }
    }
}

async fn wifi_connect(
    credentials: &Credentials,
    controller: &mut WifiController<'static>,
) -> Result<(), WifiError> {
    if !matches!(controller.is_started(), Ok(true)) {
        let client_config = wifi::Configuration::Client(wifi::ClientConfiguration {
            ssid: credentials.ssid.as_str().into(),
            password: credentials.password.as_str().into(),
            ..Default::default()
        });
        controller.set_configuration(&client_config)?;
        info!("Starting wifi");
        controller.start_async().await?;
        info!("Wifi started!");
    }
    info!("About to connect...");

    let connect_result = controller.connect_async().await;
    match connect_result {
        Ok(_) => {
            info!("Wifi connected!");
        }
        Err(e) => {
            warn!("Failed to connect to wifi: {:?}", e);
            Timer::after(Duration::from_millis(5000)).await;
        }
    }

    connect_result
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

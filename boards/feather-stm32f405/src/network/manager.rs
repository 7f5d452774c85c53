#![deny(unsafe_code)]
//! Link and address bookkeeping for the embassy-net stack

use alloc::format;
use alloc::string::String;

use defmt::info;
use embassy_net::Stack;

/// Wait for DHCP and log the lease
pub async fn wait_for_config(stack: Stack<'_>) {
    info!("Waiting for DHCP...");
    stack.wait_config_up().await;

    if let Some(config) = stack.config_v4() {
        let ip = config.address.address().octets();
        info!("IP: {}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]);
        if let Some(gateway) = config.gateway {
            let gw = gateway.octets();
            info!("Gateway: {}.{}.{}.{}", gw[0], gw[1], gw[2], gw[3]);
        }
    }
}

/// Link is up and DHCP has configured an address
pub fn is_online(stack: Stack<'_>) -> bool {
    stack.is_link_up() && stack.is_config_up()
}

/// Dotted-quad IPv4 address, if configured
pub fn ipv4_address(stack: Stack<'_>) -> Option<String> {
    let config = stack.config_v4()?;
    let ip = config.address.address().octets();
    Some(format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]))
}

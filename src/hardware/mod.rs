//! Instrument layer: GPIB transport, Keithley 236 driver and bus discovery.
//!
//! - [`gpib`]: bus addressing, status/error registers and the
//!   [`GpibTransport`](gpib::GpibTransport) trait every backend implements
//! - [`status`]: the serial poll status byte of the Keithley 236
//! - [`keithley236`]: the SMU driver with its event notification
//! - [`discovery`]: scanning a board and assigning DUT / gate roles
//! - [`mock`]: a simulated bench for tests and `--simulate`
//! - `visa`: the VISA backend (feature `instrument_visa`)

pub mod discovery;
pub mod gpib;
pub mod keithley236;
pub mod mock;
pub(crate) mod notifier;
pub mod status;
#[cfg(feature = "instrument_visa")]
pub mod visa;

use crate::config::{BusConfig, TransportBackend};
use crate::error::AppResult;
use gpib::{BusAddress, SharedTransport};
use keithley236::DriverTiming;
use mock::{Load, MockBus};
use std::sync::Arc;
use tracing::info;

/// Open the transport selected in the configuration.
///
/// # Errors
/// `FeatureNotEnabled` when the VISA backend is requested in a build
/// without `instrument_visa`.
pub fn open_transport(config: &BusConfig) -> AppResult<SharedTransport> {
    match config.backend {
        TransportBackend::Simulated => Ok(Arc::new(simulated_bench(config))),
        TransportBackend::Visa => open_visa(config),
    }
}

/// Driver delays for the configured backend. Simulated units settle
/// instantly, so `poll_interval_ms` only applies to real ones.
pub fn driver_timing(config: &BusConfig) -> DriverTiming {
    match config.backend {
        TransportBackend::Simulated => DriverTiming::immediate(),
        TransportBackend::Visa => DriverTiming {
            poll_interval: std::time::Duration::from_millis(config.poll_interval_ms),
            ..DriverTiming::default()
        },
    }
}

/// Simulated bench wired from `simulated_addresses`: the first unit drives
/// a graphene channel gated by the second; further units see a plain
/// 1 MΩ resistor.
pub fn simulated_bench(config: &BusConfig) -> MockBus {
    let board = config.board;
    let addresses = &config.simulated_addresses;
    let gate = addresses.get(1).map(|&primary| BusAddress::new(board, primary));
    let mut bus = MockBus::new();
    for (index, &primary) in addresses.iter().enumerate() {
        let load = match index {
            0 => Load::Channel { gate },
            1 => Load::Resistor(1.0e12),
            _ => Load::Resistor(1.0e6),
        };
        bus = bus.with_instrument(BusAddress::new(board, primary), load);
    }
    info!(board, units = addresses.len(), "simulated bench ready");
    bus
}

#[cfg(feature = "instrument_visa")]
fn open_visa(config: &BusConfig) -> AppResult<SharedTransport> {
    let timeout = std::time::Duration::from_millis(config.io_timeout_ms);
    Ok(Arc::new(visa::VisaBus::new(timeout)?))
}

#[cfg(not(feature = "instrument_visa"))]
fn open_visa(_config: &BusConfig) -> AppResult<SharedTransport> {
    Err(crate::error::DaqError::FeatureNotEnabled(
        "instrument_visa".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaqError;
    use crate::hardware::discovery::discover_k236;

    #[tokio::test]
    async fn test_simulated_backend_is_discoverable() {
        let config = BusConfig::default();
        let bus = open_transport(&config).unwrap();
        assert_eq!(bus.name(), "simulated");
        let found = discover_k236(bus.as_ref(), config.board).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[cfg(not(feature = "instrument_visa"))]
    #[test]
    fn test_visa_backend_requires_feature() {
        let config = BusConfig {
            backend: TransportBackend::Visa,
            ..BusConfig::default()
        };
        assert!(matches!(
            open_transport(&config),
            Err(DaqError::FeatureNotEnabled(_))
        ));
    }
}

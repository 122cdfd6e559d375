//! Keithley 236 discovery and role assignment.
//!
//! A scan clears the interface, looks for listeners on every primary
//! address, and asks each one for its identification with `U0X`. Units
//! whose answer contains "236" are candidates. The first two candidates
//! become the DUT evaluator and the gate generator.

use crate::config::BusConfig;
use crate::error::{AppResult, DaqError};
use crate::hardware::gpib::{BusAddress, GpibTransport};
use tracing::{debug, info, warn};

/// Highest valid GPIB primary address.
pub const MAX_PRIMARY_ADDRESS: u8 = 30;

const MODEL_MARKER: &str = "236";

/// A unit that identified itself as a Keithley 236.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredInstrument {
    /// Where it answered
    pub address: BusAddress,
    /// Raw `U0X` response
    pub identity: String,
}

/// Instruments assigned to the two bench roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentRoles {
    /// Drain-source evaluator
    pub dut: BusAddress,
    /// Gate voltage generator, absent on a single-unit bench
    pub gate: Option<BusAddress>,
}

/// Scan `board` for Keithley 236 units, in address order.
pub async fn discover_k236(bus: &dyn GpibTransport, board: u8) -> AppResult<Vec<DiscoveredInstrument>> {
    bus.interface_clear(board).await?;
    let candidates: Vec<u8> = (1..=MAX_PRIMARY_ADDRESS).collect();
    let listeners = bus.find_listeners(board, &candidates).await?;
    debug!(board, ?listeners, "listeners found");

    let mut found = Vec::new();
    for primary in listeners {
        let address = BusAddress::new(board, primary);
        let identity = match identify(bus, address).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(instrument = %address, error = %err, "no identification");
                continue;
            }
        };
        if identity.contains(MODEL_MARKER) {
            info!(instrument = %address, identity = %identity.trim(), "Keithley 236 found");
            found.push(DiscoveredInstrument { address, identity });
        } else {
            debug!(instrument = %address, identity = %identity.trim(), "skipping listener");
        }
    }
    Ok(found)
}

async fn identify(bus: &dyn GpibTransport, address: BusAddress) -> AppResult<String> {
    bus.device_clear(address).await?;
    bus.write(address, "U0X").await?;
    Ok(bus.read(address).await?)
}

/// Assign roles among discovered units.
///
/// One unit is the DUT evaluator only. With two or more, `preferred_dut`
/// wins if it is one of the first two; otherwise the first unit is the DUT
/// and the second the gate generator.
pub fn assign_roles(
    found: &[DiscoveredInstrument],
    board: u8,
    preferred_dut: Option<u8>,
) -> AppResult<InstrumentRoles> {
    match found {
        [] => Err(DaqError::NoInstrumentsFound(board)),
        [only] => Ok(InstrumentRoles {
            dut: only.address,
            gate: None,
        }),
        [first, second, ..] => {
            let prefers_second = preferred_dut == Some(second.address.primary);
            let (dut, gate) = if prefers_second {
                (second.address, first.address)
            } else {
                (first.address, second.address)
            };
            Ok(InstrumentRoles {
                dut,
                gate: Some(gate),
            })
        }
    }
}

/// Roles from fixed addresses in `config`, or from a bus scan when none
/// are configured.
pub async fn resolve_roles(bus: &dyn GpibTransport, config: &BusConfig) -> AppResult<InstrumentRoles> {
    if let Some(dut) = config.dut_address {
        let roles = InstrumentRoles {
            dut: BusAddress::new(config.board, dut),
            gate: config
                .gate_address
                .map(|gate| BusAddress::new(config.board, gate)),
        };
        debug!(dut = %roles.dut, gate = ?roles.gate, "using configured addresses");
        return Ok(roles);
    }
    let found = discover_k236(bus, config.board).await?;
    let roles = assign_roles(&found, config.board, config.preferred_dut)?;
    info!(dut = %roles.dut, gate = ?roles.gate, "instrument roles assigned");
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{Load, MockBus};

    fn unit(primary: u8) -> DiscoveredInstrument {
        DiscoveredInstrument {
            address: BusAddress::new(0, primary),
            identity: "236A07".into(),
        }
    }

    #[tokio::test]
    async fn test_discovery_skips_other_models() {
        let bus = MockBus::gfet_bench(0, 12, 14).with_listener(
            BusAddress::new(0, 5),
            "MODEL 2000",
            Load::Resistor(1.0),
        );
        let found = discover_k236(&bus, 0).await.unwrap();
        let addresses: Vec<u8> = found.iter().map(|d| d.address.primary).collect();
        assert_eq!(addresses, vec![12, 14]);
    }

    #[tokio::test]
    async fn test_discovery_on_empty_bus() {
        let bus = MockBus::new();
        assert!(discover_k236(&bus, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configured_addresses_skip_scan() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        let config = BusConfig {
            dut_address: Some(14),
            gate_address: Some(12),
            ..BusConfig::default()
        };
        let roles = resolve_roles(&bus, &config).await.unwrap();
        assert_eq!(roles.dut, BusAddress::new(0, 14));
        assert_eq!(roles.gate, Some(BusAddress::new(0, 12)));
        assert!(bus.calls().is_empty());
    }

    #[tokio::test]
    async fn test_scan_with_preference() {
        let bus = MockBus::gfet_bench(0, 12, 14);
        let config = BusConfig {
            preferred_dut: Some(14),
            ..BusConfig::default()
        };
        let roles = resolve_roles(&bus, &config).await.unwrap();
        assert_eq!(roles.dut.primary, 14);
        assert_eq!(roles.gate.map(|g| g.primary), Some(12));
    }

    #[test]
    fn test_no_units() {
        assert!(matches!(
            assign_roles(&[], 0, None),
            Err(DaqError::NoInstrumentsFound(0))
        ));
    }

    #[test]
    fn test_single_unit_has_no_gate() {
        let roles = assign_roles(&[unit(7)], 0, Some(3)).unwrap();
        assert_eq!(roles.dut.primary, 7);
        assert_eq!(roles.gate, None);
    }

    #[test]
    fn test_preferred_dut() {
        let found = [unit(12), unit(14), unit(16)];
        let roles = assign_roles(&found, 0, Some(14)).unwrap();
        assert_eq!(roles.dut.primary, 14);
        assert_eq!(roles.gate.unwrap().primary, 12);

        // A preference outside the first two is ignored.
        let roles = assign_roles(&found, 0, Some(16)).unwrap();
        assert_eq!(roles.dut.primary, 12);
        assert_eq!(roles.gate.unwrap().primary, 14);
    }
}

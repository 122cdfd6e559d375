//! Keithley 236 serial-poll status byte.
//!
//! The SRQ mask programmed with `M<mask>,0X` uses the same bit values as the
//! status byte returned by a serial poll. Bit 6 (0x40) is the IEEE-488
//! "request service" bit and is never part of the mask.

use bitflags::bitflags;

bitflags! {
    /// Status byte returned by a serial poll.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusByte: u8 {
        /// Warning condition pending (read with `U9X`)
        const WARNING = 0x01;
        /// Sweep finished, buffer ready
        const SWEEP_DONE = 0x02;
        /// Trigger out pulse issued
        const TRIGGER_OUT = 0x04;
        /// A reading is available
        const READING_DONE = 0x08;
        /// Armed and waiting for a trigger
        const READY_FOR_TRIGGER = 0x10;
        /// Error condition pending (read with `U1X`)
        const ERROR = 0x20;
        /// Device is requesting service
        const SERVICE_REQUEST = 0x40;
        /// Source is clamped at the compliance limit
        const COMPLIANCE = 0x80;
    }
}

/// Semantic condition carried by a status byte.
///
/// Variants are declared in handling priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusEvent {
    /// Source clamped at the compliance limit
    Compliance,
    /// Instrument error pending
    Error,
    /// Instrument warning pending
    Warning,
    /// Sweep buffer ready
    SweepDone,
    /// Trigger out issued
    TriggerOut,
    /// Armed and waiting for a trigger
    ReadyForTrigger,
    /// Single reading available
    ReadingDone,
}

/// Events in the order a status handler must process them.
pub const EVENT_PRIORITY: [StatusEvent; 7] = [
    StatusEvent::Compliance,
    StatusEvent::Error,
    StatusEvent::Warning,
    StatusEvent::SweepDone,
    StatusEvent::TriggerOut,
    StatusEvent::ReadyForTrigger,
    StatusEvent::ReadingDone,
];

impl StatusEvent {
    /// Status bit carrying this event.
    pub fn bit(self) -> StatusByte {
        match self {
            StatusEvent::Compliance => StatusByte::COMPLIANCE,
            StatusEvent::Error => StatusByte::ERROR,
            StatusEvent::Warning => StatusByte::WARNING,
            StatusEvent::SweepDone => StatusByte::SWEEP_DONE,
            StatusEvent::TriggerOut => StatusByte::TRIGGER_OUT,
            StatusEvent::ReadyForTrigger => StatusByte::READY_FOR_TRIGGER,
            StatusEvent::ReadingDone => StatusByte::READING_DONE,
        }
    }
}

impl StatusByte {
    /// SRQ mask used while sourcing a DC level.
    pub const SOURCE_SRQ_MASK: StatusByte = StatusByte::COMPLIANCE
        .union(StatusByte::ERROR)
        .union(StatusByte::READY_FOR_TRIGGER)
        .union(StatusByte::READING_DONE)
        .union(StatusByte::WARNING);

    /// SRQ mask used while a sweep is armed.
    pub const SWEEP_SRQ_MASK: StatusByte = StatusByte::COMPLIANCE
        .union(StatusByte::SWEEP_DONE)
        .union(StatusByte::READY_FOR_TRIGGER);

    /// Decode into events, highest priority first.
    ///
    /// The request-service bit carries no event of its own.
    pub fn events(self) -> Vec<StatusEvent> {
        EVENT_PRIORITY
            .into_iter()
            .filter(|event| self.contains(event.bit()))
            .collect()
    }

    /// True when the device raised a service request.
    pub fn requests_service(self) -> bool {
        self.contains(StatusByte::SERVICE_REQUEST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compliance_and_sweep_done() {
        let byte = StatusByte::from_bits_retain(0x80 | 0x02);
        assert_eq!(
            byte.events(),
            vec![StatusEvent::Compliance, StatusEvent::SweepDone]
        );
    }

    #[test]
    fn test_decoding_is_deterministic() {
        for raw in 0..=u8::MAX {
            let byte = StatusByte::from_bits_retain(raw);
            assert_eq!(byte.events(), byte.events());
            assert_eq!(byte.events().len(), (raw & !0x40).count_ones() as usize);
        }
    }

    #[test]
    fn test_priority_order() {
        let all = StatusByte::all();
        assert_eq!(all.events(), EVENT_PRIORITY.to_vec());
    }

    #[test]
    fn test_service_request_bit_has_no_event() {
        let byte = StatusByte::SERVICE_REQUEST;
        assert!(byte.requests_service());
        assert!(byte.events().is_empty());
    }

    #[test]
    fn test_srq_masks() {
        assert_eq!(StatusByte::SOURCE_SRQ_MASK.bits(), 185);
        assert_eq!(StatusByte::SWEEP_SRQ_MASK.bits(), 146);
    }
}

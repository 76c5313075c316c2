/// Private interfaces for the Emdali transceiver
///
/// Back-ends should not use this module.
/// Backward-incompatible changes can be made without major version bump.
use crate::phy::PhyEvent;

pub trait DynamicEventSink {
    /// Returns `false` if the event was dropped.
    fn try_push(&self, event: PhyEvent) -> bool;
}

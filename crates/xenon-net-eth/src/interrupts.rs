/// Interrupt-controller priority assigned to the Ethernet function.
pub const PRIO_ENET: u8 = 0x4C;

/// Delivery end of the interrupt fabric.
///
/// Called from the worker thread as well as from the guest-execution context (mask and status
/// writes), so implementations must be thread-safe and must not call back into the device.
pub trait InterruptSink: Send + Sync {
    /// Asserts the interrupt line for `prio`.
    fn route_interrupt(&self, prio: u8);

    /// Deasserts the interrupt line for `prio`.
    fn cancel_interrupt(&self, prio: u8);
}

impl<T: InterruptSink + ?Sized> InterruptSink for std::sync::Arc<T> {
    fn route_interrupt(&self, prio: u8) {
        (**self).route_interrupt(prio)
    }

    fn cancel_interrupt(&self, prio: u8) {
        (**self).cancel_interrupt(prio)
    }
}

impl InterruptSink for () {
    fn route_interrupt(&self, _prio: u8) {}

    fn cancel_interrupt(&self, _prio: u8) {}
}

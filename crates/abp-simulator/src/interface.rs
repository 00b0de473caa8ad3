use bytes::Bytes;

/// What the simulator offers a node while it handles one event.
pub trait SystemContext {
    /// Put a datagram on the simulated channel toward the peer node.
    fn send_datagram(&mut self, datagram: Bytes);

    /// Start timer `timer_id`, firing after `delay_ms`.
    fn start_timer(&mut self, delay_ms: u64, timer_id: u32);

    /// Cancel timer `timer_id`. A pending expiry is discarded.
    fn cancel_timer(&mut self, timer_id: u32);

    /// Hand bytes to the application on top of this node.
    fn deliver_data(&mut self, data: &[u8]);

    fn log(&mut self, message: &str);

    /// Current simulation time in ms.
    fn now(&self) -> u64;
}

/// A protocol endpoint driven by simulator events.
pub trait ProtocolNode {
    fn init(&mut self, _ctx: &mut dyn SystemContext) {}

    fn on_datagram(&mut self, ctx: &mut dyn SystemContext, datagram: &[u8]);

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32);

    /// The application wants `data` sent reliably.
    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]);
}

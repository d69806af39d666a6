//! Capability/Callback Surface (§2.1-M): an enum-dispatched trait object
//! with one method per lifecycle event, so a single implementer can hold
//! whatever state it needs across callbacks without a closure-capture dance.

/// Application hooks the engine calls back into. A no-op default is
/// provided for every method so implementers only override what they use.
pub trait Callbacks {
    fn on_connected(&mut self) {}
    fn on_registered(&mut self, _topic_id: u16, _topic_name: &str) {}
    fn on_message(&mut self, _topic_id: u16, _payload: &[u8]) {}
    fn on_subscribed(&mut self, _topic_id: u16) {}
    fn on_disconnected(&mut self) {}
}

/// A [`Callbacks`] implementation that ignores every event, used where no
/// application hook is configured.
#[derive(Default)]
pub struct NullCallbacks;

impl Callbacks for NullCallbacks {}

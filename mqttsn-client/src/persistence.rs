//! Persistence Collaborator (§6): the storage capability the engine calls
//! into once a block transfer completes. The engine never implements
//! storage itself — file writes, flash wear-levelling and the like are the
//! embedder's concern.

/// A storage sink for completed block transfers. On failure the engine
/// logs and proceeds; a rejected save never aborts the session.
pub trait Persistence {
    /// Persist `bytes` under a name derived from the block id and sniffed
    /// file type. Returns whether the save succeeded.
    fn save_block(&mut self, suggested_name: &str, bytes: &[u8]) -> bool;

    /// Whether the backing store can currently accept a save.
    fn is_storage_ready(&self) -> bool {
        true
    }
}

/// A [`Persistence`] implementation that accepts nothing, used where no
/// storage collaborator is configured.
#[derive(Default)]
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn save_block(&mut self, _suggested_name: &str, _bytes: &[u8]) -> bool {
        false
    }

    fn is_storage_ready(&self) -> bool {
        false
    }
}

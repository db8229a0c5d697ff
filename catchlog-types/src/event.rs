use crate::identity::Identity;

/// Identity lifecycle notifications published by the identity controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    /// The active identity changed. `None` means no identity was/is active.
    Changed {
        previous: Option<Identity>,
        new: Option<Identity>,
    },
    /// Post-login merge finished; background work for `owner_id` may start.
    ///
    /// Advisory. The identity controller starts the migration itself right
    /// after publishing this, within the same transition, so subscribers
    /// must not start it a second time.
    DataReady { owner_id: String, is_guest: bool },
}

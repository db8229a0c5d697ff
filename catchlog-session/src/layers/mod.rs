//! Built-in persistence layers.

mod in_flight;
mod key_material;
mod kv;
mod navigation;
mod pending_writes;
mod record_cache;

pub use in_flight::InFlightRegistry;
pub use key_material::KeyMaterialLayer;
pub use kv::KvLayer;
pub use navigation::NavigationState;
pub use pending_writes::{FlushMode, PendingWrite, PendingWriteQueue};
pub use record_cache::RecordCache;

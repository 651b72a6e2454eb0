pub mod lock;
pub mod store;

pub use lock::{MemoryDistributedLock, TokenGuard};
pub use store::MemoryStateStore;

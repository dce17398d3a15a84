pub mod lock;

pub use lock::{AcquireFlags, LockFile, ProfileLock, ProfileLockGuard};

mod id_vec;
pub use id_vec::IdVec;

mod timer;
pub use timer::Timer;

/// Timestamps and run codes
mod clock;
pub use clock::{now_ts, RunCodes};

pub type Hasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, Hasher>;
pub type HashSet<T> = std::collections::HashSet<T, Hasher>;

//! Caches kept coherent with remote mutations.
//!
//! Every inspector guards its cache with one mutex held across lookup, remote
//! call and patch. A successful mutation patches the cached snapshot in place;
//! a failed one leaves it untouched.
pub mod file;
pub mod key_value;
pub mod sql;

pub use file::FileInspector;
pub use key_value::{CachedEntry, CachedValue, KeyValueInspector};
pub use sql::SqlInspector;

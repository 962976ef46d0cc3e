//! Rule Store Module
//!
//! Persisted allow/deny rule sets (whitelist/blacklist) matched against a
//! hardware identity plus optional serial and device class.
//!
//! ## Structure
//! - `types`: Rule, RuleList, line format parse/serialize
//! - `store`: RuleStore - the two persisted lists and the match API
//! - `watcher`: notify-based reload when a rule file is edited externally
//!
//! The two lists are queried independently; the authorization engine
//! defines precedence (deny before allow).

pub mod store;
pub mod types;
pub mod watcher;

pub use store::{RuleFile, RuleStore, RuleStoreError};
pub use types::{Rule, RuleList};
pub use watcher::spawn_watcher;

//! Project configuration (treb.toml)
//!
//! Declares networks, senders, fork node settings and the script runner.

pub mod parser;
pub mod schema;
pub mod store;

pub use parser::{parse_treb_toml, parse_treb_toml_str, to_toml};
pub use schema::{ForkSettings, RpcEndpoint, ScriptSettings, TrebConfig};
pub use store::{CONFIG_FILE_NAME, ConfigStore};

//! redb table definitions for the Warden state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). The primary record is a singleton under a fixed key; license
//! tables use `{product}:{id}` composite keys.

use redb::TableDefinition;

/// Settings keyed by the wire key string.
pub const SETTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");

/// Heartbeat health records keyed by `{vm_id}`.
pub const HEALTH: TableDefinition<&str, &[u8]> = TableDefinition::new("health");

/// The singleton primary election record, under [`PRIMARY_KEY`].
pub const PRIMARY: TableDefinition<&str, &[u8]> = TableDefinition::new("primary");

/// License stock keyed by `{product}:{checksum}`.
pub const LICENSE_STOCK: TableDefinition<&str, &[u8]> = TableDefinition::new("license_stock");

/// License usage keyed by `{product}:{vm_id}`.
pub const LICENSE_USAGE: TableDefinition<&str, &[u8]> = TableDefinition::new("license_usage");

/// Fixed key of the singleton row in [`PRIMARY`].
pub const PRIMARY_KEY: &str = "primary";

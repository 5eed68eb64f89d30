use redb::TableDefinition;

/// File records: uuid -> FileRecord (msgpack)
pub const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");

/// Project index: project id -> uuid of the single file holding it
pub const PROJECT_FILES: TableDefinition<i64, &str> = TableDefinition::new("project_files");

/// Owner index: owner id -> msgpack Vec of file UUIDs
pub const OWNER_FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("owner_files");

/// Object key index: object key -> uuid (keys are never reused)
pub const OBJECT_KEYS: TableDefinition<&str, &str> = TableDefinition::new("object_keys");

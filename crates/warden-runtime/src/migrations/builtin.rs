//! Built-in coordination schema.

use super::runner::Migration;

const WARDEN_INTERNAL_SQL: &str = include_str!("../../migrations/0000_warden_internal.sql");

/// Migrations applied before any extra ones, in order.
pub fn get_builtin_migrations() -> Vec<Migration> {
    vec![Migration::new("0000_warden_internal", WARDEN_INTERNAL_SQL)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let migrations = get_builtin_migrations();
        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].name, "0000_warden_internal");
    }

    #[test]
    fn test_schema_defines_coordination_tables() {
        let sql = &get_builtin_migrations()[0].sql;

        assert!(sql.contains("CREATE TABLE IF NOT EXISTS nodes"));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS cluster"));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS intercom"));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS instances"));
        assert!(sql.contains("PRIMARY KEY (guild_id, node)"));
    }
}

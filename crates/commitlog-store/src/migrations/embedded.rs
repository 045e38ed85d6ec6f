//! Embedded SQL migrations

/// Migration metadata
pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

/// All embedded migrations in application order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            id: "001_commit_journal",
            sql: include_str!("../../migrations/001_commit_journal.sql"),
        },
        Migration {
            id: "002_entity_registry",
            sql: include_str!("../../migrations/002_entity_registry.sql"),
        },
    ]
}

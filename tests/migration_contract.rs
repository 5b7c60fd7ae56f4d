use std::path::PathBuf;

fn migration_sql() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations/0001_init.sql");
    std::fs::read_to_string(&path).expect("init migration should exist")
}

#[test]
fn migration_defines_every_core_table() {
    let sql = migration_sql().to_lowercase();
    for table in ["runs", "skills", "events", "threads", "thread_messages"] {
        assert!(
            sql.contains(&format!("create table if not exists {}", table)),
            "missing table definition: {}",
            table
        );
    }
}

#[test]
fn run_status_column_is_constrained_to_known_states() {
    let sql = migration_sql().to_lowercase();
    for status in ["'pending'", "'running'", "'success'", "'failed'", "'error'"] {
        assert!(sql.contains(status), "status constraint missing {}", status);
    }
}

#[test]
fn terminal_runs_are_guarded_by_trigger() {
    let sql = migration_sql().to_lowercase();
    assert!(sql.contains("forbid_terminal_transition"));
    assert!(sql.contains("runs_terminal_guard"));
}

#[test]
fn updated_at_is_touched_on_update() {
    let sql = migration_sql().to_lowercase();
    assert!(sql.contains("touch_updated_at"));
    assert!(sql.contains("before update on runs"));
}

#[test]
fn every_table_has_row_level_security_enabled() {
    let sql = migration_sql().to_lowercase();
    for table in ["runs", "skills", "events", "threads", "thread_messages"] {
        assert!(
            sql.contains(&format!("alter table {} enable row level security", table)),
            "row level security not enabled on {}",
            table
        );
        assert!(!sql.contains("disable row level security"));
    }
}

#[test]
fn skills_and_events_have_no_update_or_delete_policy() {
    let sql = migration_sql().to_lowercase();
    // Append-only tables get select+insert policies and nothing broader.
    assert!(sql.contains("skills_service_insert"));
    assert!(sql.contains("events_service_insert"));
    assert!(!sql.contains("skills_service_all"));
    assert!(!sql.contains("events_service_all"));
}

#[test]
fn thread_messages_cascade_with_their_thread() {
    let sql = migration_sql().to_lowercase();
    assert!(sql.contains("references threads (id) on delete cascade"));
}

// SQL query constants for repositories
// Centralizes repeated SELECT column lists

/// SQL query fragments for jobs table
pub mod job_queries {
    /// All columns for jobs. `interval` and `on` are reserved words and
    /// must stay quoted.
    pub const SELECT_ALL_COLUMNS: &str = r#"id, owner_id, name, method, input_data,
        destination_token, "interval", "on", active, message, message_status,
        created_at, updated_at"#;
}

/// SQL query fragments for tasks table
pub mod task_queries {
    /// All columns for tasks with NULL handling via COALESCE
    pub const SELECT_ALL_COLUMNS: &str = r#"id, job_id, started_at, finished_at, outcome,
        COALESCE(detail, '{}'::jsonb) as detail, created_at"#;
}

// Replication tables. Resource tables are addressed by name through
// `replication::resources`, not through the query builder.

diesel::table! {
    replication_state (id) {
        id -> Integer,
        last_processed_task_id -> Nullable<BigInt>,
        active_version -> Nullable<BigInt>,
        readonly -> Integer,
        updated_at -> Text,
    }
}

diesel::table! {
    resync_attempts (id) {
        id -> BigInt,
        sync_started_at -> Text,
        sync_finished_at -> Nullable<Text>,
        sync_status -> Text,
        sync_tasks_status -> Text,
        stale -> Integer,
    }
}

diesel::table! {
    tasks (id) {
        id -> BigInt,
        #[sql_name = "type"]
        task_type -> Text,
        data_type -> Text,
        resource_id -> Nullable<Text>,
        data -> Nullable<Text>,
        transaction_id -> Text,
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(replication_state, resync_attempts, tasks,);

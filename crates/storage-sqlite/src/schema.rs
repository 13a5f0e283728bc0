// Bookkeeping tables created by the embedded migrations. User tables are
// created at open time from the declared schema and queried with `sql_query`.

diesel::table! {
    sync_nodes (url) {
        url -> Text,
        protocol -> Text,
        synced_revision -> BigInt,
        connected -> Bool,
        created_at -> Text,
        last_synced_at -> Nullable<Text>,
    }
}

diesel::table! {
    sync_changes (rev) {
        rev -> BigInt,
        table_name -> Text,
        record_key -> Text,
        kind -> Text,
        value -> Nullable<Text>,
    }
}

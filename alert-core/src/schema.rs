use diesel::{allow_tables_to_appear_in_same_query, table};

table! {
    admin_telegram_bindings (id) {
        id -> BigInt,
        sid -> Text,
        user_id -> BigInt,
        telegram_user_id -> BigInt,
        telegram_username -> Nullable<Text>,
        language -> Text,
        notify_node_offline -> Bool,
        notify_node_online -> Bool,
        notify_agent_offline -> Bool,
        notify_agent_online -> Bool,
        notify_new_user -> Bool,
        notify_payment_success -> Bool,
        notify_daily_summary -> Bool,
        notify_weekly_summary -> Bool,
        notify_resource_expiring -> Bool,
        offline_threshold_minutes -> Integer,
        resource_expiring_days -> Integer,
        daily_summary_hour -> Integer,
        weekly_summary_hour -> Integer,
        weekly_summary_weekday -> Integer,
        offline_check_interval_minutes -> Integer,
        last_node_offline_notify_at -> Nullable<Timestamptz>,
        last_agent_offline_notify_at -> Nullable<Timestamptz>,
        last_daily_summary_at -> Nullable<Timestamptz>,
        last_weekly_summary_at -> Nullable<Timestamptz>,
        last_resource_expiring_notify_date -> Nullable<Date>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

table! {
    nodes (id) {
        id -> BigInt,
        sid -> Text,
        name -> Text,
        status -> Text,
        last_seen_at -> Nullable<Timestamptz>,
        mute_notification -> Bool,
        expires_at -> Nullable<Timestamptz>,
        deleted_at -> Nullable<Timestamptz>,
    }
}

table! {
    forward_agents (id) {
        id -> BigInt,
        sid -> Text,
        name -> Text,
        status -> Text,
        last_seen_at -> Nullable<Timestamptz>,
        mute_notification -> Bool,
        expires_at -> Nullable<Timestamptz>,
        deleted_at -> Nullable<Timestamptz>,
    }
}

table! {
    users (id) {
        id -> BigInt,
        created_at -> Timestamptz,
    }
}

table! {
    subscriptions (id) {
        id -> BigInt,
        created_at -> Timestamptz,
    }
}

table! {
    subscription_usage_stats (id) {
        id -> BigInt,
        subscription_id -> BigInt,
        granularity -> Text,
        period -> Date,
        upload -> BigInt,
        download -> BigInt,
    }
}

allow_tables_to_appear_in_same_query!(
    admin_telegram_bindings,
    nodes,
    forward_agents,
    users,
    subscriptions,
    subscription_usage_stats,
);

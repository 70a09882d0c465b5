diesel::table! {
    archives (id) {
        id -> Int4,
        org_id -> Int4,
        archive_type -> Varchar,
        period -> Varchar,
        start_date -> Date,
        created_on -> Timestamptz,
        record_count -> Int8,
        size -> Int8,
        hash -> Text,
        url -> Text,
        build_time -> Int8,
        needs_deletion -> Bool,
        deleted_on -> Nullable<Timestamptz>,
        rollup_id -> Nullable<Int4>,
    }
}

diesel::table! {
    orgs (id) {
        id -> Int4,
        name -> Varchar,
        created_on -> Timestamptz,
        is_anon -> Bool,
        is_active -> Bool,
    }
}

diesel::table! {
    messages (id) {
        id -> Int8,
        org_id -> Int4,
        broadcast_id -> Nullable<Int8>,
        contact_id -> Int8,
        contact_urn_id -> Nullable<Int8>,
        channel_id -> Nullable<Int4>,
        flow_id -> Nullable<Int4>,
        text -> Text,
        attachments -> Nullable<Array<Text>>,
        direction -> Varchar,
        msg_type -> Varchar,
        status -> Varchar,
        visibility -> Varchar,
        created_on -> Timestamptz,
        sent_on -> Nullable<Timestamptz>,
        modified_on -> Timestamptz,
    }
}

diesel::table! {
    labels (id) {
        id -> Int4,
        uuid -> Uuid,
        name -> Varchar,
    }
}

diesel::table! {
    message_labels (id) {
        id -> Int8,
        message_id -> Int8,
        label_id -> Int4,
    }
}

diesel::table! {
    contacts (id) {
        id -> Int8,
        uuid -> Uuid,
        name -> Nullable<Varchar>,
    }
}

diesel::table! {
    contact_urns (id) {
        id -> Int8,
        identity -> Varchar,
    }
}

diesel::table! {
    channels (id) {
        id -> Int4,
        uuid -> Uuid,
        name -> Nullable<Varchar>,
    }
}

diesel::table! {
    flows (id) {
        id -> Int4,
        uuid -> Uuid,
        name -> Varchar,
    }
}

diesel::table! {
    broadcasts (id) {
        id -> Int8,
        org_id -> Int4,
        schedule_id -> Nullable<Int4>,
        created_on -> Timestamptz,
    }
}

diesel::table! {
    broadcast_contacts (id) {
        id -> Int8,
        broadcast_id -> Int8,
        contact_id -> Int8,
    }
}

diesel::table! {
    broadcast_groups (id) {
        id -> Int8,
        broadcast_id -> Int8,
        contactgroup_id -> Int4,
    }
}

diesel::table! {
    broadcast_urns (id) {
        id -> Int8,
        broadcast_id -> Int8,
        contacturn_id -> Int8,
    }
}

diesel::table! {
    flow_runs (id) {
        id -> Int8,
        uuid -> Uuid,
        org_id -> Int4,
        flow_id -> Int4,
        contact_id -> Int8,
        start_id -> Nullable<Int8>,
        responded -> Bool,
        path -> Nullable<Text>,
        results -> Nullable<Text>,
        created_on -> Timestamptz,
        modified_on -> Timestamptz,
        exited_on -> Nullable<Timestamptz>,
        exit_type -> Nullable<Varchar>,
        status -> Varchar,
    }
}

diesel::table! {
    flow_starts (id) {
        id -> Int8,
        org_id -> Int4,
        created_on -> Timestamptz,
    }
}

diesel::table! {
    flow_start_contacts (id) {
        id -> Int8,
        flowstart_id -> Int8,
        contact_id -> Int8,
    }
}

diesel::table! {
    flow_start_groups (id) {
        id -> Int8,
        flowstart_id -> Int8,
        contactgroup_id -> Int4,
    }
}

diesel::joinable!(message_labels -> messages (message_id));
diesel::joinable!(message_labels -> labels (label_id));
diesel::joinable!(broadcast_contacts -> broadcasts (broadcast_id));
diesel::joinable!(broadcast_groups -> broadcasts (broadcast_id));
diesel::joinable!(broadcast_urns -> broadcasts (broadcast_id));
diesel::joinable!(flow_start_contacts -> flow_starts (flowstart_id));
diesel::joinable!(flow_start_groups -> flow_starts (flowstart_id));

diesel::allow_tables_to_appear_in_same_query!(broadcasts, messages);
diesel::allow_tables_to_appear_in_same_query!(flow_starts, flow_runs);
diesel::allow_tables_to_appear_in_same_query!(message_labels, labels, messages);

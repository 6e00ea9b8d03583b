diesel::table! {
    chat_users (id) {
        id -> Integer,
        telegram_id -> BigInt,
        username -> Nullable<Text>,
        is_in_bot -> Bool,
        upload_count -> BigInt,
        validation_count -> BigInt,
        joined_at -> Timestamp,
    }
}

diesel::table! {
    requests (id) {
        id -> Integer,
        doi -> Text,
        title -> Nullable<Text>,
        chat_id -> BigInt,
        requester_id -> Nullable<Integer>,
        status -> Text,
        created_at -> Timestamp,
        expires_at -> Timestamp,
        request_message_id -> BigInt,
    }
}

diesel::table! {
    pdf_uploads (id) {
        id -> Integer,
        request_id -> Integer,
        uploader_id -> Integer,
        storage_reference -> Text,
        file_id -> Text,
        uploaded_at -> Timestamp,
        is_valid -> Nullable<Bool>,
        validated_at -> Nullable<Timestamp>,
        delete_at -> Nullable<Timestamp>,
        chat_message_id -> BigInt,
        vote_message_id -> Nullable<BigInt>,
    }
}

diesel::table! {
    validations (id) {
        id -> Integer,
        pdf_upload_id -> Integer,
        voter_id -> Integer,
        vote -> Bool,
        voted_at -> Timestamp,
    }
}

diesel::table! {
    subscriptions (id) {
        id -> Integer,
        user_id -> Integer,
        start_date -> Timestamp,
        end_date -> Timestamp,
        reason -> Text,
        milestone -> BigInt,
    }
}

diesel::table! {
    scheduled_deletions (id) {
        id -> Integer,
        chat_id -> BigInt,
        message_id -> BigInt,
        run_at -> Timestamp,
        attempts -> Integer,
        last_error -> Nullable<Text>,
    }
}

diesel::joinable!(requests -> chat_users (requester_id));
diesel::joinable!(pdf_uploads -> requests (request_id));
diesel::joinable!(pdf_uploads -> chat_users (uploader_id));
diesel::joinable!(validations -> pdf_uploads (pdf_upload_id));
diesel::joinable!(validations -> chat_users (voter_id));
diesel::joinable!(subscriptions -> chat_users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    chat_users,
    requests,
    pdf_uploads,
    validations,
    subscriptions,
    scheduled_deletions,
);

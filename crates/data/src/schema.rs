diesel::table! {
    messages (id) {
        id -> Int8,
        room_id -> Uuid,
        user_id -> Nullable<Uuid>,
        content -> Text,
        message_type -> Text,
        created_at -> Int8,
    }
}

diesel::table! {
    room_memberships (user_id, room_id) {
        user_id -> Uuid,
        room_id -> Uuid,
        joined_at -> Int8,
        is_active -> Bool,
    }
}

diesel::table! {
    rooms (id) {
        id -> Uuid,
        name -> Text,
        description -> Nullable<Text>,
        is_private -> Bool,
        passcode_hash -> Nullable<Text>,
        created_by -> Uuid,
        created_at -> Int8,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        username -> Text,
        email -> Text,
        password_hash -> Text,
        created_at -> Int8,
    }
}

diesel::joinable!(messages -> rooms (room_id));
diesel::joinable!(messages -> users (user_id));
diesel::joinable!(room_memberships -> rooms (room_id));
diesel::joinable!(room_memberships -> users (user_id));
diesel::joinable!(rooms -> users (created_by));

diesel::allow_tables_to_appear_in_same_query!(messages, room_memberships, rooms, users,);

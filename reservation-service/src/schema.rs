diesel::table! {
    stock_levels (target_kind, target_id) {
        target_kind -> Varchar,
        target_id -> Uuid,
        available_quantity -> Int4,
        reserved_quantity -> Int4,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    stock_reservations (id) {
        id -> Uuid,
        product_id -> Nullable<Uuid>,
        variant_id -> Nullable<Uuid>,
        quantity -> Int4,
        user_id -> Nullable<Uuid>,
        session_id -> Nullable<Varchar>,
        status -> Varchar,
        created_at -> Timestamptz,
        expires_at -> Timestamptz,
        order_id -> Nullable<Uuid>,
        release_reason -> Nullable<Varchar>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    stock_levels,
    stock_reservations,
);

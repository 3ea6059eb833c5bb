use proptest::prelude::*;

use batch_notify::batch::Recipient;

/// Recipients with unique names so order can be checked after partitioning
pub fn recipient_list_strategy(max_len: usize) -> impl Strategy<Value = Vec<Recipient>> {
    prop::collection::vec(
        (prop::option::of("[a-z]{3,8}@example\\.edu"), prop::option::of("\\+1[0-9]{10}")),
        0..max_len,
    )
    .prop_map(|contacts| {
        contacts
            .into_iter()
            .enumerate()
            .map(|(i, (email, phone))| Recipient {
                name: format!("recipient-{i}"),
                email,
                phone,
                username: None,
                password: None,
            })
            .collect()
    })
}

/// Cache operations over a small key space so collisions and evictions happen
#[derive(Debug, Clone)]
pub enum CacheOp {
    Set(u8),
    Get(u8),
}

pub fn cache_ops_strategy() -> impl Strategy<Value = Vec<CacheOp>> {
    prop::collection::vec(
        prop_oneof![
            (0u8..16).prop_map(CacheOp::Set),
            (0u8..16).prop_map(CacheOp::Get),
        ],
        1..200,
    )
}

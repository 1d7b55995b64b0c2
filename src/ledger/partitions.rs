/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `accounts`: acct:{user_id:020} -> Account (JSON)
/// - `operations`: op:{operation_id:020} -> Operation (JSON)
/// - `user_operations`: uop:{user_id:020}:{operation_id:020} -> empty
/// - `user_stats`: ustat:{user_id:020} -> UserStats (JSON)
/// - `metadata`: meta:{key} -> value (raw bytes)
///
/// Ids are zero-padded so lexicographic key order matches numeric order.

/// Metadata key holding the next operation id (u64, big-endian)
pub const NEXT_OPERATION_ID: &str = "next_operation_id";

/// Encode an account key: acct:{user_id:020}
pub fn encode_account_key(user_id: u64) -> Vec<u8> {
    format!("acct:{:020}", user_id).into_bytes()
}

/// Encode a user statistics key: ustat:{user_id:020}
pub fn encode_user_stats_key(user_id: u64) -> Vec<u8> {
    format!("ustat:{:020}", user_id).into_bytes()
}

/// Encode an operation key: op:{operation_id:020}
pub fn encode_operation_key(operation_id: u64) -> Vec<u8> {
    format!("op:{:020}", operation_id).into_bytes()
}

/// Decode an operation key: op:{operation_id:020} -> operation_id
pub fn decode_operation_key(key: &[u8]) -> Option<u64> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("op:")?.parse().ok()
}

/// Encode a per-user index key: uop:{user_id:020}:{operation_id:020}
pub fn encode_user_operation_key(user_id: u64, operation_id: u64) -> Vec<u8> {
    format!("uop:{:020}:{:020}", user_id, operation_id).into_bytes()
}

/// Encode a per-user prefix for range scan: uop:{user_id:020}:
pub fn encode_user_operation_prefix(user_id: u64) -> Vec<u8> {
    format!("uop:{:020}:", user_id).into_bytes()
}

/// Decode a per-user index key -> (user_id, operation_id)
pub fn decode_user_operation_key(key: &[u8]) -> Option<(u64, u64)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let (user, op) = key_str.strip_prefix("uop:")?.split_once(':')?;
    Some((user.parse().ok()?, op.parse().ok()?))
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

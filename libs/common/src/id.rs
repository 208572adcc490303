use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// ULIDs sort lexicographically by creation time, so prefixed ids of the
/// same kind can be ordered without a separate timestamp column.
///
/// # Examples
/// ```
/// let id = chat_common::id::prefixed_ulid("msg");
/// assert!(id.starts_with("msg_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Marker trait for types that represent a prefixed ID.
pub trait PrefixedId {
    const PREFIX: &'static str;

    fn generate() -> String {
        prefixed_ulid(Self::PREFIX)
    }
}

/// Well-known ID prefixes.
pub mod prefix {
    pub const USER: &str = "usr";
    pub const ROOM: &str = "room";
    pub const MEMBER: &str = "mem";
    pub const MESSAGE: &str = "msg";
    pub const CONNECTION: &str = "conn";
}

/// Returns true if `id` carries the given prefix followed by a well-formed ULID.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    match id.split_once('_') {
        Some((p, rest)) => p == prefix && Ulid::from_string(rest).is_ok(),
        None => false,
    }
}

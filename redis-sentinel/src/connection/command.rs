/// Commands that never modify the dataset and may be served by a replica.
const READ_ONLY_COMMANDS: &[&str] = &[
    "get",
    "bitcount",
    "bitpos",
    "getbit",
    "getrange",
    "strlen",
    "mget",
    "hget",
    "hgetall",
    "hkeys",
    "hlen",
    "hmget",
    "hexists",
    "hvals",
    "hstrlen",
    "hscan",
    "lindex",
    "llen",
    "lrange",
    "scard",
    "sismember",
    "smismember",
    "smembers",
    "srandmember",
    "sscan",
    "zcard",
    "zcount",
    "zlexcount",
    "zrange",
    "zrank",
    "zrevrange",
    "zrevrank",
    "zscore",
    "zscan",
    "zrangebyscore",
    "zrevrangebyscore",
    "zrangebylex",
    "zrevrangebylex",
    "exists",
    "keys",
    "scan",
    "type",
    "pttl",
    "ttl",
    "info",
    "memory",
];

/// Whether `name` is a read-only command, ignoring case.
pub fn is_read_only(name: &str) -> bool {
    READ_ONLY_COMMANDS
        .iter()
        .any(|command| command.eq_ignore_ascii_case(name))
}

/// Commands after which replicas hold no data the master lacks.
pub(crate) fn is_flush(name: &str) -> bool {
    name.eq_ignore_ascii_case("flushdb") || name.eq_ignore_ascii_case("flushall")
}

//! Lua scripts that make each queue operation a single atomic step.

use sigil_entity::job::Lane;

/// Claim a dedup key and push the job onto its lane.
///
/// KEYS[1] = dedup set
/// KEYS[2] = lane list
/// ARGV[1] = dedup key
/// ARGV[2] = job JSON
///
/// Returns:
///   1 = enqueued
///   0 = dedup key already claimed
pub const ENQUEUE_SCRIPT: &str = r#"
    if redis.call('SADD', KEYS[1], ARGV[1]) == 0 then
        return 0
    end
    redis.call('LPUSH', KEYS[2], ARGV[2])
    return 1
"#;

/// Pop from the first non-empty lane and record the job as processing.
///
/// KEYS[1..n-1] = lane lists in dequeue order
/// KEYS[n]      = processing hash
/// ARGV[1]      = dequeue epoch seconds
///
/// Returns the job JSON, or nil when every lane is empty.
pub const POP_SCRIPT: &str = r#"
    local processing_key = KEYS[#KEYS]
    for i = 1, #KEYS - 1 do
        local raw = redis.call('RPOP', KEYS[i])
        if raw then
            local ok, job = pcall(cjson.decode, raw)
            if ok and type(job) == 'table' and job.id then
                redis.call('HSET', processing_key, job.id, ARGV[1])
            end
            return raw
        end
    end
    return false
"#;

/// Resolve a job successfully.
///
/// KEYS[1] = processing hash
/// KEYS[2] = dedup set
/// ARGV[1] = job id
/// ARGV[2] = dedup key
pub const COMPLETE_SCRIPT: &str = r#"
    redis.call('HDEL', KEYS[1], ARGV[1])
    redis.call('SREM', KEYS[2], ARGV[2])
    return 1
"#;

/// Park a job for a delayed retry. The dedup key stays claimed.
///
/// KEYS[1] = processing hash
/// KEYS[2] = retry sorted set
/// ARGV[1] = job id
/// ARGV[2] = ready epoch seconds
/// ARGV[3] = retry member, see [`retry_member`]
pub const RETRY_SCRIPT: &str = r#"
    redis.call('HDEL', KEYS[1], ARGV[1])
    redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
    return 1
"#;

/// Move a job to the dead-letter list.
///
/// KEYS[1] = processing hash
/// KEYS[2] = dead-letter list
/// KEYS[3] = dedup set
/// ARGV[1] = job id
/// ARGV[2] = dead-letter entry JSON
/// ARGV[3] = dedup key
pub const DEAD_LETTER_SCRIPT: &str = r#"
    redis.call('HDEL', KEYS[1], ARGV[1])
    redis.call('LPUSH', KEYS[2], ARGV[2])
    redis.call('SREM', KEYS[3], ARGV[3])
    return 1
"#;

/// Separator between the lane name and the job JSON in a retry member.
pub const RETRY_MEMBER_SEPARATOR: char = '|';

/// Retry sorted-set member: `{lane}|{job JSON}`.
///
/// The lane is resolved in Rust when the retry is scheduled, so promotion
/// never re-derives it from the priority string.
pub fn retry_member(lane: Lane, payload: &str) -> String {
    format!("{}{RETRY_MEMBER_SEPARATOR}{payload}", lane.as_str())
}

/// Move every ready retry back onto the lane stamped on its member.
///
/// KEYS[1]    = retry sorted set
/// KEYS[2..n] = lane lists, normal last
/// ARGV[1]    = now epoch seconds
/// ARGV[2..n] = lane names matching KEYS[2..n]
///
/// Members without a known lane prefix go to the last lane unchanged.
/// Returns the number of jobs moved.
pub const PROMOTE_SCRIPT: &str = r#"
    local lanes = {}
    for i = 2, #KEYS do
        lanes[ARGV[i]] = KEYS[i]
    end
    local ready = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
    local moved = 0
    for _, raw in ipairs(ready) do
        if redis.call('ZREM', KEYS[1], raw) == 1 then
            local lane = KEYS[#KEYS]
            local payload = raw
            local sep = string.find(raw, '|', 1, true)
            if sep then
                local target = lanes[string.sub(raw, 1, sep - 1)]
                if target then
                    lane = target
                    payload = string.sub(raw, sep + 1)
                end
            end
            redis.call('LPUSH', lane, payload)
            moved = moved + 1
        end
    end
    return moved
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_member_carries_lane() {
        let member = retry_member(Lane::for_priority("critical"), r#"{"id":"scan_1"}"#);
        assert_eq!(member, r#"critical|{"id":"scan_1"}"#);

        let (lane, payload) = member.split_once(RETRY_MEMBER_SEPARATOR).unwrap();
        assert_eq!(lane, "critical");
        assert_eq!(payload, r#"{"id":"scan_1"}"#);
    }

    #[test]
    fn test_low_priority_member_targets_normal_lane() {
        let member = retry_member(Lane::for_priority("low"), "{}");
        assert!(member.starts_with("normal|"));
    }

    #[test]
    fn test_promote_script_splits_on_separator() {
        let needle = format!("'{RETRY_MEMBER_SEPARATOR}'");
        assert!(PROMOTE_SCRIPT.contains(&needle));
    }
}

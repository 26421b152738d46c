// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Server-side Lua for atomic breaker bookkeeping.
//!
//! Every multi-step operation runs as a single script so concurrent processes
//! never observe a half-applied update. All scripts share one calling
//! convention:
//!
//! - `KEYS[1]` failures sorted set, `KEYS[2]` successes sorted set,
//!   `KEYS[3]` metadata hash, `KEYS[4]` states hash, `KEYS[5]` last-used
//!   sorted set,
//! - `ARGV[1]` breaker name, `ARGV[2]` current unix time, then
//!   operation-specific arguments.
//!
//! A window of `-1` means infinite: event entries are not kept and the
//! snapshot falls back to the running totals in the metadata hash.

/// Shared tail: prunes the window, counts events, and returns the snapshot
/// tuple `{failures, successes, lock_token, meta_fields}`.
const SNAPSHOT: &str = r#"
local function snapshot(name, now, window)
  local fcount, scount
  if window >= 0 then
    local cutoff = '(' .. (now - window)
    redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', cutoff)
    redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', cutoff)
    fcount = redis.call('ZCARD', KEYS[1])
    scount = redis.call('ZCARD', KEYS[2])
  else
    fcount = tonumber(redis.call('HGET', KEYS[3], 'failures_total')) or 0
    scount = tonumber(redis.call('HGET', KEYS[3], 'successes_total')) or 0
  end
  local locked = redis.call('HGET', KEYS[4], name)
  if not locked then locked = '' end
  return {fcount, scount, locked, redis.call('HGETALL', KEYS[3])}
end
"#;

/// `ARGV[3]` window, `ARGV[4]` entry bound (`-1` = unbounded), `ARGV[5]`
/// event unix time, `ARGV[6]` failure JSON.
pub(crate) fn record_failure() -> String {
    format!(
        "{SNAPSHOT}{}",
        r#"
local name, now = ARGV[1], tonumber(ARGV[2])
local window, bound = tonumber(ARGV[3]), tonumber(ARGV[4])
local at, payload = tonumber(ARGV[5]), ARGV[6]
local seq = redis.call('HINCRBY', KEYS[3], 'seq', 1)
if window >= 0 then
  redis.call('ZADD', KEYS[1], at, seq .. '|' .. payload)
  redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. (now - window))
  if bound >= 0 then
    redis.call('ZREMRANGEBYRANK', KEYS[1], 0, -(bound + 1))
  end
end
redis.call('HINCRBY', KEYS[3], 'failures_total', 1)
redis.call('HINCRBY', KEYS[3], 'consecutive_failures', 1)
redis.call('HSET', KEYS[3], 'consecutive_successes', 0, 'last_failure_at', at, 'last_failure', payload)
redis.call('ZADD', KEYS[5], now, name)
return snapshot(name, now, window)
"#
    )
}

/// `ARGV[3]` window, `ARGV[4]` event unix time.
pub(crate) fn record_success() -> String {
    format!(
        "{SNAPSHOT}{}",
        r#"
local name, now = ARGV[1], tonumber(ARGV[2])
local window, at = tonumber(ARGV[3]), tonumber(ARGV[4])
local seq = redis.call('HINCRBY', KEYS[3], 'seq', 1)
if window >= 0 then
  redis.call('ZADD', KEYS[2], at, seq)
  redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', '(' .. (now - window))
end
redis.call('HINCRBY', KEYS[3], 'successes_total', 1)
redis.call('HINCRBY', KEYS[3], 'consecutive_successes', 1)
redis.call('HSET', KEYS[3], 'consecutive_failures', 0, 'last_success_at', at)
redis.call('ZADD', KEYS[5], now, name)
return snapshot(name, now, window)
"#
    )
}

/// `ARGV[3]` window, `ARGV[4]` event unix time, `ARGV[5]` failure JSON.
pub(crate) fn record_probe_failure() -> String {
    format!(
        "{SNAPSHOT}{}",
        r#"
local name, now = ARGV[1], tonumber(ARGV[2])
local window, at, payload = tonumber(ARGV[3]), tonumber(ARGV[4]), ARGV[5]
redis.call('HINCRBY', KEYS[3], 'recovery_probe_failures', 1)
redis.call('HSET', KEYS[3], 'last_failure_at', at, 'last_failure', payload)
redis.call('ZADD', KEYS[5], now, name)
return snapshot(name, now, window)
"#
    )
}

/// `ARGV[3]` window, `ARGV[4]` event unix time.
pub(crate) fn record_probe_success() -> String {
    format!(
        "{SNAPSHOT}{}",
        r#"
local name, now = ARGV[1], tonumber(ARGV[2])
local window, at = tonumber(ARGV[3]), tonumber(ARGV[4])
redis.call('HINCRBY', KEYS[3], 'recovery_probe_successes', 1)
redis.call('HSET', KEYS[3], 'last_success_at', at)
redis.call('ZADD', KEYS[5], now, name)
return snapshot(name, now, window)
"#
    )
}

/// `ARGV[3]` window.
pub(crate) fn get_metadata() -> String {
    format!(
        "{SNAPSHOT}{}",
        r"
return snapshot(ARGV[1], tonumber(ARGV[2]), tonumber(ARGV[3]))
"
    )
}

/// Atomic swap of the breaker's lock flag in the states hash.
///
/// `ARGV[3]` new lock token, empty to clear the flag. Returns the token the
/// swap replaced, empty when the breaker was unlocked.
pub(crate) fn swap_state() -> String {
    r"
local name, now = ARGV[1], tonumber(ARGV[2])
local token = ARGV[3]
local previous = redis.call('HGET', KEYS[4], name)
if token == '' then
  redis.call('HDEL', KEYS[4], name)
else
  redis.call('HSET', KEYS[4], name, token)
end
redis.call('ZADD', KEYS[5], now, name)
if not previous then previous = '' end
return previous
"
    .to_owned()
}

/// Compare-and-set on the last-transition marker.
///
/// `ARGV[3]` target color token, `ARGV[4]` cool-off seconds. Returns 1 for
/// the single caller that commits the transition, 0 when the marker already
/// equals the target.
pub(crate) fn transition_to_color() -> String {
    r#"
local name, now = ARGV[1], tonumber(ARGV[2])
local color, cool_off = ARGV[3], tonumber(ARGV[4])
if redis.call('HGET', KEYS[3], 'last_transition') == color then
  return 0
end
if color == 'green' then
  redis.call('DEL', KEYS[1])
  redis.call('HSET', KEYS[3], 'failures_total', 0, 'consecutive_failures', 0,
             'recovery_probe_failures', 0, 'recovery_probe_successes', 0)
  redis.call('HDEL', KEYS[3], 'breached_at', 'recovery_started_at', 'recovery_scheduled_after')
elseif color == 'yellow' then
  redis.call('HSET', KEYS[3], 'recovery_started_at', now,
             'recovery_probe_failures', 0, 'recovery_probe_successes', 0)
elseif color == 'red' then
  if redis.call('HEXISTS', KEYS[3], 'recovery_started_at') == 1 then
    redis.call('HDEL', KEYS[3], 'recovery_started_at')
    redis.call('HSET', KEYS[3], 'recovery_scheduled_after', now + cool_off,
               'recovery_probe_failures', 0, 'recovery_probe_successes', 0)
  elseif redis.call('HEXISTS', KEYS[3], 'breached_at') == 0 then
    redis.call('HSET', KEYS[3], 'breached_at', now)
  end
end
redis.call('HSET', KEYS[3], 'last_transition', color)
redis.call('ZADD', KEYS[5], now, name)
return 1
"#
    .to_owned()
}

//! Lua scripts for operations that touch several keys atomically.

use once_cell::sync::Lazy;
use redis::Script;

/// Append one entry with the next sequence number.
///
/// KEYS: stream, sequence counter. ARGV: field/value pairs.
pub(crate) static APPEND: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local seq = redis.call('INCR', KEYS[2])
redis.call('XADD', KEYS[1], seq .. '-0', unpack(ARGV))
return seq
",
    )
});

/// Fan one entry out to every subscription registered for a topic.
///
/// KEYS: subscription registry. ARGV[1]: subscription stream key prefix,
/// then field/value pairs. Returns the number of subscriptions reached.
pub(crate) static PUBLISH: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local subs = redis.call('SMEMBERS', KEYS[1])
local fields = {}
for i = 2, #ARGV do
  fields[#fields + 1] = ARGV[i]
end
for _, sub in ipairs(subs) do
  local stream = ARGV[1] .. sub
  local seq = redis.call('INCR', stream .. ':seq')
  redis.call('XADD', stream, seq .. '-0', unpack(fields))
end
return #subs
",
    )
});

/// Shared lock check: the entry is pending for this consumer, has not been
/// redelivered since the token was issued, and its lock has not expired.
const HOLDS_LOCK: &str = r"
local function holds_lock(stream, group, id, consumer, deliveries, lock_ms)
  local p = redis.call('XPENDING', stream, group, id, id, 1, consumer)
  if #p == 0 then
    return false
  end
  return tonumber(p[1][4]) == tonumber(deliveries) and tonumber(p[1][3]) < tonumber(lock_ms)
end
";

/// KEYS: stream. ARGV: group, id, consumer, deliveries, lock_ms.
pub(crate) static COMPLETE: Lazy<Script> = Lazy::new(|| {
    Script::new(&format!(
        r"{}
if not holds_lock(KEYS[1], ARGV[1], ARGV[2], ARGV[3], ARGV[4], ARGV[5]) then
  return 0
end
redis.call('XACK', KEYS[1], ARGV[1], ARGV[2])
redis.call('XDEL', KEYS[1], ARGV[2])
return 1
",
        HOLDS_LOCK
    ))
});

/// Reset the idle clock so the entry is reclaimable one lock window from now.
/// `JUSTID` leaves the delivery counter alone.
///
/// KEYS: stream. ARGV: group, id, consumer, deliveries, lock_ms.
pub(crate) static ABANDON: Lazy<Script> = Lazy::new(|| {
    Script::new(&format!(
        r"{}
if not holds_lock(KEYS[1], ARGV[1], ARGV[2], ARGV[3], ARGV[4], ARGV[5]) then
  return 0
end
redis.call('XCLAIM', KEYS[1], ARGV[1], ARGV[3], 0, ARGV[2], 'IDLE', 0, 'JUSTID')
return 1
",
        HOLDS_LOCK
    ))
});

/// Move an entry into the dead-letter stream, copying its fields and
/// stamping reason, description and delivery count.
///
/// KEYS: stream, dead-letter stream, dead-letter sequence counter.
/// ARGV: group, id, guard, consumer, deliveries, lock_ms, reason, description, total_deliveries.
///
/// `guard` is `owner` for a receiver settling its own lock, or `idle` when an
/// expired lock is dead-lettered for exceeding the delivery limit (in which
/// case `lock_ms` is the minimum idle time).
pub(crate) static DEAD_LETTER: Lazy<Script> = Lazy::new(|| {
    Script::new(&format!(
        r"{}
local group, id = ARGV[1], ARGV[2]
if ARGV[3] == 'owner' then
  if not holds_lock(KEYS[1], group, id, ARGV[4], ARGV[5], ARGV[6]) then
    return 0
  end
else
  local p = redis.call('XPENDING', KEYS[1], group, 'IDLE', ARGV[6], id, id, 1)
  if #p == 0 then
    return 0
  end
end

local entries = redis.call('XRANGE', KEYS[1], id, id)
redis.call('XACK', KEYS[1], group, id)
redis.call('XDEL', KEYS[1], id)
if #entries == 0 then
  return 0
end

local fields = {{}}
local src = entries[1][2]
for i = 1, #src, 2 do
  local k = src[i]
  if k ~= 'dead_letter_reason' and k ~= 'dead_letter_error_description' and k ~= 'prior_deliveries' then
    fields[#fields + 1] = k
    fields[#fields + 1] = src[i + 1]
  end
end
fields[#fields + 1] = 'dead_letter_reason'
fields[#fields + 1] = ARGV[7]
fields[#fields + 1] = 'dead_letter_error_description'
fields[#fields + 1] = ARGV[8]
fields[#fields + 1] = 'prior_deliveries'
fields[#fields + 1] = ARGV[9]

local seq = redis.call('INCR', KEYS[3])
redis.call('XADD', KEYS[2], seq .. '-0', unpack(fields))
return 1
",
        HOLDS_LOCK
    ))
});

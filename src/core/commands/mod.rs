// src/core/commands/mod.rs

//! The table of command kinds a host can submit, and the encoder that turns a
//! submission into a RESP command frame.
//!
//! Payload semantics belong to the server. This module only knows the words
//! each kind sends and how many arguments it takes, so malformed submissions
//! are rejected before anything is registered or written.

use crate::core::BridgeError;
use crate::core::protocol::RespFrame;
use bytes::Bytes;
use std::fmt;

#[macro_use]
mod command_def;

/// The number of caller-supplied arguments a request kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    /// `None` means unbounded.
    pub max: Option<usize>,
}

impl Arity {
    pub const fn new(min: usize, max: Option<usize>) -> Self {
        Self { min, max }
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", self.min),
            Some(max) => write!(f, "{}..={}", self.min, max),
            None => write!(f, "at least {}", self.min),
        }
    }
}

define_request_types! {
    /// Never valid; reserved so a zeroed value from the host is rejected.
    InvalidRequest = 0 => [], (0, Some(0)),
    /// The caller's first argument is the command name.
    CustomCommand = 1 => [], (1, None),
    GetString = 2 => ["GET"], (1, Some(1)),
    SetString = 3 => ["SET"], (2, None),
    Ping = 4 => ["PING"], (0, Some(1)),
    Info = 5 => ["INFO"], (0, None),
    Del = 6 => ["DEL"], (1, None),
    Select = 7 => ["SELECT"], (1, Some(1)),
    ConfigGet = 8 => ["CONFIG", "GET"], (1, None),
    ConfigSet = 9 => ["CONFIG", "SET"], (2, None),
    ConfigResetStat = 10 => ["CONFIG", "RESETSTAT"], (0, Some(0)),
    ConfigRewrite = 11 => ["CONFIG", "REWRITE"], (0, Some(0)),
    ClientGetName = 12 => ["CLIENT", "GETNAME"], (0, Some(0)),
    ClientGetRedir = 13 => ["CLIENT", "GETREDIR"], (0, Some(0)),
    ClientId = 14 => ["CLIENT", "ID"], (0, Some(0)),
    ClientInfo = 15 => ["CLIENT", "INFO"], (0, Some(0)),
    ClientKill = 16 => ["CLIENT", "KILL"], (1, None),
    ClientList = 17 => ["CLIENT", "LIST"], (0, None),
    ClientNoEvict = 18 => ["CLIENT", "NO-EVICT"], (1, Some(1)),
    ClientNoTouch = 19 => ["CLIENT", "NO-TOUCH"], (1, Some(1)),
    ClientPause = 20 => ["CLIENT", "PAUSE"], (1, Some(2)),
    ClientReply = 21 => ["CLIENT", "REPLY"], (1, Some(1)),
    ClientSetInfo = 22 => ["CLIENT", "SETINFO"], (2, Some(2)),
    ClientSetName = 23 => ["CLIENT", "SETNAME"], (1, Some(1)),
    ClientUnblock = 24 => ["CLIENT", "UNBLOCK"], (1, Some(2)),
    ClientUnpause = 25 => ["CLIENT", "UNPAUSE"], (0, Some(0)),
    Expire = 26 => ["EXPIRE"], (2, Some(3)),
    HashSet = 27 => ["HSET"], (3, None),
    HashGet = 28 => ["HGET"], (2, Some(2)),
    HashDel = 29 => ["HDEL"], (2, None),
    HashExists = 30 => ["HEXISTS"], (2, Some(2)),
    MGet = 31 => ["MGET"], (1, None),
    MSet = 32 => ["MSET"], (2, None),
    Incr = 33 => ["INCR"], (1, Some(1)),
    IncrBy = 34 => ["INCRBY"], (2, Some(2)),
    Decr = 35 => ["DECR"], (1, Some(1)),
    IncrByFloat = 36 => ["INCRBYFLOAT"], (2, Some(2)),
    DecrBy = 37 => ["DECRBY"], (2, Some(2)),
    HashGetAll = 38 => ["HGETALL"], (1, Some(1)),
    HashMSet = 39 => ["HMSET"], (3, None),
    HashMGet = 40 => ["HMGET"], (2, None),
    HashIncrBy = 41 => ["HINCRBY"], (3, Some(3)),
    HashIncrByFloat = 42 => ["HINCRBYFLOAT"], (3, Some(3)),
    LPush = 43 => ["LPUSH"], (2, None),
    LPop = 44 => ["LPOP"], (1, Some(2)),
    RPush = 45 => ["RPUSH"], (2, None),
    RPop = 46 => ["RPOP"], (1, Some(2)),
    LLen = 47 => ["LLEN"], (1, Some(1)),
    LRem = 48 => ["LREM"], (3, Some(3)),
    LRange = 49 => ["LRANGE"], (3, Some(3)),
    LTrim = 50 => ["LTRIM"], (3, Some(3)),
    SAdd = 51 => ["SADD"], (2, None),
    SRem = 52 => ["SREM"], (2, None),
    SMembers = 53 => ["SMEMBERS"], (1, Some(1)),
    SCard = 54 => ["SCARD"], (1, Some(1)),
    PExpireAt = 55 => ["PEXPIREAT"], (2, Some(3)),
    PExpire = 56 => ["PEXPIRE"], (2, Some(3)),
    ExpireAt = 57 => ["EXPIREAT"], (2, Some(3)),
    Exists = 58 => ["EXISTS"], (1, None),
    Unlink = 59 => ["UNLINK"], (1, None),
    Ttl = 60 => ["TTL"], (1, Some(1)),
    Zadd = 61 => ["ZADD"], (3, None),
    Zrem = 62 => ["ZREM"], (2, None),
    Zrange = 63 => ["ZRANGE"], (3, None),
    Zcard = 64 => ["ZCARD"], (1, Some(1)),
    Zcount = 65 => ["ZCOUNT"], (3, Some(3)),
    ZIncrBy = 66 => ["ZINCRBY"], (3, Some(3)),
    ZScore = 67 => ["ZSCORE"], (2, Some(2)),
    Type = 68 => ["TYPE"], (1, Some(1)),
    HLen = 69 => ["HLEN"], (1, Some(1)),
    Echo = 70 => ["ECHO"], (1, Some(1)),
    ZPopMin = 71 => ["ZPOPMIN"], (1, Some(2)),
    Strlen = 72 => ["STRLEN"], (1, Some(1)),
    Lindex = 73 => ["LINDEX"], (2, Some(2)),
    ZPopMax = 74 => ["ZPOPMAX"], (1, Some(2)),
    XRead = 75 => ["XREAD"], (3, None),
    XAdd = 76 => ["XADD"], (4, None),
    XReadGroup = 77 => ["XREADGROUP"], (6, None),
    XAck = 78 => ["XACK"], (3, None),
    XTrim = 79 => ["XTRIM"], (3, None),
    XGroupCreate = 80 => ["XGROUP", "CREATE"], (3, None),
    XGroupDestroy = 81 => ["XGROUP", "DESTROY"], (2, Some(2)),
    HSetNX = 82 => ["HSETNX"], (3, Some(3)),
    SIsMember = 83 => ["SISMEMBER"], (2, Some(2)),
    Hvals = 84 => ["HVALS"], (1, Some(1)),
    Pttl = 85 => ["PTTL"], (1, Some(1)),
    ZRemRangeByRank = 86 => ["ZREMRANGEBYRANK"], (3, Some(3)),
    Persist = 87 => ["PERSIST"], (1, Some(1)),
}

impl RequestType {
    /// Converts a raw discriminant received over the C ABI.
    pub fn from_u32(raw: u32) -> Result<Self, BridgeError> {
        Self::from_repr(raw).ok_or(BridgeError::UnknownRequestType(raw))
    }

    /// A human-readable name, e.g. `CONFIG GET`, used in error messages.
    pub fn display_name(&self) -> String {
        match self.command_words() {
            [] => <&'static str>::from(self).to_string(),
            words => words.join(" "),
        }
    }
}

/// Validates the argument shape of a submission and builds its command frame.
///
/// Takes the arguments by value so the payload buffers move into the frame
/// without copying.
pub fn encode_command(kind: RequestType, args: Vec<Bytes>) -> Result<RespFrame, BridgeError> {
    if kind == RequestType::InvalidRequest {
        return Err(BridgeError::InvalidRequest(
            "request type 0 does not name a command".to_string(),
        ));
    }

    let arity = kind.arity();
    if !arity.accepts(args.len()) {
        return Err(BridgeError::WrongArgumentCount {
            command: kind.display_name(),
            expected: arity.to_string(),
            got: args.len(),
        });
    }

    if kind == RequestType::CustomCommand && args[0].is_empty() {
        return Err(BridgeError::InvalidRequest(
            "custom command name is empty".to_string(),
        ));
    }

    match kind {
        RequestType::ClientReply => check_reply_mode(args.first())?,
        RequestType::CustomCommand if is_word(&args[0], "CLIENT") => {
            if args.get(1).is_some_and(|sub| is_word(sub, "REPLY")) {
                check_reply_mode(args.get(2))?;
            }
        }
        _ => {}
    }

    let words = kind.command_words();
    let mut parts = Vec::with_capacity(words.len() + args.len());
    parts.extend(
        words
            .iter()
            .map(|w| RespFrame::BulkString(Bytes::from_static(w.as_bytes()))),
    );
    parts.extend(args.into_iter().map(RespFrame::BulkString));
    Ok(RespFrame::Array(parts))
}

fn is_word(arg: &[u8], word: &str) -> bool {
    arg.eq_ignore_ascii_case(word.as_bytes())
}

/// Replies are matched to requests in write order, so a command that silences
/// the server's replies would shift every later reply onto the wrong token.
fn check_reply_mode(mode: Option<&Bytes>) -> Result<(), BridgeError> {
    match mode {
        Some(mode) if !is_word(mode, "ON") => Err(BridgeError::InvalidRequest(format!(
            "CLIENT REPLY {} is not supported; replies are required to correlate requests",
            String::from_utf8_lossy(mode)
        ))),
        _ => Ok(()),
    }
}

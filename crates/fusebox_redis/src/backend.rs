// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Redis-backed [`StateBackend`] implementation.

use std::fmt;
use std::time::{Duration, SystemTime};

use fusebox::backend::StateBackend;
use fusebox::clock::{from_unix_seconds, unix_seconds};
use fusebox::{BackendError, Color, Config, Failure, LockState, Metadata};
use parking_lot::Mutex;
use redis::{Commands, Connection, RedisResult, Script};

use crate::keys::{DEFAULT_PREFIX, Keys};
use crate::scripts;

/// Breaker state shared through a Redis server.
///
/// Implements the same contract as the in-memory backend, but across
/// independent processes: every multi-step update runs as a single
/// server-side Lua script, and color transitions are a compare-and-set on a
/// per-breaker marker field, so exactly one process wins each logical
/// transition no matter how many race for it.
///
/// The backend keeps one cached connection behind a mutex, serializing
/// commands from concurrent threads. The connection carries bounded read and
/// write timeouts and is dropped and re-dialed after any error, so a dead
/// server costs each caller at most one timeout before the fail-safe wrapper
/// takes over.
pub struct RedisBackend {
    client: redis::Client,
    connection: Mutex<Option<Connection>>,
    keys: Keys,
    connect_timeout: Duration,
    response_timeout: Duration,
    scripts: Scripts,
}

struct Scripts {
    record_failure: Script,
    record_success: Script,
    record_probe_failure: Script,
    record_probe_success: Script,
    get_metadata: Script,
    swap_state: Script,
    transition_to_color: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            record_failure: Script::new(&scripts::record_failure()),
            record_success: Script::new(&scripts::record_success()),
            record_probe_failure: Script::new(&scripts::record_probe_failure()),
            record_probe_success: Script::new(&scripts::record_probe_success()),
            get_metadata: Script::new(&scripts::get_metadata()),
            swap_state: Script::new(&scripts::swap_state()),
            transition_to_color: Script::new(&scripts::transition_to_color()),
        }
    }
}

/// Configures and connects a [`RedisBackend`].
#[derive(Clone, Debug)]
pub struct RedisBackendBuilder {
    url: String,
    prefix: String,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl RedisBackendBuilder {
    /// Namespaces every key under `prefix` instead of the default
    /// [`DEFAULT_PREFIX`].
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Bounds how long dialing the server may take.
    #[must_use]
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Bounds how long any single command may take.
    #[must_use]
    pub fn response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    /// Validates the URL and creates the backend.
    ///
    /// Dialing is lazy; an unreachable server surfaces on first use, through
    /// the breaker's fail-safe path.
    pub fn build(self) -> Result<RedisBackend, BackendError> {
        let client = redis::Client::open(self.url.as_str())
            .map_err(|error| BackendError::new("invalid redis url", error))?;
        Ok(RedisBackend {
            client,
            connection: Mutex::new(None),
            keys: Keys::new(self.prefix),
            connect_timeout: self.connect_timeout,
            response_timeout: self.response_timeout,
            scripts: Scripts::new(),
        })
    }
}

impl RedisBackend {
    /// Default bound on dialing the server.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
    /// Default bound on any single command.
    pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

    /// Creates a backend for `url` with the default prefix and timeouts.
    pub fn new(url: impl Into<String>) -> Result<Self, BackendError> {
        Self::builder(url).build()
    }

    /// Starts building a backend for `url`.
    pub fn builder(url: impl Into<String>) -> RedisBackendBuilder {
        RedisBackendBuilder {
            url: url.into(),
            prefix: DEFAULT_PREFIX.to_owned(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            response_timeout: Self::DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    fn dial(&self) -> Result<Connection, BackendError> {
        let connection = self
            .client
            .get_connection_with_timeout(self.connect_timeout)
            .map_err(|error| BackendError::new("failed to connect to redis", error))?;
        connection
            .set_read_timeout(Some(self.response_timeout))
            .and_then(|()| connection.set_write_timeout(Some(self.response_timeout)))
            .map_err(|error| BackendError::new("failed to set redis timeouts", error))?;
        Ok(connection)
    }

    /// Runs `op` on the cached connection, dropping it on any error so the
    /// next call re-dials.
    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> RedisResult<T>) -> Result<T, BackendError> {
        let mut slot = self.connection.lock();
        if slot.is_none() {
            *slot = Some(self.dial()?);
        }
        let Some(connection) = slot.as_mut() else {
            return Err(BackendError::from_message("redis connection slot is empty"));
        };
        match op(connection) {
            Ok(value) => Ok(value),
            Err(error) => {
                *slot = None;
                Err(BackendError::new("redis command failed", error))
            }
        }
    }

    fn invoke_snapshot(
        &self,
        config: &Config,
        script: impl FnOnce(&Scripts) -> &Script,
        extra: impl FnOnce(&mut redis::ScriptInvocation<'_>),
    ) -> Result<Metadata, BackendError> {
        let now = unix_seconds(config.clock().system_time());
        let parts: SnapshotParts = self.with_connection(|connection| {
            let script = script(&self.scripts);
            let mut invocation = script.prepare_invoke();
            invocation
                .key(self.keys.failures(config.name()))
                .key(self.keys.successes(config.name()))
                .key(self.keys.metadata(config.name()))
                .key(self.keys.states())
                .key(self.keys.last_used_at())
                .arg(config.name())
                .arg(now);
            extra(&mut invocation);
            invocation.invoke(connection)
        })?;
        parse_snapshot(parts)
    }

    /// Atomically replaces the lock token (empty clears it) and parses the
    /// token the swap displaced.
    fn swap_state(&self, config: &Config, token: &str) -> Result<LockState, BackendError> {
        let now = unix_seconds(config.clock().system_time());
        let previous: String = self.with_connection(|connection| {
            let mut invocation = self.scripts.swap_state.prepare_invoke();
            invocation
                .key(self.keys.failures(config.name()))
                .key(self.keys.successes(config.name()))
                .key(self.keys.metadata(config.name()))
                .key(self.keys.states())
                .key(self.keys.last_used_at())
                .arg(config.name())
                .arg(now)
                .arg(token);
            invocation.invoke(connection)
        })?;
        if previous.is_empty() {
            Ok(LockState::Unlocked)
        } else {
            parse_lock_token(&previous)
        }
    }
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend")
            .field("prefix", &self.keys.prefix())
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}

impl StateBackend for RedisBackend {
    fn names(&self) -> Result<Vec<String>, BackendError> {
        let (mut names, locked): (Vec<String>, Vec<String>) = self.with_connection(|connection| {
            let used = connection.zrange(self.keys.last_used_at(), 0, -1)?;
            let locked = connection.hkeys(self.keys.states())?;
            Ok((used, locked))
        })?;
        for name in locked {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn get_metadata(&self, config: &Config) -> Result<Metadata, BackendError> {
        self.invoke_snapshot(config, |scripts| &scripts.get_metadata, |invocation| {
            invocation.arg(window_arg(config));
        })
    }

    fn record_failure(&self, config: &Config, failure: &Failure) -> Result<Metadata, BackendError> {
        let payload = failure.to_json()?;
        self.invoke_snapshot(config, |scripts| &scripts.record_failure, |invocation| {
            invocation
                .arg(window_arg(config))
                .arg(bound_arg(config))
                .arg(failure.time_unix())
                .arg(&payload);
        })
    }

    fn record_success(&self, config: &Config, at: SystemTime) -> Result<Metadata, BackendError> {
        self.invoke_snapshot(config, |scripts| &scripts.record_success, |invocation| {
            invocation.arg(window_arg(config)).arg(unix_seconds(at));
        })
    }

    fn record_recovery_probe_failure(&self, config: &Config, failure: &Failure) -> Result<Metadata, BackendError> {
        let payload = failure.to_json()?;
        self.invoke_snapshot(config, |scripts| &scripts.record_probe_failure, |invocation| {
            invocation.arg(window_arg(config)).arg(failure.time_unix()).arg(&payload);
        })
    }

    fn record_recovery_probe_success(&self, config: &Config, at: SystemTime) -> Result<Metadata, BackendError> {
        self.invoke_snapshot(config, |scripts| &scripts.record_probe_success, |invocation| {
            invocation.arg(window_arg(config)).arg(unix_seconds(at));
        })
    }

    fn get_state(&self, config: &Config) -> Result<LockState, BackendError> {
        let token: Option<String> =
            self.with_connection(|connection| connection.hget(self.keys.states(), config.name()))?;
        token.map_or(Ok(LockState::Unlocked), |token| parse_lock_token(&token))
    }

    fn set_state(&self, config: &Config, state: LockState) -> Result<LockState, BackendError> {
        // Unlocked is stored as absence, matching what get_state reads back.
        let token = if state.is_unlocked() { "" } else { state.as_str() };
        self.swap_state(config, token)
    }

    fn clear_state(&self, config: &Config) -> Result<LockState, BackendError> {
        self.swap_state(config, "")
    }

    fn transition_to_color(&self, config: &Config, color: Color) -> Result<bool, BackendError> {
        let now = unix_seconds(config.clock().system_time());
        self.with_connection(|connection| {
            let mut invocation = self.scripts.transition_to_color.prepare_invoke();
            invocation
                .key(self.keys.failures(config.name()))
                .key(self.keys.successes(config.name()))
                .key(self.keys.metadata(config.name()))
                .key(self.keys.states())
                .key(self.keys.last_used_at())
                .arg(config.name())
                .arg(now)
                .arg(color.as_str())
                .arg(config.cool_off_time().as_secs());
            invocation.invoke(connection)
        })
    }

    fn names_used_after(&self, time: SystemTime) -> Result<Vec<String>, BackendError> {
        self.with_connection(|connection| {
            connection.zrangebyscore(self.keys.last_used_at(), unix_seconds(time), "+inf")
        })
    }
}

/// The tuple every snapshot-returning script yields: windowed failure and
/// success counts, the lock token (empty for unlocked), and the metadata
/// hash's fields flattened as key-value pairs.
type SnapshotParts = (u64, u64, String, Vec<String>);

fn window_arg(config: &Config) -> i64 {
    config
        .window_size()
        .map_or(-1, |window| i64::try_from(window.as_secs()).unwrap_or(i64::MAX))
}

fn bound_arg(config: &Config) -> i64 {
    config
        .traffic_control()
        .failure_entry_bound(config)
        .map_or(-1, |bound| i64::try_from(bound).unwrap_or(i64::MAX))
}

fn parse_lock_token(token: &str) -> Result<LockState, BackendError> {
    token
        .parse()
        .map_err(|error| BackendError::new("unrecognized lock token in states hash", error))
}

fn parse_number<T: std::str::FromStr<Err = std::num::ParseIntError>>(
    field: &str,
    value: &str,
) -> Result<T, BackendError> {
    value
        .parse()
        .map_err(|error| BackendError::new(format!("invalid `{field}` value in metadata hash"), error))
}

/// Builds a [`Metadata`] snapshot from a script's return tuple. Unknown hash
/// fields are ignored so layout additions stay backward compatible.
fn parse_snapshot(parts: SnapshotParts) -> Result<Metadata, BackendError> {
    let (failures, successes, lock_token, fields) = parts;
    let mut metadata = Metadata {
        failures,
        successes,
        ..Metadata::default()
    };
    if !lock_token.is_empty() {
        metadata.locked_state = parse_lock_token(&lock_token)?;
    }
    for pair in fields.chunks_exact(2) {
        let (field, value) = (pair[0].as_str(), pair[1].as_str());
        match field {
            "consecutive_failures" => metadata.consecutive_failures = parse_number(field, value)?,
            "consecutive_successes" => metadata.consecutive_successes = parse_number(field, value)?,
            "recovery_probe_failures" => metadata.recovery_probe_failures = parse_number(field, value)?,
            "recovery_probe_successes" => metadata.recovery_probe_successes = parse_number(field, value)?,
            "last_failure_at" => metadata.last_failure_at = Some(from_unix_seconds(parse_number(field, value)?)),
            "last_success_at" => metadata.last_success_at = Some(from_unix_seconds(parse_number(field, value)?)),
            "last_failure" => metadata.last_failure = Some(Failure::from_json(value)?),
            "breached_at" => metadata.breached_at = Some(from_unix_seconds(parse_number(field, value)?)),
            "recovery_started_at" => {
                metadata.recovery_started_at = Some(from_unix_seconds(parse_number(field, value)?));
            }
            "recovery_scheduled_after" => {
                metadata.recovery_scheduled_after = Some(from_unix_seconds(parse_number(field, value)?));
            }
            // The marker is consumed server side by the transition script.
            // Colors are derived, never carried in a snapshot, so the token
            // is validated here and dropped.
            "last_transition" => {
                value.parse::<Color>().map_err(|error| {
                    BackendError::new("invalid `last_transition` value in metadata hash", error)
                })?;
            }
            _ => {}
        }
    }
    Ok(metadata)
}

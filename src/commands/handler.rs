//! Command Dispatcher
//!
//! Maps tokenized request lines onto store primitives and formats the
//! framed reply. Dispatch is a case-insensitive match on the first
//! argument; every handler
//!
//! 1. validates arity (and options, where applicable),
//! 2. checks administrative privileges where required,
//! 3. invokes the appropriate store primitive(s),
//! 4. returns an [`Outcome`]: the reply envelope, the database index for
//!    subsequent commands, and whether the session stays open.
//!
//! Error message strings are stable and matched verbatim by the end-to-end
//! tests.
//!
//! ## Atomicity
//!
//! Single-key commands are atomic via the store's composite primitives.
//! Commands spanning two keys (RENAME, COPY, MOVE) are two independent
//! atomic steps: the keys may live in different shards or databases, and
//! an intervening session may observe the intermediate state. That is the
//! documented contract; do not "fix" it with wider locks.

use crate::connection::Peer;
use crate::protocol::{Envelope, Line};
use crate::server::Shutdown;
use crate::stats::ServerStats;
use crate::storage::{CacheContainer, ShardedCache};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Result of dispatching one command.
#[derive(Debug)]
pub struct Outcome {
    /// The framed reply for the session to write.
    pub reply: Envelope,
    /// Database index to bind for subsequent commands on this session.
    pub next_index: usize,
    /// False when the session should close after writing the reply.
    pub keep_open: bool,
}

impl Outcome {
    fn reply(reply: Envelope, next_index: usize) -> Self {
        Self {
            reply,
            next_index,
            keep_open: true,
        }
    }

    fn close(reply: Envelope, next_index: usize) -> Self {
        Self {
            reply,
            next_index,
            keep_open: false,
        }
    }
}

/// Shared command executor, cloned into every session.
#[derive(Clone)]
pub struct Dispatcher {
    container: Arc<CacheContainer>,
    stats: Arc<ServerStats>,
    shutdown: Shutdown,
}

impl Dispatcher {
    pub fn new(
        container: Arc<CacheContainer>,
        stats: Arc<ServerStats>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            container,
            stats,
            shutdown,
        }
    }

    /// The database container this dispatcher operates on.
    pub fn container(&self) -> &Arc<CacheContainer> {
        &self.container
    }

    /// Executes one tokenized command against the session's bound database.
    /// `arguments` is non-empty; the session rejects empty commands first.
    pub async fn execute(
        &self,
        arguments: &[String],
        peer: &Peer,
        index: usize,
        database: &Arc<ShardedCache>,
    ) -> Outcome {
        let command = arguments[0].to_uppercase();
        match command.as_str() {
            "SELECT" => self.cmd_select(arguments, index),
            "FLUSHALL" => self.cmd_flushall(arguments, peer, index).await,
            "FLUSH" => self.cmd_flush(arguments, peer, index, database),
            "MOVE" => self.cmd_move(arguments, index, database),
            "MGET" => self.cmd_mget(arguments, index, database),
            "MSET" => self.cmd_mset(arguments, index, database),
            "GET" => self.cmd_get(arguments, index, database),
            "SET" => self.cmd_set(arguments, index, database),
            "INCR" => self.cmd_incr(arguments, index, database),
            "DECR" => self.cmd_decr(arguments, index, database),
            "APPEND" => self.cmd_append(arguments, index, database),
            "PREPEND" => self.cmd_prepend(arguments, index, database),
            "LEN" => self.cmd_len(arguments, index, database),
            "RENAME" => self.cmd_rename(arguments, index, database),
            "COPY" => self.cmd_copy(arguments, index, database),
            "GETSET" => self.cmd_getset(arguments, index, database),
            "GETDEL" => self.cmd_getdel(arguments, index, database),
            "DEL" => self.cmd_del(arguments, index, database),
            "EXISTS" => self.cmd_exists(arguments, index, database),
            "QUIT" => self.cmd_quit(arguments, index),
            "INFO" => self.cmd_info(arguments, index, database),
            "ECHO" => self.cmd_echo(arguments, index),
            "SHUTDOWN" => self.cmd_shutdown(arguments, peer, index),
            _ => Outcome::reply(
                Envelope::error(format!("unknown command '{command}'")),
                index,
            ),
        }
    }

    /* multi-database commands */

    /// SELECT i: binds the session to logical database `i`.
    fn cmd_select(&self, arguments: &[String], index: usize) -> Outcome {
        if arguments.len() != 2 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        match self.parse_index(&arguments[1]) {
            Ok(new_index) => Outcome::reply(Envelope::ok(), new_index),
            Err(reply) => Outcome::reply(reply, index),
        }
    }

    /// FLUSHALL: clears every database in parallel. Admin only.
    async fn cmd_flushall(&self, arguments: &[String], peer: &Peer, index: usize) -> Outcome {
        if arguments.len() != 1 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }
        if !peer.is_admin() {
            return Outcome::reply(Envelope::error("insufficient permissions"), index);
        }

        let mut tasks = JoinSet::new();
        for database in self.container.iter() {
            let database = Arc::clone(database);
            tasks.spawn(async move { database.clear() });
        }
        while tasks.join_next().await.is_some() {}

        Outcome::reply(Envelope::ok(), index)
    }

    /// FLUSH: clears the active database. Admin only.
    fn cmd_flush(
        &self,
        arguments: &[String],
        peer: &Peer,
        index: usize,
        database: &ShardedCache,
    ) -> Outcome {
        if arguments.len() != 1 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }
        if !peer.is_admin() {
            return Outcome::reply(Envelope::error("insufficient permissions"), index);
        }

        database.clear();
        Outcome::reply(Envelope::ok(), index)
    }

    /// MOVE k j: moves a key from the active database to database `j`.
    fn cmd_move(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        if arguments.len() != 3 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let new_index = match self.parse_index(&arguments[2]) {
            Ok(new_index) => new_index,
            Err(reply) => return Outcome::reply(reply, index),
        };
        if new_index == index {
            return Outcome::reply(Envelope::ok(), index);
        }

        let destination = self.container.database(new_index);

        // Destination lives in another database (and shard), hence the
        // separate atomic steps; the move is not atomic as a whole.
        match database.load(&arguments[1]) {
            Some(value) => {
                if destination
                    .load_exist_store(&arguments[1], &value, false, false)
                    .is_some()
                {
                    return Outcome::reply(
                        Envelope::error("key already exists in destination database"),
                        index,
                    );
                }
                // Only delete the key once it proved movable
                database.delete(&arguments[1]);
                Outcome::reply(Envelope::ok(), index)
            }
            None => Outcome::reply(Envelope::error("no such key"), index),
        }
    }

    /* single-database commands */

    /// MGET k1…kn: one value line per key, empty when missing.
    fn cmd_mget(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        let keys = &arguments[1..];
        if keys.is_empty() {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let lines = keys
            .iter()
            .map(|key| Line::Value(database.load(key).unwrap_or_default()))
            .collect();
        Outcome::reply(Envelope::from_lines(lines), index)
    }

    /// MSET k1 v1 … kn vn: stores every pair.
    fn cmd_mset(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        let pairs = &arguments[1..];
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        for pair in pairs.chunks(2) {
            database.store(&pair[0], &pair[1]);
        }
        Outcome::reply(Envelope::ok(), index)
    }

    /// GET k: the value, or an empty line when absent.
    fn cmd_get(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        if arguments.len() != 2 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let value = database.load(&arguments[1]).unwrap_or_default();
        Outcome::reply(Envelope::single(Line::Value(value)), index)
    }

    /// SET k v [NX|XX] [EX|PX d]: stores a pair, optionally guarded by
    /// existence and optionally scheduling a delayed delete.
    fn cmd_set(&self, arguments: &[String], index: usize, database: &Arc<ShardedCache>) -> Outcome {
        let arg_count = arguments.len();
        if !(3..=6).contains(&arg_count) {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        // At most one existence guard and one expiration, in any order
        let mut syntax_error = false;
        let mut exist_option: Option<bool> = None; // want_exists
        let mut expire_option: Option<(&str, &str)> = None; // (unit, duration)

        let mut position = 3;
        while position < arg_count {
            let option = arguments[position].to_uppercase();
            match option.as_str() {
                "NX" | "XX" if exist_option.is_none() => {
                    exist_option = Some(option == "XX");
                }
                "EX" | "PX" if expire_option.is_none() => {
                    position += 1;
                    if position >= arg_count {
                        syntax_error = true;
                    } else {
                        expire_option = Some((
                            if option == "PX" { "PX" } else { "EX" },
                            &arguments[position],
                        ));
                    }
                }
                _ => syntax_error = true,
            }
            position += 1;
        }

        if syntax_error {
            return Outcome::reply(
                Envelope::error(format!("wrong syntax for '{}' command", arguments[0])),
                index,
            );
        }

        let reply = match exist_option {
            Some(want_exists) => {
                let old =
                    database.load_exist_store(&arguments[1], &arguments[2], want_exists, false);
                if old.is_some() == want_exists {
                    Envelope::ok()
                } else {
                    Envelope::single(Line::Value(String::new()))
                }
            }
            None => {
                database.store(&arguments[1], &arguments[2]);
                Envelope::ok()
            }
        };

        // Scheduled after the write; the delete fires unconditionally and
        // is not cancelled by later writes to the key.
        if let Some((unit, duration)) = expire_option {
            schedule_expiration(&arguments[1], unit, duration, database);
        }

        Outcome::reply(reply, index)
    }

    /// INCR k [delta]: adds `delta` (default 1) to a stringly integer.
    fn cmd_incr(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        self.apply_delta(arguments, index, database, "increment", i64::checked_add)
    }

    /// DECR k [delta]: subtracts `delta` (default 1) from a stringly
    /// integer.
    fn cmd_decr(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        self.apply_delta(arguments, index, database, "decrement", i64::checked_sub)
    }

    /// Shared INCR/DECR body. `apply` is checked addition or subtraction;
    /// checked arithmetic on deltas ≥ 1 is exactly the "no sign flip across
    /// the integer boundary" rule.
    fn apply_delta(
        &self,
        arguments: &[String],
        index: usize,
        database: &ShardedCache,
        noun: &str,
        apply: fn(i64, i64) -> Option<i64>,
    ) -> Outcome {
        let arg_count = arguments.len();
        if !(2..=3).contains(&arg_count) {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let mut delta = 1i64;
        if arg_count == 3 {
            delta = match arguments[2].parse() {
                Ok(delta) => delta,
                Err(_) => {
                    return Outcome::reply(
                        Envelope::error(format!("{noun} is either not an integer or too large")),
                        index,
                    );
                }
            };
            if delta < 1 {
                return Outcome::reply(
                    Envelope::error("inverse/non operations are discouraged"),
                    index,
                );
            }
        }

        let (value, status) = database.load_modify_store(
            &arguments[1],
            |current| match current.parse::<i64>().ok().and_then(|n| apply(n, delta)) {
                Some(next) => (next.to_string(), true),
                None => (current.to_string(), false),
            },
            "0",
        );

        if status {
            Outcome::reply(Envelope::single(Line::Value(value)), index)
        } else {
            Outcome::reply(
                Envelope::error("value is either not an integer or too large"),
                index,
            )
        }
    }

    /// APPEND k s: appends to the value, creating it when absent.
    fn cmd_append(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        if arguments.len() != 3 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let (value, _) = database.load_modify_store(
            &arguments[1],
            |current| (format!("{}{}", current, arguments[2]), true),
            "",
        );
        Outcome::reply(Envelope::single(Line::Value(value)), index)
    }

    /// PREPEND k s: prepends to the value, creating it when absent.
    fn cmd_prepend(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        if arguments.len() != 3 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let (value, _) = database.load_modify_store(
            &arguments[1],
            |current| (format!("{}{}", arguments[2], current), true),
            "",
        );
        Outcome::reply(Envelope::single(Line::Value(value)), index)
    }

    /// LEN k1…kn: one `$<byte-length>` line per key, `$-1` when absent.
    fn cmd_len(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        let keys = &arguments[1..];
        if keys.is_empty() {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let lines = keys
            .iter()
            .map(|key| Line::Length(database.load(key).map(|value| value.len())))
            .collect();
        Outcome::reply(Envelope::from_lines(lines), index)
    }

    /// RENAME k1 k2: moves a value to a new key, overwriting k2.
    fn cmd_rename(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        if arguments.len() != 3 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        // The new key may land in another shard, hence two atomic steps
        match database.load_and_delete(&arguments[1]) {
            Some(value) => {
                database.store(&arguments[2], &value);
                Outcome::reply(Envelope::ok(), index)
            }
            None => Outcome::reply(Envelope::error("no such key"), index),
        }
    }

    /// COPY k1 k2 [REPLACE]: copies a value, refusing to clobber the
    /// destination unless REPLACE is given.
    fn cmd_copy(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        let arg_count = arguments.len();
        if !(3..=4).contains(&arg_count) {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let mut overwrite = false;
        if arg_count == 4 {
            if arguments[3].to_uppercase() != "REPLACE" {
                return Outcome::reply(Envelope::error("unknown option"), index);
            }
            overwrite = true;
        }

        match database.load(&arguments[1]) {
            Some(value) => {
                let old = database.load_exist_store(&arguments[2], &value, false, overwrite);
                if old.is_none() || overwrite {
                    Outcome::reply(Envelope::ok(), index)
                } else {
                    Outcome::reply(Envelope::error("destination key is not empty"), index)
                }
            }
            None => Outcome::reply(Envelope::error("no such key"), index),
        }
    }

    /// GETSET k v: swaps in the new value, returning the old one.
    fn cmd_getset(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        if arguments.len() != 3 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let old = database
            .load_exist_store(&arguments[1], &arguments[2], true, true)
            .unwrap_or_default();
        Outcome::reply(Envelope::single(Line::Value(old)), index)
    }

    /// GETDEL k: reads and removes in one step.
    fn cmd_getdel(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        if arguments.len() != 2 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let value = database.load_and_delete(&arguments[1]).unwrap_or_default();
        Outcome::reply(Envelope::single(Line::Value(value)), index)
    }

    /// DEL k1…kn: counts the keys that were actually present.
    fn cmd_del(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        let keys = &arguments[1..];
        if keys.is_empty() {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let removed = keys
            .iter()
            .filter(|key| database.load_and_delete(key).is_some())
            .count();
        Outcome::reply(Envelope::single(Line::Integer(removed as i64)), index)
    }

    /// EXISTS k1…kn: counts the keys currently present.
    fn cmd_exists(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        let keys = &arguments[1..];
        if keys.is_empty() {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let present = keys
            .iter()
            .filter(|key| database.load(key).is_some())
            .count();
        Outcome::reply(Envelope::single(Line::Integer(present as i64)), index)
    }

    /// QUIT: acknowledges and closes the session.
    fn cmd_quit(&self, arguments: &[String], index: usize) -> Outcome {
        if arguments.len() != 1 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }
        Outcome::close(Envelope::ok(), index)
    }

    /// INFO: one `key:value` line per server metric.
    fn cmd_info(&self, arguments: &[String], index: usize, database: &ShardedCache) -> Outcome {
        if arguments.len() != 1 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }

        let (total_keys, _) = database.count();
        let lines = self
            .stats
            .lines(index, total_keys, database.shard_count())
            .into_iter()
            .map(Line::Value)
            .collect();
        Outcome::reply(Envelope::from_lines(lines), index)
    }

    /// ECHO s: returns the argument unchanged.
    fn cmd_echo(&self, arguments: &[String], index: usize) -> Outcome {
        if arguments.len() != 2 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }
        Outcome::reply(Envelope::single(Line::Value(arguments[1].clone())), index)
    }

    /// SHUTDOWN: triggers graceful shutdown. Admin only.
    fn cmd_shutdown(&self, arguments: &[String], peer: &Peer, index: usize) -> Outcome {
        if arguments.len() != 1 {
            return Outcome::reply(wrong_arity(&arguments[0]), index);
        }
        if !peer.is_admin() {
            return Outcome::reply(Envelope::error("insufficient permissions"), index);
        }

        self.shutdown.trigger();
        Outcome::close(Envelope::ok(), index)
    }

    /* helpers */

    /// Parses and bounds-checks a database index argument.
    fn parse_index(&self, argument: &str) -> Result<usize, Envelope> {
        let index: i64 = argument
            .parse()
            .map_err(|_| Envelope::error("index value is not an integer"))?;
        if index < 0 || index as usize >= self.container.len() {
            return Err(Envelope::error("index value is out of bounds"));
        }
        Ok(index as usize)
    }
}

/// Builds the arity error with the command name exactly as the client
/// typed it.
fn wrong_arity(name: &str) -> Envelope {
    Envelope::error(format!("wrong number of arguments for '{name}' command"))
}

/// Schedules the delayed delete behind `SET … EX|PX d`. Only durations
/// parsing to a positive integer schedule anything. The timer holds no
/// reference to the value: it re-enters the store and deletes by key, even
/// if the key was rewritten or already deleted in the meantime.
fn schedule_expiration(key: &str, unit: &str, duration: &str, database: &Arc<ShardedCache>) {
    let amount: i64 = duration.parse().unwrap_or(0);
    if amount <= 0 {
        return;
    }

    let duration = if unit == "PX" {
        Duration::from_millis(amount as u64)
    } else {
        Duration::from_secs(amount as u64)
    };

    let key = key.to_string();
    let database = Arc::clone(database);
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        database.delete(&key);
    });
}

//! Handler registration and lookup.
//!
//! Each endpoint owns a 256-slot handler table. Index 0 is never
//! assigned; an incoming message naming an empty slot lands in
//! [`default_handler`], which reports the stray index and aborts.
//! Registration is all-or-nothing: a batch either installs completely
//! or leaves the table untouched.

use crate::args::{Args, MAX_ARGS};
use crate::config::TABLE_SIZE;
use crate::error::{Error, Result};
use crate::flags::{EntryFlags, TokenMask};
use crate::token::Token;

/// Signature of a message handler.
///
/// `payload` is empty for short messages, borrows the bounce buffer for
/// mediums, and borrows the landing zone inside the endpoint segment
/// for longs. The borrow ends with the call; handlers that need the
/// bytes later must copy them out.
pub type HandlerFn = fn(&mut Token<'_>, &[u8], &Args);

/// Sentinel argument count for entries that accept any number of
/// arguments, such as wildcard entries from the legacy table.
pub const NARGS_UNKNOWN: u8 = u8::MAX;

/// One row of a handler table.
///
/// `index` is both input and output: a nonzero value requests that
/// exact slot, zero lets registration pick one, and in either case the
/// field holds the assigned slot after a successful call.
#[derive(Debug, Clone, Copy)]
pub struct HandlerEntry {
    /// Requested slot, or 0 for don't-care. Updated in place on
    /// successful registration.
    pub index: u8,
    /// The function to run when a message names this slot.
    pub func: HandlerFn,
    /// Directions and payload category the handler accepts.
    pub flags: EntryFlags,
    /// Exact argument count the handler expects, or [`NARGS_UNKNOWN`].
    pub nargs: u8,
    /// Opaque word stored with the entry and handed back through token
    /// introspection. The transport never interprets it.
    pub datum: usize,
    /// Optional name used in diagnostics.
    pub name: Option<&'static str>,
}

impl HandlerEntry {
    /// Builds a typed entry.
    pub fn new(index: u8, func: HandlerFn, flags: EntryFlags, nargs: u8) -> Self {
        HandlerEntry {
            index,
            func,
            flags,
            nargs,
            datum: 0,
            name: None,
        }
    }

    /// Attaches a caller datum.
    pub fn with_datum(mut self, datum: usize) -> Self {
        self.datum = datum;
        self
    }

    /// Attaches a diagnostic name.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }
}

/// One row of a legacy handler table: an index request and a function,
/// nothing else. Registration turns these into wildcard entries that
/// accept both directions, every category and any argument count.
#[derive(Debug, Clone, Copy)]
pub struct LegacyEntry {
    /// Requested slot, or 0 for don't-care. Updated in place on
    /// successful registration.
    pub index: u8,
    /// The function to run when a message names this slot.
    pub func: HandlerFn,
}

fn desc(entry: &HandlerEntry) -> String {
    match entry.name {
        Some(name) => format!("'{}'", name),
        None => format!("#{}", entry.index),
    }
}

/// Checks that an entry is well formed. Registration runs this on
/// every entry before touching the table; debug builds also run it on
/// entries returned through token introspection.
///
/// # Panics
///
/// Panics on a malformed entry. A table that fails validation is a
/// build-time mistake in the client, not a runtime condition.
pub(crate) fn validate_entry(entry: &HandlerEntry) {
    if entry.nargs != NARGS_UNKNOWN && usize::from(entry.nargs) > MAX_ARGS {
        panic!(
            "handler {} declares {} arguments, limit is {}",
            desc(entry),
            entry.nargs,
            MAX_ARGS
        );
    }
    if !entry.flags.intersects(EntryFlags::DIRECTION_MASK) {
        panic!(
            "handler {} must declare a direction (REQUEST, REPLY or both)",
            desc(entry)
        );
    }
    let categories = entry.flags.category_count();
    let wildcard = entry.flags.contains(EntryFlags::LEGACY) && categories == 3;
    if categories != 1 && !wildcard {
        panic!(
            "handler {} must declare exactly one payload category",
            desc(entry)
        );
    }
}

/// Handler run for messages naming an empty slot.
///
/// Pulls the stray index and the sender out of the token before
/// aborting, so the panic names the culprit instead of just the fact.
pub(crate) fn default_handler(token: &mut Token<'_>, _payload: &[u8], _args: &Args) {
    let (info, _) = token.info(TokenMask::SRC_RANK | TokenMask::ENTRY);
    // A default entry keeps index 0 and carries the empty slot number
    // in its datum.
    let index = info.entry.map(|e| e.datum).unwrap_or(0);
    let src = info.src_rank.unwrap_or(u32::MAX);
    panic!(
        "no handler registered at index {} (message injected by rank {})",
        index, src
    );
}

pub(crate) fn default_entry(slot: u8) -> HandlerEntry {
    HandlerEntry {
        index: 0,
        func: default_handler,
        flags: EntryFlags::ANY | EntryFlags::LEGACY,
        nargs: NARGS_UNKNOWN,
        datum: usize::from(slot),
        name: None,
    }
}

/// The per-endpoint handler table.
pub(crate) struct HandlerTable {
    entries: [Option<HandlerEntry>; TABLE_SIZE],
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        HandlerTable {
            entries: [None; TABLE_SIZE],
        }
    }

    /// Resolves an index to its entry, or to the default entry when
    /// the slot is empty.
    pub(crate) fn lookup(&self, index: u8) -> HandlerEntry {
        self.entries[usize::from(index)].unwrap_or_else(|| default_entry(index))
    }

    /// Whether a slot holds a registered handler.
    #[cfg(test)]
    pub(crate) fn is_installed(&self, index: u8) -> bool {
        self.entries[usize::from(index)].is_some()
    }

    /// Installs a batch of entries into `[low, high)`.
    ///
    /// Entries with a nonzero index are placed first, then don't-care
    /// entries fill free slots scanning down from the top of the
    /// range. Assigned slots are written back into `new_entries`. On
    /// any error the table is left exactly as it was.
    pub(crate) fn register(
        &mut self,
        new_entries: &mut [HandlerEntry],
        range: (usize, usize),
    ) -> Result<usize> {
        let (low, high) = range;
        debug_assert!(low >= 1 && high <= TABLE_SIZE && low < high);

        if new_entries.len() > high - low {
            return Err(Error::BadArgument(format!(
                "{} entries do not fit in handler range [{}, {})",
                new_entries.len(),
                low,
                high
            )));
        }

        // Legacy wildcard entries form a uniform block; a batch mixing
        // them with typed entries is a build-time mistake in the
        // client.
        let legacy = new_entries
            .iter()
            .filter(|e| e.flags.contains(EntryFlags::LEGACY))
            .count();
        if legacy != 0 {
            if legacy != new_entries.len() {
                panic!(
                    "handler table mixes {} legacy wildcard entries with {} typed entries",
                    legacy,
                    new_entries.len() - legacy
                );
            }
            for entry in new_entries.iter() {
                if !entry.flags.contains(EntryFlags::ANY) || entry.nargs != NARGS_UNKNOWN {
                    panic!(
                        "legacy handler {} must accept every category and any argument count",
                        desc(entry)
                    );
                }
            }
        }
        for entry in new_entries.iter() {
            validate_entry(entry);
        }

        let mut occupied = [false; TABLE_SIZE];
        for (slot, entry) in self.entries.iter().enumerate() {
            occupied[slot] = entry.is_some();
        }

        // Pass 1: entries that name their slot.
        let mut placed: Vec<(usize, usize)> = Vec::with_capacity(new_entries.len());
        for (i, entry) in new_entries.iter().enumerate() {
            if entry.index == 0 {
                continue;
            }
            let slot = usize::from(entry.index);
            if slot < low || slot >= high {
                return Err(Error::BadArgument(format!(
                    "handler {} requests index {} outside permitted range [{}, {})",
                    desc(entry),
                    slot,
                    low,
                    high
                )));
            }
            if occupied[slot] {
                return Err(Error::BadArgument(format!(
                    "handler {} requests index {} which is already in use",
                    desc(entry),
                    slot
                )));
            }
            occupied[slot] = true;
            placed.push((slot, i));
        }

        // Pass 2: don't-care entries, filled from the top of the range
        // down so the assignment is deterministic.
        for (i, entry) in new_entries.iter().enumerate() {
            if entry.index != 0 {
                continue;
            }
            let slot = (low..high).rev().find(|&slot| !occupied[slot]);
            let Some(slot) = slot else {
                return Err(Error::Resource(format!(
                    "no free handler slot left in range [{}, {})",
                    low, high
                )));
            };
            occupied[slot] = true;
            placed.push((slot, i));
        }

        for (slot, i) in placed {
            new_entries[i].index = slot as u8;
            self.entries[slot] = Some(new_entries[i]);
            tracing::trace!(
                index = slot,
                name = new_entries[i].name.unwrap_or(""),
                flags = ?new_entries[i].flags,
                nargs = new_entries[i].nargs,
                "installed handler"
            );
        }
        Ok(new_entries.len())
    }
}

/// Converts a legacy table into wildcard entries ready for
/// registration.
pub(crate) fn legacy_entries(table: &[LegacyEntry]) -> Vec<HandlerEntry> {
    table
        .iter()
        .map(|legacy| HandlerEntry {
            index: legacy.index,
            func: legacy.func,
            flags: EntryFlags::ANY | EntryFlags::LEGACY,
            nargs: NARGS_UNKNOWN,
            datum: 0,
            name: None,
        })
        .collect()
}

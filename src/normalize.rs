//! Categorical normalization for move types, designations and filters
//!
//! The alias tables here are the single source of truth for both caller
//! filters and stored values: the SQL executor renders its `CASE`
//! expressions from the same tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Filter values that mean "no constraint".
pub const NO_FILTER_SENTINELS: &[&str] = &["ALL", "ANY", ""];

/// Whitespace stripped before matching. The SQL `BTRIM` uses the same set.
pub const TRIMMED: &[char] = &[' ', '\t', '\r', '\n'];

/// Direction of a container movement through the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MoveType {
    In,
    Out,
    Unk,
}

impl MoveType {
    pub const ALIASES: &'static [(&'static str, MoveType)] = &[
        ("IN", MoveType::In),
        ("INBOUND", MoveType::In),
        ("I", MoveType::In),
        ("IMPORT", MoveType::In),
        ("ENTRY", MoveType::In),
        ("OUT", MoveType::Out),
        ("OUTBOUND", MoveType::Out),
        ("O", MoveType::Out),
        ("EXPORT", MoveType::Out),
        ("EXIT", MoveType::Out),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoveType::In => "IN",
            MoveType::Out => "OUT",
            MoveType::Unk => "UNK",
        }
    }

    /// Maps a raw stored or caller value onto the canonical domain.
    /// Anything unrecognised (including blanks) becomes `Unk`.
    pub fn normalize(raw: &str) -> MoveType {
        lookup(Self::ALIASES, raw).unwrap_or(MoveType::Unk)
    }
}

impl fmt::Display for MoveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cargo state of the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Desig {
    Empty,
    Full,
    Exp,
    Unk,
}

impl Desig {
    pub const ALIASES: &'static [(&'static str, Desig)] = &[
        ("EMPTY", Desig::Empty),
        ("E", Desig::Empty),
        ("MT", Desig::Empty),
        ("BLANK", Desig::Empty),
        ("FULL", Desig::Full),
        ("F", Desig::Full),
        ("LADEN", Desig::Full),
        ("LOADED", Desig::Full),
        ("EXP", Desig::Exp),
        ("EXPORT", Desig::Exp),
        ("X", Desig::Exp),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Desig::Empty => "EMPTY",
            Desig::Full => "FULL",
            Desig::Exp => "EXP",
            Desig::Unk => "UNK",
        }
    }

    pub fn normalize(raw: &str) -> Desig {
        lookup(Self::ALIASES, raw).unwrap_or(Desig::Unk)
    }
}

impl fmt::Display for Desig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn lookup<T: Copy>(aliases: &[(&str, T)], raw: &str) -> Option<T> {
    let folded = raw.trim_matches(TRIMMED).to_uppercase();
    aliases
        .iter()
        .find(|(alias, _)| *alias == folded)
        .map(|(_, value)| *value)
}

fn is_sentinel(raw: &str) -> bool {
    let folded = raw.trim_matches(TRIMMED).to_uppercase();
    NO_FILTER_SENTINELS.contains(&folded.as_str())
}

/// Outcome of normalizing one caller filter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterValue<T> {
    /// Absent or a sentinel such as `ALL`
    Any,
    /// A recognised alias
    Known(T),
    /// Unrecognised input, mapped to the `UNK` bucket
    Unknown(T),
}

impl<T: Copy> FilterValue<T> {
    pub fn value(&self) -> Option<T> {
        match self {
            FilterValue::Any => None,
            FilterValue::Known(v) | FilterValue::Unknown(v) => Some(*v),
        }
    }
}

pub fn normalize_move_type_filter(raw: Option<&str>) -> FilterValue<MoveType> {
    match raw {
        None => FilterValue::Any,
        Some(s) if is_sentinel(s) => FilterValue::Any,
        Some(s) => match lookup(MoveType::ALIASES, s) {
            Some(mt) => FilterValue::Known(mt),
            None => FilterValue::Unknown(MoveType::Unk),
        },
    }
}

pub fn normalize_desig_filter(raw: Option<&str>) -> FilterValue<Desig> {
    match raw {
        None => FilterValue::Any,
        Some(s) if is_sentinel(s) => FilterValue::Any,
        Some(s) => match lookup(Desig::ALIASES, s) {
            Some(d) => FilterValue::Known(d),
            None => FilterValue::Unknown(Desig::Unk),
        },
    }
}

/// Terminal ids are opaque: only the sentinels are interpreted and any
/// other value is matched verbatim.
pub fn normalize_terminal_filter(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    let trimmed = raw.trim_matches(TRIMMED);
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("ALL") {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Normalized (terminal, move type, designation) constraints
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FilterSet {
    pub terminal_id: Option<String>,
    pub move_type: Option<MoveType>,
    pub desig: Option<Desig>,
    /// Number of caller values that fell into the `UNK` bucket
    pub unknown_inputs: u32,
}

impl FilterSet {
    pub fn from_raw(
        terminal_id: Option<&str>,
        move_type: Option<&str>,
        desig: Option<&str>,
    ) -> Self {
        let mt = normalize_move_type_filter(move_type);
        let dg = normalize_desig_filter(desig);

        let mut unknown_inputs = 0;
        if let FilterValue::Unknown(_) = mt {
            tracing::debug!(raw = ?move_type, "Unrecognised move_type filter, matching UNK");
            unknown_inputs += 1;
        }
        if let FilterValue::Unknown(_) = dg {
            tracing::debug!(raw = ?desig, "Unrecognised desig filter, matching UNK");
            unknown_inputs += 1;
        }

        Self {
            terminal_id: normalize_terminal_filter(terminal_id),
            move_type: mt.value(),
            desig: dg.value(),
            unknown_inputs,
        }
    }

    pub fn with_terminal(mut self, terminal_id: impl Into<String>) -> Self {
        self.terminal_id = Some(terminal_id.into());
        self
    }

    /// True when a stored cell (already normalized) passes every constraint.
    pub fn matches(&self, terminal_id: &str, move_type: MoveType, desig: Desig) -> bool {
        self.terminal_id.as_deref().map_or(true, |t| t == terminal_id)
            && self.move_type.map_or(true, |mt| mt == move_type)
            && self.desig.map_or(true, |d| d == desig)
    }
}

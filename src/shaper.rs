//! Response shaping for aggregated rows
//!
//! All output values are rounded to one decimal here. Values are carried as
//! integer tenths so that parents and totals built from rounded parts add up
//! exactly.

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

use crate::normalize::{Desig, FilterSet, MoveType};
use crate::planner::AggregateRow;
use crate::window::{to_fixed, TimeWindow};

/// Label used on series points when a category is not filtered.
pub const UNFILTERED_LABEL: &str = "ALL";

/// A value rounded to one decimal place, stored as tenths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tenths(i64);

impl Tenths {
    pub const ZERO: Tenths = Tenths(0);

    pub fn round(value: f64) -> Self {
        Tenths((value * 10.0).round() as i64)
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 10.0
    }

    pub fn raw(self) -> i64 {
        self.0
    }
}

impl Add for Tenths {
    type Output = Tenths;

    fn add(self, rhs: Tenths) -> Tenths {
        Tenths(self.0 + rhs.0)
    }
}

impl AddAssign for Tenths {
    fn add_assign(&mut self, rhs: Tenths) {
        self.0 += rhs.0;
    }
}

impl Sub for Tenths {
    type Output = Tenths;

    fn sub(self, rhs: Tenths) -> Tenths {
        Tenths(self.0 - rhs.0)
    }
}

impl Sum for Tenths {
    fn sum<I: Iterator<Item = Tenths>>(iter: I) -> Tenths {
        iter.fold(Tenths::ZERO, Add::add)
    }
}

impl Serialize for Tenths {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub terminal: String,
    pub total_pred: Tenths,
}

/// Terminals by total, largest first.
pub fn ranking(rows: &[AggregateRow]) -> Vec<RankingEntry> {
    let mut entries: Vec<RankingEntry> = rows
        .iter()
        .filter_map(|r| {
            Some(RankingEntry {
                terminal: r.terminal_id.clone()?,
                total_pred: Tenths::round(r.total),
            })
        })
        .collect();
    entries.sort_by(|a, b| {
        b.total_pred
            .cmp(&a.total_pred)
            .then_with(|| a.terminal.cmp(&b.terminal))
    });
    entries
}

/// IN/OUT split. Other move types are left out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MoveTypeShare {
    #[serde(rename = "IN")]
    pub inbound: Tenths,
    #[serde(rename = "OUT")]
    pub outbound: Tenths,
}

pub fn share(rows: &[AggregateRow]) -> MoveTypeShare {
    let mut inbound = 0.0;
    let mut outbound = 0.0;
    for row in rows {
        match row.move_type {
            Some(MoveType::In) => inbound += row.total,
            Some(MoveType::Out) => outbound += row.total,
            _ => {}
        }
    }
    MoveTypeShare {
        inbound: Tenths::round(inbound),
        outbound: Tenths::round(outbound),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveTypePoint {
    pub date: NaiveDate,
    pub hour: u32,
    pub move_type: MoveType,
    pub pred: Tenths,
}

pub fn move_type_hourly(rows: &[AggregateRow]) -> Vec<MoveTypePoint> {
    let mut points: Vec<MoveTypePoint> = rows
        .iter()
        .filter_map(|r| {
            Some(MoveTypePoint {
                date: r.date?,
                hour: r.hour?,
                move_type: r.move_type?,
                pred: Tenths::round(r.total),
            })
        })
        .collect();
    points.sort_by_key(|p| (p.date, p.hour, p.move_type));
    points
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesigPoint {
    pub date: NaiveDate,
    pub hour: u32,
    pub desig: Desig,
    pub pred: Tenths,
}

pub fn desig_hourly(rows: &[AggregateRow]) -> Vec<DesigPoint> {
    let mut points: Vec<DesigPoint> = rows
        .iter()
        .filter_map(|r| {
            Some(DesigPoint {
                date: r.date?,
                hour: r.hour?,
                desig: r.desig?,
                pred: Tenths::round(r.total),
            })
        })
        .collect();
    points.sort_by_key(|p| (p.date, p.hour, p.desig));
    points
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapCell {
    pub terminal: String,
    pub hour: u32,
    pub pred: Tenths,
}

pub fn heatmap(rows: &[AggregateRow]) -> Vec<HeatmapCell> {
    let mut cells: Vec<HeatmapCell> = rows
        .iter()
        .filter_map(|r| {
            Some(HeatmapCell {
                terminal: r.terminal_id.clone()?,
                hour: r.hour?,
                pred: Tenths::round(r.total),
            })
        })
        .collect();
    cells.sort_by(|a, b| (&a.terminal, a.hour).cmp(&(&b.terminal, b.hour)));
    cells
}

/// Node of the terminal → move type → designation hierarchy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SunburstNode {
    pub name: String,
    pub value: Tenths,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SunburstNode>,
}

struct ArenaNode {
    name: String,
    value: Tenths,
    children: Vec<usize>,
}

/// Flat node storage; children refer to parents' slots by index.
#[derive(Default)]
struct SunburstArena {
    nodes: Vec<ArenaNode>,
    roots: Vec<usize>,
    index: HashMap<(Option<usize>, String), usize>,
}

impl SunburstArena {
    fn child(&mut self, parent: Option<usize>, name: &str) -> usize {
        if let Some(&idx) = self.index.get(&(parent, name.to_string())) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(ArenaNode {
            name: name.to_string(),
            value: Tenths::ZERO,
            children: Vec::new(),
        });
        match parent {
            Some(p) => self.nodes[p].children.push(idx),
            None => self.roots.push(idx),
        }
        self.index.insert((parent, name.to_string()), idx);
        idx
    }

    /// Inner values are the sum of their (already rounded) children.
    fn settle(&mut self, idx: usize) -> Tenths {
        let children = self.nodes[idx].children.clone();
        if !children.is_empty() {
            let total: Tenths = children.into_iter().map(|c| self.settle(c)).sum();
            self.nodes[idx].value = total;
        }
        self.nodes[idx].value
    }

    fn export(&self, idx: usize) -> SunburstNode {
        let node = &self.nodes[idx];
        let mut children: Vec<SunburstNode> = node.children.iter().map(|&c| self.export(c)).collect();
        sort_nodes(&mut children);
        SunburstNode {
            name: node.name.clone(),
            value: node.value,
            children,
        }
    }
}

fn sort_nodes(nodes: &mut [SunburstNode]) {
    nodes.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)));
}

/// Builds the hierarchy from terminal × move type × designation rows.
pub fn sunburst(rows: &[AggregateRow]) -> Vec<SunburstNode> {
    let mut arena = SunburstArena::default();

    for row in rows {
        let (Some(terminal), Some(move_type), Some(desig)) =
            (row.terminal_id.as_deref(), row.move_type, row.desig)
        else {
            continue;
        };
        let t = arena.child(None, terminal);
        let m = arena.child(Some(t), move_type.as_str());
        let d = arena.child(Some(m), desig.as_str());
        arena.nodes[d].value += Tenths::round(row.total);
    }

    let roots = arena.roots.clone();
    for &root in &roots {
        arena.settle(root);
    }
    let mut nodes: Vec<SunburstNode> = roots.iter().map(|&r| arena.export(r)).collect();
    sort_nodes(&mut nodes);
    nodes
}

/// Category used for the composition breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositionDim {
    Desig,
    #[serde(rename = "movetype")]
    MoveType,
}

impl CompositionDim {
    /// Anything other than `movetype` falls back to designation.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("movetype") | Some("move_type") => CompositionDim::MoveType,
            _ => CompositionDim::Desig,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositionRow {
    pub terminal: String,
    pub key: &'static str,
    pub pred: Tenths,
}

pub fn composition(rows: &[AggregateRow], dim: CompositionDim) -> Vec<CompositionRow> {
    let mut out: Vec<CompositionRow> = rows
        .iter()
        .filter_map(|r| {
            let key = match dim {
                CompositionDim::Desig => r.desig?.as_str(),
                CompositionDim::MoveType => r.move_type?.as_str(),
            };
            Some(CompositionRow {
                terminal: r.terminal_id.clone()?,
                key,
                pred: Tenths::round(r.total),
            })
        })
        .collect();
    out.sort_by(|a, b| (&a.terminal, a.key).cmp(&(&b.terminal, b.key)));
    out
}

/// One hour of a single-terminal forecast series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub ts: DateTime<FixedOffset>,
    pub move_type: &'static str,
    pub desig: &'static str,
    pub terminal_id: String,
    pub pred: Tenths,
    pub actual: Option<Tenths>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSeries {
    pub points: Vec<ForecastPoint>,
    pub latest_update: Option<DateTime<Utc>>,
}

/// Gap-filled hourly series: exactly one point per hour of the window.
///
/// `rows` are grouped by date and hour. A wall-clock hour that repeats
/// (DST fall-back) carries its stored value on the first occurrence only.
pub fn forecast_series(
    window: &TimeWindow,
    rows: &[AggregateRow],
    terminal_id: &str,
    filters: &FilterSet,
) -> ForecastSeries {
    let mut buckets: HashMap<(NaiveDate, u32), &AggregateRow> = rows
        .iter()
        .filter_map(|r| Some(((r.date?, r.hour?), r)))
        .collect();

    let move_type = filters.move_type.map_or(UNFILTERED_LABEL, |mt| mt.as_str());
    let desig = filters.desig.map_or(UNFILTERED_LABEL, |d| d.as_str());
    let latest_update = rows.iter().filter_map(|r| r.latest_update).max();

    let points = window
        .hour_starts()
        .map(|ts| {
            let stored = buckets.remove(&(ts.date_naive(), ts.hour()));
            ForecastPoint {
                ts: to_fixed(ts),
                move_type,
                desig,
                terminal_id: terminal_id.to_string(),
                pred: stored.map_or(Tenths::ZERO, |r| Tenths::round(r.total)),
                actual: stored.and_then(|r| r.actual).map(Tenths::round),
            }
        })
        .collect();

    ForecastSeries {
        points,
        latest_update,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeBreakdown {
    pub date: NaiveDate,
    pub hour: u32,
    #[serde(rename = "in")]
    pub inbound: Tenths,
    #[serde(rename = "out")]
    pub outbound: Tenths,
    pub total: Tenths,
}

/// Total-volume KPI. Top-level figures are sums of the rounded breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalVolume {
    pub total_volume: Tenths,
    pub total_in: Tenths,
    pub total_out: Tenths,
    pub net_flow: Tenths,
    pub window_hours: i64,
    pub breakdown: Vec<VolumeBreakdown>,
}

/// `rows` are grouped by date, hour and move type.
pub fn total_volume(window: &TimeWindow, rows: &[AggregateRow]) -> TotalVolume {
    let mut hourly: BTreeMap<(NaiveDate, u32), (f64, f64)> = BTreeMap::new();
    for row in rows {
        let (Some(date), Some(hour)) = (row.date, row.hour) else {
            continue;
        };
        let slot = hourly.entry((date, hour)).or_default();
        match row.move_type {
            Some(MoveType::In) => slot.0 += row.total,
            Some(MoveType::Out) => slot.1 += row.total,
            _ => {}
        }
    }

    let breakdown: Vec<VolumeBreakdown> = window
        .local_buckets()
        .map(|(date, hour)| {
            let (inbound, outbound) = hourly.remove(&(date, hour)).unwrap_or_default();
            let inbound = Tenths::round(inbound);
            let outbound = Tenths::round(outbound);
            VolumeBreakdown {
                date,
                hour,
                inbound,
                outbound,
                total: inbound + outbound,
            }
        })
        .collect();

    let total_in: Tenths = breakdown.iter().map(|b| b.inbound).sum();
    let total_out: Tenths = breakdown.iter().map(|b| b.outbound).sum();

    TotalVolume {
        total_volume: total_in + total_out,
        total_in,
        total_out,
        net_flow: total_in - total_out,
        window_hours: window.hours(),
        breakdown,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyTotal {
    pub date: NaiveDate,
    pub hour: u32,
    pub pred: Tenths,
}

/// Per-hour IN+OUT totals, identical to the KPI breakdown.
pub fn hourly_totals(window: &TimeWindow, rows: &[AggregateRow]) -> Vec<HourlyTotal> {
    total_volume(window, rows)
        .breakdown
        .into_iter()
        .map(|b| HourlyTotal {
            date: b.date,
            hour: b.hour,
            pred: b.total,
        })
        .collect()
}

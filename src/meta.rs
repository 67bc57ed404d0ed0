//! Response metadata: timezone, server time and data-quality policy

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use serde::Serialize;

use crate::normalize::{Desig, MoveType};
use crate::window::to_fixed;

/// Cleaning policies applied to every figure, one entry per policy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQuality {
    pub negative_predictions: &'static str,
    pub rounding: &'static str,
    pub dedup: &'static str,
    pub move_type_domain: [MoveType; 3],
    pub desig_domain: [Desig; 4],
}

pub const DATA_QUALITY: DataQuality = DataQuality {
    negative_predictions: "clamped_to_zero",
    rounding: "1_decimal",
    dedup: "latest_updated_at",
    move_type_domain: [MoveType::In, MoveType::Out, MoveType::Unk],
    desig_domain: [Desig::Empty, Desig::Full, Desig::Exp, Desig::Unk],
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMeta {
    pub tz: String,
    pub as_of: DateTime<FixedOffset>,
    pub data_quality: DataQuality,
}

impl ResponseMeta {
    pub fn at(as_of: DateTime<Tz>) -> Self {
        Self {
            tz: as_of.timezone().name().to_string(),
            as_of: to_fixed(as_of),
            data_quality: DATA_QUALITY,
        }
    }
}

/// A response payload with `meta` added beside its own fields
#[derive(Debug, Clone, Serialize)]
pub struct WithMeta<T> {
    #[serde(flatten)]
    pub data: T,
    pub meta: ResponseMeta,
}

/// Wraps payloads with metadata for one timezone
#[derive(Debug, Clone, Copy)]
pub struct MetaAttacher {
    tz: Tz,
}

impl MetaAttacher {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn meta(&self) -> ResponseMeta {
        ResponseMeta::at(chrono::Utc::now().with_timezone(&self.tz))
    }

    pub fn attach<T: Serialize>(&self, data: T) -> WithMeta<T> {
        WithMeta {
            data,
            meta: self.meta(),
        }
    }
}

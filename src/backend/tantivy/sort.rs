//! Collector scores that order tantivy hits by record key
//!
//! Hits are ranked on `(id, type)` read from the fast columns of each
//! segment, so a top-N window is always an exact prefix of the key order.

use crate::backend::tantivy::schema::{ID, TYPE};
use std::cmp::Reverse;
use tantivy::collector::{CustomScorer, CustomSegmentScorer, ScoreSegmentTweaker, ScoreTweaker};
use tantivy::columnar::StrColumn;
use tantivy::{DocId, Score, SegmentReader, TantivyError};

/// Record key ranked so that smaller keys collect first
pub type KeyRank = Reverse<(String, String)>;

/// Ascending key
pub struct ByKey;

/// Descending score, ties by ascending key
pub struct ByScoreThenKey;

/// Key columns of one segment
pub struct SegmentKeys {
    ids: StrColumn,
    types: StrColumn,
}

impl SegmentKeys {
    fn open(segment: &SegmentReader) -> tantivy::Result<Self> {
        let fast = segment.fast_fields();
        let column = |name: &str| {
            fast.str(name)?.ok_or_else(|| {
                TantivyError::SchemaError(format!("Field '{}' has no fast column", name))
            })
        };

        Ok(Self {
            ids: column(ID)?,
            types: column(TYPE)?,
        })
    }

    fn rank(&self, doc: DocId) -> KeyRank {
        Reverse((first_value(&self.ids, doc), first_value(&self.types, doc)))
    }
}

fn first_value(column: &StrColumn, doc: DocId) -> String {
    let mut value = String::new();
    if let Some(ord) = column.term_ords(doc).next() {
        if column.ord_to_str(ord, &mut value).is_err() {
            value.clear();
        }
    }
    value
}

impl CustomScorer<KeyRank> for ByKey {
    type Child = SegmentKeys;

    fn segment_scorer(&self, segment_reader: &SegmentReader) -> tantivy::Result<SegmentKeys> {
        SegmentKeys::open(segment_reader)
    }
}

impl CustomSegmentScorer<KeyRank> for SegmentKeys {
    fn score(&mut self, doc: DocId) -> KeyRank {
        self.rank(doc)
    }
}

impl ScoreTweaker<(Score, KeyRank)> for ByScoreThenKey {
    type Child = SegmentKeys;

    fn segment_tweaker(&self, segment_reader: &SegmentReader) -> tantivy::Result<SegmentKeys> {
        SegmentKeys::open(segment_reader)
    }
}

impl ScoreSegmentTweaker<(Score, KeyRank)> for SegmentKeys {
    fn score(&mut self, doc: DocId, score: Score) -> (Score, KeyRank) {
        (score, self.rank(doc))
    }
}

//! Immutable reads of the store.

use crate::operation::{DataId, Selector};
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::fmt;
use std::rc::Rc;

struct SnapshotData {
    selector: Selector,
    data: Option<Value>,
    seen_records: FxHashSet<DataId>,
    is_missing_data: bool,
}

/// The result of reading a selector from the store at one point in time.
///
/// Cloning is cheap. [`Snapshot::ptr_eq`] tells whether two handles come from
/// the same read; `==` compares the selector and data.
#[derive(Clone)]
pub struct Snapshot {
    inner: Rc<SnapshotData>,
}

impl Snapshot {
    /// Creates a snapshot.
    pub fn new(
        selector: Selector,
        data: Option<Value>,
        seen_records: FxHashSet<DataId>,
        is_missing_data: bool,
    ) -> Self {
        Self {
            inner: Rc::new(SnapshotData {
                selector,
                data,
                seen_records,
                is_missing_data,
            }),
        }
    }

    /// The selector that was read.
    pub fn selector(&self) -> &Selector {
        &self.inner.selector
    }

    /// The materialized data, `None` if the root record is absent.
    pub fn data(&self) -> Option<&Value> {
        self.inner.data.as_ref()
    }

    /// Records visited while reading.
    pub fn seen_records(&self) -> &FxHashSet<DataId> {
        &self.inner.seen_records
    }

    /// True if some selected data was not in the store.
    pub fn is_missing_data(&self) -> bool {
        self.inner.is_missing_data
    }

    /// Returns true if both handles come from the same read.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.inner.selector == other.inner.selector && self.inner.data == other.inner.data)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("data_id", &self.inner.selector.data_id)
            .field("data", &self.inner.data)
            .field("is_missing_data", &self.inner.is_missing_data)
            .finish()
    }
}

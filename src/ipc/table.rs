// src/ipc/table.rs

//! Fixed-key counter/flag table shared by the supervisor and every worker.
//!
//! The table lives in an anonymous `MAP_SHARED` mapping created before any
//! worker is forked, so each child inherits the same physical page. Slots are
//! `AtomicI64`; the only operations are per-key get/set/add and
//! compare-and-set. There is deliberately no iteration and no way to add a
//! key after construction.

use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, munmap};
use tracing::debug;

use crate::errors::{Result, TasklineError};
use crate::pipeline::PipelineSpec;
use crate::types::{PipelineKind, Stage};

/// Number of slots in every table, regardless of kind.
pub const TABLE_SLOTS: usize = 4;

/// Names of the counters and flags a pipeline can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    BatchStatus,
    BatchCenterUnfinished,
    BatchRightUnfinished,
    DaemonCenterUnfinished,
    DaemonRightUnfinished,
    DaemonImmediateExit,
}

impl StateKey {
    /// Slot of this key within a table of the given kind, if the kind has it.
    fn slot(self, kind: PipelineKind) -> Option<usize> {
        match (kind, self) {
            (PipelineKind::Batch, StateKey::BatchStatus) => Some(0),
            (PipelineKind::Batch, StateKey::BatchCenterUnfinished) => Some(1),
            (PipelineKind::Batch, StateKey::BatchRightUnfinished) => Some(2),
            (PipelineKind::Daemon, StateKey::DaemonCenterUnfinished) => Some(0),
            (PipelineKind::Daemon, StateKey::DaemonRightUnfinished) => Some(1),
            (PipelineKind::Daemon, StateKey::DaemonImmediateExit) => Some(2),
            _ => None,
        }
    }

    /// The "workers still owing work" counter for a stage under a kind.
    pub fn unfinished(kind: PipelineKind, stage: Stage) -> Option<StateKey> {
        match (kind, stage) {
            (PipelineKind::Batch, Stage::Center) => Some(StateKey::BatchCenterUnfinished),
            (PipelineKind::Batch, Stage::Right) => Some(StateKey::BatchRightUnfinished),
            (PipelineKind::Daemon, Stage::Center) => Some(StateKey::DaemonCenterUnfinished),
            (PipelineKind::Daemon, Stage::Right) => Some(StateKey::DaemonRightUnfinished),
            (_, Stage::Left) => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::BatchStatus => "batchStatus",
            StateKey::BatchCenterUnfinished => "batchCenterUnfinished",
            StateKey::BatchRightUnfinished => "batchRightUnfinished",
            StateKey::DaemonCenterUnfinished => "daemonCenterUnfinished",
            StateKey::DaemonRightUnfinished => "daemonRightUnfinished",
            StateKey::DaemonImmediateExit => "daemonImmediateExit",
        }
    }
}

/// Values of the `batchStatus` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i64)]
pub enum BatchStatus {
    Start = 0,
    LeftFinish = 1,
    CenterFinish = 2,
    RightFinish = 3,
}

impl BatchStatus {
    pub fn from_raw(raw: i64) -> Option<BatchStatus> {
        match raw {
            0 => Some(BatchStatus::Start),
            1 => Some(BatchStatus::LeftFinish),
            2 => Some(BatchStatus::CenterFinish),
            3 => Some(BatchStatus::RightFinish),
            _ => None,
        }
    }

    pub fn raw(self) -> i64 {
        self as i64
    }
}

/// Owner of the mapping; unmapped when the last handle in this process drops.
struct Region {
    base: NonNull<AtomicI64>,
}

// The region only hands out `&AtomicI64`, which is Sync.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    fn map() -> Result<Self> {
        let len = NonZeroUsize::new(TABLE_SLOTS * size_of::<AtomicI64>())
            .ok_or_else(|| TasklineError::ProtocolViolation("empty state table".into()))?;
        // SAFETY: fresh anonymous mapping, no aliasing with existing memory.
        // The kernel zero-fills it and aligns it to a page boundary.
        let ptr = unsafe {
            mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )?
        };
        Ok(Self { base: ptr.cast() })
    }

    fn slot(&self, index: usize) -> &AtomicI64 {
        debug_assert!(index < TABLE_SLOTS);
        // SAFETY: index is bounded by TABLE_SLOTS and the mapping lives as
        // long as `self`.
        unsafe { &*self.base.as_ptr().add(index) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: `base` came from mmap_anonymous with this exact length.
        let _ = unsafe { munmap(self.base.cast(), TABLE_SLOTS * size_of::<AtomicI64>()) };
    }
}

/// Cloneable handle onto the shared table.
#[derive(Clone)]
pub struct SharedStateTable {
    kind: PipelineKind,
    region: Arc<Region>,
}

impl std::fmt::Debug for SharedStateTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStateTable")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl SharedStateTable {
    /// Map a fresh table and seed the keys of `spec.kind`.
    ///
    /// Counts are taken from `spec` as given, so pass a normalized spec.
    pub fn create(spec: &PipelineSpec) -> Result<Self> {
        let table = Self {
            kind: spec.kind,
            region: Arc::new(Region::map()?),
        };

        match spec.kind {
            PipelineKind::Batch => {
                table.set(StateKey::BatchStatus, BatchStatus::Start.raw())?;
                table.set(StateKey::BatchCenterUnfinished, spec.center as i64)?;
                table.set(StateKey::BatchRightUnfinished, spec.right as i64)?;
            }
            PipelineKind::Daemon => {
                table.set(StateKey::DaemonCenterUnfinished, spec.center as i64)?;
                table.set(StateKey::DaemonRightUnfinished, spec.right as i64)?;
                table.set(StateKey::DaemonImmediateExit, 0)?;
            }
        }

        debug!(kind = ?spec.kind, center = spec.center, right = spec.right, "shared state table created");
        Ok(table)
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    fn slot(&self, key: StateKey) -> Result<&AtomicI64> {
        key.slot(self.kind)
            .map(|index| self.region.slot(index))
            .ok_or(TasklineError::UnknownStateKey(key))
    }

    pub fn get(&self, key: StateKey) -> Result<i64> {
        Ok(self.slot(key)?.load(Ordering::SeqCst))
    }

    pub fn set(&self, key: StateKey, value: i64) -> Result<()> {
        self.slot(key)?.store(value, Ordering::SeqCst);
        Ok(())
    }

    /// Add `delta` and return the new value.
    pub fn add(&self, key: StateKey, delta: i64) -> Result<i64> {
        Ok(self.slot(key)?.fetch_add(delta, Ordering::SeqCst) + delta)
    }

    /// Store `new` only if the slot currently holds `current`.
    ///
    /// Returns whether the swap happened.
    pub fn compare_and_set(&self, key: StateKey, current: i64, new: i64) -> Result<bool> {
        Ok(self
            .slot(key)?
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    /// Decrement unless the value is already zero or below.
    ///
    /// Returns the new value, or `None` when nothing was decremented.
    pub fn decrement_if_positive(&self, key: StateKey) -> Result<Option<i64>> {
        let slot = self.slot(key)?;
        let previous = slot.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
            (v > 0).then_some(v - 1)
        });
        Ok(previous.ok().map(|v| v - 1))
    }

    /// Current `batchStatus`; errors on a daemon table or a corrupt value.
    pub fn batch_status(&self) -> Result<BatchStatus> {
        let raw = self.get(StateKey::BatchStatus)?;
        BatchStatus::from_raw(raw).ok_or_else(|| {
            TasklineError::ProtocolViolation(format!("batchStatus holds unknown value {raw}"))
        })
    }

    pub fn immediate_exit_requested(&self) -> Result<bool> {
        Ok(self.get(StateKey::DaemonImmediateExit)? == 1)
    }
}

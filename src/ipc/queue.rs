// src/ipc/queue.rs

//! Inter-stage message queues on top of System V message queues.
//!
//! A queue is addressed by a numeric key, so any process that knows the key
//! can attach to it. That is what lets a restarted worker pick up the exact
//! channel its predecessor used: the key is derived from the pipeline's
//! queue-name seed and never changes during a run.
//!
//! Sends and receives never block in the kernel (`IPC_NOWAIT`); instead they
//! poll with a short async sleep until the caller's deadline. A receive that
//! hits the deadline reports "no message", not an error.

use std::time::Duration;

use nix::errno::Errno;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::errors::{Result, TasklineError};
use crate::types::Stage;

/// Largest payload a single message may carry.
pub const MAX_MESSAGE_BYTES: usize = 8192;

/// How long to sleep between non-blocking queue attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Key offset of the queue feeding the center stage.
const CENTER_KEY_OFFSET: i32 = 1;
/// Key offset of the queue feeding the right stage.
const RIGHT_KEY_OFFSET: i32 = 2;

/// Base key for a queue-name seed.
///
/// The top bits are cleared so the per-stage offsets never overflow and the
/// key never collides with `IPC_PRIVATE` (0).
pub fn queue_base_key(seed: &str) -> i32 {
    let hash = blake3::hash(seed.as_bytes());
    let bytes = hash.as_bytes();
    let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    ((raw & 0x3FFF_FFFF) | 0x10) as i32
}

/// Key of the inbound queue for `stage`, if that stage owns one.
///
/// The left stage only sends, so it has no inbound queue.
pub fn stage_queue_key(seed: &str, stage: Stage) -> Option<i32> {
    match stage {
        Stage::Left => None,
        Stage::Center => Some(queue_base_key(seed) + CENTER_KEY_OFFSET),
        Stage::Right => Some(queue_base_key(seed) + RIGHT_KEY_OFFSET),
    }
}

#[repr(C)]
struct RawMessage {
    mtype: libc::c_long,
    mtext: [u8; MAX_MESSAGE_BYTES],
}

impl RawMessage {
    fn boxed() -> Box<Self> {
        Box::new(Self {
            mtype: 1,
            mtext: [0; MAX_MESSAGE_BYTES],
        })
    }
}

/// Handle onto one System V message queue.
///
/// Plain data (key + id), so it can be copied into forked workers freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterStageQueue {
    key: i32,
    id: i32,
}

impl InterStageQueue {
    /// Create the queue for `key`, or attach to it if it already exists.
    pub fn open(key: i32) -> Result<Self> {
        // SAFETY: msgget has no memory-safety preconditions.
        let id = unsafe { libc::msgget(key, libc::IPC_CREAT | 0o600) };
        let id = Errno::result(id)?;
        debug!(key, id, "inter-stage queue attached");
        Ok(Self { key, id })
    }

    pub fn key(&self) -> i32 {
        self.key
    }

    /// Number of messages currently waiting.
    pub fn len(&self) -> Result<usize> {
        // SAFETY: msqid_ds is plain old data; msgctl fills it in.
        let mut stat: libc::msqid_ds = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::msgctl(self.id, libc::IPC_STAT, &mut stat) };
        Errno::result(rc)?;
        Ok(stat.msg_qnum as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Try once to enqueue `payload` without waiting.
    ///
    /// Returns `Ok(false)` when the queue is full.
    pub fn try_send(&self, payload: &[u8]) -> Result<bool> {
        if payload.len() > MAX_MESSAGE_BYTES {
            return Err(TasklineError::MessageTooLarge {
                len: payload.len(),
                max: MAX_MESSAGE_BYTES,
            });
        }

        let mut msg = RawMessage::boxed();
        msg.mtext[..payload.len()].copy_from_slice(payload);

        loop {
            // SAFETY: `msg` is a valid #[repr(C)] message buffer of at least
            // `payload.len()` text bytes.
            let rc = unsafe {
                libc::msgsnd(
                    self.id,
                    (&*msg as *const RawMessage).cast(),
                    payload.len(),
                    libc::IPC_NOWAIT,
                )
            };
            match Errno::result(rc) {
                Ok(_) => return Ok(true),
                Err(Errno::EAGAIN) => return Ok(false),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Try once to dequeue a message without waiting.
    pub fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        let mut msg = RawMessage::boxed();
        loop {
            // SAFETY: `msg` provides MAX_MESSAGE_BYTES of writable text space.
            let n = unsafe {
                libc::msgrcv(
                    self.id,
                    (&mut *msg as *mut RawMessage).cast(),
                    MAX_MESSAGE_BYTES,
                    0,
                    libc::IPC_NOWAIT,
                )
            };
            match Errno::result(n) {
                Ok(n) => return Ok(Some(msg.mtext[..n as usize].to_vec())),
                Err(Errno::ENOMSG) | Err(Errno::EAGAIN) => return Ok(None),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Enqueue `payload`, waiting up to `timeout` for space.
    pub async fn send(&self, payload: &[u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_send(payload)? {
                trace!(key = self.key, len = payload.len(), "message sent");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(TasklineError::QueueFull {
                    key: self.key,
                    waited_ms: timeout.as_millis(),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Dequeue one message, waiting up to `timeout`.
    ///
    /// `Ok(None)` means the wait elapsed with nothing to read.
    pub async fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.try_recv()? {
                trace!(key = self.key, len = payload.len(), "message received");
                return Ok(Some(payload));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn send_json<T: Serialize>(&self, value: &T, timeout: Duration) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.send(&payload, timeout).await
    }

    pub async fn recv_json<T: DeserializeOwned>(&self, timeout: Duration) -> Result<Option<T>> {
        match self.recv(timeout).await? {
            Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
            None => Ok(None),
        }
    }

    /// Remove the queue from the system. Pending messages are discarded.
    pub fn remove(self) -> Result<()> {
        // SAFETY: IPC_RMID ignores the buffer argument.
        let rc = unsafe { libc::msgctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        match Errno::result(rc) {
            Ok(_) | Err(Errno::EINVAL) | Err(Errno::EIDRM) => {
                debug!(key = self.key, "inter-stage queue removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// The two queues of one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineQueues {
    pub center: InterStageQueue,
    pub right: InterStageQueue,
}

impl PipelineQueues {
    pub fn open(seed: &str) -> Result<Self> {
        let base = queue_base_key(seed);
        Ok(Self {
            center: InterStageQueue::open(base + CENTER_KEY_OFFSET)?,
            right: InterStageQueue::open(base + RIGHT_KEY_OFFSET)?,
        })
    }

    /// Inbound queue of `stage`; the left stage has none.
    pub fn inbound(&self, stage: Stage) -> Option<InterStageQueue> {
        match stage {
            Stage::Left => None,
            Stage::Center => Some(self.center),
            Stage::Right => Some(self.right),
        }
    }

    pub fn remove(self) -> Result<()> {
        self.center.remove()?;
        self.right.remove()
    }
}

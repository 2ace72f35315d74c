//! Watchpoints: stored expressions rechecked for value changes on every
//! execution step.
//!
//! Watchpoints live in a fixed arena of 32 slots linked into two disjoint
//! lists, free and active, through per-slot indices. A slot's index is its
//! watchpoint id for its whole lifetime.

use crate::expr::{evaluate_expression, ExprError};
use crate::machine::Machine;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of watchpoint slots in a pool.
pub const POOL_CAPACITY: usize = 32;

/// Identity of a watchpoint: the index of its pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchpointId(usize);

impl WatchpointId {
    /// The slot index behind this id.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WatchpointId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(fmt)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Every slot is active.
    #[error("watchpoint pool is exhausted")]
    Exhausted,
    /// The id does not name a pool slot.
    #[error("watchpoint id {0} is out of range")]
    InvalidId(WatchpointId),
    /// The id names a slot that is not on the active list.
    #[error("watchpoint {0} is not active")]
    NotActive(WatchpointId),
}

/// Failure of [`WatchPool::set`]: allocation or the seeding evaluation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Expr(#[from] ExprError),
}

/// A watchpoint whose expression changed value during a recheck pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: WatchpointId,
    pub old_value: i64,
    pub new_value: i64,
}

/// Receives trigger notifications from [`WatchPool::recheck_all`].
pub trait TriggerSink {
    fn triggered(&mut self, trigger: Trigger);
}

impl<F> TriggerSink for F
where
    F: FnMut(Trigger),
{
    fn triggered(&mut self, trigger: Trigger) {
        self(trigger);
    }
}

#[derive(Debug)]
struct Slot {
    /// The watched expression, `Some` exactly while the slot is active.
    expression: Option<String>,
    /// Value of the expression as of the last evaluation.
    last_value: i64,
    /// Next slot on whichever list this slot is a member of.
    next: Option<usize>,
}

/// Fixed-capacity watchpoint arena.
///
/// Every slot is on exactly one of the free and active lists at any time.
/// Construction puts all of them on the free list; operations move
/// individual slots between the lists and either fully succeed or leave
/// the lists untouched.
#[derive(Debug)]
pub struct WatchPool {
    slots: Vec<Slot>,
    free: Option<usize>,
    active: Option<usize>,
}

impl WatchPool {
    /// Construct a pool with every slot on the free list.
    pub fn new() -> WatchPool {
        let mut slots = Vec::with_capacity(POOL_CAPACITY);

        for index in 0..POOL_CAPACITY {
            slots.push(Slot {
                expression: None,
                last_value: 0,
                next: if index + 1 < POOL_CAPACITY {
                    Some(index + 1)
                } else {
                    None
                },
            });
        }

        WatchPool {
            slots,
            free: Some(0),
            active: None,
        }
    }

    /// Move a slot from the free list to the head of the active list.
    ///
    /// The fresh watchpoint has an empty expression and a zero value until
    /// [`set`](WatchPool::set) seeds it.
    pub fn allocate(&mut self) -> Result<WatchpointId, PoolError> {
        let index = match self.free {
            Some(index) => index,
            None => return Err(PoolError::Exhausted),
        };

        self.free = self.slots[index].next;
        self.slots[index].next = self.active;
        self.slots[index].expression = Some(String::new());
        self.slots[index].last_value = 0;
        self.active = Some(index);

        log::debug!("allocated watchpoint {}", index);
        Ok(WatchpointId(index))
    }

    /// Store an expression in a fresh watchpoint, evaluating it once to
    /// seed the stored value.
    ///
    /// If the seeding evaluation fails the slot is released again, so a
    /// watchpoint is never observable with an unspecified value. A full
    /// pool reports [`PoolError::Exhausted`] even for an expression that
    /// would not have evaluated.
    pub fn set(
        &mut self,
        expression: &str,
        machine: &impl Machine,
    ) -> Result<WatchpointId, WatchError> {
        let id = self.allocate()?;

        match evaluate_expression(expression, machine) {
            Ok(value) => {
                let slot = &mut self.slots[id.index()];
                slot.expression = Some(expression.to_owned());
                slot.last_value = value;

                log::debug!("set watchpoint {} on `{}`, value {}", id, expression, value);
                Ok(id)
            }
            Err(e) => {
                self.remove(id)?;
                Err(WatchError::Expr(e))
            }
        }
    }

    /// Unlink a watchpoint from the active list and return its slot to
    /// the free list. The stored expression is dropped.
    pub fn remove(&mut self, id: WatchpointId) -> Result<(), PoolError> {
        let index = id.index();

        if index >= self.slots.len() {
            return Err(PoolError::InvalidId(id));
        }

        // Nothing is mutated until the slot is actually found on the
        // active list, so a failed removal leaves the pool as it was.
        let head = match self.active {
            Some(head) => head,
            None => return Err(PoolError::NotActive(id)),
        };

        if head == index {
            self.active = self.slots[index].next;
        } else {
            let mut prev = head;

            loop {
                let next = match self.slots[prev].next {
                    Some(next) => next,
                    None => return Err(PoolError::NotActive(id)),
                };

                if next == index {
                    break;
                }

                prev = next;
            }

            self.slots[prev].next = self.slots[index].next;
        }

        self.slots[index].expression = None;
        self.slots[index].next = self.free;
        self.free = Some(index);

        log::debug!("removed watchpoint {}", id);
        Ok(())
    }

    /// Active watchpoints and their expressions, most recently set first.
    pub fn list(&self) -> Vec<(WatchpointId, &str)> {
        let mut entries = Vec::new();
        let mut cur = self.active;

        while let Some(index) = cur {
            let slot = &self.slots[index];

            if let Some(expression) = slot.expression.as_deref() {
                entries.push((WatchpointId(index), expression));
            }

            cur = slot.next;
        }

        entries
    }

    /// Re-evaluate every active watchpoint in list order.
    ///
    /// A watchpoint whose value changed is reported through `sink` and its
    /// stored value updated. Entries whose expression no longer evaluates
    /// are returned with their failure; they do not stop the pass, and
    /// their stored value is left alone.
    pub fn recheck_all(
        &mut self,
        machine: &impl Machine,
        sink: &mut impl TriggerSink,
    ) -> Vec<(WatchpointId, ExprError)> {
        let mut failures = Vec::new();
        let mut cur = self.active;

        while let Some(index) = cur {
            let next = self.slots[index].next;

            let outcome = match self.slots[index].expression.as_deref() {
                Some(expression) => evaluate_expression(expression, machine),
                None => {
                    cur = next;
                    continue;
                }
            };

            match outcome {
                Ok(new_value) => {
                    let slot = &mut self.slots[index];

                    if new_value != slot.last_value {
                        let trigger = Trigger {
                            id: WatchpointId(index),
                            old_value: slot.last_value,
                            new_value,
                        };

                        slot.last_value = new_value;

                        log::info!(
                            "watchpoint {} triggered: {} -> {}",
                            index,
                            trigger.old_value,
                            trigger.new_value
                        );
                        sink.triggered(trigger);
                    }
                }
                Err(e) => {
                    log::warn!("watchpoint {} failed to evaluate: {}", index, e);
                    failures.push((WatchpointId(index), e));
                }
            }

            cur = next;
        }

        failures
    }
}

impl Default for WatchPool {
    fn default() -> WatchPool {
        WatchPool::new()
    }
}

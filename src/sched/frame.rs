/*!
 * Process Frames
 * Scheduling records for admitted processes and the frame queue they rotate in
 */

use crate::core::errors::SchedulerError;
use crate::core::types::{SchedResult, Ticks};
use crate::process::Process;
use std::sync::Arc;

/// Coarse classification of how a process spends its quanta
///
/// Trends toward `Heavy` when the frame keeps exhausting its epoch quantum
/// and toward `Light` when its threads yield early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageLevel {
    Light,
    Normal,
    Heavy,
}

impl UsageLevel {
    pub(crate) fn hotter(self) -> Self {
        match self {
            Self::Light => Self::Normal,
            _ => Self::Heavy,
        }
    }

    pub(crate) fn cooler(self) -> Self {
        match self {
            Self::Heavy => Self::Normal,
            _ => Self::Light,
        }
    }
}

/// The scheduler's bookkeeping record for one admitted process
///
/// Created on admission, destroyed on removal, never shared between CPUs.
#[derive(Debug)]
pub struct ProcessFrame {
    proc: Arc<Process>,
    pub(crate) ticks_left: Ticks,
    pub(crate) ticks_max: Ticks,
    pub(crate) last_thread_index: usize,
    pub(crate) usage: UsageLevel,
}

impl ProcessFrame {
    pub fn new(proc: Arc<Process>, epoch_ticks: Ticks) -> Self {
        Self {
            proc,
            ticks_left: epoch_ticks,
            ticks_max: epoch_ticks,
            last_thread_index: 0,
            usage: UsageLevel::Normal,
        }
    }

    #[inline(always)]
    pub fn process(&self) -> &Arc<Process> {
        &self.proc
    }

    #[inline(always)]
    pub fn ticks_left(&self) -> Ticks {
        self.ticks_left
    }

    #[inline(always)]
    pub fn ticks_max(&self) -> Ticks {
        self.ticks_max
    }

    pub fn usage(&self) -> UsageLevel {
        self.usage
    }
}

/// Generation-checked handle into the frame arena
///
/// Stable for the lifetime of one frame; reusing a slot bumps the generation
/// so stale handles resolve to not-found instead of aliasing a new frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId {
    index: u32,
    generation: u32,
}

struct Occupied {
    frame: ProcessFrame,
    next: Option<u32>,
    prev: Option<u32>,
}

struct Slot {
    generation: u32,
    occupied: Option<Occupied>,
}

/// Queue of process frames in dequeue order
///
/// An arena of slots doubly linked through indices: O(1) enqueue at either
/// end, O(1) splice-behind and rotation, O(n) identity scans. Invariant:
/// `len == 0` iff `head` and `tail` are both `None`; the chain is acyclic.
pub struct FrameQueue {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append at the back; becomes the front as well if the queue was empty
    pub fn push_back(&mut self, frame: ProcessFrame) -> FrameId {
        let id = self.alloc(frame);
        self.link_back(id.index);
        self.len += 1;
        id
    }

    /// Insert so the frame becomes the next one picked
    pub fn push_front(&mut self, frame: ProcessFrame) -> FrameId {
        let id = self.alloc(frame);
        self.link_front(id.index);
        self.len += 1;
        id
    }

    /// Splice directly behind `target` in dequeue order
    ///
    /// Not-found is a reported failure and the queue is left untouched;
    /// callers must tolerate it during teardown races.
    pub fn insert_behind(&mut self, target: FrameId, frame: ProcessFrame) -> SchedResult<FrameId> {
        let target_idx = self.resolve(target).ok_or(SchedulerError::FrameNotFound)?;
        let id = self.alloc(frame);
        self.link_after(target_idx, id.index);
        self.len += 1;
        Ok(id)
    }

    /// Remove and return the front frame
    pub fn pop_front(&mut self) -> Option<ProcessFrame> {
        let head = self.head?;
        self.unlink(head);
        self.len -= 1;
        Some(self.release(head))
    }

    /// Front frame without removing it
    pub fn front(&self) -> Option<&ProcessFrame> {
        self.head.map(|idx| &self.occ(idx).frame)
    }

    pub fn front_mut(&mut self) -> Option<&mut ProcessFrame> {
        let head = self.head?;
        Some(&mut self.occ_mut(head).frame)
    }

    pub fn front_id(&self) -> Option<FrameId> {
        self.head.map(|idx| FrameId {
            index: idx,
            generation: self.slots[idx as usize].generation,
        })
    }

    pub fn get(&self, id: FrameId) -> Option<&ProcessFrame> {
        self.resolve(id).map(|idx| &self.occ(idx).frame)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut ProcessFrame> {
        let idx = self.resolve(id)?;
        Some(&mut self.occ_mut(idx).frame)
    }

    /// Unlink an arbitrary frame and destroy its slot
    pub fn remove(&mut self, id: FrameId) -> SchedResult<ProcessFrame> {
        let idx = self.resolve(id).ok_or(SchedulerError::FrameNotFound)?;
        self.unlink(idx);
        self.len -= 1;
        Ok(self.release(idx))
    }

    /// Round-robin requeue: unlink and append at the back, keeping the handle
    pub fn requeue(&mut self, id: FrameId) -> SchedResult<()> {
        let idx = self.resolve(id).ok_or(SchedulerError::FrameNotFound)?;
        self.unlink(idx);
        self.link_back(idx);
        Ok(())
    }

    /// Move the front frame to the back; no-op for fewer than two frames
    pub fn rotate(&mut self) {
        if self.len < 2 {
            return;
        }
        if let Some(head) = self.head {
            self.unlink(head);
            self.link_back(head);
        }
    }

    /// First frame matching a predicate, scanning in dequeue order
    pub fn find(&self, mut pred: impl FnMut(&ProcessFrame) -> bool) -> Option<FrameId> {
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let occ = self.occ(idx);
            if pred(&occ.frame) {
                return Some(FrameId {
                    index: idx,
                    generation: self.slots[idx as usize].generation,
                });
            }
            cursor = occ.next;
        }
        None
    }

    /// Frames in dequeue order
    pub fn iter(&self) -> impl Iterator<Item = &ProcessFrame> {
        FrameIter {
            queue: self,
            cursor: self.head,
        }
    }

    fn alloc(&mut self, frame: ProcessFrame) -> FrameId {
        let occupied = Occupied {
            frame,
            next: None,
            prev: None,
        };
        match self.free.pop() {
            Some(idx) => {
                let slot = &mut self.slots[idx as usize];
                slot.occupied = Some(occupied);
                FrameId {
                    index: idx,
                    generation: slot.generation,
                }
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    occupied: Some(occupied),
                });
                FrameId {
                    index: idx,
                    generation: 0,
                }
            }
        }
    }

    fn release(&mut self, idx: u32) -> ProcessFrame {
        let slot = &mut self.slots[idx as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx);
        slot.occupied
            .take()
            .map(|occ| occ.frame)
            .expect("released slot must be occupied")
    }

    fn resolve(&self, id: FrameId) -> Option<u32> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation == id.generation && slot.occupied.is_some() {
            Some(id.index)
        } else {
            None
        }
    }

    #[inline]
    fn occ(&self, idx: u32) -> &Occupied {
        self.slots[idx as usize]
            .occupied
            .as_ref()
            .expect("queue link points at vacant slot")
    }

    #[inline]
    fn occ_mut(&mut self, idx: u32) -> &mut Occupied {
        self.slots[idx as usize]
            .occupied
            .as_mut()
            .expect("queue link points at vacant slot")
    }

    fn link_back(&mut self, idx: u32) {
        match self.tail {
            Some(tail) => {
                self.occ_mut(tail).next = Some(idx);
                self.occ_mut(idx).prev = Some(tail);
                self.tail = Some(idx);
            }
            None => {
                self.head = Some(idx);
                self.tail = Some(idx);
            }
        }
    }

    fn link_front(&mut self, idx: u32) {
        match self.head {
            Some(head) => {
                self.occ_mut(head).prev = Some(idx);
                self.occ_mut(idx).next = Some(head);
                self.head = Some(idx);
            }
            None => {
                self.head = Some(idx);
                self.tail = Some(idx);
            }
        }
    }

    fn link_after(&mut self, target: u32, idx: u32) {
        let next = self.occ(target).next;
        self.occ_mut(target).next = Some(idx);
        {
            let occ = self.occ_mut(idx);
            occ.prev = Some(target);
            occ.next = next;
        }
        match next {
            Some(next_idx) => self.occ_mut(next_idx).prev = Some(idx),
            None => self.tail = Some(idx),
        }
    }

    fn unlink(&mut self, idx: u32) {
        let (prev, next) = {
            let occ = self.occ(idx);
            (occ.prev, occ.next)
        };
        match prev {
            Some(p) => self.occ_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.occ_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let occ = self.occ_mut(idx);
        occ.prev = None;
        occ.next = None;
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct FrameIter<'a> {
    queue: &'a FrameQueue,
    cursor: Option<u32>,
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = &'a ProcessFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let occ = self.queue.occ(idx);
        self.cursor = occ.next;
        Some(&occ.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Pid;
    use crate::process::ProcFlags;

    fn frame(pid: Pid) -> ProcessFrame {
        ProcessFrame::new(Process::new(pid, format!("p{pid}"), ProcFlags::empty()), 4)
    }

    fn pids(queue: &FrameQueue) -> Vec<Pid> {
        queue.iter().map(|f| f.process().pid()).collect()
    }

    #[test]
    fn test_push_back_and_front_pointers() {
        let mut queue = FrameQueue::new();
        assert!(queue.is_empty());
        assert!(queue.front().is_none());

        queue.push_back(frame(1));
        // A single frame is both front and back
        assert_eq!(queue.front().unwrap().process().pid(), 1);

        queue.push_back(frame(2));
        assert_eq!(pids(&queue), vec![1, 2]);
    }

    #[test]
    fn test_push_front() {
        let mut queue = FrameQueue::new();
        queue.push_back(frame(1));
        queue.push_front(frame(2));
        assert_eq!(pids(&queue), vec![2, 1]);
    }

    #[test]
    fn test_insert_behind() {
        let mut queue = FrameQueue::new();
        let first = queue.push_back(frame(1));
        queue.push_back(frame(2));

        queue.insert_behind(first, frame(3)).unwrap();
        assert_eq!(pids(&queue), vec![1, 3, 2]);
    }

    #[test]
    fn test_insert_behind_tail_updates_tail() {
        let mut queue = FrameQueue::new();
        let only = queue.push_back(frame(1));
        queue.insert_behind(only, frame(2)).unwrap();

        queue.push_back(frame(3));
        assert_eq!(pids(&queue), vec![1, 2, 3]);
    }

    #[test]
    fn test_insert_behind_missing_target() {
        let mut queue = FrameQueue::new();
        let id = queue.push_back(frame(1));
        queue.remove(id).unwrap();

        let err = queue.insert_behind(id, frame(2)).unwrap_err();
        assert_eq!(err, SchedulerError::FrameNotFound);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_front_empties_queue() {
        let mut queue = FrameQueue::new();
        queue.push_back(frame(1));

        assert_eq!(queue.pop_front().unwrap().process().pid(), 1);
        assert!(queue.is_empty());
        assert!(queue.front_id().is_none());
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn test_remove_head_tail_and_middle() {
        let mut queue = FrameQueue::new();
        let a = queue.push_back(frame(1));
        let b = queue.push_back(frame(2));
        let c = queue.push_back(frame(3));

        queue.remove(b).unwrap();
        assert_eq!(pids(&queue), vec![1, 3]);

        queue.remove(a).unwrap();
        assert_eq!(pids(&queue), vec![3]);

        queue.remove(c).unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut queue = FrameQueue::new();
        let stale = queue.push_back(frame(1));
        queue.remove(stale).unwrap();

        // Slot gets reused; the old handle must not alias the new frame
        queue.push_back(frame(2));
        assert_eq!(queue.remove(stale).unwrap_err(), SchedulerError::FrameNotFound);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_rotate_round_robin() {
        let mut queue = FrameQueue::new();
        queue.push_back(frame(1));
        queue.push_back(frame(2));
        queue.push_back(frame(3));

        queue.rotate();
        assert_eq!(pids(&queue), vec![2, 3, 1]);
        queue.rotate();
        assert_eq!(pids(&queue), vec![3, 1, 2]);
        queue.rotate();
        assert_eq!(pids(&queue), vec![1, 2, 3]);
    }

    #[test]
    fn test_rotate_single_frame_is_noop() {
        let mut queue = FrameQueue::new();
        let id = queue.push_back(frame(1));
        queue.rotate();
        assert_eq!(queue.front_id(), Some(id));
    }

    #[test]
    fn test_requeue_keeps_handle_valid() {
        let mut queue = FrameQueue::new();
        let a = queue.push_back(frame(1));
        queue.push_back(frame(2));

        queue.requeue(a).unwrap();
        assert_eq!(pids(&queue), vec![2, 1]);
        assert_eq!(queue.get(a).unwrap().process().pid(), 1);
    }

    #[test]
    fn test_find_by_pid() {
        let mut queue = FrameQueue::new();
        queue.push_back(frame(1));
        let b = queue.push_back(frame(2));

        assert_eq!(queue.find(|f| f.process().pid() == 2), Some(b));
        assert_eq!(queue.find(|f| f.process().pid() == 9), None);
    }
}

//! Queue disciplines for admitted message tasks.
//!
//! Every queue implements [`TaskQueue`]. [`ClassScheduler`] composes lanes
//! and drains them in a fixed order.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use shared_types::PeerId;

use super::MessageTask;
use crate::config::{SchedulingMode, SyncConfig};
use crate::events::{MessageType, PriorityClass};

/// Which tasks a queue accepts.
#[derive(Clone, Debug)]
pub enum AcceptancePolicy {
    AcceptAll,
    AcceptTypes(HashSet<MessageType>),
}

impl AcceptancePolicy {
    /// Accept every message type of the given scheduling class.
    pub fn for_class(class: PriorityClass) -> Self {
        AcceptancePolicy::AcceptTypes(
            MessageType::ALL
                .into_iter()
                .filter(|t| t.priority_class() == class)
                .collect(),
        )
    }

    pub fn accepts(&self, task: &MessageTask) -> bool {
        match self {
            AcceptancePolicy::AcceptAll => true,
            AcceptancePolicy::AcceptTypes(types) => types.contains(&task.message_type()),
        }
    }
}

/// A queue of admitted tasks.
pub trait TaskQueue: Send {
    /// Adds a task, returning one evicted to make room, if any.
    fn push(&mut self, task: MessageTask) -> Option<MessageTask>;

    fn pop(&mut self) -> Option<MessageTask>;

    fn size(&self) -> usize;

    fn accepts(&self, task: &MessageTask) -> bool;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// Build the queue for the configured scheduling mode.
pub fn build_task_queue(config: &SyncConfig) -> Box<dyn TaskQueue> {
    match config.scheduling {
        SchedulingMode::ByScore => Box::new(ScoredQueue::new(AcceptancePolicy::AcceptAll)),
        SchedulingMode::ByPriorityClass => {
            Box::new(ClassScheduler::by_priority_class(config.peer_queue_capacity))
        }
    }
}

/// FIFO without a bound.
pub struct UnboundedQueue {
    policy: AcceptancePolicy,
    tasks: VecDeque<MessageTask>,
}

impl UnboundedQueue {
    pub fn new(policy: AcceptancePolicy) -> Self {
        Self {
            policy,
            tasks: VecDeque::new(),
        }
    }
}

impl TaskQueue for UnboundedQueue {
    fn push(&mut self, task: MessageTask) -> Option<MessageTask> {
        self.tasks.push_back(task);
        None
    }

    fn pop(&mut self) -> Option<MessageTask> {
        self.tasks.pop_front()
    }

    fn size(&self) -> usize {
        self.tasks.len()
    }

    fn accepts(&self, task: &MessageTask) -> bool {
        self.policy.accepts(task)
    }
}

/// Holds at most `capacity` tasks per sender; the sender's oldest task is
/// evicted when full.
///
/// No ordering is guaranteed across senders.
pub struct PeerBoundedQueue {
    policy: AcceptancePolicy,
    capacity: usize,
    per_peer: HashMap<PeerId, VecDeque<MessageTask>>,
    size: usize,
}

impl PeerBoundedQueue {
    pub fn new(policy: AcceptancePolicy, capacity: usize) -> Self {
        Self {
            policy,
            capacity: capacity.max(1),
            per_peer: HashMap::new(),
            size: 0,
        }
    }
}

impl TaskQueue for PeerBoundedQueue {
    fn push(&mut self, task: MessageTask) -> Option<MessageTask> {
        let window = self.per_peer.entry(task.sender).or_default();
        let evicted = if window.len() >= self.capacity {
            window.pop_front()
        } else {
            None
        };
        window.push_back(task);
        if evicted.is_none() {
            self.size += 1;
        }
        evicted
    }

    fn pop(&mut self) -> Option<MessageTask> {
        let peer = *self.per_peer.keys().next()?;
        let window = self.per_peer.get_mut(&peer)?;
        let task = window.pop_front();
        if window.is_empty() {
            self.per_peer.remove(&peer);
        }
        if task.is_some() {
            self.size -= 1;
        }
        task
    }

    fn size(&self) -> usize {
        self.size
    }

    fn accepts(&self, task: &MessageTask) -> bool {
        self.policy.accepts(task)
    }
}

struct ScoredTask {
    task: MessageTask,
    sequence: u64,
}

impl PartialEq for ScoredTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredTask {}

impl PartialOrd for ScoredTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher score first, then earlier admission
        self.task
            .score
            .total_cmp(&other.task.score)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Unbounded priority queue ordered by admission score.
pub struct ScoredQueue {
    policy: AcceptancePolicy,
    heap: BinaryHeap<ScoredTask>,
    next_sequence: u64,
}

impl ScoredQueue {
    pub fn new(policy: AcceptancePolicy) -> Self {
        Self {
            policy,
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }
}

impl TaskQueue for ScoredQueue {
    fn push(&mut self, task: MessageTask) -> Option<MessageTask> {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.heap.push(ScoredTask { task, sequence });
        None
    }

    fn pop(&mut self) -> Option<MessageTask> {
        self.heap.pop().map(|scored| scored.task)
    }

    fn size(&self) -> usize {
        self.heap.len()
    }

    fn accepts(&self, task: &MessageTask) -> bool {
        self.policy.accepts(task)
    }
}

/// Ordered lanes; a task goes to the first lane accepting it and the
/// first non-empty lane is drained first.
pub struct ClassScheduler {
    lanes: Vec<Box<dyn TaskQueue>>,
}

impl ClassScheduler {
    pub fn new(lanes: Vec<Box<dyn TaskQueue>>) -> Self {
        Self { lanes }
    }

    /// Priority lane (unbounded FIFO), then block hash announcements
    /// (bounded per peer), then everything else by score.
    pub fn by_priority_class(peer_capacity: usize) -> Self {
        Self::new(vec![
            Box::new(UnboundedQueue::new(AcceptancePolicy::for_class(
                PriorityClass::Priority,
            ))),
            Box::new(PeerBoundedQueue::new(
                AcceptancePolicy::for_class(PriorityClass::RateLimited),
                peer_capacity,
            )),
            Box::new(ScoredQueue::new(AcceptancePolicy::AcceptAll)),
        ])
    }
}

impl TaskQueue for ClassScheduler {
    fn push(&mut self, task: MessageTask) -> Option<MessageTask> {
        match self.lanes.iter_mut().find(|lane| lane.accepts(&task)) {
            Some(lane) => lane.push(task),
            // No lane takes it: dropped
            None => Some(task),
        }
    }

    fn pop(&mut self) -> Option<MessageTask> {
        self.lanes.iter_mut().find_map(|lane| lane.pop())
    }

    fn size(&self) -> usize {
        self.lanes.iter().map(|lane| lane.size()).sum()
    }

    fn accepts(&self, task: &MessageTask) -> bool {
        self.lanes.iter().any(|lane| lane.accepts(task))
    }
}

//! One-shot timers that post [`Message::TimerTimeout`] to the task that armed them.

use alloc::collections::BinaryHeap;
use core::cmp::Ordering;

use crate::{Message, TaskId};

/// Ticks per second of the timer interrupt.
pub const TIMER_FREQ: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timer {
    timeout: u64,
    task_id: TaskId,
}

/// Earliest deadline first, so the max-heap pops the next timer to fire.
impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timeout
            .cmp(&self.timeout)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending timers and the tick count they are measured against.
#[derive(Debug, Default)]
pub struct TimerQueue {
    tick: u64,
    timers: BinaryHeap<Timer>,
}

impl TimerQueue {
    pub const fn new() -> Self {
        Self {
            tick: 0,
            timers: BinaryHeap::new(),
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Arms a timer that fires for `task_id` once the tick count reaches `timeout`.
    pub fn add(&mut self, timeout: u64, task_id: TaskId) {
        self.timers.push(Timer { timeout, task_id });
    }

    /// Advances one tick and hands every timer that is now due to `expired`, earliest first.
    pub fn tick(&mut self, mut expired: impl FnMut(TaskId, Message)) {
        self.tick += 1;
        while let Some(timer) = self.timers.peek().copied() {
            if timer.timeout > self.tick {
                break;
            }
            self.timers.pop();
            expired(
                timer.task_id,
                Message::TimerTimeout {
                    timeout: timer.timeout,
                    task_id: timer.task_id,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn run(queue: &mut TimerQueue) -> Vec<(TaskId, u64)> {
        let mut fired = Vec::new();
        queue.tick(|task, msg| {
            let Message::TimerTimeout { timeout, .. } = msg else {
                panic!("unexpected {msg:?}");
            };
            fired.push((task, timeout));
        });
        fired
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let mut queue = TimerQueue::new();
        queue.add(3, TaskId::new(4));
        queue.add(1, TaskId::new(5));
        queue.add(3, TaskId::new(3));

        assert_eq!(run(&mut queue), [(TaskId::new(5), 1)]);
        assert!(run(&mut queue).is_empty());
        assert_eq!(
            run(&mut queue),
            [(TaskId::new(3), 3), (TaskId::new(4), 3)]
        );
        assert_eq!(queue.current_tick(), 3);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn overdue_timer_fires_on_next_tick() {
        let mut queue = TimerQueue::new();
        for _ in 0..5 {
            run(&mut queue);
        }
        queue.add(2, TaskId::new(3));
        assert_eq!(run(&mut queue), [(TaskId::new(3), 2)]);
    }
}

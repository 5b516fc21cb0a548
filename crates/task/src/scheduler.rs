//! Interrupt-safe access to the task manager.

use spin::Mutex;

use crate::{Error, Message, Switch, Task, TaskEntry, TaskId, TaskManager, TimerQueue, arch};

/// The kernel's handle on the task manager.
///
/// Every method runs with interrupts disabled, so an interrupt handler never observes a
/// half-updated run queue or mailbox. Context switches happen after the manager lock is
/// released but before interrupts are re-enabled.
pub struct Scheduler {
    manager: Mutex<TaskManager>,
    timers: Mutex<TimerQueue>,
}

impl Scheduler {
    pub fn new(manager: TaskManager) -> Self {
        Self {
            manager: Mutex::new(manager),
            timers: Mutex::new(TimerQueue::new()),
        }
    }

    /// Creates a task that will run `entry(id, data)` and makes it runnable.
    pub fn spawn(&self, entry: TaskEntry, data: i64) -> TaskId {
        arch::without_interrupts(|| {
            let mut manager = self.manager.lock();
            let id = manager.new_task().init_context(entry, data).id();
            // The id was just handed out by this manager.
            let _ = manager.wakeup(id);
            id
        })
    }

    /// Switches to the next runnable task, requeueing the current one unless it sleeps.
    pub fn switch_task(&self, current_sleep: bool) {
        arch::without_interrupts(|| {
            let switch = self.manager.lock().rotate(current_sleep);
            perform(switch);
        });
    }

    /// Puts `id` to sleep, switching away first if it is the running task.
    pub fn sleep(&self, id: TaskId) -> Result<(), Error> {
        arch::without_interrupts(|| {
            let switch = self.manager.lock().sleep(id)?;
            if let Some(switch) = switch {
                perform(switch);
            }
            Ok(())
        })
    }

    /// Puts the running task to sleep.
    pub fn sleep_current(&self) {
        self.switch_task(true);
    }

    pub fn wakeup(&self, id: TaskId) -> Result<(), Error> {
        arch::without_interrupts(|| self.manager.lock().wakeup(id))
    }

    /// Delivers `msg` to `id`, waking it if it sleeps.
    pub fn send_message(&self, id: TaskId, msg: Message) -> Result<(), Error> {
        arch::without_interrupts(|| self.manager.lock().send_message(id, msg))
    }

    /// Pops the running task's oldest message.
    pub fn receive_message(&self) -> Option<Message> {
        self.with_current(Task::receive_message)
    }

    /// Returns the running task's next message, sleeping until one arrives.
    pub fn wait_message(&self) -> Message {
        loop {
            let received = arch::without_interrupts(|| {
                let mut manager = self.manager.lock();
                let msg = manager.current_task().receive_message();
                if msg.is_none() {
                    let switch = manager.rotate(true);
                    drop(manager);
                    perform(switch);
                }
                msg
            });
            if let Some(msg) = received {
                return msg;
            }
        }
    }

    pub fn current_tick(&self) -> u64 {
        arch::without_interrupts(|| self.timers.lock().current_tick())
    }

    /// Arms a timer that sends the running task a [`Message::TimerTimeout`] once the tick
    /// count reaches `timeout`.
    pub fn add_timer(&self, timeout: u64) {
        arch::without_interrupts(|| {
            let id = self.manager.lock().current_task().id();
            self.timers.lock().add(timeout, id);
        });
    }

    /// Advances the clock by one tick and delivers every timer that came due. Called from
    /// the timer interrupt.
    pub fn tick(&self) {
        arch::without_interrupts(|| {
            let mut manager = self.manager.lock();
            self.timers.lock().tick(|id, msg| {
                if let Err(err) = manager.send_message(id, msg) {
                    log::warn!("dropping timer for task {id}: {err}");
                }
            });
        });
    }

    pub fn current_id(&self) -> TaskId {
        self.with_current(|task| task.id())
    }

    /// Runs `f` on the running task.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut Task) -> R) -> R {
        arch::without_interrupts(|| f(self.manager.lock().current_task()))
    }

    /// Runs `f` on task `id`.
    pub fn with_task<R>(&self, id: TaskId, f: impl FnOnce(&mut Task) -> R) -> Result<R, Error> {
        arch::without_interrupts(|| self.manager.lock().find_mut(id).map(f))
    }
}

fn perform(switch: Switch) {
    if switch.from != switch.to {
        // SAFETY: both contexts belong to tasks the manager keeps alive for the kernel's
        // lifetime, and interrupts are disabled by the caller.
        unsafe { arch::switch_context(switch.next, switch.current) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "sysv64" fn idle(_: u64, _: i64) -> ! {
        unreachable!()
    }

    #[test]
    fn spawn_makes_task_runnable_with_prepared_context() {
        let scheduler = Scheduler::new(TaskManager::new(idle));
        let id = scheduler.spawn(idle, 42);

        let rsi = scheduler.with_task(id, |task| task.context().rsi).unwrap();
        assert_eq!(rsi, 42);
        assert_eq!(scheduler.current_id(), TaskId::new(1));
    }

    #[test]
    fn sleep_current_hands_cpu_to_next_task() {
        let scheduler = Scheduler::new(TaskManager::new(idle));
        scheduler.sleep(TaskId::new(1)).unwrap();
        assert_eq!(scheduler.current_id(), TaskId::new(2));

        scheduler.send_message(TaskId::new(1), Message::WindowActive { activate: true })
            .unwrap();
        scheduler.switch_task(false);
        assert_eq!(scheduler.current_id(), TaskId::new(1));
        assert_eq!(
            scheduler.wait_message(),
            Message::WindowActive { activate: true }
        );
    }

    #[test]
    fn expired_timer_wakes_the_task_that_armed_it() {
        let scheduler = Scheduler::new(TaskManager::new(idle));
        let armed_at = scheduler.current_tick();
        scheduler.add_timer(armed_at + 2);
        scheduler.sleep(TaskId::new(1)).unwrap();
        assert_eq!(scheduler.current_id(), TaskId::new(2));

        scheduler.tick();
        scheduler.switch_task(false);
        assert_eq!(scheduler.current_id(), TaskId::new(2));

        scheduler.tick();
        scheduler.switch_task(false);
        assert_eq!(scheduler.current_id(), TaskId::new(1));
        assert_eq!(
            scheduler.receive_message(),
            Some(Message::TimerTimeout {
                timeout: armed_at + 2,
                task_id: TaskId::new(1),
            })
        );
    }

    #[test]
    fn with_task_reports_unknown_ids() {
        let scheduler = Scheduler::new(TaskManager::new(idle));
        assert_eq!(
            scheduler.with_task(TaskId::new(7), |task| task.id()),
            Err(Error::NotFound)
        );
    }
}

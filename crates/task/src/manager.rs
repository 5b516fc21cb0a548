//! Task ownership and the run queue.

use alloc::{boxed::Box, collections::VecDeque, vec::Vec};

use crate::{Error, Message, Task, TaskContext, TaskEntry, TaskId};

/// A context switch decided by the run queue, to be carried out by the caller.
///
/// Both pointers address contexts inside tasks owned by the [`TaskManager`], which never
/// drops or moves a task.
#[derive(Debug)]
pub struct Switch {
    pub from: TaskId,
    pub to: TaskId,
    pub current: *mut TaskContext,
    pub next: *const TaskContext,
}

/// Owns all tasks and decides which one runs.
///
/// The front of the run queue is the running task. Tasks absent from the queue are asleep.
pub struct TaskManager {
    tasks: Vec<Box<Task>>,
    latest_id: u64,
    running: VecDeque<TaskId>,
}

impl TaskManager {
    /// Creates the manager with two tasks already runnable: the caller's own context,
    /// which becomes task 1 and is saved on the first switch away from it, and an idle
    /// task running `idle` that keeps the run queue from ever draining.
    pub fn new(idle: TaskEntry) -> Self {
        let mut manager = Self {
            tasks: Vec::new(),
            latest_id: 0,
            running: VecDeque::new(),
        };

        let main = manager.new_task().id();
        manager.running.push_back(main);

        let idle_id = manager.new_task().init_context(idle, 0).id();
        manager.running.push_back(idle_id);

        log::debug!("task manager ready: main = {main}, idle = {idle_id}");
        manager
    }

    /// Allocates a task with the next id. The task starts asleep.
    pub fn new_task(&mut self) -> &mut Task {
        self.latest_id += 1;
        let id = TaskId::new(self.latest_id);
        self.tasks.push(Box::new(Task::new(id)));
        log::trace!("created task {id}");
        let index = self.tasks.len() - 1;
        &mut self.tasks[index]
    }

    /// Removes the front task, requeues it at the back unless it is going to sleep, and
    /// returns the switch to the new front.
    ///
    /// # Panics
    ///
    /// Panics if no task is left runnable.
    pub fn rotate(&mut self, current_sleep: bool) -> Switch {
        let Some(from) = self.running.pop_front() else {
            panic!("run queue is empty");
        };
        if !current_sleep {
            self.running.push_back(from);
        }
        let Some(&to) = self.running.front() else {
            panic!("no runnable task after {from} went to sleep");
        };

        log::trace!("switch {from} -> {to}");
        let current: *mut TaskContext = self.task_mut_unchecked(from).context_mut();
        let next: *const TaskContext = self.task_mut_unchecked(to).context();
        Switch {
            from,
            to,
            current,
            next,
        }
    }

    /// Puts `id` to sleep.
    ///
    /// Returns the switch the caller must perform if `id` was the running task.
    pub fn sleep(&mut self, id: TaskId) -> Result<Option<Switch>, Error> {
        self.find(id)?;
        match self.running.iter().position(|&t| t == id) {
            Some(0) => Ok(Some(self.rotate(true))),
            Some(pos) => {
                self.running.remove(pos);
                log::trace!("task {id} asleep");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Makes `id` runnable at the back of the queue. Waking a runnable task does nothing.
    pub fn wakeup(&mut self, id: TaskId) -> Result<(), Error> {
        self.find(id)?;
        if !self.running.contains(&id) {
            self.running.push_back(id);
            log::trace!("task {id} woken");
        }
        Ok(())
    }

    /// Appends `msg` to the mailbox of `id` and makes the task runnable.
    pub fn send_message(&mut self, id: TaskId, msg: Message) -> Result<(), Error> {
        self.find_mut(id)?.push_message(msg);
        self.wakeup(id)
    }

    /// Returns the running task.
    pub fn current_task(&mut self) -> &mut Task {
        let Some(&id) = self.running.front() else {
            panic!("run queue is empty");
        };
        self.task_mut_unchecked(id)
    }

    pub fn find(&self, id: TaskId) -> Result<&Task, Error> {
        self.index_of(id).map(|i| &*self.tasks[i]).ok_or(Error::NotFound)
    }

    pub fn find_mut(&mut self, id: TaskId) -> Result<&mut Task, Error> {
        match self.index_of(id) {
            Some(i) => Ok(&mut self.tasks[i]),
            None => Err(Error::NotFound),
        }
    }

    /// Returns true if `id` is in the run queue.
    pub fn is_runnable(&self, id: TaskId) -> bool {
        self.running.contains(&id)
    }

    /// Returns the run queue, front first.
    pub fn run_queue(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.running.iter().copied()
    }

    // Ids are assigned in order and tasks are never removed, so id n lives at index n - 1.
    fn index_of(&self, id: TaskId) -> Option<usize> {
        let index = (id.as_u64() as usize).checked_sub(1)?;
        (index < self.tasks.len()).then_some(index)
    }

    fn task_mut_unchecked(&mut self, id: TaskId) -> &mut Task {
        match self.index_of(id) {
            Some(i) => &mut self.tasks[i],
            None => panic!("run queue references unknown task {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "sysv64" fn idle(_: u64, _: i64) -> ! {
        unreachable!()
    }

    const MAIN: TaskId = TaskId::new(1);
    const IDLE: TaskId = TaskId::new(2);

    fn queue(manager: &TaskManager) -> Vec<u64> {
        manager.run_queue().map(TaskId::as_u64).collect()
    }

    #[test]
    fn starts_with_main_running_and_idle_ready() {
        let mut manager = TaskManager::new(idle);
        assert_eq!(queue(&manager), [1, 2]);
        assert_eq!(manager.current_task().id(), MAIN);
    }

    #[test]
    fn ids_are_monotonic_and_new_tasks_sleep() {
        let mut manager = TaskManager::new(idle);
        let a = manager.new_task().id();
        let b = manager.new_task().id();
        assert_eq!((a.as_u64(), b.as_u64()), (3, 4));
        assert!(!manager.is_runnable(a));
    }

    #[test]
    fn rotate_round_robins() {
        let mut manager = TaskManager::new(idle);
        let switch = manager.rotate(false);
        assert_eq!((switch.from, switch.to), (MAIN, IDLE));
        assert_eq!(queue(&manager), [2, 1]);
        assert!(!switch.current.is_null());
        assert_ne!(switch.current as *const TaskContext, switch.next);
    }

    #[test]
    fn sleeping_current_switches_to_another_task() {
        let mut manager = TaskManager::new(idle);
        let switch = manager.sleep(MAIN).unwrap().expect("current task must switch");
        assert_eq!(switch.from, MAIN);
        assert_eq!(switch.to, IDLE);
        assert_eq!(queue(&manager), [2]);
    }

    #[test]
    fn sleeping_ready_task_needs_no_switch() {
        let mut manager = TaskManager::new(idle);
        let worker = manager.new_task().id();
        manager.wakeup(worker).unwrap();

        assert!(manager.sleep(worker).unwrap().is_none());
        assert_eq!(queue(&manager), [1, 2]);
        // Already asleep.
        assert!(manager.sleep(worker).unwrap().is_none());
    }

    #[test]
    fn wakeup_never_duplicates() {
        let mut manager = TaskManager::new(idle);
        let worker = manager.new_task().id();
        manager.wakeup(worker).unwrap();
        manager.wakeup(worker).unwrap();
        manager.wakeup(MAIN).unwrap();
        assert_eq!(queue(&manager), [1, 2, 3]);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let mut manager = TaskManager::new(idle);
        let ghost = TaskId::new(99);
        assert_eq!(manager.wakeup(ghost), Err(Error::NotFound));
        assert!(matches!(manager.sleep(ghost), Err(Error::NotFound)));
        assert_eq!(
            manager.send_message(ghost, Message::WindowActive { activate: true }),
            Err(Error::NotFound)
        );
        assert!(manager.find(TaskId::new(0)).is_err());
    }

    #[test]
    fn send_message_wakes_sleeping_recipient() {
        let mut manager = TaskManager::new(idle);
        let worker = manager.new_task().id();
        let before = manager.find(worker).unwrap().pending_messages();

        let msg = Message::TimerTimeout {
            timeout: 10,
            task_id: worker,
        };
        manager.send_message(worker, msg).unwrap();

        assert!(manager.is_runnable(worker));
        let task = manager.find_mut(worker).unwrap();
        assert_eq!(task.pending_messages(), before + 1);
        assert_eq!(task.receive_message(), Some(msg));
    }

    #[test]
    fn messages_keep_send_order_across_senders() {
        let mut manager = TaskManager::new(idle);
        let a = manager.new_task().id();
        let b = manager.new_task().id();
        for i in 0..4u8 {
            let key = Message::KeyPush {
                modifier: 0,
                keycode: i,
                ascii: b'a' + i,
                press: true,
            };
            manager.send_message(a, key).unwrap();
            manager.send_message(b, key).unwrap();
        }

        let task = manager.find_mut(a).unwrap();
        let keys: Vec<u8> = core::iter::from_fn(|| task.receive_message())
            .map(|m| match m {
                Message::KeyPush { keycode, .. } => keycode,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(keys, [0, 1, 2, 3]);
    }

    #[test]
    fn queue_never_drains_while_idle_is_runnable() {
        let mut manager = TaskManager::new(idle);
        let workers: Vec<TaskId> = (0..3).map(|_| manager.new_task().id()).collect();
        for &w in &workers {
            manager.wakeup(w).unwrap();
        }

        for step in 0..20 {
            let current = manager.current_task().id();
            if current != IDLE && step % 2 == 0 {
                manager.sleep(current).unwrap();
            } else {
                manager.rotate(false);
            }
            let ids: Vec<u64> = queue(&manager);
            let mut dedup = ids.clone();
            dedup.sort();
            dedup.dedup();
            assert_eq!(ids.len(), dedup.len());
            assert!(!ids.is_empty());
        }
        assert!(manager.is_runnable(IDLE));
    }

    #[test]
    #[should_panic(expected = "no runnable task")]
    fn sleeping_the_last_runnable_task_is_fatal() {
        let mut manager = TaskManager::new(idle);
        manager.sleep(MAIN).unwrap();
        manager.sleep(IDLE).unwrap();
    }
}

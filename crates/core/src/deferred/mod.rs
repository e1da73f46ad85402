/// Identifier of a scheduled continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

#[derive(Debug)]
struct Deferred<T> {
    id: TaskId,
    due: f32,
    payload: T,
}

/// Cooperative "run after a duration" queue.
///
/// Nothing runs on its own: the owner polls [`DeferredQueue::pop_due`] from
/// its tick and handles each payload itself. Cancelled tasks are removed
/// outright, so they can never be returned later.
#[derive(Debug)]
pub struct DeferredQueue<T> {
    tasks: Vec<Deferred<T>>,
    next_id: u64,
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T> DeferredQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `payload` to become due at `due` seconds. Tasks sharing a
    /// due time come back in scheduling order.
    pub fn schedule(&mut self, due: f32, payload: T) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        let index = self.tasks.partition_point(|task| task.due <= due);
        self.tasks.insert(index, Deferred { id, due, payload });
        id
    }

    pub fn cancel(&mut self, id: TaskId) -> Option<T> {
        let index = self.tasks.iter().position(|task| task.id == id)?;
        Some(self.tasks.remove(index).payload)
    }

    /// Drops every pending task. Returns how many were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.tasks.len();
        self.tasks.clear();
        dropped
    }

    /// Removes and returns the earliest task due at or before `now`.
    pub fn pop_due(&mut self, now: f32) -> Option<T> {
        if self.tasks.first()?.due <= now {
            Some(self.tasks.remove(0).payload)
        } else {
            None
        }
    }

    pub fn next_due(&self) -> Option<f32> {
        self.tasks.first().map(|task| task.due)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

//! In-memory FIFO of pending tasks.

use parabuild_core::{Error, Event, Result, Task};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

use crate::EventBus;

/// Pending work for one run, in enumeration order.
///
/// A target enters the queue at most once; it leaves it when a worker
/// picks it up and never comes back.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
    seen: HashSet<String>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `tasks` in order, keeping only targets named in `filter`
    /// when it is non-empty.
    ///
    /// Publishes `Skip` for filtered-out targets and `Enqueue` for the rest.
    pub fn populate(
        &mut self,
        tasks: impl IntoIterator<Item = Task>,
        filter: &[String],
        bus: &EventBus,
    ) -> Result<()> {
        let wanted: HashSet<&str> = filter.iter().map(String::as_str).collect();
        let mut matched = HashSet::new();
        let mut enumerated = HashSet::new();

        for task in tasks {
            if !enumerated.insert(task.target.clone()) {
                return Err(Error::InvalidInput(format!(
                    "target {} is defined more than once",
                    task.target
                )));
            }

            if !wanted.is_empty() && !wanted.contains(task.target.as_str()) {
                debug!(build_target = %task.target, "Skipping target");
                bus.publish(Event::Skip {
                    target: task.target,
                });
                continue;
            }

            matched.insert(task.target.clone());
            let target = task.target.clone();
            self.push(task)?;
            bus.publish(Event::Enqueue { target });
        }

        for name in filter {
            if !matched.contains(name) {
                warn!(build_target = %name, "Requested target does not exist");
            }
        }

        Ok(())
    }

    /// Append a single task.
    pub fn push(&mut self, task: Task) -> Result<()> {
        if !self.seen.insert(task.target.clone()) {
            return Err(Error::InvalidInput(format!(
                "target {} was already queued",
                task.target
            )));
        }
        self.tasks.push_back(task);
        Ok(())
    }

    /// Remove and return the oldest pending task.
    pub fn pop_next(&mut self) -> Result<Task> {
        self.tasks.pop_front().ok_or(Error::EmptyQueue)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EventLog;
    use parabuild_core::BuildParams;

    fn tasks(names: &[&str]) -> Vec<Task> {
        names
            .iter()
            .map(|n| Task::new(*n, BuildParams::default()))
            .collect()
    }

    #[test]
    fn test_populate_keeps_order() {
        let bus = EventBus::new();
        let log = EventLog::attach(&bus);
        let mut queue = TaskQueue::new();

        queue.populate(tasks(&["c", "a", "b"]), &[], &bus).unwrap();

        let order: Vec<&str> = queue.iter().map(|t| t.target.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(
            log.names(),
            vec!["enqueue", "enqueue", "enqueue"]
        );
    }

    #[test]
    fn test_populate_with_filter() {
        let bus = EventBus::new();
        let log = EventLog::attach(&bus);
        let mut queue = TaskQueue::new();

        let filter = vec!["b".to_string(), "missing".to_string()];
        queue.populate(tasks(&["a", "b", "c"]), &filter, &bus).unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(
            log.events(),
            vec![
                Event::Skip {
                    target: "a".to_string()
                },
                Event::Enqueue {
                    target: "b".to_string()
                },
                Event::Skip {
                    target: "c".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_filter_matching_nothing_leaves_queue_empty() {
        let bus = EventBus::new();
        let mut queue = TaskQueue::new();

        queue
            .populate(tasks(&["a"]), &["zzz".to_string()], &bus)
            .unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let bus = EventBus::new();
        let mut queue = TaskQueue::new();

        let err = queue.populate(tasks(&["a", "a"]), &[], &bus).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_pop_next_fifo_then_empty() {
        let mut queue = TaskQueue::new();
        queue.push(Task::new("x", BuildParams::default())).unwrap();
        queue.push(Task::new("y", BuildParams::default())).unwrap();

        assert_eq!(queue.pop_next().unwrap().target, "x");
        assert_eq!(queue.pop_next().unwrap().target, "y");
        assert!(matches!(queue.pop_next(), Err(Error::EmptyQueue)));
    }

    #[test]
    fn test_popped_target_cannot_return() {
        let mut queue = TaskQueue::new();
        queue.push(Task::new("x", BuildParams::default())).unwrap();
        queue.pop_next().unwrap();

        assert!(queue.push(Task::new("x", BuildParams::default())).is_err());
    }
}

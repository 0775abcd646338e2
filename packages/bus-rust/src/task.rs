//! Identity of the concurrent unit of work issuing a bus call.

use std::fmt;
use std::thread::{self, ThreadId};

/// Opaque, equality-comparable identity of the caller.
///
/// Inside a spawned tokio task this is the task id. Code driven directly by
/// a runtime (e.g. the future passed to `Runtime::block_on`) is identified by
/// its OS thread, so separate threads never share an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskIdentity {
    Task(tokio::task::Id),
    Thread(ThreadId),
}

impl TaskIdentity {
    /// Identity of the caller.
    #[must_use]
    pub fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => Self::Task(id),
            None => Self::Thread(thread::current().id()),
        }
    }

    /// Whether the caller is a spawned tokio task.
    #[must_use]
    pub fn is_task(self) -> bool {
        matches!(self, Self::Task(_))
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task-{id}"),
            Self::Thread(id) => write!(f, "thread-{id:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_task_has_same_identity() {
        assert_eq!(TaskIdentity::current(), TaskIdentity::current());
    }

    #[tokio::test]
    async fn spawned_tasks_have_distinct_identities() {
        let a = tokio::spawn(async { TaskIdentity::current() }).await.unwrap();
        let b = tokio::spawn(async { TaskIdentity::current() }).await.unwrap();

        assert!(a.is_task());
        assert_ne!(a, b);
        assert_ne!(a, TaskIdentity::current());
        assert!(a.to_string().starts_with("task-"));
    }

    #[test]
    fn threads_outside_tasks_have_distinct_identities() {
        let here = TaskIdentity::current();
        let there = thread::spawn(TaskIdentity::current).join().unwrap();

        assert!(!here.is_task());
        assert_ne!(here, there);
        assert_eq!(here, TaskIdentity::current());
        assert!(there.to_string().starts_with("thread-"));
    }
}

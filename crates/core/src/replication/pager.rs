//! Lazy, restartable iteration over the task log.

use std::collections::VecDeque;

use log::debug;

use super::model::Task;
use super::traits::TaskLogRepositoryTrait;
use crate::errors::Result;

/// Default number of rows fetched per page.
pub const DEFAULT_TASK_PAGE_SIZE: i64 = 500;

/// Iterates tasks with `id > since` in ascending order, one page at a time.
///
/// The upper bound is pinned to the log's max id when the first page is
/// fetched, so the sequence is finite even while writers keep appending.
/// Resume after an interruption with `TaskPager::new(repo, pager.cursor(), ..)`.
pub struct TaskPager<'a> {
    repository: &'a dyn TaskLogRepositoryTrait,
    cursor: Option<i64>,
    page_size: i64,
    upper_bound: Option<Option<i64>>,
    buffer: VecDeque<Task>,
    exhausted: bool,
}

impl<'a> TaskPager<'a> {
    pub fn new(
        repository: &'a dyn TaskLogRepositoryTrait,
        since: Option<i64>,
        page_size: i64,
    ) -> Self {
        Self {
            repository,
            cursor: since,
            page_size: page_size.max(1),
            upper_bound: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Id of the last task yielded, or the starting point.
    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    fn fill(&mut self) -> Result<()> {
        let upper_bound = match self.upper_bound {
            Some(bound) => bound,
            None => {
                let bound = self.repository.task_stats()?.max_id;
                self.upper_bound = Some(bound);
                bound
            }
        };
        let Some(upper_bound) = upper_bound else {
            self.exhausted = true;
            return Ok(());
        };

        let page = self.repository.list_tasks(self.cursor, self.page_size)?;
        let full_page = page.len() as i64 >= self.page_size;
        debug!(
            "[TaskLog] Fetched page of {} tasks after {:?}",
            page.len(),
            self.cursor
        );
        let mut reached_bound = false;
        for task in page {
            if task.id > upper_bound {
                reached_bound = true;
                break;
            }
            self.buffer.push_back(task);
        }
        if !full_page || reached_bound || self.buffer.is_empty() {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for TaskPager<'_> {
    type Item = Result<Task>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        let task = self.buffer.pop_front()?;
        self.cursor = Some(task.id);
        Some(Ok(task))
    }
}

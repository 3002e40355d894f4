//! The leaf of every queue composition: a plain in-memory FIFO.

use super::RequestQueue;
use crate::checkpoint::RecordWriter;
use crate::error::SpiderError;
use crate::request::Request;
use std::collections::VecDeque;

/// Unbounded in-memory FIFO.
#[derive(Debug, Default)]
pub struct SimpleQueue {
    requests: VecDeque<Request>,
}

impl SimpleQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestQueue for SimpleQueue {
    fn put(&mut self, request: Request) -> Result<(), SpiderError> {
        self.requests.push_back(request);
        Ok(())
    }

    fn put_many(&mut self, requests: Vec<Request>) -> Result<(), SpiderError> {
        self.requests.extend(requests);
        Ok(())
    }

    fn get(&mut self) -> Result<Option<Request>, SpiderError> {
        Ok(self.requests.pop_front())
    }

    #[inline]
    fn len(&self) -> usize {
        self.requests.len()
    }

    fn snapshot(&self) -> Result<Vec<Request>, SpiderError> {
        Ok(self.requests.iter().cloned().collect())
    }

    fn write_records(&self, writer: &mut RecordWriter) -> Result<(), SpiderError> {
        self.requests.iter().try_for_each(|request| writer.write(request))
    }

    fn clear(&mut self) -> Result<(), SpiderError> {
        self.requests.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        "simple".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::test_support::{drain_targets, targets};

    #[test]
    fn fifo_order() {
        let mut queue = SimpleQueue::new();
        queue.put(Request::new("0")).unwrap();
        queue
            .put_many(targets(1..4).into_iter().map(Request::new).collect())
            .unwrap();
        queue.put(Request::new("4")).unwrap();

        assert_eq!(queue.len(), 5);
        assert_eq!(drain_targets(&mut queue), targets(0..5));
        assert!(queue.is_empty());
        assert!(queue.get().unwrap().is_none());
    }

    #[test]
    fn snapshot_does_not_consume() {
        let mut queue = SimpleQueue::new();
        queue
            .put_many(targets(0..3).into_iter().map(Request::new).collect())
            .unwrap();

        let snapshot: Vec<String> = queue
            .snapshot()
            .unwrap()
            .iter()
            .map(|r| r.target().to_string())
            .collect();
        assert_eq!(snapshot, targets(0..3));
        assert_eq!(queue.len(), 3);

        queue.clear().unwrap();
        assert!(queue.is_empty());
    }
}

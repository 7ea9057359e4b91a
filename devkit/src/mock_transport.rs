/*!
Transport simulé pour les workers d'ingestion

Each address gets a queue of scripted answers consumed one per fetch, plus an
optional fallback repeated once the queue is empty. Every call is recorded.
*/

use jetson_kernel::error::TransportError;
use jetson_kernel::ingest::Transport;
use jetson_kernel::models::NodeReport;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Scripted {
    Report(NodeReport),
    Fail(TransportError),
    /// Never answers; the caller's timeout has to fire.
    Hang,
    /// Answers after a delay, leaving the fetch in flight meanwhile.
    Delayed(Duration, NodeReport),
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Scripted>,
    fallback: Option<Scripted>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, address: &str, answer: Scripted) -> &Self {
        self.scripts.lock().entry(address.to_string()).or_default().queue.push_back(answer);
        self
    }

    pub fn push_report(&self, address: &str, report: NodeReport) -> &Self {
        self.push(address, Scripted::Report(report))
    }

    pub fn push_error(&self, address: &str, error: TransportError) -> &Self {
        self.push(address, Scripted::Fail(error))
    }

    /// Answer given for every fetch once the queue for `address` is drained.
    pub fn always(&self, address: &str, answer: Scripted) -> &Self {
        self.scripts.lock().entry(address.to_string()).or_default().fallback = Some(answer);
        self
    }

    pub fn calls(&self, address: &str) -> usize {
        self.calls.lock().iter().filter(|a| *a == address).count()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn next_answer(&self, address: &str) -> Scripted {
        self.calls.lock().push(address.to_string());
        let mut scripts = self.scripts.lock();
        let Some(script) = scripts.get_mut(address) else {
            return Scripted::Fail(TransportError::Connect(format!("no script for {address}")));
        };
        script
            .queue
            .pop_front()
            .or_else(|| script.fallback.clone())
            .unwrap_or_else(|| Scripted::Fail(TransportError::Connect(format!("script for {address} exhausted"))))
    }
}

impl Transport for MockTransport {
    async fn fetch(&self, address: &str) -> Result<NodeReport, TransportError> {
        match self.next_answer(address) {
            Scripted::Report(report) => Ok(report),
            Scripted::Fail(e) => Err(e),
            Scripted::Hang => std::future::pending().await,
            Scripted::Delayed(delay, report) => {
                tokio::time::sleep(delay).await;
                Ok(report)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReportBuilder;

    #[tokio::test]
    async fn test_queue_then_fallback_then_exhausted() {
        let mock = MockTransport::new();
        mock.push_error("a", TransportError::Status(503))
            .push_report("a", ReportBuilder::new(1, 1).build());

        assert_eq!(mock.fetch("a").await.unwrap_err(), TransportError::Status(503));
        assert_eq!(mock.fetch("a").await.unwrap().node_id, Some(1));
        assert!(matches!(mock.fetch("a").await, Err(TransportError::Connect(_))));

        mock.always("a", Scripted::Report(ReportBuilder::new(1, 2).build()));
        assert_eq!(mock.fetch("a").await.unwrap().node_id, Some(2));
        assert_eq!(mock.fetch("a").await.unwrap().node_id, Some(2));

        assert_eq!(mock.calls("a"), 5);
        assert_eq!(mock.calls("b"), 0);
    }
}

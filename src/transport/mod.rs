//! Broker transport seam
//!
//! The outbox flusher publishes through [`MessageTransport`] so the
//! broker can be swapped out (and mocked in tests). Delivery counts as
//! confirmed only after a successful `flush`.

pub mod nats;

pub use nats::NatsTransport;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Broker connect failed: {0}")]
    Connect(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Flush failed: {0}")]
    Flush(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),
}

/// Outbound side of the broker.
///
/// `publish` may buffer; a message is considered delivered only once a
/// subsequent `flush` returns Ok. The flusher relies on this to delete
/// outbox rows strictly after confirmed delivery.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Transport name for logging
    fn name(&self) -> &'static str;

    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Await broker acknowledgement of everything published so far.
    async fn flush(&self) -> Result<(), TransportError>;
}

/// Mock transport for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct MockTransport {
        /// Captured (subject, payload) pairs for verification
        published: Mutex<Vec<(String, Vec<u8>)>>,
        publish_count: AtomicUsize,
        flush_count: AtomicUsize,
        /// Configured behavior
        fail_publish: Mutex<bool>,
        fail_flush: Mutex<bool>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                publish_count: AtomicUsize::new(0),
                flush_count: AtomicUsize::new(0),
                fail_publish: Mutex::new(false),
                fail_flush: Mutex::new(false),
            }
        }

        pub fn set_fail_publish(&self, fail: bool) {
            *self.fail_publish.lock().unwrap() = fail;
        }

        pub fn set_fail_flush(&self, fail: bool) {
            *self.fail_flush.lock().unwrap() = fail;
        }

        pub fn publish_count(&self) -> usize {
            self.publish_count.load(Ordering::SeqCst)
        }

        pub fn flush_count(&self) -> usize {
            self.flush_count.load(Ordering::SeqCst)
        }

        pub fn published(&self) -> Vec<(String, Vec<u8>)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageTransport for MockTransport {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), TransportError> {
            self.publish_count.fetch_add(1, Ordering::SeqCst);

            if *self.fail_publish.lock().unwrap() {
                return Err(TransportError::Publish("mock publish failure".to_string()));
            }

            self.published
                .lock()
                .unwrap()
                .push((subject.to_string(), payload.to_vec()));
            Ok(())
        }

        async fn flush(&self) -> Result<(), TransportError> {
            self.flush_count.fetch_add(1, Ordering::SeqCst);

            if *self.fail_flush.lock().unwrap() {
                return Err(TransportError::Flush("mock flush failure".to_string()));
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_captures_published_messages() {
            let transport = MockTransport::new();

            transport.publish("a.b", b"one").await.unwrap();
            transport.publish("a.c", b"two").await.unwrap();
            transport.flush().await.unwrap();

            let published = transport.published();
            assert_eq!(published.len(), 2);
            assert_eq!(published[0].0, "a.b");
            assert_eq!(published[1].1, b"two");
            assert_eq!(transport.publish_count(), 2);
            assert_eq!(transport.flush_count(), 1);
        }

        #[tokio::test]
        async fn test_mock_publish_failure() {
            let transport = MockTransport::new();
            transport.set_fail_publish(true);

            let result = transport.publish("a.b", b"one").await;
            assert!(result.is_err());
            assert!(transport.published().is_empty());
        }

        #[tokio::test]
        async fn test_mock_flush_failure() {
            let transport = MockTransport::new();
            transport.set_fail_flush(true);

            transport.publish("a.b", b"one").await.unwrap();
            assert!(transport.flush().await.is_err());
        }
    }
}

#[cfg(test)]
pub use mock::MockTransport;

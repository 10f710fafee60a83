//! In-memory transport that replays a script of connection attempts

use std::collections::VecDeque;
use std::sync::Mutex;

use evalstream::app::{BatchRequest, ChunkStream, Transport};
use evalstream::errors::{TransportError, TransportResult};
use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::time::Instant;

/// What one call to `open` does
pub enum Step {
    /// The connection attempt fails outright
    Fail(TransportError),
    /// The connection opens and yields these chunks, then ends
    Stream(Vec<&'static str>),
    /// The connection opens and never sends anything
    Silent,
}

/// Replays `Step`s in order; once exhausted every attempt is refused
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    opens: Mutex<Vec<(Instant, BatchRequest)>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            opens: Mutex::new(Vec::new()),
        }
    }

    /// Instants at which `open` was called
    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    /// Item ids carried by each request, in call order
    pub fn requested_ids(&self) -> Vec<Vec<String>> {
        self.opens
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.items.iter().map(|i| i.id.clone()).collect())
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, request: BatchRequest) -> BoxFuture<'_, TransportResult<ChunkStream>> {
        self.opens.lock().unwrap().push((Instant::now(), request));
        let step = self.script.lock().unwrap().pop_front();

        let result = match step {
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Stream(chunks)) => {
                let chunks: Vec<TransportResult<Vec<u8>>> =
                    chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
                let stream: ChunkStream = futures::stream::iter(chunks).boxed();
                Ok(stream)
            }
            Some(Step::Silent) => {
                let stream: ChunkStream = futures::stream::pending().boxed();
                Ok(stream)
            }
            None => Err(TransportError::Connect {
                reason: "connection refused".to_string(),
            }),
        };
        Box::pin(async move { result })
    }
}

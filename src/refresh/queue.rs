use tokio::sync::oneshot;

use crate::errors::Error;
use crate::request::RequestDescriptor;

/// How an in-flight refresh ended, as seen by everyone waiting on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    Resume { access_token: String },
    Fail { reason: String },
}

/// A caller parked behind the in-flight refresh.
#[derive(Debug)]
pub struct Continuation {
    request: RequestDescriptor,
    resume: oneshot::Sender<Settlement>,
}

impl Continuation {
    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    /// A receiver that has gone away only means its caller stopped listening.
    fn settle(self, settlement: Settlement) -> bool {
        self.resume.send(settlement).is_ok()
    }
}

/// Receiving half held by a parked caller.
#[derive(Debug)]
pub struct Parked {
    rx: oneshot::Receiver<Settlement>,
}

impl Parked {
    pub async fn wait(self) -> Result<String, Error> {
        match self.rx.await {
            Ok(Settlement::Resume { access_token }) => Ok(access_token),
            Ok(Settlement::Fail { reason }) => Err(Error::RefreshFailed(reason)),
            Err(_) => Err(Error::RefreshFailed(
                "refresh settled without resolving this request".into(),
            )),
        }
    }
}

#[derive(Debug, Default)]
pub struct WaitQueue {
    entries: Vec<Continuation>,
}

impl WaitQueue {
    pub fn enqueue(&mut self, request: RequestDescriptor) -> Parked {
        let (resume, rx) = oneshot::channel();
        self.entries.push(Continuation { request, resume });
        Parked { rx }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Detaches every current entry, leaving the queue empty.
    pub fn take(&mut self) -> WaitGroup {
        WaitGroup {
            entries: std::mem::take(&mut self.entries),
        }
    }
}

/// Entries detached from the queue, waiting for their shared outcome.
#[derive(Debug)]
#[must_use = "a wait group must be drained or its callers never hear back"]
pub struct WaitGroup {
    entries: Vec<Continuation>,
}

impl WaitGroup {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn requests(&self) -> impl Iterator<Item = &RequestDescriptor> {
        self.entries.iter().map(Continuation::request)
    }

    /// Hands the same settlement to every entry, in insertion order.
    /// Returns how many callers were still listening.
    pub fn drain(self, settlement: &Settlement) -> usize {
        self.entries
            .into_iter()
            .map(|entry| entry.settle(settlement.clone()))
            .filter(|delivered| *delivered)
            .count()
    }
}

//! Scriptable in-memory [`DetectionService`] for tests.
//!
//! Each operation pops its next reply from a script; when the script is
//! empty the operation's fallback reply is used. A [`Scripted::Hang`] reply
//! never completes, which models a service that stops responding.

use crate::error::RemoteError;
use crate::service::{DetectionService, LookupReply, UploadContext, UploadTarget};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone)]
pub enum Scripted<T> {
    Reply(Result<T, RemoteError>),
    Hang,
}

/// Calls observed by a [`StubService`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StubCalls {
    pub lookup: usize,
    pub upload_target: usize,
    pub upload: usize,
    pub trigger: usize,
    /// Paths passed to `upload`, in call order.
    pub uploaded: Vec<PathBuf>,
    /// Fingerprints passed to `lookup`, in call order.
    pub looked_up: Vec<String>,
}

struct Script<T> {
    queue: VecDeque<Scripted<T>>,
    fallback: Scripted<T>,
}

impl<T: Clone> Script<T> {
    fn new(fallback: Scripted<T>) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback,
        }
    }

    fn next(&mut self) -> Scripted<T> {
        self.queue
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

struct StubState {
    lookups: Script<LookupReply>,
    upload_targets: Script<UploadTarget>,
    uploads: Script<()>,
    triggers: Script<()>,
    calls: StubCalls,
}

pub struct StubService {
    state: Mutex<StubState>,
}

impl Default for StubService {
    fn default() -> Self {
        Self::new()
    }
}

impl StubService {
    /// Fallbacks: every lookup reports a clean file, uploads and triggers
    /// succeed, and the service never already holds the content.
    pub fn new() -> Self {
        let target = UploadTarget {
            file_exists: false,
            public_url: "https://upload.invalid/".to_string(),
            context: UploadContext {
                access_id: "stub-access-id".to_string(),
                policy: "stub-policy".to_string(),
                signature: "stub-signature".to_string(),
                object_key: "stub/object".to_string(),
            },
        };
        Self {
            state: Mutex::new(StubState {
                lookups: Script::new(Scripted::Reply(Ok(LookupReply::clean()))),
                upload_targets: Script::new(Scripted::Reply(Ok(target))),
                uploads: Script::new(Scripted::Reply(Ok(()))),
                triggers: Script::new(Scripted::Reply(Ok(()))),
                calls: StubCalls::default(),
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut StubState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn push_lookup(&self, reply: Result<LookupReply, RemoteError>) -> &Self {
        self.with_state(|s| s.lookups.queue.push_back(Scripted::Reply(reply)));
        self
    }

    pub fn push_upload_target(&self, reply: Result<UploadTarget, RemoteError>) -> &Self {
        self.with_state(|s| s.upload_targets.queue.push_back(Scripted::Reply(reply)));
        self
    }

    pub fn push_upload(&self, reply: Result<(), RemoteError>) -> &Self {
        self.with_state(|s| s.uploads.queue.push_back(Scripted::Reply(reply)));
        self
    }

    pub fn push_trigger(&self, reply: Result<(), RemoteError>) -> &Self {
        self.with_state(|s| s.triggers.queue.push_back(Scripted::Reply(reply)));
        self
    }

    /// Next lookup never completes.
    pub fn push_lookup_hang(&self) -> &Self {
        self.with_state(|s| s.lookups.queue.push_back(Scripted::Hang));
        self
    }

    /// Reply used once the lookup script runs out.
    pub fn set_lookup_fallback(&self, reply: Scripted<LookupReply>) -> &Self {
        self.with_state(|s| s.lookups.fallback = reply);
        self
    }

    pub fn calls(&self) -> StubCalls {
        self.with_state(|s| s.calls.clone())
    }
}

async fn resolve<T>(reply: Scripted<T>) -> Result<T, RemoteError> {
    match reply {
        Scripted::Reply(result) => result,
        Scripted::Hang => std::future::pending().await,
    }
}

#[async_trait]
impl DetectionService for StubService {
    async fn lookup(&self, fingerprint: &str) -> Result<LookupReply, RemoteError> {
        let reply = self.with_state(|s| {
            s.calls.lookup += 1;
            s.calls.looked_up.push(fingerprint.to_string());
            s.lookups.next()
        });
        resolve(reply).await
    }

    async fn request_upload_target(
        &self,
        _fingerprint: &str,
        _size: u64,
    ) -> Result<UploadTarget, RemoteError> {
        let reply = self.with_state(|s| {
            s.calls.upload_target += 1;
            s.upload_targets.next()
        });
        resolve(reply).await
    }

    async fn upload(&self, path: &Path, _target: &UploadTarget) -> Result<(), RemoteError> {
        let reply = self.with_state(|s| {
            s.calls.upload += 1;
            s.calls.uploaded.push(path.to_path_buf());
            s.uploads.next()
        });
        resolve(reply).await
    }

    async fn trigger_detection(
        &self,
        _fingerprint: &str,
        _object_key: &str,
    ) -> Result<(), RemoteError> {
        let reply = self.with_state(|s| {
            s.calls.trigger += 1;
            s.triggers.next()
        });
        resolve(reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let stub = StubService::new();
        stub.push_lookup(Err(RemoteError::NotFound))
            .push_lookup(Ok(LookupReply::detecting()));

        assert_eq!(stub.lookup("abc").await, Err(RemoteError::NotFound));
        assert_eq!(stub.lookup("abc").await, Ok(LookupReply::detecting()));
        assert_eq!(stub.lookup("abc").await, Ok(LookupReply::clean()));

        let calls = stub.calls();
        assert_eq!(calls.lookup, 3);
        assert_eq!(calls.looked_up, vec!["abc", "abc", "abc"]);
    }

    #[tokio::test]
    async fn test_default_upload_target_needs_upload() {
        let stub = StubService::new();
        let target = stub.request_upload_target("abc", 10).await.unwrap();
        assert!(!target.file_exists);
        stub.upload(Path::new("a.bin"), &target).await.unwrap();
        stub.trigger_detection("abc", &target.context.object_key)
            .await
            .unwrap();

        let calls = stub.calls();
        assert_eq!(calls.upload_target, 1);
        assert_eq!(calls.uploaded, vec![PathBuf::from("a.bin")]);
        assert_eq!(calls.trigger, 1);
    }
}

//! Authorizers.
//!
//! [`PolicyAuthorizer`] answers from a static rule table, which is what the
//! daemon uses when no policy service is configured. [`ManualAuthorizer`]
//! parks every request until the caller releases it, which lets tests
//! observe what happens while an activation is waiting for authorization.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

use super::{AuthError, Authorizer};
use crate::api::models::{AuthResult, Permission, Subject};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Rule-table authorizer.
///
/// The daemon's own subject and root are always granted. For other users, a
/// per-user rule wins over a per-permission rule, which wins over the default.
#[derive(Debug, Clone)]
pub struct PolicyAuthorizer {
    default: AuthResult,
    permissions: HashMap<Permission, AuthResult>,
    users: HashMap<u32, AuthResult>,
}

impl PolicyAuthorizer {
    /// Grants everything.
    pub fn allow_all() -> Self {
        Self::with_default(AuthResult::Yes)
    }

    /// Denies every user request.
    pub fn deny_all() -> Self {
        Self::with_default(AuthResult::No)
    }

    pub fn with_default(default: AuthResult) -> Self {
        Self {
            default,
            permissions: HashMap::new(),
            users: HashMap::new(),
        }
    }

    /// Overrides the answer for one permission.
    pub fn permission(mut self, permission: Permission, result: AuthResult) -> Self {
        self.permissions.insert(permission, result);
        self
    }

    /// Overrides the answer for one user.
    pub fn user(mut self, uid: u32, result: AuthResult) -> Self {
        self.users.insert(uid, result);
        self
    }

    fn decide(&self, subject: &Subject, permission: Permission) -> AuthResult {
        match subject {
            Subject::Internal | Subject::User { uid: 0, .. } => AuthResult::Yes,
            Subject::User { uid, .. } => self
                .users
                .get(uid)
                .or_else(|| self.permissions.get(&permission))
                .copied()
                .unwrap_or(self.default),
        }
    }
}

#[async_trait]
impl Authorizer for PolicyAuthorizer {
    async fn authorize(&self, subject: &Subject, permission: Permission) -> Result<AuthResult, AuthError> {
        Ok(self.decide(subject, permission))
    }
}

/// A request parked by [`ManualAuthorizer`].
#[derive(Debug)]
struct ParkedRequest {
    subject: Subject,
    permission: Permission,
    reply: oneshot::Sender<AuthResult>,
}

/// Authorizer whose answers are released by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualAuthorizer {
    queue: Arc<Mutex<VecDeque<ParkedRequest>>>,
}

impl ManualAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests waiting for an answer.
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Subjects and permissions of the waiting requests, oldest first.
    pub fn requests(&self) -> Vec<(Subject, Permission)> {
        lock(&self.queue)
            .iter()
            .map(|r| (r.subject.clone(), r.permission))
            .collect()
    }

    /// Answers the oldest request. Returns `false` if none was waiting.
    pub fn release_next(&self, result: AuthResult) -> bool {
        let Some(request) = lock(&self.queue).pop_front() else {
            return false;
        };
        let _ = request.reply.send(result);
        true
    }

    /// Answers every waiting request.
    pub fn release_all(&self, result: AuthResult) -> usize {
        let drained: Vec<_> = lock(&self.queue).drain(..).collect();
        let count = drained.len();
        for request in drained {
            let _ = request.reply.send(result);
        }
        count
    }
}

#[async_trait]
impl Authorizer for ManualAuthorizer {
    async fn authorize(&self, subject: &Subject, permission: Permission) -> Result<AuthResult, AuthError> {
        if subject.is_internal() {
            return Ok(AuthResult::Yes);
        }
        let (tx, rx) = oneshot::channel();
        lock(&self.queue).push_back(ParkedRequest {
            subject: subject.clone(),
            permission,
            reply: tx,
        });
        rx.await.map_err(|_| AuthError::Cancelled)
    }
}

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use privhelper::authority::{
    AuthorityError, AuthorizationToken, CredentialAuthority, Decision, Prompter, RightRule,
    Subject,
};

/// What the fake answers for tokens it issued itself.
#[derive(Debug, Clone)]
pub enum Script {
    Grant,
    Deny,
    Fail(AuthorityError),
}

/// In-memory credential authority.
///
/// - Tokens it did not mint are always denied (forgeries).
/// - Tokens it minted get the scripted answer.
/// - Counts mints, evaluations and registered rights, and records the uid
///   each token was minted for.
pub struct FakeAuthority {
    script: Mutex<Script>,
    issued: Mutex<HashSet<Vec<u8>>>,
    minted_for: Mutex<Vec<u32>>,
    rights: Mutex<BTreeMap<String, RightRule>>,
    mints: AtomicUsize,
    evaluations: AtomicUsize,
    right_sets: AtomicUsize,
}

impl FakeAuthority {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            issued: Mutex::new(HashSet::new()),
            minted_for: Mutex::new(Vec::new()),
            rights: Mutex::new(BTreeMap::new()),
            mints: AtomicUsize::new(0),
            evaluations: AtomicUsize::new(0),
            right_sets: AtomicUsize::new(0),
        }
    }

    pub fn granting() -> Self {
        Self::new(Script::Grant)
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn mints(&self) -> usize {
        self.mints.load(Ordering::SeqCst)
    }

    pub fn minted_for(&self) -> Vec<u32> {
        self.minted_for.lock().unwrap().clone()
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn right_sets(&self) -> usize {
        self.right_sets.load(Ordering::SeqCst)
    }

    pub fn right_names(&self) -> Vec<String> {
        self.rights.lock().unwrap().keys().cloned().collect()
    }
}

impl CredentialAuthority for FakeAuthority {
    fn create_empty_token(&self, subject: &Subject) -> Result<AuthorizationToken, AuthorityError> {
        let n = self.mints.fetch_add(1, Ordering::SeqCst) as u64;
        self.minted_for.lock().unwrap().push(subject.uid);
        let mut bytes = b"fake".to_vec();
        bytes.extend_from_slice(&n.to_le_bytes());
        self.issued.lock().unwrap().insert(bytes.clone());
        Ok(AuthorizationToken::from_bytes(bytes))
    }

    fn right_get(&self, name: &str) -> Result<Option<RightRule>, AuthorityError> {
        Ok(self.rights.lock().unwrap().get(name).cloned())
    }

    fn right_set(
        &self,
        name: &str,
        rule: &RightRule,
        _description: &str,
    ) -> Result<(), AuthorityError> {
        self.right_sets.fetch_add(1, Ordering::SeqCst);
        self.rights
            .lock()
            .unwrap()
            .insert(name.to_string(), rule.clone());
        Ok(())
    }

    fn copy_right(
        &self,
        token: &AuthorizationToken,
        _right: &str,
        _default_rule: &RightRule,
        _subject: &Subject,
    ) -> Result<Decision, AuthorityError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        if !self.issued.lock().unwrap().contains(token.as_bytes()) {
            return Ok(Decision::Denied);
        }
        match self.script.lock().unwrap().clone() {
            Script::Grant => Ok(Decision::Granted),
            Script::Deny => Ok(Decision::Denied),
            Script::Fail(err) => Err(err),
        }
    }
}

/// Prompter with a fixed answer that counts how often it was asked.
pub struct CountingPrompter {
    answer: bool,
    asked: AtomicUsize,
}

impl CountingPrompter {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl Prompter for CountingPrompter {
    fn confirm(&self, _message: &str) -> Result<bool, AuthorityError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer)
    }
}

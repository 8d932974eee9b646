// src/authority/local.rs

//! File-backed credential authority for Unix hosts.
//!
//! - Rights live in a TOML database (`[right."<name>"]` tables). The file is
//!   re-read on every evaluation so edits by an administrator apply without
//!   restarting the worker.
//! - Tokens are `[version][uid: u32 LE][nonce: 16 bytes][mac: 32 bytes]`,
//!   where the mac is a keyed blake3 hash of everything before it. Only the
//!   holder of the authority key can mint one. The uid must match the peer
//!   uid the worker observed on the socket.
//! - `user` rules grant root and members of the rule's group.
//! - A token keeps every right it has acquired. A non-zero timeout also
//!   lets other tokens of the same uid reuse a grant for that long.
//!
//! Nothing here prompts; interactive confirmation belongs to the client.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use nix::unistd::{Gid, Group, Uid, User};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::authority::{
    AuthorityError, AuthorizationToken, CredentialAuthority, Decision, RightRule, Subject,
};
use crate::registry::RuleClass;

const TOKEN_VERSION: u8 = 2;
const NONCE_LEN: usize = 16;
const MAC_LEN: usize = 32;
const CLAIMS_LEN: usize = 1 + 4 + NONCE_LEN;
const TOKEN_LEN: usize = CLAIMS_LEN + MAC_LEN;
const KEY_MODE: u32 = 0o600;

type Nonce = [u8; NONCE_LEN];

/// Secret used to sign tokens.
pub type AuthorityKey = [u8; 32];

/// Read the authority key at `path`, creating it (mode 0600) when missing.
pub fn load_or_create_key(path: &Path) -> Result<AuthorityKey, AuthorityError> {
    let key_error = |message: String| AuthorityError::Internal(format!(
        "authority key {}: {message}",
        path.display()
    ));

    match fs::read(path) {
        Ok(bytes) => {
            let mode = fs::metadata(path)
                .map_err(|e| key_error(e.to_string()))?
                .permissions()
                .mode();
            if mode & 0o077 != 0 {
                return Err(key_error(format!("mode {:o} is readable by others", mode & 0o777)));
            }
            bytes
                .try_into()
                .map_err(|_| key_error("expected exactly 32 bytes".to_string()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| key_error(e.to_string()))?;
            }
            let key: AuthorityKey = rand::random();
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(KEY_MODE)
                .open(path)
                .map_err(|e| key_error(e.to_string()))?;
            file.write_all(&key).map_err(|e| key_error(e.to_string()))?;
            info!(path = %path.display(), "created authority key");
            Ok(key)
        }
        Err(e) => Err(key_error(e.to_string())),
    }
}

/// On-disk rights database.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RightsDatabase {
    #[serde(default)]
    right: BTreeMap<String, StoredRight>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRight {
    class: RuleClass,
    group: String,
    #[serde(default)]
    timeout: u64,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    description: String,
}

fn default_version() -> u32 {
    1
}

impl StoredRight {
    fn new(rule: &RightRule, description: &str) -> Self {
        Self {
            class: rule.class,
            group: rule.group.clone(),
            timeout: rule.timeout,
            version: rule.version,
            description: description.to_string(),
        }
    }

    fn rule(&self) -> RightRule {
        RightRule {
            class: self.class,
            group: self.group.clone(),
            timeout: self.timeout,
            version: self.version,
        }
    }
}

/// Verified contents of a token minted by [`LocalAuthority`].
struct TokenClaims {
    uid: u32,
    nonce: Nonce,
}

pub struct LocalAuthority {
    rights_path: PathBuf,
    key: AuthorityKey,
    /// Rights each token has acquired, by token nonce.
    acquired: Mutex<HashMap<Nonce, HashSet<String>>>,
    /// Grants shared between tokens of one uid while the rule's timeout runs.
    shared: Mutex<HashMap<(u32, String), Instant>>,
}

impl LocalAuthority {
    /// Authority with a random key that lives as long as this value.
    pub fn new(rights_path: impl Into<PathBuf>) -> Self {
        Self {
            rights_path: rights_path.into(),
            key: rand::random(),
            acquired: Mutex::new(HashMap::new()),
            shared: Mutex::new(HashMap::new()),
        }
    }

    /// Sign tokens with `key`, so they stay valid across restarts.
    pub fn with_key(mut self, key: AuthorityKey) -> Self {
        self.key = key;
        self
    }

    pub fn rights_path(&self) -> &Path {
        &self.rights_path
    }

    fn db_error(&self, message: impl Into<String>) -> AuthorityError {
        AuthorityError::Database {
            path: self.rights_path.display().to_string(),
            message: message.into(),
        }
    }

    fn load_database(&self) -> Result<RightsDatabase, AuthorityError> {
        match fs::read_to_string(&self.rights_path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| self.db_error(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RightsDatabase::default()),
            Err(e) => Err(self.db_error(e.to_string())),
        }
    }

    fn save_database(&self, db: &RightsDatabase) -> Result<(), AuthorityError> {
        let contents = toml::to_string(db).map_err(|e| self.db_error(e.to_string()))?;
        if let Some(parent) = self.rights_path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.db_error(e.to_string()))?;
        }
        fs::write(&self.rights_path, contents).map_err(|e| self.db_error(e.to_string()))
    }

    fn mac(&self, claims: &[u8]) -> blake3::Hash {
        blake3::keyed_hash(&self.key, claims)
    }

    fn encode_token(&self, uid: u32, nonce: &Nonce) -> AuthorizationToken {
        let mut bytes = Vec::with_capacity(TOKEN_LEN);
        bytes.push(TOKEN_VERSION);
        bytes.extend_from_slice(&uid.to_le_bytes());
        bytes.extend_from_slice(nonce);
        let mac = self.mac(&bytes);
        bytes.extend_from_slice(mac.as_bytes());
        AuthorizationToken::from_bytes(bytes)
    }

    /// `None` unless the token was minted with this authority's key.
    fn decode_token(&self, token: &AuthorizationToken) -> Option<TokenClaims> {
        let bytes = token.as_bytes();
        if bytes.len() != TOKEN_LEN || bytes[0] != TOKEN_VERSION {
            return None;
        }
        let (claims, mac) = bytes.split_at(CLAIMS_LEN);
        let mac: [u8; MAC_LEN] = mac.try_into().ok()?;
        // `Hash` equality is constant time.
        if self.mac(claims) != blake3::Hash::from(mac) {
            return None;
        }
        let uid = u32::from_le_bytes(claims[1..5].try_into().ok()?);
        let nonce: Nonce = claims[5..].try_into().ok()?;
        Some(TokenClaims { uid, nonce })
    }

    fn holds(&self, nonce: &Nonce, right: &str) -> bool {
        self.acquired
            .lock()
            .map(|acquired| acquired.get(nonce).is_some_and(|rights| rights.contains(right)))
            .unwrap_or(false)
    }

    fn acquire(&self, nonce: Nonce, right: &str) {
        if let Ok(mut acquired) = self.acquired.lock() {
            acquired.entry(nonce).or_default().insert(right.to_string());
        }
    }

    fn shared_grant(&self, uid: u32, right: &str, timeout: Duration) -> bool {
        let Ok(mut shared) = self.shared.lock() else {
            return false;
        };
        let key = (uid, right.to_string());
        match shared.get(&key) {
            Some(at) if at.elapsed() < timeout => true,
            Some(_) => {
                shared.remove(&key);
                false
            }
            None => false,
        }
    }

    fn share(&self, uid: u32, right: &str) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.insert((uid, right.to_string()), Instant::now());
        }
    }

    fn evaluate(
        &self,
        right: &str,
        rule: &RightRule,
        subject: &Subject,
    ) -> Result<Decision, AuthorityError> {
        match rule.class {
            RuleClass::Allow => Ok(Decision::Granted),
            RuleClass::Deny => Ok(Decision::Denied),
            RuleClass::User => {
                if subject.uid == 0 || is_group_member(subject.uid, subject.gid, &rule.group)? {
                    Ok(Decision::Granted)
                } else {
                    debug!(right, uid = subject.uid, group = %rule.group, "subject not in group");
                    Ok(Decision::Denied)
                }
            }
        }
    }
}

impl CredentialAuthority for LocalAuthority {
    fn create_empty_token(&self, subject: &Subject) -> Result<AuthorizationToken, AuthorityError> {
        let nonce: Nonce = rand::random();
        debug!(uid = subject.uid, "minting authorization token");
        Ok(self.encode_token(subject.uid, &nonce))
    }

    fn right_get(&self, name: &str) -> Result<Option<RightRule>, AuthorityError> {
        let db = self.load_database()?;
        Ok(db.right.get(name).map(StoredRight::rule))
    }

    fn right_set(
        &self,
        name: &str,
        rule: &RightRule,
        description: &str,
    ) -> Result<(), AuthorityError> {
        let mut db = self.load_database()?;
        db.right
            .insert(name.to_string(), StoredRight::new(rule, description));
        self.save_database(&db)?;
        info!(right = name, path = %self.rights_path.display(), "registered authorization right");
        Ok(())
    }

    fn copy_right(
        &self,
        token: &AuthorizationToken,
        right: &str,
        default_rule: &RightRule,
        subject: &Subject,
    ) -> Result<Decision, AuthorityError> {
        let Some(claims) = self.decode_token(token) else {
            debug!(right, "token not issued by this authority");
            return Ok(Decision::Denied);
        };
        if claims.uid != subject.uid {
            debug!(right, token_uid = claims.uid, peer_uid = subject.uid, "token uid mismatch");
            return Ok(Decision::Denied);
        }

        if self.holds(&claims.nonce, right) {
            debug!(right, "token already holds right");
            return Ok(Decision::Granted);
        }

        let rule = self.right_get(right)?.unwrap_or_else(|| default_rule.clone());
        let timeout = Duration::from_secs(rule.timeout);
        if !timeout.is_zero() && self.shared_grant(subject.uid, right, timeout) {
            debug!(right, uid = subject.uid, "reusing shared grant");
            self.acquire(claims.nonce, right);
            return Ok(Decision::Granted);
        }

        let decision = self.evaluate(right, &rule, subject)?;
        if decision.is_granted() {
            self.acquire(claims.nonce, right);
            if !timeout.is_zero() {
                self.share(subject.uid, right);
            }
        }
        Ok(decision)
    }
}

fn is_group_member(uid: u32, primary_gid: u32, group: &str) -> Result<bool, AuthorityError> {
    let group = Group::from_name(group)
        .map_err(|e| AuthorityError::Internal(format!("group lookup '{group}': {e}")))?;
    let Some(group) = group else {
        return Ok(false);
    };
    if group.gid == Gid::from_raw(primary_gid) {
        return Ok(true);
    }

    let user = User::from_uid(Uid::from_raw(uid))
        .map_err(|e| AuthorityError::Internal(format!("user lookup {uid}: {e}")))?;
    Ok(user.is_some_and(|user| group.mem.iter().any(|member| member == &user.name)))
}

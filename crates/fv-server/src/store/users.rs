//! Durable user and machine records.
//!
//! A single JSON document on disk holds every user with their machines.
//! Mutations are serialized behind one mutex; each rewrites the whole file
//! through a temp file + rename, so a crash mid-write can never leave a torn
//! document behind. Password verifiers are argon2 hashes, which also sets
//! the per-check cost of the login scan.

use std::path::PathBuf;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub agent_key: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub broadcast_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub password_hash: String,
    #[serde(default)]
    pub machines: Vec<Machine>,
    /// Pre-machines records carried a single key at the top level.
    #[serde(default, skip_serializing, rename = "agentKey")]
    legacy_agent_key: Option<String>,
}

/// Durable store. Passwords must stay unique across accounts: authentication
/// is a first-match verifier scan, so a collision would silently log in as
/// whichever user sorts first.
#[derive(Debug)]
pub struct UserStore {
    path: PathBuf,
    users: Mutex<Vec<User>>,
}

impl UserStore {
    /// Load the document, or seed the demo accounts on first run. Legacy
    /// single-key records are migrated to the machines form and written back.
    pub async fn load_or_seed(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let (users, dirty) = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut users: Vec<User> = serde_json::from_slice(&bytes)?;
                let migrated = migrate_legacy(&mut users);
                if migrated {
                    tracing::info!("Migrated legacy user records to machine form");
                }
                (users, migrated)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No user file found, seeding demo users");
                (seed_users()?, true)
            }
            Err(e) => return Err(e.into()),
        };

        let store = Self {
            path,
            users: Mutex::new(users),
        };
        if dirty {
            let guard = store.users.lock().await;
            store.persist(&guard)?;
        }
        Ok(store)
    }

    // ─── Reads ───────────────────────────────────────────────

    /// Sequential verifier check across all users; first match wins.
    pub async fn authenticate_by_password(&self, password: &str) -> Option<User> {
        let users = self.users.lock().await;
        let argon2 = Argon2::default();
        for user in users.iter() {
            if let Ok(parsed) = PasswordHash::new(&user.password_hash) {
                if argon2
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
                {
                    return Some(user.clone());
                }
            }
        }
        None
    }

    pub async fn get_user(&self, user_id: &str) -> Option<User> {
        let users = self.users.lock().await;
        users.iter().find(|u| u.id == user_id).cloned()
    }

    /// Resolve an agent key to its owning user and machine.
    pub async fn get_by_agent_key(&self, agent_key: &str) -> Option<(User, Machine)> {
        let users = self.users.lock().await;
        for user in users.iter() {
            if let Some(machine) = user.machines.iter().find(|m| m.agent_key == agent_key) {
                return Some((user.clone(), machine.clone()));
            }
        }
        None
    }

    pub async fn get_machines(&self, user_id: &str) -> Option<Vec<Machine>> {
        let users = self.users.lock().await;
        users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.machines.clone())
    }

    // ─── Mutations (write-through) ───────────────────────────

    pub async fn add_machine(&self, user_id: &str, name: &str) -> Option<Machine> {
        let mut users = self.users.lock().await;
        let user = users.iter_mut().find(|u| u.id == user_id)?;

        let mut id = format!("m{}", Utc::now().timestamp_millis());
        if user.machines.iter().any(|m| m.id == id) {
            // Same-millisecond creations get a short salt as tie-break.
            let salt = Uuid::new_v4().simple().to_string();
            id = format!("{id}{}", &salt[..4]);
        }

        let machine = Machine {
            id,
            name: name.to_string(),
            agent_key: new_agent_key(),
            mac_address: None,
            broadcast_address: None,
        };
        user.machines.push(machine.clone());
        self.persist_or_die(&users);
        Some(machine)
    }

    pub async fn rename_machine(
        &self,
        user_id: &str,
        machine_id: &str,
        name: &str,
    ) -> Option<Machine> {
        let mut users = self.users.lock().await;
        let user = users.iter_mut().find(|u| u.id == user_id)?;
        let machine = user.machines.iter_mut().find(|m| m.id == machine_id)?;
        machine.name = name.to_string();
        let updated = machine.clone();
        self.persist_or_die(&users);
        Some(updated)
    }

    pub async fn remove_machine(&self, user_id: &str, machine_id: &str) -> bool {
        let mut users = self.users.lock().await;
        let Some(user) = users.iter_mut().find(|u| u.id == user_id) else {
            return false;
        };
        let before = user.machines.len();
        user.machines.retain(|m| m.id != machine_id);
        if user.machines.len() == before {
            return false;
        }
        self.persist_or_die(&users);
        true
    }

    /// Set or clear the Wake-on-LAN addresses of a machine.
    pub async fn set_mac_address(
        &self,
        user_id: &str,
        machine_id: &str,
        mac_address: Option<String>,
        broadcast_address: Option<String>,
    ) -> Option<Machine> {
        let mut users = self.users.lock().await;
        let user = users.iter_mut().find(|u| u.id == user_id)?;
        let machine = user.machines.iter_mut().find(|m| m.id == machine_id)?;
        machine.mac_address = mac_address;
        machine.broadcast_address = broadcast_address;
        let updated = machine.clone();
        self.persist_or_die(&users);
        Some(updated)
    }

    // ─── Persistence ─────────────────────────────────────────

    fn persist(&self, users: &[User]) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(users)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// A store that cannot write is a dead process; there is no in-memory
    /// state worth keeping alive once disk and memory diverge.
    fn persist_or_die(&self, users: &[User]) {
        if let Err(e) = self.persist(users) {
            tracing::error!(path = %self.path.display(), "Failed to write user store: {e}");
            std::process::exit(1);
        }
    }
}

fn new_agent_key() -> String {
    Uuid::new_v4().simple().to_string()
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))
}

fn seed_users() -> anyhow::Result<Vec<User>> {
    let demo = [("kingpin", "Kingpin"), ("tez", "Tez")];
    demo.iter()
        .enumerate()
        .map(|(i, (id, display_name))| {
            Ok(User {
                id: id.to_string(),
                display_name: display_name.to_string(),
                password_hash: hash_password(id)?,
                machines: vec![Machine {
                    id: format!("m{}", Utc::now().timestamp_millis() + i as i64),
                    name: "Desktop".to_string(),
                    agent_key: new_agent_key(),
                    mac_address: None,
                    broadcast_address: None,
                }],
                legacy_agent_key: None,
            })
        })
        .collect()
}

/// Rewrite pre-machines records (top-level `agentKey`) into the
/// single-machine form. Returns `true` when anything changed.
fn migrate_legacy(users: &mut [User]) -> bool {
    let mut changed = false;
    for user in users.iter_mut() {
        if user.machines.is_empty() {
            if let Some(agent_key) = user.legacy_agent_key.take() {
                user.machines.push(Machine {
                    id: "m1".to_string(),
                    name: "My Computer".to_string(),
                    agent_key,
                    mac_address: None,
                    broadcast_address: None,
                });
                changed = true;
            }
        }
    }
    changed
}

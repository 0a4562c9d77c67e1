//! Accounts and the single active session of a workspace.
//!
//! Passwords are stored as Argon2id PHC strings. The session token is a
//! base64 JSON payload `{id, email, role, exp}`; it is an identification
//! convenience, not a security boundary.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PortalError;
use crate::model::{ClassType, Record, Role, Student, User, UserAccount};
use crate::store::{keys, Store};

pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
    #[serde(default)]
    pub classes: Option<Vec<ClassType>>,
    /// For students: creates and links a student record.
    #[serde(default)]
    pub class: Option<ClassType>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub mobile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SessionToken {
    id: String,
    email: String,
    role: Role,
    /// Expiry, milliseconds since the Unix epoch.
    exp: i64,
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| anyhow::anyhow!("failed to encode salt: {}", e))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// False for a wrong password and for anything that is not a PHC hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn encode_token(token: &SessionToken) -> anyhow::Result<String> {
    Ok(BASE64.encode(serde_json::to_vec(token)?))
}

fn decode_token(raw: &str) -> Option<SessionToken> {
    let bytes = BASE64.decode(raw.trim().as_bytes()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub fn require_admin(actor: &User) -> Result<(), PortalError> {
    if actor.role != Role::Admin {
        return Err(PortalError::unauthorized("admin role required"));
    }
    Ok(())
}

pub fn require_role(actor: &User, roles: &[Role]) -> Result<(), PortalError> {
    if !roles.contains(&actor.role) {
        return Err(PortalError::unauthorized(format!(
            "role {} may not perform this action",
            actor.role.as_str()
        )));
    }
    Ok(())
}

pub struct AuthService<'a> {
    store: &'a mut Store,
}

impl<'a> AuthService<'a> {
    pub fn new(store: &'a mut Store) -> Self {
        Self { store }
    }

    pub fn register(&mut self, reg: Registration) -> anyhow::Result<User> {
        let name = reg.name.trim().to_string();
        let email = reg.email.trim().to_string();
        if name.is_empty() || email.is_empty() || reg.password.is_empty() {
            return Err(PortalError::validation("name, email and password are required").into());
        }
        if self.store.user_by_email(&email).is_some() {
            return Err(PortalError::DuplicateEmail(email).into());
        }
        let role = reg.role.unwrap_or(Role::Student);

        let student_id = match (role, reg.class) {
            (Role::Student, Some(class)) => {
                let student = match self.store.student_by_email(&email) {
                    Some(existing) => existing,
                    None => self.store.add(Student {
                        name: name.clone(),
                        email: email.clone(),
                        age: reg.age,
                        mobile: reg.mobile.clone(),
                        class,
                    })?,
                };
                Some(student.id)
            }
            _ => None,
        };

        let account = UserAccount {
            name,
            email,
            role,
            classes: if role == Role::Teacher { reg.classes } else { None },
            student_id,
            password_hash: hash_password(&reg.password)?,
        };
        let created = self.store.add(account)?;
        info!(user = %created.id, role = role.as_str(), "account registered");
        Ok(User::from(&created))
    }

    /// Verifies credentials and stores a fresh session. Invalid credentials
    /// are `Ok(None)`.
    pub fn login(
        &mut self,
        email: &str,
        password: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<User>> {
        let account = self.store.get_all::<UserAccount>().into_iter().find(|u| {
            u.data.email.eq_ignore_ascii_case(email.trim())
                && u.data.role == role
                && verify_password(password, &u.data.password_hash)
        });
        let Some(account) = account else {
            debug!(email, "login rejected");
            return Ok(None);
        };

        let token = SessionToken {
            id: account.id.clone(),
            email: account.data.email.clone(),
            role: account.data.role,
            exp: (now + Duration::hours(SESSION_TTL_HOURS)).timestamp_millis(),
        };
        self.store.write_raw(keys::SESSION, &encode_token(&token)?)?;
        info!(user = %account.id, "logged in");
        Ok(Some(User::from(&account)))
    }

    pub fn logout(&mut self) -> anyhow::Result<()> {
        self.store.remove_raw(keys::SESSION)
    }

    /// The session's user. Expired, corrupt or orphaned sessions are cleared.
    pub fn current_user(&mut self, now: DateTime<Utc>) -> anyhow::Result<Option<User>> {
        let Some(raw) = self.store.read_raw(keys::SESSION) else {
            return Ok(None);
        };
        let Some(token) = decode_token(&raw) else {
            warn!("discarding unreadable session token");
            self.logout()?;
            return Ok(None);
        };
        if token.exp < now.timestamp_millis() {
            debug!(user = %token.id, "session expired");
            self.logout()?;
            return Ok(None);
        }
        match self.store.find::<UserAccount>(&token.id) {
            Some(account) => Ok(Some(User::from(&account))),
            None => {
                self.logout()?;
                Ok(None)
            }
        }
    }

    pub fn list_users(&self, actor: &User, role: Option<Role>) -> anyhow::Result<Vec<User>> {
        require_admin(actor)?;
        Ok(self
            .store
            .get_all::<UserAccount>()
            .iter()
            .filter(|u| role.map(|r| u.data.role == r).unwrap_or(true))
            .map(User::from)
            .collect())
    }

    /// Admins may update anyone; other users only themselves. Credentials,
    /// role and links are not editable here.
    pub fn update_user(
        &mut self,
        actor: &User,
        id: &str,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<Option<User>> {
        if actor.role != Role::Admin && actor.id != id {
            return Err(PortalError::unauthorized("may only update your own account").into());
        }
        for locked in ["passwordHash", "password", "role", "studentId"] {
            if patch.contains_key(locked) {
                return Err(PortalError::validation(format!("{} cannot be changed here", locked)).into());
            }
        }
        if let Some(email) = patch.get("email").and_then(|v| v.as_str()) {
            if let Some(other) = self.store.user_by_email(email) {
                if other.id != id {
                    return Err(PortalError::DuplicateEmail(email.to_string()).into());
                }
            }
        }
        let updated: Option<Record<UserAccount>> = self.store.update(id, patch)?;
        Ok(updated.as_ref().map(User::from))
    }

    pub fn change_password(
        &mut self,
        actor: &User,
        current: &str,
        new_password: &str,
    ) -> anyhow::Result<()> {
        if new_password.is_empty() {
            return Err(PortalError::validation("new password must not be empty").into());
        }
        let Some(account) = self.store.find::<UserAccount>(&actor.id) else {
            return Err(PortalError::NotFound("user".to_string()).into());
        };
        if !verify_password(current, &account.data.password_hash) {
            return Err(PortalError::validation("current password is incorrect").into());
        }
        let mut patch = serde_json::Map::new();
        patch.insert(
            "passwordHash".to_string(),
            serde_json::Value::String(hash_password(new_password)?),
        );
        self.store.update::<UserAccount>(&actor.id, &patch)?;
        info!(user = %actor.id, "password changed");
        Ok(())
    }

    pub fn delete_user(&mut self, actor: &User, id: &str) -> anyhow::Result<bool> {
        require_admin(actor)?;
        self.store.delete::<UserAccount>(id)
    }
}

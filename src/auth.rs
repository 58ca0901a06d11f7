//! C9: user password auth, agent-token auth, JWT issue/refresh/revoke.

use std::collections::HashSet;
use std::sync::Mutex;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng};
use argon2::{Argon2, Params, Version};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};
use crate::models::{Agent, AgentStatus, Capabilities, Role, TokenPair, User};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "type")]
    token_type: String,
    exp: i64,
}

fn argon2_context() -> Argon2<'static> {
    // time_cost=2, memory=64MiB, parallelism=4, per the durable-schema spec.
    let params = Params::new(64 * 1024, 2, 4, None).expect("valid argon2 params");
    Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params)
}

pub fn hash_password(plaintext: &str) -> BrokerResult<String> {
    if plaintext.len() < 12 {
        return Err(BrokerError::Validation("password must be at least 12 characters".to_string()));
    }
    let salt = SaltString::generate(&mut OsRng);
    argon2_context()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| BrokerError::Internal(format!("argon2 hash failed: {e}")))
}

pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else { return false };
    argon2_context().verify_password(plaintext.as_bytes(), &parsed).is_ok()
}

fn hash_token(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// In-memory user/agent registry plus JWT issuance. Users and agents are
/// stored here directly (rather than via the broker `Store`) since they're
/// durable-schema entities the `AuthService` owns end to end.
pub struct AuthService {
    users: Mutex<Vec<User>>,
    agents: Mutex<Vec<Agent>>,
    jwt_secret: String,
    access_ttl: ChronoDuration,
    refresh_ttl: ChronoDuration,
    valid_refresh_tokens: Mutex<HashSet<String>>,
    revoked_access_tokens: Mutex<HashSet<String>>,
}

impl AuthService {
    pub fn new(jwt_secret: String, access_ttl: std::time::Duration, refresh_ttl: std::time::Duration) -> Self {
        AuthService {
            users: Mutex::new(Vec::new()),
            agents: Mutex::new(Vec::new()),
            jwt_secret,
            access_ttl: ChronoDuration::from_std(access_ttl).unwrap(),
            refresh_ttl: ChronoDuration::from_std(refresh_ttl).unwrap(),
            valid_refresh_tokens: Mutex::new(HashSet::new()),
            revoked_access_tokens: Mutex::new(HashSet::new()),
        }
    }

    /// Provisions the default admin user from configuration if no users exist yet.
    pub fn ensure_admin_user(&self, username: &str, password: &str) -> BrokerResult<()> {
        if !self.users.lock().unwrap().is_empty() {
            return Ok(());
        }
        self.register_user(username, &format!("{username}@local"), password, Role::Admin)
            .map(|_| ())
    }

    pub fn register_user(&self, username: &str, email: &str, password: &str, role: Role) -> BrokerResult<User> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.username == username) {
            return Err(BrokerError::Duplicate(format!("username {username} already registered")));
        }
        let password_hash = hash_password(password)?;
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            role,
            permissions: vec![],
            is_active: true,
            created_at: Utc::now(),
        };
        users.push(user.clone());
        Ok(user)
    }

    pub fn authenticate_user(&self, username: &str, password: &str) -> BrokerResult<User> {
        let users = self.users.lock().unwrap();
        let user = users
            .iter()
            .find(|u| u.username == username && u.is_active)
            .ok_or_else(|| BrokerError::Unauthorized("invalid credentials".to_string()))?;
        if !verify_password(password, &user.password_hash) {
            return Err(BrokerError::Unauthorized("invalid credentials".to_string()));
        }
        Ok(user.clone())
    }

    fn sign(&self, sub: &str, token_type: &str, ttl: ChronoDuration) -> BrokerResult<String> {
        let claims = Claims {
            sub: sub.to_string(),
            token_type: token_type.to_string(),
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes()))
            .map_err(|e| BrokerError::Internal(format!("jwt sign failed: {e}")))
    }

    fn decode_claims(&self, token: &str) -> BrokerResult<Claims> {
        decode::<Claims>(token, &DecodingKey::from_secret(self.jwt_secret.as_bytes()), &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| BrokerError::Unauthorized("invalid or expired token".to_string()))
    }

    pub fn issue_tokens(&self, user: &User) -> BrokerResult<TokenPair> {
        let access = self.sign(&user.id.to_string(), "access", self.access_ttl)?;
        let refresh = self.sign(&user.id.to_string(), "refresh", self.refresh_ttl)?;
        self.valid_refresh_tokens.lock().unwrap().insert(refresh.clone());
        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            token_type: "Bearer",
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    pub fn verify_access_token(&self, token: &str) -> BrokerResult<Uuid> {
        if self.revoked_access_tokens.lock().unwrap().contains(token) {
            return Err(BrokerError::Unauthorized("token has been revoked".to_string()));
        }
        let claims = self.decode_claims(token)?;
        if claims.token_type != "access" {
            return Err(BrokerError::Unauthorized("not an access token".to_string()));
        }
        Uuid::parse_str(&claims.sub).map_err(|_| BrokerError::Unauthorized("malformed subject".to_string()))
    }

    /// Only accepts refresh tokens currently in the valid set, bound to the same user.
    pub fn refresh_access_token(&self, refresh_token: &str) -> BrokerResult<TokenPair> {
        if !self.valid_refresh_tokens.lock().unwrap().contains(refresh_token) {
            return Err(BrokerError::Unauthorized("refresh token not recognized".to_string()));
        }
        let claims = self.decode_claims(refresh_token)?;
        if claims.token_type != "refresh" {
            return Err(BrokerError::Unauthorized("not a refresh token".to_string()));
        }
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| BrokerError::Unauthorized("malformed subject".to_string()))?;
        let users = self.users.lock().unwrap();
        let user = users
            .iter()
            .find(|u| u.id == user_id)
            .ok_or_else(|| BrokerError::Unauthorized("user no longer exists".to_string()))?;
        let access = self.sign(&user.id.to_string(), "access", self.access_ttl)?;
        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh_token.to_string(),
            token_type: "Bearer",
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Access tokens join a blacklist; refresh tokens are dropped from the valid set.
    pub fn revoke_token(&self, token: &str) {
        if let Ok(claims) = self.decode_claims(token) {
            match claims.token_type.as_str() {
                "refresh" => {
                    self.valid_refresh_tokens.lock().unwrap().remove(token);
                }
                _ => {
                    self.revoked_access_tokens.lock().unwrap().insert(token.to_string());
                }
            }
        }
    }

    pub fn register_agent(
        &self,
        project_id: &str,
        nickname: &str,
        capabilities: Capabilities,
        created_by_id: Option<Uuid>,
    ) -> BrokerResult<(Agent, String)> {
        let mut secret_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let secret = hex::encode(secret_bytes);
        let plaintext = format!("{project_id}_{nickname}_{secret}");
        let agent = Agent {
            id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            nickname: nickname.to_string(),
            token_hash: hash_token(&plaintext),
            capabilities,
            status: AgentStatus::Offline,
            is_active: true,
            created_by_id,
            last_used: None,
            created_at: Utc::now(),
        };
        self.agents.lock().unwrap().push(agent.clone());
        Ok((agent, plaintext))
    }

    pub fn authenticate_agent(&self, plaintext_token: &str) -> BrokerResult<Agent> {
        let hash = hash_token(plaintext_token);
        let mut agents = self.agents.lock().unwrap();
        let agent = agents
            .iter_mut()
            .find(|a| a.token_hash == hash && a.is_active)
            .ok_or_else(|| BrokerError::Unauthorized("invalid agent token".to_string()))?;
        agent.last_used = Some(Utc::now());
        Ok(agent.clone())
    }

    /// Detaches an agent key from its creator on user deletion, matching
    /// `created_by_id`'s `ON DELETE SET NULL` FK behavior.
    pub fn detach_creator(&self, user_id: Uuid) {
        let mut agents = self.agents.lock().unwrap();
        for agent in agents.iter_mut().filter(|a| a.created_by_id == Some(user_id)) {
            agent.created_by_id = None;
        }
    }

    pub fn get_agent(&self, id: Uuid) -> Option<Agent> {
        self.agents.lock().unwrap().iter().find(|a| a.id == id).cloned()
    }
}

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use driftboard_common::config::Config;
use driftboard_common::types::User;
use driftboard_common::{Error, IdGenerator, RedisClient, Result};

use crate::db;
use crate::email::generate_verification_code;
use crate::queue::{Event, Producer};

#[derive(Debug, Deserialize)]
pub struct RegisterParams {
    pub user_name: String,
    pub password: String,
    pub email: String,
    #[serde(default)]
    pub gender: i16,
    pub verification_code: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    pub user_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileParams {
    #[serde(default)]
    pub gender: Option<i16>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub intro: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshParams {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResult {
    pub user_id: i64,
    pub user_name: String,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: i64,
    exp: i64,
}

/// Users and sessions. Access tokens are JWTs mirrored into the fast store
/// under the user id, so a later login invalidates every earlier session.
pub struct UserEngine {
    db: PgPool,
    redis: Arc<RedisClient>,
    producer: Arc<Producer>,
    ids: Arc<IdGenerator>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl UserEngine {
    pub fn new(
        cfg: &Config,
        db: PgPool,
        redis: Arc<RedisClient>,
        producer: Arc<Producer>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        UserEngine {
            db,
            redis,
            producer,
            ids,
            encoding: EncodingKey::from_secret(cfg.auth.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.auth.jwt_secret.as_bytes()),
            access_ttl: cfg.auth.access_token_expire_secs as i64,
            refresh_ttl: cfg.auth.refresh_token_expire_secs as i64,
        }
    }

    fn sign(&self, user_id: i64, ttl: i64) -> Result<String> {
        let claims = Claims {
            user_id,
            exp: Utc::now().timestamp() + ttl,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("sign token: {e}")))
    }

    fn decode_claims(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::ExpiredToken,
                _ => Error::InvalidToken,
            })
    }

    pub async fn register(&self, params: RegisterParams) -> Result<i64> {
        if params.user_name.is_empty() || params.password.is_empty() {
            return Err(Error::InvalidParam("empty user name or password".to_string()));
        }

        let expected = self.redis.email_code(&params.email).await?;
        if expected.as_deref() != Some(params.verification_code.as_str()) {
            return Err(Error::InvalidVerificationCode);
        }

        if db::user::user_by_name(&self.db, &params.user_name).await?.is_some() {
            return Err(Error::UserExist);
        }
        if db::user::email_taken(&self.db, &params.email).await? {
            return Err(Error::EmailExist);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(params.password.as_bytes(), &salt)
            .map_err(|e| Error::Internal(format!("hash password: {e}")))?
            .to_string();

        let now = Utc::now();
        let user = User {
            user_id: self.ids.next(),
            user_name: params.user_name,
            password_hash,
            email: params.email,
            gender: params.gender,
            avatar: String::new(),
            intro: String::new(),
            created_at: now,
            updated_at: now,
        };
        db::user::create_user(&self.db, &user).await?;
        Ok(user.user_id)
    }

    pub async fn login(&self, params: LoginParams) -> Result<LoginResult> {
        let user = db::user::user_by_name(&self.db, &params.user_name)
            .await?
            .ok_or(Error::UserNotExist)?;

        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| Error::Internal(format!("stored hash unreadable: {e}")))?;
        if Argon2::default()
            .verify_password(params.password.as_bytes(), &parsed)
            .is_err()
        {
            return Err(Error::WrongPassword);
        }

        let access = self.sign(user.user_id, self.access_ttl)?;
        let refresh = self.sign(user.user_id, self.refresh_ttl)?;
        self.redis
            .set_access_token(user.user_id, &access, self.access_ttl)
            .await?;
        self.redis
            .set_refresh_token(user.user_id, &refresh, self.refresh_ttl)
            .await?;

        Ok(LoginResult {
            user_id: user.user_id,
            user_name: user.user_name,
            access_token: access,
            refresh_token: refresh,
        })
    }

    /// Trade a live refresh token for a fresh access token. The stored
    /// refresh token must match, so a newer login revokes older refreshers.
    pub async fn refresh(&self, params: RefreshParams) -> Result<LoginResult> {
        let claims = self.decode_claims(&params.refresh_token)?;
        match self.redis.refresh_token(claims.user_id).await? {
            Some(stored) if stored == params.refresh_token => {}
            Some(_) => return Err(Error::ExpiredLogin),
            None => return Err(Error::NeedLogin),
        }

        let user = db::user::user_by_id(&self.db, claims.user_id)
            .await?
            .ok_or(Error::UserNotExist)?;
        let access = self.sign(user.user_id, self.access_ttl)?;
        self.redis
            .set_access_token(user.user_id, &access, self.access_ttl)
            .await?;

        Ok(LoginResult {
            user_id: user.user_id,
            user_name: user.user_name,
            access_token: access,
            refresh_token: params.refresh_token,
        })
    }

    /// Validate a bearer token: signature and expiry first, then the
    /// fast-store mirror so a superseded session reads as expired login.
    pub async fn verify_token(&self, token: &str) -> Result<i64> {
        let user_id = self.decode_claims(token)?.user_id;
        match self.redis.access_token(user_id).await? {
            Some(stored) if stored == token => Ok(user_id),
            Some(_) => Err(Error::ExpiredLogin),
            None => Err(Error::NeedLogin),
        }
    }

    /// Owner-only profile mutation; absent fields keep their value.
    pub async fn update_profile(&self, user_id: i64, params: UpdateProfileParams) -> Result<()> {
        db::user::user_by_id(&self.db, user_id)
            .await?
            .ok_or(Error::UserNotExist)?;
        db::user::update_profile(&self.db, user_id, params.gender, params.avatar, params.intro)
            .await
    }

    pub async fn profile(&self, user_id: i64) -> Result<User> {
        db::user::user_by_id(&self.db, user_id)
            .await?
            .ok_or(Error::UserNotExist)
    }

    /// Queue a verification code for delivery. The consumer stores the code
    /// and hands it to the email sink.
    pub fn send_verification_code(&self, email: String) -> Result<()> {
        if !email.contains('@') {
            return Err(Error::InvalidParam(format!("bad email address {email}")));
        }
        let code = generate_verification_code();
        self.producer
            .publish_background(Event::email_verification_code(email, code));
        Ok(())
    }
}

use sqlx::PgExecutor;

use driftboard_common::types::User;
use driftboard_common::{is_unique_violation, Error, Result};

/// Insert a new user. Unique collisions on name or email surface as the
/// matching domain error rather than a raw database error.
pub async fn create_user<'e, E: PgExecutor<'e>>(db: E, user: &User) -> Result<()> {
    let res = sqlx::query(
        "INSERT INTO users (user_id, user_name, password_hash, email, gender, avatar, intro)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(user.user_id)
    .bind(&user.user_name)
    .bind(&user.password_hash)
    .bind(&user.email)
    .bind(user.gender)
    .bind(&user.avatar)
    .bind(&user.intro)
    .execute(db)
    .await;

    match res {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => {
            let constraint = match &err {
                sqlx::Error::Database(db_err) => db_err.constraint().unwrap_or_default().to_string(),
                _ => String::new(),
            };
            if constraint.contains("email") {
                Err(Error::EmailExist)
            } else {
                Err(Error::UserExist)
            }
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn user_by_name<'e, E: PgExecutor<'e>>(db: E, user_name: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_name = $1")
        .bind(user_name)
        .fetch_optional(db)
        .await?;
    Ok(user)
}

pub async fn user_by_id<'e, E: PgExecutor<'e>>(db: E, user_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?;
    Ok(user)
}

pub async fn update_profile<'e, E: PgExecutor<'e>>(
    db: E,
    user_id: i64,
    gender: Option<i16>,
    avatar: Option<String>,
    intro: Option<String>,
) -> Result<()> {
    sqlx::query(
        "UPDATE users
         SET gender = COALESCE($2, gender),
             avatar = COALESCE($3, avatar),
             intro  = COALESCE($4, intro),
             updated_at = now()
         WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(gender)
    .bind(avatar)
    .bind(intro)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn email_taken<'e, E: PgExecutor<'e>>(db: E, email: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(db)
        .await?;
    Ok(count > 0)
}

use sqlx::PgExecutor;

use driftboard_common::types::Community;
use driftboard_common::{is_unique_violation, Error, Result};

pub async fn create_community<'e, E: PgExecutor<'e>>(db: E, community: &Community) -> Result<()> {
    let res = sqlx::query(
        "INSERT INTO communities (community_id, community_name, introduction) VALUES ($1, $2, $3)",
    )
    .bind(community.community_id)
    .bind(&community.community_name)
    .bind(&community.introduction)
    .execute(db)
    .await;

    match res {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Err(Error::InvalidParam(
            "community name already taken".to_string(),
        )),
        Err(err) => Err(err.into()),
    }
}

pub async fn communities<'e, E: PgExecutor<'e>>(db: E) -> Result<Vec<Community>> {
    let list = sqlx::query_as::<_, Community>("SELECT * FROM communities ORDER BY community_id")
        .fetch_all(db)
        .await?;
    Ok(list)
}

pub async fn community_by_id<'e, E: PgExecutor<'e>>(
    db: E,
    community_id: i64,
) -> Result<Option<Community>> {
    let community =
        sqlx::query_as::<_, Community>("SELECT * FROM communities WHERE community_id = $1")
            .bind(community_id)
            .fetch_optional(db)
            .await?;
    Ok(community)
}

pub async fn community_ids<'e, E: PgExecutor<'e>>(db: E) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT community_id FROM communities")
        .fetch_all(db)
        .await?;
    Ok(ids)
}

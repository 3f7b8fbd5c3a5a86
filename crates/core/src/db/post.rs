use sqlx::PgExecutor;

use driftboard_common::types::{ExpiredPostScore, Post, PostDetail};
use driftboard_common::Result;

pub async fn create_post<'e, E: PgExecutor<'e>>(db: E, post: &Post) -> Result<()> {
    sqlx::query(
        "INSERT INTO posts (post_id, community_id, author_id, status, title, content)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(post.post_id)
    .bind(post.community_id)
    .bind(post.author_id)
    .bind(post.status)
    .bind(&post.title)
    .bind(&post.content)
    .execute(db)
    .await?;
    Ok(())
}

const DETAIL_COLUMNS: &str = "p.post_id, p.author_id, u.user_name AS author_name,
       c.community_id, c.community_name, c.introduction AS community_intro,
       p.status, p.title, p.created_at, p.updated_at";

pub async fn post_detail<'e, E: PgExecutor<'e>>(db: E, post_id: i64) -> Result<Option<PostDetail>> {
    let sql = format!(
        "SELECT {DETAIL_COLUMNS}, p.content
         FROM posts p
         JOIN communities c ON c.community_id = p.community_id
         JOIN users u ON u.user_id = p.author_id
         WHERE p.post_id = $1"
    );
    let detail = sqlx::query_as::<_, PostDetail>(&sql)
        .bind(post_id)
        .fetch_optional(db)
        .await?;
    Ok(detail)
}

/// Post details in the order of the given id list, content truncated for
/// list rendering.
pub async fn post_list_by_ids<'e, E: PgExecutor<'e>>(
    db: E,
    post_ids: &[i64],
    content_max_len: i32,
) -> Result<Vec<PostDetail>> {
    if post_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {DETAIL_COLUMNS}, substr(p.content, 1, $2) AS content
         FROM posts p
         JOIN communities c ON c.community_id = p.community_id
         JOIN users u ON u.user_id = p.author_id
         WHERE p.post_id = ANY($1)
         ORDER BY array_position($1, p.post_id)"
    );
    let rows = sqlx::query_as::<_, PostDetail>(&sql)
        .bind(post_ids)
        .bind(content_max_len)
        .fetch_all(db)
        .await?;
    Ok(rows)
}

pub async fn post_author_and_community<'e, E: PgExecutor<'e>>(
    db: E,
    post_id: i64,
) -> Result<Option<(i64, i64)>> {
    let row: Option<(i64, i64)> =
        sqlx::query_as("SELECT author_id, community_id FROM posts WHERE post_id = $1")
            .bind(post_id)
            .fetch_optional(db)
            .await?;
    Ok(row)
}

pub async fn update_post_status<'e, E: PgExecutor<'e>>(
    db: E,
    status: i16,
    post_ids: &[i64],
) -> Result<()> {
    sqlx::query("UPDATE posts SET status = $1, updated_at = now() WHERE post_id = ANY($2)")
        .bind(status)
        .bind(post_ids)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn create_expired_post_scores<'e, E: PgExecutor<'e>>(
    db: E,
    scores: &[ExpiredPostScore],
) -> Result<()> {
    if scores.is_empty() {
        return Ok(());
    }
    let post_ids: Vec<i64> = scores.iter().map(|s| s.post_id).collect();
    let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
    let vote_nums: Vec<i64> = scores.iter().map(|s| s.vote_num).collect();
    // A sweep re-running over an already frozen post keeps the first snapshot.
    sqlx::query(
        "INSERT INTO expired_post_scores (post_id, score, vote_num)
         SELECT * FROM unnest($1::bigint[], $2::float8[], $3::bigint[])
         ON CONFLICT (post_id) DO NOTHING",
    )
    .bind(&post_ids)
    .bind(&values)
    .bind(&vote_nums)
    .execute(db)
    .await?;
    Ok(())
}

/// Frozen vote counts for expired posts, keyed by post id.
pub async fn expired_vote_nums<'e, E: PgExecutor<'e>>(
    db: E,
    post_ids: &[i64],
) -> Result<Vec<(i64, i64)>> {
    if post_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT post_id, vote_num FROM expired_post_scores WHERE post_id = ANY($1)",
    )
    .bind(post_ids)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn post_ids_by_author<'e, E: PgExecutor<'e>>(
    db: E,
    author_id: i64,
    offset: i64,
    limit: i64,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT post_id FROM posts WHERE author_id = $1
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(author_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    Ok(ids)
}

pub async fn post_count_by_author<'e, E: PgExecutor<'e>>(db: E, author_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT count(*) FROM posts WHERE author_id = $1")
        .bind(author_id)
        .fetch_one(db)
        .await?;
    Ok(count)
}

/// Keyword lookup against title and content, newest first. The fallback when
/// no external search index is configured.
pub async fn post_ids_by_keyword<'e, E: PgExecutor<'e>>(
    db: E,
    keyword: &str,
    offset: i64,
    limit: i64,
) -> Result<Vec<i64>> {
    let pattern = format!("%{}%", keyword.replace('%', "\\%").replace('_', "\\_"));
    let ids = sqlx::query_scalar(
        "SELECT post_id FROM posts
         WHERE title ILIKE $1 OR content ILIKE $1
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(pattern)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    Ok(ids)
}

pub async fn delete_post<'e, E: PgExecutor<'e>>(db: E, post_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM posts WHERE post_id = $1")
        .bind(post_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn delete_expired_post_score<'e, E: PgExecutor<'e>>(db: E, post_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM expired_post_scores WHERE post_id = $1")
        .bind(post_id)
        .execute(db)
        .await?;
    Ok(())
}

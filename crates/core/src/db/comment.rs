use sqlx::PgExecutor;

use driftboard_common::types::{CommentContent, CommentInfo, ObjType};
use driftboard_common::{Error, Result};

/// Count columns that may be atomically bumped. The column name is spliced
/// into SQL, so it must come from this closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountField {
    Count,
    RootCount,
    Like,
    Hate,
}

impl CountField {
    pub fn column(self) -> &'static str {
        match self {
            CountField::Count => "count",
            CountField::RootCount => "root_count",
            CountField::Like => "\"like\"",
            CountField::Hate => "hate",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(CountField::Count),
            "root_count" => Ok(CountField::RootCount),
            "like" => Ok(CountField::Like),
            "hate" => Ok(CountField::Hate),
            other => Err(Error::InvalidParam(format!("unknown count field {other}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CountField::Count => "count",
            CountField::RootCount => "root_count",
            CountField::Like => "like",
            CountField::Hate => "hate",
        }
    }
}

pub async fn create_comment_content<'e, E: PgExecutor<'e>>(
    db: E,
    comment_id: i64,
    message: &str,
) -> Result<()> {
    sqlx::query("INSERT INTO comment_contents (comment_id, message) VALUES ($1, $2)")
        .bind(comment_id)
        .bind(message)
        .execute(db)
        .await?;
    Ok(())
}

/// Insert the subject row for `(obj_id, obj_type)`. Two consumers racing the
/// first comment of a subject make this conflict benignly.
pub async fn create_comment_subject<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
    obj_id: i64,
    obj_type: ObjType,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO comment_subjects (id, obj_id, obj_type) VALUES ($1, $2, $3)
         ON CONFLICT (obj_id, obj_type) DO NOTHING",
    )
    .bind(id)
    .bind(obj_id)
    .bind(obj_type.as_i16())
    .execute(db)
    .await?;
    Ok(())
}

pub async fn subject_exists<'e, E: PgExecutor<'e>>(
    db: E,
    obj_id: i64,
    obj_type: ObjType,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM comment_subjects WHERE obj_id = $1 AND obj_type = $2",
    )
    .bind(obj_id)
    .bind(obj_type.as_i16())
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

/// `UPDATE … SET field = field + offset` on the subject row. The row lock
/// taken here serializes concurrent floor assignment within one subject.
pub async fn incr_subject_count_field<'e, E: PgExecutor<'e>>(
    db: E,
    field: CountField,
    obj_id: i64,
    obj_type: ObjType,
    offset: i32,
) -> Result<()> {
    if offset == 0 {
        return Ok(());
    }
    let col = field.column();
    let sql = format!(
        "UPDATE comment_subjects SET {col} = {col} + $1, updated_at = now()
         WHERE obj_id = $2 AND obj_type = $3"
    );
    sqlx::query(&sql)
        .bind(offset)
        .bind(obj_id)
        .bind(obj_type.as_i16())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn incr_index_count_field<'e, E: PgExecutor<'e>>(
    db: E,
    field: CountField,
    id: i64,
    offset: i32,
) -> Result<()> {
    if offset == 0 {
        return Ok(());
    }
    let col = field.column();
    let sql = format!(
        "UPDATE comment_indices SET {col} = {col} + $1, updated_at = now() WHERE id = $2"
    );
    sqlx::query(&sql).bind(offset).bind(id).execute(db).await?;
    Ok(())
}

pub async fn subject_count_field<'e, E: PgExecutor<'e>>(
    db: E,
    field: CountField,
    obj_id: i64,
    obj_type: ObjType,
) -> Result<i32> {
    let sql = format!(
        "SELECT {} FROM comment_subjects WHERE obj_id = $1 AND obj_type = $2",
        field.column()
    );
    let value: Option<i32> = sqlx::query_scalar(&sql)
        .bind(obj_id)
        .bind(obj_type.as_i16())
        .fetch_optional(db)
        .await?;
    Ok(value.unwrap_or(0))
}

pub async fn index_count_field<'e, E: PgExecutor<'e>>(
    db: E,
    field: CountField,
    id: i64,
) -> Result<i32> {
    let sql = format!("SELECT {} FROM comment_indices WHERE id = $1", field.column());
    let value: Option<i32> = sqlx::query_scalar(&sql).bind(id).fetch_optional(db).await?;
    Ok(value.unwrap_or(0))
}

#[allow(clippy::too_many_arguments)]
pub async fn create_comment_index<'e, E: PgExecutor<'e>>(
    db: E,
    id: i64,
    obj_id: i64,
    obj_type: ObjType,
    root: i64,
    parent: i64,
    user_id: i64,
    floor: i32,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO comment_indices (id, obj_id, obj_type, root, parent, user_id, floor)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(id)
    .bind(obj_id)
    .bind(obj_type.as_i16())
    .bind(root)
    .bind(parent)
    .bind(user_id)
    .bind(floor)
    .execute(db)
    .await?;
    Ok(())
}

/// Root comment ids of a subject, floor order (insertion order suffices, ids
/// are snowflakes).
pub async fn root_comment_ids<'e, E: PgExecutor<'e>>(
    db: E,
    obj_type: ObjType,
    obj_id: i64,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT id FROM comment_indices
         WHERE root = 0 AND obj_type = $1 AND obj_id = $2 ORDER BY floor",
    )
    .bind(obj_type.as_i16())
    .bind(obj_id)
    .fetch_all(db)
    .await?;
    Ok(ids)
}

/// `(id, floor)` pairs for the given comments, floor order.
pub async fn comment_floor_pairs<'e, E: PgExecutor<'e>>(
    db: E,
    comment_ids: &[i64],
) -> Result<Vec<(i64, i32)>> {
    let rows: Vec<(i64, i32)> = sqlx::query_as(
        "SELECT id, floor FROM comment_indices WHERE id = ANY($1) ORDER BY floor",
    )
    .bind(comment_ids)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Comment metadata joined with its author. `by_root` selects every reply
/// whose root is in the id set instead of the comments themselves.
pub async fn comment_metadata<'e, E: PgExecutor<'e>>(
    db: E,
    by_root: bool,
    comment_ids: &[i64],
) -> Result<Vec<CommentInfo>> {
    let field = if by_root { "c.root" } else { "c.id" };
    let sql = format!(
        "SELECT c.id AS comment_id, c.obj_id, c.obj_type, c.root, c.parent, c.user_id,
                u.user_name, u.avatar, c.floor, c.\"like\"::bigint AS \"like\",
                c.created_at, c.updated_at
         FROM comment_indices c
         JOIN users u ON u.user_id = c.user_id
         WHERE {field} = ANY($1)
         ORDER BY c.floor"
    );
    let rows = sqlx::query_as::<_, CommentInfo>(&sql)
        .bind(comment_ids)
        .fetch_all(db)
        .await?;
    Ok(rows)
}

/// Contents for the given ids, in input order. Missing rows yield no entry.
pub async fn comment_contents<'e, E: PgExecutor<'e>>(
    db: E,
    comment_ids: &[i64],
) -> Result<Vec<CommentContent>> {
    let rows = sqlx::query_as::<_, CommentContent>(
        "SELECT comment_id, message FROM comment_contents
         WHERE comment_id = ANY($1)
         ORDER BY array_position($1, comment_id)",
    )
    .bind(comment_ids)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn comment_author<'e, E: PgExecutor<'e>>(db: E, comment_id: i64) -> Result<Option<i64>> {
    let author = sqlx::query_scalar("SELECT user_id FROM comment_indices WHERE id = $1")
        .bind(comment_id)
        .fetch_optional(db)
        .await?;
    Ok(author)
}

pub async fn comment_root<'e, E: PgExecutor<'e>>(db: E, comment_id: i64) -> Result<Option<i64>> {
    let root = sqlx::query_scalar("SELECT root FROM comment_indices WHERE id = $1")
        .bind(comment_id)
        .fetch_optional(db)
        .await?;
    Ok(root)
}

/// Descendant comment ids via the `root` (for roots) or `parent` column.
pub async fn descendant_ids<'e, E: PgExecutor<'e>>(
    db: E,
    comment_id: i64,
    by_root: bool,
) -> Result<Vec<i64>> {
    let field = if by_root { "root" } else { "parent" };
    let sql = format!("SELECT id FROM comment_indices WHERE {field} = $1");
    let ids = sqlx::query_scalar(&sql).bind(comment_id).fetch_all(db).await?;
    Ok(ids)
}

pub async fn comment_ids_by_obj<'e, E: PgExecutor<'e>>(
    db: E,
    obj_id: i64,
    obj_type: ObjType,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT id FROM comment_indices WHERE obj_id = $1 AND obj_type = $2",
    )
    .bind(obj_id)
    .bind(obj_type.as_i16())
    .fetch_all(db)
    .await?;
    Ok(ids)
}

pub async fn delete_comment_indices<'e, E: PgExecutor<'e>>(db: E, comment_ids: &[i64]) -> Result<()> {
    sqlx::query("DELETE FROM comment_indices WHERE id = ANY($1)")
        .bind(comment_ids)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn delete_comment_contents<'e, E: PgExecutor<'e>>(db: E, comment_ids: &[i64]) -> Result<()> {
    sqlx::query("DELETE FROM comment_contents WHERE comment_id = ANY($1)")
        .bind(comment_ids)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn delete_like_mappings<'e, E: PgExecutor<'e>>(
    db: E,
    comment_ids: &[i64],
    like: bool,
) -> Result<()> {
    let table = mapping_table(like);
    let sql = format!("DELETE FROM {table} WHERE comment_id = ANY($1)");
    sqlx::query(&sql).bind(comment_ids).execute(db).await?;
    Ok(())
}

pub async fn delete_subject_by_obj<'e, E: PgExecutor<'e>>(
    db: E,
    obj_id: i64,
    obj_type: ObjType,
) -> Result<()> {
    sqlx::query("DELETE FROM comment_subjects WHERE obj_id = $1 AND obj_type = $2")
        .bind(obj_id)
        .bind(obj_type.as_i16())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn delete_indices_by_obj<'e, E: PgExecutor<'e>>(
    db: E,
    obj_id: i64,
    obj_type: ObjType,
) -> Result<()> {
    sqlx::query("DELETE FROM comment_indices WHERE obj_id = $1 AND obj_type = $2")
        .bind(obj_id)
        .bind(obj_type.as_i16())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn delete_like_mappings_by_obj<'e, E: PgExecutor<'e>>(
    db: E,
    obj_id: i64,
    obj_type: ObjType,
    like: bool,
) -> Result<()> {
    let table = mapping_table(like);
    let sql = format!("DELETE FROM {table} WHERE obj_id = $1 AND obj_type = $2");
    sqlx::query(&sql)
        .bind(obj_id)
        .bind(obj_type.as_i16())
        .execute(db)
        .await?;
    Ok(())
}

/// Record one user's like (hate) of one comment. Replays and toggle races
/// conflict benignly on the `(comment_id, user_id)` unique key.
pub async fn create_like_mapping<'e, E: PgExecutor<'e>>(
    db: E,
    comment_id: i64,
    user_id: i64,
    obj_id: i64,
    obj_type: ObjType,
    like: bool,
) -> Result<()> {
    let table = mapping_table(like);
    let sql = format!(
        "INSERT INTO {table} (comment_id, user_id, obj_id, obj_type)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (comment_id, user_id) DO NOTHING"
    );
    sqlx::query(&sql)
        .bind(comment_id)
        .bind(user_id)
        .bind(obj_id)
        .bind(obj_type.as_i16())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn like_mapping_exists<'e, E: PgExecutor<'e>>(
    db: E,
    comment_id: i64,
    user_id: i64,
    like: bool,
) -> Result<bool> {
    let table = mapping_table(like);
    let sql = format!("SELECT count(*) FROM {table} WHERE comment_id = $1 AND user_id = $2");
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(comment_id)
        .bind(user_id)
        .fetch_one(db)
        .await?;
    Ok(count > 0)
}

/// Comment ids one user has liked (hated) under one subject.
pub async fn user_like_list<'e, E: PgExecutor<'e>>(
    db: E,
    user_id: i64,
    obj_id: i64,
    obj_type: ObjType,
    like: bool,
) -> Result<Vec<i64>> {
    let table = mapping_table(like);
    let sql = format!(
        "SELECT comment_id FROM {table} WHERE user_id = $1 AND obj_id = $2 AND obj_type = $3"
    );
    let ids = sqlx::query_scalar(&sql)
        .bind(user_id)
        .bind(obj_id)
        .bind(obj_type.as_i16())
        .fetch_all(db)
        .await?;
    Ok(ids)
}

fn mapping_table(like: bool) -> &'static str {
    if like {
        "comment_user_like_mappings"
    } else {
        "comment_user_hate_mappings"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_field_columns_are_quoted_where_reserved() {
        assert_eq!(CountField::Like.column(), "\"like\"");
        assert_eq!(CountField::RootCount.column(), "root_count");
        assert_eq!(CountField::parse("hate").unwrap(), CountField::Hate);
        assert!(CountField::parse("floor; DROP TABLE users").is_err());
    }
}

use std::sync::Arc;

use sqlx::{PgConnection, Postgres, Transaction};

use driftboard_common::localcache::{metadata_key, replies_key, CachedEntry};
use driftboard_common::types::ObjType;
use driftboard_common::{Error, Result};

use super::consumer::QueueContext;
use super::Event;
use crate::db::comment::{self, CountField};

/// What a handler produced inside the batch transaction, carried over to the
/// post-commit phase.
pub struct Applied {
    pub unique_key: String,
    /// Floor assigned to a created comment.
    pub floor: i32,
    /// Ids collected in-transaction (cascade deletes).
    pub comment_ids: Vec<i64>,
}

impl Applied {
    fn new(unique_key: String) -> Self {
        Applied {
            unique_key,
            floor: 0,
            comment_ids: Vec::new(),
        }
    }
}

/// Run one message's mutation inside the batch transaction. Any error here is
/// transactional: the whole batch rolls back and is retried.
pub async fn apply(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &QueueContext,
    event: &Event,
) -> Result<Applied> {
    match event {
        Event::CommentCreate(m) => apply_comment_create(tx, ctx, m).await,
        Event::CommentRemove(m) => apply_comment_remove(tx, m).await,
        Event::CommentRemoveByObjId(m) => apply_comment_remove_by_obj(tx, m).await,
        Event::LikeOrHateIncr(m) => {
            let field = CountField::parse(&m.field)?;
            if !matches!(field, CountField::Like | CountField::Hate) {
                return Err(Error::InvalidParam(format!(
                    "field {} is not a buffered counter",
                    m.field
                )));
            }
            comment::incr_index_count_field(&mut **tx, field, m.comment_id, m.offset).await?;
            Ok(Applied::new(event.unique_key()))
        }
        Event::LikeOrHateMappingCreate(m) => {
            let obj_type = ObjType::from_i16(m.obj_type)?;
            comment::create_like_mapping(
                &mut **tx,
                m.comment_id,
                m.user_id,
                m.obj_id,
                obj_type,
                m.like,
            )
            .await?;
            Ok(Applied::new(event.unique_key()))
        }
        Event::LikeOrHateMappingRemove(m) => {
            let ids = [m.comment_id];
            comment::delete_like_mappings(&mut **tx, &ids, true).await?;
            comment::delete_like_mappings(&mut **tx, &ids, false).await?;
            Ok(Applied::new(event.unique_key()))
        }
        Event::EmailSendVerificationCode(m) => {
            // Not a record-store mutation, but send failures are retryable
            // with the batch just like one.
            ctx.redis
                .set_email_code(&m.email, &m.code, ctx.email_code_ttl)
                .await?;
            ctx.mailer.send_verification_code(&m.email, &m.code).await?;
            Ok(Applied::new(event.unique_key()))
        }
    }
}

async fn apply_comment_create(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &QueueContext,
    m: &super::CommentCreate,
) -> Result<Applied> {
    let obj_type = ObjType::from_i16(m.obj_type)?;
    let conn: &mut PgConnection = &mut *tx;

    comment::create_comment_content(&mut *conn, m.comment_id, &m.message).await?;

    // Races on the first comment of a subject resolve benignly.
    comment::create_comment_subject(&mut *conn, ctx.ids.next(), m.obj_id, obj_type).await?;

    // The counter update takes the row lock, serializing floor assignment for
    // this subject; the read-back in the same transaction sees our increment.
    let floor = if m.root == 0 {
        comment::incr_subject_count_field(&mut *conn, CountField::RootCount, m.obj_id, obj_type, 1)
            .await?;
        comment::incr_subject_count_field(&mut *conn, CountField::Count, m.obj_id, obj_type, 1)
            .await?;
        comment::subject_count_field(&mut *conn, CountField::Count, m.obj_id, obj_type).await?
    } else {
        comment::incr_index_count_field(&mut *conn, CountField::Count, m.root, 1).await?;
        comment::incr_index_count_field(&mut *conn, CountField::RootCount, m.root, 1).await?;
        comment::index_count_field(&mut *conn, CountField::Count, m.root).await?
    };

    comment::create_comment_index(
        &mut *conn,
        m.comment_id,
        m.obj_id,
        obj_type,
        m.root,
        m.parent,
        m.user_id,
        floor,
    )
    .await?;

    let mut applied = Applied::new(format!("create_{}", m.comment_id));
    applied.floor = floor;
    Ok(applied)
}

async fn apply_comment_remove(
    tx: &mut Transaction<'_, Postgres>,
    m: &super::CommentRemove,
) -> Result<Applied> {
    let obj_type = ObjType::from_i16(m.obj_type)?;
    let conn: &mut PgConnection = &mut *tx;
    let offset = m.comment_ids.len() as i32;

    // Adjust root counts before the rows disappear.
    if m.is_root {
        comment::incr_subject_count_field(
            &mut *conn,
            CountField::RootCount,
            m.obj_id,
            obj_type,
            -1,
        )
        .await?;
    } else {
        let root = comment::comment_root(&mut *conn, m.comment_id)
            .await?
            .ok_or(Error::NoSuchComment)?;
        comment::incr_index_count_field(&mut *conn, CountField::RootCount, root, -offset).await?;
    }

    comment::delete_comment_indices(&mut *conn, &m.comment_ids).await?;
    comment::delete_comment_contents(&mut *conn, &m.comment_ids).await?;
    comment::delete_like_mappings(&mut *conn, &m.comment_ids, true).await?;
    comment::delete_like_mappings(&mut *conn, &m.comment_ids, false).await?;

    Ok(Applied::new(format!("remove_{}", m.comment_id)))
}

async fn apply_comment_remove_by_obj(
    tx: &mut Transaction<'_, Postgres>,
    m: &super::CommentRemoveByObjId,
) -> Result<Applied> {
    let obj_type = ObjType::from_i16(m.obj_type)?;
    let conn: &mut PgConnection = &mut *tx;

    // Snapshot the ids first; the cache invalidation after commit needs them.
    let comment_ids = comment::comment_ids_by_obj(&mut *conn, m.obj_id, obj_type).await?;

    comment::delete_subject_by_obj(&mut *conn, m.obj_id, obj_type).await?;
    comment::delete_indices_by_obj(&mut *conn, m.obj_id, obj_type).await?;
    comment::delete_comment_contents(&mut *conn, &comment_ids).await?;
    comment::delete_like_mappings_by_obj(&mut *conn, m.obj_id, obj_type, true).await?;
    comment::delete_like_mappings_by_obj(&mut *conn, m.obj_id, obj_type, false).await?;

    let mut applied = Applied::new(format!("remove_obj_{}_{}", m.obj_type, m.obj_id));
    applied.comment_ids = comment_ids;
    Ok(applied)
}

/// Post-commit cache maintenance for one message. Derived state is updated or
/// invalidated best-effort: failures are logged and never fail the batch.
pub async fn finalize(ctx: &QueueContext, event: &Event, applied: &Applied) {
    match event {
        Event::CommentCreate(m) => finalize_comment_create(ctx, m, applied.floor).await,
        Event::CommentRemove(m) => finalize_comment_remove(ctx, m).await,
        Event::CommentRemoveByObjId(m) => {
            finalize_comment_remove_by_obj(ctx, m, &applied.comment_ids).await
        }
        _ => {}
    }
}

async fn finalize_comment_create(ctx: &QueueContext, m: &super::CommentCreate, floor: i32) {
    let Ok(obj_type) = ObjType::from_i16(m.obj_type) else {
        return;
    };

    if m.root == 0 {
        // Rebuild before the member write: appending to a missing index would
        // leave a partial id set behind and serve truncated threads.
        match ctx.rebuild.comment_index(obj_type, m.obj_id).await {
            Ok(_) => {
                if let Err(err) = ctx
                    .redis
                    .add_comment_index_members(obj_type, m.obj_id, &[(m.comment_id, floor)])
                    .await
                {
                    tracing::warn!(comment_id = m.comment_id, %err, "failed to add comment index member");
                }
            }
            Err(err) => {
                tracing::warn!(obj_id = m.obj_id, %err, "comment index rebuild failed after create");
            }
        }
    } else {
        // A cached reply list for the root learns about the new member; an
        // uncached one stays absent until a hot-spot refresh fills it.
        let key = replies_key(ObjType::Comment, m.root);
        if let Some(existing) = ctx.cache.get_replies(&key) {
            let mut ids = (*existing).clone();
            if !ids.contains(&m.comment_id) {
                ids.push(m.comment_id);
                ctx.cache.set(key, CachedEntry::Replies(Arc::new(ids)));
            }
        }
    }

    if let Err(err) = ctx
        .redis
        .add_comment_contents(&[(m.comment_id, m.message.clone())])
        .await
    {
        tracing::warn!(comment_id = m.comment_id, %err, "failed to cache comment content");
    }
}

async fn finalize_comment_remove(ctx: &QueueContext, m: &super::CommentRemove) {
    let Ok(obj_type) = ObjType::from_i16(m.obj_type) else {
        return;
    };

    if m.is_root {
        if let Err(err) = ctx
            .redis
            .rem_comment_index_member(obj_type, m.obj_id, m.comment_id)
            .await
        {
            tracing::warn!(comment_id = m.comment_id, %err, "failed to drop comment index member");
        }
    }
    invalidate_comment_caches(ctx, &m.comment_ids, m.obj_id, obj_type).await;
}

async fn finalize_comment_remove_by_obj(
    ctx: &QueueContext,
    m: &super::CommentRemoveByObjId,
    comment_ids: &[i64],
) {
    let Ok(obj_type) = ObjType::from_i16(m.obj_type) else {
        return;
    };

    if let Err(err) = ctx.redis.del_comment_index(obj_type, m.obj_id).await {
        tracing::warn!(obj_id = m.obj_id, %err, "failed to drop comment index");
    }
    invalidate_comment_caches(ctx, comment_ids, m.obj_id, obj_type).await;
}

async fn invalidate_comment_caches(
    ctx: &QueueContext,
    comment_ids: &[i64],
    obj_id: i64,
    obj_type: ObjType,
) {
    let redis = &ctx.redis;
    let steps: [(&str, driftboard_common::Result<()>); 6] = [
        ("contents", redis.del_comment_contents(comment_ids).await),
        ("like counts", redis.del_comment_counts(comment_ids, true).await),
        ("hate counts", redis.del_comment_counts(comment_ids, false).await),
        ("like sets", redis.del_like_sets(comment_ids, obj_id, obj_type, true).await),
        ("hate sets", redis.del_like_sets(comment_ids, obj_id, obj_type, false).await),
        (
            "pending deletes",
            async {
                for comment_id in comment_ids {
                    redis.rem_rem_cid(*comment_id).await?;
                }
                Ok(())
            }
            .await,
        ),
    ];
    for (what, result) in steps {
        if let Err(err) = result {
            tracing::warn!(%err, "failed to invalidate comment {what}");
        }
    }

    for comment_id in comment_ids {
        ctx.cache.remove(&metadata_key(ObjType::Comment, *comment_id));
        ctx.cache.remove(&replies_key(ObjType::Comment, *comment_id));
        ctx.cache.remove_object_view(ObjType::Comment, *comment_id);
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use driftboard_common::types::ObjType;
use driftboard_common::{Error, Result};

pub mod consumer;
pub mod handlers;
pub mod producer;

pub use consumer::{spawn_consumers, QueueContext};
pub use producer::Producer;

pub const TOPIC_COMMENT: &str = "topic-comment";
pub const TOPIC_LIKE: &str = "topic-like";
pub const TOPIC_EMAIL: &str = "topic-email";

pub const GROUP_COMMENT: &str = "group-comment";
pub const GROUP_LIKE: &str = "group-like";
pub const GROUP_EMAIL: &str = "group-email";

pub const TYPE_COMMENT_CREATE: i8 = 1;
pub const TYPE_COMMENT_REMOVE: i8 = 2;
pub const TYPE_COMMENT_REMOVE_BY_OBJ_ID: i8 = 3;
pub const TYPE_LIKE_OR_HATE_INCR: i8 = 4;
pub const TYPE_LIKE_OR_HATE_MAPPING_CREATE: i8 = 5;
pub const TYPE_LIKE_OR_HATE_MAPPING_REMOVE: i8 = 6;
pub const TYPE_EMAIL_SEND_VERIFICATION_CODE: i8 = 7;

/// Wire envelope: a numeric tag plus the type-specific body.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: i8,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentCreate {
    pub obj_id: i64,
    pub obj_type: i16,
    pub root: i64,
    pub parent: i64,
    pub user_id: i64,
    pub comment_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRemove {
    pub obj_id: i64,
    pub obj_type: i16,
    pub comment_id: i64,
    /// The target plus every descendant, collected by the producer.
    pub comment_ids: Vec<i64>,
    pub user_id: i64,
    pub is_root: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRemoveByObjId {
    pub obj_id: i64,
    pub obj_type: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeOrHateIncr {
    /// "like" or "hate"; validated against the closed column set on consume.
    pub field: String,
    pub comment_id: i64,
    pub offset: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeOrHateMappingCreate {
    pub obj_id: i64,
    pub obj_type: i16,
    pub comment_id: i64,
    pub user_id: i64,
    pub like: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeOrHateMappingRemove {
    pub comment_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSendVerificationCode {
    pub email: String,
    pub code: String,
}

/// A decoded event. Producers hash by `partition_key` so all mutations of one
/// logical entity land on one partition and stay ordered.
#[derive(Debug, Clone)]
pub enum Event {
    CommentCreate(CommentCreate),
    CommentRemove(CommentRemove),
    CommentRemoveByObjId(CommentRemoveByObjId),
    LikeOrHateIncr(LikeOrHateIncr),
    LikeOrHateMappingCreate(LikeOrHateMappingCreate),
    LikeOrHateMappingRemove(LikeOrHateMappingRemove),
    EmailSendVerificationCode(EmailSendVerificationCode),
}

impl Event {
    #[allow(clippy::too_many_arguments)]
    pub fn comment_create(
        obj_id: i64,
        obj_type: ObjType,
        root: i64,
        parent: i64,
        user_id: i64,
        comment_id: i64,
        message: String,
    ) -> Event {
        Event::CommentCreate(CommentCreate {
            obj_id,
            obj_type: obj_type.as_i16(),
            root,
            parent,
            user_id,
            comment_id,
            message,
        })
    }

    pub fn comment_remove(
        obj_id: i64,
        obj_type: ObjType,
        comment_id: i64,
        comment_ids: Vec<i64>,
        user_id: i64,
        is_root: bool,
    ) -> Event {
        Event::CommentRemove(CommentRemove {
            obj_id,
            obj_type: obj_type.as_i16(),
            comment_id,
            comment_ids,
            user_id,
            is_root,
        })
    }

    pub fn comment_remove_by_obj(obj_id: i64, obj_type: ObjType) -> Event {
        Event::CommentRemoveByObjId(CommentRemoveByObjId {
            obj_id,
            obj_type: obj_type.as_i16(),
        })
    }

    pub fn like_or_hate_incr(like: bool, comment_id: i64, offset: i32) -> Event {
        Event::LikeOrHateIncr(LikeOrHateIncr {
            field: if like { "like" } else { "hate" }.to_string(),
            comment_id,
            offset,
        })
    }

    pub fn mapping_create(
        comment_id: i64,
        user_id: i64,
        obj_id: i64,
        obj_type: ObjType,
        like: bool,
    ) -> Event {
        Event::LikeOrHateMappingCreate(LikeOrHateMappingCreate {
            obj_id,
            obj_type: obj_type.as_i16(),
            comment_id,
            user_id,
            like,
        })
    }

    pub fn mapping_remove(comment_id: i64) -> Event {
        Event::LikeOrHateMappingRemove(LikeOrHateMappingRemove { comment_id })
    }

    pub fn email_verification_code(email: String, code: String) -> Event {
        Event::EmailSendVerificationCode(EmailSendVerificationCode { email, code })
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Event::CommentCreate(_) | Event::CommentRemove(_) | Event::CommentRemoveByObjId(_) => {
                TOPIC_COMMENT
            }
            Event::LikeOrHateIncr(_)
            | Event::LikeOrHateMappingCreate(_)
            | Event::LikeOrHateMappingRemove(_) => TOPIC_LIKE,
            Event::EmailSendVerificationCode(_) => TOPIC_EMAIL,
        }
    }

    pub fn message_type(&self) -> i8 {
        match self {
            Event::CommentCreate(_) => TYPE_COMMENT_CREATE,
            Event::CommentRemove(_) => TYPE_COMMENT_REMOVE,
            Event::CommentRemoveByObjId(_) => TYPE_COMMENT_REMOVE_BY_OBJ_ID,
            Event::LikeOrHateIncr(_) => TYPE_LIKE_OR_HATE_INCR,
            Event::LikeOrHateMappingCreate(_) => TYPE_LIKE_OR_HATE_MAPPING_CREATE,
            Event::LikeOrHateMappingRemove(_) => TYPE_LIKE_OR_HATE_MAPPING_REMOVE,
            Event::EmailSendVerificationCode(_) => TYPE_EMAIL_SEND_VERIFICATION_CODE,
        }
    }

    pub fn partition_key(&self) -> String {
        match self {
            Event::CommentCreate(m) => m.comment_id.to_string(),
            Event::CommentRemove(m) => m.comment_id.to_string(),
            Event::CommentRemoveByObjId(m) => m.obj_id.to_string(),
            Event::LikeOrHateIncr(m) => m.comment_id.to_string(),
            Event::LikeOrHateMappingCreate(m) => m.comment_id.to_string(),
            Event::LikeOrHateMappingRemove(m) => m.comment_id.to_string(),
            Event::EmailSendVerificationCode(m) => m.email.clone(),
        }
    }

    /// The deterministic outcome key published to the status board.
    pub fn unique_key(&self) -> String {
        match self {
            Event::CommentCreate(m) => format!("create_{}", m.comment_id),
            Event::CommentRemove(m) => format!("remove_{}", m.comment_id),
            Event::CommentRemoveByObjId(m) => format!("remove_obj_{}_{}", m.obj_type, m.obj_id),
            Event::LikeOrHateIncr(m) => format!("incr_{}_{}", m.field, m.comment_id),
            Event::LikeOrHateMappingCreate(m) => {
                format!("create_mapping_{}_{}", m.like, m.comment_id)
            }
            Event::LikeOrHateMappingRemove(m) => format!("remove_mapping_{}", m.comment_id),
            Event::EmailSendVerificationCode(m) => format!("email_{}", m.email),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let data = match self {
            Event::CommentCreate(m) => serde_json::to_value(m)?,
            Event::CommentRemove(m) => serde_json::to_value(m)?,
            Event::CommentRemoveByObjId(m) => serde_json::to_value(m)?,
            Event::LikeOrHateIncr(m) => serde_json::to_value(m)?,
            Event::LikeOrHateMappingCreate(m) => serde_json::to_value(m)?,
            Event::LikeOrHateMappingRemove(m) => serde_json::to_value(m)?,
            Event::EmailSendVerificationCode(m) => serde_json::to_value(m)?,
        };
        let envelope = Envelope {
            message_type: self.message_type(),
            data,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Decode a raw payload. Failures here are convert errors: the message is
    /// malformed and retrying the batch cannot fix it.
    pub fn decode(payload: &[u8]) -> Result<Event> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        let event = match envelope.message_type {
            TYPE_COMMENT_CREATE => Event::CommentCreate(serde_json::from_value(envelope.data)?),
            TYPE_COMMENT_REMOVE => Event::CommentRemove(serde_json::from_value(envelope.data)?),
            TYPE_COMMENT_REMOVE_BY_OBJ_ID => {
                Event::CommentRemoveByObjId(serde_json::from_value(envelope.data)?)
            }
            TYPE_LIKE_OR_HATE_INCR => Event::LikeOrHateIncr(serde_json::from_value(envelope.data)?),
            TYPE_LIKE_OR_HATE_MAPPING_CREATE => {
                Event::LikeOrHateMappingCreate(serde_json::from_value(envelope.data)?)
            }
            TYPE_LIKE_OR_HATE_MAPPING_REMOVE => {
                Event::LikeOrHateMappingRemove(serde_json::from_value(envelope.data)?)
            }
            TYPE_EMAIL_SEND_VERIFICATION_CODE => {
                Event::EmailSendVerificationCode(serde_json::from_value(envelope.data)?)
            }
            other => {
                return Err(Error::Internal(format!("unknown message type {other}")));
            }
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_round_trip_through_the_envelope() {
        let event = Event::CommentCreate(CommentCreate {
            obj_id: 42,
            obj_type: 1,
            root: 0,
            parent: 0,
            user_id: 5,
            comment_id: 1001,
            message: "first".into(),
        });
        let bytes = event.encode().unwrap();
        match Event::decode(&bytes).unwrap() {
            Event::CommentCreate(m) => {
                assert_eq!(m.comment_id, 1001);
                assert_eq!(m.message, "first");
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_types_are_convert_errors() {
        let raw = serde_json::to_vec(&Envelope {
            message_type: 99,
            data: Value::Null,
        })
        .unwrap();
        assert!(Event::decode(&raw).is_err());
    }

    #[test]
    fn unique_keys_are_deterministic() {
        let incr = Event::LikeOrHateIncr(LikeOrHateIncr {
            field: "like".into(),
            comment_id: 7,
            offset: 3,
        });
        assert_eq!(incr.unique_key(), "incr_like_7");

        let remove = Event::CommentRemove(CommentRemove {
            obj_id: 42,
            obj_type: 1,
            comment_id: 1001,
            comment_ids: vec![1001],
            user_id: 5,
            is_root: true,
        });
        assert_eq!(remove.unique_key(), "remove_1001");
    }

    #[test]
    fn mutations_of_one_comment_share_a_partition_key() {
        let create = Event::CommentCreate(CommentCreate {
            obj_id: 42,
            obj_type: 1,
            root: 0,
            parent: 0,
            user_id: 5,
            comment_id: 1001,
            message: String::new(),
        });
        let remove = Event::CommentRemove(CommentRemove {
            obj_id: 42,
            obj_type: 1,
            comment_id: 1001,
            comment_ids: vec![1001],
            user_id: 5,
            is_root: true,
        });
        assert_eq!(create.partition_key(), remove.partition_key());
    }
}

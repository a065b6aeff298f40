//! Message classifier.
//!
//! Turns a [`RawEvent`] into a categorized [`Message`]. Classification is
//! pure: it reads the contact index and the session user and never fails.
//! When the sender or receiver cannot be resolved the message is returned
//! with category [`MessageCategory::Unknown`] and a [`ResolutionError`]
//! attached.

use serde::Deserialize;

use super::text;
use crate::types::{
    is_group_id, msg_types, Contact, ContactIndex, Message, MessageCategory, MessageFields,
    RawEvent, ResolutionError, USER_PREFIX,
};

/// Separator between the in-group sender id and the real content.
pub const GROUP_SENDER_SEPARATOR: &str = ":<br/>";

/// Mention terminators: a plain space or U+2005 (four-per-em space).
const MENTION_SEPARATORS: [char; 2] = [' ', '\u{2005}'];

/// Decode the fixed wire fields of a raw event.
pub fn decode_fields(raw: &RawEvent) -> Result<MessageFields, ResolutionError> {
    MessageFields::deserialize(&raw.0).map_err(|e| ResolutionError::Malformed(e.to_string()))
}

/// Classify one raw event against the current contact index.
pub fn classify(raw: &RawEvent, contacts: &ContactIndex, self_user: &Contact) -> Message {
    let fields = match decode_fields(raw) {
        Ok(fields) => fields,
        Err(err) => {
            let mut msg = Message::new(MessageFields::default(), self_user.user_name.as_str());
            msg.resolution_error = Some(err);
            return msg;
        }
    };
    classify_fields(fields, contacts, self_user)
}

/// Classify already decoded fields.
pub fn classify_fields(fields: MessageFields, contacts: &ContactIndex, self_user: &Contact) -> Message {
    let mut msg = Message::new(fields, self_user.user_name.as_str());
    let lookup = |user_name: &str| -> Option<Contact> {
        if !self_user.user_name.is_empty() && user_name == self_user.user_name {
            Some(self_user.clone())
        } else {
            contacts.get(user_name).cloned()
        }
    };

    let sender = lookup(msg.from_user_name());
    let receiver = lookup(msg.to_user_name());
    msg.from_uin = sender.as_ref().map(|c| c.uin).filter(|uin| *uin != 0);
    msg.to_uin = receiver.as_ref().map(|c| c.uin).filter(|uin| *uin != 0);

    msg.category = if group_id(&msg).is_some() {
        MessageCategory::Group
    } else if msg.fields.msg_type == msg_types::SYSTEM {
        if sender.is_none() {
            msg.resolution_error = Some(ResolutionError::SenderIsSystem);
        }
        MessageCategory::System
    } else {
        match (&sender, &receiver) {
            (None, _) => {
                msg.resolution_error =
                    Some(ResolutionError::SenderNotFound(msg.fields.from_user_name.clone()));
                MessageCategory::Unknown
            }
            (_, None) => {
                msg.resolution_error =
                    Some(ResolutionError::ReceiverNotFound(msg.fields.to_user_name.clone()));
                MessageCategory::Unknown
            }
            (Some(s), Some(r)) if s.is_official_account() || r.is_official_account() => {
                MessageCategory::OfficialAccount
            }
            _ => MessageCategory::Friend,
        }
    };

    let mut content = msg.fields.content.clone();
    if msg.category == MessageCategory::Group {
        content = parse_group_content(&mut msg, content, contacts, self_user);
    }
    msg.content = text::normalize(&content);
    msg
}

/// Identifier of the group a message belongs to, if any.
pub fn group_id(msg: &Message) -> Option<&str> {
    [msg.from_user_name(), msg.to_user_name()]
        .into_iter()
        .find(|id| is_group_id(id))
}

/// Ids that would have to be fetched for `fields` to classify fully.
///
/// Unknown senders and receivers, plus groups known only without members.
/// Server pseudo-accounts such as `fmessage` are never fetched.
pub fn unresolved_ids(fields: &MessageFields, contacts: &ContactIndex, self_user: &Contact) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for id in [&fields.from_user_name, &fields.to_user_name] {
        if !id.starts_with(USER_PREFIX) || *id == self_user.user_name || missing.contains(id) {
            continue;
        }
        let needs_fetch = match contacts.get(id) {
            None => true,
            Some(contact) => contact.is_group() && contact.member_list.is_empty(),
        };
        if needs_fetch {
            missing.push(id.clone());
        }
    }
    missing
}

// Splits off the in-group sender and detects an at-mention of the session
// user. Self-sent messages carry no sender prefix.
fn parse_group_content(
    msg: &mut Message,
    content: String,
    contacts: &ContactIndex,
    self_user: &Contact,
) -> String {
    if msg.is_system() || msg.is_sent_by_self() {
        return content;
    }
    let group = group_id(msg).map(str::to_string).unwrap_or_default();

    let content = match content.split_once(GROUP_SENDER_SEPARATOR) {
        Some((sender, rest)) => {
            let sender = sender.to_string();
            let known = contacts
                .get(&group)
                .is_some_and(|g| g.member(&sender).is_some());
            if !known {
                msg.resolution_error = Some(ResolutionError::SenderNotInGroup {
                    group: group.clone(),
                    member: sender.clone(),
                });
            }
            msg.sender_in_group = Some(sender);
            rest.to_string()
        }
        None => {
            msg.resolution_error = Some(ResolutionError::SenderIsSystem);
            content
        }
    };

    let name = contacts
        .get(&group)
        .and_then(|g| g.member(&self_user.user_name))
        .map(|m| m.group_name())
        .filter(|name| !name.is_empty())
        .unwrap_or(self_user.nick_name.as_str());
    msg.is_at = mentions(&content, name);
    content
}

/// Whether `content` mentions `name` as `@name` followed by a separator or
/// at the very end.
pub fn mentions(content: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let flag = format!("@{name}");
    if content.ends_with(&flag) {
        return true;
    }
    MENTION_SEPARATORS
        .iter()
        .any(|sep| content.contains(&format!("{flag}{sep}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupMember;
    use serde_json::json;

    fn me() -> Contact {
        Contact {
            uin: 1,
            ..Contact::new("@me", "Alice")
        }
    }

    fn contacts() -> ContactIndex {
        let group = Contact {
            member_list: vec![
                GroupMember {
                    user_name: "@me".into(),
                    nick_name: "Alice".into(),
                    ..Default::default()
                },
                GroupMember {
                    user_name: "user123".into(),
                    nick_name: "Bob".into(),
                    ..Default::default()
                },
            ],
            ..Contact::new("@@team", "Team")
        };
        let news = Contact {
            verify_flag: 8,
            ..Contact::new("@news", "Daily")
        };
        vec![group, news, Contact::new("@bob", "Bob")].into_iter().collect()
    }

    fn event(from: &str, to: &str, msg_type: i32, content: &str) -> RawEvent {
        RawEvent::new(json!({
            "MsgId": "100", "MsgType": msg_type, "FromUserName": from,
            "ToUserName": to, "Content": content, "CreateTime": 1700000000
        }))
    }

    #[test]
    fn test_group_content_split() {
        let raw = event("@@team", "@me", msg_types::TEXT, "user123:<br/>hello world");
        let msg = classify(&raw, &contacts(), &me());
        assert_eq!(msg.category, MessageCategory::Group);
        assert_eq!(msg.sender_in_group.as_deref(), Some("user123"));
        assert_eq!(msg.content, "hello world");
        assert_eq!(msg.raw_content(), "user123:<br/>hello world");
        assert!(msg.resolution_error().is_none());
    }

    #[test]
    fn test_group_self_sent_is_not_split() {
        let raw = event("@me", "@@team", msg_types::TEXT, "x:<br/>y");
        let msg = classify(&raw, &contacts(), &me());
        assert_eq!(msg.category, MessageCategory::Group);
        assert!(msg.sender_in_group.is_none());
        assert_eq!(msg.content, "x:\ny");
        assert!(!msg.is_at());
    }

    #[test]
    fn test_group_mentions() {
        let index = contacts();
        let classify_text = |text: &str| {
            classify(&event("@@team", "@me", msg_types::TEXT, &format!("user123:<br/>{text}")), &index, &me())
        };
        assert!(classify_text("@Alice ").is_at());
        assert!(!classify_text("hello Alice").is_at());
        assert!(classify_text("see you @Alice\u{2005}").is_at());
        assert!(classify_text("ping @Alice").is_at());
        assert!(!classify_text("@Alicea hi").is_at());
    }

    #[test]
    fn test_mention_prefers_group_display_name() {
        let mut index = contacts();
        let mut group = index.get("@@team").unwrap().clone();
        group.member_list[0].display_name = "Ali".into();
        index.upsert(group);

        let raw = event("@@team", "@me", msg_types::TEXT, "user123:<br/>@Ali hi");
        assert!(classify(&raw, &index, &me()).is_at());
        let raw = event("@@team", "@me", msg_types::TEXT, "user123:<br/>@Alice hi");
        assert!(!classify(&raw, &index, &me()).is_at());
    }

    #[test]
    fn test_unknown_group_member() {
        let raw = event("@@team", "@me", msg_types::TEXT, "@stranger:<br/>hi");
        let msg = classify(&raw, &contacts(), &me());
        assert_eq!(msg.category, MessageCategory::Group);
        assert_eq!(
            msg.resolution_error(),
            Some(&ResolutionError::SenderNotInGroup {
                group: "@@team".into(),
                member: "@stranger".into()
            })
        );
    }

    #[test]
    fn test_category_priority() {
        let index = contacts();
        let cases = [
            (event("@bob", "@me", msg_types::TEXT, "hi"), MessageCategory::Friend),
            (event("@news", "@me", msg_types::APP, ""), MessageCategory::OfficialAccount),
            (event("@bob", "@me", msg_types::SYSTEM, "x"), MessageCategory::System),
            (event("@@team", "@me", msg_types::SYSTEM, "x"), MessageCategory::Group),
        ];
        for (raw, expected) in cases {
            assert_eq!(classify(&raw, &index, &me()).category, expected);
        }
    }

    #[test]
    fn test_unresolved_sender_is_unknown() {
        let raw = event("@ghost", "@me", msg_types::TEXT, "boo");
        let msg = classify(&raw, &contacts(), &me());
        assert_eq!(msg.category, MessageCategory::Unknown);
        assert_eq!(
            msg.resolution_error(),
            Some(&ResolutionError::SenderNotFound("@ghost".into()))
        );
        assert_eq!(msg.content, "boo");
    }

    #[test]
    fn test_system_message_without_sender() {
        let msg = classify(&event("@ghost", "@me", msg_types::SYSTEM, "x"), &contacts(), &me());
        assert_eq!(msg.category, MessageCategory::System);
        assert_eq!(msg.resolution_error(), Some(&ResolutionError::SenderIsSystem));

        let known = classify(&event("@bob", "@me", msg_types::SYSTEM, "x"), &contacts(), &me());
        assert_eq!(known.category, MessageCategory::System);
        assert!(known.resolution_error().is_none());
    }

    #[test]
    fn test_malformed_event() {
        let msg = classify(&RawEvent::new(json!("nope")), &contacts(), &me());
        assert_eq!(msg.category, MessageCategory::Unknown);
        assert!(matches!(msg.resolution_error(), Some(ResolutionError::Malformed(_))));
    }

    #[test]
    fn test_classification_is_repeatable() {
        let index = contacts();
        let raw = event("@@team", "@me", msg_types::TEXT, "user123:<br/>@Alice hi");
        let first = classify(&raw, &index, &me());
        let second = classify(&raw, &index, &me());
        assert_eq!(first.category, second.category);
        assert_eq!(first.is_at(), second.is_at());
    }

    #[test]
    fn test_normalizes_content() {
        let raw = event("@bob", "@me", msg_types::TEXT, "a&amp;b<br/><span class=\"emoji emoji1f604\"></span>");
        let msg = classify(&raw, &contacts(), &me());
        assert_eq!(msg.content, "a&b\n\u{1f604}");
        assert_eq!(msg.from_uin, None);
        assert_eq!(msg.to_uin, Some(1));
    }

    #[test]
    fn test_unresolved_ids() {
        let mut index = contacts();
        index.upsert(Contact::new("@@empty", "No members yet"));
        let fields = MessageFields {
            from_user_name: "@@empty".into(),
            to_user_name: "@me".into(),
            ..Default::default()
        };
        assert_eq!(unresolved_ids(&fields, &index, &me()), vec!["@@empty".to_string()]);

        let fields = MessageFields {
            from_user_name: "@ghost".into(),
            to_user_name: "@bob".into(),
            ..Default::default()
        };
        assert_eq!(unresolved_ids(&fields, &index, &me()), vec!["@ghost".to_string()]);

        let fields = MessageFields {
            from_user_name: "fmessage".into(),
            to_user_name: "@me".into(),
            ..Default::default()
        };
        assert!(unresolved_ids(&fields, &index, &me()).is_empty());
    }
}

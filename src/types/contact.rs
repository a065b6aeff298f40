//! Contacts and the per-session contact index.
//!
//! Contact records keep the server's field names (`UserName`, `NickName`,
//! ...) so they can be decoded straight from init and sync payloads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Prefix the server puts on every group identifier.
pub const GROUP_PREFIX: &str = "@@";

/// Prefix of ordinary (per-session) user identifiers.
pub const USER_PREFIX: &str = "@";

/// Bit set in `VerifyFlag` for official (subscription/service) accounts.
pub const VERIFY_FLAG_OFFICIAL: i32 = 8;

/// Whether an identifier names a group.
pub fn is_group_id(user_name: &str) -> bool {
    user_name.starts_with(GROUP_PREFIX)
}

/// A member entry inside a group's member list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GroupMember {
    pub uin: i64,
    pub user_name: String,
    pub nick_name: String,
    /// Per-group nickname override, empty when unset.
    pub display_name: String,
    pub attr_status: i64,
}

impl GroupMember {
    /// Name shown inside the group: the override if set, else the nickname.
    pub fn group_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.nick_name
        } else {
            &self.display_name
        }
    }
}

/// Last-known record for a user, group or official account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Contact {
    pub uin: i64,
    pub user_name: String,
    pub nick_name: String,
    pub remark_name: String,
    pub display_name: String,
    pub head_img_url: String,
    pub signature: String,
    pub province: String,
    pub city: String,
    pub sex: i32,
    pub verify_flag: i32,
    pub contact_flag: i32,
    pub member_count: usize,
    pub member_list: Vec<GroupMember>,
}

impl Contact {
    pub fn new(user_name: impl Into<String>, nick_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            nick_name: nick_name.into(),
            ..Default::default()
        }
    }

    pub fn is_group(&self) -> bool {
        is_group_id(&self.user_name)
    }

    pub fn is_official_account(&self) -> bool {
        self.verify_flag & VERIFY_FLAG_OFFICIAL != 0
    }

    pub fn is_friend(&self) -> bool {
        !self.is_group() && self.user_name.starts_with(USER_PREFIX) && self.verify_flag == 0
    }

    /// Best human-readable name: remark, then nickname, then the raw id.
    pub fn name(&self) -> &str {
        if !self.remark_name.is_empty() {
            &self.remark_name
        } else if !self.nick_name.is_empty() {
            &self.nick_name
        } else {
            &self.user_name
        }
    }

    /// Look up a member of this group by identifier.
    pub fn member(&self, user_name: &str) -> Option<&GroupMember> {
        self.member_list.iter().find(|m| m.user_name == user_name)
    }
}

/// One add/modify/delete instruction delivered alongside a sync batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactDelta {
    Upsert(Contact),
    Remove(String),
}

/// Mapping from identifier to last-known contact record.
///
/// Only ever mutated incrementally; the index is never rebuilt mid-session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactIndex {
    contacts: HashMap<String, Contact>,
}

impl ContactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn get(&self, user_name: &str) -> Option<&Contact> {
        self.contacts.get(user_name)
    }

    pub fn contains(&self, user_name: &str) -> bool {
        self.contacts.contains_key(user_name)
    }

    /// Insert or replace a record. Records without an identifier are dropped.
    pub fn upsert(&mut self, contact: Contact) {
        if contact.user_name.is_empty() {
            return;
        }
        self.contacts.insert(contact.user_name.clone(), contact);
    }

    pub fn remove(&mut self, user_name: &str) -> Option<Contact> {
        self.contacts.remove(user_name)
    }

    pub fn apply(&mut self, delta: ContactDelta) {
        match delta {
            ContactDelta::Upsert(contact) => self.upsert(contact),
            ContactDelta::Remove(user_name) => {
                self.remove(&user_name);
            }
        }
    }

    pub fn apply_all(&mut self, deltas: impl IntoIterator<Item = ContactDelta>) {
        for delta in deltas {
            self.apply(delta);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    pub fn friends(&self) -> Vec<&Contact> {
        self.iter().filter(|c| c.is_friend()).collect()
    }

    pub fn groups(&self) -> Vec<&Contact> {
        self.iter().filter(|c| c.is_group()).collect()
    }

    pub fn official_accounts(&self) -> Vec<&Contact> {
        self.iter().filter(|c| c.is_official_account()).collect()
    }
}

impl FromIterator<Contact> for ContactIndex {
    fn from_iter<T: IntoIterator<Item = Contact>>(iter: T) -> Self {
        let mut index = ContactIndex::new();
        for contact in iter {
            index.upsert(contact);
        }
        index
    }
}

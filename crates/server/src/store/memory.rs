use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use super::{
    GroupChatRecord, MessageRecord, NewGroupChat, Page, StoreError, StoreResult, UserRecord,
};
use huddle_common::types::GroupChatType;

#[derive(Default)]
pub struct MemoryChatStore {
    users: HashMap<Uuid, UserRecord>,
    group_chats: HashMap<Uuid, GroupChatRecord>,
    // Monotonic activity stamp per conversation; timestamps alone can tie.
    activity: HashMap<Uuid, u64>,
    next_activity: u64,
    // Insertion order doubles as chronological order.
    messages: Vec<MessageRecord>,
}

impl MemoryChatStore {
    pub(super) fn create_user(
        &mut self,
        username: &str,
        password_hash: &str,
    ) -> StoreResult<UserRecord> {
        if self.users.values().any(|user| user.username == username) {
            return Err(StoreError::UsernameTaken);
        }

        let user = UserRecord {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            password_hash: password_hash.to_owned(),
            created_at: Utc::now(),
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub(super) fn find_user_by_username(&self, username: &str) -> Option<UserRecord> {
        self.users.values().find(|user| user.username == username).cloned()
    }

    pub(super) fn find_user_by_id(&self, user_id: Uuid) -> Option<UserRecord> {
        self.users.get(&user_id).cloned()
    }

    pub(super) fn find_users_by_ids(&self, user_ids: &[Uuid]) -> Vec<UserRecord> {
        user_ids.iter().filter_map(|id| self.users.get(id)).cloned().collect()
    }

    pub(super) fn search_users(
        &self,
        exclude: Uuid,
        keyword: Option<&str>,
        page: Page,
    ) -> Vec<UserRecord> {
        let needle = keyword.map(str::to_lowercase);
        let mut matches = self
            .users
            .values()
            .filter(|user| user.id != exclude)
            .filter(|user| match &needle {
                Some(needle) => user.username.to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .cloned()
            .collect::<Vec<_>>();
        matches.sort_by(|left, right| {
            left.username
                .to_lowercase()
                .cmp(&right.username.to_lowercase())
                .then(left.id.cmp(&right.id))
        });

        matches.into_iter().skip(page.offset()).take(page.limit()).collect()
    }

    pub(super) fn create_group_chat(&mut self, new_chat: NewGroupChat) -> GroupChatRecord {
        let now = Utc::now();
        let chat = GroupChatRecord {
            id: Uuid::new_v4(),
            name: new_chat.name,
            chat_type: new_chat.chat_type,
            members: new_chat.members,
            created_by: new_chat.created_by,
            created_at: now,
            updated_at: now,
        };
        self.touch(chat.id);
        self.group_chats.insert(chat.id, chat.clone());
        chat
    }

    pub(super) fn get_group_chat(&self, group_chat_id: Uuid) -> Option<GroupChatRecord> {
        self.group_chats.get(&group_chat_id).cloned()
    }

    pub(super) fn find_personal_chat(&self, first: Uuid, second: Uuid) -> Option<GroupChatRecord> {
        self.group_chats
            .values()
            .find(|chat| {
                chat.chat_type == GroupChatType::Personal
                    && chat.is_member(first)
                    && chat.is_member(second)
            })
            .cloned()
    }

    pub(super) fn list_group_chats_for_member(
        &self,
        user_id: Uuid,
        page: Page,
    ) -> Vec<GroupChatRecord> {
        let mut chats = self
            .group_chats
            .values()
            .filter(|chat| chat.is_member(user_id))
            .cloned()
            .collect::<Vec<_>>();
        chats.sort_by_key(|chat| std::cmp::Reverse(self.activity.get(&chat.id).copied()));

        chats.into_iter().skip(page.offset()).take(page.limit()).collect()
    }

    pub(super) fn create_message(
        &mut self,
        author_id: Uuid,
        group_chat_id: Uuid,
        content: &str,
    ) -> MessageRecord {
        let message = MessageRecord {
            id: Uuid::new_v4(),
            group_chat_id,
            author_id,
            content: content.to_owned(),
            is_read: false,
            created_at: Utc::now(),
        };
        self.messages.push(message.clone());

        if let Some(chat) = self.group_chats.get_mut(&group_chat_id) {
            chat.updated_at = message.created_at;
        }
        self.touch(group_chat_id);

        message
    }

    pub(super) fn list_messages(&self, group_chat_id: Uuid, page: Page) -> Vec<MessageRecord> {
        self.messages
            .iter()
            .rev()
            .filter(|message| message.group_chat_id == group_chat_id)
            .skip(page.offset())
            .take(page.limit())
            .cloned()
            .collect()
    }

    fn touch(&mut self, group_chat_id: Uuid) {
        self.next_activity += 1;
        self.activity.insert(group_chat_id, self.next_activity);
    }
}

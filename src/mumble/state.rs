use std::collections::HashMap;

/// Fields present in a `UserState` update. Doubles as the change set
/// reported on user update events: the protocol reports presence, not
/// diffs, so re-asserted values show up again.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserChanges {
    pub username: Option<String>,
    pub unique_id: Option<u32>,
    pub mute: Option<bool>,
    pub deaf: Option<bool>,
    pub suppress: Option<bool>,
    pub self_mute: Option<bool>,
    pub self_deaf: Option<bool>,
    pub texture: Option<Vec<u8>>,
    pub texture_hash: Option<Vec<u8>>,
    pub comment: Option<String>,
    pub comment_hash: Option<Vec<u8>>,
    pub cert_hash: Option<String>,
    pub priority_speaker: Option<bool>,
    pub recording: Option<bool>,
    pub channel_id: Option<u32>,
}

/// Fields present in a `ChannelState` update; see [`UserChanges`] for the
/// presence semantics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub description_hash: Option<Vec<u8>>,
    pub temporary: Option<bool>,
    pub position: Option<i32>,
    pub max_users: Option<u32>,
    pub parent: Option<u32>,
    /// Full replacement of the link set when present.
    pub links: Option<Vec<u32>>,
    pub links_add: Vec<u32>,
    pub links_remove: Vec<u32>,
}

/// A connected user, identified by its transient server-assigned session
/// id. All attributes are read-only from the outside; mutation happens
/// through the dispatcher only.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    session: u32,
    username: Option<String>,
    unique_id: Option<u32>,
    mute: bool,
    deaf: bool,
    suppress: bool,
    self_mute: bool,
    self_deaf: bool,
    texture: Option<Vec<u8>>,
    texture_hash: Option<Vec<u8>>,
    comment: Option<String>,
    comment_hash: Option<Vec<u8>>,
    cert_hash: Option<String>,
    priority_speaker: bool,
    recording: bool,
    channel_id: Option<u32>,
    requested_texture: bool,
    requested_comment: bool,
}

impl User {
    fn new(session: u32) -> Self {
        Self {
            session,
            username: None,
            unique_id: None,
            mute: false,
            deaf: false,
            suppress: false,
            self_mute: false,
            self_deaf: false,
            texture: None,
            texture_hash: None,
            comment: None,
            comment_hash: None,
            cert_hash: None,
            priority_speaker: false,
            recording: false,
            channel_id: None,
            requested_texture: false,
            requested_comment: false,
        }
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Stable id of a registered user, unlike the transient session.
    pub fn unique_id(&self) -> Option<u32> {
        self.unique_id
    }

    pub fn mute(&self) -> bool {
        self.mute
    }

    pub fn deaf(&self) -> bool {
        self.deaf
    }

    pub fn suppress(&self) -> bool {
        self.suppress
    }

    pub fn self_mute(&self) -> bool {
        self.self_mute
    }

    pub fn self_deaf(&self) -> bool {
        self.self_deaf
    }

    pub fn texture(&self) -> Option<&[u8]> {
        self.texture.as_deref()
    }

    pub fn texture_hash(&self) -> Option<&[u8]> {
        self.texture_hash.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn comment_hash(&self) -> Option<&[u8]> {
        self.comment_hash.as_deref()
    }

    pub fn cert_hash(&self) -> Option<&str> {
        self.cert_hash.as_deref()
    }

    pub fn priority_speaker(&self) -> bool {
        self.priority_speaker
    }

    pub fn recording(&self) -> bool {
        self.recording
    }

    pub fn channel_id(&self) -> Option<u32> {
        self.channel_id
    }
}

/// A channel in the server's channel tree. Id 0 is the root. Relations
/// (parent, links, membership) are ids resolved through the [`World`]
/// indices, never direct references, so partially-synchronized trees stay
/// representable.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    channel_id: u32,
    name: Option<String>,
    description: Option<String>,
    description_hash: Option<Vec<u8>>,
    temporary: bool,
    position: i32,
    max_users: Option<u32>,
    parent_id: Option<u32>,
    links: Vec<u32>,
    users: Vec<u32>,
    requested_description: bool,
}

impl Channel {
    fn new(channel_id: u32) -> Self {
        Self {
            channel_id,
            name: None,
            description: None,
            description_hash: None,
            temporary: false,
            position: 0,
            max_users: None,
            parent_id: None,
            links: Vec::new(),
            users: Vec::new(),
            requested_description: false,
        }
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn description_hash(&self) -> Option<&[u8]> {
        self.description_hash.as_deref()
    }

    pub fn temporary(&self) -> bool {
        self.temporary
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn max_users(&self) -> Option<u32> {
        self.max_users
    }

    pub fn parent_id(&self) -> Option<u32> {
        self.parent_id
    }

    /// Linked channel ids, duplicate-free.
    pub fn links(&self) -> &[u32] {
        &self.links
    }

    /// Sessions of the users currently in this channel, in arrival order.
    pub fn users(&self) -> &[u32] {
        &self.users
    }
}

/// Client-side model of the server: the user and channel indices plus the
/// insertion-order sequences used for iteration.
#[derive(Debug, Default)]
pub struct World {
    users: HashMap<u32, User>,
    channels: HashMap<u32, Channel>,
    user_order: Vec<u32>,
    channel_order: Vec<u32>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, session: u32) -> Option<&User> {
        self.users.get(&session)
    }

    pub fn channel(&self, channel_id: u32) -> Option<&Channel> {
        self.channels.get(&channel_id)
    }

    /// Users in the order they were first seen.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.user_order.iter().filter_map(|id| self.users.get(id))
    }

    /// Channels in the order they were first seen.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channel_order
            .iter()
            .filter_map(|id| self.channels.get(id))
    }

    /// Channels whose parent is `channel_id`, derived from the index so a
    /// late-arriving parent still sees earlier children.
    pub fn children_of(&self, channel_id: u32) -> impl Iterator<Item = &Channel> {
        self.channels()
            .filter(move |channel| channel.parent_id == Some(channel_id))
    }

    pub(crate) fn apply_user(&mut self, session: u32, changes: &UserChanges) {
        if !self.users.contains_key(&session) {
            self.users.insert(session, User::new(session));
            self.user_order.push(session);
        }

        // Channel moves keep the at-most-one-membership invariant even when
        // either end of the move is not resolvable yet: leave the old list,
        // record the id, then join the new list.
        if let Some(new_channel) = changes.channel_id {
            let previous = self.users.get(&session).and_then(User::channel_id);
            if let Some(old_channel) = previous {
                if let Some(channel) = self.channels.get_mut(&old_channel) {
                    channel.users.retain(|s| *s != session);
                }
            }
            if let Some(user) = self.users.get_mut(&session) {
                user.channel_id = Some(new_channel);
            }
            if let Some(channel) = self.channels.get_mut(&new_channel) {
                if !channel.users.contains(&session) {
                    channel.users.push(session);
                }
            }
        }

        if let Some(user) = self.users.get_mut(&session) {
            if let Some(username) = &changes.username {
                user.username = Some(username.clone());
            }
            if let Some(unique_id) = changes.unique_id {
                user.unique_id = Some(unique_id);
            }
            if let Some(mute) = changes.mute {
                user.mute = mute;
            }
            if let Some(deaf) = changes.deaf {
                user.deaf = deaf;
            }
            if let Some(suppress) = changes.suppress {
                user.suppress = suppress;
            }
            if let Some(self_mute) = changes.self_mute {
                user.self_mute = self_mute;
            }
            if let Some(self_deaf) = changes.self_deaf {
                user.self_deaf = self_deaf;
            }
            if let Some(texture) = &changes.texture {
                user.texture = Some(texture.clone());
            }
            if let Some(hash) = &changes.texture_hash {
                // A new hash means the cached blob is stale; allow a fresh
                // request.
                user.texture_hash = Some(hash.clone());
                user.requested_texture = false;
            }
            if let Some(comment) = &changes.comment {
                user.comment = Some(comment.clone());
            }
            if let Some(hash) = &changes.comment_hash {
                user.comment_hash = Some(hash.clone());
                user.requested_comment = false;
            }
            if let Some(cert_hash) = &changes.cert_hash {
                user.cert_hash = Some(cert_hash.clone());
            }
            if let Some(priority_speaker) = changes.priority_speaker {
                user.priority_speaker = priority_speaker;
            }
            if let Some(recording) = changes.recording {
                user.recording = recording;
            }
        }
    }

    pub(crate) fn apply_channel(&mut self, channel_id: u32, changes: &ChannelChanges) {
        // Link removal is mirrored on the other side before this channel is
        // touched, so both link sets agree afterwards.
        for other in &changes.links_remove {
            if let Some(channel) = self.channels.get_mut(other) {
                channel.links.retain(|id| *id != channel_id);
            }
        }

        if !self.channels.contains_key(&channel_id) {
            self.channels.insert(channel_id, Channel::new(channel_id));
            self.channel_order.push(channel_id);
        }

        if let Some(channel) = self.channels.get_mut(&channel_id) {
            if let Some(name) = &changes.name {
                channel.name = Some(name.clone());
            }
            if let Some(description) = &changes.description {
                channel.description = Some(description.clone());
            }
            if let Some(hash) = &changes.description_hash {
                channel.description_hash = Some(hash.clone());
                channel.requested_description = false;
            }
            if let Some(temporary) = changes.temporary {
                channel.temporary = temporary;
            }
            if let Some(position) = changes.position {
                channel.position = position;
            }
            if let Some(max_users) = changes.max_users {
                channel.max_users = Some(max_users);
            }
            if let Some(parent) = changes.parent {
                channel.parent_id = Some(parent);
            }
            if let Some(links) = &changes.links {
                channel.links.clear();
                for id in links {
                    if !channel.links.contains(id) {
                        channel.links.push(*id);
                    }
                }
            } else {
                channel
                    .links
                    .retain(|id| !changes.links_remove.contains(id));
                for id in &changes.links_add {
                    if !channel.links.contains(id) {
                        channel.links.push(*id);
                    }
                }
            }
        }
    }

    pub(crate) fn remove_user(&mut self, session: u32) -> bool {
        let Some(user) = self.users.remove(&session) else {
            return false;
        };
        self.user_order.retain(|s| *s != session);
        if let Some(channel_id) = user.channel_id {
            if let Some(channel) = self.channels.get_mut(&channel_id) {
                channel.users.retain(|s| *s != session);
            }
        }
        true
    }

    pub(crate) fn remove_channel(&mut self, channel_id: u32) -> bool {
        if self.channels.remove(&channel_id).is_none() {
            return false;
        }
        self.channel_order.retain(|id| *id != channel_id);
        true
    }

    /// Marks the user's texture as requested. Returns true when the request
    /// should actually be sent (first request for the current hash).
    pub(crate) fn mark_texture_requested(&mut self, session: u32) -> bool {
        match self.users.get_mut(&session) {
            Some(user) if !user.requested_texture => {
                user.requested_texture = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn mark_comment_requested(&mut self, session: u32) -> bool {
        match self.users.get_mut(&session) {
            Some(user) if !user.requested_comment => {
                user.requested_comment = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn mark_description_requested(&mut self, channel_id: u32) -> bool {
        match self.channels.get_mut(&channel_id) {
            Some(channel) if !channel.requested_description => {
                channel.requested_description = true;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelChanges, UserChanges, World};

    fn named_channel(name: &str) -> ChannelChanges {
        ChannelChanges {
            name: Some(name.to_string()),
            ..ChannelChanges::default()
        }
    }

    fn join(channel_id: u32) -> UserChanges {
        UserChanges {
            channel_id: Some(channel_id),
            ..UserChanges::default()
        }
    }

    /// Channel upserts create then update in place.
    #[test]
    fn channel_state_adds_and_updates() {
        // Arrange
        let mut world = World::new();

        // Act
        world.apply_channel(1, &named_channel("Lobby"));
        world.apply_channel(
            1,
            &ChannelChanges {
                name: Some("Main".to_string()),
                parent: Some(0),
                ..ChannelChanges::default()
            },
        );

        // Assert
        let channel = world.channel(1).expect("channel missing");
        assert_eq!(channel.name(), Some("Main"));
        assert_eq!(channel.parent_id(), Some(0));
    }

    /// User upserts apply only the present fields.
    #[test]
    fn user_state_adds_and_updates() {
        // Arrange
        let mut world = World::new();

        // Act
        world.apply_user(
            10,
            &UserChanges {
                username: Some("Alice".to_string()),
                self_mute: Some(true),
                ..UserChanges::default()
            },
        );
        world.apply_user(
            10,
            &UserChanges {
                recording: Some(true),
                ..UserChanges::default()
            },
        );

        // Assert
        let user = world.user(10).expect("user missing");
        assert_eq!(user.username(), Some("Alice"));
        assert!(user.self_mute());
        assert!(user.recording());
        assert!(!user.self_deaf());
    }

    /// A channel move leaves the old membership list and joins the new one.
    #[test]
    fn channel_move_reconciles_membership() {
        // Arrange
        let mut world = World::new();
        world.apply_channel(1, &named_channel("Lobby"));
        world.apply_channel(2, &named_channel("Ops"));
        world.apply_user(10, &join(1));

        // Act
        world.apply_user(10, &join(2));

        // Assert
        assert!(world.channel(1).expect("channel missing").users().is_empty());
        assert_eq!(world.channel(2).expect("channel missing").users(), &[10]);
        assert_eq!(world.user(10).expect("user missing").channel_id(), Some(2));
    }

    /// Re-asserting the same channel keeps a single membership entry.
    #[test]
    fn repeated_join_keeps_single_membership() {
        // Arrange
        let mut world = World::new();
        world.apply_channel(1, &named_channel("Lobby"));

        // Act
        world.apply_user(10, &join(1));
        world.apply_user(10, &join(1));

        // Assert
        assert_eq!(world.channel(1).expect("channel missing").users(), &[10]);
    }

    /// Moving towards a channel the client has not seen yet records the id
    /// without any membership entry.
    #[test]
    fn move_to_unresolved_channel_keeps_id_only() {
        // Arrange
        let mut world = World::new();
        world.apply_channel(1, &named_channel("Lobby"));
        world.apply_user(10, &join(1));

        // Act
        world.apply_user(10, &join(99));

        // Assert
        assert!(world.channel(1).expect("channel missing").users().is_empty());
        assert_eq!(world.user(10).expect("user missing").channel_id(), Some(99));
    }

    /// A present `links` list replaces the set; otherwise removals apply
    /// before additions and duplicates are ignored.
    #[test]
    fn link_set_semantics() {
        // Arrange
        let mut world = World::new();
        world.apply_channel(1, &named_channel("A"));

        // Act
        world.apply_channel(
            1,
            &ChannelChanges {
                links: Some(vec![2, 3, 3]),
                ..ChannelChanges::default()
            },
        );
        world.apply_channel(
            1,
            &ChannelChanges {
                links_remove: vec![2],
                links_add: vec![4, 3],
                ..ChannelChanges::default()
            },
        );

        // Assert
        assert_eq!(world.channel(1).expect("channel missing").links(), &[3, 4]);
    }

    /// Removing a link is mirrored on the linked channel.
    #[test]
    fn link_removal_is_mirrored() {
        // Arrange
        let mut world = World::new();
        world.apply_channel(
            1,
            &ChannelChanges {
                links: Some(vec![2]),
                ..ChannelChanges::default()
            },
        );
        world.apply_channel(
            2,
            &ChannelChanges {
                links: Some(vec![1]),
                ..ChannelChanges::default()
            },
        );

        // Act
        world.apply_channel(
            1,
            &ChannelChanges {
                links_remove: vec![2],
                ..ChannelChanges::default()
            },
        );

        // Assert
        assert!(world.channel(1).expect("channel missing").links().is_empty());
        assert!(world.channel(2).expect("channel missing").links().is_empty());
    }

    /// Removing a user drops it from the index, the sequence and its
    /// channel's membership while other users stay intact.
    #[test]
    fn user_remove_cleans_membership() {
        // Arrange
        let mut world = World::new();
        world.apply_channel(1, &named_channel("Lobby"));
        world.apply_user(1, &join(1));
        world.apply_user(42, &join(1));

        // Act
        let removed = world.remove_user(42);

        // Assert
        assert!(removed);
        assert!(world.user(42).is_none());
        assert_eq!(world.channel(1).expect("channel missing").users(), &[1]);
        assert!(world.user(1).is_some());
        assert_eq!(world.users().count(), 1);
    }

    /// Children are derived from parent ids, so a parent arriving after its
    /// children still sees them.
    #[test]
    fn children_are_derived_from_parent_ids() {
        // Arrange
        let mut world = World::new();
        world.apply_channel(
            5,
            &ChannelChanges {
                parent: Some(1),
                ..ChannelChanges::default()
            },
        );
        world.apply_channel(
            6,
            &ChannelChanges {
                parent: Some(1),
                ..ChannelChanges::default()
            },
        );

        // Act
        world.apply_channel(1, &named_channel("Late parent"));

        // Assert
        let children: Vec<u32> = world.children_of(1).map(|c| c.channel_id()).collect();
        assert_eq!(children, vec![5, 6]);
    }

    /// A fresh hash re-arms the blob request flag.
    #[test]
    fn new_comment_hash_allows_new_request() {
        // Arrange
        let mut world = World::new();
        world.apply_user(10, &UserChanges::default());
        assert!(world.mark_comment_requested(10));
        assert!(!world.mark_comment_requested(10));

        // Act
        world.apply_user(
            10,
            &UserChanges {
                comment_hash: Some(vec![1, 2, 3]),
                ..UserChanges::default()
            },
        );

        // Assert
        assert!(world.mark_comment_requested(10));
    }

    /// Iteration follows first-seen order for users and channels.
    #[test]
    fn iteration_preserves_insertion_order() {
        // Arrange
        let mut world = World::new();
        world.apply_channel(7, &named_channel("C7"));
        world.apply_channel(3, &named_channel("C3"));
        world.apply_user(9, &UserChanges::default());
        world.apply_user(4, &UserChanges::default());

        // Act
        let channels: Vec<u32> = world.channels().map(|c| c.channel_id()).collect();
        let users: Vec<u32> = world.users().map(|u| u.session()).collect();

        // Assert
        assert_eq!(channels, vec![7, 3]);
        assert_eq!(users, vec![9, 4]);
    }
}

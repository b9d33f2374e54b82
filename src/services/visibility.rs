//! Who may see a wish, and who may see its restricted fields.

use std::collections::BTreeSet;

use crate::models::wish::Show;

/// Outcome of a visibility check for one viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub visible: bool,
    pub see_restricted: bool,
}

impl Access {
    pub const fn full() -> Self {
        Self {
            visible: true,
            see_restricted: true,
        }
    }

    pub const fn hidden() -> Self {
        Self {
            visible: false,
            see_restricted: false,
        }
    }
}

pub fn can_view(show: Show, owner_id: i64, viewer_id: i64, owner_friends: &BTreeSet<i64>) -> Access {
    let allowed = match show {
        Show::All => true,
        Show::Friends => viewer_id == owner_id || owner_friends.contains(&viewer_id),
        Show::Nobody => viewer_id == owner_id,
    };

    if allowed { Access::full() } else { Access::hidden() }
}

/// Same rule applied to a single profile field.
pub fn field_visible(show: Show, owner_id: i64, viewer_id: i64, owner_friends: &BTreeSet<i64>) -> bool {
    can_view(show, owner_id, viewer_id, owner_friends).visible
}

/// The `show` values of an owner's wishes that a viewer may list.
pub fn visible_shows(owner_id: i64, viewer_id: i64, owner_friends: &BTreeSet<i64>) -> Vec<Show> {
    [Show::All, Show::Friends, Show::Nobody]
        .into_iter()
        .filter(|show| can_view(*show, owner_id, viewer_id, owner_friends).visible)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: i64 = 1;
    const FRIEND: i64 = 2;
    const STRANGER: i64 = 3;

    fn friends() -> BTreeSet<i64> {
        BTreeSet::from([FRIEND])
    }

    #[test]
    fn public_wishes_are_visible_to_everyone() {
        for viewer in [OWNER, FRIEND, STRANGER] {
            assert_eq!(can_view(Show::All, OWNER, viewer, &friends()), Access::full());
        }
    }

    #[test]
    fn friends_wishes_need_a_friendship() {
        assert_eq!(can_view(Show::Friends, OWNER, OWNER, &friends()), Access::full());
        assert_eq!(can_view(Show::Friends, OWNER, FRIEND, &friends()), Access::full());
        assert_eq!(can_view(Show::Friends, OWNER, STRANGER, &friends()), Access::hidden());
    }

    #[test]
    fn private_wishes_are_owner_only() {
        assert_eq!(can_view(Show::Nobody, OWNER, OWNER, &friends()), Access::full());
        assert_eq!(can_view(Show::Nobody, OWNER, FRIEND, &friends()), Access::hidden());
    }

    #[test]
    fn visible_shows_per_relationship() {
        assert_eq!(visible_shows(OWNER, OWNER, &friends()), vec![Show::All, Show::Friends, Show::Nobody]);
        assert_eq!(visible_shows(OWNER, FRIEND, &friends()), vec![Show::All, Show::Friends]);
        assert_eq!(visible_shows(OWNER, STRANGER, &friends()), vec![Show::All]);
    }
}

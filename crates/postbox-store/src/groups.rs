//! Group records, membership chains and the membership audit log.
//!
//! Layout under the store:
//!
//! - `group/<gid>`                         -- the [`Group`] record
//! - `member/<gid>/member/<jid>`           -- membership chain nodes
//! - `member/<gid>/member-last`            -- id of the newest member
//! - `member/<gid>/memberlog/<logid>`      -- audit log nodes
//! - `member/<gid>/memberlog-last`         -- id of the newest log entry
//!
//! The first member of the chain is the owner; it has no predecessor and
//! therefore can never be removed.
//!
//! Chain appends read the tail before writing, so every membership change
//! runs under one writer lock shared by all clones of the store.

use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use postbox_shared::{Gid, Group, GroupMember, Jid, MemberAction, MemberItem, MemberLog};

use crate::chain::{Chain, Direction};
use crate::error::{Result, StoreError};
use crate::kv::KvStore;
use crate::table::Table;

const GROUP_PREFIX: &str = "group/";
const MEMBER_PREFIX: &str = "member/";

#[derive(Clone)]
pub struct GroupStore {
    groups: Table,
    members: Table,
    writer: Arc<Mutex<()>>,
}

impl GroupStore {
    pub fn new(store: Arc<KvStore>) -> Self {
        Self {
            groups: Table::new(Arc::clone(&store), GROUP_PREFIX),
            members: Table::new(store, MEMBER_PREFIX),
            writer: Arc::new(Mutex::new(())),
        }
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer.lock().map_err(|_| StoreError::Poisoned)
    }

    fn member_chain(&self, gid: &Gid) -> Chain<MemberItem> {
        Chain::new(self.members.sub(format!("{gid}/")), "member")
    }

    fn log_chain(&self, gid: &Gid) -> Chain<MemberLog> {
        Chain::new(self.members.sub(format!("{gid}/")), "memberlog")
    }

    // ---- Group records ----

    /// Persist a group record. The first save of a group also seeds its
    /// membership chain with the owner. `lastlog` is never stored.
    pub fn save_group(&self, group: &Group) -> Result<Group> {
        if group.id.is_empty() {
            return Err(StoreError::MissingGroupId);
        }
        let owner = group.owner.as_ref().ok_or(StoreError::MissingOwner)?;

        let mut stored = group.clone();
        stored.lastlog = String::new();

        {
            let _writer = self.lock_writer()?;
            self.groups.put_frame(group.id.as_str(), &stored)?;

            if self.member_chain(&group.id).is_empty()? {
                let mut seed = owner.clone().with_action(MemberAction::Add);
                seed.gid = group.id.clone();
                self.apply_member(&seed)?;
                tracing::info!(gid = %group.id, owner = %seed.id, "group created");
            }
        }

        self.get_group(&group.id)?
            .ok_or_else(|| StoreError::NotFound(group.id.to_string()))
    }

    /// Load a group, with `lastlog` set to the newest audit entry.
    pub fn get_group(&self, gid: &Gid) -> Result<Option<Group>> {
        if gid.is_empty() {
            return Ok(None);
        }

        let Some(mut group) = self.groups.get_frame::<Group>(gid.as_str())? else {
            return Ok(None);
        };
        group.lastlog = self.log_chain(gid).tail_id()?;
        Ok(Some(group))
    }

    pub fn has_group(&self, gid: &Gid) -> Result<bool> {
        if gid.is_empty() {
            return Ok(false);
        }
        self.groups.has(gid.as_str())
    }

    // ---- Membership ----

    /// Apply one membership change. The audit entry is committed before
    /// the change is attempted, so failed changes are logged too.
    pub fn handle_member(&self, member: &GroupMember) -> Result<()> {
        let _writer = self.lock_writer()?;
        self.apply_member(member)
    }

    /// [`GroupStore::handle_member`] without taking the writer lock.
    fn apply_member(&self, member: &GroupMember) -> Result<()> {
        let gid = &member.gid;
        if gid.is_empty() {
            return Err(StoreError::MissingGroupId);
        }

        let entry = MemberLog {
            id: Uuid::new_v4().to_string(),
            action: member.action.clone(),
            gid: gid.clone(),
            member_id: member.id.clone(),
            ..Default::default()
        };
        self.log_chain(gid).insert_after_tail(entry)?;

        let chain = self.member_chain(gid);
        match &member.action {
            MemberAction::Add => {
                if chain.contains(member.id.as_str())? {
                    return Err(StoreError::MemberExists(member.id.to_string()));
                }
                chain.insert_after_tail(MemberItem {
                    id: member.id.clone(),
                    member: member.clone().with_action(MemberAction::Unset),
                    ..Default::default()
                })?;
                tracing::debug!(gid = %gid, member = %member.id, "member added");
            }
            MemberAction::Sub => {
                chain.splice_out(member.id.as_str())?;
                tracing::debug!(gid = %gid, member = %member.id, "member removed");
            }
            other => return Err(StoreError::UnsupportedAction(other.to_string())),
        }

        Ok(())
    }

    /// Walk the membership chain from `start`: `From` follows successors,
    /// `To` follows predecessors.
    pub fn query_members(
        &self,
        gid: &Gid,
        start: &Jid,
        action: &MemberAction,
    ) -> Result<Vec<GroupMember>> {
        let direction = match action {
            MemberAction::From => Direction::Forward,
            MemberAction::To => Direction::Backward,
            other => return Err(StoreError::UnsupportedAction(other.to_string())),
        };

        Ok(self
            .member_chain(gid)
            .walk(start.as_str(), direction)?
            .into_iter()
            .map(|item| item.member)
            .collect())
    }

    /// Every member, owner first.
    pub fn members(&self, gid: &Gid) -> Result<Vec<GroupMember>> {
        Ok(self
            .member_chain(gid)
            .all()?
            .into_iter()
            .map(|item| item.member)
            .collect())
    }

    /// The audit log, oldest entry first.
    pub fn audit_log(&self, gid: &Gid) -> Result<Vec<MemberLog>> {
        self.log_chain(gid).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &str = "16Uiu2HAkzRux7XYhYfmTDY2C7xuBapitNp25DvKvpvVnCf9bRne7";
    const HOME: &str = "16Uiu2HAmPLe7Mzm8TsYUubgCAW1aJoeFScxrLj8ppHFivPo97bUZ";

    fn gid() -> Gid {
        Jid::new("16Uiu2HAm4bP1pqrTJTqd3Jp5Y5xwz7gAjV4YBULi59nN3CwYFzDP", HOME)
    }

    fn member(name: &str) -> GroupMember {
        // Any distinct id works for the chain; pad to look like a jid.
        GroupMember::new(Jid::new(&format!("{name:_<53}"), HOME), name, gid())
    }

    fn store_with_group() -> (GroupStore, Group) {
        let store = GroupStore::new(Arc::new(KvStore::open_in_memory().unwrap()));
        let group = Group {
            id: gid(),
            owner: Some(GroupMember::new(Jid::new(OWNER, HOME), "owner", gid())),
            name: "friends".into(),
            comment: String::new(),
            lastlog: "client supplied".into(),
        };
        let saved = store.save_group(&group).unwrap();
        (store, saved)
    }

    fn ids(members: &[GroupMember]) -> Vec<String> {
        members.iter().map(|m| m.name.clone()).collect()
    }

    #[test]
    fn save_seeds_owner_once() {
        let (store, saved) = store_with_group();
        assert_eq!(ids(&store.members(&gid()).unwrap()), ["owner"]);

        let log = store.audit_log(&gid()).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(saved.lastlog, log[0].id);

        // A second save updates metadata but does not reseed.
        let mut renamed = saved.clone();
        renamed.name = "best friends".into();
        let again = store.save_group(&renamed).unwrap();
        assert_eq!(again.name, "best friends");
        assert_eq!(store.audit_log(&gid()).unwrap().len(), 1);
    }

    #[test]
    fn lastlog_is_recomputed_on_read() {
        let (store, _) = store_with_group();
        store
            .handle_member(&member("ann").with_action(MemberAction::Add))
            .unwrap();

        let group = store.get_group(&gid()).unwrap().unwrap();
        let log = store.audit_log(&gid()).unwrap();
        assert_eq!(group.lastlog, log[log.len() - 1].id);
        assert_ne!(group.lastlog, "client supplied");
    }

    #[test]
    fn add_remove_and_traverse() {
        let (store, _) = store_with_group();
        for name in ["ann", "bob", "cat"] {
            store
                .handle_member(&member(name).with_action(MemberAction::Add))
                .unwrap();
        }
        store
            .handle_member(&member("bob").with_action(MemberAction::Sub))
            .unwrap();

        let owner = Jid::new(OWNER, HOME);
        let forward = store
            .query_members(&gid(), &owner, &MemberAction::From)
            .unwrap();
        assert_eq!(ids(&forward), ["owner", "ann", "cat"]);

        let backward = store
            .query_members(&gid(), &member("cat").id, &MemberAction::To)
            .unwrap();
        assert_eq!(ids(&backward), ["cat", "ann", "owner"]);

        let actions: Vec<MemberAction> = store
            .audit_log(&gid())
            .unwrap()
            .into_iter()
            .map(|l| l.action)
            .collect();
        assert_eq!(
            actions,
            [
                MemberAction::Add,
                MemberAction::Add,
                MemberAction::Add,
                MemberAction::Add,
                MemberAction::Sub
            ]
        );
    }

    #[test]
    fn failed_changes_are_still_logged() {
        let (store, _) = store_with_group();
        let owner = GroupMember::new(Jid::new(OWNER, HOME), "owner", gid());

        let err = store
            .handle_member(&owner.clone().with_action(MemberAction::Sub))
            .unwrap_err();
        assert!(matches!(err, StoreError::NoPredecessor(_)));

        let err = store
            .handle_member(&owner.clone().with_action(MemberAction::Add))
            .unwrap_err();
        assert!(matches!(err, StoreError::MemberExists(_)));

        let err = store
            .handle_member(&owner.with_action(MemberAction::Unknown("x".into())))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedAction(_)));

        assert_eq!(store.audit_log(&gid()).unwrap().len(), 4);
        assert_eq!(ids(&store.members(&gid()).unwrap()), ["owner"]);
    }

    #[test]
    fn traversal_rejects_mutating_actions() {
        let (store, _) = store_with_group();
        let owner = Jid::new(OWNER, HOME);
        assert!(store
            .query_members(&gid(), &owner, &MemberAction::Add)
            .is_err());
        assert!(store
            .query_members(&gid(), &Jid::from("nobody"), &MemberAction::From)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn save_requires_id_and_owner() {
        let store = GroupStore::new(Arc::new(KvStore::open_in_memory().unwrap()));
        assert!(matches!(
            store.save_group(&Group::default()),
            Err(StoreError::MissingGroupId)
        ));
        let no_owner = Group {
            id: gid(),
            ..Default::default()
        };
        assert!(matches!(
            store.save_group(&no_owner),
            Err(StoreError::MissingOwner)
        ));
        assert!(store.get_group(&gid()).unwrap().is_none());
    }

    #[test]
    fn concurrent_adds_keep_both_chains_linear() {
        let (store, _) = store_with_group();
        let names: Vec<String> = (0..16).map(|i| format!("m{i:02}")).collect();

        std::thread::scope(|scope| {
            for name in &names {
                let store = store.clone();
                scope.spawn(move || {
                    store
                        .handle_member(&member(name).with_action(MemberAction::Add))
                        .unwrap();
                });
            }
        });

        let log = store.audit_log(&gid()).unwrap();
        assert_eq!(log.len(), 17);
        let members = store.members(&gid()).unwrap();
        assert_eq!(members.len(), 17);
        assert_eq!(members[0].name, "owner");

        let mut added = ids(&members[1..]);
        added.sort();
        assert_eq!(added, names);

        let owner = Jid::new(OWNER, HOME);
        let backward = store
            .query_members(&gid(), &members[16].id, &MemberAction::To)
            .unwrap();
        assert_eq!(backward.len(), 17);
        assert_eq!(backward[16].id, owner);
    }
}

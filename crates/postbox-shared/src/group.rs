use serde::{Deserialize, Serialize};

use crate::codec::Frame;
use crate::constants::{MAX_BULK_FRAME, MAX_GROUP_FRAME, MAX_MEMBER_REQ_FRAME};
use crate::jid::{Gid, Jid};

/// Membership mutation or traversal direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemberAction {
    /// Append a member
    Add,
    /// Remove a member
    Sub,
    /// Walk the membership chain forward
    From,
    /// Walk the membership chain backward
    To,
    #[default]
    Unset,
    Unknown(String),
}

impl MemberAction {
    pub fn as_str(&self) -> &str {
        match self {
            MemberAction::Add => "+",
            MemberAction::Sub => "-",
            MemberAction::From => "f",
            MemberAction::To => "t",
            MemberAction::Unset => "",
            MemberAction::Unknown(s) => s,
        }
    }
}

impl From<String> for MemberAction {
    fn from(s: String) -> Self {
        match s.as_str() {
            "+" => MemberAction::Add,
            "-" => MemberAction::Sub,
            "f" => MemberAction::From,
            "t" => MemberAction::To,
            "" => MemberAction::Unset,
            _ => MemberAction::Unknown(s),
        }
    }
}

impl From<MemberAction> for String {
    fn from(a: MemberAction) -> Self {
        a.as_str().to_string()
    }
}

impl std::fmt::Display for MemberAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group metadata as persisted by the group's home mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    pub id: Gid,
    pub owner: Option<GroupMember>,
    pub name: String,
    pub comment: String,
    /// Id of the newest audit-log entry. Recomputed on every read, never
    /// trusted from storage or clients.
    pub lastlog: String,
}

impl Frame for Group {
    const MAX_FRAME: usize = MAX_GROUP_FRAME;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupMember {
    pub id: Jid,
    pub name: String,
    pub gid: Gid,
    /// Only meaningful while a membership change is being applied.
    #[serde(skip)]
    pub action: MemberAction,
}

impl GroupMember {
    pub fn new(id: Jid, name: impl Into<String>, gid: Gid) -> Self {
        Self {
            id,
            name: name.into(),
            gid,
            action: MemberAction::Unset,
        }
    }

    pub fn with_action(mut self, action: MemberAction) -> Self {
        self.action = action;
        self
    }
}

impl Frame for GroupMember {
    const MAX_FRAME: usize = MAX_MEMBER_REQ_FRAME;
}

/// A node of the membership chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberItem {
    pub id: Jid,
    pub prev: Jid,
    pub next: Jid,
    pub member: GroupMember,
}

impl Frame for MemberItem {
    const MAX_FRAME: usize = MAX_BULK_FRAME;
}

/// A node of the append-only membership audit chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberLog {
    pub id: String,
    pub prev: String,
    pub next: String,
    pub action: MemberAction,
    pub gid: Gid,
    pub member_id: Jid,
}

impl Frame for MemberLog {
    const MAX_FRAME: usize = MAX_BULK_FRAME;
}

/// Reply to a group create/update request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupRsp {
    pub group: Option<Group>,
    pub err: String,
}

impl GroupRsp {
    pub fn ok(group: Group) -> Self {
        Self {
            group: Some(group),
            err: String::new(),
        }
    }

    pub fn err(err: impl std::fmt::Display) -> Self {
        Self {
            group: None,
            err: err.to_string(),
        }
    }
}

impl Frame for GroupRsp {
    const MAX_FRAME: usize = MAX_GROUP_FRAME;
}

/// Membership mutation (`Add`/`Sub` with `members`) or traversal
/// (`From`/`To` starting at `id`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupMemberReq {
    pub gid: Gid,
    pub id: Jid,
    pub action: MemberAction,
    pub members: Vec<GroupMember>,
}

impl Frame for GroupMemberReq {
    const MAX_FRAME: usize = MAX_MEMBER_REQ_FRAME;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupMemberRsp {
    pub action: MemberAction,
    /// `"success"` after a mutation
    pub result: String,
    /// Traversal result, in walk order
    pub members: Vec<GroupMember>,
    pub err: String,
}

impl Frame for GroupMemberRsp {
    const MAX_FRAME: usize = MAX_BULK_FRAME;
}

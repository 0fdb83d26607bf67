//! Address, message and group model shared by every postbox crate, plus the
//! binary/JSON codec they travel in.

pub mod codec;
pub mod constants;
pub mod error;
pub mod group;
pub mod jid;
pub mod message;

pub use codec::Frame;
pub use error::CodecError;
pub use group::{
    Group, GroupMember, GroupMemberReq, GroupMemberRsp, GroupRsp, MemberAction, MemberItem,
    MemberLog,
};
pub use jid::{Gid, Jid};
pub use message::{Attr, CleanMsg, Envelope, Message, MessageBag, MsgType, Payload};

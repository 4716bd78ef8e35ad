mod documents;
mod groups;
mod store;

pub use groups::{
    DocumentGroupRef, Group, GroupFilter, GroupMember, GroupUpdate, NewGroup, ParentFilter,
    TopGroupSummary, GROUP_TYPES, MEMBER_ROLES,
};
pub use store::KbStore;

//! Permission bits carried in the user-properties answer.

use bitflags::bitflags;

bitflags! {
    /// Per-user permission flags returned by `GetUserProps`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UserProperties: u32 {
        /// May add and edit games.
        const ENABLE_ADD_GAME     = 0x0000_0001;
        /// May add season tickets.
        const ENABLE_ADD_TICKET   = 0x0000_0002;
        /// May edit meeting info.
        const ENABLE_MEETING      = 0x0000_0004;
        /// May mark kick-off times as fixed.
        const ENABLE_FIXED_TIME   = 0x0000_0008;
        /// Full administrator.
        const ADMIN               = 0x0000_0080;
    }
}

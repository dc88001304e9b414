//! Identity of the unprivileged user a privileged run is acting on behalf of.
use crate::defaults::{SUDO_GID_ENV_VAR, SUDO_UID_ENV_VAR, SUDO_USER_ENV_VAR};
use crate::utils::is_elevated::is_elevated;
use nix::unistd::{Gid, Uid};
use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUser {
    pub name: String,
    pub uid: Uid,
    pub gid: Gid,
}

impl TargetUser {
    /// Returns the user that invoked `sudo`, when the process is privileged and was started
    /// through it. A root `SUDO_UID` yields no target user, as there is nothing to drop to.
    pub fn from_sudo_env() -> Option<Self> {
        if !is_elevated() {
            return None;
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let uid = lookup(SUDO_UID_ENV_VAR)?.parse::<u32>().ok()?;
        let gid = lookup(SUDO_GID_ENV_VAR)?.parse::<u32>().ok()?;
        if uid == 0 {
            return None;
        }
        let name = lookup(SUDO_USER_ENV_VAR).unwrap_or_else(|| uid.to_string());
        Some(Self {
            name,
            uid: Uid::from_raw(uid),
            gid: Gid::from_raw(gid),
        })
    }
}

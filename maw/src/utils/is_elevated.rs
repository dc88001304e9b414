/// Returns true when the current process runs with an effective root uid.
pub fn is_elevated() -> bool {
    nix::unistd::Uid::effective().is_root()
}
